//! Room topology: wiring on join, unwiring on leave
//!
//! Each participant owns one receive-only talker plus one send-only listener
//! per other participant. For N participants the room holds N talkers and
//! N·(N−1) listeners.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::actor::endpoint_actor;
use super::registry::{Endpoint, SessionSink, UserSession};
use super::relay::Relay;
use super::types::{EndpointId, Role, SessionId, SignalingError};
use crate::engine::PipelineId;

impl Relay {
    /// Join the room: register the session, create its talker and wire it
    /// to every participant already present, in both directions.
    ///
    /// If wiring fails the error is returned and the joining session is
    /// released as if it had left, taking every endpoint created for it so
    /// far. The browser may send START again.
    pub async fn join(self: &Arc<Self>, sink: SessionSink) -> Result<(), SignalingError> {
        let session_id = sink.session_id().clone();
        let _topology = self.topology.lock().await;

        if self.sessions.contains(&session_id) {
            return Err(SignalingError::AlreadyJoined(session_id));
        }

        let pipeline = self.pipeline().await?;
        info!(users = self.sessions.len(), session = %session_id, "New user");

        let session = Arc::new(UserSession::new(sink));
        self.sessions.register(Arc::clone(&session))?;

        if let Err(e) = self.wire(&pipeline, &session).await {
            warn!(session = %session_id, "Join failed, releasing the session: {}", e);
            self.release_session(&session_id).await;
            return Err(e);
        }

        debug!(links = ?self.topology(), "Room topology");
        Ok(())
    }

    /// Leave the room. Releases the session's talker, every listener it owns
    /// and every listener elsewhere fed by its talker.
    ///
    /// Returns false if the session was not joined.
    pub async fn leave(&self, session_id: &SessionId) -> bool {
        let _topology = self.topology.lock().await;
        self.release_session(session_id).await
    }

    /// Caller holds the topology lock.
    async fn release_session(&self, session_id: &SessionId) -> bool {
        let Some(session) = self.sessions.remove(session_id) else {
            return false;
        };
        let talker = session.talker();

        let mut released: Vec<Arc<Endpoint>> = Vec::new();
        for id in session.take_endpoints() {
            if let Ok(endpoint) = self.endpoints.lookup(&id) {
                released.push(endpoint);
            }
        }
        if let Some(talker) = talker {
            released.extend(self.endpoints.listeners_of(&talker));
        }

        for endpoint in &released {
            self.close_endpoint(endpoint).await;
        }

        info!(
            session = %session_id,
            released = released.len(),
            users = self.sessions.len(),
            "User left"
        );
        true
    }

    async fn wire(
        self: &Arc<Self>,
        pipeline: &PipelineId,
        session: &Arc<UserSession>,
    ) -> Result<(), SignalingError> {
        let talker = self
            .create_endpoint(pipeline, session, Role::Talker, None)
            .await?;
        session.set_talker(talker.id().clone())?;
        self.negotiate(&talker, session.sink()).await?;
        info!(endpoint = talker.name(), "New local talker");

        let mut remotes = Vec::new();
        self.sessions.for_each_session(|remote| {
            if remote.id() != session.id() {
                remotes.push(Arc::clone(remote));
            }
        });

        for remote in remotes {
            let Some(remote_talker) = remote.talker() else {
                warn!(session = %remote.id(), "Skip, remote user has no talker");
                continue;
            };

            // our talker -> new listener on the remote side
            let listener = self.add_listener(pipeline, &remote, talker.id()).await?;
            info!(endpoint = listener.name(), "New remote listener");

            // remote talker -> new listener on our side
            let listener = self.add_listener(pipeline, session, &remote_talker).await?;
            info!(endpoint = listener.name(), "New local listener");
        }
        Ok(())
    }

    /// Create a listener for `owner` fed by `source` and send its offer.
    async fn add_listener(
        self: &Arc<Self>,
        pipeline: &PipelineId,
        owner: &UserSession,
        source: &EndpointId,
    ) -> Result<Arc<Endpoint>, SignalingError> {
        let listener = self
            .create_endpoint(pipeline, owner, Role::Listener, Some(source.clone()))
            .await?;
        if let Err(e) = self.engine.connect(source, listener.id()).await {
            self.close_endpoint(&listener).await;
            return Err(e.into());
        }
        owner.add_listener(listener.id().clone());
        self.negotiate(&listener, owner.sink()).await?;
        Ok(listener)
    }

    async fn create_endpoint(
        self: &Arc<Self>,
        pipeline: &PipelineId,
        owner: &UserSession,
        role: Role,
        source: Option<EndpointId>,
    ) -> Result<Arc<Endpoint>, SignalingError> {
        let (id, events) = self
            .engine
            .create_endpoint(pipeline, role.direction())
            .await?;
        let endpoint = Arc::new(Endpoint::new(
            id,
            owner.endpoint_name(role),
            role,
            owner.id().clone(),
            source,
        ));
        self.endpoints.register(Arc::clone(&endpoint));

        tokio::spawn(endpoint_actor(
            Arc::clone(self),
            Arc::clone(&endpoint),
            events,
        ));
        Ok(endpoint)
    }
}
