//! Session and endpoint registries shared by every connection task

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error};

use super::messages::ServerMessage;
use super::types::{EndpointId, NegotiationState, OutboundMessage, Role, SessionId, SignalingError};

/// Outbound half of one connection.
///
/// Cloneable and usable from any task; sends after the connection has
/// closed are dropped.
#[derive(Debug, Clone)]
pub struct SessionSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl SessionSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { session, tx }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session
    }

    pub fn send(&self, msg: &ServerMessage) {
        let out = match msg.to_outbound() {
            Ok(out) => out,
            Err(e) => {
                error!(session = %self.session, "failed to serialize outbound message: {}", e);
                return;
            }
        };
        debug!(session = %self.session, message = out.as_str(), "send");
        if self.tx.send(out).is_err() {
            debug!(session = %self.session, "skip send, connection closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One media endpoint inside the shared pipeline.
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    name: String,
    role: Role,
    owner: SessionId,
    source: Option<EndpointId>,
    pub(crate) state: tokio::sync::Mutex<NegotiationState>,
    /// Set once the engine has been asked to gather candidates.
    pub(crate) gathering: AtomicBool,
    pub(crate) shutdown: Notify,
}

impl Endpoint {
    pub fn new(
        id: EndpointId,
        name: String,
        role: Role,
        owner: SessionId,
        source: Option<EndpointId>,
    ) -> Self {
        Self {
            id,
            name,
            role,
            owner,
            source,
            state: tokio::sync::Mutex::new(NegotiationState::Created),
            gathering: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn owner(&self) -> &SessionId {
        &self.owner
    }

    /// Talker this listener receives from. `None` for talkers.
    pub fn source(&self) -> Option<&EndpointId> {
        self.source.as_ref()
    }

    pub async fn state(&self) -> NegotiationState {
        *self.state.lock().await
    }
}

/// One connected participant.
#[derive(Debug)]
pub struct UserSession {
    id: SessionId,
    sink: SessionSink,
    talker: Mutex<Option<EndpointId>>,
    listeners: Mutex<Vec<EndpointId>>,
    endpoint_seq: AtomicUsize,
}

impl UserSession {
    pub fn new(sink: SessionSink) -> Self {
        Self {
            id: sink.session_id().clone(),
            sink,
            talker: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            endpoint_seq: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn sink(&self) -> &SessionSink {
        &self.sink
    }

    pub fn talker(&self) -> Option<EndpointId> {
        self.talker.lock().clone()
    }

    pub(crate) fn set_talker(&self, endpoint: EndpointId) -> Result<(), SignalingError> {
        let mut talker = self.talker.lock();
        if talker.is_some() {
            return Err(SignalingError::Internal(format!(
                "session {} already has a talker",
                self.id
            )));
        }
        *talker = Some(endpoint);
        Ok(())
    }

    pub fn listeners(&self) -> Vec<EndpointId> {
        self.listeners.lock().clone()
    }

    pub(crate) fn add_listener(&self, endpoint: EndpointId) {
        self.listeners.lock().push(endpoint);
    }

    pub(crate) fn remove_listener(&self, endpoint: &EndpointId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|id| id != endpoint);
        listeners.len() != before
    }

    /// Every endpoint this session owns, talker first.
    pub(crate) fn take_endpoints(&self) -> Vec<EndpointId> {
        let mut owned: Vec<EndpointId> = self.talker.lock().take().into_iter().collect();
        owned.append(&mut self.listeners.lock());
        owned
    }

    pub(crate) fn endpoint_name(&self, role: Role) -> String {
        let n = self.endpoint_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_endpoint{}", role.name(), self.id, n)
    }
}

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: DashMap<EndpointId, Arc<Endpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: Arc<Endpoint>) {
        self.endpoints.insert(endpoint.id().clone(), endpoint);
    }

    pub fn lookup(&self, id: &EndpointId) -> Result<Arc<Endpoint>, SignalingError> {
        self.endpoints
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SignalingError::UnknownEndpoint(id.clone()))
    }

    pub fn remove(&self, id: &EndpointId) -> Option<Arc<Endpoint>> {
        self.endpoints.remove(id).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Listeners wired from `talker`, wherever they live.
    pub fn listeners_of(&self, talker: &EndpointId) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .iter()
            .filter(|e| e.source() == Some(talker))
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<UserSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-if-absent.
    pub fn register(&self, session: Arc<UserSession>) -> Result<(), SignalingError> {
        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(_) => Err(SignalingError::AlreadyJoined(session.id().clone())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, id: &SessionId) -> Result<Arc<UserSession>, SignalingError> {
        self.sessions
            .get(id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| SignalingError::UnknownSession(id.clone()))
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<UserSession>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids registered at the time of the call. Entries may disappear before
    /// they are used; resolve each one again with [`SessionRegistry::lookup`].
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }

    /// Visit every session still registered at the time it is reached.
    ///
    /// No map guard is held while the visitor runs, so the visitor may touch
    /// the registry.
    pub fn for_each_session<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<UserSession>),
    {
        for id in self.session_ids() {
            // skip sessions that left while iterating
            if let Ok(session) = self.lookup(&id) {
                visitor(&session);
            }
        }
    }
}
