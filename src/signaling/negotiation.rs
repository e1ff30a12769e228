//! Per-endpoint offer / answer / candidate state machine
//!
//! Every transition runs with the endpoint's state lock held across the
//! engine call, so the connection task and the endpoint's event task never
//! interleave on one endpoint.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, error, info, warn};

use super::messages::ServerMessage;
use super::registry::{Endpoint, SessionSink};
use super::relay::Relay;
use super::types::{EndpointId, IceCandidate, NegotiationState, Role, SessionId, SignalingError};
use crate::engine::EngineEvent;

/// What the event task should do after one engine notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventOutcome {
    Continue,
    Connected,
    Closed,
}

impl Relay {
    /// Resolve an endpoint referenced by `session` on the wire.
    fn owned_endpoint(
        &self,
        session: &SessionId,
        id: &EndpointId,
    ) -> Result<Arc<Endpoint>, SignalingError> {
        let endpoint = self.endpoints.lookup(id)?;
        if endpoint.owner() != session {
            return Err(SignalingError::NotOwner {
                endpoint: id.clone(),
                session: session.clone(),
            });
        }
        Ok(endpoint)
    }

    /// Created -> OfferSent: generate the offer and hand it to the owner.
    pub(crate) async fn negotiate(
        &self,
        endpoint: &Arc<Endpoint>,
        sink: &SessionSink,
    ) -> Result<(), SignalingError> {
        let mut state = endpoint.state.lock().await;
        if *state != NegotiationState::Created {
            return Err(SignalingError::InvalidState {
                endpoint: endpoint.id().clone(),
                state: *state,
                trigger: "offer",
            });
        }

        let sdp_offer = match self.engine.generate_offer(endpoint.id()).await {
            Ok(sdp) => sdp,
            Err(e) => {
                drop(state);
                self.close_endpoint(endpoint).await;
                return Err(e.into());
            }
        };
        info!(
            endpoint = endpoint.name(),
            "SDP offer from engine to browser:\n{}", sdp_offer
        );

        sink.send(&ServerMessage::offer(
            endpoint.role(),
            endpoint.id().clone(),
            sdp_offer,
        ));
        *state = NegotiationState::OfferSent;
        Ok(())
    }

    /// WEBRTCPEER_READY: the browser side is ready, start ICE gathering.
    pub async fn peer_ready(
        &self,
        session: &SessionId,
        id: &EndpointId,
    ) -> Result<(), SignalingError> {
        let endpoint = self.owned_endpoint(session, id)?;
        let mut state = endpoint.state.lock().await;

        match *state {
            NegotiationState::OfferSent | NegotiationState::AnswerApplied
                if !endpoint.gathering.load(Ordering::SeqCst) =>
            {
                self.engine.gather_candidates(id).await?;
                endpoint.gathering.store(true, Ordering::SeqCst);
                if *state == NegotiationState::OfferSent {
                    *state = NegotiationState::Gathering;
                }
                info!(endpoint = endpoint.name(), "ICE gathering started");
                Ok(())
            }
            NegotiationState::OfferSent
            | NegotiationState::Gathering
            | NegotiationState::AnswerApplied
            | NegotiationState::Connected => {
                debug!(endpoint = endpoint.name(), "Skip, already gathering");
                Ok(())
            }
            s @ (NegotiationState::Created | NegotiationState::Closed) => {
                Err(SignalingError::InvalidState {
                    endpoint: id.clone(),
                    state: s,
                    trigger: "WEBRTCPEER_READY",
                })
            }
        }
    }

    /// PROCESS_SDP_ANSWER: apply the browser's answer to the endpoint.
    pub async fn apply_answer(
        &self,
        session: &SessionId,
        id: &EndpointId,
        sdp_answer: &str,
    ) -> Result<(), SignalingError> {
        let endpoint = self.owned_endpoint(session, id)?;
        let mut state = endpoint.state.lock().await;

        match *state {
            NegotiationState::OfferSent | NegotiationState::Gathering => {
                info!(
                    endpoint = endpoint.name(),
                    "SDP answer from browser to engine:\n{}", sdp_answer
                );
                self.engine.process_answer(id, sdp_answer).await?;
                *state = NegotiationState::AnswerApplied;
                Ok(())
            }
            NegotiationState::AnswerApplied | NegotiationState::Connected => {
                warn!(endpoint = endpoint.name(), "Skip, answer already applied");
                Ok(())
            }
            s => Err(SignalingError::InvalidState {
                endpoint: id.clone(),
                state: s,
                trigger: "PROCESS_SDP_ANSWER",
            }),
        }
    }

    /// PROCESS_SDP_REOFFER: the browser renegotiates its established talker.
    /// The engine's answer goes back as PROCESS_SDP_REANSWER; the negotiation
    /// state does not move.
    pub async fn apply_reoffer(
        &self,
        session: &SessionId,
        id: &EndpointId,
        sdp_offer: &str,
    ) -> Result<(), SignalingError> {
        let endpoint = self.owned_endpoint(session, id)?;
        if endpoint.role() != Role::Talker {
            return Err(SignalingError::NotTalker(id.clone()));
        }
        let owner = self.sessions.lookup(session)?;
        let state = endpoint.state.lock().await;

        match *state {
            NegotiationState::AnswerApplied | NegotiationState::Connected => {
                info!(
                    endpoint = endpoint.name(),
                    "SDP re-offer from browser to engine:\n{}", sdp_offer
                );
                let sdp_answer = self.engine.process_offer(id, sdp_offer).await?;
                owner.sink().send(&ServerMessage::ProcessSdpReanswer {
                    endpoint_id: id.clone(),
                    sdp_answer,
                });
                Ok(())
            }
            s => Err(SignalingError::InvalidState {
                endpoint: id.clone(),
                state: s,
                trigger: "PROCESS_SDP_REOFFER",
            }),
        }
    }

    /// ADD_ICE_CANDIDATE from the browser.
    pub async fn add_remote_candidate(
        &self,
        session: &SessionId,
        id: &EndpointId,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        let endpoint = self.owned_endpoint(session, id)?;
        let state = endpoint.state.lock().await;

        if matches!(*state, NegotiationState::Created | NegotiationState::Closed) {
            return Err(SignalingError::InvalidState {
                endpoint: id.clone(),
                state: *state,
                trigger: "ADD_ICE_CANDIDATE",
            });
        }
        debug!(endpoint = endpoint.name(), candidate = %candidate.candidate, "remote candidate");
        self.engine.add_ice_candidate(id, candidate).await?;
        Ok(())
    }

    /// Engine notification for `endpoint`, delivered in order by its event task.
    pub(crate) async fn on_engine_event(
        &self,
        endpoint: &Arc<Endpoint>,
        event: EngineEvent,
    ) -> EventOutcome {
        match event {
            EngineEvent::IceCandidateFound(candidate) => {
                let state = *endpoint.state.lock().await;
                if state < NegotiationState::Gathering || state.is_closed() {
                    debug!(endpoint = endpoint.name(), %state, "Skip, local candidate out of order");
                    return EventOutcome::Continue;
                }
                debug!(endpoint = endpoint.name(), candidate = %candidate.candidate, "local candidate");
                if let Ok(owner) = self.sessions.lookup(endpoint.owner()) {
                    owner.sink().send(&ServerMessage::AddIceCandidate {
                        endpoint_id: endpoint.id().clone(),
                        candidate,
                    });
                }
                EventOutcome::Continue
            }
            EngineEvent::IceGatheringDone => {
                info!(endpoint = endpoint.name(), "ICE gathering done");
                EventOutcome::Continue
            }
            EngineEvent::Connected => {
                let mut state = endpoint.state.lock().await;
                if *state == NegotiationState::AnswerApplied {
                    *state = NegotiationState::Connected;
                    info!(endpoint = endpoint.name(), "Connected");
                    EventOutcome::Connected
                } else {
                    let current = *state;
                    debug!(endpoint = endpoint.name(), state = %current, "Skip, unexpected connected event");
                    EventOutcome::Continue
                }
            }
            EngineEvent::MediaFlowChanged(flow) => {
                info!(endpoint = endpoint.name(), ?flow, "media flow state changed");
                EventOutcome::Continue
            }
            EngineEvent::Error { code, description } => {
                error!(endpoint = endpoint.name(), code, "engine error: {}", description);
                if let Ok(owner) = self.sessions.lookup(endpoint.owner()) {
                    owner
                        .sink()
                        .send(&ServerMessage::error(format!("[Engine] {}", description)));
                }
                self.leave(endpoint.owner()).await;
                self.close_endpoint(endpoint).await;
                EventOutcome::Closed
            }
        }
    }

    /// Deadline for `Created -> Connected` expired. Returns false when the
    /// endpoint got there (or closed) in the meantime.
    pub(crate) async fn negotiation_timed_out(&self, endpoint: &Arc<Endpoint>) -> bool {
        {
            let mut state = endpoint.state.lock().await;
            if *state == NegotiationState::Connected || state.is_closed() {
                return false;
            }
            let stalled = *state;
            warn!(
                endpoint = endpoint.name(),
                state = %stalled,
                timeout = ?self.config.negotiation_timeout,
                "negotiation timed out"
            );
            // decided under the lock: a late Connected event finds it closed
            *state = NegotiationState::Closed;
        }

        if let Ok(owner) = self.sessions.lookup(endpoint.owner()) {
            owner.sink().send(&ServerMessage::error(format!(
                "Negotiation timed out for endpoint {}",
                endpoint.id()
            )));
        }

        // A participant without a talker cannot be heard; drop the whole session.
        if endpoint.role() == Role::Talker {
            self.leave(endpoint.owner()).await;
        }
        self.release_endpoint(endpoint).await;
        true
    }

    /// Move the endpoint to `Closed`, unregister it and release it in the
    /// engine. Idempotent.
    pub(crate) async fn close_endpoint(&self, endpoint: &Arc<Endpoint>) {
        {
            let mut state = endpoint.state.lock().await;
            if state.is_closed() {
                return;
            }
            *state = NegotiationState::Closed;
        }
        self.release_endpoint(endpoint).await;
    }

    /// Unregister and release an endpoint already marked `Closed`.
    async fn release_endpoint(&self, endpoint: &Arc<Endpoint>) {
        endpoint.shutdown.notify_one();

        self.endpoints.remove(endpoint.id());
        if endpoint.role() == Role::Listener {
            if let Ok(owner) = self.sessions.lookup(endpoint.owner()) {
                owner.remove_listener(endpoint.id());
            }
        }
        if let Err(e) = self.engine.release(endpoint.id()).await {
            warn!(endpoint = endpoint.name(), "release failed: {}", e);
        }
        debug!(endpoint = endpoint.name(), "Closed");
    }
}
