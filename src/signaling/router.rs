use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::registry::SessionSink;
use super::relay::Relay;
use super::types::{SessionId, SignalingError};

/// Inbound side of one connection: parses envelopes and dispatches them to
/// the relay.
pub struct Connection {
    relay: Arc<Relay>,
    sink: SessionSink,
}

impl Connection {
    pub fn new(relay: Arc<Relay>, sink: SessionSink) -> Self {
        Self { relay, sink }
    }

    pub fn session_id(&self) -> &SessionId {
        self.sink.session_id()
    }

    /// Handle one text frame. Never fails: faults are logged and, unless
    /// they are protocol errors, reported back as an `ERROR` envelope.
    pub async fn handle_text(&self, text: &str) {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(session = %self.session_id(), "Skip, invalid message: {}", e);
                return;
            }
        };
        info!(session = %self.session_id(), kind = msg.kind(), "message");

        match AssertUnwindSafe(self.dispatch(msg)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_protocol() => {
                warn!(session = %self.session_id(), "Skip, {}", e);
            }
            Ok(Err(e)) => {
                error!(session = %self.session_id(), "Exception: {}", e);
                self.sink
                    .send(&ServerMessage::error(format!("[Relay] Exception: {}", e)));
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(session = %self.session_id(), "Panic: {}", reason);
                self.sink
                    .send(&ServerMessage::error(format!("[Relay] Exception: {}", reason)));
            }
        }
    }

    async fn dispatch(&self, msg: ClientMessage) -> Result<(), SignalingError> {
        let session = self.session_id();
        match msg {
            ClientMessage::Start => self.relay.join(self.sink.clone()).await,

            ClientMessage::WebRtcPeerReady { endpoint_id } => {
                self.relay.peer_ready(session, &endpoint_id).await
            }

            ClientMessage::ProcessSdpAnswer {
                endpoint_id,
                sdp_answer,
            } => {
                self.relay
                    .apply_answer(session, &endpoint_id, &sdp_answer)
                    .await
            }

            ClientMessage::ProcessSdpReoffer {
                endpoint_id,
                sdp_offer,
            } => {
                self.relay
                    .apply_reoffer(session, &endpoint_id, &sdp_offer)
                    .await
            }

            ClientMessage::AddIceCandidate {
                endpoint_id,
                candidate,
            } => {
                self.relay
                    .add_remote_candidate(session, &endpoint_id, &candidate)
                    .await
            }

            ClientMessage::Stop => {
                self.relay.leave(session).await;
                Ok(())
            }

            ClientMessage::Error { message } => {
                error!(session = %session, "Browser error: {}", message);
                info!(session = %session, "Assume that the other side stops after an error");
                self.relay.leave(session).await;
                Ok(())
            }
        }
    }

    /// Connection gone: tear the session down without notifying it.
    pub async fn close(&self) {
        self.relay.leave(self.session_id()).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::LoopbackEngine;
    use crate::signaling::relay::RelayConfig;
    use crate::signaling::types::OutboundMessage;

    fn connection(
        relay: &Arc<Relay>,
        id: &str,
    ) -> (Connection, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = SessionSink::new(SessionId::from(id), tx);
        (Connection::new(Arc::clone(relay), sink), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(serde_json::from_str(msg.as_str()).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn malformed_and_unknown_messages_are_ignored() {
        let relay = Relay::new(Arc::new(LoopbackEngine::new()), RelayConfig::default());
        let (conn, mut rx) = connection(&relay, "a");

        conn.handle_text("not json").await;
        conn.handle_text(r#"{"id": "MUTE"}"#).await;
        conn.handle_text(r#"{"webRtcEpId": "x"}"#).await;

        assert!(drain(&mut rx).is_empty());
        assert!(relay.sessions().is_empty());
    }

    #[tokio::test]
    async fn unknown_endpoint_is_a_silent_no_op() {
        let relay = Relay::new(Arc::new(LoopbackEngine::new()), RelayConfig::default());
        let (conn, mut rx) = connection(&relay, "a");
        conn.handle_text(r#"{"id": "START"}"#).await;
        drain(&mut rx);

        conn.handle_text(r#"{"id": "WEBRTCPEER_READY", "webRtcEpId": "nope"}"#)
            .await;
        conn.handle_text(r#"{"id": "PROCESS_SDP_ANSWER", "webRtcEpId": "nope", "sdpAnswer": "v=0"}"#)
            .await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(relay.endpoints().len(), 1);
    }

    #[tokio::test]
    async fn engine_failure_is_reported_and_connection_survives() {
        let engine = Arc::new(LoopbackEngine::new());
        let relay = Relay::new(engine.clone(), RelayConfig::default());
        let (conn, mut rx) = connection(&relay, "a");

        engine.set_fail_offers(true);
        conn.handle_text(r#"{"id": "START"}"#).await;

        let out = drain(&mut rx);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["id"], "ERROR");
        assert!(out[0]["message"].as_str().unwrap().starts_with("[Relay] Exception"));

        // later messages are still processed
        conn.handle_text(r#"{"id": "STOP"}"#).await;
        assert!(relay.sessions().is_empty());
    }

    #[tokio::test]
    async fn browser_error_tears_the_session_down() {
        let relay = Relay::new(Arc::new(LoopbackEngine::new()), RelayConfig::default());
        let (conn, mut rx) = connection(&relay, "a");
        conn.handle_text(r#"{"id": "START"}"#).await;
        drain(&mut rx);

        conn.handle_text(r#"{"id": "ERROR", "message": "getUserMedia failed"}"#)
            .await;

        assert!(relay.sessions().is_empty());
        assert!(relay.endpoints().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn Any + Send> = Box::new("static reason");
        assert_eq!(panic_message(boxed.as_ref()), "static reason");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned reason"));
        assert_eq!(panic_message(boxed.as_ref()), "owned reason");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
