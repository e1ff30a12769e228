#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chorus::engine::LoopbackEngine;
use chorus::signaling::{
    Connection, EndpointId, NegotiationState, OutboundMessage, Relay, RelayConfig, SessionId,
    SessionSink,
};
use serde_json::Value;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Peer {
    pub conn: Connection,
    pub rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Peer {
    pub fn new(relay: &Arc<Relay>, id: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = SessionSink::new(SessionId::from(id), tx);
        Self {
            conn: Connection::new(Arc::clone(relay), sink),
            rx,
        }
    }

    pub async fn send(&self, msg: Value) {
        self.conn.handle_text(&msg.to_string()).await;
    }

    /// Everything already queued for this peer.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(serde_json::from_str(msg.as_str()).unwrap());
        }
        out
    }

    pub async fn next(&mut self) -> Value {
        let msg = tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("sink closed");
        serde_json::from_str(msg.as_str()).unwrap()
    }

    /// Wait for the next message with the given `id`, skipping others.
    pub async fn next_of(&mut self, kind: &str) -> Value {
        loop {
            let msg = self.next().await;
            if msg["id"] == kind {
                return msg;
            }
        }
    }

    /// READY + ANSWER for one endpoint.
    pub async fn complete(&self, endpoint: &str) {
        self.send(serde_json::json!({"id": "WEBRTCPEER_READY", "webRtcEpId": endpoint}))
            .await;
        self.send(serde_json::json!({
            "id": "PROCESS_SDP_ANSWER",
            "webRtcEpId": endpoint,
            "sdpAnswer": "v=0\r\no=- 1 0 IN IP4 127.0.0.1\r\ns=-\r\n",
        }))
        .await;
    }
}

pub fn relay_with(config: RelayConfig) -> (Arc<LoopbackEngine>, Arc<Relay>) {
    let engine = Arc::new(LoopbackEngine::new());
    let relay = Relay::new(engine.clone(), config);
    (engine, relay)
}

pub fn relay() -> (Arc<LoopbackEngine>, Arc<Relay>) {
    relay_with(RelayConfig::default())
}

pub fn endpoint_id(msg: &Value) -> String {
    msg["webRtcEpId"].as_str().unwrap().to_string()
}

pub async fn wait_for_state(relay: &Relay, endpoint: &str, want: NegotiationState) {
    let id = EndpointId::from(endpoint);
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(ep) = relay.endpoints().lookup(&id) {
                if ep.state().await == want {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("endpoint never reached the expected state");
}

pub async fn wait_until<F: Fn() -> bool>(cond: F) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
