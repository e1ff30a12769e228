use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use super::{Direction, EngineError, EngineEvent, EngineEvents, MediaEngine, PipelineId};
use crate::signaling::{EndpointId, IceCandidate};

const LOOPBACK_ADDR: &str = "127.0.0.1";
const LOOPBACK_BASE_PORT: u16 = 40000;

struct LoopbackEndpoint {
    pipeline: PipelineId,
    direction: Direction,
    port: u16,
    events: async_channel::Sender<EngineEvent>,
    offered: bool,
    answered: bool,
    gathering: bool,
    connected: bool,
    version: u32,
    remote_candidates: Vec<IceCandidate>,
}

impl LoopbackEndpoint {
    fn emit(&self, event: EngineEvent) {
        // unbounded: only fails once the subscriber is gone
        if self.events.try_send(event).is_err() {
            trace!("event dropped, no subscriber");
        }
    }

    fn local_sdp(&self) -> String {
        format!(
            "v=0\r\n\
             o=- {port} {version} IN IP4 {addr}\r\n\
             s={pipeline}\r\n\
             t=0 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=mid:0\r\n\
             a=rtpmap:111 opus/48000/2\r\n\
             a={direction}\r\n",
            port = self.port,
            version = self.version,
            addr = LOOPBACK_ADDR,
            pipeline = self.pipeline,
            direction = self.direction.sdp_attribute(),
        )
    }

    /// Connectivity is reached once both sides have exchanged what they need.
    fn maybe_connect(&mut self) {
        if self.answered && self.gathering && !self.connected {
            self.connected = true;
            self.emit(EngineEvent::Connected);
        }
    }
}

/// In-process media engine with no media plane.
///
/// Produces synthetic offers and a single host candidate per endpoint and
/// reports `Connected` as soon as an answer has been applied and gathering
/// has started. Used by the bundled binary and by tests.
#[derive(Default)]
pub struct LoopbackEngine {
    endpoints: DashMap<EndpointId, LoopbackEndpoint>,
    connections: Mutex<Vec<(EndpointId, EndpointId)>>,
    pipelines: AtomicUsize,
    next_port: AtomicUsize,
    fail_offers: AtomicBool,
    fail_connects: AtomicBool,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.load(Ordering::SeqCst)
    }

    /// Endpoints alive in the engine (created and not released).
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn direction(&self, endpoint: &EndpointId) -> Option<Direction> {
        self.endpoints.get(endpoint).map(|ep| ep.direction)
    }

    /// Media links as `(source, sink)` pairs, in creation order.
    pub fn connections(&self) -> Vec<(EndpointId, EndpointId)> {
        self.connections.lock().clone()
    }

    pub fn remote_candidates(&self, endpoint: &EndpointId) -> Vec<IceCandidate> {
        self.endpoints
            .get(endpoint)
            .map(|ep| ep.remote_candidates.clone())
            .unwrap_or_default()
    }

    pub fn is_answered(&self, endpoint: &EndpointId) -> bool {
        self.endpoints.get(endpoint).is_some_and(|ep| ep.answered)
    }

    pub fn is_gathering(&self, endpoint: &EndpointId) -> bool {
        self.endpoints.get(endpoint).is_some_and(|ep| ep.gathering)
    }

    /// Make every following `generate_offer` fail.
    pub fn set_fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    /// Raise a fatal error notification on an endpoint.
    pub fn inject_error(&self, endpoint: &EndpointId, description: &str) -> bool {
        match self.endpoints.get(endpoint) {
            Some(ep) => {
                ep.emit(EngineEvent::Error {
                    code: 1,
                    description: description.to_string(),
                });
                true
            }
            None => false,
        }
    }

    fn generate_id() -> EndpointId {
        let value: u64 = rand::rng().random();
        EndpointId::new(format!("ep-{:016x}", value))
    }

    fn host_candidate(port: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:1 1 UDP 2122260223 {} {} typ host",
                LOOPBACK_ADDR, port
            ),
            sdp_mid: "0".to_string(),
            sdp_m_line_index: 0,
        }
    }
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    async fn create_pipeline(&self) -> Result<PipelineId, EngineError> {
        let n = self.pipelines.fetch_add(1, Ordering::SeqCst);
        let pipeline = PipelineId::new(format!("pipeline-{}", n));
        debug!(pipeline = %pipeline, "loopback pipeline created");
        Ok(pipeline)
    }

    async fn create_endpoint(
        &self,
        pipeline: &PipelineId,
        direction: Direction,
    ) -> Result<(EndpointId, EngineEvents), EngineError> {
        let (tx, rx) = async_channel::unbounded();
        let id = Self::generate_id();
        let offset = self.next_port.fetch_add(1, Ordering::SeqCst) % 20000;
        let port = LOOPBACK_BASE_PORT + offset as u16;

        self.endpoints.insert(
            id.clone(),
            LoopbackEndpoint {
                pipeline: pipeline.clone(),
                direction,
                port,
                events: tx,
                offered: false,
                answered: false,
                gathering: false,
                connected: false,
                version: 0,
                remote_candidates: Vec::new(),
            },
        );
        Ok((id, rx))
    }

    async fn generate_offer(&self, endpoint: &EndpointId) -> Result<String, EngineError> {
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("offer generation disabled".to_string()));
        }
        let mut ep = self
            .endpoints
            .get_mut(endpoint)
            .ok_or_else(|| EngineError::NoSuchEndpoint(endpoint.clone()))?;
        ep.offered = true;
        Ok(ep.local_sdp())
    }

    async fn process_answer(&self, endpoint: &EndpointId, sdp: &str) -> Result<(), EngineError> {
        let mut ep = self
            .endpoints
            .get_mut(endpoint)
            .ok_or_else(|| EngineError::NoSuchEndpoint(endpoint.clone()))?;
        if !ep.offered {
            return Err(EngineError::InvalidSdp("answer without offer".to_string()));
        }
        if !sdp.starts_with("v=0") {
            return Err(EngineError::InvalidSdp("missing version line".to_string()));
        }
        ep.answered = true;
        ep.maybe_connect();
        Ok(())
    }

    async fn process_offer(&self, endpoint: &EndpointId, sdp: &str) -> Result<String, EngineError> {
        let mut ep = self
            .endpoints
            .get_mut(endpoint)
            .ok_or_else(|| EngineError::NoSuchEndpoint(endpoint.clone()))?;
        if !ep.answered {
            return Err(EngineError::InvalidSdp(
                "re-offer before first negotiation".to_string(),
            ));
        }
        if !sdp.starts_with("v=0") {
            return Err(EngineError::InvalidSdp("missing version line".to_string()));
        }
        ep.version += 1;
        Ok(ep.local_sdp())
    }

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), EngineError> {
        let mut ep = self
            .endpoints
            .get_mut(endpoint)
            .ok_or_else(|| EngineError::NoSuchEndpoint(endpoint.clone()))?;
        if ep.gathering {
            return Ok(());
        }
        ep.gathering = true;
        ep.emit(EngineEvent::IceCandidateFound(Self::host_candidate(ep.port)));
        ep.emit(EngineEvent::IceGatheringDone);
        ep.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: &IceCandidate,
    ) -> Result<(), EngineError> {
        let mut ep = self
            .endpoints
            .get_mut(endpoint)
            .ok_or_else(|| EngineError::NoSuchEndpoint(endpoint.clone()))?;
        ep.remote_candidates.push(candidate.clone());
        Ok(())
    }

    async fn connect(&self, src: &EndpointId, dst: &EndpointId) -> Result<(), EngineError> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("connect disabled".to_string()));
        }
        for id in [src, dst] {
            if !self.endpoints.contains_key(id) {
                return Err(EngineError::NoSuchEndpoint(id.clone()));
            }
        }
        self.connections.lock().push((src.clone(), dst.clone()));
        Ok(())
    }

    async fn release(&self, endpoint: &EndpointId) -> Result<(), EngineError> {
        match self.endpoints.remove(endpoint) {
            Some((id, ep)) => {
                ep.events.close();
                self.connections
                    .lock()
                    .retain(|(src, dst)| src != &id && dst != &id);
                Ok(())
            }
            None => Err(EngineError::NoSuchEndpoint(endpoint.clone())),
        }
    }
}
