//! Media engine interface consumed by the signaling core
//!
//! The core never touches media. It drives an engine through the
//! [`MediaEngine`] trait and listens to one ordered notification channel per
//! endpoint.

mod loopback;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::signaling::{EndpointId, IceCandidate};

pub use loopback::LoopbackEngine;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no such endpoint: {0}")]
    NoSuchEndpoint(EndpointId),

    #[error("no such pipeline: {0}")]
    NoSuchPipeline(PipelineId),

    #[error("invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("{0}")]
    Failed(String),
}

/// Handle to the engine-side pipeline holding every endpoint of the room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineId(String);

impl PipelineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-way media direction, fixed when the endpoint is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    RecvOnly,
    SendOnly,
}

impl Direction {
    pub fn sdp_attribute(self) -> &'static str {
        match self {
            Direction::RecvOnly => "recvonly",
            Direction::SendOnly => "sendonly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Flowing,
    NotFlowing,
}

/// Asynchronous notifications the engine raises for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    IceCandidateFound(IceCandidate),
    IceGatheringDone,
    /// ICE and DTLS completed; media can flow.
    Connected,
    MediaFlowChanged(FlowState),
    Error { code: i32, description: String },
}

pub type EngineEvents = async_channel::Receiver<EngineEvent>;

/// Transactional interface to the media engine.
///
/// Every call completes before it returns. Their consequences (candidates,
/// connectivity, errors) arrive later on the endpoint's [`EngineEvents`].
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn create_pipeline(&self) -> Result<PipelineId, EngineError>;

    async fn create_endpoint(
        &self,
        pipeline: &PipelineId,
        direction: Direction,
    ) -> Result<(EndpointId, EngineEvents), EngineError>;

    async fn generate_offer(&self, endpoint: &EndpointId) -> Result<String, EngineError>;

    async fn process_answer(&self, endpoint: &EndpointId, sdp: &str) -> Result<(), EngineError>;

    /// Renegotiate an established endpoint from a peer-side offer. Returns
    /// the engine's answer.
    async fn process_offer(&self, endpoint: &EndpointId, sdp: &str) -> Result<String, EngineError>;

    async fn gather_candidates(&self, endpoint: &EndpointId) -> Result<(), EngineError>;

    async fn add_ice_candidate(
        &self,
        endpoint: &EndpointId,
        candidate: &IceCandidate,
    ) -> Result<(), EngineError>;

    /// Route media from `src` into `dst`.
    async fn connect(&self, src: &EndpointId, dst: &EndpointId) -> Result<(), EngineError>;

    /// Destroy the endpoint. Its notification channel closes.
    async fn release(&self, endpoint: &EndpointId) -> Result<(), EngineError>;
}
