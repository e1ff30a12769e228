//! WebSocket signaling for the audio relay

mod actor;
mod fanout;
mod messages;
mod negotiation;
mod registry;
mod relay;
mod router;
mod server;
mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use registry::{Endpoint, EndpointRegistry, SessionRegistry, SessionSink, UserSession};
pub use relay::{DEFAULT_NEGOTIATION_TIMEOUT, Link, Relay, RelayConfig};
pub use router::Connection;
pub use server::{DEFAULT_SIGNALING_PORT, Keepalive, SignalingServer};
pub use types::{
    EndpointId, IceCandidate, NegotiationState, OutboundMessage, Role, SessionId, SignalingError,
};
