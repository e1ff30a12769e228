use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use super::negotiation::EventOutcome;
use super::registry::Endpoint;
use super::relay::Relay;
use crate::engine::EngineEvents;

/// Event task of one endpoint.
///
/// Consumes the endpoint's engine notifications in order and enforces the
/// negotiation deadline until the endpoint reports `Connected`. Ends when the
/// endpoint is closed or the engine drops the channel.
pub(crate) async fn endpoint_actor(relay: Arc<Relay>, endpoint: Arc<Endpoint>, events: EngineEvents) {
    let deadline = Instant::now() + relay.config().negotiation_timeout;
    let mut armed = true;

    loop {
        let negotiation_deadline = armed.then_some(deadline);
        let timeout = async move {
            match negotiation_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = endpoint.shutdown.notified() => break,

            _ = timeout => {
                if relay.negotiation_timed_out(&endpoint).await {
                    break;
                }
                armed = false;
            }

            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    // released by the engine
                    Err(_) => break,
                };
                match relay.on_engine_event(&endpoint, event).await {
                    EventOutcome::Continue => {}
                    EventOutcome::Connected => armed = false,
                    EventOutcome::Closed => break,
                }
            }
        }
    }

    debug!(endpoint = endpoint.name(), "event task finished");
}
