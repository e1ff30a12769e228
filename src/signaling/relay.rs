use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use super::registry::{EndpointRegistry, SessionRegistry};
use super::types::{EndpointId, SessionId, SignalingError};
use crate::engine::{MediaEngine, PipelineId};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upper bound for an endpoint to go from `Created` to `Connected`.
    pub negotiation_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}

/// One media link of the room: `talker` feeds `listener`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub talker: EndpointId,
    pub talker_owner: SessionId,
    pub listener: EndpointId,
    pub listener_owner: SessionId,
}

/// The room: one shared pipeline plus the registries of every session and
/// endpoint living in it.
///
/// Connection tasks share it behind an `Arc`. Joins and leaves are serialized
/// by the topology lock; everything else runs concurrently.
pub struct Relay {
    pub(crate) engine: Arc<dyn MediaEngine>,
    pub(crate) config: RelayConfig,
    pipeline: OnceCell<PipelineId>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) endpoints: EndpointRegistry,
    pub(crate) topology: Mutex<()>,
}

impl Relay {
    pub fn new(engine: Arc<dyn MediaEngine>, config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            engine,
            config,
            pipeline: OnceCell::new(),
            sessions: SessionRegistry::new(),
            endpoints: EndpointRegistry::new(),
            topology: Mutex::new(()),
        })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn endpoints(&self) -> &EndpointRegistry {
        &self.endpoints
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Pipeline handle, created on first use. Concurrent first callers race
    /// on the cell and exactly one creation reaches the engine.
    pub(crate) async fn pipeline(&self) -> Result<PipelineId, SignalingError> {
        let pipeline = self
            .pipeline
            .get_or_try_init(|| async {
                info!("Create media pipeline");
                self.engine.create_pipeline().await
            })
            .await?;
        Ok(pipeline.clone())
    }

    /// Current media links, one per listener endpoint.
    pub fn topology(&self) -> Vec<Link> {
        self.endpoints
            .snapshot()
            .into_iter()
            .filter_map(|listener| {
                let talker = self.endpoints.lookup(listener.source()?).ok()?;
                Some(Link {
                    talker: talker.id().clone(),
                    talker_owner: talker.owner().clone(),
                    listener: listener.id().clone(),
                    listener_owner: listener.owner().clone(),
                })
            })
            .collect()
    }
}
