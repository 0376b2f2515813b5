//! Fluent builder for [`TunnelWorker`] construction.

use std::sync::Arc;

use tracing::info;

use siphon_core::checkpoint::CheckpointStore;
use siphon_core::processor::ProcessorFactory;
use siphon_core::source::RecordSource;
use siphon_core::TunnelStateMachine;

use crate::config::WorkerConfig;
use crate::error::ClientError;
use crate::service::TunnelService;
use crate::worker::TunnelWorker;

/// Fluent builder wiring a [`TunnelWorker`] to its collaborators.
///
/// # Example
///
/// ```rust,ignore
/// let worker = TunnelWorkerBuilder::new("orders-tunnel")
///     .client_name("ingest-7")
///     .service(service)
///     .record_source(source)
///     .checkpoint_store(store)
///     .processor_factory(factory)
///     .build()
///     .await?;
/// tokio::spawn(worker.run());
/// ```
pub struct TunnelWorkerBuilder {
    tunnel_id: String,
    client_name: String,
    config: WorkerConfig,
    service: Option<Arc<dyn TunnelService>>,
    source: Option<Arc<dyn RecordSource>>,
    store: Option<Arc<dyn CheckpointStore>>,
    factory: Option<Arc<dyn ProcessorFactory>>,
}

impl TunnelWorkerBuilder {
    /// Creates a builder for a worker consuming `tunnel_id`.
    #[must_use]
    pub fn new(tunnel_id: impl Into<String>) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            client_name: "siphon-client".to_string(),
            config: WorkerConfig::default(),
            service: None,
            source: None,
            store: None,
            factory: None,
        }
    }

    /// Sets the client name registered with the service.
    #[must_use]
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Sets worker and engine configuration.
    #[must_use]
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the tunnel service RPC contract.
    #[must_use]
    pub fn service(mut self, service: Arc<dyn TunnelService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Sets the record source.
    #[must_use]
    pub fn record_source(mut self, source: Arc<dyn RecordSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the durable checkpoint store.
    #[must_use]
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the processing-callback factory.
    #[must_use]
    pub fn processor_factory(mut self, factory: Arc<dyn ProcessorFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Connects to the service and builds the worker.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when a collaborator is missing and
    /// [`ClientError::Connect`] when registration with the service fails.
    pub async fn build(self) -> Result<TunnelWorker, ClientError> {
        let service = self
            .service
            .ok_or_else(|| ClientError::Config("tunnel service not set".to_string()))?;
        let source = self
            .source
            .ok_or_else(|| ClientError::Config("record source not set".to_string()))?;
        let store = self
            .store
            .ok_or_else(|| ClientError::Config("checkpoint store not set".to_string()))?;
        let factory = self
            .factory
            .ok_or_else(|| ClientError::Config("processor factory not set".to_string()))?;

        let client_id = service
            .connect_tunnel(&self.tunnel_id, &self.client_name)
            .await
            .map_err(ClientError::Connect)?;

        info!(
            tunnel = %self.tunnel_id,
            client = %client_id,
            name = %self.client_name,
            "tunnel client connected"
        );

        let fleet = Arc::new(TunnelStateMachine::new(
            self.tunnel_id,
            client_id,
            source,
            store,
            factory,
            self.config.tunnel.clone(),
        ));

        Ok(TunnelWorker::new(service, fleet, self.config))
    }
}

impl std::fmt::Debug for TunnelWorkerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelWorkerBuilder")
            .field("tunnel_id", &self.tunnel_id)
            .field("client_name", &self.client_name)
            .field("service", &self.service.is_some())
            .field("record_source", &self.source.is_some())
            .field("checkpoint_store", &self.store.is_some())
            .field("processor_factory", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}
