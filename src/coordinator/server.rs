//! Naming service server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::node_client::HttpNodeClient;
use crate::coordinator::service::NamingService;
use std::sync::Arc;

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Build the service and router without binding a socket
    pub fn build(&self) -> Result<(Arc<NamingService>, axum::Router)> {
        self.config.validate()?;

        let store = Arc::new(MetadataStore::open(&self.config.db_path)?);
        let client = HttpNodeClient::new(
            self.config.transfer_timeout(),
            self.config.proxy_timeout(),
            self.config.delete_timeout(),
        );

        let service = Arc::new(NamingService::new(
            store,
            Arc::new(client.clone()),
            &self.config,
        ));
        service.provision(&self.config.nodes)?;

        let router = create_router(CoordState {
            service: service.clone(),
            client,
        });
        Ok((service, router))
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting naming service");
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  DB path: {}", self.config.db_path.display());
        tracing::info!("  Nodes: {}", self.config.nodes.len());
        tracing::info!("  Monitor interval: {}s", self.config.monitor_interval_secs);

        let (service, router) = self.build()?;
        let monitor = service.monitor().start();

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!("✓ Naming service ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        monitor.abort();
        service.flush()?;
        tracing::info!("Naming service stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
