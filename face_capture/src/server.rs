use crate::{config::MetricsServerConfig, routes::api_routes, telemetry::Metrics};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub metrics: Arc<Metrics>,
}

/// Serves `/health` and `/metrics` next to the recognition loop.
pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(metrics: Arc<Metrics>, config: &MetricsServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();

        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState { metrics };

        let router = Router::new()
            .merge(api_routes())
            .with_state(app_state)
            .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting metrics server on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            tracing::info!("Metrics server stopped");
            Ok(())
        });

        Ok(server_handle)
    }
}
