use crate::bootstrap::CollectionBootstrapper;
use crate::camera::Camera;
use crate::config::Config;
use crate::cv_utils::JpegCodec;
use crate::display::Window;
use crate::recognition::GrpcRecognitionClient;
use crate::recognition_loop::{LoopSummary, RecognitionLoop};
use crate::server::HttpServer;
use crate::telemetry::Metrics;

use std::{error::Error, sync::Arc};
use tokio::sync::broadcast;

pub async fn start_app(config: Config) -> Result<LoopSummary, Box<dyn Error>> {
    let metrics = Arc::new(Metrics::new()?);

    let client = match GrpcRecognitionClient::connect(
        &config.recognition_service,
        &config.region,
        &config.credentials,
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to initialize face matching client: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let collection =
        CollectionBootstrapper::new(&client, &config.collection, &config.identity)
            .run()
            .await?;

    tracing::info!("Starting webcam capture for face recognition...");
    let camera = match Camera::open(config.camera.device_index) {
        Ok(cam) => cam,
        Err(e) => {
            tracing::error!("Failed to initialize camera: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let window = match Window::open(&config.camera.window_title, config.camera.quit_key) {
        Ok(window) => window,
        Err(e) => {
            tracing::error!("Failed to open display window: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_handle = if config.metrics_server.enabled {
        let server = HttpServer::new(metrics.clone(), &config.metrics_server).await?;
        Some(server.run(shutdown_tx.subscribe()).await?)
    } else {
        None
    };

    let outcome = RecognitionLoop::new(
        camera,
        JpegCodec,
        &client,
        window,
        &collection,
        &config.recognition,
    )
    .with_metrics(&metrics)
    .run()
    .await;

    let _ = shutdown_tx.send(());
    if let Some(handle) = server_handle {
        match handle.await {
            Ok(Err(e)) => tracing::error!("Metrics server failed: {:?}", e),
            Err(e) => tracing::error!("Metrics server task panicked: {:?}", e),
            Ok(Ok(())) => {}
        }
    }

    Ok(outcome?)
}
