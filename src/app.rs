use crate::config::Config;
use crate::detector::{labels::load_class_labels, ort::OrtDetector, DetectorService};
use crate::pipeline::annotate::Annotator;
use crate::server::HttpServer;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let class_labels = load_class_labels(&config.labels.get_path())?;
    tracing::info!("Loaded {} class labels", class_labels.len());

    let detector: Arc<dyn DetectorService> = match OrtDetector::new(&config.model, class_labels) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to initialize detector: {:?}", e);
            return Err(e);
        }
    };

    let annotator = Arc::new(Annotator::new());

    let server = HttpServer::new(detector, annotator, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
