use crate::{
    config::{Config, EncoderConfig, ModelConfig},
    detector::DetectorService,
    pipeline::annotate::Annotator,
    routes::api_routes,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct SharedState {
    pub detector: Arc<dyn DetectorService>,
    pub annotator: Arc<Annotator>,
    pub model_config: ModelConfig,
    pub encoder_config: EncoderConfig,
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(
        detector: Arc<dyn DetectorService>,
        annotator: Arc<Annotator>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let state = SharedState {
            detector,
            annotator,
            model_config: config.model.clone(),
            encoder_config: config.encoder.clone(),
        };

        let router = build_router(state);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", &self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
