use crate::{
    config::Config,
    handler::{Handler, PipelineOptions},
    image_fetcher::HttpImageFetcher,
    ort_service::{init_runtime, load_models},
    routes::api_routes,
    state::LabelTable,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};

#[derive(Clone)]
pub struct SharedState {
    pub handler: Handler,
    pub metrics: Arc<Metrics>,
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, addr: &str) -> anyhow::Result<Self> {
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = Router::new()
            .merge(api_routes())
            .with_state(state)
            .layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Classifier listening on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            })
            .await?;

        Ok(())
    }
}

/// Builds the process-wide state once and serves until shutdown.
///
/// Model and label loading failures abort startup.
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    init_runtime()?;

    let model_config = config.model.clone();
    let models = tokio::task::spawn_blocking(move || {
        load_models(&model_config.models_dir, model_config.num_instances)
    })
    .await??;

    let client = reqwest::Client::builder()
        .timeout(config.model.fetch_timeout())
        .build()?;
    let labels =
        LabelTable::load(&config.classifier.image_classifier_classes, &client).await?;

    let handler = Handler::new(
        Arc::new(HttpImageFetcher::new(client, config.model.max_image_bytes)),
        Arc::new(models),
        Arc::new(labels),
        PipelineOptions::from_config(&config),
    );
    let state = SharedState {
        handler,
        metrics: Arc::new(Metrics::new()?),
    };

    let server = HttpServer::new(state, &config.server.get_address()).await?;
    server.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
