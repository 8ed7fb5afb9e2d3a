use crate::cli::ServeArgs;
use crate::infra::{seed_store, AppState, TracingNotifier};
use crate::routes::with_pipeline_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use dealflow::config::AppConfig;
use dealflow::error::AppError;
use dealflow::telemetry;
use dealflow::workflows::acquisitions::{DealPipelineService, InMemoryPipelineStore};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryPipelineStore::new());
    if !args.no_seed {
        seed_store(&store)?;
        info!("sample buy boxes, buyers and leads loaded");
    }
    let notifier = Arc::new(TracingNotifier);
    let pipeline_service = Arc::new(DealPipelineService::new(
        store,
        notifier,
        config.pipeline.clone(),
    ));

    let app = with_pipeline_routes(pipeline_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "deal pipeline ready");

    axum::serve(listener, app).await?;
    Ok(())
}
