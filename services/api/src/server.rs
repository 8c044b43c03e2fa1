use crate::cli::ServeArgs;
use crate::infra::{
    AppState, InMemoryAuditLog, InMemoryDirectory, InMemoryEpisodeRepository,
    StorageDocumentRenderer, TracingNotificationDispatcher,
};
use crate::routes::with_clinic_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use clinic_flow::config::AppConfig;
use clinic_flow::error::AppError;
use clinic_flow::telemetry;
use clinic_flow::workflows::episodes::{EpisodeCollaborators, EpisodeService};
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

    std::fs::create_dir_all(&config.documents.storage_dir)?;
    let collaborators = EpisodeCollaborators {
        documents: Arc::new(StorageDocumentRenderer::new(
            config.documents.storage_dir.clone(),
        )),
        notifications: Arc::new(TracingNotificationDispatcher::new(
            config.notifications.whatsapp_enabled,
        )),
        audit: Arc::new(InMemoryAuditLog::default()),
    };
    let episode_service = Arc::new(EpisodeService::new(
        Arc::new(InMemoryEpisodeRepository::default()),
        Arc::new(InMemoryDirectory::seeded()),
        collaborators,
    ));

    let app = with_clinic_routes(episode_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        storage = %config.documents.storage_dir.display(),
        whatsapp = config.notifications.whatsapp_enabled,
        "clinic flow service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
