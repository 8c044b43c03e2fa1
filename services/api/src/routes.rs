use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use clinic_flow::workflows::episodes::{
    episode_router, ClinicDirectory, EpisodeRepository, EpisodeService,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_clinic_routes<R, D>(service: Arc<EpisodeService<R, D>>) -> axum::Router
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    episode_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{
        InMemoryAuditLog, InMemoryDirectory, InMemoryEpisodeRepository, StorageDocumentRenderer,
        TracingNotificationDispatcher, DEMO_INSTITUTION, DEMO_PATIENT,
    };
    use axum::body::Body;
    use axum::http::Request;
    use clinic_flow::workflows::episodes::EpisodeCollaborators;
    use tower::ServiceExt;

    fn service() -> Arc<EpisodeService<InMemoryEpisodeRepository, InMemoryDirectory>> {
        Arc::new(EpisodeService::new(
            Arc::new(InMemoryEpisodeRepository::default()),
            Arc::new(InMemoryDirectory::seeded()),
            EpisodeCollaborators {
                documents: Arc::new(StorageDocumentRenderer::new(std::env::temp_dir())),
                notifications: Arc::new(TracingNotificationDispatcher::new(false)),
                audit: Arc::new(InMemoryAuditLog::default()),
            },
        ))
    }

    async fn read_json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        serde_json::from_slice(&body).expect("json payload")
    }

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let Json(body) = healthcheck().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn clinic_routes_serve_health_and_episodes() {
        let router = with_clinic_routes(service());

        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/episodes")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({
                            "patient_id": DEMO_PATIENT,
                            "institution_id": DEMO_INSTITUTION,
                        })
                        .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json_body(response).await;
        assert_eq!(body["state"], "CREATED");
        assert_eq!(body["urgency"], "green");
    }
}
