use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::commands::{
    ExtractionRequest, ExtractionStatusUpdate, IntegratedReportRequest, LabResultSubmission,
    MedicalOrderRequest, ProposalRequest, PsychClearance, ReferralNote, SendProposalRequest,
    SurveySubmission, TestSubmission,
};
use super::domain::{Actor, EpisodeDraft, EpisodeId, ExtractionId, InstitutionId};
use super::repository::{ClinicDirectory, EpisodeFilter, EpisodeRepository};
use super::service::{EpisodeService, EpisodeServiceError};
use crate::workflows::eligibility::EvaluationInput;

/// Header carrying the acting user's id.
pub const ACTOR_HEADER: &str = "x-actor-id";

type SharedService<R, D> = State<Arc<EpisodeService<R, D>>>;

/// Router exposing one endpoint per lifecycle command plus the read side.
pub fn episode_router<R, D>(service: Arc<EpisodeService<R, D>>) -> Router
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    Router::new()
        .route(
            "/api/v1/episodes",
            post(create_handler::<R, D>).get(list_handler::<R, D>),
        )
        .route("/api/v1/episodes/:episode_id", get(detail_handler::<R, D>))
        .route(
            "/api/v1/episodes/:episode_id/timeline",
            get(timeline_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/assignments",
            get(assignments_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/tests",
            post(test_result_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/referral",
            post(referral_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/psych-clearance",
            post(psych_clearance_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/medical-order",
            post(medical_order_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/extractions",
            post(extraction_handler::<R, D>),
        )
        .route(
            "/api/v1/extractions/:extraction_id/status",
            patch(extraction_status_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/lab-results",
            post(lab_result_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/integrated-report",
            post(integrated_report_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/proposal",
            post(proposal_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/proposal/send",
            post(send_proposal_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/survey",
            post(survey_handler::<R, D>),
        )
        .route(
            "/api/v1/episodes/:episode_id/reopen",
            post(reopen_handler::<R, D>),
        )
        .route(
            "/api/v1/institutions/:institution_id/bypass/evaluate",
            post(bypass_handler::<R, D>),
        )
        .route("/api/v1/dashboard", get(dashboard_handler::<R, D>))
        .with_state(service)
}

pub(crate) fn actor_from(headers: &HeaderMap) -> Actor {
    headers
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| Actor(value.to_string()))
        .unwrap_or_else(Actor::system)
}

pub(crate) fn status_for(error: &EpisodeServiceError) -> StatusCode {
    match error {
        EpisodeServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        EpisodeServiceError::InvalidState(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EpisodeServiceError::Validation(_) => StatusCode::BAD_REQUEST,
        EpisodeServiceError::Conflict => StatusCode::CONFLICT,
        EpisodeServiceError::Dependency(_) => StatusCode::BAD_GATEWAY,
        EpisodeServiceError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(error: EpisodeServiceError) -> Response {
    let status = status_for(&error);
    if !error.is_client_error() {
        error!(%error, status = status.as_u16(), "episode command failed");
    }
    let payload = json!({
        "error": error.to_string(),
    });
    (status, Json(payload)).into_response()
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, EpisodeServiceError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn create_handler<R, D>(
    State(service): SharedService<R, D>,
    headers: HeaderMap,
    Json(draft): Json<EpisodeDraft>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(StatusCode::CREATED, service.create(draft, &actor_from(&headers)))
}

pub(crate) async fn list_handler<R, D>(
    State(service): SharedService<R, D>,
    Query(filter): Query<EpisodeFilter>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(StatusCode::OK, service.list(&filter))
}

pub(crate) async fn detail_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(StatusCode::OK, service.get(&EpisodeId(episode_id)))
}

pub(crate) async fn timeline_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(StatusCode::OK, service.timeline(&EpisodeId(episode_id)))
}

pub(crate) async fn assignments_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(StatusCode::OK, service.assignments(&EpisodeId(episode_id)))
}

pub(crate) async fn test_result_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(submission): Json<TestSubmission>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result =
        service.submit_test_result(&EpisodeId(episode_id), submission, &actor_from(&headers));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn referral_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(referral): Json<ReferralNote>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result =
        service.derive_to_physician(&EpisodeId(episode_id), referral, &actor_from(&headers));
    respond(StatusCode::OK, result)
}

pub(crate) async fn psych_clearance_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(clearance): Json<PsychClearance>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result =
        service.close_psych_no_referral(&EpisodeId(episode_id), clearance, &actor_from(&headers));
    respond(StatusCode::OK, result)
}

pub(crate) async fn medical_order_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<MedicalOrderRequest>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result =
        service.issue_medical_order(&EpisodeId(episode_id), request, &actor_from(&headers));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn extraction_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ExtractionRequest>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result =
        service.schedule_extraction(&EpisodeId(episode_id), request, &actor_from(&headers));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn extraction_status_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(extraction_id): Path<String>,
    headers: HeaderMap,
    Json(update): Json<ExtractionStatusUpdate>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result = service.update_extraction_status(
        &ExtractionId(extraction_id),
        update,
        &actor_from(&headers),
    );
    respond(StatusCode::OK, result)
}

pub(crate) async fn lab_result_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(submission): Json<LabResultSubmission>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result =
        service.register_lab_result(&EpisodeId(episode_id), submission, &actor_from(&headers));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn integrated_report_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<IntegratedReportRequest>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result =
        service.create_integrated_report(&EpisodeId(episode_id), request, &actor_from(&headers));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn proposal_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ProposalRequest>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result = service.create_proposal(&EpisodeId(episode_id), request, &actor_from(&headers));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn send_proposal_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SendProposalRequest>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result = service.send_proposal(&EpisodeId(episode_id), request, &actor_from(&headers));
    respond(StatusCode::OK, result)
}

pub(crate) async fn survey_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
    Json(submission): Json<SurveySubmission>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    let result = service.register_survey(&EpisodeId(episode_id), submission, &actor_from(&headers));
    respond(StatusCode::CREATED, result)
}

pub(crate) async fn reopen_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(episode_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(
        StatusCode::OK,
        service.reopen(&EpisodeId(episode_id), &actor_from(&headers)),
    )
}

pub(crate) async fn bypass_handler<R, D>(
    State(service): SharedService<R, D>,
    Path(institution_id): Path<String>,
    Json(input): Json<EvaluationInput>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(
        StatusCode::OK,
        service.evaluate_bypass(&InstitutionId(institution_id), &input),
    )
}

pub(crate) async fn dashboard_handler<R, D>(
    State(service): SharedService<R, D>,
    Query(filter): Query<EpisodeFilter>,
) -> Response
where
    R: EpisodeRepository + 'static,
    D: ClinicDirectory + 'static,
{
    respond(StatusCode::OK, service.dashboard(&filter, Utc::now()))
}
