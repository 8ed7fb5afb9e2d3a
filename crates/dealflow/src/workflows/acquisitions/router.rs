use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::blast::BlastRequest;
use super::domain::{
    BlastId, BuyBoxId, Grade, LeadId, PerformanceId, Priority, RecommendationId, Route, UserId,
};
use super::feedback::PeriodActuals;
use super::repository::{Notifier, PipelineStore, RepositoryError};
use super::service::{
    CloseRequest, DealPipelineService, MatchQuery, PipelineError, RecipientResponse,
};

/// Header carrying the acting user's id.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideScoreBody {
    pub grade: Grade,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRouteBody {
    pub route: Route,
    pub priority: Priority,
    pub justification: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionBody {
    #[serde(default)]
    pub note: Option<String>,
}

type Service<S, N> = Arc<DealPipelineService<S, N>>;

/// Router builder exposing the pipeline under `/api/v1`.
pub fn pipeline_router<S, N>(service: Service<S, N>) -> Router
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route("/api/v1/leads/:lead_id/score", get(score_handler::<S, N>))
        .route(
            "/api/v1/leads/:lead_id/recalculate-score",
            post(recalculate_handler::<S, N>),
        )
        .route(
            "/api/v1/leads/:lead_id/override-score",
            post(override_score_handler::<S, N>).delete(clear_score_override_handler::<S, N>),
        )
        .route(
            "/api/v1/leads/:lead_id/override-route",
            post(override_route_handler::<S, N>).delete(clear_route_override_handler::<S, N>),
        )
        .route(
            "/api/v1/leads/:lead_id/matching-buyers",
            get(matching_buyers_handler::<S, N>),
        )
        .route("/api/v1/deal-blasts", post(create_blast_handler::<S, N>))
        .route("/api/v1/deal-blasts/:blast_id", get(get_blast_handler::<S, N>))
        .route(
            "/api/v1/deal-blasts/:blast_id/send",
            post(send_blast_handler::<S, N>),
        )
        .route(
            "/api/v1/deal-blasts/:blast_id/response",
            post(response_handler::<S, N>),
        )
        .route(
            "/api/v1/deal-blasts/:blast_id/cancel",
            post(cancel_blast_handler::<S, N>),
        )
        .route("/api/v1/performance", post(close_handler::<S, N>))
        .route(
            "/api/v1/performance/recalculate-feedback",
            post(recalculate_feedback_handler::<S, N>),
        )
        .route(
            "/api/v1/performance/:performance_id/periods",
            post(period_handler::<S, N>),
        )
        .route(
            "/api/v1/buy-boxes/:buy_box_id/recommendations",
            post(recommendations_handler::<S, N>),
        )
        .route(
            "/api/v1/recommendations/:recommendation_id/accept",
            post(accept_handler::<S, N>),
        )
        .route(
            "/api/v1/recommendations/:recommendation_id/reject",
            post(reject_handler::<S, N>),
        )
        .with_state(service)
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, PipelineError>) -> Response {
    match result {
        Ok(body) => (status, Json(body)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) fn error_response(error: PipelineError) -> Response {
    let (status, payload) = match &error {
        PipelineError::Validation { field, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": error.to_string(), "field": field }),
        ),
        PipelineError::NotFound { .. } | PipelineError::Repository(RepositoryError::NotFound) => {
            (StatusCode::NOT_FOUND, json!({ "error": error.to_string() }))
        }
        PipelineError::StateConflict { current, .. } => (
            StatusCode::CONFLICT,
            json!({ "error": error.to_string(), "current": current }),
        ),
        PipelineError::Repository(RepositoryError::Conflict) => {
            (StatusCode::CONFLICT, json!({ "error": error.to_string() }))
        }
        PipelineError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            json!({ "error": error.to_string() }),
        ),
        PipelineError::Repository(RepositoryError::Unavailable(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": error.to_string() }),
        ),
    };
    (status, Json(payload)).into_response()
}

fn acting_user(headers: &HeaderMap) -> Result<UserId, Response> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(UserId::from)
        .ok_or_else(|| {
            let payload = json!({ "error": format!("missing {USER_HEADER} header") });
            (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
        })
}

pub(crate) async fn score_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(lead_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.lead_score(&LeadId(lead_id)))
}

pub(crate) async fn recalculate_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(lead_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.recalculate_score(&LeadId(lead_id)))
}

pub(crate) async fn override_score_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<OverrideScoreBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.override_score(&LeadId(lead_id), body.grade, &body.reason, user),
    )
}

pub(crate) async fn clear_score_override_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(lead_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.clear_score_override(&LeadId(lead_id)))
}

pub(crate) async fn override_route_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(lead_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<OverrideRouteBody>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    respond(
        StatusCode::OK,
        service.override_route(
            &LeadId(lead_id),
            body.route,
            body.priority,
            &body.justification,
            user,
        ),
    )
}

pub(crate) async fn clear_route_override_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(lead_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.clear_route_override(&LeadId(lead_id)))
}

pub(crate) async fn matching_buyers_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(lead_id): Path<String>,
    Query(query): Query<MatchQuery>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service.matching_buyers(&LeadId(lead_id), query),
    )
}

pub(crate) async fn create_blast_handler<S, N>(
    State(service): State<Service<S, N>>,
    headers: HeaderMap,
    Json(request): Json<BlastRequest>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    respond(StatusCode::CREATED, service.create_blast(request, user))
}

pub(crate) async fn get_blast_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(blast_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.get_blast(&BlastId(blast_id)))
}

pub(crate) async fn send_blast_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(blast_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.send_blast(&BlastId(blast_id)))
}

pub(crate) async fn response_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(blast_id): Path<String>,
    Json(response): Json<RecipientResponse>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service.record_response(&BlastId(blast_id), response),
    )
}

pub(crate) async fn cancel_blast_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(blast_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.cancel_blast(&BlastId(blast_id)))
}

pub(crate) async fn close_handler<S, N>(
    State(service): State<Service<S, N>>,
    Json(request): Json<CloseRequest>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::CREATED, service.record_close(request))
}

pub(crate) async fn period_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(performance_id): Path<String>,
    Json(actuals): Json<PeriodActuals>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::CREATED,
        service.append_period(&PerformanceId(performance_id), actuals),
    )
}

pub(crate) async fn recalculate_feedback_handler<S, N>(
    State(service): State<Service<S, N>>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(StatusCode::OK, service.recalculate_feedback())
}

pub(crate) async fn recommendations_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(buy_box_id): Path<String>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    respond(
        StatusCode::OK,
        service.generate_recommendations(&BuyBoxId(buy_box_id)),
    )
}

pub(crate) async fn accept_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(recommendation_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<DecisionBody>>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let note = body.and_then(|Json(body)| body.note);
    respond(
        StatusCode::OK,
        service.accept_recommendation(&RecommendationId(recommendation_id), user, note),
    )
}

pub(crate) async fn reject_handler<S, N>(
    State(service): State<Service<S, N>>,
    Path(recommendation_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<DecisionBody>>,
) -> Response
where
    S: PipelineStore + 'static,
    N: Notifier + 'static,
{
    let user = match acting_user(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let note = body.and_then(|Json(body)| body.note);
    respond(
        StatusCode::OK,
        service.reject_recommendation(&RecommendationId(recommendation_id), user, note),
    )
}
