//! HTTP and WebSocket surface for the kiosk.
//!
//! JSON REST under `/api`, push over `/ws`. Handlers are thin: they decode
//! the request, call into [`Kiosk`], and map errors through [`ApiError`].

pub mod socket;

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, OptionalFromRequest, Path, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::command::{Command, CommandRequest};
use crate::engine::{
    CurrentItem, Health, IngestOutcome, Kiosk, PeriodChange, Resolution, ScheduleStatus,
    SelectorRequest, TestStatus,
};
use crate::error::KioskError;
use crate::event_buffer::{LogEntry, PollError, PollResult, DEFAULT_LIMIT};
use crate::graph::CropRect;
use crate::selection::Selector;
use crate::shuffle::ShuffleSeed;
use crate::state_store::StateDocument;

/// Shared state for web handlers
#[derive(Clone)]
pub struct WebState {
    pub kiosk: Arc<Kiosk>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(socket::ws_handler))
        .route("/api/selection", get(resolve_selection))
        .route("/api/selector", post(set_selector))
        .route("/api/state", get(export_state).put(restore_state))
        .route("/api/items", post(ingest_item))
        .route("/api/items/{id}", delete(delete_item))
        .route("/api/items/{id}/toggle", post(toggle_item))
        .route("/api/items/{id}/themes", put(set_item_themes))
        .route("/api/items/{id}/crop", put(set_item_crop))
        .route("/api/themes", post(create_theme))
        .route("/api/themes/{name}", delete(delete_theme))
        .route("/api/themes/{name}/rename", post(rename_theme))
        .route("/api/themes/{name}/cadence", put(set_theme_cadence))
        .route("/api/atmospheres", post(create_atmosphere))
        .route("/api/atmospheres/{name}", delete(delete_atmosphere))
        .route("/api/atmospheres/{name}/rename", post(rename_atmosphere))
        .route("/api/atmospheres/{name}/cadence", put(set_atmosphere_cadence))
        .route("/api/atmospheres/{name}/themes", put(set_atmosphere_themes))
        .route("/api/schedule", get(schedule_status))
        .route("/api/schedule/periods/{slot}", put(set_schedule_period))
        .route("/api/reshuffle", post(request_reshuffle))
        .route("/api/display", put(set_display))
        .route("/api/commands", post(send_command))
        .route("/api/commands/poll", get(poll_command))
        .route("/api/log", get(poll_log).post(append_log).delete(clear_log))
        .route("/api/current-item", get(current_item).post(report_current_item))
        .route("/api/test/status", get(test_status))
        .route("/api/test/clock", put(set_virtual_clock))
        .route("/api/test/cadence", put(set_cadence_override))
        .route("/api/test/check-interval", put(set_check_interval_override))
        .with_state(state)
}

// --- errors ------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Kiosk(KioskError),
    Poll(PollError),
}

impl From<KioskError> for ApiError {
    fn from(err: KioskError) -> Self {
        ApiError::Kiosk(err)
    }
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        ApiError::Poll(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Kiosk(err) => {
                let status = match err {
                    KioskError::Validation(_) | KioskError::Protected { .. } => StatusCode::BAD_REQUEST,
                    KioskError::NotFound { .. } => StatusCode::NOT_FOUND,
                    KioskError::Io { .. } | KioskError::Corrupt { .. } => {
                        tracing::error!(error = %err, "storage failure");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.code(), err.to_string())
            }
            ApiError::Poll(err) => {
                let (status, kind) = match err {
                    PollError::CursorExpired { .. } => (StatusCode::GONE, "cursor_expired"),
                    PollError::InvalidCursor { .. } => (StatusCode::BAD_REQUEST, "invalid_cursor"),
                    PollError::InvalidLimit { .. } => (StatusCode::BAD_REQUEST, "invalid_limit"),
                };
                (status, kind, err.to_string())
            }
        };
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Kiosk(KioskError::validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Kiosk(KioskError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Kiosk(KioskError::validation(rejection.body_text()))
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// --- extractors --------------------------------------------------------------

/// `Json` whose rejection is an [`ApiError`], so malformed bodies get the
/// same `{error, kind}` reply as every other failure.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

impl<T, S> OptionalFromRequest<S> for ApiJson<T>
where
    Json<T>: OptionalFromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let value = <Json<T> as OptionalFromRequest<S>>::from_request(req, state).await?;
        Ok(value.map(|Json(value)| ApiJson(value)))
    }
}

#[derive(Debug)]
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

// --- request / response shapes -----------------------------------------------

#[derive(Debug, Deserialize)]
struct FingerprintQuery {
    fingerprint: Option<String>,
}

#[derive(Debug, Serialize)]
struct SelectionResponse {
    #[serde(flatten)]
    resolution: Resolution,
    /// Present when the caller sent the fingerprint it is showing.
    #[serde(skip_serializing_if = "Option::is_none")]
    changed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    #[serde(alias = "filename")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ToggleResponse {
    id: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ThemesRequest {
    themes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CropRequest {
    crop: Option<CropRect>,
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    name: String,
    #[serde(default)]
    cadence_secs: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CadenceRequest {
    cadence_secs: u32,
}

#[derive(Debug, Deserialize)]
struct OptionalCadenceRequest {
    cadence_secs: Option<u32>,
}

#[derive(Debug, Serialize)]
struct NameResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PeriodRequest {
    atmospheres: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DisplayRequest {
    dissolve: bool,
}

#[derive(Debug, Serialize)]
struct CommandResponse {
    command: Command,
    delivered: usize,
}

#[derive(Debug, Serialize)]
struct PollCommandResponse {
    command: Option<Command>,
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    cursor: Option<u64>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LogRequest {
    #[serde(default = "default_level")]
    level: String,
    message: String,
    #[serde(default)]
    source: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
struct CurrentItemRequest {
    id: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClockRequest {
    at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ClockResponse {
    status: TestStatus,
    period_change: Option<PeriodChange>,
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    ms: Option<u64>,
}

fn ok() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

// --- handlers ----------------------------------------------------------------

async fn health(State(state): State<WebState>) -> Json<Health> {
    Json(state.kiosk.health())
}

async fn resolve_selection(
    State(state): State<WebState>,
    ApiQuery(query): ApiQuery<FingerprintQuery>,
) -> ApiResult<SelectionResponse> {
    let resolution = state.kiosk.resolve_selection()?;
    let changed = query.fingerprint.map(|fp| fp != resolution.fingerprint);
    Ok(Json(SelectionResponse {
        resolution,
        changed,
    }))
}

async fn set_selector(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<SelectorRequest>,
) -> ApiResult<Selector> {
    Ok(Json(state.kiosk.set_selector(request)?))
}

async fn export_state(State(state): State<WebState>) -> Json<StateDocument> {
    Json(state.kiosk.export_state())
}

async fn restore_state(
    State(state): State<WebState>,
    ApiJson(doc): ApiJson<StateDocument>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.restore_state(doc)?;
    Ok(ok())
}

async fn ingest_item(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<IngestRequest>,
) -> Result<(StatusCode, Json<IngestOutcome>), ApiError> {
    let outcome = state.kiosk.ingest_item(&request.id)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn delete_item(
    State(state): State<WebState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.delete_item(&id)?;
    Ok(ok())
}

async fn toggle_item(
    State(state): State<WebState>,
    ApiPath(id): ApiPath<String>,
    request: Option<ApiJson<ToggleRequest>>,
) -> ApiResult<ToggleResponse> {
    let requested = request.and_then(|ApiJson(body)| body.enabled);
    let enabled = state.kiosk.toggle_item(&id, requested)?;
    Ok(Json(ToggleResponse { id, enabled }))
}

async fn set_item_themes(
    State(state): State<WebState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(request): ApiJson<ThemesRequest>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.set_item_themes(&id, &request.themes)?;
    Ok(ok())
}

async fn set_item_crop(
    State(state): State<WebState>,
    ApiPath(id): ApiPath<String>,
    ApiJson(request): ApiJson<CropRequest>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.set_item_crop(&id, request.crop)?;
    Ok(ok())
}

async fn create_theme(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<CreateRequest>,
) -> Result<(StatusCode, Json<NameResponse>), ApiError> {
    let name = state.kiosk.create_theme(&request.name, request.cadence_secs)?;
    Ok((StatusCode::CREATED, Json(NameResponse { name })))
}

async fn delete_theme(
    State(state): State<WebState>,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.delete_theme(&name)?;
    Ok(ok())
}

async fn rename_theme(
    State(state): State<WebState>,
    ApiPath(name): ApiPath<String>,
    ApiJson(request): ApiJson<RenameRequest>,
) -> ApiResult<NameResponse> {
    let name = state.kiosk.rename_theme(&name, &request.name)?;
    Ok(Json(NameResponse { name }))
}

async fn set_theme_cadence(
    State(state): State<WebState>,
    ApiPath(name): ApiPath<String>,
    ApiJson(request): ApiJson<CadenceRequest>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.set_theme_cadence(&name, request.cadence_secs)?;
    Ok(ok())
}

async fn create_atmosphere(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<CreateRequest>,
) -> Result<(StatusCode, Json<NameResponse>), ApiError> {
    let name = state
        .kiosk
        .create_atmosphere(&request.name, request.cadence_secs)?;
    Ok((StatusCode::CREATED, Json(NameResponse { name })))
}

async fn delete_atmosphere(
    State(state): State<WebState>,
    ApiPath(name): ApiPath<String>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.delete_atmosphere(&name)?;
    Ok(ok())
}

async fn rename_atmosphere(
    State(state): State<WebState>,
    ApiPath(name): ApiPath<String>,
    ApiJson(request): ApiJson<RenameRequest>,
) -> ApiResult<NameResponse> {
    let name = state.kiosk.rename_atmosphere(&name, &request.name)?;
    Ok(Json(NameResponse { name }))
}

async fn set_atmosphere_cadence(
    State(state): State<WebState>,
    ApiPath(name): ApiPath<String>,
    ApiJson(request): ApiJson<OptionalCadenceRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .kiosk
        .set_atmosphere_cadence(&name, request.cadence_secs)?;
    Ok(ok())
}

async fn set_atmosphere_themes(
    State(state): State<WebState>,
    ApiPath(name): ApiPath<String>,
    ApiJson(request): ApiJson<ThemesRequest>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.set_atmosphere_themes(&name, &request.themes)?;
    Ok(ok())
}

async fn schedule_status(State(state): State<WebState>) -> Json<ScheduleStatus> {
    Json(state.kiosk.schedule_status())
}

async fn set_schedule_period(
    State(state): State<WebState>,
    ApiPath(slot): ApiPath<u8>,
    ApiJson(request): ApiJson<PeriodRequest>,
) -> ApiResult<ScheduleStatus> {
    state.kiosk.set_schedule_period(slot, &request.atmospheres)?;
    Ok(Json(state.kiosk.schedule_status()))
}

async fn request_reshuffle(State(state): State<WebState>) -> ApiResult<ShuffleSeed> {
    Ok(Json(state.kiosk.request_reshuffle()?))
}

async fn set_display(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<DisplayRequest>,
) -> ApiResult<serde_json::Value> {
    state.kiosk.set_dissolve(request.dissolve)?;
    Ok(ok())
}

async fn send_command(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<CommandRequest>,
) -> ApiResult<CommandResponse> {
    let command = Command::try_from(request)?;
    let delivered = state.kiosk.send_command(command.clone())?;
    Ok(Json(CommandResponse { command, delivered }))
}

async fn poll_command(State(state): State<WebState>) -> Json<PollCommandResponse> {
    Json(PollCommandResponse {
        command: state.kiosk.poll_command(),
    })
}

async fn poll_log(
    State(state): State<WebState>,
    ApiQuery(query): ApiQuery<LogQuery>,
) -> ApiResult<PollResult> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    Ok(Json(state.kiosk.poll_log(query.cursor, limit)?))
}

async fn append_log(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<LogRequest>,
) -> ApiResult<LogEntry> {
    Ok(Json(state.kiosk.append_log(
        &request.level,
        &request.message,
        request.source,
    )?))
}

async fn clear_log(State(state): State<WebState>) -> Json<serde_json::Value> {
    let dropped = state.kiosk.clear_log();
    Json(json!({ "ok": true, "dropped": dropped }))
}

async fn current_item(State(state): State<WebState>) -> Json<Option<CurrentItem>> {
    Json(state.kiosk.current_item())
}

async fn report_current_item(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<CurrentItemRequest>,
) -> ApiResult<CurrentItem> {
    Ok(Json(
        state
            .kiosk
            .report_current_item(&request.id, request.source)?,
    ))
}

async fn test_status(State(state): State<WebState>) -> Json<TestStatus> {
    Json(state.kiosk.test_status())
}

async fn set_virtual_clock(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<ClockRequest>,
) -> Json<ClockResponse> {
    let period_change = state.kiosk.set_virtual_clock(request.at);
    Json(ClockResponse {
        status: state.kiosk.test_status(),
        period_change,
    })
}

async fn set_cadence_override(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<OverrideRequest>,
) -> ApiResult<TestStatus> {
    state.kiosk.set_cadence_override(request.ms)?;
    Ok(Json(state.kiosk.test_status()))
}

async fn set_check_interval_override(
    State(state): State<WebState>,
    ApiJson(request): ApiJson<OverrideRequest>,
) -> ApiResult<TestStatus> {
    state.kiosk.set_check_interval_override(request.ms)?;
    Ok(Json(state.kiosk.test_status()))
}
