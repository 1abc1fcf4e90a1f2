use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use bouncer_core::{
    GroupId,
    admission::{self, AdmissionOutcome, CandidateStanding},
    engine::{ResolvedWhitelist, TestReport, WhitelistEngine, WhitelistError},
    options::{OptionValue, OptionsError, OptionsStore},
};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<WhitelistEngine>,
    options: Arc<OptionsStore>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Arc<WhitelistEngine>, options: Arc<OptionsStore>) -> Self {
        Self { engine, options }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/v1/groups/:group/whitelist",
            get(get_whitelist).put(put_whitelist),
        )
        .route("/v1/groups/:group/whitelist/condition", put(put_condition))
        .route("/v1/groups/:group/whitelist/test", post(test_whitelist))
        .route("/v1/groups/:group/check", post(check_candidate))
        .route("/v1/groups/:group/join-request", post(join_request))
        .route(
            "/v1/groups/:group/options/:name",
            get(get_option).put(put_option),
        )
        .route("/v1/options", get(options_reference))
        .with_state(state)
}

#[derive(Debug)]
enum ApiError {
    Whitelist(WhitelistError),
    Options(OptionsError),
}

impl From<WhitelistError> for ApiError {
    fn from(error: WhitelistError) -> Self {
        Self::Whitelist(error)
    }
}

impl From<OptionsError> for ApiError {
    fn from(error: OptionsError) -> Self {
        Self::Options(error)
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "no_whitelist_configured" | "unknown_option" => StatusCode::NOT_FOUND,
        "invalid_parameter" | "missing_parameter" | "invalid_condition"
        | "unsupported_reader_type" | "condition_on_default" | "condition_unsupported"
        | "invalid_value" | "listing_unsupported" => StatusCode::BAD_REQUEST,
        "remote_fetch" | "table_read" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (code, message) = match &self {
            Self::Whitelist(error) => (error.code(), error.to_string()),
            Self::Options(error) => (error.code(), error.to_string()),
        };
        (
            status_for(code),
            Json(serde_json::json!({
                "error": { "code": code, "message": message },
            })),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct SetWhitelistBody {
    args: Vec<String>,
}

#[derive(Deserialize)]
struct SetConditionBody {
    condition: String,
}

#[derive(Deserialize)]
struct CheckBody {
    username: String,
}

#[derive(Serialize)]
struct CheckResponse {
    allowed: bool,
}

#[derive(Deserialize)]
struct JoinRequestBody {
    username: String,
    #[serde(default)]
    standing: CandidateStanding,
}

#[derive(Serialize)]
struct OptionResponse {
    name: String,
    value: OptionValue,
}

#[derive(Deserialize)]
struct SetOptionBody {
    value: String,
}

#[derive(Serialize)]
struct OptionSpecView {
    name: &'static str,
    kind: &'static str,
    default: Option<OptionValue>,
    description: &'static str,
}

#[derive(Serialize)]
struct OptionsReferenceResponse {
    options: Vec<OptionSpecView>,
    reference: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_whitelist(
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
) -> Result<Json<ResolvedWhitelist>, ApiError> {
    let resolved = state
        .engine
        .get_whitelist(group)
        .await?
        .ok_or(WhitelistError::NoWhitelistConfigured(group))?;
    Ok(Json(resolved))
}

async fn put_whitelist(
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
    Json(body): Json<SetWhitelistBody>,
) -> Result<Json<ResolvedWhitelist>, ApiError> {
    let resolved = state.engine.set_whitelist(group, &body.args).await?;
    Ok(Json(resolved))
}

async fn put_condition(
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
    Json(body): Json<SetConditionBody>,
) -> Result<Json<ResolvedWhitelist>, ApiError> {
    let resolved = state
        .engine
        .set_whitelist_condition(group, &body.condition)
        .await?;
    Ok(Json(resolved))
}

async fn test_whitelist(
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
) -> Result<Json<TestReport>, ApiError> {
    Ok(Json(state.engine.test(group).await?))
}

async fn check_candidate(
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
    Json(body): Json<CheckBody>,
) -> Result<Json<CheckResponse>, ApiError> {
    let allowed = state.engine.check_allowed(group, &body.username).await?;
    Ok(Json(CheckResponse { allowed }))
}

async fn join_request(
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
    Json(body): Json<JoinRequestBody>,
) -> Result<Json<AdmissionOutcome>, ApiError> {
    let outcome = admission::handle_join_request(
        &state.engine,
        &state.options,
        group,
        &body.username,
        body.standing,
    )
    .await?;
    Ok(Json(outcome))
}

async fn get_option(
    State(state): State<AppState>,
    Path((group, name)): Path<(GroupId, String)>,
) -> Result<Json<OptionResponse>, ApiError> {
    let value = state.options.get(group, &name).await?;
    Ok(Json(OptionResponse { name, value }))
}

async fn put_option(
    State(state): State<AppState>,
    Path((group, name)): Path<(GroupId, String)>,
    Json(body): Json<SetOptionBody>,
) -> Result<Json<OptionResponse>, ApiError> {
    let value = state.options.set(group, &name, &body.value).await?;
    Ok(Json(OptionResponse { name, value }))
}

async fn options_reference(State(state): State<AppState>) -> Json<OptionsReferenceResponse> {
    let options = state
        .options
        .specs()
        .iter()
        .map(|spec| OptionSpecView {
            name: spec.name,
            kind: spec.kind.as_str(),
            default: spec.default.clone(),
            description: spec.description,
        })
        .collect();
    Json(OptionsReferenceResponse {
        options,
        reference: state.options.reference(),
    })
}
