use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::auth::ApiKey;
use crate::error::RepositoryError;
use crate::logic::{QueryEngine, RebuildReport, Reconciler, Repository, WriteCoordinator};
use crate::model::{
    AssetLocation, CascadeReport, IndexRow, InstanceListing, ProblemInfo, ProblemInfoResponse,
    SolutionListing, SolutionRow,
};

/// Everything a request handler needs, shared across requests.
#[derive(Debug)]
pub struct AppState {
    pub queries: QueryEngine,
    pub writer: WriteCoordinator,
    pub reconciler: Reconciler,
    /// Shared secret for mutating endpoints
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(repo: Repository, queries: QueryEngine, api_key: Option<String>) -> Self {
        Self {
            queries,
            writer: WriteCoordinator::new(repo.clone()),
            reconciler: Reconciler::new(repo),
            api_key,
        }
    }
}

pub type SharedState = Arc<AppState>;

type ApiResult<T> = Result<T, RepositoryError>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            failures: Vec::new(),
        }
    }
}

impl RepositoryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
            RepositoryError::Conflict(_) => StatusCode::CONFLICT,
            RepositoryError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RepositoryError::Authentication(_) => StatusCode::FORBIDDEN,
            RepositoryError::PartialFailure { .. } => StatusCode::MULTI_STATUS,
            RepositoryError::Configuration(_)
            | RepositoryError::Io(_)
            | RepositoryError::Index(_)
            | RepositoryError::Serialization(_)
            | RepositoryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RepositoryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }
        let body = match self {
            RepositoryError::PartialFailure { message, failures } => ErrorResponse {
                error: message,
                failures,
            },
            other => ErrorResponse::new(&other.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

// Wildcard captures are uids; tolerate a leading slash
fn uid_of(raw: &str) -> &str {
    raw.trim_start_matches('/')
}

fn json_payload(payload: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], payload).into_response()
}

pub async fn list_problems(State(state): State<SharedState>) -> Json<Vec<ProblemInfo>> {
    Json(state.queries.list_problems())
}

pub async fn rebuild_index(State(state): State<SharedState>, _key: ApiKey) -> ApiResult<Json<RebuildReport>> {
    log::info!("Index rebuild requested");
    Ok(Json(state.reconciler.rebuild().await?))
}

pub async fn problem_info(
    State(state): State<SharedState>,
    Path(problem): Path<String>,
) -> ApiResult<Json<ProblemInfoResponse>> {
    Ok(Json(state.queries.problem_info(&problem).await?))
}

pub async fn instance_schema(
    State(state): State<SharedState>,
    Path(problem): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.queries.instance_schema(&problem)?))
}

pub async fn solution_schema(
    State(state): State<SharedState>,
    Path(problem): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.queries.solution_schema(&problem)?))
}

/// Filter, sort and page through the instances of a problem class
pub async fn query_instances(
    State(state): State<SharedState>,
    Path(problem): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> ApiResult<Json<InstanceListing>> {
    Ok(Json(state.queries.search(&problem, &params).await?))
}

pub async fn instance_info(
    State(state): State<SharedState>,
    Path((problem, uid)): Path<(String, String)>,
) -> ApiResult<Json<IndexRow>> {
    Ok(Json(state.queries.instance_info(&problem, uid_of(&uid)).await?))
}

pub async fn get_instance(
    State(state): State<SharedState>,
    Path((problem, uid)): Path<(String, String)>,
) -> ApiResult<Response> {
    let payload = state.queries.get_instance(&problem, uid_of(&uid)).await?;
    Ok(json_payload(payload))
}

pub async fn create_instance(
    State(state): State<SharedState>,
    Path(problem): Path<String>,
    _key: ApiKey,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<IndexRow>)> {
    let row = state.writer.create_instance(&problem, &body).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn delete_instance(
    State(state): State<SharedState>,
    Path((problem, uid)): Path<(String, String)>,
    _key: ApiKey,
) -> ApiResult<Json<CascadeReport>> {
    Ok(Json(state.writer.delete_instance(&problem, uid_of(&uid)).await?))
}

pub async fn get_solution(
    State(state): State<SharedState>,
    Path((problem, uid)): Path<(String, String)>,
) -> ApiResult<Response> {
    let payload = state.queries.get_solution(&problem, uid_of(&uid)).await?;
    Ok(json_payload(payload))
}

pub async fn create_solution(
    State(state): State<SharedState>,
    Path(problem): Path<String>,
    _key: ApiKey,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SolutionRow>)> {
    let row = state.writer.create_solution(&problem, &body).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn delete_solution(
    State(state): State<SharedState>,
    Path((problem, uid)): Path<(String, String)>,
    _key: ApiKey,
) -> ApiResult<StatusCode> {
    state.writer.delete_solution(&problem, uid_of(&uid)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn solution_info(
    State(state): State<SharedState>,
    Path((problem, instance_uid)): Path<(String, String)>,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<SolutionListing>> {
    let limit = page
        .limit
        .unwrap_or(state.queries.settings().default_page_limit);
    let listing = state
        .queries
        .solution_info(&problem, uid_of(&instance_uid), page.offset.unwrap_or(0), limit)
        .await?;
    Ok(Json(listing))
}

pub async fn asset_info(
    State(state): State<SharedState>,
    Path((problem, uid)): Path<(String, String)>,
) -> ApiResult<Json<BTreeMap<String, String>>> {
    Ok(Json(state.queries.asset_info(&problem, uid_of(&uid)).await?))
}

pub async fn get_asset(
    State(state): State<SharedState>,
    Path((problem, asset_class, uid)): Path<(String, String, String)>,
) -> ApiResult<Json<AssetLocation>> {
    let location = state
        .queries
        .get_asset(&problem, uid_of(&uid), &asset_class)
        .await?;
    Ok(Json(location))
}

pub async fn put_asset(
    State(state): State<SharedState>,
    Path((problem, asset_class, uid)): Path<(String, String, String)>,
    _key: ApiKey,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<AssetLocation>)> {
    state
        .writer
        .put_asset(&problem, uid_of(&uid), &asset_class, body.to_vec())
        .await?;
    let location = state
        .queries
        .get_asset(&problem, uid_of(&uid), &asset_class)
        .await?;
    Ok((StatusCode::CREATED, Json(location)))
}

pub async fn delete_asset(
    State(state): State<SharedState>,
    Path((problem, asset_class, uid)): Path<(String, String, String)>,
    _key: ApiKey,
) -> ApiResult<StatusCode> {
    state
        .writer
        .delete_asset(&problem, uid_of(&uid), &asset_class)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            RepositoryError::not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RepositoryError::Conflict("x".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            RepositoryError::validation("x").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            RepositoryError::Authentication("x".to_string()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            RepositoryError::Configuration("x".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_partial_failure_body_lists_failures() {
        let body = ErrorResponse {
            error: "instance 'a' deleted".to_string(),
            failures: vec!["asset 'image': io".to_string()],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["failures"][0], "asset 'image': io");

        let plain = serde_json::to_value(ErrorResponse::new("boom")).unwrap();
        assert!(plain.get("failures").is_none());
    }

    #[test]
    fn test_uid_of_strips_leading_slash() {
        assert_eq!(uid_of("/set/a"), "set/a");
        assert_eq!(uid_of("set/a"), "set/a");
    }
}
