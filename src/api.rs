// 🌐 HTTP API - axum router over the ledger service
//
// Every route except /health, /register and /login goes through
// `require_identity`, which verifies the bearer token and writes one activity
// log entry before the handler runs.

use crate::activity::ActivityEntry;
use crate::auth::{AuthError, AuthGateway, Identity};
use crate::error::LedgerError;
use crate::ledger::LedgerService;
use crate::models::{NewMember, TransactionInput};
use crate::store::{ActivityRepository, SqliteStore};
use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Single writer for the whole process
    pub ledger: Arc<Mutex<LedgerService<SqliteStore>>>,
    pub auth: Arc<AuthGateway>,
}

impl AppState {
    pub fn new(ledger: LedgerService<SqliteStore>, auth: AuthGateway) -> Self {
        AppState {
            ledger: Arc::new(Mutex::new(ledger)),
            auth: Arc::new(auth),
        }
    }

    fn ledger(&self) -> Result<MutexGuard<'_, LedgerService<SqliteStore>>, ApiError> {
        self.ledger
            .lock()
            .map_err(|_| ApiError::Internal("ledger mutex poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    Auth(AuthError),
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::BlockLocked(_) => StatusCode::FORBIDDEN,
        LedgerError::InvalidSplit(_)
        | LedgerError::UnknownMember { .. }
        | LedgerError::PayerNotParticipant(_)
        | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LedgerError::DuplicatePeriod(_) => StatusCode::CONFLICT,
        LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => ledger_status(err),
            ApiError::Auth(err) => match err {
                AuthError::InvalidCredentials | AuthError::MissingToken | AuthError::InvalidToken => {
                    StatusCode::UNAUTHORIZED
                }
                AuthError::UsernameTaken(_) => StatusCode::CONFLICT,
                AuthError::Store(inner) => ledger_status(inner),
                AuthError::Config(_) | AuthError::Hashing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Ledger(err) => err.to_string(),
            ApiError::Auth(err) => err.to_string(),
            ApiError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.message());
        } else if let ApiError::Ledger(err) = &self {
            tracing::debug!(kind = err.kind(), "request rejected: {}", err);
        }

        (status, Json(ApiResponse::<()>::failed(self.message()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CreateBlockRequest {
    #[serde(alias = "month")]
    pub period: String,

    #[serde(default)]
    pub members: Vec<NewMember>,
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct Deleted {
    id: String,
}

// ============================================================================
// Middleware
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Record the call; a logging failure never fails the request
fn record_activity(state: &AppState, identity: &Identity, request: &Request) {
    let headers = request.headers();
    let entry = ActivityEntry::new(
        &identity.username,
        request.method().as_str(),
        request.uri().path(),
    )
    .with_client(
        header_value(headers, "x-forwarded-for"),
        header_value(headers, header::USER_AGENT.as_str()),
    );

    let recorded = state
        .ledger()
        .and_then(|ledger| ledger.store().record_activity(&entry).map_err(ApiError::from));

    if let Err(err) = recorded {
        tracing::warn!("failed to record activity: {}", err.message());
    }
}

async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(AuthError::MissingToken)?;
    let identity = state.auth.verify(token)?;

    record_activity(&state, &identity, &request);
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// POST /register
async fn register(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let ledger = state.ledger()?;
    let user = state.auth.register(ledger.store(), &body.username, &body.password)?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(user))))
}

/// POST /login
async fn login(State(state): State<AppState>, Json(body): Json<Credentials>) -> ApiResult<impl Serialize> {
    let ledger = state.ledger()?;
    let issued = state.auth.login(ledger.store(), &body.username, &body.password)?;

    Ok(Json(ApiResponse::ok(issued)))
}

/// GET /blocks
async fn list_blocks(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let blocks = state.ledger()?.list_blocks()?;
    Ok(Json(ApiResponse::ok(blocks)))
}

/// POST /blocks
async fn create_block(
    State(state): State<AppState>,
    Json(body): Json<CreateBlockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let block = state.ledger()?.create_block(&body.period, &body.members)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(block))))
}

/// DELETE /blocks/:block
async fn delete_block(
    State(state): State<AppState>,
    Path(block_id): Path<String>,
) -> ApiResult<impl Serialize> {
    state.ledger()?.delete_block(&block_id)?;
    Ok(Json(ApiResponse::ok(Deleted { id: block_id })))
}

/// POST /blocks/:block/lock
async fn lock_block(State(state): State<AppState>, Path(period): Path<String>) -> ApiResult<impl Serialize> {
    let mut ledger = state.ledger()?;
    ledger.lock_block(&period)?;
    Ok(Json(ApiResponse::ok(ledger.block(&period)?)))
}

/// POST /blocks/:block/unlock
async fn unlock_block(State(state): State<AppState>, Path(period): Path<String>) -> ApiResult<impl Serialize> {
    let mut ledger = state.ledger()?;
    ledger.unlock_block(&period)?;
    Ok(Json(ApiResponse::ok(ledger.block(&period)?)))
}

/// GET /blocks/:block/members
async fn block_members(State(state): State<AppState>, Path(period): Path<String>) -> ApiResult<impl Serialize> {
    let members = state.ledger()?.members_of(&period)?;
    Ok(Json(ApiResponse::ok(members)))
}

/// GET /blocks/:block/summary
async fn block_summary(State(state): State<AppState>, Path(period): Path<String>) -> ApiResult<impl Serialize> {
    let summary = state.ledger()?.summary(&period)?;
    Ok(Json(ApiResponse::ok(summary)))
}

/// POST /blocks/:block/reconcile
async fn reconcile_block(State(state): State<AppState>, Path(period): Path<String>) -> ApiResult<impl Serialize> {
    let report = state.ledger()?.reconcile_block(&period)?;
    Ok(Json(ApiResponse::ok(report)))
}

/// GET /blocks/:block/transactions
async fn list_transactions(
    State(state): State<AppState>,
    Path(period): Path<String>,
) -> ApiResult<impl Serialize> {
    let transactions = state.ledger()?.transactions_of(&period)?;
    Ok(Json(ApiResponse::ok(transactions)))
}

/// POST /blocks/:block/transactions
async fn add_transaction(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(period): Path<String>,
    Json(input): Json<TransactionInput>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.ledger()?.add_transaction(&period, input)?;
    tracing::debug!(user = %identity.username, tx_id = %receipt.id, "transaction recorded via api");

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(receipt))))
}

/// PUT /transactions/:id
async fn edit_transaction(
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
    Json(input): Json<TransactionInput>,
) -> ApiResult<impl Serialize> {
    let updated = state.ledger()?.edit_transaction(&tx_id, input)?;
    Ok(Json(ApiResponse::ok(updated)))
}

/// DELETE /transactions/:id
async fn delete_transaction(
    State(state): State<AppState>,
    Path(tx_id): Path<String>,
) -> ApiResult<impl Serialize> {
    state.ledger()?.delete_transaction(&tx_id)?;
    Ok(Json(ApiResponse::ok(Deleted { id: tx_id })))
}

/// GET /members
async fn all_members(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let members = state.ledger()?.all_members()?;
    Ok(Json(ApiResponse::ok(members)))
}

/// GET /logs?limit=N
async fn activity_logs(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<impl Serialize> {
    let limit = query.limit.unwrap_or(100);
    let entries = state.ledger()?.store().list_activity(limit)?;
    Ok(Json(ApiResponse::ok(entries)))
}

// ============================================================================
// Router
// ============================================================================

/// Build the application router
///
/// `:block` is a block id for DELETE and a period label everywhere else.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/blocks", get(list_blocks).post(create_block))
        .route("/blocks/:block", delete(delete_block))
        .route("/blocks/:block/lock", post(lock_block))
        .route("/blocks/:block/unlock", post(unlock_block))
        .route("/blocks/:block/members", get(block_members))
        .route("/blocks/:block/summary", get(block_summary))
        .route("/blocks/:block/reconcile", post(reconcile_block))
        .route(
            "/blocks/:block/transactions",
            get(list_transactions).post(add_transaction),
        )
        .route(
            "/transactions/:id",
            put(edit_transaction).delete(delete_transaction),
        )
        .route("/members", get(all_members))
        .route("/logs", get(activity_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_identity));

    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
