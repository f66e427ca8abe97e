//! HTTP command surface, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use finops_lib::{
    engine::FinopsEngine,
    error::{EngineError, LedgerError, ProposalError},
    guardrail::GuardrailDecision,
    health::ComponentStatus,
    ledger::{AggregateQuery, ApprovalSignal, AuditEntry, OpportunityFilter, TimeWindow},
    observability::EngineMetrics,
    report::{ReportKind, ReportPeriod},
    DetectionCycle, OpportunityStatus, OpportunityType,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FinopsEngine>,
    /// Absent when snapshots are pushed only through tests
    pub cycle: Option<Arc<DetectionCycle>>,
    pub metrics: EngineMetrics,
}

impl AppState {
    pub fn new(engine: Arc<FinopsEngine>, cycle: Option<Arc<DetectionCycle>>) -> Self {
        Self {
            engine,
            cycle,
            metrics: EngineMetrics::new(),
        }
    }
}

/// Error body returned by every failing command
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }
}

fn ledger_status(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::NotFound(_) | LedgerError::ProposalNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidStateTransition { .. }
        | LedgerError::StaleVersionConflict { .. }
        | LedgerError::DuplicateFingerprint(_)
        | LedgerError::InvalidCause { .. }
        | LedgerError::DailyCapExhausted { .. } => StatusCode::CONFLICT,
        LedgerError::InvalidOpportunity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::Ledger(e) | EngineError::Proposal(ProposalError::Ledger(e)) => ledger_status(e),
            EngineError::Proposal(ProposalError::Encoding(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Proposal(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::External(_) => StatusCode::BAD_GATEWAY,
            EngineError::Guardrail(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_server_error() {
            warn!(status = %self.0, error = %self.1, "Command failed");
        }
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.engine.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.engine.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Run one detection cycle now
async fn run_cycle(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let cycle = state
        .cycle
        .as_ref()
        .ok_or_else(|| ApiError(StatusCode::SERVICE_UNAVAILABLE, "No snapshot source configured".to_string()))?;
    let report = cycle.run_once().await?;
    Ok(Json(report))
}

/// Query string for listing opportunities
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<OpportunityStatus>,
    #[serde(rename = "type")]
    pub opportunity_type: Option<OpportunityType>,
    pub team: Option<String>,
    pub cluster: Option<String>,
}

impl From<ListQuery> for OpportunityFilter {
    fn from(query: ListQuery) -> Self {
        Self {
            status: query.status,
            opportunity_type: query.opportunity_type,
            team: query.team,
            cluster: query.cluster,
        }
    }
}

async fn list_opportunities(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let filter = OpportunityFilter::from(query);
    Json(state.engine.ledger().list(&filter).await)
}

async fn get_opportunity(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let opportunity = state
        .engine
        .ledger()
        .get(&id)
        .await
        .ok_or_else(|| ApiError::from(EngineError::from(LedgerError::NotFound(id))))?;
    Ok(Json(opportunity))
}

/// Audit trail and guardrail decisions for one opportunity
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub opportunity_id: String,
    pub transitions: Vec<AuditEntry>,
    pub decisions: Vec<GuardrailDecision>,
}

async fn get_history(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let ledger = state.engine.ledger();
    if ledger.get(&id).await.is_none() {
        return Err(EngineError::from(LedgerError::NotFound(id)).into());
    }
    Ok(Json(HistoryResponse {
        transitions: ledger.history(&id).await,
        decisions: ledger.decisions_for(&id).await,
        opportunity_id: id,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Deny,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovalBody {
    pub decision: Decision,
    pub actor: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

async fn post_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ApprovalBody>,
) -> ApiResult<impl IntoResponse> {
    if body.actor.trim().is_empty() {
        return Err(ApiError::bad_request("actor must not be empty"));
    }
    let signal = ApprovalSignal {
        approve: body.decision == Decision::Approve,
        actor: body.actor,
        reason: body.reason,
    };
    let updated = state
        .engine
        .apply_approval_signal(&id, body.expected_version, signal, Utc::now())
        .await?;
    Ok(Json(updated))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackBody {
    pub reason: String,
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "external".to_string()
}

async fn post_rollback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RollbackBody>,
) -> ApiResult<impl IntoResponse> {
    if body.reason.trim().is_empty() {
        return Err(ApiError::bad_request("rollback reason must not be empty"));
    }
    let updated = state
        .engine
        .rollback(&id, &body.reason, &body.actor, Utc::now())
        .await?;
    Ok(Json(updated))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProposalBody {
    pub opportunity_ids: Vec<String>,
}

/// 201 for a new proposal, 200 when an identical one already exists
async fn post_proposal(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProposalBody>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.engine.propose(&body.opportunity_ids, Utc::now()).await?;
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.into_proposal())))
}

async fn list_proposals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.ledger().proposals().await)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImplementedBody {
    pub reference: String,
}

async fn post_implemented(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ImplementedBody>,
) -> ApiResult<impl IntoResponse> {
    let updated = state
        .engine
        .mark_implemented(&id, &body.reference, Utc::now())
        .await?;
    info!(proposal_id = %id, reference = %body.reference, count = updated.len(), "Proposal implemented");
    Ok(Json(updated))
}

/// Query string for savings totals
#[derive(Debug, Default, Deserialize)]
pub struct SavingsQuery {
    /// Comma-separated statuses, e.g. `verified,realized`
    pub status: Option<String>,
    /// Inclusive lower bound on `detected_at`
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `detected_at`
    pub until: Option<DateTime<Utc>>,
}

impl TryFrom<SavingsQuery> for AggregateQuery {
    type Error = ApiError;

    fn try_from(query: SavingsQuery) -> Result<Self, Self::Error> {
        let mut aggregate = AggregateQuery::all();
        if let Some(raw) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
            let statuses = raw
                .split(',')
                .map(|s| s.trim().parse::<OpportunityStatus>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(ApiError::bad_request)?;
            aggregate = aggregate.with_statuses(statuses);
        }
        if query.since.is_some() || query.until.is_some() {
            let start = query.since.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let end = query.until.unwrap_or(DateTime::<Utc>::MAX_UTC);
            if start >= end {
                return Err(ApiError::bad_request("since must be before until"));
            }
            aggregate = aggregate.within(TimeWindow::new(start, end));
        }
        Ok(aggregate)
    }
}

async fn get_savings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SavingsQuery>,
) -> ApiResult<impl IntoResponse> {
    let aggregate = AggregateQuery::try_from(query)?;
    Ok(Json(state.engine.aggregate(&aggregate).await))
}

async fn get_cost_allocation(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.ledger().cost_allocation().await)
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReportBody {
    /// Explicit window start; takes precedence over `kind`
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: Option<ReportKind>,
}

async fn post_report(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReportBody>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let period = match (body.since, body.kind) {
        (Some(since), _) if since > now => return Err(ApiError::bad_request("since is in the future")),
        (Some(since), _) => ReportPeriod::since(since, now),
        (None, Some(ReportKind::Monthly)) => ReportPeriod::month_to_date(now),
        (None, _) => ReportPeriod::weekly(now),
    };
    let report = state.engine.generate_report(period, now).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn list_reports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.ledger().reports().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/cycles/run", post(run_cycle))
        .route("/api/v1/opportunities", get(list_opportunities))
        .route("/api/v1/opportunities/:id", get(get_opportunity))
        .route("/api/v1/opportunities/:id/history", get(get_history))
        .route("/api/v1/opportunities/:id/approval", post(post_approval))
        .route("/api/v1/opportunities/:id/rollback", post(post_rollback))
        .route("/api/v1/proposals", get(list_proposals).post(post_proposal))
        .route("/api/v1/proposals/:id/implemented", post(post_implemented))
        .route("/api/v1/savings", get(get_savings))
        .route("/api/v1/cost-allocation", get(get_cost_allocation))
        .route("/api/v1/reports", get(list_reports).post(post_report))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
