//! Axum REST API handlers.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use loan_protocol::{Context, Investment, InvestmentSummary, Loan, LoanProtocol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::errors::ApiError;

const DEFAULT_PAGE: usize = 1;
const DEFAULT_PAGE_SIZE: usize = 10;

pub struct ApiState {
    pub protocol: Arc<LoanProtocol>,
    pub request_timeout: Duration,
    /// Cancelled on shutdown; every request context is a child of it.
    pub shutdown: CancellationToken,
}

impl ApiState {
    fn context(&self) -> Context {
        Context::new(self.shutdown.child_token()).with_timeout(self.request_timeout)
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    let v1 = Router::new()
        .route("/loans", post(create_loan).get(list_loans))
        .route("/loans/:id", get(get_loan))
        .route("/loans/:id/approve", post(approve_loan))
        .route(
            "/loans/:id/investments",
            post(add_investment).get(get_investments),
        )
        .route("/loans/:id/disburse", post(disburse_loan));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", v1)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

/// Envelope wrapped around every `/api/v1` response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(status: StatusCode, message: &str, data: T) -> Self {
        Self {
            code: status.as_u16(),
            message: message.to_string(),
            data: Some(data),
        }
    }

    pub fn error(status: StatusCode, message: String) -> Self {
        Self {
            code: status.as_u16(),
            message,
            data: None,
        }
    }
}

#[derive(Serialize)]
pub struct PaginatedLoans {
    pub items: Vec<Loan>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateLoanRequest {
    pub borrower_id: String,
    pub principal_amount: Decimal,
    pub rate: Decimal,
    pub roi: Decimal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApproveLoanRequest {
    pub proof_picture_url: String,
    pub field_validator_id: String,
    pub approval_date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AddInvestmentRequest {
    pub investor_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DisburseLoanRequest {
    pub agreement_document_url: String,
    pub field_officer_id: String,
    pub disbursement_date: String,
}

/// Raw paging parameters; anything unusable falls back to the defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl ListQuery {
    fn resolve(&self) -> (usize, usize) {
        (
            positive_or(self.page.as_deref(), DEFAULT_PAGE),
            positive_or(self.page_size.as_deref(), DEFAULT_PAGE_SIZE),
        )
    }
}

fn positive_or(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

type ApiResult<T> = std::result::Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T: Serialize>(status: StatusCode, message: &str, data: T) -> ApiResult<T> {
    Ok((status, Json(ApiResponse::success(status, message, data))))
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(req)| req)
        .map_err(|_| ApiError::BadRequest("Invalid request body".to_string()))
}

fn parse_date(raw: &str, what: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!("Invalid {what} date format. Use YYYY-MM-DD"))
    })
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /api/v1/loans`
pub async fn create_loan(
    State(state): State<Arc<ApiState>>,
    payload: std::result::Result<Json<CreateLoanRequest>, JsonRejection>,
) -> ApiResult<Loan> {
    let req = body(payload)?;
    let loan = state
        .protocol
        .create_loan(
            &state.context(),
            &req.borrower_id,
            req.principal_amount,
            req.rate,
            req.roi,
        )
        .await?;
    ok(StatusCode::CREATED, "Loan created successfully", loan)
}

/// `GET /api/v1/loans/:id`
pub async fn get_loan(
    State(state): State<Arc<ApiState>>,
    Path(loan_id): Path<String>,
) -> ApiResult<Loan> {
    let loan = state.protocol.get_loan(&state.context(), &loan_id).await?;
    ok(StatusCode::OK, "Loan retrieved successfully", loan)
}

/// `GET /api/v1/loans?page=&page_size=`
pub async fn list_loans(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedLoans> {
    let (page, page_size) = query.resolve();
    let result = state
        .protocol
        .list_loans(&state.context(), page, page_size)
        .await?;
    ok(
        StatusCode::OK,
        "Loans retrieved successfully",
        PaginatedLoans {
            items: result.items,
            total: result.total,
            page,
            page_size,
        },
    )
}

/// `POST /api/v1/loans/:id/approve`
pub async fn approve_loan(
    State(state): State<Arc<ApiState>>,
    Path(loan_id): Path<String>,
    payload: std::result::Result<Json<ApproveLoanRequest>, JsonRejection>,
) -> ApiResult<Loan> {
    let req = body(payload)?;
    let approval_date = parse_date(&req.approval_date, "approval")?;
    let loan = state
        .protocol
        .approve_loan(
            &state.context(),
            &loan_id,
            &req.proof_picture_url,
            &req.field_validator_id,
            approval_date,
        )
        .await?;
    ok(StatusCode::OK, "Loan approved successfully", loan)
}

/// `POST /api/v1/loans/:id/investments`
pub async fn add_investment(
    State(state): State<Arc<ApiState>>,
    Path(loan_id): Path<String>,
    payload: std::result::Result<Json<AddInvestmentRequest>, JsonRejection>,
) -> ApiResult<Investment> {
    let req = body(payload)?;
    let investment = state
        .protocol
        .add_investment(&state.context(), &loan_id, &req.investor_id, req.amount)
        .await?;
    ok(StatusCode::CREATED, "Investment added successfully", investment)
}

/// `GET /api/v1/loans/:id/investments`
pub async fn get_investments(
    State(state): State<Arc<ApiState>>,
    Path(loan_id): Path<String>,
) -> ApiResult<InvestmentSummary> {
    let summary = state
        .protocol
        .investment_summary(&state.context(), &loan_id)
        .await?;
    ok(StatusCode::OK, "Investments retrieved successfully", summary)
}

/// `POST /api/v1/loans/:id/disburse`
pub async fn disburse_loan(
    State(state): State<Arc<ApiState>>,
    Path(loan_id): Path<String>,
    payload: std::result::Result<Json<DisburseLoanRequest>, JsonRejection>,
) -> ApiResult<Loan> {
    let req = body(payload)?;
    let disbursement_date = parse_date(&req.disbursement_date, "disbursement")?;
    let loan = state
        .protocol
        .disburse_loan(
            &state.context(),
            &loan_id,
            &req.agreement_document_url,
            &req.field_officer_id,
            disbursement_date,
        )
        .await?;
    ok(StatusCode::OK, "Loan disbursed successfully", loan)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Handler panicked: {detail}");

    let status = StatusCode::INTERNAL_SERVER_ERROR;
    (
        status,
        Json(ApiResponse::<()>::error(
            status,
            "Internal server error".to_string(),
        )),
    )
        .into_response()
}
