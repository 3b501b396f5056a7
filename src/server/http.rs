use super::http_auth::is_authorized;
use super::http_errors::map_ledger_error;
use super::http_parse::{
    parse_account_status, parse_billing_cycle, paypal_transmission, stripe_signature,
};
use super::http_types::{
    AccountResponse, AdjustCreditsBody, ChangePlanBody, ChargeBody, CreateAccountRequest,
    HealthResponse, RefundBody, RefundPolicyBody, RefundResponse, SetStatusBody, UsageResponse,
    WebhookAck,
};
use super::state::AppState;
use crate::application::{ChangePlanRequest, LedgerError};
use axum::{
    extract::{Path, State},
    http::{header::HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/stripe", post(stripe_webhook))
        .route("/webhooks/paypal", post(paypal_webhook))
        .route("/usage/charge", post(charge))
        .route("/accounts", post(create_account))
        .route("/accounts/:id/ledger", get(get_ledger))
        .route(
            "/accounts/:id/deletion",
            post(schedule_deletion).delete(cancel_deletion),
        )
        .route("/admin/refunds", post(admin_refund))
        .route("/admin/accounts/:id", axum::routing::delete(admin_delete_account))
        .route("/admin/accounts/:id/plan", post(admin_change_plan))
        .route("/admin/accounts/:id/credits", post(admin_adjust_credits))
        .route("/admin/accounts/:id/status", post(admin_set_status))
        .route(
            "/admin/refund-policy",
            get(get_refund_policy).put(put_refund_policy),
        )
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type JsonResponse = (StatusCode, Json<Value>);

fn error_response(err: &LedgerError) -> JsonResponse {
    let (status, body) = map_ledger_error(err);
    (status, Json(body))
}

fn unauthorized() -> JsonResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
}

fn bad_request(message: &str, allowed: &[&str]) -> JsonResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message, "allowed": allowed })),
    )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        stripe_webhook,
        paypal_webhook,
        charge,
        create_account,
        get_ledger,
        schedule_deletion,
        cancel_deletion,
        admin_refund,
        admin_change_plan,
        admin_adjust_credits,
        admin_set_status,
        admin_delete_account,
        get_refund_policy,
        put_refund_policy,
    ),
    components(
        schemas(
            HealthResponse,
            WebhookAck,
            ChargeBody,
            UsageResponse,
            CreateAccountRequest,
            AccountResponse,
            RefundBody,
            RefundResponse,
            ChangePlanBody,
            AdjustCreditsBody,
            SetStatusBody,
            RefundPolicyBody,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Webhooks", description = "Payment gateway callbacks"),
        (name = "Usage", description = "Metered credit consumption"),
        (name = "Accounts", description = "Ledger accounts"),
        (name = "Admin", description = "Admin console operations"),
    ),
    info(
        title = "Outreach Ledger API",
        version = "0.1.0",
        description = "Credit and subscription ledger",
        license(name = "MIT")
    )
)]
struct ApiDoc;

/// Health check endpoint
///
/// Verifies database connectivity and returns service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse)
    )
)]
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed: DB connectivity issue");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    error: Some("Database connectivity failed".to_string()),
                }),
            )
        }
    }
}

#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "Webhooks",
    request_body(content = String, description = "Raw Stripe event payload"),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Verification failed or malformed payload", body = Object),
        (status = 500, description = "Storage failure; Stripe will redeliver", body = Object)
    )
)]
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    match state
        .webhooks
        .handle_stripe(&body, stripe_signature(&headers))
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(json!(WebhookAck::from(&outcome)))),
        Err(e) => error_response(&e),
    }
}

#[utoipa::path(
    post,
    path = "/webhooks/paypal",
    tag = "Webhooks",
    request_body(content = String, description = "Raw PayPal event payload"),
    responses(
        (status = 200, description = "Event received", body = WebhookAck),
        (status = 400, description = "Verification failed or malformed payload", body = Object),
        (status = 502, description = "PayPal verification API unreachable", body = Object)
    )
)]
async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let transmission = paypal_transmission(&headers);
    match state.webhooks.handle_paypal(&body, &transmission).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(WebhookAck::from(&outcome)))),
        Err(e) => error_response(&e),
    }
}

/// Spend credits for one metered action
#[utoipa::path(
    post,
    path = "/usage/charge",
    tag = "Usage",
    request_body = ChargeBody,
    responses(
        (status = 200, description = "Charged", body = UsageResponse),
        (status = 401, description = "Missing or invalid service token", body = Object),
        (status = 402, description = "Insufficient credits", body = Object),
        (status = 404, description = "User not found", body = Object),
        (status = 429, description = "Daily limit reached", body = Object)
    )
)]
async fn charge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChargeBody>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.service_token) {
        return unauthorized();
    }

    match state.metering.charge(&body.into()).await {
        Ok(snapshot) => (StatusCode::OK, Json(json!(UsageResponse::from(snapshot)))),
        Err(e) => error_response(&e),
    }
}

/// Create the ledger record for a new signup
#[utoipa::path(
    post,
    path = "/accounts",
    tag = "Accounts",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 400, description = "Invalid or duplicate email", body = Object)
    )
)]
async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateAccountRequest>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.service_token) {
        return unauthorized();
    }

    match state.accounts.create_account(&req.email).await {
        Ok(account) => (
            StatusCode::CREATED,
            Json(json!(AccountResponse::from(account))),
        ),
        Err(e) => error_response(&e),
    }
}

/// Account, transactions in order, and usage counters
#[utoipa::path(
    get,
    path = "/accounts/{id}/ledger",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Ledger view", body = Object),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn get_ledger(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.service_token) {
        return unauthorized();
    }

    match state.accounts.get_ledger(user_id).await {
        Ok(view) => (StatusCode::OK, Json(json!(view))),
        Err(e) => error_response(&e),
    }
}

#[utoipa::path(
    post,
    path = "/accounts/{id}/deletion",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deletion scheduled", body = AccountResponse),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn schedule_deletion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.service_token) {
        return unauthorized();
    }

    match state.accounts.schedule_deletion(user_id, Utc::now()).await {
        Ok(account) => (StatusCode::OK, Json(json!(AccountResponse::from(account)))),
        Err(e) => error_response(&e),
    }
}

#[utoipa::path(
    delete,
    path = "/accounts/{id}/deletion",
    tag = "Accounts",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Deletion cancelled", body = AccountResponse),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn cancel_deletion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.service_token) {
        return unauthorized();
    }

    match state.accounts.cancel_deletion(user_id).await {
        Ok(account) => (StatusCode::OK, Json(json!(AccountResponse::from(account)))),
        Err(e) => error_response(&e),
    }
}

/// Refund a transaction
///
/// Outside the refund policy the response is 409 with `daysSince` and
/// `usagePercent`; re-issue with `force: true` to override.
#[utoipa::path(
    post,
    path = "/admin/refunds",
    tag = "Admin",
    request_body = RefundBody,
    responses(
        (status = 200, description = "Refunded", body = RefundResponse),
        (status = 404, description = "User or transaction not found", body = Object),
        (status = 409, description = "Refund outside policy", body = Object),
        (status = 502, description = "Gateway refund failed", body = Object)
    )
)]
async fn admin_refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RefundBody>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.admin_token) {
        return unauthorized();
    }

    match state.refunds.refund(&body.into()).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(RefundResponse::from(outcome)))),
        Err(e) => error_response(&e),
    }
}

#[utoipa::path(
    post,
    path = "/admin/accounts/{id}/plan",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = ChangePlanBody,
    responses(
        (status = 200, description = "Plan changed", body = AccountResponse),
        (status = 400, description = "Invalid billing cycle", body = Object),
        (status = 404, description = "User or plan not found", body = Object)
    )
)]
async fn admin_change_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(body): Json<ChangePlanBody>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.admin_token) {
        return unauthorized();
    }

    let Some(billing_cycle) = parse_billing_cycle(&body.billing_cycle) else {
        return bad_request("Invalid billing cycle", &["monthly", "yearly"]);
    };

    let request = ChangePlanRequest {
        plan_name: body.plan_name,
        billing_cycle,
        reset_credits: body.reset_credits,
    };

    match state.accounts.change_plan(user_id, &request).await {
        Ok(account) => (StatusCode::OK, Json(json!(AccountResponse::from(account)))),
        Err(e) => error_response(&e),
    }
}

#[utoipa::path(
    post,
    path = "/admin/accounts/{id}/credits",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = AdjustCreditsBody,
    responses(
        (status = 200, description = "Credits adjusted", body = AccountResponse),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn admin_adjust_credits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(body): Json<AdjustCreditsBody>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.admin_token) {
        return unauthorized();
    }

    match state
        .accounts
        .adjust_credits(user_id, body.delta, body.note)
        .await
    {
        Ok(account) => (StatusCode::OK, Json(json!(AccountResponse::from(account)))),
        Err(e) => error_response(&e),
    }
}

#[utoipa::path(
    post,
    path = "/admin/accounts/{id}/status",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = SetStatusBody,
    responses(
        (status = 200, description = "Status changed", body = AccountResponse),
        (status = 400, description = "Invalid status", body = Object),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn admin_set_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(body): Json<SetStatusBody>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.admin_token) {
        return unauthorized();
    }

    let Some(status) = parse_account_status(&body.status) else {
        return bad_request("Invalid status", &["Active", "Suspended", "Banned"]);
    };

    match state.accounts.set_status(user_id, status, body.message).await {
        Ok(account) => (StatusCode::OK, Json(json!(AccountResponse::from(account)))),
        Err(e) => error_response(&e),
    }
}

/// Delete an account and everything it owns, immediately
#[utoipa::path(
    delete,
    path = "/admin/accounts/{id}",
    tag = "Admin",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Account deleted", body = Object),
        (status = 404, description = "User not found", body = Object)
    )
)]
async fn admin_delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.admin_token) {
        return unauthorized();
    }

    match state.accounts.delete_account(user_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "deleted": user_id }))),
        Err(e) => error_response(&e),
    }
}

#[utoipa::path(
    get,
    path = "/admin/refund-policy",
    tag = "Admin",
    responses((status = 200, description = "Current refund policy", body = RefundPolicyBody))
)]
async fn get_refund_policy(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !is_authorized(&headers, &state.admin_token) {
        return unauthorized();
    }

    match state.catalog.refund_policy().await {
        Ok(policy) => (StatusCode::OK, Json(json!(RefundPolicyBody::from(policy)))),
        Err(e) => error_response(&LedgerError::from(e)),
    }
}

#[utoipa::path(
    put,
    path = "/admin/refund-policy",
    tag = "Admin",
    request_body = RefundPolicyBody,
    responses(
        (status = 200, description = "Policy saved", body = RefundPolicyBody),
        (status = 400, description = "Invalid policy", body = Object)
    )
)]
async fn put_refund_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RefundPolicyBody>,
) -> impl IntoResponse {
    if !is_authorized(&headers, &state.admin_token) {
        return unauthorized();
    }

    match state.catalog.update_refund_policy(body.into()).await {
        Ok(policy) => {
            info!(days = policy.days, "Refund policy changed by admin");
            (StatusCode::OK, Json(json!(RefundPolicyBody::from(policy))))
        }
        Err(e) => error_response(&e),
    }
}
