use crate::application::LedgerError;
use axum::http::StatusCode;
use tracing::error;

/// Status and JSON body for a failed ledger operation.
pub(super) fn map_ledger_error(err: &LedgerError) -> (StatusCode, serde_json::Value) {
    match err {
        LedgerError::UserNotFound(_) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "User not found" }),
        ),
        LedgerError::TransactionNotFound(id) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Transaction not found", "transactionId": id }),
        ),
        LedgerError::PlanNotFound(name) => (
            StatusCode::NOT_FOUND,
            serde_json::json!({ "error": "Plan not found", "plan": name }),
        ),
        LedgerError::InsufficientCredits { cost } => (
            StatusCode::PAYMENT_REQUIRED,
            serde_json::json!({
                "error": "InsufficientCredits",
                "message": err.to_string(),
                "cost": cost,
            }),
        ),
        LedgerError::QuotaExceeded { limit, used, cost } => (
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({
                "error": "QuotaExceeded",
                "message": err.to_string(),
                "limit": limit,
                "used": used,
                "cost": cost,
            }),
        ),
        LedgerError::PolicyViolation {
            days_since,
            usage_percent,
        } => (
            StatusCode::CONFLICT,
            serde_json::json!({
                "error": "PolicyViolation",
                "message": err.to_string(),
                "daysSince": days_since,
                "usagePercent": usage_percent,
            }),
        ),
        LedgerError::VerificationFailed(_) => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": "Webhook verification failed" }),
        ),
        LedgerError::InvalidRequest(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
        }
        LedgerError::GatewayUnavailable(_) => (
            StatusCode::BAD_GATEWAY,
            serde_json::json!({ "error": "Payment gateway unavailable, please retry" }),
        ),
        LedgerError::ConcurrentModification(_) | LedgerError::Repository(_) => {
            error!(error = %err, "Ledger operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": "Internal error" }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_violation_carries_remediation_data() {
        let (status, body) = map_ledger_error(&LedgerError::PolicyViolation {
            days_since: 12,
            usage_percent: 35.0,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["daysSince"], 12);
        assert_eq!(body["usagePercent"], 35.0);
    }

    #[test]
    fn metering_outcomes_are_distinct_statuses() {
        let (status, body) = map_ledger_error(&LedgerError::InsufficientCredits { cost: 3 });
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["cost"], 3);

        let (status, body) = map_ledger_error(&LedgerError::QuotaExceeded {
            limit: 10,
            used: 8,
            cost: 5,
        });
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["limit"], 10);
    }

    #[test]
    fn boundary_failures_map_to_4xx_and_502() {
        let (status, _) = map_ledger_error(&LedgerError::VerificationFailed("sig".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = map_ledger_error(&LedgerError::GatewayUnavailable("down".into()));
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = map_ledger_error(&LedgerError::UserNotFound("x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
