use crate::domain::{AccountStatus, BillingCycle};
use crate::infrastructure::PaypalTransmission;
use axum::http::HeaderMap;
use std::str::FromStr;

pub(super) fn parse_billing_cycle(cycle: &str) -> Option<BillingCycle> {
    BillingCycle::from_str(&cycle.to_ascii_lowercase()).ok()
}

pub(super) fn parse_account_status(status: &str) -> Option<AccountStatus> {
    match status.to_ascii_lowercase().as_str() {
        "active" => Some(AccountStatus::Active),
        "suspended" => Some(AccountStatus::Suspended),
        "banned" => Some(AccountStatus::Banned),
        _ => None,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub(super) fn stripe_signature(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "stripe-signature")
}

pub(super) fn paypal_transmission(headers: &HeaderMap) -> PaypalTransmission {
    let get = |name: &str| header_str(headers, name).unwrap_or_default().to_string();

    PaypalTransmission {
        transmission_id: get("paypal-transmission-id"),
        transmission_time: get("paypal-transmission-time"),
        transmission_sig: get("paypal-transmission-sig"),
        cert_url: get("paypal-cert-url"),
        auth_algo: get("paypal-auth-algo"),
    }
}
