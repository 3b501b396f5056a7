//! Metered charging: balance, daily quota and low credit alerts.

mod support;

use chrono::{Duration, Utc};
use outreach_ledger::application::{ChargeRequest, LedgerError};
use outreach_ledger::domain::{NotificationTemplate, UserRole, STARTER_PLAN};
use std::sync::Arc;
use support::{account_with, Harness};
use uuid::Uuid;

fn charge(user_id: Uuid, cost: i64) -> ChargeRequest {
    ChargeRequest {
        user_id,
        action_type: "reply_generation".to_string(),
        cost,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_charges_never_overspend() {
    let h = Harness::new();
    let account = account_with("race@example.com", STARTER_PLAN, 5);
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = Arc::new(h.metering(20));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let metering = metering.clone();
            tokio::spawn(async move { metering.charge(&charge(user_id, 5)).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientCredits { cost }) => assert_eq!(cost, 5),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 1);
    let stored = h.ledger.account(user_id).unwrap();
    assert_eq!(stored.credits, 0);
    assert_eq!(stored.total_spent, 5);
    assert_eq!(h.ledger.usage_history_len(user_id), 1);
}

#[tokio::test]
async fn test_first_charge_of_the_day_rolls_counters_over() {
    let h = Harness::new();
    let now = Utc::now();
    let mut account = account_with("daily@example.com", STARTER_PLAN, 100);
    account.daily_usage = 3;
    account.daily_usage_points = 9;
    account.last_usage_date = Some((now - Duration::days(1)).date_naive());
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = h.metering(20);

    let first = metering.charge_at(&charge(user_id, 2), now).await.unwrap();
    assert_eq!(first.daily_usage, 1);
    assert_eq!(first.daily_usage_points, 2);

    let second = metering.charge_at(&charge(user_id, 3), now).await.unwrap();
    assert_eq!(second.daily_usage, 2);
    assert_eq!(second.daily_usage_points, 5);
    assert_eq!(second.credits, 95);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_charges_reset_counters_once() {
    let h = Harness::new();
    let now = Utc::now();
    let mut account = account_with("morning@example.com", STARTER_PLAN, 100);
    account.daily_usage = 5;
    account.daily_usage_points = 19;
    account.last_usage_date = Some((now - Duration::days(1)).date_naive());
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = Arc::new(h.metering(20));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let metering = metering.clone();
            tokio::spawn(async move { metering.charge_at(&charge(user_id, 2), now).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = h.ledger.account(user_id).unwrap();
    assert_eq!(stored.daily_usage, 8);
    assert_eq!(stored.daily_usage_points, 16);
    assert_eq!(stored.credits, 84);
    assert_eq!(stored.last_usage_date, Some(now.date_naive()));
}

#[tokio::test]
async fn test_daily_quota_blocks_overflowing_charge() {
    let h = Harness::new();
    let now = Utc::now();
    let mut account = account_with("quota@example.com", "Pro", 100);
    account.daily_usage = 4;
    account.daily_usage_points = 8;
    account.last_usage_date = Some(now.date_naive());
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = h.metering(20);

    let result = metering.charge_at(&charge(user_id, 5), now).await;
    assert!(matches!(
        result,
        Err(LedgerError::QuotaExceeded {
            limit: 10,
            used: 8,
            cost: 5
        })
    ));
    assert_eq!(h.ledger.account(user_id).unwrap().credits, 100);

    let snapshot = metering.charge_at(&charge(user_id, 2), now).await.unwrap();
    assert_eq!(snapshot.daily_usage_points, 10);
    assert_eq!(snapshot.credits, 98);
}

#[tokio::test]
async fn test_custom_daily_limit_overrides_plan() {
    let h = Harness::new();
    let now = Utc::now();
    let mut account = account_with("custom@example.com", "Pro", 100);
    account.custom_daily_limit = Some(3);
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = h.metering(20);

    let result = metering.charge_at(&charge(user_id, 4), now).await;
    assert!(matches!(result, Err(LedgerError::QuotaExceeded { limit: 3, .. })));
}

#[tokio::test]
async fn test_admin_bypasses_balance_and_quota() {
    let h = Harness::new();
    let now = Utc::now();
    let mut account = account_with("admin@example.com", "Pro", 0);
    account.role = UserRole::Admin;
    account.daily_usage_points = 100;
    account.last_usage_date = Some(now.date_naive());
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = h.metering(20);

    let snapshot = metering.charge_at(&charge(user_id, 50), now).await.unwrap();

    assert_eq!(snapshot.credits, 0);
    assert_eq!(snapshot.daily_usage_points, 150);
    assert_eq!(h.notifier.count(NotificationTemplate::LowCreditsWarning), 0);
}

#[tokio::test]
async fn test_insufficient_balance_is_rejected() {
    let h = Harness::new();
    let account = account_with("poor@example.com", STARTER_PLAN, 2);
    let user_id = account.id;
    h.ledger.insert_account(account);

    let result = h.metering(20).charge(&charge(user_id, 3)).await;

    assert!(matches!(result, Err(LedgerError::InsufficientCredits { cost: 3 })));
    assert_eq!(h.ledger.account(user_id).unwrap().credits, 2);
}

#[tokio::test]
async fn test_low_credit_alert_is_sent_once() {
    let h = Harness::new();
    let account = account_with("low@example.com", STARTER_PLAN, 25);
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = h.metering(20);

    metering.charge(&charge(user_id, 10)).await.unwrap();
    metering.charge(&charge(user_id, 1)).await.unwrap();
    metering.charge(&charge(user_id, 1)).await.unwrap();

    assert_eq!(h.notifier.count(NotificationTemplate::LowCreditsWarning), 1);
    let (_, recipient, variables) = h
        .notifier
        .sent()
        .into_iter()
        .find(|(t, _, _)| *t == NotificationTemplate::LowCreditsWarning)
        .unwrap();
    assert_eq!(recipient, "low@example.com");
    assert_eq!(variables["credits"], 15);
    assert!(h.ledger.account(user_id).unwrap().low_credits_notified);
}

#[tokio::test]
async fn test_malformed_charges_are_rejected() {
    let h = Harness::new();
    let account = account_with("bad@example.com", STARTER_PLAN, 25);
    let user_id = account.id;
    h.ledger.insert_account(account);
    let metering = h.metering(20);

    let negative = metering.charge(&charge(user_id, -1)).await;
    assert!(matches!(negative, Err(LedgerError::InvalidRequest(_))));

    let blank = metering
        .charge(&ChargeRequest {
            user_id,
            action_type: "  ".to_string(),
            cost: 1,
        })
        .await;
    assert!(matches!(blank, Err(LedgerError::InvalidRequest(_))));

    let unknown = metering.charge(&charge(Uuid::new_v4(), 1)).await;
    assert!(matches!(unknown, Err(LedgerError::UserNotFound(_))));
}
