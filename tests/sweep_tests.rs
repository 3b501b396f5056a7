//! Periodic sweep: subscription expiry and scheduled deletions.

mod support;

use chrono::{Duration, Utc};
use outreach_ledger::application::SweepReport;
use outreach_ledger::domain::{NotificationTemplate, TransactionKind, STARTER_PLAN};
use support::{account_with, payment_tx, Harness};

#[tokio::test]
async fn test_due_deletion_removes_account_and_dependents() {
    let h = Harness::new();
    let now = Utc::now();

    let mut doomed = account_with("doomed@example.com", STARTER_PLAN, 10);
    doomed.deletion_scheduled_date = Some(now - Duration::minutes(1));
    let doomed_id = doomed.id;
    h.ledger.insert_account(doomed);
    h.ledger.add_dependents(doomed_id, 3);
    h.ledger
        .push_transaction(doomed_id, payment_tx("pi_doomed", 500, 0, now - Duration::days(40)));

    let mut pending = account_with("pending@example.com", STARTER_PLAN, 10);
    pending.deletion_scheduled_date = Some(now + Duration::days(3));
    let pending_id = pending.id;
    h.ledger.insert_account(pending);

    let sweep = h.sweep(Duration::hours(1));
    let report = sweep.sweep(now).await;

    assert_eq!(
        report,
        SweepReport {
            expired: 0,
            deleted: 1,
            failures: 0
        }
    );
    assert!(h.ledger.account(doomed_id).is_none());
    assert_eq!(h.ledger.dependents(doomed_id), 0);
    assert!(h.ledger.transactions(doomed_id).is_empty());
    assert!(h.ledger.account(pending_id).is_some());

    let again = sweep.sweep(now).await;
    assert_eq!(again, SweepReport::default());
}

#[tokio::test]
async fn test_lapsed_paid_plan_drops_to_starter() {
    let h = Harness::new();
    let now = Utc::now();

    let mut lapsed = account_with("lapsed@example.com", "Pro", 320);
    lapsed.subscription_end = Some(now - Duration::hours(1));
    lapsed.daily_usage_points = 7;
    let lapsed_id = lapsed.id;
    h.ledger.insert_account(lapsed);

    let mut active = account_with("active@example.com", "Pro", 320);
    active.subscription_end = Some(now + Duration::days(5));
    let active_id = active.id;
    h.ledger.insert_account(active);

    let sweep = h.sweep(Duration::hours(1));
    let report = sweep.sweep(now).await;
    assert_eq!(report.expired, 1);

    let stored = h.ledger.account(lapsed_id).unwrap();
    assert_eq!(stored.plan, STARTER_PLAN);
    assert_eq!(stored.credits, 320);
    assert_eq!(stored.daily_usage_points, 0);

    let ledger = h.ledger.transactions(lapsed_id);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].kind, TransactionKind::PlanExpired);
    assert_eq!(ledger[0].credits_added, 0);
    assert!(ledger[0].id.starts_with("EXP-"));

    assert_eq!(h.ledger.account(active_id).unwrap().plan, "Pro");
    assert_eq!(h.notifier.count(NotificationTemplate::PlanExpiredNotice), 1);

    let again = sweep.sweep(now + Duration::minutes(1)).await;
    assert_eq!(again.expired, 0);
    assert_eq!(h.ledger.transactions(lapsed_id).len(), 1);
}

#[tokio::test]
async fn test_expiry_survives_a_concurrent_write() {
    let h = Harness::new();
    let now = Utc::now();

    let mut lapsed = account_with("contended@example.com", "Pro", 10);
    lapsed.subscription_end = Some(now - Duration::days(1));
    let lapsed_id = lapsed.id;
    h.ledger.insert_account(lapsed);
    h.ledger.inject_conflicts(1);

    let report = h.sweep(Duration::hours(1)).sweep(now).await;

    assert_eq!(report.expired, 1);
    assert_eq!(h.ledger.account(lapsed_id).unwrap().plan, STARTER_PLAN);
}

#[tokio::test]
async fn test_sweep_is_debounced() {
    let h = Harness::new();
    let now = Utc::now();
    let sweep = h.sweep(Duration::hours(1));

    assert!(sweep.sweep_if_due(now).await.is_some());
    assert!(sweep
        .sweep_if_due(now + Duration::minutes(10))
        .await
        .is_none());
    assert!(sweep
        .sweep_if_due(now + Duration::minutes(61))
        .await
        .is_some());
}

#[tokio::test]
async fn test_cancelled_deletion_survives_an_inflight_sweep() {
    let h = Harness::new();
    let now = Utc::now();

    let mut changed_mind = account_with("stay@example.com", STARTER_PLAN, 10);
    changed_mind.deletion_scheduled_date = Some(now - Duration::minutes(5));
    let user_id = changed_mind.id;
    h.ledger.insert_account(changed_mind);
    h.ledger.add_dependents(user_id, 2);
    h.ledger.cancel_deletion_after_listing(user_id);

    let report = h.sweep(Duration::hours(1)).sweep(now).await;

    assert_eq!(report.deleted, 0);
    assert_eq!(report.failures, 0);
    let stored = h.ledger.account(user_id).unwrap();
    assert!(stored.deletion_scheduled_date.is_none());
    assert_eq!(h.ledger.dependents(user_id), 2);
}

#[tokio::test]
async fn test_one_failing_account_does_not_stop_the_sweep() {
    let h = Harness::new();
    let now = Utc::now();

    let mut broken = account_with("broken@example.com", "Pro", 50);
    broken.subscription_end = Some(now - Duration::days(1));
    let broken_id = broken.id;
    h.ledger.insert_account(broken);
    h.ledger.fail_writes_for(broken_id);

    let mut lapsed = account_with("fine@example.com", "Pro", 50);
    lapsed.subscription_end = Some(now - Duration::days(1));
    let lapsed_id = lapsed.id;
    h.ledger.insert_account(lapsed);

    let mut stuck = account_with("stuck@example.com", STARTER_PLAN, 10);
    stuck.deletion_scheduled_date = Some(now - Duration::minutes(1));
    let stuck_id = stuck.id;
    h.ledger.insert_account(stuck);
    h.ledger.fail_writes_for(stuck_id);

    let mut doomed = account_with("doomed2@example.com", STARTER_PLAN, 10);
    doomed.deletion_scheduled_date = Some(now - Duration::minutes(1));
    let doomed_id = doomed.id;
    h.ledger.insert_account(doomed);

    let report = h.sweep(Duration::hours(1)).sweep(now).await;

    assert_eq!(
        report,
        SweepReport {
            expired: 1,
            deleted: 1,
            failures: 2
        }
    );
    assert_eq!(h.ledger.account(broken_id).unwrap().plan, "Pro");
    assert_eq!(h.ledger.account(lapsed_id).unwrap().plan, STARTER_PLAN);
    assert!(h.ledger.account(stuck_id).is_some());
    assert!(h.ledger.account(doomed_id).is_none());
}
