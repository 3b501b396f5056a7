//! Shared in-memory repositories and fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mockall::mock;
use outreach_ledger::{
    application::{
        AccountService, ActivationEngine, MeteringService, PlanCatalog, RefundService,
        RevocationEngine, SweepService, WebhookService,
    },
    domain::{
        BillingCycle, Gateway, LedgerAccount, Money, NotificationTemplate, PaymentSucceeded, Plan,
        RefundPolicy, Transaction, TransactionKind, UsageSnapshot, UsageStat, UserRole,
        STARTER_PLAN,
    },
    infrastructure::{
        AuditSink, CommitOutcome, GatewayClient, GatewayError, LedgerRepository, Notifier,
        PaypalWebhookVerifier, PlanRepository, RepositoryError, StripeWebhookVerifier,
        TracingAuditLog,
    },
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// In-memory ledger
// ============================================================================

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Uuid, LedgerAccount>,
    transactions: Vec<(Uuid, Transaction)>,
    usage_stats: HashMap<(Uuid, String), UsageStat>,
    usage_history: Vec<(Uuid, String, i64)>,
    dependents: HashMap<Uuid, usize>,
    failing: HashSet<Uuid>,
    cancel_after_listing: HashSet<Uuid>,
}

/// Mirrors the Postgres repository's atomicity with a single mutex.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    injected_conflicts: Arc<AtomicUsize>,
}

impl InMemoryLedger {
    pub fn insert_account(&self, account: LedgerAccount) {
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(account.id, account);
    }

    pub fn account(&self, id: Uuid) -> Option<LedgerAccount> {
        self.state.lock().unwrap().accounts.get(&id).cloned()
    }

    pub fn push_transaction(&self, user_id: Uuid, transaction: Transaction) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .push((user_id, transaction));
    }

    pub fn transactions(&self, user_id: Uuid) -> Vec<Transaction> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .map(|(_, tx)| tx.clone())
            .collect()
    }

    pub fn usage_history_len(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .usage_history
            .iter()
            .filter(|(owner, _, _)| *owner == user_id)
            .count()
    }

    /// Adds brand profile / history / tracking rows owned by `user_id`.
    pub fn add_dependents(&self, user_id: Uuid, count: usize) {
        *self
            .state
            .lock()
            .unwrap()
            .dependents
            .entry(user_id)
            .or_default() += count;
    }

    pub fn dependents(&self, user_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .dependents
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }

    /// Every write for `user_id` fails with a storage error.
    pub fn fail_writes_for(&self, user_id: Uuid) {
        self.state.lock().unwrap().failing.insert(user_id);
    }

    /// The user cancels their deletion right after the sweep lists it.
    pub fn cancel_deletion_after_listing(&self, user_id: Uuid) {
        self.state.lock().unwrap().cancel_after_listing.insert(user_id);
    }

    /// The next `count` commits lose to a simulated concurrent writer.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn create(&self, account: &LedgerAccount) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let email_taken = state
            .accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email));
        if email_taken || state.accounts.contains_key(&account.id) {
            return Err(RepositoryError::InvalidData(format!(
                "Account {} already exists",
                account.email
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<LedgerAccount, RepositoryError> {
        self.account(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", id)))
    }

    async fn get_by_email(&self, email: &str) -> Result<LedgerAccount, RepositoryError> {
        self.state
            .lock()
            .unwrap()
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", email)))
    }

    async fn get_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<LedgerAccount, RepositoryError> {
        let state = self.state.lock().unwrap();
        state
            .transactions
            .iter()
            .find(|(_, tx)| tx.id == transaction_id)
            .and_then(|(owner, _)| state.accounts.get(owner).cloned())
            .ok_or_else(|| RepositoryError::NotFound(format!("Transaction {}", transaction_id)))
    }

    async fn find_transaction(
        &self,
        user_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self
            .transactions(user_id)
            .into_iter()
            .find(|tx| tx.id == transaction_id))
    }

    async fn find_revocation(
        &self,
        user_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        Ok(self
            .transactions(user_id)
            .into_iter()
            .find(|tx| tx.reverses() == Some(transaction_id)))
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, RepositoryError> {
        Ok(self.transactions(user_id))
    }

    async fn list_usage_stats(&self, user_id: Uuid) -> Result<Vec<UsageStat>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut stats: Vec<UsageStat> = state
            .usage_stats
            .iter()
            .filter(|((owner, _), _)| *owner == user_id)
            .map(|(_, stat)| stat.clone())
            .collect();
        stats.sort_by(|a, b| a.action_type.cmp(&b.action_type));
        Ok(stats)
    }

    async fn commit(
        &self,
        account: &LedgerAccount,
        transaction: Option<&Transaction>,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut state = self.state.lock().unwrap();

        if state.failing.contains(&account.id) {
            return Err(RepositoryError::InvalidData(format!(
                "Write refused for {}",
                account.id
            )));
        }

        if let Some(entry) = transaction {
            let duplicate = state.transactions.iter().any(|(owner, tx)| {
                *owner == account.id
                    && (tx.id == entry.id
                        || (entry.reverses().is_some() && tx.reverses() == entry.reverses()))
            });
            if duplicate {
                return Ok(CommitOutcome::DuplicateTransaction);
            }
        }

        let Some(stored) = state.accounts.get_mut(&account.id) else {
            return Ok(CommitOutcome::VersionConflict);
        };

        if self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            stored.version += 1;
            return Ok(CommitOutcome::VersionConflict);
        }

        if stored.version != account.version {
            return Ok(CommitOutcome::VersionConflict);
        }

        let mut updated = account.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated;

        if let Some(entry) = transaction {
            state.transactions.push((account.id, entry.clone()));
        }

        Ok(CommitOutcome::Committed)
    }

    async fn charge(
        &self,
        user_id: Uuid,
        action_type: &str,
        cost: i64,
        today: NaiveDate,
    ) -> Result<Option<UsageSnapshot>, RepositoryError> {
        let mut state = self.state.lock().unwrap();

        let Some(account) = state.accounts.get_mut(&user_id) else {
            return Ok(None);
        };
        let is_admin = account.role == UserRole::Admin;
        if !is_admin && account.credits < cost {
            return Ok(None);
        }

        if account.last_usage_date != Some(today) {
            account.daily_usage = 0;
            account.daily_usage_points = 0;
        }
        if !is_admin {
            account.credits -= cost;
        }
        account.daily_usage += 1;
        account.daily_usage_points += cost;
        account.total_spent += cost;
        account.last_usage_date = Some(today);
        account.version += 1;

        let snapshot = UsageSnapshot {
            credits: account.credits,
            daily_usage: account.daily_usage,
            daily_usage_points: account.daily_usage_points,
        };

        let stat = state
            .usage_stats
            .entry((user_id, action_type.to_string()))
            .or_insert_with(|| UsageStat {
                action_type: action_type.to_string(),
                count: 0,
                cost: 0,
            });
        stat.count += 1;
        stat.cost += cost;
        state
            .usage_history
            .push((user_id, action_type.to_string(), cost));

        Ok(Some(snapshot))
    }

    async fn mark_low_credits_notified(&self, user_id: Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        match state.accounts.get_mut(&user_id) {
            Some(account) if !account.low_credits_notified => {
                account.low_credits_notified = true;
                account.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<LedgerAccount>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .values()
            .filter(|a| a.plan != STARTER_PLAN && a.subscription_end.map_or(false, |end| end < now))
            .cloned()
            .collect())
    }

    async fn list_due_deletions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerAccount>, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let due: Vec<LedgerAccount> = state
            .accounts
            .values()
            .filter(|a| a.deletion_scheduled_date.map_or(false, |date| date < now))
            .cloned()
            .collect();

        let cancelled: Vec<Uuid> = state.cancel_after_listing.drain().collect();
        for user_id in cancelled {
            if let Some(account) = state.accounts.get_mut(&user_id) {
                account.deletion_scheduled_date = None;
                account.version += 1;
            }
        }

        Ok(due)
    }

    async fn delete_cascade(&self, user_id: Uuid) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        Ok(remove_user(&mut state, user_id))
    }

    async fn delete_if_due(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&user_id) {
            return Err(RepositoryError::InvalidData(format!(
                "Delete refused for {}",
                user_id
            )));
        }

        let due = state
            .accounts
            .get(&user_id)
            .and_then(|a| a.deletion_scheduled_date)
            .map_or(false, |date| date < now);
        if !due {
            return Ok(false);
        }
        Ok(remove_user(&mut state, user_id))
    }
}

fn remove_user(state: &mut LedgerState, user_id: Uuid) -> bool {
    state.dependents.remove(&user_id);
    state.usage_history.retain(|(owner, _, _)| *owner != user_id);
    state.usage_stats.retain(|(owner, _), _| *owner != user_id);
    state.transactions.retain(|(owner, _)| *owner != user_id);
    state.accounts.remove(&user_id).is_some()
}

// ============================================================================
// In-memory plan catalog
// ============================================================================

#[derive(Default)]
pub struct InMemoryPlans {
    plans: Mutex<Vec<Plan>>,
    policy: Mutex<Option<RefundPolicy>>,
    list_calls: AtomicUsize,
}

impl InMemoryPlans {
    pub fn with_plans(plans: Vec<Plan>) -> Self {
        Self {
            plans: Mutex::new(plans),
            ..Default::default()
        }
    }

    pub fn replace_plans(&self, plans: Vec<Plan>) {
        *self.plans.lock().unwrap() = plans;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlans {
    async fn list_plans(&self) -> Result<Vec<Plan>, RepositoryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plans.lock().unwrap().clone())
    }

    async fn get_refund_policy(&self) -> Result<Option<RefundPolicy>, RepositoryError> {
        Ok(*self.policy.lock().unwrap())
    }

    async fn save_refund_policy(&self, policy: &RefundPolicy) -> Result<(), RepositoryError> {
        *self.policy.lock().unwrap() = Some(*policy);
        Ok(())
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Records every notification instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationTemplate, String, serde_json::Value)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(NotificationTemplate, String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, template: NotificationTemplate) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| *t == template)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        template: NotificationTemplate,
        recipient: &str,
        variables: serde_json::Value,
    ) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((template, recipient.to_string(), variables));
        true
    }
}

mock! {
    pub PaymentGateway {}

    #[async_trait]
    impl GatewayClient for PaymentGateway {
        async fn refund_payment(
            &self,
            gateway: Gateway,
            transaction_id: &str,
            amount: &Money,
        ) -> Result<String, GatewayError>;
    }
}

mock! {
    pub Mailer {}

    #[async_trait]
    impl Notifier for Mailer {
        async fn notify(
            &self,
            template: NotificationTemplate,
            recipient: &str,
            variables: serde_json::Value,
        ) -> bool;
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn starter_plan() -> Plan {
    Plan {
        id: "starter".to_string(),
        name: STARTER_PLAN.to_string(),
        monthly_price: 0,
        yearly_price: 0,
        credits: 50,
        daily_limit_monthly: 20,
        daily_limit_yearly: 20,
        max_accounts: 1,
        allow_images: false,
        allow_tracking: false,
        purchase_enabled: false,
    }
}

pub fn pro_plan() -> Plan {
    Plan {
        id: "pro".to_string(),
        name: "Pro".to_string(),
        monthly_price: 1900,
        yearly_price: 19000,
        credits: 500,
        daily_limit_monthly: 10,
        daily_limit_yearly: 40,
        max_accounts: 3,
        allow_images: true,
        allow_tracking: true,
        purchase_enabled: true,
    }
}

pub fn account_with(email: &str, plan: &str, credits: i64) -> LedgerAccount {
    let mut account = LedgerAccount::new(email.to_string(), 0);
    account.plan = plan.to_string();
    account.credits = credits;
    account
}

pub fn payment_tx(id: &str, credits_added: i64, previous: i64, at: DateTime<Utc>) -> Transaction {
    let mut tx = Transaction::record(
        id,
        TransactionKind::Payment {
            gateway: Gateway::Stripe,
            paid: Money::new(1900, "USD"),
        },
        "Pro",
        previous,
        previous + credits_added,
        "Pro plan (monthly)",
    );
    tx.date = at;
    tx
}

pub fn pro_payment(email: &str, transaction_id: &str, cycle: BillingCycle) -> PaymentSucceeded {
    PaymentSucceeded {
        gateway: Gateway::Stripe,
        email: email.to_string(),
        plan_name: "Pro".to_string(),
        billing_cycle: cycle,
        transaction_id: transaction_id.to_string(),
        paid: Money::new(1900, "USD"),
        credits_override: None,
    }
}

/// Services wired over the in-memory repositories.
pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub plans: Arc<InMemoryPlans>,
    pub catalog: Arc<PlanCatalog<InMemoryPlans>>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<dyn AuditSink>,
    pub activation: Arc<ActivationEngine<InMemoryLedger, InMemoryPlans>>,
    pub revocation: Arc<RevocationEngine<InMemoryLedger>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(RecordingNotifier::default()))
    }

    pub fn with_notifier(notifier: Arc<RecordingNotifier>) -> Self {
        let ledger = Arc::new(InMemoryLedger::default());
        let plans = Arc::new(InMemoryPlans::with_plans(vec![starter_plan(), pro_plan()]));
        let catalog = Arc::new(PlanCatalog::new(plans.clone()));
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditLog);
        let sink: Arc<dyn Notifier> = notifier.clone();

        let activation = Arc::new(ActivationEngine::new(
            ledger.clone(),
            catalog.clone(),
            sink.clone(),
            audit.clone(),
        ));
        let revocation = Arc::new(RevocationEngine::new(ledger.clone(), sink, audit.clone()));

        Self {
            ledger,
            plans,
            catalog,
            notifier,
            audit,
            activation,
            revocation,
        }
    }

    fn sink(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn metering(&self, low_credits_threshold: i64) -> MeteringService<InMemoryLedger, InMemoryPlans> {
        MeteringService::new(
            self.ledger.clone(),
            self.catalog.clone(),
            self.sink(),
            low_credits_threshold,
        )
    }

    pub fn accounts(&self) -> AccountService<InMemoryLedger, InMemoryPlans> {
        AccountService::new(
            self.ledger.clone(),
            self.catalog.clone(),
            self.audit.clone(),
            50,
            chrono::Duration::days(14),
        )
    }

    pub fn refunds(&self, gateway: Arc<dyn GatewayClient>) -> RefundService<InMemoryLedger, InMemoryPlans> {
        RefundService::new(
            self.ledger.clone(),
            self.catalog.clone(),
            self.revocation.clone(),
            gateway,
            self.audit.clone(),
        )
    }

    pub fn sweep(&self, interval: chrono::Duration) -> SweepService<InMemoryLedger> {
        SweepService::new(self.ledger.clone(), self.sink(), self.audit.clone(), interval)
    }

    pub fn webhooks(&self, stripe_secret: &str) -> WebhookService<InMemoryLedger, InMemoryPlans> {
        WebhookService::new(
            self.activation.clone(),
            self.revocation.clone(),
            StripeWebhookVerifier::new(stripe_secret.to_string(), 300, false),
            PaypalWebhookVerifier::new(None, true),
            self.audit.clone(),
        )
    }
}
