use crate::domain::{
    AccountStatus, BillingCycle, Gateway, LedgerAccount, Money, Plan, RefundPolicy,
    RevocationReason, Transaction, TransactionKind, UsageSnapshot, UsageStat, UserRole,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result of a version-checked ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The record changed since it was read; nothing was written.
    VersionConflict,
    /// The transaction id (or the payment it reverses) is already on the ledger.
    DuplicateTransaction,
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    #[must_use]
    async fn create(&self, account: &LedgerAccount) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_id(&self, id: Uuid) -> Result<LedgerAccount, RepositoryError>;
    #[must_use]
    async fn get_by_email(&self, email: &str) -> Result<LedgerAccount, RepositoryError>;
    /// Owner of a ledger transaction id.
    #[must_use]
    async fn get_by_transaction(&self, transaction_id: &str)
        -> Result<LedgerAccount, RepositoryError>;
    #[must_use]
    async fn find_transaction(
        &self,
        user_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError>;
    /// Revocation entry that reverses `transaction_id`, if any.
    #[must_use]
    async fn find_revocation(
        &self,
        user_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError>;
    /// Transactions in insertion order.
    #[must_use]
    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, RepositoryError>;
    #[must_use]
    async fn list_usage_stats(&self, user_id: Uuid) -> Result<Vec<UsageStat>, RepositoryError>;
    /// Writes the mutable fields of `account` if its stored version still equals
    /// `account.version`, appending `transaction` in the same unit of work.
    #[must_use]
    async fn commit(
        &self,
        account: &LedgerAccount,
        transaction: Option<&Transaction>,
    ) -> Result<CommitOutcome, RepositoryError>;
    /// Single conditional update charging `cost` for one action.
    ///
    /// Applies only while `role = admin OR credits >= cost` holds at write
    /// time; returns `None` when no record matched.
    #[must_use]
    async fn charge(
        &self,
        user_id: Uuid,
        action_type: &str,
        cost: i64,
        today: NaiveDate,
    ) -> Result<Option<UsageSnapshot>, RepositoryError>;
    /// Flips `low_credits_notified` from false to true; `true` if this call flipped it.
    #[must_use]
    async fn mark_low_credits_notified(&self, user_id: Uuid) -> Result<bool, RepositoryError>;
    /// Paid (non-Starter) accounts whose window ended before `now`.
    #[must_use]
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<LedgerAccount>, RepositoryError>;
    #[must_use]
    async fn list_due_deletions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerAccount>, RepositoryError>;
    /// Deletes dependent records, then the account. `false` if it was already gone.
    #[must_use]
    async fn delete_cascade(&self, user_id: Uuid) -> Result<bool, RepositoryError>;
    /// Cascade delete that only runs while the deletion is still scheduled
    /// before `now`. `false` if it was cancelled, rescheduled or already gone.
    #[must_use]
    async fn delete_if_due(&self, user_id: Uuid, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait PlanRepository: Send + Sync {
    #[must_use]
    async fn list_plans(&self) -> Result<Vec<Plan>, RepositoryError>;
    #[must_use]
    async fn get_refund_policy(&self) -> Result<Option<RefundPolicy>, RepositoryError>;
    #[must_use]
    async fn save_refund_policy(&self, policy: &RefundPolicy) -> Result<(), RepositoryError>;
}

const ACCOUNT_COLUMNS: &str = r#"
    id, email, role, plan, billing_cycle, credits, custom_daily_limit,
    daily_usage, daily_usage_points, last_usage_date, subscription_start,
    subscription_end, auto_renew, status, status_message, deletion_scheduled_date,
    low_credits_notified, total_spent, version, created_at, updated_at
"#;

const TRANSACTION_COLUMNS: &str = r#"
    transaction_id, kind, created_at, amount_minor, currency, description,
    sub_description, credits_added, previous_balance, final_balance, plan_name,
    gateway, reason, reverses_transaction_id
"#;

/// Tables owned by an account, in deletion order.
const DEPENDENT_TABLES: [&str; 7] = [
    "brand_profiles",
    "reply_history",
    "post_history",
    "tracking_links",
    "usage_history",
    "usage_stats",
    "ledger_transactions",
];

pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_account(
        &self,
        filter: &str,
        value: impl for<'q> sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres> + Send + 'static,
        label: &str,
    ) -> Result<LedgerAccount, RepositoryError> {
        let sql = format!("SELECT {} FROM ledger_users WHERE {}", ACCOUNT_COLUMNS, filter);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => RepositoryError::NotFound(format!("Account {}", label)),
                _ => RepositoryError::DatabaseError(e),
            })?;

        row_to_account(&row)
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn create(&self, account: &LedgerAccount) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_users (id, email, role, plan, billing_cycle, credits, custom_daily_limit,
                                      daily_usage, daily_usage_points, last_usage_date, subscription_start,
                                      subscription_end, auto_renew, status, status_message,
                                      deletion_scheduled_date, low_credits_notified, total_spent,
                                      version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            "#,
        )
        .bind(account.id)
        .bind(&account.email)
        .bind(account.role.to_string())
        .bind(&account.plan)
        .bind(account.billing_cycle.to_string())
        .bind(account.credits)
        .bind(account.custom_daily_limit)
        .bind(account.daily_usage)
        .bind(account.daily_usage_points)
        .bind(account.last_usage_date)
        .bind(account.subscription_start)
        .bind(account.subscription_end)
        .bind(account.auto_renew)
        .bind(account.status.to_string())
        .bind(&account.status_message)
        .bind(account.deletion_scheduled_date)
        .bind(account.low_credits_notified)
        .bind(account.total_spent)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return RepositoryError::InvalidData(format!(
                        "Account {} already exists",
                        account.email
                    ));
                }
            }
            RepositoryError::DatabaseError(e)
        })?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<LedgerAccount, RepositoryError> {
        self.fetch_account("id = $1", id, &id.to_string()).await
    }

    async fn get_by_email(&self, email: &str) -> Result<LedgerAccount, RepositoryError> {
        self.fetch_account("LOWER(email) = LOWER($1)", email.to_string(), email)
            .await
    }

    async fn get_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<LedgerAccount, RepositoryError> {
        self.fetch_account(
            "id = (SELECT user_id FROM ledger_transactions WHERE transaction_id = $1 ORDER BY seq LIMIT 1)",
            transaction_id.to_string(),
            &format!("owning transaction {}", transaction_id),
        )
        .await
    }

    async fn find_transaction(
        &self,
        user_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM ledger_transactions WHERE user_id = $1 AND transaction_id = $2",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn find_revocation(
        &self,
        user_id: Uuid,
        transaction_id: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM ledger_transactions WHERE user_id = $1 AND reverses_transaction_id = $2",
            TRANSACTION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<Transaction>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM ledger_transactions WHERE user_id = $1 ORDER BY seq ASC",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_transaction).collect()
    }

    async fn list_usage_stats(&self, user_id: Uuid) -> Result<Vec<UsageStat>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT action_type, count, cost
            FROM usage_stats
            WHERE user_id = $1
            ORDER BY action_type
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<UsageStat, RepositoryError> {
                Ok(UsageStat {
                    action_type: row.try_get("action_type")?,
                    count: row.try_get("count")?,
                    cost: row.try_get("cost")?,
                })
            })
            .collect()
    }

    async fn commit(
        &self,
        account: &LedgerAccount,
        transaction: Option<&Transaction>,
    ) -> Result<CommitOutcome, RepositoryError> {
        let mut db_tx = self.pool.begin().await?;

        if let Some(entry) = transaction {
            let columns = KindColumns::from(&entry.kind);
            let inserted = sqlx::query(
                r#"
                INSERT INTO ledger_transactions (user_id, transaction_id, kind, created_at, amount_minor,
                                                 currency, description, sub_description, credits_added,
                                                 previous_balance, final_balance, plan_name, gateway,
                                                 reason, reverses_transaction_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(account.id)
            .bind(&entry.id)
            .bind(entry.kind.type_name())
            .bind(entry.date)
            .bind(columns.amount_minor)
            .bind(columns.currency)
            .bind(&entry.description)
            .bind(&entry.sub_description)
            .bind(entry.credits_added)
            .bind(entry.previous_balance)
            .bind(entry.final_balance)
            .bind(&entry.plan_name)
            .bind(columns.gateway)
            .bind(columns.reason)
            .bind(columns.reverses)
            .execute(&mut *db_tx)
            .await?;

            if inserted.rows_affected() == 0 {
                db_tx.rollback().await?;
                return Ok(CommitOutcome::DuplicateTransaction);
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE ledger_users
            SET plan = $3, billing_cycle = $4, credits = $5, custom_daily_limit = $6,
                daily_usage = $7, daily_usage_points = $8, last_usage_date = $9,
                subscription_start = $10, subscription_end = $11, auto_renew = $12,
                status = $13, status_message = $14, deletion_scheduled_date = $15,
                low_credits_notified = $16, role = $17,
                version = version + 1, updated_at = $18
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(account.id)
        .bind(account.version)
        .bind(&account.plan)
        .bind(account.billing_cycle.to_string())
        .bind(account.credits)
        .bind(account.custom_daily_limit)
        .bind(account.daily_usage)
        .bind(account.daily_usage_points)
        .bind(account.last_usage_date)
        .bind(account.subscription_start)
        .bind(account.subscription_end)
        .bind(account.auto_renew)
        .bind(account.status.to_string())
        .bind(&account.status_message)
        .bind(account.deletion_scheduled_date)
        .bind(account.low_credits_notified)
        .bind(account.role.to_string())
        .bind(Utc::now())
        .execute(&mut *db_tx)
        .await?;

        if updated.rows_affected() == 0 {
            db_tx.rollback().await?;
            return Ok(CommitOutcome::VersionConflict);
        }

        db_tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }

    async fn charge(
        &self,
        user_id: Uuid,
        action_type: &str,
        cost: i64,
        today: NaiveDate,
    ) -> Result<Option<UsageSnapshot>, RepositoryError> {
        let mut db_tx = self.pool.begin().await?;

        // Rollover and the balance re-check happen inside this one statement.
        let row = sqlx::query(
            r#"
            UPDATE ledger_users
            SET credits = credits - CASE WHEN role = 'admin' THEN 0 ELSE $2 END,
                daily_usage = CASE WHEN last_usage_date = $3 THEN daily_usage + 1 ELSE 1 END,
                daily_usage_points = CASE WHEN last_usage_date = $3 THEN daily_usage_points + $2 ELSE $2 END,
                total_spent = total_spent + $2,
                last_usage_date = $3,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
              AND (role = 'admin' OR credits >= $2)
            RETURNING credits, daily_usage, daily_usage_points
            "#,
        )
        .bind(user_id)
        .bind(cost)
        .bind(today)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Ok(None);
        };

        let snapshot = UsageSnapshot {
            credits: row.try_get("credits")?,
            daily_usage: row.try_get("daily_usage")?,
            daily_usage_points: row.try_get("daily_usage_points")?,
        };

        sqlx::query(
            r#"
            INSERT INTO usage_stats (user_id, action_type, count, cost)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (user_id, action_type)
            DO UPDATE SET count = usage_stats.count + 1, cost = usage_stats.cost + EXCLUDED.cost
            "#,
        )
        .bind(user_id)
        .bind(action_type)
        .bind(cost)
        .execute(&mut *db_tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO usage_history (user_id, created_at, action_type, cost)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .bind(action_type)
        .bind(cost)
        .execute(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        Ok(Some(snapshot))
    }

    async fn mark_low_credits_notified(&self, user_id: Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE ledger_users
            SET low_credits_notified = TRUE, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND low_credits_notified = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<LedgerAccount>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {} FROM ledger_users
            WHERE plan <> 'Starter'
              AND subscription_end IS NOT NULL
              AND subscription_end < $1
            "#,
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn list_due_deletions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerAccount>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {} FROM ledger_users
            WHERE deletion_scheduled_date IS NOT NULL
              AND deletion_scheduled_date < $1
            "#,
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn delete_cascade(&self, user_id: Uuid) -> Result<bool, RepositoryError> {
        let mut db_tx = self.pool.begin().await?;
        let deleted = delete_user_rows(&mut db_tx, user_id).await?;
        db_tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_if_due(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut db_tx = self.pool.begin().await?;

        // Row lock holds off a concurrent cancel until the cascade commits.
        let due = sqlx::query(
            r#"
            SELECT id FROM ledger_users
            WHERE id = $1
              AND deletion_scheduled_date IS NOT NULL
              AND deletion_scheduled_date < $2
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_optional(&mut *db_tx)
        .await?;

        if due.is_none() {
            db_tx.rollback().await?;
            return Ok(false);
        }

        let deleted = delete_user_rows(&mut db_tx, user_id).await?;
        db_tx.commit().await?;
        Ok(deleted)
    }
}

async fn delete_user_rows(
    db_tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<bool, RepositoryError> {
    for table in DEPENDENT_TABLES {
        let sql = format!("DELETE FROM {} WHERE user_id = $1", table);
        sqlx::query(&sql).bind(user_id).execute(&mut **db_tx).await?;
    }

    let deleted = sqlx::query("DELETE FROM ledger_users WHERE id = $1")
        .bind(user_id)
        .execute(&mut **db_tx)
        .await?;

    Ok(deleted.rows_affected() > 0)
}

/// Kind-specific transaction columns.
struct KindColumns {
    gateway: Option<String>,
    amount_minor: Option<i64>,
    currency: Option<String>,
    reason: Option<String>,
    reverses: Option<String>,
}

impl From<&TransactionKind> for KindColumns {
    fn from(kind: &TransactionKind) -> Self {
        let mut columns = KindColumns {
            gateway: kind.gateway().map(|g| g.to_string()),
            amount_minor: None,
            currency: None,
            reason: None,
            reverses: None,
        };

        match kind {
            TransactionKind::Payment { paid, .. } | TransactionKind::MonthlyRenewal { paid } => {
                columns.amount_minor = Some(paid.amount_minor);
                columns.currency = Some(paid.currency.clone());
            }
            TransactionKind::PlanRevoked {
                reason, reverses, ..
            } => {
                columns.reason = Some(reason.to_string());
                columns.reverses = Some(reverses.clone());
            }
            _ => {}
        }

        columns
    }
}

fn parse_column<T: FromStr>(value: &str, what: &str) -> Result<T, RepositoryError> {
    T::from_str(value).map_err(|_| RepositoryError::InvalidData(format!("Unknown {}: {}", what, value)))
}

fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<LedgerAccount, RepositoryError> {
    let role: String = row.try_get("role")?;
    let cycle: String = row.try_get("billing_cycle")?;
    let status: String = row.try_get("status")?;

    Ok(LedgerAccount {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        role: parse_column::<UserRole>(&role, "role")?,
        plan: row.try_get("plan")?,
        billing_cycle: parse_column::<BillingCycle>(&cycle, "billing cycle")?,
        credits: row.try_get("credits")?,
        custom_daily_limit: row.try_get("custom_daily_limit")?,
        daily_usage: row.try_get("daily_usage")?,
        daily_usage_points: row.try_get("daily_usage_points")?,
        last_usage_date: row.try_get("last_usage_date")?,
        subscription_start: row.try_get("subscription_start")?,
        subscription_end: row.try_get("subscription_end")?,
        auto_renew: row.try_get("auto_renew")?,
        status: parse_column::<AccountStatus>(&status, "status")?,
        status_message: row.try_get("status_message")?,
        deletion_scheduled_date: row.try_get("deletion_scheduled_date")?,
        low_credits_notified: row.try_get("low_credits_notified")?,
        total_spent: row.try_get("total_spent")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, RepositoryError> {
    let kind_str: String = row.try_get("kind")?;
    let gateway: Option<String> = row.try_get("gateway")?;
    let gateway = gateway
        .as_deref()
        .map(|g| parse_column::<Gateway>(g, "gateway"))
        .transpose()?;
    let amount_minor: Option<i64> = row.try_get("amount_minor")?;
    let currency: Option<String> = row.try_get("currency")?;
    let paid = Money::new(
        amount_minor.unwrap_or(0),
        currency.unwrap_or_else(|| "USD".to_string()),
    );

    let kind = match kind_str.as_str() {
        "stripe_payment" | "paypal_payment" => TransactionKind::Payment {
            gateway: gateway.ok_or_else(|| {
                RepositoryError::InvalidData(format!("{} without gateway", kind_str))
            })?,
            paid,
        },
        "plan_revoked" => {
            let reason: Option<String> = row.try_get("reason")?;
            let reverses: Option<String> = row.try_get("reverses_transaction_id")?;
            TransactionKind::PlanRevoked {
                reason: parse_column::<RevocationReason>(
                    reason.as_deref().unwrap_or("refund"),
                    "revocation reason",
                )?,
                reverses: reverses.unwrap_or_default(),
                gateway,
            }
        }
        "admin_plan_change" => TransactionKind::AdminPlanChange,
        "admin_credit_adjustment" => TransactionKind::AdminCreditAdjustment,
        "monthly_renewal" => TransactionKind::MonthlyRenewal { paid },
        "plan_expired" => TransactionKind::PlanExpired,
        other => {
            return Err(RepositoryError::InvalidData(format!(
                "Unknown transaction kind: {}",
                other
            )))
        }
    };

    Ok(Transaction {
        id: row.try_get("transaction_id")?,
        date: row.try_get("created_at")?,
        kind,
        description: row.try_get("description")?,
        sub_description: row.try_get("sub_description")?,
        credits_added: row.try_get("credits_added")?,
        previous_balance: row.try_get("previous_balance")?,
        final_balance: row.try_get("final_balance")?,
        plan_name: row.try_get("plan_name")?,
    })
}

pub struct PostgresPlanRepository {
    pool: PgPool,
}

impl PostgresPlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanRepository for PostgresPlanRepository {
    async fn list_plans(&self) -> Result<Vec<Plan>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, monthly_price, yearly_price, credits, daily_limit_monthly,
                   daily_limit_yearly, max_accounts, allow_images, allow_tracking, purchase_enabled
            FROM plans
            ORDER BY monthly_price ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Plan, RepositoryError> {
                Ok(Plan {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    monthly_price: row.try_get("monthly_price")?,
                    yearly_price: row.try_get("yearly_price")?,
                    credits: row.try_get("credits")?,
                    daily_limit_monthly: row.try_get("daily_limit_monthly")?,
                    daily_limit_yearly: row.try_get("daily_limit_yearly")?,
                    max_accounts: row.try_get("max_accounts")?,
                    allow_images: row.try_get("allow_images")?,
                    allow_tracking: row.try_get("allow_tracking")?,
                    purchase_enabled: row.try_get("purchase_enabled")?,
                })
            })
            .collect()
    }

    async fn get_refund_policy(&self) -> Result<Option<RefundPolicy>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT value FROM ledger_settings WHERE key = 'refund_policy'
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let value: serde_json::Value = r.try_get("value")?;
                let policy = serde_json::from_value(value).map_err(|e| {
                    RepositoryError::InvalidData(format!("Failed to deserialize refund policy: {}", e))
                })?;
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    async fn save_refund_policy(&self, policy: &RefundPolicy) -> Result<(), RepositoryError> {
        let value = serde_json::to_value(policy).map_err(|e| {
            RepositoryError::InvalidData(format!("Failed to serialize refund policy: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO ledger_settings (key, value, updated_at)
            VALUES ('refund_policy', $1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_columns_capture_revocation_link() {
        let columns = KindColumns::from(&TransactionKind::PlanRevoked {
            reason: RevocationReason::Refund,
            reverses: "pi_9".to_string(),
            gateway: Some(Gateway::Paypal),
        });

        assert_eq!(columns.reverses.as_deref(), Some("pi_9"));
        assert_eq!(columns.reason.as_deref(), Some("refund"));
        assert_eq!(columns.gateway.as_deref(), Some("paypal"));
        assert!(columns.amount_minor.is_none());
    }

    #[test]
    fn kind_columns_capture_payment_amount() {
        let columns = KindColumns::from(&TransactionKind::Payment {
            gateway: Gateway::Stripe,
            paid: Money::new(4900, "eur"),
        });

        assert_eq!(columns.amount_minor, Some(4900));
        assert_eq!(columns.currency.as_deref(), Some("EUR"));
        assert!(columns.reverses.is_none());
    }

    #[test]
    fn dependents_are_removed_before_the_ledger() {
        assert_eq!(DEPENDENT_TABLES[0], "brand_profiles");
        assert_eq!(DEPENDENT_TABLES[DEPENDENT_TABLES.len() - 1], "ledger_transactions");
    }
}
