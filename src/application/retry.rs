use crate::application::{user_lookup, LedgerError};
use crate::domain::{LedgerAccount, Transaction};
use crate::infrastructure::{CommitOutcome, LedgerRepository};
use tracing::debug;

pub(crate) const MAX_COMMIT_ATTEMPTS: usize = 5;

/// A proposed write: the new account state plus an optional ledger entry.
pub(crate) type Mutation = (LedgerAccount, Option<Transaction>);

pub(crate) enum Committed {
    Applied {
        account: LedgerAccount,
        transaction: Option<Transaction>,
    },
    /// The ledger entry was already recorded.
    Duplicate,
    /// `apply` decided there was nothing to write.
    Unchanged,
}

/// Optimistic read-modify-write of one account.
///
/// `apply` derives the new state from the current one; on a version conflict
/// the account is re-read and `apply` runs again.
pub(crate) async fn commit_with_retry<L, F>(
    ledger: &L,
    mut current: LedgerAccount,
    mut apply: F,
) -> Result<Committed, LedgerError>
where
    L: LedgerRepository + ?Sized,
    F: FnMut(&LedgerAccount) -> Result<Option<Mutation>, LedgerError>,
{
    for attempt in 1..=MAX_COMMIT_ATTEMPTS {
        let Some((mut account, transaction)) = apply(&current)? else {
            return Ok(Committed::Unchanged);
        };

        match ledger.commit(&account, transaction.as_ref()).await? {
            CommitOutcome::Committed => {
                account.version += 1;
                return Ok(Committed::Applied {
                    account,
                    transaction,
                });
            }
            CommitOutcome::DuplicateTransaction => return Ok(Committed::Duplicate),
            CommitOutcome::VersionConflict => {
                debug!(user_id = %current.id, attempt, "Version conflict, re-reading account");
                current = ledger
                    .get_by_id(current.id)
                    .await
                    .map_err(user_lookup(current.id))?;
            }
        }
    }

    Err(LedgerError::ConcurrentModification(current.id))
}
