// Account Reconciliation - bank account list vs. primary store
//
// For each account the bank reports:
//   1. match by external id
//   2. otherwise match by IBAN (non-empty only; the bank reissues ids)
//   3. otherwise insert as a new bank_sync account
// A match is updated when any tracked field differs. Accounts are never
// deleted here.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::entities::{Account, AccountSource};
use crate::error::StoreResult;
use crate::storage::AccountRepository;

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub created: Vec<Account>,
    pub updated: Vec<Account>,
    pub unchanged: Vec<Account>,
    /// "Failed to process account <external id>: <message>"
    pub errors: Vec<String>,
}

impl ReconcileOutcome {
    /// Every account that is now in the primary store, in bank order
    /// within each group.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.created
            .iter()
            .chain(self.updated.iter())
            .chain(self.unchanged.iter())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} created, {} updated, {} unchanged, {} failed",
            self.created.len(),
            self.updated.len(),
            self.unchanged.len(),
            self.errors.len()
        )
    }
}

enum Change {
    Created(Account),
    Updated(Account),
    Unchanged(Account),
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct AccountReconciler {
    accounts: Arc<dyn AccountRepository>,
}

impl AccountReconciler {
    pub fn new(accounts: Arc<dyn AccountRepository>) -> Self {
        Self { accounts }
    }

    /// Reconcile the bank's account list. One failing account never stops
    /// the others.
    pub fn reconcile(&self, remote_accounts: Vec<Account>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for remote in remote_accounts {
            let external_id = remote.external_id.clone();
            match self.reconcile_one(remote) {
                Ok(Change::Created(account)) => {
                    info!("Created account {} ({})", account.name, account.external_id);
                    outcome.created.push(account);
                }
                Ok(Change::Updated(account)) => {
                    info!("Updated account {} ({})", account.name, account.external_id);
                    outcome.updated.push(account);
                }
                Ok(Change::Unchanged(account)) => outcome.unchanged.push(account),
                Err(err) => {
                    let message = format!("Failed to process account {}: {}", external_id, err);
                    warn!("{}", message);
                    outcome.errors.push(message);
                }
            }
        }

        debug!("Account reconciliation: {}", outcome.summary());
        outcome
    }

    fn find_match(&self, remote: &Account) -> StoreResult<Option<Account>> {
        if let Some(found) = self.accounts.find_by_external_id(&remote.external_id)? {
            return Ok(Some(found));
        }
        if remote.iban.is_empty() {
            return Ok(None);
        }
        self.accounts.find_by_iban(&remote.iban)
    }

    fn reconcile_one(&self, remote: Account) -> StoreResult<Change> {
        let Some(local) = self.find_match(&remote)? else {
            let account = Account {
                id: String::new(),
                source: AccountSource::BankSync,
                ..remote
            };
            return Ok(Change::Created(self.accounts.save(account)?));
        };

        // An IBAN match with a new external id adopts the reissued id
        if local.differs_from(&remote) || local.external_id != remote.external_id {
            let merged = local.merged_with_remote(&remote);
            self.accounts.update(&merged)?;
            Ok(Change::Updated(merged))
        } else {
            Ok(Change::Unchanged(local))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
