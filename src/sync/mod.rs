//! Pull synchronization.
//!
//! One run: fetch the bank's accounts and reconcile them, then sync the
//! transactions of every syncable account, strictly one account and one
//! chunk at a time. The bank's rate budget is global, so nothing here fans
//! out.

pub mod window;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dedup::partition_new;
use crate::entities::{sort_by_date, Account, Transaction};
use crate::error::{GatewayError, StoreError, StoreResult, SyncError};
use crate::gateway::{max_statement_window, BankGateway, StatementItem};
use crate::reconciliation::AccountReconciler;
use crate::storage::{AccountRepository, TransactionRepository};

pub use window::{chunk_window, earliest_allowed, sync_window, SyncWindow};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Trailing slice re-fetched behind the watermark
    pub overlap: chrono::Duration,
    /// Pause before each account after the first one in a run
    pub account_delay: Duration,
    /// Retries after the first attempt, rate-limit errors only
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// How far back a first sync reaches when no start date is set
    pub lookback_days: i64,
    pub start_date: Option<DateTime<Utc>>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            overlap: chrono::Duration::milliseconds(600_000),
            account_delay: Duration::from_millis(60_000),
            max_retries: 3,
            initial_backoff: Duration::from_millis(5_000),
            lookback_days: 31,
            start_date: None,
        }
    }
}

impl SyncOptions {
    /// `initial_backoff * 2^attempt`, attempt 0 being the first retry.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub started_at: Option<DateTime<Utc>>,
    pub accounts_created: usize,
    pub accounts_updated: usize,
    pub accounts_unchanged: usize,
    pub transactions_new: usize,
    pub transactions_skipped: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Accounts: {} created, {} updated, {} unchanged | Transactions: {} new, {} skipped | Errors: {}",
            self.accounts_created,
            self.accounts_updated,
            self.accounts_unchanged,
            self.transactions_new,
            self.transactions_skipped,
            self.errors.len()
        )
    }
}

/// Transaction counts for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountSync {
    pub new: usize,
    pub skipped: usize,
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct SyncService {
    gateway: Arc<dyn BankGateway>,
    accounts: Arc<dyn AccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
    options: SyncOptions,
}

impl SyncService {
    pub fn new(
        gateway: Arc<dyn BankGateway>,
        accounts: Arc<dyn AccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
        options: SyncOptions,
    ) -> Self {
        Self {
            gateway,
            accounts,
            transactions,
            options,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub async fn run(&self) -> SyncReport {
        self.run_at(Utc::now()).await
    }

    /// One full run with `now` as the run start. `now` is both the end of
    /// every sync window and the watermark written on success.
    pub async fn run_at(&self, now: DateTime<Utc>) -> SyncReport {
        let mut report = SyncReport {
            started_at: Some(now),
            ..SyncReport::default()
        };

        let remote = match self.gateway.get_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                let message = format!("Failed to fetch accounts: {}", err);
                warn!("{}", message);
                report.errors.push(message);
                return report;
            }
        };
        info!("Bank reported {} accounts", remote.len());

        let outcome = AccountReconciler::new(Arc::clone(&self.accounts)).reconcile(remote);
        report.accounts_created = outcome.created.len();
        report.accounts_updated = outcome.updated.len();
        report.accounts_unchanged = outcome.unchanged.len();

        let syncable: Vec<Account> = outcome
            .accounts()
            .filter(|a| a.is_syncable())
            .cloned()
            .collect();
        report.errors.extend(outcome.errors);

        for (index, account) in syncable.iter().enumerate() {
            if index > 0 && !self.options.account_delay.is_zero() {
                debug!("Waiting {:?} before next account", self.options.account_delay);
                tokio::time::sleep(self.options.account_delay).await;
            }

            match self.sync_account(account, now).await {
                Ok(counts) => {
                    info!(
                        "Synced {} ({}): {} new, {} skipped",
                        account.name, account.external_id, counts.new, counts.skipped
                    );
                    report.transactions_new += counts.new;
                    report.transactions_skipped += counts.skipped;
                }
                Err(err) => {
                    let message = format!(
                        "Failed to sync account {} ({}): {}",
                        account.name, account.external_id, err
                    );
                    warn!("{}", message);
                    report.errors.push(message);
                }
            }
        }

        info!("Sync finished: {}", report.summary());
        report
    }

    /// Fetch, dedup, persist in date order, then advance the watermark.
    pub async fn sync_account(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<AccountSync, SyncError> {
        let earliest = earliest_allowed(now, self.options.lookback_days, self.options.start_date);
        let window = sync_window(account.last_sync_time, now, self.options.overlap, earliest);
        let chunks = chunk_window(window, max_statement_window());
        debug!(
            "Account {}: {} .. {} in {} chunk(s)",
            account.external_id,
            window.from,
            window.to,
            chunks.len()
        );

        let mut fetched: Vec<Transaction> = Vec::new();
        for chunk in chunks {
            for item in self.fetch_chunk(account, chunk).await? {
                fetched.push(item.into_transaction(account)?);
            }
        }

        let transactions = Arc::clone(&self.transactions);
        let counts = tokio::task::spawn_blocking(move || persist_new(transactions.as_ref(), fetched))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))??;

        self.accounts.update_last_sync_time(&account.id, now)?;

        Ok(counts)
    }

    /// One chunk, retrying only rate-limit errors with exponential backoff.
    async fn fetch_chunk(
        &self,
        account: &Account,
        chunk: SyncWindow,
    ) -> Result<Vec<StatementItem>, GatewayError> {
        let mut attempt = 0;
        loop {
            debug!(
                "Fetching {} .. {} for {}",
                chunk.from, chunk.to, account.external_id
            );
            match self
                .gateway
                .get_transactions(&account.external_id, chunk.from, chunk.to)
                .await
            {
                Ok(items) => return Ok(items),
                Err(err) if err.is_rate_limit() && attempt < self.options.max_retries => {
                    let wait = self.options.backoff(attempt);
                    warn!(
                        "Rate limited on {} (retry {}/{}), backing off {:?}",
                        account.external_id,
                        attempt + 1,
                        self.options.max_retries,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Dedup against the primary store, then save the new ones oldest first.
fn persist_new(
    transactions: &dyn TransactionRepository,
    fetched: Vec<Transaction>,
) -> StoreResult<AccountSync> {
    let partition = partition_new(transactions, fetched)?;
    let mut skipped = partition.skipped();
    let mut new = partition.new;
    sort_by_date(&mut new);

    let mut saved = 0;
    if !new.is_empty() {
        let batch = transactions.save_many(new)?;
        saved = batch.saved.len();
        // Lost a race with the webhook path
        skipped += batch.duplicates.len();
    }

    Ok(AccountSync {
        new: saved,
        skipped,
    })
}

// ============================================================================
// TESTS
// ============================================================================
