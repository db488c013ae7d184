//! Persistence for the ingestion engine.
//!
//! * [`sqlite`]: the primary (authoritative) store, the only source for reads
//! * [`mirror`]: the best-effort flat tabular mirror
//! * [`dual_write`]: composes the two behind the repository traits below

pub mod dual_write;
pub mod mirror;
pub mod sqlite;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::entities::{Account, Budget, Categorization, Category, Rule, Transaction};
use crate::error::StoreResult;

pub use dual_write::{DualWriteRepository, PRIMARY_ONLY_OPERATIONS};
pub use mirror::{CsvMirror, MirrorRow, MirrorStore};
pub use sqlite::{setup_database, SqliteStore};

/// Outcome of a batched insert.
///
/// Rows rejected by the store's uniqueness constraint are reported in
/// `duplicates` instead of failing the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSave<T> {
    pub saved: Vec<T>,
    pub duplicates: Vec<String>,
}

impl<T> Default for BatchSave<T> {
    fn default() -> Self {
        Self {
            saved: Vec::new(),
            duplicates: Vec::new(),
        }
    }
}

pub trait AccountRepository: Send + Sync {
    fn find_all(&self) -> StoreResult<Vec<Account>>;
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Account>>;
    fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Account>>;
    fn find_by_iban(&self, iban: &str) -> StoreResult<Option<Account>>;

    /// Insert and return the canonical row (with its assigned id).
    fn save(&self, account: Account) -> StoreResult<Account>;
    fn update(&self, account: &Account) -> StoreResult<()>;
    fn update_balance(&self, id: &str, balance: i64) -> StoreResult<()>;
    fn update_last_sync_time(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;
    fn delete(&self, id: &str) -> StoreResult<()>;
}

pub trait TransactionRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Transaction>>;
    fn find_by_account(&self, account_id: &str) -> StoreResult<Vec<Transaction>>;

    /// The account's transaction with the latest date, if any.
    fn find_latest_by_account(&self, account_id: &str) -> StoreResult<Option<Transaction>>;

    /// Batched existence check: external id → persisted transaction, for
    /// every id that is already stored. One call, never N point lookups.
    fn find_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> StoreResult<HashMap<String, Transaction>>;

    /// Insert one transaction. A uniqueness violation is
    /// `StoreError::Duplicate`.
    fn save(&self, transaction: Transaction) -> StoreResult<Transaction>;

    /// Insert a batch in the given order.
    fn save_many(&self, transactions: Vec<Transaction>) -> StoreResult<BatchSave<Transaction>>;

    fn update_categorization(&self, id: &str, categorization: &Categorization) -> StoreResult<()>;

    /// Batch variant of `update_categorization`; returns how many rows changed.
    fn update_categorizations(&self, updates: &[(String, Categorization)]) -> StoreResult<usize>;

    fn delete(&self, id: &str) -> StoreResult<()>;
}

pub trait CategoryRepository: Send + Sync {
    fn find_all(&self) -> StoreResult<Vec<Category>>;
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Category>>;
    fn save(&self, category: Category) -> StoreResult<Category>;
    fn update(&self, category: &Category) -> StoreResult<()>;
    fn delete(&self, id: &str) -> StoreResult<()>;
}

pub trait BudgetRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Budget>>;
    fn find_by_month(&self, month: &str) -> StoreResult<Vec<Budget>>;
    fn save(&self, budget: Budget) -> StoreResult<Budget>;
    fn save_many(&self, budgets: Vec<Budget>) -> StoreResult<BatchSave<Budget>>;
    fn update(&self, budget: &Budget) -> StoreResult<()>;
    fn delete(&self, id: &str) -> StoreResult<()>;
}

pub trait RuleRepository: Send + Sync {
    /// All rules, highest priority first.
    fn find_all(&self) -> StoreResult<Vec<Rule>>;
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Rule>>;
    fn save(&self, rule: Rule) -> StoreResult<Rule>;
    fn update(&self, rule: &Rule) -> StoreResult<()>;
    fn increment_match_count(&self, id: &str, by: i64) -> StoreResult<()>;
    fn delete(&self, id: &str) -> StoreResult<()>;
}
