// Dual-Write Repository - primary store first, mirror best-effort
//
// Reads go to the primary only. Writes go to the primary; only when that
// succeeds is the mirror written. Mirror failures are logged at `warn`
// with the raw error text, counted, and never returned to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::entities::{Account, Budget, Categorization, Category, Rule, Transaction};
use crate::error::{MirrorError, StoreResult};
use crate::storage::mirror::{MirrorRow, MirrorStore};
use crate::storage::{
    AccountRepository, BatchSave, BudgetRepository, CategoryRepository, RuleRepository,
    TransactionRepository,
};

/// Operations that write to the primary store only.
///
/// The mirror projection does not need this freshness. Every other write
/// operation is mirrored.
pub const PRIMARY_ONLY_OPERATIONS: &[&str] = &[
    "account.update_last_sync_time",
    "rule.increment_match_count",
];

pub struct DualWriteRepository<P, M> {
    primary: P,
    mirror: M,
    mirror_failures: AtomicUsize,
}

impl<P, M> DualWriteRepository<P, M> {
    pub fn new(primary: P, mirror: M) -> Self {
        DualWriteRepository {
            primary,
            mirror,
            mirror_failures: AtomicUsize::new(0),
        }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// Number of swallowed mirror failures since construction.
    pub fn mirror_failures(&self) -> usize {
        self.mirror_failures.load(Ordering::Relaxed)
    }

    fn mirror_write<F>(&self, operation: &str, write: F)
    where
        F: FnOnce(&M) -> Result<(), MirrorError>,
    {
        if let Err(err) = write(&self.mirror) {
            self.record_mirror_failure(operation, &err.to_string());
        }
    }

    fn record_mirror_failure(&self, operation: &str, message: &str) {
        self.mirror_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Mirror write failed for {}: {}", operation, message);
    }

    /// Mirror the canonical primary row after a field-level update.
    fn mirror_reloaded<T, L>(&self, operation: &str, load: L)
    where
        T: MirrorRow,
        M: MirrorStore<T>,
        L: FnOnce(&P) -> StoreResult<Option<T>>,
    {
        match load(&self.primary) {
            Ok(Some(entity)) => self.mirror_write(operation, |m| m.upsert(&[entity])),
            // Deleted between the write and the reload: nothing to project
            Ok(None) => {}
            Err(err) => self.record_mirror_failure(operation, &err.to_string()),
        }
    }
}

// ============================================================================
// ACCOUNTS
// ============================================================================

impl<P, M> AccountRepository for DualWriteRepository<P, M>
where
    P: AccountRepository,
    M: MirrorStore<Account>,
{
    fn find_all(&self) -> StoreResult<Vec<Account>> {
        self.primary.find_all()
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<Account>> {
        self.primary.find_by_id(id)
    }

    fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Account>> {
        self.primary.find_by_external_id(external_id)
    }

    fn find_by_iban(&self, iban: &str) -> StoreResult<Option<Account>> {
        self.primary.find_by_iban(iban)
    }

    fn save(&self, account: Account) -> StoreResult<Account> {
        let saved = self.primary.save(account)?;
        self.mirror_write("account.save", |m| m.append(std::slice::from_ref(&saved)));
        Ok(saved)
    }

    fn update(&self, account: &Account) -> StoreResult<()> {
        self.primary.update(account)?;
        self.mirror_write("account.update", |m| m.upsert(std::slice::from_ref(account)));
        Ok(())
    }

    fn update_balance(&self, id: &str, balance: i64) -> StoreResult<()> {
        self.primary.update_balance(id, balance)?;
        self.mirror_reloaded("account.update_balance", |p| p.find_by_id(id));
        Ok(())
    }

    fn update_last_sync_time(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        // Primary only, see PRIMARY_ONLY_OPERATIONS
        self.primary.update_last_sync_time(id, at)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.primary.delete(id)?;
        self.mirror_write("account.delete", |m| m.remove(&[id.to_string()]));
        Ok(())
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

impl<P, M> TransactionRepository for DualWriteRepository<P, M>
where
    P: TransactionRepository,
    M: MirrorStore<Transaction>,
{
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Transaction>> {
        self.primary.find_by_id(id)
    }

    fn find_by_account(&self, account_id: &str) -> StoreResult<Vec<Transaction>> {
        self.primary.find_by_account(account_id)
    }

    fn find_latest_by_account(&self, account_id: &str) -> StoreResult<Option<Transaction>> {
        self.primary.find_latest_by_account(account_id)
    }

    fn find_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> StoreResult<HashMap<String, Transaction>> {
        self.primary.find_by_external_ids(external_ids)
    }

    fn save(&self, transaction: Transaction) -> StoreResult<Transaction> {
        let saved = self.primary.save(transaction)?;
        self.mirror_write("transaction.save", |m| m.append(std::slice::from_ref(&saved)));
        Ok(saved)
    }

    fn save_many(&self, transactions: Vec<Transaction>) -> StoreResult<BatchSave<Transaction>> {
        let outcome = self.primary.save_many(transactions)?;
        self.mirror_write("transaction.save_many", |m| m.append(&outcome.saved));
        Ok(outcome)
    }

    fn update_categorization(&self, id: &str, categorization: &Categorization) -> StoreResult<()> {
        self.primary.update_categorization(id, categorization)?;
        self.mirror_reloaded("transaction.update_categorization", |p| p.find_by_id(id));
        Ok(())
    }

    fn update_categorizations(&self, updates: &[(String, Categorization)]) -> StoreResult<usize> {
        let changed = self.primary.update_categorizations(updates)?;

        let mut reloaded = Vec::with_capacity(updates.len());
        for (id, _) in updates {
            match self.primary.find_by_id(id) {
                Ok(Some(tx)) => reloaded.push(tx),
                Ok(None) => {}
                Err(err) => {
                    self.record_mirror_failure("transaction.update_categorizations", &err.to_string());
                    return Ok(changed);
                }
            }
        }
        self.mirror_write("transaction.update_categorizations", |m| m.upsert(&reloaded));
        Ok(changed)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.primary.delete(id)?;
        self.mirror_write("transaction.delete", |m| m.remove(&[id.to_string()]));
        Ok(())
    }
}

// ============================================================================
// CATEGORIES, BUDGETS, RULES
// ============================================================================

impl<P, M> CategoryRepository for DualWriteRepository<P, M>
where
    P: CategoryRepository,
    M: MirrorStore<Category>,
{
    fn find_all(&self) -> StoreResult<Vec<Category>> {
        self.primary.find_all()
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<Category>> {
        self.primary.find_by_id(id)
    }

    fn save(&self, category: Category) -> StoreResult<Category> {
        let saved = self.primary.save(category)?;
        self.mirror_write("category.save", |m| m.append(std::slice::from_ref(&saved)));
        Ok(saved)
    }

    fn update(&self, category: &Category) -> StoreResult<()> {
        self.primary.update(category)?;
        self.mirror_write("category.update", |m| m.upsert(std::slice::from_ref(category)));
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.primary.delete(id)?;
        self.mirror_write("category.delete", |m| m.remove(&[id.to_string()]));
        Ok(())
    }
}

impl<P, M> BudgetRepository for DualWriteRepository<P, M>
where
    P: BudgetRepository,
    M: MirrorStore<Budget>,
{
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Budget>> {
        self.primary.find_by_id(id)
    }

    fn find_by_month(&self, month: &str) -> StoreResult<Vec<Budget>> {
        self.primary.find_by_month(month)
    }

    fn save(&self, budget: Budget) -> StoreResult<Budget> {
        let saved = self.primary.save(budget)?;
        self.mirror_write("budget.save", |m| m.append(std::slice::from_ref(&saved)));
        Ok(saved)
    }

    fn save_many(&self, budgets: Vec<Budget>) -> StoreResult<BatchSave<Budget>> {
        let outcome = self.primary.save_many(budgets)?;
        self.mirror_write("budget.save_many", |m| m.append(&outcome.saved));
        Ok(outcome)
    }

    fn update(&self, budget: &Budget) -> StoreResult<()> {
        self.primary.update(budget)?;
        self.mirror_write("budget.update", |m| m.upsert(std::slice::from_ref(budget)));
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.primary.delete(id)?;
        self.mirror_write("budget.delete", |m| m.remove(&[id.to_string()]));
        Ok(())
    }
}

impl<P, M> RuleRepository for DualWriteRepository<P, M>
where
    P: RuleRepository,
    M: MirrorStore<Rule>,
{
    fn find_all(&self) -> StoreResult<Vec<Rule>> {
        self.primary.find_all()
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<Rule>> {
        self.primary.find_by_id(id)
    }

    fn save(&self, rule: Rule) -> StoreResult<Rule> {
        let saved = self.primary.save(rule)?;
        self.mirror_write("rule.save", |m| m.append(std::slice::from_ref(&saved)));
        Ok(saved)
    }

    fn update(&self, rule: &Rule) -> StoreResult<()> {
        self.primary.update(rule)?;
        self.mirror_write("rule.update", |m| m.upsert(std::slice::from_ref(rule)));
        Ok(())
    }

    fn increment_match_count(&self, id: &str, by: i64) -> StoreResult<()> {
        // Primary only, see PRIMARY_ONLY_OPERATIONS
        self.primary.increment_match_count(id, by)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        self.primary.delete(id)?;
        self.mirror_write("rule.delete", |m| m.remove(&[id.to_string()]));
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
