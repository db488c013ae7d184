// Primary Store - SQLite + WAL
//
// Authoritative persistence for every entity. The UNIQUE constraint on
// `external_id` is the last line of idempotency when the pull sync and the
// webhook pipeline race on the same transaction.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::entities::{
    Account, AccountRole, AccountSource, Budget, Categorization, CategorizationStatus, Category,
    Rule, Transaction, TransactionType,
};
use crate::error::{StoreError, StoreResult};
use crate::storage::{
    AccountRepository, BatchSave, BudgetRepository, CategoryRepository, RuleRepository,
    TransactionRepository,
};

/// SQLite caps bound parameters per statement; stay well under the limit.
const MAX_IN_PARAMS: usize = 500;

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery (no-op for in-memory databases)
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Accounts
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            currency TEXT NOT NULL,
            balance INTEGER NOT NULL,
            account_type TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'operational',
            bank_name TEXT NOT NULL,
            iban TEXT NOT NULL DEFAULT '',
            masked_pan TEXT NOT NULL DEFAULT '[]',
            credit_limit INTEGER,
            last_sync_time INTEGER,
            source TEXT NOT NULL DEFAULT 'bank_sync',
            archived INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Transactions (core columns immutable, categorization columns mutable)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE NOT NULL,
            date INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            currency TEXT NOT NULL,
            operation_amount INTEGER NOT NULL,
            description TEXT NOT NULL,
            transaction_type TEXT NOT NULL,
            account_id TEXT NOT NULL,
            mcc INTEGER,
            original_mcc INTEGER,
            hold INTEGER NOT NULL DEFAULT 0,
            counter_name TEXT,
            counter_iban TEXT,
            counter_edrpou TEXT,
            comment TEXT,
            cashback_amount INTEGER NOT NULL DEFAULT 0,
            commission_rate INTEGER NOT NULL DEFAULT 0,
            receipt_id TEXT,
            invoice_id TEXT,
            balance_after INTEGER,
            status TEXT NOT NULL DEFAULT 'pending',
            category_id TEXT,
            budget_id TEXT,
            categorization_reason TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            group_name TEXT NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS budgets (
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            month TEXT NOT NULL,
            allocated INTEGER NOT NULL,
            UNIQUE(category_id, month)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rules (
            id TEXT PRIMARY KEY,
            pattern TEXT NOT NULL,
            category_id TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 0,
            match_count INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_accounts_iban ON accounts(iban)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_account_date ON transactions(account_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_budgets_month ON budgets(month)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// STORE HANDLE
// ============================================================================

/// Shared handle to the primary database.
///
/// Cloning is cheap; all clones serialize on the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("primary store lock poisoned".to_string()))
    }

    pub fn count_transactions(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?)
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn assign_id(id: &str) -> String {
    if id.is_empty() {
        new_id()
    } else {
        id.to_string()
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn millis_to_datetime(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {}", millis)))
}

/// Map a UNIQUE violation to `Duplicate`, everything else to `Sqlite`.
///
/// NOT NULL, CHECK and PRIMARY KEY failures are integrity errors, not
/// duplicates.
fn map_insert_error(err: rusqlite::Error, entity: &'static str, key: &str) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(ref failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Duplicate {
                entity,
                key: key.to_string(),
            }
        }
        other => StoreError::Sqlite(other),
    }
}

fn expect_changed(changed: usize, entity: &'static str, id: &str) -> StoreResult<()> {
    if changed == 0 {
        Err(StoreError::not_found(entity, id))
    } else {
        Ok(())
    }
}

const ACCOUNT_COLUMNS: &str = "id, external_id, name, currency, balance, account_type, role,
    bank_name, iban, masked_pan, credit_limit, last_sync_time, source, archived";

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    let role: String = row.get(6)?;
    let masked_pan: String = row.get(9)?;
    let last_sync: Option<i64> = row.get(11)?;
    let source: String = row.get(12)?;

    Ok(Account {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        currency: row.get(3)?,
        balance: row.get(4)?,
        account_type: row.get(5)?,
        role: AccountRole::parse(&role)
            .ok_or_else(|| conversion_error(6, format!("unknown role: {}", role)))?,
        bank_name: row.get(7)?,
        iban: row.get(8)?,
        masked_pan: serde_json::from_str(&masked_pan)
            .map_err(|e| conversion_error(9, e.to_string()))?,
        credit_limit: row.get(10)?,
        last_sync_time: last_sync.map(|ms| millis_to_datetime(11, ms)).transpose()?,
        source: AccountSource::parse(&source)
            .ok_or_else(|| conversion_error(12, format!("unknown source: {}", source)))?,
        archived: row.get(13)?,
    })
}

const TRANSACTION_COLUMNS: &str = "id, external_id, date, amount, currency, operation_amount,
    description, transaction_type, account_id, mcc, original_mcc, hold, counter_name,
    counter_iban, counter_edrpou, comment, cashback_amount, commission_rate, receipt_id,
    invoice_id, balance_after, status, category_id, budget_id, categorization_reason";

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let date: i64 = row.get(2)?;
    let tx_type: String = row.get(7)?;
    let status: String = row.get(21)?;

    Ok(Transaction {
        id: row.get(0)?,
        external_id: row.get(1)?,
        date: millis_to_datetime(2, date)?,
        amount: row.get(3)?,
        currency: row.get(4)?,
        operation_amount: row.get(5)?,
        description: row.get(6)?,
        transaction_type: TransactionType::parse(&tx_type)
            .ok_or_else(|| conversion_error(7, format!("unknown type: {}", tx_type)))?,
        account_id: row.get(8)?,
        mcc: row.get(9)?,
        original_mcc: row.get(10)?,
        hold: row.get(11)?,
        counter_name: row.get(12)?,
        counter_iban: row.get(13)?,
        counter_edrpou: row.get(14)?,
        comment: row.get(15)?,
        cashback_amount: row.get(16)?,
        commission_rate: row.get(17)?,
        receipt_id: row.get(18)?,
        invoice_id: row.get(19)?,
        balance_after: row.get(20)?,
        categorization: Categorization {
            status: CategorizationStatus::parse(&status)
                .ok_or_else(|| conversion_error(21, format!("unknown status: {}", status)))?,
            category_id: row.get(22)?,
            budget_id: row.get(23)?,
            reason: row.get(24)?,
        },
    })
}

fn category_from_row(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        group_name: row.get(2)?,
        archived: row.get(3)?,
    })
}

fn budget_from_row(row: &Row) -> rusqlite::Result<Budget> {
    Ok(Budget {
        id: row.get(0)?,
        category_id: row.get(1)?,
        month: row.get(2)?,
        allocated: row.get(3)?,
    })
}

fn rule_from_row(row: &Row) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        pattern: row.get(1)?,
        category_id: row.get(2)?,
        priority: row.get(3)?,
        match_count: row.get(4)?,
        enabled: row.get(5)?,
    })
}

fn query_account(conn: &Connection, column: &str, value: &str) -> StoreResult<Option<Account>> {
    let sql = format!(
        "SELECT {} FROM accounts WHERE {} = ?1 ORDER BY created_at LIMIT 1",
        ACCOUNT_COLUMNS, column
    );
    Ok(conn
        .query_row(&sql, params![value], account_from_row)
        .optional()?)
}

fn query_transaction(conn: &Connection, id: &str) -> StoreResult<Option<Transaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], transaction_from_row)
        .optional()?)
}

fn insert_transaction(conn: &Connection, tx: &Transaction) -> StoreResult<String> {
    let id = assign_id(&tx.id);
    let sql = format!(
        "INSERT INTO transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
            ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        TRANSACTION_COLUMNS
    );
    conn.execute(
        &sql,
        params![
            id,
            tx.external_id,
            tx.date.timestamp_millis(),
            tx.amount,
            tx.currency,
            tx.operation_amount,
            tx.description,
            tx.transaction_type.as_str(),
            tx.account_id,
            tx.mcc,
            tx.original_mcc,
            tx.hold,
            tx.counter_name,
            tx.counter_iban,
            tx.counter_edrpou,
            tx.comment,
            tx.cashback_amount,
            tx.commission_rate,
            tx.receipt_id,
            tx.invoice_id,
            tx.balance_after,
            tx.categorization.status.as_str(),
            tx.categorization.category_id,
            tx.categorization.budget_id,
            tx.categorization.reason,
        ],
    )
    .map_err(|e| map_insert_error(e, "transaction", &tx.external_id))?;
    Ok(id)
}

fn set_categorization(conn: &Connection, id: &str, c: &Categorization) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE transactions
         SET status = ?1, category_id = ?2, budget_id = ?3, categorization_reason = ?4
         WHERE id = ?5",
        params![c.status.as_str(), c.category_id, c.budget_id, c.reason, id],
    )
}

// ============================================================================
// ACCOUNTS
// ============================================================================

impl AccountRepository for SqliteStore {
    fn find_all(&self) -> StoreResult<Vec<Account>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM accounts ORDER BY name", ACCOUNT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], account_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<Account>> {
        let conn = self.conn()?;
        query_account(&conn, "id", id)
    }

    fn find_by_external_id(&self, external_id: &str) -> StoreResult<Option<Account>> {
        let conn = self.conn()?;
        query_account(&conn, "external_id", external_id)
    }

    fn find_by_iban(&self, iban: &str) -> StoreResult<Option<Account>> {
        if iban.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        query_account(&conn, "iban", iban)
    }

    fn save(&self, account: Account) -> StoreResult<Account> {
        let conn = self.conn()?;
        let id = assign_id(&account.id);
        let masked_pan = serde_json::to_string(&account.masked_pan)?;

        conn.execute(
            "INSERT INTO accounts (
                id, external_id, name, currency, balance, account_type, role,
                bank_name, iban, masked_pan, credit_limit, last_sync_time, source, archived
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                id,
                account.external_id,
                account.name,
                account.currency,
                account.balance,
                account.account_type,
                account.role.as_str(),
                account.bank_name,
                account.iban,
                masked_pan,
                account.credit_limit,
                account.last_sync_time.map(|t| t.timestamp_millis()),
                account.source.as_str(),
                account.archived,
            ],
        )
        .map_err(|e| map_insert_error(e, "account", &account.external_id))?;

        query_account(&conn, "id", &id)?.ok_or_else(|| StoreError::not_found("account", id))
    }

    fn update(&self, account: &Account) -> StoreResult<()> {
        let conn = self.conn()?;
        let masked_pan = serde_json::to_string(&account.masked_pan)?;

        let changed = conn
            .execute(
                "UPDATE accounts SET
                    external_id = ?1, name = ?2, currency = ?3, balance = ?4, account_type = ?5,
                    role = ?6, bank_name = ?7, iban = ?8, masked_pan = ?9, credit_limit = ?10,
                    last_sync_time = ?11, source = ?12, archived = ?13
                 WHERE id = ?14",
                params![
                    account.external_id,
                    account.name,
                    account.currency,
                    account.balance,
                    account.account_type,
                    account.role.as_str(),
                    account.bank_name,
                    account.iban,
                    masked_pan,
                    account.credit_limit,
                    account.last_sync_time.map(|t| t.timestamp_millis()),
                    account.source.as_str(),
                    account.archived,
                    account.id,
                ],
            )
            .map_err(|e| map_insert_error(e, "account", &account.external_id))?;

        expect_changed(changed, "account", &account.id)
    }

    fn update_balance(&self, id: &str, balance: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET balance = ?1 WHERE id = ?2",
            params![balance, id],
        )?;
        expect_changed(changed, "account", id)
    }

    fn update_last_sync_time(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET last_sync_time = ?1 WHERE id = ?2",
            params![at.timestamp_millis(), id],
        )?;
        expect_changed(changed, "account", id)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        expect_changed(changed, "account", id)
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

impl TransactionRepository for SqliteStore {
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Transaction>> {
        let conn = self.conn()?;
        query_transaction(&conn, id)
    }

    fn find_by_account(&self, account_id: &str) -> StoreResult<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE account_id = ?1 ORDER BY date, created_at",
            TRANSACTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let transactions = stmt
            .query_map(params![account_id], transaction_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(transactions)
    }

    fn find_latest_by_account(&self, account_id: &str) -> StoreResult<Option<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE account_id = ?1
             ORDER BY date DESC, created_at DESC LIMIT 1",
            TRANSACTION_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![account_id], transaction_from_row)
            .optional()?)
    }

    fn find_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> StoreResult<HashMap<String, Transaction>> {
        let mut found = HashMap::new();
        if external_ids.is_empty() {
            return Ok(found);
        }

        let conn = self.conn()?;
        for chunk in external_ids.chunks(MAX_IN_PARAMS) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM transactions WHERE external_id IN ({})",
                TRANSACTION_COLUMNS, placeholders
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), transaction_from_row)?;
            for row in rows {
                let tx = row?;
                found.insert(tx.external_id.clone(), tx);
            }
        }

        debug!(
            "Existence check: {} of {} external ids already stored",
            found.len(),
            external_ids.len()
        );
        Ok(found)
    }

    fn save(&self, transaction: Transaction) -> StoreResult<Transaction> {
        let conn = self.conn()?;
        let id = insert_transaction(&conn, &transaction)?;
        query_transaction(&conn, &id)?.ok_or_else(|| StoreError::not_found("transaction", id))
    }

    fn save_many(&self, transactions: Vec<Transaction>) -> StoreResult<BatchSave<Transaction>> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        let mut outcome = BatchSave::default();

        for tx in &transactions {
            match insert_transaction(&db_tx, tx) {
                Ok(id) => {
                    if let Some(saved) = query_transaction(&db_tx, &id)? {
                        outcome.saved.push(saved);
                    }
                }
                Err(StoreError::Duplicate { key, .. }) => outcome.duplicates.push(key),
                // Dropping `db_tx` rolls the whole batch back
                Err(e) => return Err(e),
            }
        }

        db_tx.commit()?;
        Ok(outcome)
    }

    fn update_categorization(&self, id: &str, categorization: &Categorization) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = set_categorization(&conn, id, categorization)?;
        expect_changed(changed, "transaction", id)
    }

    fn update_categorizations(&self, updates: &[(String, Categorization)]) -> StoreResult<usize> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        let mut changed = 0;
        for (id, categorization) in updates {
            changed += set_categorization(&db_tx, id, categorization)?;
        }
        db_tx.commit()?;
        Ok(changed)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
        expect_changed(changed, "transaction", id)
    }
}

// ============================================================================
// CATEGORIES, BUDGETS, RULES
// ============================================================================

impl CategoryRepository for SqliteStore {
    fn find_all(&self) -> StoreResult<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, group_name, archived FROM categories ORDER BY group_name, name",
        )?;
        let categories = stmt
            .query_map([], category_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<Category>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, name, group_name, archived FROM categories WHERE id = ?1",
                params![id],
                category_from_row,
            )
            .optional()?)
    }

    fn save(&self, category: Category) -> StoreResult<Category> {
        let conn = self.conn()?;
        let id = assign_id(&category.id);
        conn.execute(
            "INSERT INTO categories (id, name, group_name, archived) VALUES (?1, ?2, ?3, ?4)",
            params![id, category.name, category.group_name, category.archived],
        )
        .map_err(|e| map_insert_error(e, "category", &id))?;
        Ok(Category { id, ..category })
    }

    fn update(&self, category: &Category) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE categories SET name = ?1, group_name = ?2, archived = ?3 WHERE id = ?4",
            params![category.name, category.group_name, category.archived, category.id],
        )?;
        expect_changed(changed, "category", &category.id)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM categories WHERE id = ?1", params![id])?;
        expect_changed(changed, "category", id)
    }
}

fn insert_budget(conn: &Connection, budget: &Budget) -> StoreResult<Budget> {
    let id = assign_id(&budget.id);
    let key = format!("{}/{}", budget.category_id, budget.month);
    conn.execute(
        "INSERT INTO budgets (id, category_id, month, allocated) VALUES (?1, ?2, ?3, ?4)",
        params![id, budget.category_id, budget.month, budget.allocated],
    )
    .map_err(|e| map_insert_error(e, "budget", &key))?;
    Ok(Budget {
        id,
        ..budget.clone()
    })
}

impl BudgetRepository for SqliteStore {
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Budget>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, category_id, month, allocated FROM budgets WHERE id = ?1",
                params![id],
                budget_from_row,
            )
            .optional()?)
    }

    fn find_by_month(&self, month: &str) -> StoreResult<Vec<Budget>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, category_id, month, allocated FROM budgets WHERE month = ?1
             ORDER BY category_id",
        )?;
        let budgets = stmt
            .query_map(params![month], budget_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(budgets)
    }

    fn save(&self, budget: Budget) -> StoreResult<Budget> {
        let conn = self.conn()?;
        insert_budget(&conn, &budget)
    }

    fn save_many(&self, budgets: Vec<Budget>) -> StoreResult<BatchSave<Budget>> {
        let mut conn = self.conn()?;
        let db_tx = conn.transaction()?;
        let mut outcome = BatchSave::default();

        for budget in &budgets {
            match insert_budget(&db_tx, budget) {
                Ok(saved) => outcome.saved.push(saved),
                Err(StoreError::Duplicate { key, .. }) => outcome.duplicates.push(key),
                Err(e) => return Err(e),
            }
        }

        db_tx.commit()?;
        Ok(outcome)
    }

    fn update(&self, budget: &Budget) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE budgets SET category_id = ?1, month = ?2, allocated = ?3 WHERE id = ?4",
            params![budget.category_id, budget.month, budget.allocated, budget.id],
        )?;
        expect_changed(changed, "budget", &budget.id)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM budgets WHERE id = ?1", params![id])?;
        expect_changed(changed, "budget", id)
    }
}

impl RuleRepository for SqliteStore {
    fn find_all(&self) -> StoreResult<Vec<Rule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, pattern, category_id, priority, match_count, enabled FROM rules
             ORDER BY priority DESC, pattern",
        )?;
        let rules = stmt
            .query_map([], rule_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    fn find_by_id(&self, id: &str) -> StoreResult<Option<Rule>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, pattern, category_id, priority, match_count, enabled FROM rules
                 WHERE id = ?1",
                params![id],
                rule_from_row,
            )
            .optional()?)
    }

    fn save(&self, rule: Rule) -> StoreResult<Rule> {
        let conn = self.conn()?;
        let id = assign_id(&rule.id);
        conn.execute(
            "INSERT INTO rules (id, pattern, category_id, priority, match_count, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, rule.pattern, rule.category_id, rule.priority, rule.match_count, rule.enabled],
        )
        .map_err(|e| map_insert_error(e, "rule", &id))?;
        Ok(Rule { id, ..rule })
    }

    fn update(&self, rule: &Rule) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE rules SET pattern = ?1, category_id = ?2, priority = ?3, match_count = ?4,
                enabled = ?5
             WHERE id = ?6",
            params![
                rule.pattern,
                rule.category_id,
                rule.priority,
                rule.match_count,
                rule.enabled,
                rule.id
            ],
        )?;
        expect_changed(changed, "rule", &rule.id)
    }

    fn increment_match_count(&self, id: &str, by: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE rules SET match_count = match_count + ?1 WHERE id = ?2",
            params![by, id],
        )?;
        expect_changed(changed, "rule", id)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
        expect_changed(changed, "rule", id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
