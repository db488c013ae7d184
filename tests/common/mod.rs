// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bank_ledger_sync::storage::BatchSave;
use bank_ledger_sync::{
    Account, AccountSource, BankGateway, Categorization, GatewayError, SqliteStore, StatementItem,
    StoreResult, Transaction, TransactionRepository,
};

pub fn bank_account(external_id: &str, iban: &str) -> Account {
    Account {
        id: String::new(),
        external_id: external_id.to_string(),
        name: format!("black *{} (UAH)", &external_id[external_id.len().saturating_sub(4)..]),
        currency: "UAH".to_string(),
        balance: 2_000_000,
        account_type: "black".to_string(),
        role: Default::default(),
        bank_name: "monobank".to_string(),
        iban: iban.to_string(),
        masked_pan: vec!["537541******1234".to_string()],
        credit_limit: None,
        last_sync_time: None,
        source: AccountSource::BankSync,
        archived: false,
    }
}

pub fn item(id: &str, at: DateTime<Utc>, amount: i64) -> StatementItem {
    StatementItem {
        id: id.to_string(),
        time: at.timestamp(),
        description: format!("purchase {}", id),
        mcc: Some(5411),
        original_mcc: Some(5411),
        hold: false,
        amount,
        operation_amount: Some(amount),
        currency_code: Some(980),
        commission_rate: 0,
        cashback_amount: 0,
        balance: None,
        comment: None,
        receipt_id: None,
        invoice_id: None,
        counter_edrpou: None,
        counter_iban: None,
        counter_name: None,
    }
}

// ============================================================================
// FAKE BANK
// ============================================================================

#[derive(Default)]
pub struct FakeBank {
    accounts: Mutex<Vec<Account>>,
    statements: Mutex<HashMap<String, Vec<StatementItem>>>,
    failures: Mutex<VecDeque<GatewayError>>,
    calls: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

impl FakeBank {
    pub fn with_accounts(accounts: Vec<Account>) -> Self {
        let bank = FakeBank::default();
        *bank.accounts.lock().unwrap() = accounts;
        bank
    }

    pub fn post(&self, account_external_id: &str, items: Vec<StatementItem>) {
        self.statements
            .lock()
            .unwrap()
            .entry(account_external_id.to_string())
            .or_default()
            .extend(items);
    }

    pub fn fail_next(&self, error: GatewayError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<(String, DateTime<Utc>, DateTime<Utc>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BankGateway for FakeBank {
    async fn get_accounts(&self) -> Result<Vec<Account>, GatewayError> {
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn get_transactions(
        &self,
        account_external_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatementItem>, GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push((account_external_id.to_string(), from, to));
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let statements = self.statements.lock().unwrap();
        let mut items: Vec<StatementItem> = statements
            .get(account_external_id)
            .map(|all| {
                all.iter()
                    .filter(|i| i.time >= from.timestamp() && i.time < to.timestamp())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // The real API answers newest first
        items.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(items)
    }
}

// ============================================================================
// RECORDING TRANSACTION STORE
// ============================================================================

/// SQLite transaction store that records every batch handed to `save_many`.
pub struct RecordingTransactions {
    pub inner: SqliteStore,
    batches: Mutex<Vec<Vec<Transaction>>>,
}

impl RecordingTransactions {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<Transaction>> {
        self.batches.lock().unwrap().clone()
    }
}

impl TransactionRepository for RecordingTransactions {
    fn find_by_id(&self, id: &str) -> StoreResult<Option<Transaction>> {
        TransactionRepository::find_by_id(&self.inner, id)
    }

    fn find_by_account(&self, account_id: &str) -> StoreResult<Vec<Transaction>> {
        self.inner.find_by_account(account_id)
    }

    fn find_latest_by_account(&self, account_id: &str) -> StoreResult<Option<Transaction>> {
        self.inner.find_latest_by_account(account_id)
    }

    fn find_by_external_ids(
        &self,
        external_ids: &[String],
    ) -> StoreResult<HashMap<String, Transaction>> {
        self.inner.find_by_external_ids(external_ids)
    }

    fn save(&self, transaction: Transaction) -> StoreResult<Transaction> {
        TransactionRepository::save(&self.inner, transaction)
    }

    fn save_many(&self, transactions: Vec<Transaction>) -> StoreResult<BatchSave<Transaction>> {
        self.batches.lock().unwrap().push(transactions.clone());
        TransactionRepository::save_many(&self.inner, transactions)
    }

    fn update_categorization(&self, id: &str, categorization: &Categorization) -> StoreResult<()> {
        self.inner.update_categorization(id, categorization)
    }

    fn update_categorizations(&self, updates: &[(String, Categorization)]) -> StoreResult<usize> {
        self.inner.update_categorizations(updates)
    }

    fn delete(&self, id: &str) -> StoreResult<()> {
        TransactionRepository::delete(&self.inner, id)
    }
}
