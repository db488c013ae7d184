//! Bank gateway: the contract the sync orchestrator pulls from.
//!
//! [`BankApiClient`] talks to a Monobank-style personal API; tests plug in
//! their own [`BankGateway`] implementations.

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Account, AccountSource, Categorization, Transaction, TransactionType};
use crate::error::GatewayError;

pub use client::BankApiClient;

/// Longest statement window the bank accepts in one request.
pub fn max_statement_window() -> Duration {
    Duration::days(31) + Duration::hours(1)
}

#[async_trait]
pub trait BankGateway: Send + Sync {
    /// Accounts as the bank sees them. Returned accounts have no store id.
    async fn get_accounts(&self) -> Result<Vec<Account>, GatewayError>;

    /// Statement lines for one account, `to - from` at most
    /// [`max_statement_window`].
    async fn get_transactions(
        &self,
        account_external_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StatementItem>, GatewayError>;
}

// ============================================================================
// WIRE TYPES
// ============================================================================

/// One statement line in the bank's own shape.
///
/// Shared by the pull API and the bank's native webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementItem {
    pub id: String,
    /// Unix seconds
    pub time: i64,
    #[serde(default)]
    pub description: String,
    pub mcc: Option<i32>,
    pub original_mcc: Option<i32>,
    #[serde(default)]
    pub hold: bool,
    pub amount: i64,
    pub operation_amount: Option<i64>,
    pub currency_code: Option<u16>,
    #[serde(default)]
    pub commission_rate: i64,
    #[serde(default)]
    pub cashback_amount: i64,
    /// Account balance after this operation
    pub balance: Option<i64>,
    pub comment: Option<String>,
    pub receipt_id: Option<String>,
    pub invoice_id: Option<String>,
    pub counter_edrpou: Option<String>,
    pub counter_iban: Option<String>,
    pub counter_name: Option<String>,
}

impl StatementItem {
    pub fn timestamp(&self) -> Result<DateTime<Utc>, GatewayError> {
        DateTime::from_timestamp(self.time, 0).ok_or_else(|| {
            GatewayError::Malformed(format!(
                "statement item {} has invalid time {}",
                self.id, self.time
            ))
        })
    }

    /// Turn a bank line into a transaction owned by `account`.
    pub fn into_transaction(self, account: &Account) -> Result<Transaction, GatewayError> {
        let date = self.timestamp()?;
        Ok(Transaction {
            id: String::new(),
            external_id: self.id,
            date,
            amount: self.amount,
            currency: account.currency.clone(),
            operation_amount: self.operation_amount.unwrap_or(self.amount),
            description: self.description,
            transaction_type: TransactionType::from_amount(self.amount),
            account_id: account.id.clone(),
            mcc: self.mcc,
            original_mcc: self.original_mcc,
            hold: self.hold,
            counter_name: self.counter_name,
            counter_iban: self.counter_iban,
            counter_edrpou: self.counter_edrpou,
            comment: self.comment,
            cashback_amount: self.cashback_amount,
            commission_rate: self.commission_rate,
            receipt_id: self.receipt_id,
            invoice_id: self.invoice_id,
            balance_after: self.balance,
            categorization: Categorization::default(),
        })
    }
}

/// One account inside the bank's client-info response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccountInfo {
    pub id: String,
    pub balance: i64,
    #[serde(default)]
    pub credit_limit: i64,
    #[serde(rename = "type", default)]
    pub account_type: String,
    pub currency_code: u16,
    #[serde(default)]
    pub masked_pan: Vec<String>,
    #[serde(default)]
    pub iban: String,
}

impl BankAccountInfo {
    pub fn into_account(self, bank_name: &str) -> Account {
        let currency = currency_alpha(self.currency_code);
        let name = display_name(&self.account_type, &self.masked_pan, &self.iban, &currency);
        Account {
            id: String::new(),
            external_id: self.id,
            name,
            currency,
            balance: self.balance,
            account_type: self.account_type,
            role: Default::default(),
            bank_name: bank_name.to_string(),
            iban: self.iban,
            masked_pan: self.masked_pan,
            credit_limit: (self.credit_limit > 0).then_some(self.credit_limit),
            last_sync_time: None,
            source: AccountSource::BankSync,
            archived: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub accounts: Vec<BankAccountInfo>,
}

/// "black *1234 (UAH)": product type, last four digits, currency.
fn display_name(account_type: &str, masked_pan: &[String], iban: &str, currency: &str) -> String {
    let digits = masked_pan
        .first()
        .map(String::as_str)
        .filter(|pan| !pan.is_empty())
        .unwrap_or(iban);
    let last4: String = digits
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    let kind = if account_type.is_empty() { "account" } else { account_type };
    if last4.is_empty() {
        format!("{} ({})", kind, currency)
    } else {
        format!("{} *{} ({})", kind, last4, currency)
    }
}

/// ISO 4217 numeric → alphabetic. Unknown codes keep their number.
pub fn currency_alpha(code: u16) -> String {
    match code {
        980 => "UAH",
        840 => "USD",
        978 => "EUR",
        826 => "GBP",
        985 => "PLN",
        203 => "CZK",
        756 => "CHF",
        348 => "HUF",
        _ => return code.to_string(),
    }
    .to_string()
}
