// Transaction Entity - one bank statement line
//
// Core fields are immutable once persisted. Only the categorization block
// is updated afterwards, by a separate categorization process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TRANSACTION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money leaving the account
    Debit,

    /// Money entering the account
    Credit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "debit",
            TransactionType::Credit => "credit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "debit" => Some(TransactionType::Debit),
            "credit" => Some(TransactionType::Credit),
            _ => None,
        }
    }

    /// Banks report signed amounts: negative is a debit.
    pub fn from_amount(amount: i64) -> Self {
        if amount < 0 {
            TransactionType::Debit
        } else {
            TransactionType::Credit
        }
    }
}

// ============================================================================
// CATEGORIZATION STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CategorizationStatus {
    /// Freshly ingested, not yet categorized
    #[default]
    Pending,

    /// Category assigned automatically
    Categorized,

    /// Category confirmed by a person
    Verified,
}

impl CategorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorizationStatus::Pending => "pending",
            CategorizationStatus::Categorized => "categorized",
            CategorizationStatus::Verified => "verified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CategorizationStatus::Pending),
            "categorized" => Some(CategorizationStatus::Categorized),
            "verified" => Some(CategorizationStatus::Verified),
            _ => None,
        }
    }
}

/// Out-of-band categorization fields, the only mutable part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Categorization {
    pub status: CategorizationStatus,
    pub category_id: Option<String>,
    pub budget_id: Option<String>,
    pub reason: Option<String>,
}

// ============================================================================
// TRANSACTION ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Primary-store identity. Empty until the transaction is saved.
    #[serde(default)]
    pub id: String,

    /// Bank-assigned identity (idempotency key, unique per bank)
    pub external_id: String,

    pub date: DateTime<Utc>,

    /// Signed amount in minor units of `currency`
    pub amount: i64,

    /// ISO 4217 alphabetic code of the account currency
    pub currency: String,

    /// Amount in the currency of the operation (differs for FX purchases)
    pub operation_amount: i64,

    pub description: String,

    pub transaction_type: TransactionType,

    /// Primary-store id of the owning account
    pub account_id: String,

    pub mcc: Option<i32>,
    pub original_mcc: Option<i32>,

    /// Authorization hold, not yet settled
    #[serde(default)]
    pub hold: bool,

    pub counter_name: Option<String>,
    pub counter_iban: Option<String>,

    /// Counterparty tax id
    pub counter_edrpou: Option<String>,

    pub comment: Option<String>,

    #[serde(default)]
    pub cashback_amount: i64,

    #[serde(default)]
    pub commission_rate: i64,

    pub receipt_id: Option<String>,
    pub invoice_id: Option<String>,

    /// Account balance right after this operation, when the bank reports it
    pub balance_after: Option<i64>,

    #[serde(default)]
    pub categorization: Categorization,
}

/// Sort transactions chronologically, keeping the input order for ties.
pub fn sort_by_date(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| a.date.cmp(&b.date));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tx(external_id: &str, day: u32) -> Transaction {
        Transaction {
            id: String::new(),
            external_id: external_id.to_string(),
            date: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
            amount: -1_000,
            currency: "UAH".to_string(),
            operation_amount: -1_000,
            description: "Coffee".to_string(),
            transaction_type: TransactionType::Debit,
            account_id: "acc-1".to_string(),
            mcc: Some(5814),
            original_mcc: None,
            hold: false,
            counter_name: None,
            counter_iban: None,
            counter_edrpou: None,
            comment: None,
            cashback_amount: 0,
            commission_rate: 0,
            receipt_id: None,
            invoice_id: None,
            balance_after: None,
            categorization: Categorization::default(),
        }
    }

    #[test]
    fn test_type_from_amount() {
        assert_eq!(TransactionType::from_amount(-1), TransactionType::Debit);
        assert_eq!(TransactionType::from_amount(0), TransactionType::Credit);
        assert_eq!(TransactionType::from_amount(25), TransactionType::Credit);
    }

    #[test]
    fn test_sort_by_date_is_stable() {
        let mut items = vec![tx("c", 3), tx("a", 1), tx("b1", 2), tx("b2", 2)];
        sort_by_date(&mut items);

        let ids: Vec<&str> = items.iter().map(|t| t.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn test_new_transactions_start_pending() {
        let t = tx("a", 1);
        assert_eq!(t.categorization.status, CategorizationStatus::Pending);
    }
}
