// Account Entity - bank account state mirrored from the bank API
//
// Identity: `id` is assigned by the primary store and never changes.
// Idempotency: `external_id` is assigned by the bank; IBAN is the fallback
// key when the bank reissues an external id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCOUNT ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    /// Day-to-day spending account (on budget)
    #[default]
    Operational,

    /// Savings / jar account (on budget, not spent from)
    Savings,

    /// Tracked for net worth only (off budget)
    Tracking,
}

impl AccountRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountRole::Operational => "operational",
            AccountRole::Savings => "savings",
            AccountRole::Tracking => "tracking",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "operational" => Some(AccountRole::Operational),
            "savings" => Some(AccountRole::Savings),
            "tracking" => Some(AccountRole::Tracking),
            _ => None,
        }
    }
}

// ============================================================================
// ACCOUNT SOURCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountSource {
    /// Created by hand, never touched by sync
    Manual,

    /// Created and refreshed by bank synchronization
    #[default]
    BankSync,
}

impl AccountSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSource::Manual => "manual",
            AccountSource::BankSync => "bank_sync",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(AccountSource::Manual),
            "bank_sync" => Some(AccountSource::BankSync),
            _ => None,
        }
    }
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Primary-store identity. Empty until the account is saved.
    #[serde(default)]
    pub id: String,

    /// Bank-assigned identity (idempotency key)
    pub external_id: String,

    pub name: String,

    /// ISO 4217 alphabetic code (UAH, USD, EUR, ...)
    pub currency: String,

    /// Balance in minor units, as reported by the bank
    pub balance: i64,

    /// Bank product type (black, white, platinum, fop, ...)
    pub account_type: String,

    #[serde(default)]
    pub role: AccountRole,

    pub bank_name: String,

    pub iban: String,

    /// Masked card numbers attached to the account
    #[serde(default)]
    pub masked_pan: Vec<String>,

    /// Credit limit in minor units (None or 0 for debit accounts)
    #[serde(default)]
    pub credit_limit: Option<i64>,

    /// Watermark of the last successful transaction sync
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub source: AccountSource,

    #[serde(default)]
    pub archived: bool,
}

impl Account {
    /// Own money on the account: the bank balance minus any credit limit.
    pub fn actual_balance(&self) -> i64 {
        match self.credit_limit {
            Some(limit) if limit > 0 => self.balance - limit,
            _ => self.balance,
        }
    }

    /// Accounts the pull sync is allowed to touch.
    pub fn is_syncable(&self) -> bool {
        self.source == AccountSource::BankSync && !self.archived
    }

    /// True when any field tracked by reconciliation differs.
    ///
    /// Tracked: balance, name, type, IBAN and the masked card list
    /// (compared by length and content, in order).
    pub fn differs_from(&self, remote: &Account) -> bool {
        self.balance != remote.balance
            || self.name != remote.name
            || self.account_type != remote.account_type
            || self.iban != remote.iban
            || !same_cards(&self.masked_pan, &remote.masked_pan)
    }

    /// Apply the bank's view of this account while keeping local-only state
    /// (identity, role, source, archive flag and the sync watermark).
    pub fn merged_with_remote(&self, remote: &Account) -> Account {
        Account {
            id: self.id.clone(),
            external_id: remote.external_id.clone(),
            name: remote.name.clone(),
            currency: remote.currency.clone(),
            balance: remote.balance,
            account_type: remote.account_type.clone(),
            role: self.role,
            bank_name: remote.bank_name.clone(),
            iban: remote.iban.clone(),
            masked_pan: remote.masked_pan.clone(),
            credit_limit: remote.credit_limit,
            last_sync_time: self.last_sync_time,
            source: self.source,
            archived: self.archived,
        }
    }
}

fn same_cards(left: &[String], right: &[String]) -> bool {
    left.len() == right.len() && left.iter().zip(right).all(|(a, b)| a == b)
}

// ============================================================================
// TESTS
// ============================================================================
