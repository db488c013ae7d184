// Webhook transaction DTO - the payload carried inside a push message
//
// camelCase JSON. The receive endpoint produces it from the bank's native
// `StatementItem` webhook; the process endpoint validates and persists it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{Account, Categorization, Transaction, TransactionType};
use crate::error::GatewayError;
use crate::gateway::StatementItem;

/// UAH, the bank's home currency, for native items that omit a code
const DEFAULT_CURRENCY_CODE: u16 = 980;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireType {
    Debit,
    Credit,
}

impl From<WireType> for TransactionType {
    fn from(value: WireType) -> Self {
        match value {
            WireType::Debit => TransactionType::Debit,
            WireType::Credit => TransactionType::Credit,
        }
    }
}

impl From<TransactionType> for WireType {
    fn from(value: TransactionType) -> Self {
        match value {
            TransactionType::Debit => WireType::Debit,
            TransactionType::Credit => WireType::Credit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTransaction {
    pub external_id: String,
    /// RFC 3339
    pub date: DateTime<Utc>,
    pub amount: i64,
    /// ISO 4217 numeric
    pub currency_code: u16,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub transaction_type: WireType,
    pub account_external_id: String,
    /// Account balance after the operation
    pub balance: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_amount: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcc: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_mcc: Option<i32>,
    #[serde(default)]
    pub hold: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_iban: Option<String>,
    #[serde(default)]
    pub cashback_amount: i64,
    #[serde(default)]
    pub commission_rate: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_edrpou: Option<String>,
}

impl WebhookTransaction {
    /// Rules serde cannot express. Returns the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if self.external_id.trim().is_empty() {
            return Err("externalId must not be empty".to_string());
        }
        if self.account_external_id.trim().is_empty() {
            return Err("accountExternalId must not be empty".to_string());
        }
        if self.amount != 0 {
            let expected = WireType::from(TransactionType::from_amount(self.amount));
            if expected != self.transaction_type {
                return Err(format!(
                    "type {:?} does not match amount {}",
                    self.transaction_type, self.amount
                ));
            }
        }
        Ok(())
    }

    /// Build from one item of the bank's native webhook.
    pub fn from_statement_item(
        account_external_id: &str,
        item: StatementItem,
    ) -> Result<Self, GatewayError> {
        let date = item.timestamp()?;
        let balance = item.balance.ok_or_else(|| {
            GatewayError::Malformed(format!("statement item {} has no balance", item.id))
        })?;
        Ok(Self {
            external_id: item.id,
            date,
            amount: item.amount,
            currency_code: item.currency_code.unwrap_or(DEFAULT_CURRENCY_CODE),
            description: item.description,
            transaction_type: TransactionType::from_amount(item.amount).into(),
            account_external_id: account_external_id.to_string(),
            balance,
            operation_amount: item.operation_amount,
            mcc: item.mcc,
            original_mcc: item.original_mcc,
            hold: item.hold,
            comment: item.comment,
            counter_name: item.counter_name,
            counter_iban: item.counter_iban,
            cashback_amount: item.cashback_amount,
            commission_rate: item.commission_rate,
            receipt_id: item.receipt_id,
            invoice_id: item.invoice_id,
            counter_edrpou: item.counter_edrpou,
        })
    }

    /// The transaction to persist under `account`.
    pub fn to_transaction(&self, account: &Account) -> Transaction {
        Transaction {
            id: String::new(),
            external_id: self.external_id.clone(),
            date: self.date,
            amount: self.amount,
            currency: account.currency.clone(),
            operation_amount: self.operation_amount.unwrap_or(self.amount),
            description: self.description.clone(),
            transaction_type: self.transaction_type.into(),
            account_id: account.id.clone(),
            mcc: self.mcc,
            original_mcc: self.original_mcc,
            hold: self.hold,
            counter_name: self.counter_name.clone(),
            counter_iban: self.counter_iban.clone(),
            counter_edrpou: self.counter_edrpou.clone(),
            comment: self.comment.clone(),
            cashback_amount: self.cashback_amount,
            commission_rate: self.commission_rate,
            receipt_id: self.receipt_id.clone(),
            invoice_id: self.invoice_id.clone(),
            balance_after: Some(self.balance),
            categorization: Categorization::default(),
        }
    }
}

// ============================================================================
// NATIVE BANK WEBHOOK
// ============================================================================

/// `{"type":"StatementItem","data":{"account":"...","statementItem":{...}}}`
#[derive(Debug, Deserialize)]
struct NativeWebhook {
    #[serde(rename = "type")]
    kind: String,
    data: NativeData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeData {
    account: String,
    statement_item: StatementItem,
}

/// What the receive endpoint forwards to the queue.
#[derive(Debug, PartialEq)]
pub enum Normalized {
    /// Native webhook converted to the DTO
    Transaction(Vec<u8>),
    /// Anything else, forwarded untouched
    Raw,
}

/// Convert a native `StatementItem` webhook into DTO JSON.
///
/// Bodies of any other shape come back as `Normalized::Raw`. A native body
/// that fails conversion is an error; the caller decides what to forward.
pub fn normalize_payload(body: &[u8]) -> Result<Normalized, String> {
    let native: NativeWebhook = match serde_json::from_slice(body) {
        Ok(native) => native,
        Err(_) => return Ok(Normalized::Raw),
    };
    if native.kind != "StatementItem" {
        return Ok(Normalized::Raw);
    }

    let dto = WebhookTransaction::from_statement_item(&native.data.account, native.data.statement_item)
        .map_err(|e| e.to_string())?;
    let json = serde_json::to_vec(&dto).map_err(|e| e.to_string())?;
    Ok(Normalized::Transaction(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_account;

    const NATIVE: &str = r#"{
        "type": "StatementItem",
        "data": {
            "account": "acc-ext",
            "statementItem": {
                "id": "ZuHWzqkKGVo=",
                "time": 1710936000,
                "description": "Silpo",
                "mcc": 5411,
                "originalMcc": 5411,
                "hold": true,
                "amount": -12550,
                "operationAmount": -12550,
                "currencyCode": 980,
                "commissionRate": 0,
                "cashbackAmount": 125,
                "balance": 987450
            }
        }
    }"#;

    #[test]
    fn test_native_webhook_is_normalized() {
        let Normalized::Transaction(json) = normalize_payload(NATIVE.as_bytes()).unwrap() else {
            panic!("expected a transaction");
        };
        let dto: WebhookTransaction = serde_json::from_slice(&json).unwrap();

        assert_eq!(dto.external_id, "ZuHWzqkKGVo=");
        assert_eq!(dto.account_external_id, "acc-ext");
        assert_eq!(dto.transaction_type, WireType::Debit);
        assert_eq!(dto.balance, 987450);
        assert!(dto.hold);
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn test_native_item_without_balance_is_not_normalized() {
        let without_balance = NATIVE.replace(",\n                \"balance\": 987450", "");
        assert!(!without_balance.contains("balance"));

        let err = normalize_payload(without_balance.as_bytes()).unwrap_err();
        assert!(err.contains("no balance"));
    }

    #[test]
    fn test_other_payloads_pass_through() {
        assert_eq!(normalize_payload(b"not json").unwrap(), Normalized::Raw);
        assert_eq!(
            normalize_payload(br#"{"type":"Ping","data":{}}"#).unwrap(),
            Normalized::Raw
        );
    }

    #[test]
    fn test_type_must_match_sign() {
        let Normalized::Transaction(json) = normalize_payload(NATIVE.as_bytes()).unwrap() else {
            panic!("expected a transaction");
        };
        let mut dto: WebhookTransaction = serde_json::from_slice(&json).unwrap();
        dto.transaction_type = WireType::Credit;
        assert!(dto.validate().unwrap_err().contains("does not match"));

        dto.amount = 0;
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn test_to_transaction_uses_account_identity() {
        let Normalized::Transaction(json) = normalize_payload(NATIVE.as_bytes()).unwrap() else {
            panic!("expected a transaction");
        };
        let dto: WebhookTransaction = serde_json::from_slice(&json).unwrap();
        let mut account = sample_account("acc-ext");
        account.id = "acc-1".to_string();

        let tx = dto.to_transaction(&account);
        assert_eq!(tx.account_id, "acc-1");
        assert_eq!(tx.currency, "UAH");
        assert_eq!(tx.transaction_type, TransactionType::Debit);
        assert_eq!(tx.balance_after, Some(987450));
    }
}
