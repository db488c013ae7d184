// Webhook processing - the queue-facing side of the webhook pipeline
//
// Status contract towards the broker:
//   200  processed (saved or already known), acknowledge
//   400  permanently unusable message, acknowledge
//   500  store failure, redeliver

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::dedup::is_known;
use crate::entities::{Account, Transaction};
use crate::error::ProcessError;
use crate::queue::PushHandler;
use crate::storage::{AccountRepository, TransactionRepository};
use crate::webhook::decode::decode_push;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Saved { transaction_id: String },
    Duplicate,
}

/// JSON body of the process endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ProcessOutcome> for ProcessResponse {
    fn from(outcome: ProcessOutcome) -> Self {
        match outcome {
            ProcessOutcome::Saved { transaction_id } => ProcessResponse {
                processed: true,
                saved: Some(true),
                transaction_id: Some(transaction_id),
                error: None,
            },
            ProcessOutcome::Duplicate => ProcessResponse {
                processed: true,
                saved: Some(false),
                transaction_id: None,
                error: None,
            },
        }
    }
}

impl ProcessResponse {
    fn failed(err: &ProcessError) -> Self {
        Self::error(err.to_string())
    }

    fn error(message: String) -> Self {
        ProcessResponse {
            processed: false,
            saved: None,
            transaction_id: None,
            error: Some(message),
        }
    }
}

#[derive(Clone)]
pub struct WebhookProcessor {
    accounts: Arc<dyn AccountRepository>,
    transactions: Arc<dyn TransactionRepository>,
}

impl WebhookProcessor {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        transactions: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            accounts,
            transactions,
        }
    }

    /// Decode one push body and persist its transaction unless known.
    pub fn process(&self, body: &[u8]) -> Result<ProcessOutcome, ProcessError> {
        let dto = decode_push(body)?;

        // Known ids are acknowledged even when their account was re-keyed since
        if is_known(self.transactions.as_ref(), &dto.external_id)? {
            debug!("Webhook transaction {} already stored", dto.external_id);
            return Ok(ProcessOutcome::Duplicate);
        }

        let account = self
            .accounts
            .find_by_external_id(&dto.account_external_id)?
            .ok_or_else(|| ProcessError::UnknownAccount(dto.account_external_id.clone()))?;

        let saved = match self.transactions.save(dto.to_transaction(&account)) {
            Ok(saved) => saved,
            // Pull sync inserted it between the check and the insert
            Err(err) if err.is_duplicate() => return Ok(ProcessOutcome::Duplicate),
            Err(err) => return Err(err.into()),
        };
        info!(
            "Saved webhook transaction {} for account {}",
            saved.external_id, account.external_id
        );

        self.apply_balance(&account, &saved, dto.balance);

        Ok(ProcessOutcome::Saved {
            transaction_id: saved.id,
        })
    }

    /// Take the webhook's balance only when `saved` is the account's newest
    /// transaction. Redelivered older messages leave the balance alone.
    fn apply_balance(&self, account: &Account, saved: &Transaction, balance: i64) {
        if account.balance == balance {
            return;
        }

        let newest = match self.transactions.find_latest_by_account(&account.id) {
            Ok(newest) => newest,
            Err(err) => {
                warn!(
                    "Saved transaction {} but could not check balance order for {}: {}",
                    saved.external_id, account.external_id, err
                );
                return;
            }
        };
        if newest.is_some_and(|newest| newest.date > saved.date) {
            debug!(
                "Transaction {} predates the newest one on {}, balance kept",
                saved.external_id, account.external_id
            );
            return;
        }

        if let Err(err) = self.accounts.update_balance(&account.id, balance) {
            warn!(
                "Saved transaction {} but failed to update balance of {}: {}",
                saved.external_id, account.external_id, err
            );
        }
    }

    /// `process` mapped onto the broker's status contract.
    pub fn handle(&self, body: &[u8]) -> (u16, ProcessResponse) {
        match self.process(body) {
            Ok(outcome) => (200, outcome.into()),
            Err(err) => {
                let status = err.status_code();
                if status >= 500 {
                    warn!("Webhook processing failed, asking for redelivery: {}", err);
                } else {
                    warn!("Rejected webhook message: {}", err);
                }
                (status, ProcessResponse::failed(&err))
            }
        }
    }

    /// `handle` on tokio's blocking pool, keeping store I/O off the workers.
    pub async fn handle_blocking(&self, body: Vec<u8>) -> (u16, ProcessResponse) {
        let processor = self.clone();
        match tokio::task::spawn_blocking(move || processor.handle(&body)).await {
            Ok(result) => result,
            Err(err) => {
                error!("Webhook processing task failed: {}", err);
                (500, ProcessResponse::error(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl PushHandler for WebhookProcessor {
    async fn handle_push(&self, body: &[u8]) -> u16 {
        self.handle_blocking(body.to_vec()).await.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Transaction;
    use crate::error::StoreError;
    use crate::queue::{OutgoingMessage, PushEnvelope};
    use crate::storage::{BatchSave, SqliteStore};
    use crate::test_support::{sample_account, sample_transaction, webhook_json};
    use crate::error::StoreResult;
    use std::collections::HashMap;

    fn push_body(payload: &str) -> Vec<u8> {
        let message = OutgoingMessage::new(payload.as_bytes().to_vec());
        serde_json::to_vec(&PushEnvelope::wrap("m-1", &message, "sub")).unwrap()
    }

    fn processor_with_account() -> (Arc<SqliteStore>, WebhookProcessor) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        AccountRepository::save(store.as_ref(), sample_account("acc-ext")).unwrap();
        let processor = WebhookProcessor::new(store.clone(), store.clone());
        (store, processor)
    }

    #[test]
    fn test_new_transaction_is_saved() {
        let (store, processor) = processor_with_account();

        let (status, response) = processor.handle(&push_body(&webhook_json("tx-1", "acc-ext")));

        assert_eq!(status, 200);
        assert!(response.processed);
        assert_eq!(response.saved, Some(true));
        let id = response.transaction_id.unwrap();
        let stored = TransactionRepository::find_by_id(store.as_ref(), &id).unwrap().unwrap();
        assert_eq!(stored.external_id, "tx-1");

        let account = store.find_by_external_id("acc-ext").unwrap().unwrap();
        assert_eq!(account.balance, 987450);
    }

    #[test]
    fn test_known_transaction_is_acknowledged_without_saving() {
        let (store, processor) = processor_with_account();
        processor.handle(&push_body(&webhook_json("tx-1", "acc-ext")));

        let (status, response) = processor.handle(&push_body(&webhook_json("tx-1", "acc-ext")));

        assert_eq!(status, 200);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"processed": true, "saved": false})
        );
        assert_eq!(store.count_transactions().unwrap(), 1);
    }

    #[test]
    fn test_malformed_envelope_is_400() {
        let (_store, processor) = processor_with_account();
        let (status, response) = processor.handle(br#"{"subscription":"sub"}"#);
        assert_eq!(status, 400);
        assert!(!response.processed);
        assert!(response.error.unwrap().contains("envelope"));
    }

    #[test]
    fn test_unknown_account_is_400() {
        let (_store, processor) = processor_with_account();
        let (status, _) = processor.handle(&push_body(&webhook_json("tx-1", "nobody")));
        assert_eq!(status, 400);
    }

    /// Transaction store that knows nothing and fails every write.
    struct FailingWrites {
        error: fn() -> StoreError,
    }

    impl TransactionRepository for FailingWrites {
        fn find_by_id(&self, _id: &str) -> StoreResult<Option<Transaction>> {
            Ok(None)
        }
        fn find_by_account(&self, _account_id: &str) -> StoreResult<Vec<Transaction>> {
            Ok(Vec::new())
        }
        fn find_latest_by_account(&self, _account_id: &str) -> StoreResult<Option<Transaction>> {
            Ok(None)
        }
        fn find_by_external_ids(&self, _ids: &[String]) -> StoreResult<HashMap<String, Transaction>> {
            Ok(HashMap::new())
        }
        fn save(&self, _transaction: Transaction) -> StoreResult<Transaction> {
            Err((self.error)())
        }
        fn save_many(&self, _transactions: Vec<Transaction>) -> StoreResult<BatchSave<Transaction>> {
            Err((self.error)())
        }
        fn update_categorization(
            &self,
            _id: &str,
            _categorization: &crate::entities::Categorization,
        ) -> StoreResult<()> {
            Ok(())
        }
        fn update_categorizations(
            &self,
            _updates: &[(String, crate::entities::Categorization)],
        ) -> StoreResult<usize> {
            Ok(0)
        }
        fn delete(&self, _id: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    fn processor_over(transactions: FailingWrites) -> (Arc<SqliteStore>, WebhookProcessor) {
        let accounts = Arc::new(SqliteStore::open_in_memory().unwrap());
        AccountRepository::save(accounts.as_ref(), sample_account("acc-ext")).unwrap();
        let processor = WebhookProcessor::new(accounts.clone(), Arc::new(transactions));
        (accounts, processor)
    }

    #[test]
    fn test_store_failure_is_500() {
        let (_accounts, processor) = processor_over(FailingWrites {
            error: || StoreError::Unavailable("database is locked".to_string()),
        });

        let (status, response) = processor.handle(&push_body(&webhook_json("tx-1", "acc-ext")));

        assert_eq!(status, 500);
        assert!(!response.processed);
        assert!(response.error.unwrap().contains("database is locked"));
    }

    #[test]
    fn test_insert_race_is_acknowledged_as_duplicate() {
        // Existence check passes, then pull sync wins the insert
        let (accounts, processor) = processor_over(FailingWrites {
            error: || StoreError::Duplicate {
                entity: "transaction",
                key: "tx-1".to_string(),
            },
        });

        let (status, response) = processor.handle(&push_body(&webhook_json("tx-1", "acc-ext")));

        assert_eq!(status, 200);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"processed": true, "saved": false})
        );
        let account = accounts.find_by_external_id("acc-ext").unwrap().unwrap();
        assert_eq!(account.balance, 1_500_000);
    }

    fn webhook_at(external_id: &str, date: &str, balance: i64) -> String {
        serde_json::json!({
            "externalId": external_id,
            "date": date,
            "amount": -100,
            "currencyCode": 980,
            "description": "Silpo",
            "type": "DEBIT",
            "accountExternalId": "acc-ext",
            "balance": balance
        })
        .to_string()
    }

    #[test]
    fn test_late_older_transaction_keeps_newer_balance() {
        let (store, processor) = processor_with_account();

        let (status, _) = processor.handle(&push_body(&webhook_at("t2", "2024-03-20T10:00:00Z", 1000)));
        assert_eq!(status, 200);
        let (status, response) =
            processor.handle(&push_body(&webhook_at("t1", "2024-03-20T09:00:00Z", 1100)));
        assert_eq!(status, 200);
        assert_eq!(response.saved, Some(true));

        let account = store.find_by_external_id("acc-ext").unwrap().unwrap();
        assert_eq!(account.balance, 1000);
        assert_eq!(store.count_transactions().unwrap(), 2);
    }

    #[test]
    fn test_newer_transaction_moves_balance_forward() {
        let (store, processor) = processor_with_account();

        processor.handle(&push_body(&webhook_at("t1", "2024-03-20T09:00:00Z", 1100)));
        processor.handle(&push_body(&webhook_at("t2", "2024-03-20T10:00:00Z", 1000)));

        let account = store.find_by_external_id("acc-ext").unwrap().unwrap();
        assert_eq!(account.balance, 1000);
    }

    #[test]
    fn test_known_transaction_of_rekeyed_account_is_duplicate() {
        let (_store, processor) = processor_with_account();
        processor.handle(&push_body(&webhook_json("tx-1", "acc-ext")));

        // The bank has since reissued the account id
        let (status, response) = processor.handle(&push_body(&webhook_json("tx-1", "acc-new")));

        assert_eq!(status, 200);
        assert_eq!(response.saved, Some(false));
    }

    #[test]
    fn test_native_item_without_balance_never_touches_balance() {
        let (store, processor) = processor_with_account();
        let native = serde_json::json!({
            "type": "StatementItem",
            "data": {
                "account": "acc-ext",
                "statementItem": {
                    "id": "tx-1",
                    "time": 1710936000,
                    "description": "Silpo",
                    "hold": false,
                    "amount": -12550,
                    "commissionRate": 0,
                    "cashbackAmount": 0
                }
            }
        })
        .to_string();
        // The receiver forwards it untouched when it cannot normalize it
        assert!(crate::webhook::normalize_payload(native.as_bytes()).is_err());

        let (status, _) = processor.handle(&push_body(&native));

        assert_eq!(status, 400);
        let account = store.find_by_external_id("acc-ext").unwrap().unwrap();
        assert_eq!(account.balance, 1_500_000);
        assert_eq!(store.count_transactions().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blocking_handle_matches_handle() {
        let (_store, processor) = processor_with_account();
        let (status, response) = processor
            .handle_blocking(push_body(&webhook_json("tx-1", "acc-ext")))
            .await;
        assert_eq!(status, 200);
        assert_eq!(response.saved, Some(true));
    }

    #[test]
    fn test_race_with_pull_sync_is_duplicate() {
        let (store, processor) = processor_with_account();
        let account = store.find_by_external_id("acc-ext").unwrap().unwrap();
        TransactionRepository::save(store.as_ref(), sample_transaction("tx-1", &account.id, 20)).unwrap();

        let outcome = processor.process(&push_body(&webhook_json("tx-1", "acc-ext"))).unwrap();
        assert_eq!(outcome, ProcessOutcome::Duplicate);
    }
}
