// Deduplication by bank external id
//
// Shared by pull sync and the webhook processor. One batched existence
// query per call; the complement of the persisted set is what gets saved.

use std::collections::HashSet;

use tracing::debug;

use crate::entities::Transaction;
use crate::error::StoreResult;
use crate::storage::TransactionRepository;

/// Result of splitting candidates into new and already-known transactions.
#[derive(Debug, Default)]
pub struct Partition {
    /// Not yet persisted, in input order
    pub new: Vec<Transaction>,
    /// Already in the primary store
    pub existing: Vec<Transaction>,
    /// Repeated external ids inside the input itself
    pub repeated: usize,
}

impl Partition {
    /// Candidates that will not be saved.
    pub fn skipped(&self) -> usize {
        self.existing.len() + self.repeated
    }
}

/// Drop repeated external ids, keeping the first occurrence.
pub fn dedupe_batch(transactions: Vec<Transaction>) -> (Vec<Transaction>, usize) {
    let mut seen = HashSet::with_capacity(transactions.len());
    let total = transactions.len();
    let unique: Vec<Transaction> = transactions
        .into_iter()
        .filter(|tx| seen.insert(tx.external_id.clone()))
        .collect();
    let repeated = total - unique.len();
    (unique, repeated)
}

/// Whether a transaction with `external_id` is already persisted.
pub fn is_known<R>(repo: &R, external_id: &str) -> StoreResult<bool>
where
    R: TransactionRepository + ?Sized,
{
    let persisted = repo.find_by_external_ids(&[external_id.to_string()])?;
    Ok(persisted.contains_key(external_id))
}

/// Split `candidates` by whether their external id is already persisted.
pub fn partition_new<R>(repo: &R, candidates: Vec<Transaction>) -> StoreResult<Partition>
where
    R: TransactionRepository + ?Sized,
{
    let (unique, repeated) = dedupe_batch(candidates);
    if unique.is_empty() {
        return Ok(Partition {
            repeated,
            ..Partition::default()
        });
    }

    let ids: Vec<String> = unique.iter().map(|tx| tx.external_id.clone()).collect();
    let persisted = repo.find_by_external_ids(&ids)?;

    let (existing, new): (Vec<_>, Vec<_>) = unique
        .into_iter()
        .partition(|tx| persisted.contains_key(&tx.external_id));

    debug!(
        "Dedup: {} new, {} already stored, {} repeated in batch",
        new.len(),
        existing.len(),
        repeated
    );

    Ok(Partition {
        new,
        existing,
        repeated,
    })
}
