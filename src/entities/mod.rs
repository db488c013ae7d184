// Entity Models
//
// Every entity has:
// - A primary-store identity (`id`) assigned on insert
// - A bank-assigned `external_id` where the bank owns the record
// - Plain serde derives; storage-specific shapes live in `storage`

pub mod account;
pub mod budget;
pub mod category;
pub mod rule;
pub mod transaction;

pub use account::{Account, AccountRole, AccountSource};
pub use budget::Budget;
pub use category::Category;
pub use rule::Rule;
pub use transaction::{
    sort_by_date, Categorization, CategorizationStatus, Transaction, TransactionType,
};
