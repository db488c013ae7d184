// Bank Ledger Sync - Core Library
// Exposes all modules for use in the CLI, the webhook server, and tests

pub mod config;
pub mod context;
pub mod dedup;
pub mod entities;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod queue;
pub mod reconciliation;
pub mod storage;
pub mod sync;
pub mod webhook;

// Re-export commonly used types
pub use config::{Config, QueueBackend};
pub use context::AppContext;
pub use dedup::{partition_new, Partition};
pub use entities::{
    Account, AccountRole, AccountSource, Budget, Categorization, CategorizationStatus, Category,
    Rule, Transaction, TransactionType,
};
pub use error::{
    DecodeError, GatewayError, MirrorError, ProcessError, QueueError, StoreError, StoreResult,
    SyncError,
};
pub use gateway::{BankApiClient, BankGateway, StatementItem};
pub use queue::{LocalPushQueue, MessageQueue, OutgoingMessage, PubSubPublisher, PushEnvelope};
pub use reconciliation::{AccountReconciler, ReconcileOutcome};
pub use storage::{
    AccountRepository, BatchSave, BudgetRepository, CategoryRepository, CsvMirror,
    DualWriteRepository, MirrorStore, RuleRepository, SqliteStore, TransactionRepository,
};
pub use sync::{SyncOptions, SyncReport, SyncService};
pub use webhook::{WebhookProcessor, WebhookReceiver, WebhookTransaction};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
