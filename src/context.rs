// Process wiring: every collaborator is built here once and handed to the
// services through their constructors.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{Config, QueueBackend};
use crate::entities::{Account, Budget, Category, Rule, Transaction};
use crate::gateway::BankApiClient;
use crate::queue::{LocalPushQueue, MessageQueue, PubSubPublisher, RetryPolicy};
use crate::storage::{CsvMirror, DualWriteRepository, MirrorRow, SqliteStore};
use crate::sync::SyncService;
use crate::webhook::{WebhookProcessor, WebhookReceiver};

pub type DualWrite<T> = DualWriteRepository<SqliteStore, CsvMirror<T>>;

pub struct AppContext {
    pub config: Config,
    pub primary: SqliteStore,
    pub accounts: Arc<DualWrite<Account>>,
    pub transactions: Arc<DualWrite<Transaction>>,
    pub categories: Arc<DualWrite<Category>>,
    pub budgets: Arc<DualWrite<Budget>>,
    pub rules: Arc<DualWrite<Rule>>,
}

fn dual_write<T: MirrorRow>(primary: &SqliteStore, config: &Config) -> Arc<DualWrite<T>> {
    Arc::new(DualWriteRepository::new(
        primary.clone(),
        CsvMirror::new(&config.mirror_dir),
    ))
}

impl AppContext {
    /// Open the primary store and bind a mirror sheet to every repository.
    pub fn open(config: Config) -> Result<Self> {
        let primary = SqliteStore::open(&config.database_path).with_context(|| {
            format!("failed to open database {}", config.database_path.display())
        })?;
        info!("Primary store: {}", config.database_path.display());
        info!("Mirror sheets: {}", config.mirror_dir.display());

        Ok(AppContext {
            accounts: dual_write(&primary, &config),
            transactions: dual_write(&primary, &config),
            categories: dual_write(&primary, &config),
            budgets: dual_write(&primary, &config),
            rules: dual_write(&primary, &config),
            primary,
            config,
        })
    }

    /// Create every mirror sheet with its header row.
    pub fn init_mirror(&self) -> Result<()> {
        let dir = &self.config.mirror_dir;
        CsvMirror::<Account>::new(dir).ensure_sheet()?;
        CsvMirror::<Transaction>::new(dir).ensure_sheet()?;
        CsvMirror::<Category>::new(dir).ensure_sheet()?;
        CsvMirror::<Budget>::new(dir).ensure_sheet()?;
        CsvMirror::<Rule>::new(dir).ensure_sheet()?;
        Ok(())
    }

    pub fn sync_service(&self) -> Result<SyncService> {
        let token = self.config.require_bank_token()?;
        let gateway = BankApiClient::new(
            self.config.bank_api_url.clone(),
            token,
            self.config.bank_name.clone(),
        );

        Ok(SyncService::new(
            Arc::new(gateway),
            self.accounts.clone(),
            self.transactions.clone(),
            self.config.sync.clone(),
        ))
    }

    pub fn webhook_processor(&self) -> Arc<WebhookProcessor> {
        Arc::new(WebhookProcessor::new(
            self.accounts.clone(),
            self.transactions.clone(),
        ))
    }

    /// Queue backend from config. The local backend delivers to `processor`
    /// and must be created inside a tokio runtime.
    pub fn message_queue(&self, processor: Arc<WebhookProcessor>) -> Arc<dyn MessageQueue> {
        match &self.config.queue {
            QueueBackend::Local => Arc::new(LocalPushQueue::spawn(
                processor,
                self.config.subscription.clone(),
                RetryPolicy::default(),
            )),
            QueueBackend::PubSub {
                api_url,
                access_token,
                ..
            } => Arc::new(PubSubPublisher::new(api_url.clone(), access_token.clone())),
        }
    }

    #[cfg(feature = "server")]
    pub fn webhook_state(&self) -> crate::webhook::routes::WebhookState {
        let processor = self.webhook_processor();
        let queue = self.message_queue(processor.clone());
        crate::webhook::routes::WebhookState {
            receiver: Arc::new(self.webhook_receiver(queue)),
            processor,
        }
    }

    pub fn webhook_receiver(&self, queue: Arc<dyn MessageQueue>) -> WebhookReceiver {
        WebhookReceiver::new(queue, self.config.queue_topic.clone())
    }
}
