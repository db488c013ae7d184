// Pull sync end to end: fake bank -> SyncService -> dual-write -> SQLite + CSV

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use tempfile::TempDir;

use bank_ledger_sync::gateway::max_statement_window;
use bank_ledger_sync::{
    Account, AccountRepository, CsvMirror, DualWriteRepository, GatewayError, SqliteStore, SyncOptions,
    SyncService, Transaction, TransactionRepository,
};

use common::{bank_account, item, FakeBank, RecordingTransactions};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
}

fn options() -> SyncOptions {
    SyncOptions {
        account_delay: Duration::ZERO,
        initial_backoff: Duration::from_millis(1),
        ..SyncOptions::default()
    }
}

struct Harness {
    bank: Arc<FakeBank>,
    store: SqliteStore,
    transactions: Arc<RecordingTransactions>,
    service: SyncService,
}

fn harness(bank: FakeBank, options: SyncOptions) -> Harness {
    let bank = Arc::new(bank);
    let store = SqliteStore::open_in_memory().unwrap();
    let transactions = Arc::new(RecordingTransactions::new(store.clone()));
    let service = SyncService::new(
        bank.clone(),
        Arc::new(store.clone()),
        transactions.clone(),
        options,
    );
    Harness {
        bank,
        store,
        transactions,
        service,
    }
}

#[tokio::test]
async fn overlapping_runs_never_duplicate() {
    let bank = FakeBank::with_accounts(vec![bank_account("acc-1", "UA01")]);
    bank.post(
        "acc-1",
        vec![
            item("a", now() - ChronoDuration::minutes(2), -100),
            item("b", now() - ChronoDuration::days(3), -200),
        ],
    );
    let h = harness(bank, options());

    let first = h.service.run_at(now()).await;
    let second = h.service.run_at(now() + ChronoDuration::minutes(5)).await;
    let third = h.service.run_at(now() + ChronoDuration::minutes(5)).await;

    assert_eq!(first.transactions_new, 2);
    assert_eq!(second.transactions_new, 0);
    assert_eq!(third.transactions_new, 0);
    assert_eq!(h.store.count_transactions().unwrap(), 2);
}

#[tokio::test]
async fn only_unknown_transactions_reach_the_batch_save() {
    let bank = FakeBank::with_accounts(vec![bank_account("acc-1", "UA01")]);
    let items: Vec<_> = (0..10)
        .map(|i| item(&format!("tx-{}", i), now() - ChronoDuration::hours(i + 1), -(i + 1) * 100))
        .collect();
    bank.post("acc-1", items);
    let h = harness(bank, options());

    // Three of the ten are already stored
    h.service.run_at(now()).await;
    let account = h.store.find_by_external_id("acc-1").unwrap().unwrap();
    for ext in ["tx-0", "tx-1", "tx-2", "tx-3", "tx-4", "tx-5", "tx-6"] {
        let stored = h.transactions.inner.find_by_external_ids(&[ext.to_string()]).unwrap();
        let id = stored[ext].id.clone();
        TransactionRepository::delete(&h.transactions.inner, &id).unwrap();
    }
    h.store.update_last_sync_time(&account.id, now() - ChronoDuration::days(30)).unwrap();

    let report = h.service.run_at(now()).await;

    let batches = h.transactions.batches();
    let last = batches.last().unwrap();
    assert_eq!(last.len(), 7);
    assert_eq!(report.transactions_new, 7);
    assert_eq!(report.transactions_skipped, 3);
}

#[tokio::test]
async fn batch_is_sorted_by_date() {
    let bank = FakeBank::with_accounts(vec![bank_account("acc-1", "UA01")]);
    bank.post(
        "acc-1",
        vec![
            item("mid", now() - ChronoDuration::days(10), -1),
            item("new", now() - ChronoDuration::days(1), -1),
            item("old", now() - ChronoDuration::days(70), -1),
        ],
    );
    let h = harness(
        bank,
        SyncOptions {
            lookback_days: 90,
            ..options()
        },
    );

    h.service.run_at(now()).await;

    let batches = h.transactions.batches();
    assert_eq!(batches.len(), 1);
    let dates: Vec<_> = batches[0].iter().map(|t: &Transaction| t.date).collect();
    assert!(dates.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(batches[0][0].external_id, "old");
}

#[tokio::test]
async fn long_window_is_fetched_in_contiguous_chunks() {
    let bank = FakeBank::with_accounts(vec![bank_account("acc-1", "UA01")]);
    let start = now() - ChronoDuration::days(100);
    let h = harness(
        bank,
        SyncOptions {
            start_date: Some(start),
            ..options()
        },
    );

    h.service.run_at(now()).await;

    let calls = h.bank.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls.first().unwrap().1, start);
    assert_eq!(calls.last().unwrap().2, now());
    for pair in calls.windows(2) {
        assert_eq!(pair[0].2, pair[1].1);
    }
    assert!(calls.iter().all(|(_, from, to)| *to - *from <= max_statement_window()));
}

#[tokio::test]
async fn overlap_is_clamped_to_earliest_allowed() {
    let watermark = now() - ChronoDuration::hours(1);
    let earliest = watermark - ChronoDuration::minutes(4);
    let bank = FakeBank::with_accounts(vec![bank_account("acc-1", "UA01")]);
    let h = harness(
        bank,
        SyncOptions {
            overlap: ChronoDuration::milliseconds(600_000),
            start_date: Some(earliest),
            ..options()
        },
    );

    let mut account = bank_account("acc-1", "UA01");
    account.last_sync_time = Some(watermark);
    AccountRepository::save(&h.store, account).unwrap();

    h.service.run_at(now()).await;

    let calls = h.bank.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, earliest);
}

#[tokio::test]
async fn rate_limit_retry_recovers() {
    let bank = FakeBank::with_accounts(vec![bank_account("acc-1", "UA01")]);
    bank.fail_next(GatewayError::rate_limited("Too many requests"));
    let h = harness(
        bank,
        SyncOptions {
            max_retries: 3,
            ..options()
        },
    );

    let report = h.service.run_at(now()).await;

    assert_eq!(h.bank.calls().len(), 2);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn one_failing_account_does_not_stop_the_rest() {
    let bank = FakeBank::with_accounts(vec![
        bank_account("acc-1", "UA01"),
        bank_account("acc-2", "UA02"),
    ]);
    bank.fail_next(GatewayError::NotFound("acc-1".to_string()));
    bank.post("acc-2", vec![item("x", now() - ChronoDuration::hours(1), -5)]);
    let h = harness(bank, options());

    let report = h.service.run_at(now()).await;

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("Failed to sync account"));
    assert!(report.errors[0].contains("(acc-1)"));
    assert_eq!(report.transactions_new, 1);

    let failed = h.store.find_by_external_id("acc-1").unwrap().unwrap();
    let synced = h.store.find_by_external_id("acc-2").unwrap().unwrap();
    assert!(failed.last_sync_time.is_none());
    assert_eq!(synced.last_sync_time, Some(now()));
}

#[tokio::test]
async fn sync_through_dual_write_fills_the_mirror() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open_in_memory().unwrap();
    let accounts = Arc::new(DualWriteRepository::new(
        store.clone(),
        CsvMirror::<Account>::new(dir.path()),
    ));
    let transactions = Arc::new(DualWriteRepository::new(
        store.clone(),
        CsvMirror::<Transaction>::new(dir.path()),
    ));

    let bank = Arc::new(FakeBank::with_accounts(vec![bank_account("acc-1", "UA01")]));
    bank.post(
        "acc-1",
        vec![
            item("a", now() - ChronoDuration::hours(2), -100),
            item("b", now() - ChronoDuration::hours(1), 300),
        ],
    );
    let service = SyncService::new(bank, accounts.clone(), transactions.clone(), options());

    let report = service.run_at(now()).await;
    assert!(!report.has_errors());

    let tx_rows = CsvMirror::<Transaction>::new(dir.path()).read_rows().unwrap();
    assert_eq!(tx_rows.len(), 2);
    let account_rows = CsvMirror::<Account>::new(dir.path()).read_rows().unwrap();
    assert_eq!(account_rows.len(), 1);
    assert_eq!(accounts.mirror_failures() + transactions.mirror_failures(), 0);
}
