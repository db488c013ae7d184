// Mirror Store - flat tabular projection of every entity
//
// One sheet per entity (`<sheet>.csv`), header row = field names, one row
// per entity, `id` always in the first column. The mirror is never read by
// the engine; it exists for spreadsheet tooling downstream.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::SecondsFormat;

use crate::entities::{Account, Budget, Category, Rule, Transaction};
use crate::error::MirrorError;

// ============================================================================
// ROW PROJECTION
// ============================================================================

/// How an entity is flattened into one mirror row.
pub trait MirrorRow {
    /// Sheet (file stem) this entity lives in
    const SHEET: &'static str;

    /// Column names; the first one must be `id`
    const HEADERS: &'static [&'static str];

    fn row_id(&self) -> &str;

    /// Cells in `HEADERS` order
    fn to_row(&self) -> Vec<String>;
}

/// Write side of a mirror, one instance per entity type.
pub trait MirrorStore<T>: Send + Sync {
    /// Add rows for newly created entities.
    fn append(&self, rows: &[T]) -> Result<(), MirrorError>;

    /// Replace rows with matching ids, appending the ones not present yet.
    fn upsert(&self, rows: &[T]) -> Result<(), MirrorError>;

    fn remove(&self, ids: &[String]) -> Result<(), MirrorError>;
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

impl MirrorRow for Account {
    const SHEET: &'static str = "accounts";
    const HEADERS: &'static [&'static str] = &[
        "id",
        "externalId",
        "name",
        "currency",
        "balance",
        "actualBalance",
        "type",
        "role",
        "bankName",
        "iban",
        "maskedPan",
        "creditLimit",
        "lastSyncTime",
        "source",
        "archived",
    ];

    fn row_id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.external_id.clone(),
            self.name.clone(),
            self.currency.clone(),
            self.balance.to_string(),
            self.actual_balance().to_string(),
            self.account_type.clone(),
            self.role.as_str().to_string(),
            self.bank_name.clone(),
            self.iban.clone(),
            self.masked_pan.join(","),
            opt(&self.credit_limit),
            self.last_sync_time
                .map(|t| t.timestamp_millis().to_string())
                .unwrap_or_default(),
            self.source.as_str().to_string(),
            self.archived.to_string(),
        ]
    }
}

impl MirrorRow for Transaction {
    const SHEET: &'static str = "transactions";
    const HEADERS: &'static [&'static str] = &[
        "id",
        "externalId",
        "date",
        "amount",
        "currency",
        "operationAmount",
        "description",
        "type",
        "accountId",
        "mcc",
        "originalMcc",
        "hold",
        "counterName",
        "counterIban",
        "counterEdrpou",
        "comment",
        "cashbackAmount",
        "commissionRate",
        "receiptId",
        "invoiceId",
        "balanceAfter",
        "status",
        "categoryId",
        "budgetId",
        "categorizationReason",
    ];

    fn row_id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.external_id.clone(),
            self.date.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.amount.to_string(),
            self.currency.clone(),
            self.operation_amount.to_string(),
            self.description.clone(),
            self.transaction_type.as_str().to_string(),
            self.account_id.clone(),
            opt(&self.mcc),
            opt(&self.original_mcc),
            self.hold.to_string(),
            opt(&self.counter_name),
            opt(&self.counter_iban),
            opt(&self.counter_edrpou),
            opt(&self.comment),
            self.cashback_amount.to_string(),
            self.commission_rate.to_string(),
            opt(&self.receipt_id),
            opt(&self.invoice_id),
            opt(&self.balance_after),
            self.categorization.status.as_str().to_string(),
            opt(&self.categorization.category_id),
            opt(&self.categorization.budget_id),
            opt(&self.categorization.reason),
        ]
    }
}

impl MirrorRow for Category {
    const SHEET: &'static str = "categories";
    const HEADERS: &'static [&'static str] = &["id", "name", "groupName", "archived"];

    fn row_id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.group_name.clone(),
            self.archived.to_string(),
        ]
    }
}

impl MirrorRow for Budget {
    const SHEET: &'static str = "budgets";
    const HEADERS: &'static [&'static str] = &["id", "categoryId", "month", "allocated"];

    fn row_id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.category_id.clone(),
            self.month.clone(),
            self.allocated.to_string(),
        ]
    }
}

impl MirrorRow for Rule {
    const SHEET: &'static str = "rules";
    const HEADERS: &'static [&'static str] = &[
        "id",
        "pattern",
        "categoryId",
        "priority",
        "matchCount",
        "enabled",
    ];

    fn row_id(&self) -> &str {
        &self.id
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.pattern.clone(),
            self.category_id.clone(),
            self.priority.to_string(),
            self.match_count.to_string(),
            self.enabled.to_string(),
        ]
    }
}

// ============================================================================
// CSV SHEET MIRROR
// ============================================================================

/// A directory of CSV sheets acting as the mirror store.
pub struct CsvMirror<T> {
    path: PathBuf,
    // Serializes read-modify-write cycles on the sheet file
    lock: Mutex<()>,
    _row: PhantomData<fn(&T)>,
}

impl<T: MirrorRow> CsvMirror<T> {
    pub fn new(dir: &Path) -> Self {
        CsvMirror {
            path: dir.join(format!("{}.csv", T::SHEET)),
            lock: Mutex::new(()),
            _row: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the sheet with its header row if it does not exist yet.
    pub fn ensure_sheet(&self) -> Result<(), MirrorError> {
        let _guard = self.guard()?;
        self.ensure_sheet_locked()
    }

    /// Every data row currently in the sheet (header excluded).
    pub fn read_rows(&self) -> Result<Vec<Vec<String>>, MirrorError> {
        let _guard = self.guard()?;
        self.read_rows_locked()
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, MirrorError> {
        self.lock
            .lock()
            .map_err(|_| MirrorError::Unavailable(format!("{} lock poisoned", T::SHEET)))
    }

    fn ensure_sheet_locked(&self) -> Result<(), MirrorError> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(T::HEADERS)?;
        writer.flush()?;
        Ok(())
    }

    fn read_rows_locked(&self) -> Result<Vec<Vec<String>>, MirrorError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)?;
        check_header::<T, _>(&mut reader)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    /// Rewrite the whole sheet through a temp file so readers never see a
    /// half-written sheet.
    fn write_rows_locked(&self, rows: &[Vec<String>]) -> Result<(), MirrorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(T::HEADERS)?;
            for row in rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Refuse to touch a sheet whose header row belongs to something else.
fn check_header<T: MirrorRow, R: std::io::Read>(reader: &mut csv::Reader<R>) -> Result<(), MirrorError> {
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header != T::HEADERS {
        return Err(MirrorError::Header {
            sheet: T::SHEET.to_string(),
            found: header.join(","),
        });
    }
    Ok(())
}

impl<T: MirrorRow> MirrorStore<T> for CsvMirror<T> {
    fn append(&self, rows: &[T]) -> Result<(), MirrorError> {
        if rows.is_empty() {
            return Ok(());
        }
        let _guard = self.guard()?;
        self.ensure_sheet_locked()?;
        check_header::<T, _>(&mut csv::Reader::from_path(&self.path)?)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        for row in rows {
            writer.write_record(row.to_row())?;
        }
        writer.flush()?;
        Ok(())
    }

    fn upsert(&self, rows: &[T]) -> Result<(), MirrorError> {
        if rows.is_empty() {
            return Ok(());
        }
        let _guard = self.guard()?;
        let mut existing = self.read_rows_locked()?;

        for entity in rows {
            let new_row = entity.to_row();
            match existing
                .iter_mut()
                .find(|row| row.first().map(String::as_str) == Some(entity.row_id()))
            {
                Some(row) => *row = new_row,
                None => existing.push(new_row),
            }
        }

        self.write_rows_locked(&existing)
    }

    fn remove(&self, ids: &[String]) -> Result<(), MirrorError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.guard()?;
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let kept: Vec<Vec<String>> = self
            .read_rows_locked()?
            .into_iter()
            .filter(|row| !row.first().is_some_and(|id| doomed.contains(id.as_str())))
            .collect();

        self.write_rows_locked(&kept)
    }
}

// ============================================================================
// TESTS
// ============================================================================
