// Sync window arithmetic
//
// from = last_sync ? max(last_sync - overlap, earliest) : earliest
// to   = now
// [from, to) is then cut into gap-free chunks no longer than the bank allows.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    pub fn span(&self) -> Duration {
        self.to - self.from
    }
}

/// Oldest instant a sync may reach back to.
///
/// A configured start date wins; otherwise `now - lookback_days`.
pub fn earliest_allowed(
    now: DateTime<Utc>,
    lookback_days: i64,
    start_date: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    start_date.unwrap_or_else(|| now - Duration::days(lookback_days))
}

pub fn sync_window(
    last_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    overlap: Duration,
    earliest: DateTime<Utc>,
) -> SyncWindow {
    let from = match last_sync {
        Some(watermark) => (watermark - overlap).max(earliest),
        None => earliest,
    };
    SyncWindow { from, to: now }
}

/// Split `window` into consecutive chunks of at most `max_span`, oldest
/// first. Each chunk starts where the previous one ended.
pub fn chunk_window(window: SyncWindow, max_span: Duration) -> Vec<SyncWindow> {
    if window.is_empty() {
        return Vec::new();
    }
    if max_span <= Duration::zero() {
        return vec![window];
    }

    let mut chunks = Vec::new();
    let mut start = window.from;
    while start < window.to {
        let end = (start + max_span).min(window.to);
        chunks.push(SyncWindow { from: start, to: end });
        start = end;
    }
    chunks
}
