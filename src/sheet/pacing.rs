use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::pacing::{
    DEFAULT_BACKOFF_MS, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_INTERVAL_MS,
};
use crate::errors::SheetError;
use crate::sheet::{CellRange, CellRef, SheetClient, SheetRow};
use crate::types::{CellText, RowNumber};

/// Request pacing for sheet collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Minimum pause between consecutive requests, in milliseconds.
    pub request_interval_ms: u64,
    /// Backoff before the first retry of a rate-limited request; doubles per retry.
    pub backoff_ms: u64,
    /// Retries allowed per request before the rate-limit error is returned.
    pub max_retries: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            request_interval_ms: DEFAULT_REQUEST_INTERVAL_MS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PacingConfig {
    /// No pauses and no backoff, keeping the retry budget. Used for local backends.
    pub fn unpaced() -> Self {
        Self {
            request_interval_ms: 0,
            backoff_ms: 0,
            ..Self::default()
        }
    }

    /// Pause between requests.
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    /// Backoff before retry number `attempt` (zero-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms).saturating_mul(1u32 << attempt.min(16))
    }
}

/// Sheet client wrapper that spaces requests out and retries rate-limited ones.
///
/// Every call waits until `request_interval` has elapsed since the previous
/// call. A `RateLimited` response is retried after an exponential backoff;
/// once `max_retries` is spent the error is returned to the caller.
#[derive(Debug)]
pub struct PacedSheets<C> {
    inner: C,
    config: PacingConfig,
    last_request: Mutex<Option<Instant>>,
    retries: AtomicUsize,
}

impl<C: SheetClient> PacedSheets<C> {
    /// Wrap `inner` with `config`.
    pub fn new(inner: C, config: PacingConfig) -> Self {
        Self {
            inner,
            config,
            last_request: Mutex::new(None),
            retries: AtomicUsize::new(0),
        }
    }

    /// Wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Active pacing settings.
    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Rate-limit retries performed so far.
    pub fn retry_count(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    fn wait_turn(&self) {
        let interval = self.config.request_interval();
        // Only a timestamp is guarded, so the poisoned value is still valid.
        let mut last = self.last_request.lock().unwrap_or_else(|poisoned| {
            warn!("[ledger:pacing] request clock lock poisoned; recovering");
            self.last_request.clear_poison();
            PoisonError::into_inner(poisoned)
        });
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }

    fn call<T>(
        &self,
        sheet: &str,
        op: impl Fn(&C) -> Result<T, SheetError>,
    ) -> Result<T, SheetError> {
        let mut attempt = 0;
        loop {
            self.wait_turn();
            match op(&self.inner) {
                Err(SheetError::RateLimited { .. }) if attempt < self.config.max_retries => {
                    let delay = self.config.backoff_for(attempt);
                    warn!(
                        "[ledger:pacing] sheet '{}' rate limited; retry {}/{} in {:?}",
                        sheet,
                        attempt + 1,
                        self.config.max_retries,
                        delay
                    );
                    thread::sleep(delay);
                    self.retries.fetch_add(1, Ordering::SeqCst);
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

impl<C: SheetClient> SheetClient for PacedSheets<C> {
    fn next_free_row(&self, sheet: &str) -> Result<RowNumber, SheetError> {
        self.call(sheet, |inner| inner.next_free_row(sheet))
    }

    fn write_rows(
        &self,
        sheet: &str,
        start_row: RowNumber,
        rows: &[SheetRow],
    ) -> Result<(), SheetError> {
        self.call(sheet, |inner| inner.write_rows(sheet, start_row, rows))
    }

    fn set_choice_constraint(
        &self,
        sheet: &str,
        range: &CellRange,
        allowed: &[&str],
    ) -> Result<(), SheetError> {
        self.call(sheet, |inner| inner.set_choice_constraint(sheet, range, allowed))
    }

    fn read_cell(&self, sheet: &str, cell: &CellRef) -> Result<Option<CellText>, SheetError> {
        self.call(sheet, |inner| inner.read_cell(sheet, cell))
    }

    fn find_row_by_value(
        &self,
        sheet: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<RowNumber>, SheetError> {
        self.call(sheet, |inner| inner.find_row_by_value(sheet, column, value))
    }

    fn next_unfilled_row(&self, sheet: &str, column: &str) -> Result<RowNumber, SheetError> {
        self.call(sheet, |inner| inner.next_unfilled_row(sheet, column))
    }

    fn read_column(&self, sheet: &str, range: &CellRange) -> Result<Vec<CellText>, SheetError> {
        self.call(sheet, |inner| inner.read_column(sheet, range))
    }
}
