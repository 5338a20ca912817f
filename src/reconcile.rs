use chrono::Utc;
use tracing::{debug, info, warn};

use crate::constants::sheet::MESSAGE_COL;
use crate::errors::LedgerError;
use crate::log::LogStore;
use crate::rating::{METRIC_COUNT, Metric};
use crate::session::Session;
use crate::sheet::{CellRef, SheetClient};
use crate::types::{CellText, MessageId, RaterId};

/// Options for a reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Skip entries already marked "done" instead of re-reading them.
    pub skip_done: bool,
}

/// Summary of one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rater whose sheet was read.
    pub rater_id: RaterId,
    /// Entries looked up on the sheet.
    pub scanned: usize,
    /// Entries whose stored ratings changed.
    pub updated: usize,
    /// Entries that moved from "allocated" to "done".
    pub completed: usize,
    /// Message ids that could not be found on the sheet.
    pub missing: Vec<MessageId>,
}

impl<C: SheetClient, L: LogStore> Session<C, L> {
    /// Pull the rater's sheet values back into the log with default options.
    pub fn reconcile(&mut self, rater_id: &str) -> Result<ReconcileReport, LedgerError> {
        self.reconcile_with(rater_id, ReconcileOptions::default())
    }

    /// Pull the rater's sheet values back into the log.
    ///
    /// Each entry's row is located by message id and its rating cells are
    /// merged: a non-blank cell replaces the stored value, a blank cell never
    /// clears one, and `last_updated_time` moves only when a value changed.
    /// Status is recomputed from the merged ratings. The log is persisted once
    /// at the end; a sheet failure aborts the pass and leaves both the stored
    /// and the in-memory log untouched.
    pub fn reconcile_with(
        &mut self,
        rater_id: &str,
        options: ReconcileOptions,
    ) -> Result<ReconcileReport, LedgerError> {
        let sheet = self.sheet_for(rater_id)?;
        let targets: Vec<MessageId> = self
            .log
            .entries_for(rater_id)
            .filter(|entry| !(options.skip_done && entry.is_done()))
            .map(|entry| entry.message_id.clone())
            .collect();
        let mut report = ReconcileReport {
            rater_id: rater_id.to_string(),
            ..ReconcileReport::default()
        };
        let mut staged = self.log.clone();
        let now = Utc::now();

        for message_id in targets {
            report.scanned += 1;
            let Some(row) = self
                .sheets
                .find_row_by_value(&sheet, MESSAGE_COL, &message_id)?
            else {
                warn!(
                    "[ledger:reconcile] message '{}' not found on sheet of '{}'; skipping",
                    message_id, rater_id
                );
                report.missing.push(message_id);
                continue;
            };
            let mut cells: Vec<(Metric, Option<CellText>)> = Vec::with_capacity(METRIC_COUNT);
            for metric in Metric::ALL {
                let value = self
                    .sheets
                    .read_cell(&sheet, &CellRef::new(metric.column(), row))?;
                cells.push((metric, value));
            }

            let Some(entry) = staged.get_mut(&message_id, rater_id) else {
                continue;
            };
            let was_done = entry.is_done();
            let mut changed = false;
            for (metric, value) in cells {
                let Some(value) = value else {
                    continue;
                };
                if !metric.is_valid_label(&value) {
                    debug!(
                        "[ledger:reconcile] row {} {}: '{}' is not a dropdown label",
                        row, metric, value
                    );
                }
                changed |= entry.ratings.merge(metric, &value);
            }
            entry.status = entry.derived_status();
            if changed {
                entry.last_updated_time = now;
                report.updated += 1;
            }
            if !was_done && entry.is_done() {
                report.completed += 1;
            }
        }

        self.store.persist(&staged)?;
        self.log = staged;
        info!(
            "[ledger:reconcile] '{}': scanned {}, updated {}, completed {}, missing {}",
            rater_id,
            report.scanned,
            report.updated,
            report.completed,
            report.missing.len()
        );
        Ok(report)
    }
}
