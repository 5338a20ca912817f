use chrono::Utc;
use tracing::{info, warn};

use crate::data::{AllocationEntry, ConversationRecord};
use crate::errors::LedgerError;
use crate::log::LogStore;
use crate::rating::Metric;
use crate::session::Session;
use crate::sheet::{CellRange, SheetClient, SheetRow};
use crate::types::{ConversationId, MessageId, RaterId, RowNumber, SheetAddress};

/// Rows handed to a rater by one `schedule` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocationBatch {
    /// Rater receiving the batch.
    pub rater_id: RaterId,
    /// Sheet the rows were written to.
    pub sheet: SheetAddress,
    /// Conversations allocated, in global order.
    pub conversations: Vec<ConversationId>,
    /// Messages allocated, in sheet row order.
    pub messages: Vec<MessageId>,
    /// First sheet row of the block; `None` for an empty batch.
    pub start_row: Option<RowNumber>,
}

impl AllocationBatch {
    /// True when nothing was allocated.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Sheet rows covered by the batch, as an inclusive range over the message column.
    pub fn row_range(&self) -> Option<(RowNumber, RowNumber)> {
        let start = self.start_row?;
        let len = self.messages.len() as RowNumber;
        (len > 0).then(|| (start, start + len - 1))
    }
}

/// Result of a `schedule` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// New rows were written (possibly none when the corpus is exhausted or `n` is 0).
    Allocated(AllocationBatch),
    /// The rater still has unfinished rows; nothing was changed.
    Conflict {
        /// Rater that was refused.
        rater_id: RaterId,
        /// Entries of the rater still in the "allocated" state.
        outstanding: usize,
    },
}

impl<C: SheetClient, L: LogStore> Session<C, L> {
    /// Allocate the next `n` conversations the rater has not seen yet.
    ///
    /// Refuses with `ScheduleOutcome::Conflict` while the rater has outstanding
    /// entries. Otherwise every message of the selected conversations is
    /// written to the rater's sheet as one contiguous block, each rating column
    /// of the block gets its dropdown, and the log is persisted. The in-memory
    /// log only changes once the persist succeeded.
    pub fn schedule(&mut self, rater_id: &str, n: usize) -> Result<ScheduleOutcome, LedgerError> {
        let sheet = self.sheet_for(rater_id)?;
        let outstanding = self.log.outstanding(rater_id);
        if outstanding > 0 {
            warn!(
                "[ledger:schedule] rater '{}' still has {} unfinished rows; refusing new allocation",
                rater_id, outstanding
            );
            return Ok(ScheduleOutcome::Conflict {
                rater_id: rater_id.to_string(),
                outstanding,
            });
        }

        let mut batch = AllocationBatch {
            rater_id: rater_id.to_string(),
            sheet: sheet.clone(),
            ..AllocationBatch::default()
        };
        let selected = {
            let seen = self.log.conversations_for(rater_id);
            self.order.next_unallocated(&seen, n)
        };
        if selected.is_empty() {
            info!(
                "[ledger:schedule] nothing to allocate to '{}' (requested {})",
                rater_id, n
            );
            return Ok(ScheduleOutcome::Allocated(batch));
        }

        let records: Vec<&ConversationRecord> = selected
            .iter()
            .filter_map(|conversation| self.corpus.messages(conversation))
            .flatten()
            .collect();
        let rows: Vec<SheetRow> = records
            .iter()
            .map(|record| {
                vec![
                    record.conversation_id.clone(),
                    record.message_id.clone(),
                    record.speaker.clone(),
                    record.text.clone(),
                ]
            })
            .collect();

        // Entries are staged first so a log conflict aborts before any sheet write.
        let mut staged = self.log.clone();
        let now = Utc::now();
        for record in &records {
            staged.append(AllocationEntry::allocated(record, rater_id, now))?;
        }

        let start_row = self.sheets.next_free_row(&sheet)?;
        self.sheets.write_rows(&sheet, start_row, &rows)?;
        let end_row = start_row + rows.len() as RowNumber - 1;
        for metric in Metric::ALL {
            let range = CellRange::new(metric.column(), start_row, end_row);
            self.sheets
                .set_choice_constraint(&sheet, &range, &metric.labels())?;
        }

        self.store.persist(&staged)?;
        self.log = staged;

        batch.messages = records
            .iter()
            .map(|record| record.message_id.clone())
            .collect();
        batch.conversations = selected;
        batch.start_row = Some(start_row);
        info!(
            "[ledger:schedule] allocated {} conversations ({} messages) to '{}' at rows {}..={}",
            batch.conversations.len(),
            batch.messages.len(),
            rater_id,
            start_row,
            end_row
        );
        Ok(ScheduleOutcome::Allocated(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RaterRegistry;
    use crate::constants::sheet::FIRST_DATA_ROW;
    use crate::log::{AllocationLog, MemoryLogStore};
    use crate::sheet::{InMemorySheets, PacingConfig};
    use crate::source::{Corpus, fixtures};

    fn session_with<L: LogStore>(
        sheets: &InMemorySheets,
        records: Vec<ConversationRecord>,
        store: L,
    ) -> Session<&InMemorySheets, L> {
        Session::new(
            Corpus::from_records(records),
            store,
            RaterRegistry::from_pairs([("r1", "s1"), ("r2", "s2")]),
            sheets,
            42,
            PacingConfig::unpaced(),
        )
        .unwrap()
    }

    fn session(
        sheets: &InMemorySheets,
        conversations: usize,
    ) -> Session<&InMemorySheets, MemoryLogStore> {
        session_with(sheets, fixtures::records(conversations, 3), MemoryLogStore::new())
    }

    /// Loads an empty log and refuses every persist.
    struct ReadOnlyStore;

    impl LogStore for ReadOnlyStore {
        fn load(&self) -> Result<AllocationLog, LedgerError> {
            Ok(AllocationLog::default())
        }

        fn persist(&self, _log: &AllocationLog) -> Result<(), LedgerError> {
            Err(LedgerError::Log("store is read-only".into()))
        }
    }

    fn allocated(outcome: ScheduleOutcome) -> AllocationBatch {
        match outcome {
            ScheduleOutcome::Allocated(batch) => batch,
            other => panic!("expected allocation, got {other:?}"),
        }
    }

    #[test]
    fn schedule_writes_block_with_dropdowns() {
        let sheets = InMemorySheets::with_sheets(["s1", "s2"]);
        let mut session = session(&sheets, 4);
        let batch = allocated(session.schedule("r1", 2).unwrap());

        assert_eq!(batch.conversations, session.order().ids()[..2].to_vec());
        assert_eq!(batch.messages.len(), 6);
        assert_eq!(batch.row_range(), Some((FIRST_DATA_ROW, FIRST_DATA_ROW + 5)));
        let rows = sheets.rows("s1").unwrap();
        assert_eq!(rows.len(), (FIRST_DATA_ROW + 5) as usize);
        assert_eq!(rows[FIRST_DATA_ROW as usize - 1][1], batch.messages[0]);

        let constraints = sheets.constraints("s1").unwrap();
        let columns: Vec<&str> = constraints.iter().map(|c| c.range.column.as_str()).collect();
        assert_eq!(columns, vec!["E", "F", "G", "H"]);
        assert_eq!(constraints[0].allowed, Metric::DirectnessContent.labels());
        assert_eq!(session.log().len(), 6);
        assert_eq!(session.store().persist_count(), 1);
    }

    #[test]
    fn outstanding_rows_block_new_allocation() {
        let sheets = InMemorySheets::with_sheets(["s1", "s2"]);
        let mut session = session(&sheets, 4);
        allocated(session.schedule("r1", 1).unwrap());
        let requests = sheets.request_count();
        let outcome = session.schedule("r1", 1).unwrap();
        assert_eq!(
            outcome,
            ScheduleOutcome::Conflict {
                rater_id: "r1".into(),
                outstanding: 3
            }
        );
        assert_eq!(sheets.request_count(), requests);
        assert_eq!(session.log().len(), 3);
        assert_eq!(session.store().persist_count(), 1);
    }

    #[test]
    fn zero_or_exhausted_requests_make_no_sheet_calls() {
        let sheets = InMemorySheets::with_sheets(["s1", "s2"]);
        let mut session = session(&sheets, 2);
        assert!(allocated(session.schedule("r1", 0).unwrap()).is_empty());
        assert_eq!(sheets.request_count(), 0);

        let batch = allocated(session.schedule("r1", 5).unwrap());
        assert_eq!(batch.conversations.len(), 2);
        for message_id in &batch.messages {
            let entry = session.log.get_mut(message_id, "r1").unwrap();
            for metric in Metric::ALL {
                entry.ratings.merge(metric, metric.labels()[0]);
            }
            entry.status = entry.derived_status();
        }

        let requests = sheets.request_count();
        let exhausted = allocated(session.schedule("r1", 1).unwrap());
        assert!(exhausted.is_empty());
        assert_eq!(exhausted.row_range(), None);
        assert_eq!(sheets.request_count(), requests);
    }

    #[test]
    fn unknown_rater_is_rejected_before_any_io() {
        let sheets = InMemorySheets::with_sheets(["s1"]);
        let mut session = session(&sheets, 2);
        let err = session.schedule("ghost", 1).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownRater(rater) if rater == "ghost"));
        assert_eq!(sheets.request_count(), 0);
    }

    #[test]
    fn raters_receive_the_same_global_prefix() {
        let sheets = InMemorySheets::with_sheets(["s1", "s2"]);
        let mut session = session(&sheets, 6);
        let first = allocated(session.schedule("r1", 3).unwrap());
        let second = allocated(session.schedule("r2", 3).unwrap());
        assert_eq!(first.conversations, second.conversations);
    }

    #[test]
    fn message_ids_shared_between_conversations_schedule_cleanly() {
        let mut records = fixtures::records(2, 2);
        for (record, id) in records.iter_mut().zip(["m1", "m2", "m1", "m2"]) {
            record.message_id = id.into();
        }
        let sheets = InMemorySheets::with_sheets(["s1", "s2"]);
        let mut session = session_with(&sheets, records, MemoryLogStore::new());
        let batch = allocated(session.schedule("r1", 2).unwrap());

        assert_eq!(batch.conversations, vec!["c1".to_string()]);
        assert_eq!(batch.messages, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(sheets.rows("s1").unwrap().len(), (FIRST_DATA_ROW + 1) as usize);
        assert_eq!(session.log().len(), 2);
        assert_eq!(session.store().persist_count(), 1);
        assert_eq!(session.store().load().unwrap(), *session.log());
    }

    #[test]
    fn log_conflict_aborts_before_sheet_writes() {
        let records = fixtures::records(2, 1);
        let mut legacy = AllocationEntry::allocated(&records[0], "r1", Utc::now());
        legacy.conversation_id = "retired".into();
        for metric in Metric::ALL {
            legacy.ratings.merge(metric, metric.labels()[0]);
        }
        legacy.status = legacy.derived_status();
        let log = AllocationLog::from_entries(vec![legacy]).unwrap();

        let sheets = InMemorySheets::with_sheets(["s1", "s2"]);
        let mut session = session_with(&sheets, records, MemoryLogStore::with_log(log));
        let err = session.schedule("r1", 2).unwrap_err();
        assert!(matches!(err, LedgerError::Log(msg) if msg.contains("already allocated")));
        assert_eq!(sheets.request_count(), 0);
        assert_eq!(session.log().len(), 1);
        assert_eq!(session.store().persist_count(), 0);
    }

    #[test]
    fn failed_persist_leaves_log_untouched() {
        let sheets = InMemorySheets::with_sheets(["s1", "s2"]);
        let mut session = session_with(&sheets, fixtures::records(2, 3), ReadOnlyStore);
        let err = session.schedule("r1", 1).unwrap_err();
        assert!(matches!(err, LedgerError::Log(msg) if msg.contains("read-only")));
        assert!(session.log().is_empty());
        assert_eq!(session.log().outstanding("r1"), 0);
    }
}
