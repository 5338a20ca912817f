#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Inter-rater agreement statistics and disagreement reports.
pub mod agreement;
/// Command-line runner shared by the binary and integration tests.
pub mod apps;
/// Feature balancing of the winning and awry subsets.
pub mod balance;
/// Ledger configuration and the rater registry.
pub mod config;
/// Centralized constants for the sheet layout, log file, and defaults.
pub mod constants;
/// Conversation records and allocation entries.
pub mod data;
mod hash;
/// Allocation log and its persistence backends.
pub mod log;
/// Descriptive statistics helpers.
pub mod metrics;
/// Deterministic global conversation order.
pub mod ordering;
/// Rating questions and answer vocabularies.
pub mod rating;
/// Pulling sheet ratings back into the log.
pub mod reconcile;
/// Allocating conversations to raters.
pub mod scheduler;
/// Per-invocation context.
pub mod session;
/// Spreadsheet collaborator interface and backends.
pub mod sheet;
/// Corpus source traits and built-in sources.
pub mod source;
/// Filesystem helpers used by sources and stores.
pub mod transport;
/// Shared type aliases.
pub mod types;

mod errors;

pub use agreement::{
    AgreementReport, Disagreement, FrequencyTable, cohen_kappa, fleiss_kappa, observed_agreement,
    unanimous_fraction,
};
pub use balance::{BalancedSample, balance_by_feature};
pub use config::{LedgerConfig, RaterRegistry};
pub use data::{AllocationEntry, AllocationStatus, ConversationRecord, Ratings};
pub use errors::{LedgerError, SheetError};
pub use log::{AllocationLog, CsvLogStore, LogStore, MemoryLogStore};
pub use ordering::GlobalOrder;
pub use rating::{AnswerCode, Metric};
pub use reconcile::{ReconcileOptions, ReconcileReport};
pub use scheduler::{AllocationBatch, ScheduleOutcome};
pub use session::Session;
pub use sheet::{InMemorySheets, LocalCsvSheets, PacedSheets, PacingConfig, SheetClient};
pub use source::{Corpus, CorpusSource, CsvCorpusSource, InMemoryCorpusSource};
pub use types::{CellText, ConversationId, FeatureName, MessageId, RaterId, RowNumber, SheetAddress};
