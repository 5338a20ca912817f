use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use tracing::{info, warn};

use crate::constants::log::{
    COL_CONVERSATION, COL_MESSAGE, COL_RATER, COL_STATUS, COL_UPDATED, DEFAULT_LOG_FILENAME,
};
use crate::data::{AllocationEntry, AllocationStatus, Ratings};
use crate::errors::LedgerError;
use crate::rating::Metric;
use crate::transport::fs::{atomic_write, ensure_parent_dir};
use crate::types::{MessageId, RaterId};

/// In-memory allocation table keyed by (message id, rater id).
///
/// Entries are appended on allocation and updated in place on reconciliation;
/// they are never removed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllocationLog {
    entries: Vec<AllocationEntry>,
    index: HashMap<(MessageId, RaterId), usize>,
}

/// Per-rater entry counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RaterProgress {
    /// Entries still missing at least one rating.
    pub allocated: usize,
    /// Fully rated entries.
    pub done: usize,
    /// Distinct conversations handed to the rater.
    pub conversations: usize,
}

impl AllocationLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from entries, rejecting duplicate (message, rater) keys.
    pub fn from_entries(
        entries: impl IntoIterator<Item = AllocationEntry>,
    ) -> Result<Self, LedgerError> {
        let mut log = Self::new();
        for entry in entries {
            log.append(entry)?;
        }
        Ok(log)
    }

    /// Append a fresh entry.
    pub fn append(&mut self, entry: AllocationEntry) -> Result<(), LedgerError> {
        let key = (entry.message_id.clone(), entry.rater_id.clone());
        if self.index.contains_key(&key) {
            return Err(LedgerError::Log(format!(
                "message '{}' is already allocated to rater '{}'",
                entry.message_id, entry.rater_id
            )));
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// All entries in append order.
    pub fn entries(&self) -> &[AllocationEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the log has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for (message, rater).
    pub fn get(&self, message_id: &str, rater_id: &str) -> Option<&AllocationEntry> {
        let idx = self
            .index
            .get(&(message_id.to_string(), rater_id.to_string()))?;
        self.entries.get(*idx)
    }

    /// Mutable entry for (message, rater).
    pub fn get_mut(&mut self, message_id: &str, rater_id: &str) -> Option<&mut AllocationEntry> {
        let idx = *self
            .index
            .get(&(message_id.to_string(), rater_id.to_string()))?;
        self.entries.get_mut(idx)
    }

    /// Entries belonging to `rater_id`, in append order.
    pub fn entries_for<'a>(
        &'a self,
        rater_id: &'a str,
    ) -> impl Iterator<Item = &'a AllocationEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.rater_id == rater_id)
    }

    /// Entries of `rater_id` still in the "allocated" state.
    pub fn outstanding(&self, rater_id: &str) -> usize {
        self.entries_for(rater_id)
            .filter(|entry| entry.status == AllocationStatus::Allocated)
            .count()
    }

    /// Conversations already handed to `rater_id`, whatever their status.
    pub fn conversations_for<'a>(&'a self, rater_id: &'a str) -> HashSet<&'a str> {
        self.entries_for(rater_id)
            .map(|entry| entry.conversation_id.as_str())
            .collect()
    }

    /// Progress counts per rater, sorted by rater id.
    pub fn progress(&self) -> BTreeMap<RaterId, RaterProgress> {
        let mut progress: BTreeMap<RaterId, RaterProgress> = BTreeMap::new();
        let mut conversations: HashMap<&str, HashSet<&str>> = HashMap::new();
        for entry in &self.entries {
            let counts = progress.entry(entry.rater_id.clone()).or_default();
            match entry.status {
                AllocationStatus::Allocated => counts.allocated += 1,
                AllocationStatus::Done => counts.done += 1,
            }
            conversations
                .entry(entry.rater_id.as_str())
                .or_default()
                .insert(entry.conversation_id.as_str());
        }
        for (rater, ids) in conversations {
            if let Some(counts) = progress.get_mut(rater) {
                counts.conversations = ids.len();
            }
        }
        progress
    }
}

/// Persistence backend for the allocation log.
///
/// `persist` replaces the stored log wholesale; a failed persist must leave the
/// previously stored log readable.
pub trait LogStore {
    /// Load the stored log.
    fn load(&self) -> Result<AllocationLog, LedgerError>;
    /// Replace the stored log with `log`.
    fn persist(&self, log: &AllocationLog) -> Result<(), LedgerError>;
}

/// In-memory log store for tests and dry runs.
#[derive(Default)]
pub struct MemoryLogStore {
    log: RwLock<AllocationLog>,
    persists: RwLock<usize>,
}

impl MemoryLogStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `log`.
    pub fn with_log(log: AllocationLog) -> Self {
        Self {
            log: RwLock::new(log),
            persists: RwLock::new(0),
        }
    }

    /// Number of successful `persist` calls.
    pub fn persist_count(&self) -> usize {
        self.persists.read().map(|guard| *guard).unwrap_or(0)
    }
}

impl LogStore for MemoryLogStore {
    fn load(&self) -> Result<AllocationLog, LedgerError> {
        self.log
            .read()
            .map_err(|_| LedgerError::Log("log lock poisoned".into()))
            .map(|guard| guard.clone())
    }

    fn persist(&self, log: &AllocationLog) -> Result<(), LedgerError> {
        *self
            .log
            .write()
            .map_err(|_| LedgerError::Log("log lock poisoned".into()))? = log.clone();
        *self
            .persists
            .write()
            .map_err(|_| LedgerError::Log("persist counter lock poisoned".into()))? += 1;
        Ok(())
    }
}

/// CSV file log store.
///
/// The file is created header-only when absent and rewritten through a temp
/// file plus atomic rename on every persist.
#[derive(Debug)]
pub struct CsvLogStore {
    path: PathBuf,
}

impl CsvLogStore {
    /// Open (or create) the log file at `path`. A directory path gets the default file name.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = coerce_log_path(path.into());
        ensure_parent_dir(&path)?;
        let store = Self { path };
        if !store.path.exists() {
            info!(
                "[ledger:log] creating empty allocation log at {}",
                store.path.display()
            );
            store.persist(&AllocationLog::new())?;
        }
        Ok(store)
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStore for CsvLogStore {
    fn load(&self) -> Result<AllocationLog, LedgerError> {
        let raw = fs::read(&self.path)?;
        decode_log(&raw)
    }

    fn persist(&self, log: &AllocationLog) -> Result<(), LedgerError> {
        let payload = encode_log(log)?;
        atomic_write(&self.path, &payload)
    }
}

/// Header row of the log file.
pub fn log_header() -> Vec<&'static str> {
    let mut header = vec![COL_CONVERSATION, COL_MESSAGE];
    header.extend(Metric::ALL.iter().map(|metric| metric.field_name()));
    header.extend([COL_RATER, COL_STATUS, COL_UPDATED]);
    header
}

fn encode_log(log: &AllocationLog) -> Result<Vec<u8>, LedgerError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(log_header())?;
    for entry in log.entries() {
        let mut row: Vec<String> = vec![entry.conversation_id.clone(), entry.message_id.clone()];
        row.extend(
            Metric::ALL
                .iter()
                .map(|metric| entry.ratings.get(*metric).unwrap_or_default().to_string()),
        );
        row.push(entry.rater_id.clone());
        row.push(entry.status.as_str().to_string());
        row.push(
            entry
                .last_updated_time
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        );
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|err| LedgerError::Log(format!("failed to flush log buffer: {err}")))
}

fn decode_log(raw: &[u8]) -> Result<AllocationLog, LedgerError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(AllocationLog::new());
    }
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(raw);
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| LedgerError::Log(format!("log is missing column '{name}'")))
    };
    let conversation = column(COL_CONVERSATION)?;
    let message = column(COL_MESSAGE)?;
    let rater = column(COL_RATER)?;
    let status = column(COL_STATUS)?;
    let updated = column(COL_UPDATED)?;
    let rating_columns = Metric::ALL
        .iter()
        .map(|metric| column(metric.field_name()).map(|idx| (*metric, idx)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut log = AllocationLog::new();
    for (line, row) in reader.records().enumerate() {
        let row = row?;
        let line = line + 2;
        let field = |idx: usize| row.get(idx).unwrap_or_default().trim();
        let mut ratings = Ratings::default();
        for (metric, idx) in &rating_columns {
            ratings.merge(*metric, field(*idx));
        }
        let stored_status = AllocationStatus::parse(field(status)).ok_or_else(|| {
            LedgerError::Log(format!(
                "line {line}: invalid status '{}'",
                field(status)
            ))
        })?;
        let last_updated_time = parse_time(&row, updated, line)?;
        let mut entry = AllocationEntry {
            conversation_id: field(conversation).to_string(),
            message_id: field(message).to_string(),
            rater_id: field(rater).to_string(),
            ratings,
            status: stored_status,
            last_updated_time,
        };
        let derived = entry.derived_status();
        if derived != stored_status {
            warn!(
                "[ledger:log] line {line}: status '{}' disagrees with ratings; using '{}'",
                stored_status, derived
            );
            entry.status = derived;
        }
        log.append(entry)?;
    }
    Ok(log)
}

fn parse_time(row: &StringRecord, idx: usize, line: usize) -> Result<DateTime<Utc>, LedgerError> {
    let raw = row.get(idx).unwrap_or_default().trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| LedgerError::Log(format!("line {line}: invalid time '{raw}': {err}")))
}

fn coerce_log_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path.join(DEFAULT_LOG_FILENAME);
    }
    path
}
