use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::log::{STATUS_ALLOCATED, STATUS_DONE};
use crate::rating::{METRIC_COUNT, Metric};

pub use crate::types::{CellText, ConversationId, FeatureName, MessageId, RaterId};

/// One message of a source conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Message identifier, unique within the conversation.
    pub message_id: MessageId,
    /// Author of the message.
    pub speaker: String,
    /// Message body shown to raters.
    pub text: String,
    /// Numeric corpus columns (for example `dataset_numeric`, `conversation_length`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<FeatureName, f64>,
}

impl ConversationRecord {
    /// Numeric metadata value for `feature`, if the corpus carried one.
    pub fn feature(&self, feature: &str) -> Option<f64> {
        self.metadata.get(feature).copied()
    }
}

/// Lifecycle state of an allocation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Handed to a rater, at least one rating still missing.
    Allocated,
    /// Every rating field filled.
    Done,
}

impl AllocationStatus {
    /// Value written to the log file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allocated => STATUS_ALLOCATED,
            Self::Done => STATUS_DONE,
        }
    }

    /// Parse a status cell from the log file.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            STATUS_ALLOCATED => Some(Self::Allocated),
            STATUS_DONE => Some(Self::Done),
            _ => None,
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rating values of one entry, one slot per `Metric`. `None` means "not rated yet".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    values: [Option<CellText>; METRIC_COUNT],
}

impl Ratings {
    /// Stored value for `metric`.
    pub fn get(&self, metric: Metric) -> Option<&str> {
        self.values[metric.index()].as_deref()
    }

    /// Store `value` for `metric`. Blank values are ignored; returns true when the slot changed.
    pub fn merge(&mut self, metric: Metric, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        let slot = &mut self.values[metric.index()];
        if slot.as_deref() == Some(value) {
            return false;
        }
        *slot = Some(value.to_string());
        true
    }

    /// True when every metric has a value.
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    /// Number of filled slots.
    pub fn filled(&self) -> usize {
        self.values.iter().filter(|value| value.is_some()).count()
    }
}

/// Allocation of one message to one rater.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationEntry {
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Allocated message.
    pub message_id: MessageId,
    /// Rater holding the message.
    pub rater_id: RaterId,
    /// Ratings collected so far.
    pub ratings: Ratings,
    /// `Done` exactly when `ratings` is complete.
    pub status: AllocationStatus,
    /// Time of allocation or of the last rating change.
    pub last_updated_time: DateTime<Utc>,
}

impl AllocationEntry {
    /// Fresh entry with no ratings.
    pub fn allocated(
        record: &ConversationRecord,
        rater_id: impl Into<RaterId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: record.conversation_id.clone(),
            message_id: record.message_id.clone(),
            rater_id: rater_id.into(),
            ratings: Ratings::default(),
            status: AllocationStatus::Allocated,
            last_updated_time: now,
        }
    }

    /// Status implied by the current ratings.
    pub fn derived_status(&self) -> AllocationStatus {
        if self.ratings.is_complete() {
            AllocationStatus::Done
        } else {
            AllocationStatus::Allocated
        }
    }

    /// True when the entry is "done".
    pub fn is_done(&self) -> bool {
        self.status == AllocationStatus::Done
    }
}
