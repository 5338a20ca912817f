//! Corpus source interfaces and the in-memory conversation table.
//!
//! Ownership model:
//! - `CorpusSource` produces flat `ConversationRecord` lists (CSV files, fixtures).
//! - `Corpus` owns the loaded records grouped by conversation, in load order.
//!   It is built once per session and never mutated afterwards.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::data::ConversationRecord;
use crate::errors::LedgerError;
use crate::types::{ConversationId, MessageId};

/// Source implementation modules.
pub mod sources;

pub use sources::csv_source::CsvCorpusSource;

/// Loader interface for conversation corpora.
///
/// For a fixed backing state, `load` must return the same records in the same
/// order on every call.
pub trait CorpusSource {
    /// Stable identifier used in logs.
    fn id(&self) -> &str;
    /// Load every record of this source.
    fn load(&self) -> Result<Vec<ConversationRecord>, LedgerError>;
}

/// In-memory corpus source, mainly for tests and fixtures.
pub struct InMemoryCorpusSource {
    id: String,
    records: Vec<ConversationRecord>,
}

impl InMemoryCorpusSource {
    /// Create an in-memory source from prebuilt records.
    pub fn new(id: impl Into<String>, records: Vec<ConversationRecord>) -> Self {
        Self {
            id: id.into(),
            records,
        }
    }
}

impl CorpusSource for InMemoryCorpusSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Vec<ConversationRecord>, LedgerError> {
        Ok(self.records.clone())
    }
}

/// Loaded conversation table grouped by conversation id.
#[derive(Clone, Debug, Default)]
pub struct Corpus {
    conversations: IndexMap<ConversationId, Vec<ConversationRecord>>,
}

impl Corpus {
    /// Load and concatenate every source, in order.
    pub fn load(sources: &[&dyn CorpusSource]) -> Result<Self, LedgerError> {
        let mut records = Vec::new();
        for source in sources {
            let loaded = source.load()?;
            info!(
                "[ledger:corpus] source '{}' loaded {} messages",
                source.id(),
                loaded.len()
            );
            records.extend(loaded);
        }
        Ok(Self::from_records(records))
    }

    /// Group records by conversation.
    ///
    /// Message ids must be unique across the whole corpus: a repeated
    /// (conversation, message) pair keeps the first copy, and a message id
    /// already owned by another conversation is dropped.
    pub fn from_records(records: impl IntoIterator<Item = ConversationRecord>) -> Self {
        let mut conversations: IndexMap<ConversationId, Vec<ConversationRecord>> = IndexMap::new();
        let mut owners: HashMap<MessageId, ConversationId> = HashMap::new();
        for record in records {
            if let Some(owner) = owners.get(&record.message_id) {
                if *owner == record.conversation_id {
                    warn!(
                        "[ledger:corpus] duplicate message '{}' in conversation '{}' ignored",
                        record.message_id, record.conversation_id
                    );
                } else {
                    warn!(
                        "[ledger:corpus] message '{}' of '{}' already belongs to '{}'; ignored",
                        record.message_id, record.conversation_id, owner
                    );
                }
                continue;
            }
            owners.insert(record.message_id.clone(), record.conversation_id.clone());
            conversations
                .entry(record.conversation_id.clone())
                .or_default()
                .push(record);
        }
        Self { conversations }
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// True when no conversation was loaded.
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Total number of messages across conversations.
    pub fn message_count(&self) -> usize {
        self.conversations.values().map(Vec::len).sum()
    }

    /// Conversation ids in load order.
    pub fn conversation_ids(&self) -> impl Iterator<Item = &ConversationId> {
        self.conversations.keys()
    }

    /// Messages of one conversation, in load order.
    pub fn messages(&self, conversation_id: &str) -> Option<&[ConversationRecord]> {
        self.conversations.get(conversation_id).map(Vec::as_slice)
    }

    /// Iterate conversations with their messages.
    pub fn conversations(&self) -> impl Iterator<Item = (&ConversationId, &[ConversationRecord])> {
        self.conversations
            .iter()
            .map(|(id, messages)| (id, messages.as_slice()))
    }

    /// Look up one message.
    pub fn message(&self, conversation_id: &str, message_id: &str) -> Option<&ConversationRecord> {
        self.messages(conversation_id)?
            .iter()
            .find(|record| record.message_id == message_id)
    }

    /// Look up a message by id alone; returns the first match in load order.
    pub fn find_message(&self, message_id: &str) -> Option<&ConversationRecord> {
        self.conversations
            .values()
            .flat_map(|messages| messages.iter())
            .find(|record| record.message_id == message_id)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;

    use crate::data::ConversationRecord;

    /// `conversations` conversations of `messages` messages each, ids `c{n}` / `c{n}_m{k}`.
    pub fn records(conversations: usize, messages: usize) -> Vec<ConversationRecord> {
        let mut out = Vec::new();
        for conv in 1..=conversations {
            for msg in 1..=messages {
                out.push(ConversationRecord {
                    conversation_id: format!("c{conv}"),
                    message_id: format!("c{conv}_m{msg}"),
                    speaker: format!("speaker_{}", msg % 2),
                    text: format!("message {msg} of conversation {conv}"),
                    metadata: BTreeMap::new(),
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corpus_groups_messages_and_preserves_order() {
        let corpus = Corpus::from_records(fixtures::records(3, 4));
        assert_eq!(corpus.len(), 3);
        assert_eq!(corpus.message_count(), 12);
        let ids: Vec<&str> = corpus.conversation_ids().map(String::as_str).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        let messages = corpus.messages("c2").unwrap();
        assert_eq!(messages[0].message_id, "c2_m1");
        assert_eq!(messages[3].message_id, "c2_m4");
        assert_eq!(corpus.message("c3", "c3_m2").unwrap().text, "message 2 of conversation 3");
        assert_eq!(corpus.find_message("c1_m4").unwrap().conversation_id, "c1");
        assert!(corpus.message("c3", "c1_m1").is_none());
    }

    #[test]
    fn corpus_drops_duplicate_messages() {
        let mut records = fixtures::records(1, 2);
        records.push(records[0].clone());
        let corpus = Corpus::from_records(records);
        assert_eq!(corpus.message_count(), 2);
    }

    #[test]
    fn message_ids_reused_across_conversations_keep_the_first_owner() {
        let mut records = fixtures::records(2, 2);
        records[2].message_id = "m1".into();
        records[3].message_id = "m2".into();
        records[0].message_id = "m1".into();
        records[1].message_id = "m2".into();
        let corpus = Corpus::from_records(records);
        assert_eq!(corpus.message_count(), 2);
        assert_eq!(corpus.len(), 1);
        assert!(corpus.messages("c2").is_none());
        assert_eq!(corpus.find_message("m2").unwrap().conversation_id, "c1");
    }

    #[test]
    fn corpus_load_concatenates_sources_in_order() {
        let awry = InMemoryCorpusSource::new("awry", fixtures::records(2, 1));
        let mut winning_records = fixtures::records(3, 1);
        winning_records.drain(..2);
        let winning = InMemoryCorpusSource::new("winning", winning_records);
        let corpus = Corpus::load(&[&awry, &winning]).unwrap();
        let ids: Vec<&str> = corpus.conversation_ids().map(String::as_str).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }
}
