use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, warn};

use crate::constants::corpus::{
    CONVERSATION_HEADERS, MESSAGE_HEADERS, ROW_ID_PREFIX, SKIP_MALFORMED_MSG, SPEAKER_HEADER,
    TEXT_HEADER,
};
use crate::data::ConversationRecord;
use crate::errors::LedgerError;
use crate::source::CorpusSource;
use crate::transport::fs::collect_csv_files;

/// Corpus source reading one CSV file, or every CSV file below a directory.
///
/// By default every row is a message and the conversation id, message id and
/// text columns are required. In feature-table mode each row describes a
/// whole conversation: only numeric columns matter, a missing message id
/// falls back to the conversation id, and a missing conversation id column
/// falls back to `row{N}` (the 1-based data row of the file).
#[derive(Clone, Debug)]
pub struct CsvCorpusSource {
    id: String,
    root: PathBuf,
    feature_table: bool,
}

/// Column positions resolved from a CSV header row.
#[derive(Debug)]
struct ColumnLayout {
    conversation: Option<usize>,
    message: Option<usize>,
    speaker: Option<usize>,
    text: Option<usize>,
    metadata: Vec<(usize, String)>,
}

impl CsvCorpusSource {
    /// Create a source rooted at a CSV file or a directory of CSV files.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let id = root
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("corpus")
            .to_string();
        Self {
            id,
            root,
            feature_table: false,
        }
    }

    /// Read the files as per-conversation feature tables.
    pub fn feature_table(mut self) -> Self {
        self.feature_table = true;
        self
    }

    /// Override the source identifier used in logs.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn load_file(&self, path: &Path) -> Result<Vec<ConversationRecord>, LedgerError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let layout = resolve_layout(reader.headers()?, path, self.feature_table)?;
        let mut records = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    warn!(
                        "[ledger:corpus] {SKIP_MALFORMED_MSG} {}:{}: {err}",
                        path.display(),
                        line + 2
                    );
                    continue;
                }
            };
            match build_record(&layout, &row, line + 1) {
                Some(record) => records.push(record),
                None => warn!(
                    "[ledger:corpus] {SKIP_MALFORMED_MSG} {}:{}",
                    path.display(),
                    line + 2
                ),
            }
        }
        debug!(
            "[ledger:corpus] read {} rows from {}",
            records.len(),
            path.display()
        );
        Ok(records)
    }
}

impl CorpusSource for CsvCorpusSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Vec<ConversationRecord>, LedgerError> {
        let files = collect_csv_files(&self.root)?;
        if files.is_empty() {
            return Err(LedgerError::Corpus(format!(
                "no CSV files found under '{}'",
                self.root.display()
            )));
        }
        let mut records = Vec::new();
        for file in files {
            records.extend(self.load_file(&file)?);
        }
        Ok(records)
    }
}

fn resolve_layout(
    headers: &StringRecord,
    path: &Path,
    feature_table: bool,
) -> Result<ColumnLayout, LedgerError> {
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|header| names.iter().any(|name| header.trim() == *name))
    };
    let required = |names: &[&str]| match find(names) {
        Some(idx) => Ok(Some(idx)),
        None if feature_table => Ok(None),
        None => Err(LedgerError::Corpus(format!(
            "'{}' is missing required column '{}'",
            path.display(),
            names[0]
        ))),
    };
    let conversation = required(&CONVERSATION_HEADERS)?;
    let message = required(&MESSAGE_HEADERS)?;
    let text = required(&[TEXT_HEADER])?;
    let speaker = find(&[SPEAKER_HEADER]);
    let reserved = [conversation, message, text, speaker];
    let metadata = headers
        .iter()
        .enumerate()
        .filter(|(idx, header)| !reserved.contains(&Some(*idx)) && !header.trim().is_empty())
        .map(|(idx, header)| (idx, header.trim().to_string()))
        .collect();
    Ok(ColumnLayout {
        conversation,
        message,
        speaker,
        text,
        metadata,
    })
}

fn build_record(
    layout: &ColumnLayout,
    row: &StringRecord,
    data_row: usize,
) -> Option<ConversationRecord> {
    let conversation_id = match layout.conversation {
        Some(idx) => row.get(idx)?.trim().to_string(),
        None => format!("{ROW_ID_PREFIX}{data_row}"),
    };
    if conversation_id.is_empty() {
        return None;
    }
    let message_id = match layout.message {
        Some(idx) => row.get(idx)?.trim().to_string(),
        None => conversation_id.clone(),
    };
    if message_id.is_empty() {
        return None;
    }
    let text = match layout.text {
        Some(idx) => row.get(idx)?.to_string(),
        None => String::new(),
    };
    let speaker = layout
        .speaker
        .and_then(|idx| row.get(idx))
        .unwrap_or_default()
        .trim()
        .to_string();
    let metadata: BTreeMap<String, f64> = layout
        .metadata
        .iter()
        .filter_map(|(idx, name)| {
            let value = row.get(*idx)?.trim().parse::<f64>().ok()?;
            Some((name.clone(), value))
        })
        .collect();
    Some(ConversationRecord {
        conversation_id,
        message_id,
        speaker,
        text,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn csv_source_reads_quoted_text_and_numeric_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("awry_samples.csv");
        fs::write(
            &path,
            ",CONV_ID,message_id,speaker,text,dataset_numeric,conversation_length,subreddit\n\
             0,c1,m1,alice,\"Hello, \"\"world\"\"\nsecond line\",0,2,news\n\
             1,c1,m2,bob,reply,0,2,news\n",
        )
        .unwrap();

        let records = CsvCorpusSource::new(&path).load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].conversation_id, "c1");
        assert_eq!(records[0].text, "Hello, \"world\"\nsecond line");
        assert_eq!(records[0].speaker, "alice");
        assert_eq!(records[0].feature("dataset_numeric"), Some(0.0));
        assert_eq!(records[0].feature("conversation_length"), Some(2.0));
        assert_eq!(records[0].feature("subreddit"), None);
    }

    #[test]
    fn csv_source_skips_rows_without_ids() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        fs::write(
            &path,
            "conversation_id,message_id,speaker,text\nc1,m1,a,x\n,m2,b,y\nc1,,c,z\n",
        )
        .unwrap();
        let records = CsvCorpusSource::new(&path).load().unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn csv_source_requires_identity_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corpus.csv");
        fs::write(&path, "conversation_id,speaker,text\nc1,a,x\n").unwrap();
        let err = CsvCorpusSource::new(&path).load().unwrap_err();
        assert!(matches!(err, LedgerError::Corpus(msg) if msg.contains("message_id")));
    }

    #[test]
    fn feature_table_needs_only_numeric_columns() {
        let dir = tempdir().unwrap();
        let keyed = dir.path().join("features.csv");
        fs::write(
            &keyed,
            "conversation_id,dataset_numeric,conversation_length
c1,1,4
c2,0,4
",
        )
        .unwrap();
        let records = CsvCorpusSource::new(&keyed).feature_table().load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].conversation_id, "c2");
        assert_eq!(records[1].message_id, "c2");
        assert!(records[1].text.is_empty());
        assert_eq!(records[1].feature("dataset_numeric"), Some(0.0));
        assert_eq!(records[1].feature("conversation_length"), Some(4.0));

        let err = CsvCorpusSource::new(&keyed).load().unwrap_err();
        assert!(matches!(err, LedgerError::Corpus(msg) if msg.contains("message_id")));

        let unkeyed = dir.path().join("unkeyed.csv");
        fs::write(&unkeyed, "dataset_numeric,conversation_length
1,3
0,5
").unwrap();
        let ids: Vec<String> = CsvCorpusSource::new(&unkeyed)
            .feature_table()
            .load()
            .unwrap()
            .into_iter()
            .map(|record| record.conversation_id)
            .collect();
        assert_eq!(ids, vec!["row1", "row2"]);
    }

    #[test]
    fn csv_source_concatenates_directory_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("awry_samples.csv"),
            "conversation_id,message_id,speaker,text\na1,m1,x,one\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("winning_samples.csv"),
            "conversation_id,message_id,speaker,text\nw1,m1,y,two\n",
        )
        .unwrap();
        let source = CsvCorpusSource::new(dir.path()).with_id("samples");
        assert_eq!(source.id(), "samples");
        let ids: Vec<String> = source
            .load()
            .unwrap()
            .into_iter()
            .map(|record| record.conversation_id)
            .collect();
        assert_eq!(ids, vec!["a1", "w1"]);
    }

    #[test]
    fn empty_directory_is_a_corpus_error() {
        let dir = tempdir().unwrap();
        let err = CsvCorpusSource::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, LedgerError::Corpus(msg) if msg.contains("no CSV files")));
    }
}
