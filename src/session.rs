//! Explicit per-invocation context.
//!
//! A `Session` is assembled in a fixed order: load the corpus, load (or
//! create) the allocation log, then compute the global conversation order.
//! Allocation, reconciliation and agreement all run against one session and
//! persist through its `LogStore`.

use std::collections::BTreeMap;

use tracing::info;

use crate::config::{LedgerConfig, RaterRegistry};
use crate::errors::LedgerError;
use crate::log::{AllocationLog, CsvLogStore, LogStore, RaterProgress};
use crate::ordering::GlobalOrder;
use crate::sheet::{PacedSheets, PacingConfig, SheetClient};
use crate::source::{Corpus, CorpusSource, CsvCorpusSource};
use crate::types::{RaterId, SheetAddress};

/// Loaded corpus, allocation log, rater registry and sheet collaborator.
pub struct Session<C: SheetClient, L: LogStore> {
    pub(crate) corpus: Corpus,
    pub(crate) order: GlobalOrder,
    pub(crate) log: AllocationLog,
    pub(crate) store: L,
    pub(crate) registry: RaterRegistry,
    pub(crate) sheets: PacedSheets<C>,
}

impl<C: SheetClient, L: LogStore> Session<C, L> {
    /// Assemble a session from already-loaded parts.
    ///
    /// The log is read from `store`; the global order is derived from `corpus`
    /// and `seed`.
    pub fn new(
        corpus: Corpus,
        store: L,
        registry: RaterRegistry,
        sheets: C,
        seed: u64,
        pacing: PacingConfig,
    ) -> Result<Self, LedgerError> {
        let log = store.load()?;
        let order = GlobalOrder::from_corpus(&corpus, seed);
        info!(
            "[ledger:session] {} conversations ({} messages), {} log entries, {} raters, seed {} (population {:016x})",
            corpus.len(),
            corpus.message_count(),
            log.len(),
            registry.len(),
            order.seed(),
            order.population_checksum()
        );
        Ok(Self {
            corpus,
            order,
            log,
            store,
            registry,
            sheets: PacedSheets::new(sheets, pacing),
        })
    }

    /// Loaded conversations.
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Global proposal order.
    pub fn order(&self) -> &GlobalOrder {
        &self.order
    }

    /// Current allocation log.
    pub fn log(&self) -> &AllocationLog {
        &self.log
    }

    /// Persistence backend of the log.
    pub fn store(&self) -> &L {
        &self.store
    }

    /// Registered raters.
    pub fn registry(&self) -> &RaterRegistry {
        &self.registry
    }

    /// Paced sheet collaborator.
    pub fn sheets(&self) -> &PacedSheets<C> {
        &self.sheets
    }

    /// Sheet address of `rater_id`, or `UnknownRater`.
    pub fn sheet_for(&self, rater_id: &str) -> Result<SheetAddress, LedgerError> {
        self.registry.sheet_for(rater_id).cloned()
    }

    /// Allocation counts per rater. Registered raters without entries report zeros.
    pub fn progress(&self) -> BTreeMap<RaterId, RaterProgress> {
        let mut progress = self.log.progress();
        for rater in self.registry.raters() {
            progress.entry(rater.clone()).or_default();
        }
        progress
    }
}

impl<C: SheetClient> Session<C, CsvLogStore> {
    /// Build a session from file-based configuration.
    pub fn from_config(config: &LedgerConfig, sheets: C) -> Result<Self, LedgerError> {
        config.validate()?;
        let sources: Vec<CsvCorpusSource> =
            config.corpus.iter().map(CsvCorpusSource::new).collect();
        let sources: Vec<&dyn CorpusSource> = sources
            .iter()
            .map(|source| source as &dyn CorpusSource)
            .collect();
        let corpus = Corpus::load(&sources)?;
        if corpus.is_empty() {
            return Err(LedgerError::Configuration(
                "corpus contains no conversations".into(),
            ));
        }
        let store = CsvLogStore::open(&config.log)?;
        let registry = RaterRegistry::load(&config.registry)?;
        Self::new(
            corpus,
            store,
            registry,
            sheets,
            config.seed,
            config.pacing.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::log::MemoryLogStore;
    use crate::sheet::InMemorySheets;
    use crate::source::fixtures;
    use tempfile::tempdir;

    #[test]
    fn progress_lists_registered_raters_without_entries() {
        let session = Session::new(
            Corpus::from_records(fixtures::records(3, 2)),
            MemoryLogStore::new(),
            RaterRegistry::from_pairs([("r1", "s1"), ("r2", "s2")]),
            InMemorySheets::with_sheets(["s1", "s2"]),
            42,
            PacingConfig::unpaced(),
        )
        .unwrap();
        let progress = session.progress();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress["r1"], RaterProgress::default());
        assert_eq!(session.order().len(), 3);
        assert!(matches!(session.sheet_for("r3"), Err(LedgerError::UnknownRater(_))));
    }

    #[test]
    fn from_config_creates_missing_log() {
        let dir = tempdir().unwrap();
        let corpus = dir.path().join("corpus.csv");
        fs::write(
            &corpus,
            "conversation_id,message_id,speaker,text\nc1,m1,a,hi\nc1,m2,b,yo\nc2,m3,a,hey\n",
        )
        .unwrap();
        let registry = dir.path().join("raters.json");
        fs::write(&registry, r#"{ "r1": "r1.csv" }"#).unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        let config = LedgerConfig {
            corpus: vec![corpus],
            log: dir.path().join("logs"),
            registry,
            sheets_root: dir.path().to_path_buf(),
            pacing: PacingConfig::unpaced(),
            ..LedgerConfig::default()
        };

        let session = Session::from_config(&config, InMemorySheets::new()).unwrap();
        assert_eq!(session.corpus().len(), 2);
        assert!(session.log().is_empty());
        assert!(session.store().path().ends_with("conversation_labeling_log.csv"));
        assert!(session.store().path().exists());
    }

    #[test]
    fn from_config_requires_registry() {
        let dir = tempdir().unwrap();
        let corpus = dir.path().join("corpus.csv");
        fs::write(&corpus, "conversation_id,message_id,speaker,text\nc1,m1,a,hi\n").unwrap();
        let config = LedgerConfig {
            corpus: vec![corpus],
            log: dir.path().join("log.csv"),
            registry: dir.path().join("absent.json"),
            ..LedgerConfig::default()
        };
        let err = Session::from_config(&config, InMemorySheets::new()).err().unwrap();
        assert!(matches!(err, LedgerError::Configuration(msg) if msg.contains("rater registry")));
    }
}
