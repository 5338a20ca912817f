use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::log::DEFAULT_LOG_FILENAME;
use crate::constants::session::{DEFAULT_REGISTRY_FILENAME, DEFAULT_SEED};
use crate::errors::LedgerError;
use crate::sheet::PacingConfig;
use crate::types::{RaterId, SheetAddress};

/// Top-level ledger configuration.
///
/// Loaded from a JSON file when one is given; missing fields fall back to
/// `Default`. CLI flags override individual fields afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Corpus CSV files or directories, loaded in order.
    pub corpus: Vec<PathBuf>,
    /// Allocation log file. A directory resolves to the default file name inside it.
    pub log: PathBuf,
    /// Rater registry JSON file.
    pub registry: PathBuf,
    /// Directory that relative sheet addresses of the local backend resolve against.
    pub sheets_root: PathBuf,
    /// Seed of the global conversation order.
    pub seed: u64,
    /// Sheet request pacing.
    pub pacing: PacingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            corpus: Vec::new(),
            log: PathBuf::from(DEFAULT_LOG_FILENAME),
            registry: PathBuf::from(DEFAULT_REGISTRY_FILENAME),
            sheets_root: PathBuf::from("."),
            seed: DEFAULT_SEED,
            pacing: PacingConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Read a configuration file.
    pub fn from_json_file(path: &Path) -> Result<Self, LedgerError> {
        let bytes = fs::read(path).map_err(|err| {
            LedgerError::Configuration(format!(
                "cannot read config '{}': {err}",
                path.display()
            ))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reject configurations that cannot start a session.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.corpus.is_empty() {
            return Err(LedgerError::Configuration(
                "at least one corpus path is required".into(),
            ));
        }
        if self.log.as_os_str().is_empty() {
            return Err(LedgerError::Configuration("log path is empty".into()));
        }
        Ok(())
    }
}

/// Mapping from rater id to the address of the rater's sheet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaterRegistry {
    sheets: BTreeMap<RaterId, SheetAddress>,
}

impl RaterRegistry {
    /// Build a registry from `(rater, sheet)` pairs.
    pub fn from_pairs<I, R, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (R, S)>,
        R: Into<RaterId>,
        S: Into<SheetAddress>,
    {
        Self {
            sheets: pairs
                .into_iter()
                .map(|(rater, sheet)| (rater.into(), sheet.into()))
                .collect(),
        }
    }

    /// Load a registry from a JSON object of `rater_id -> sheet address`.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let bytes = fs::read(path).map_err(|err| {
            LedgerError::Configuration(format!(
                "cannot read rater registry '{}': {err}",
                path.display()
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            LedgerError::Configuration(format!(
                "rater registry '{}' is not a JSON object of rater -> sheet: {err}",
                path.display()
            ))
        })
    }

    /// Sheet address of `rater`.
    pub fn sheet_for(&self, rater: &str) -> Result<&SheetAddress, LedgerError> {
        self.sheets
            .get(rater)
            .ok_or_else(|| LedgerError::UnknownRater(rater.to_string()))
    }

    /// True when `rater` is registered.
    pub fn contains(&self, rater: &str) -> bool {
        self.sheets.contains_key(rater)
    }

    /// Registered rater ids, sorted.
    pub fn raters(&self) -> impl Iterator<Item = &RaterId> {
        self.sheets.keys()
    }

    /// Registered `(rater, sheet)` pairs, sorted by rater.
    pub fn iter(&self) -> impl Iterator<Item = (&RaterId, &SheetAddress)> {
        self.sheets.iter()
    }

    /// Number of registered raters.
    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    /// True when nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}
