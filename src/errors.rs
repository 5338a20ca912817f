use std::io;

use thiserror::Error;

use crate::types::{RaterId, SheetAddress};

/// Failures reported by a spreadsheet collaborator.
#[derive(Debug, Error)]
pub enum SheetError {
    #[error("sheet '{sheet}' rejected the request: rate limit exceeded")]
    RateLimited { sheet: SheetAddress },
    #[error("sheet '{sheet}' is unavailable: {reason}")]
    Unavailable { sheet: SheetAddress, reason: String },
    #[error("invalid cell reference '{0}'")]
    InvalidCell(String),
    #[error("sheet '{sheet}' is malformed: {details}")]
    Malformed {
        sheet: SheetAddress,
        details: String,
    },
}

/// Error type for configuration, IO, persistence, and collaborator failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("rater '{0}' is not listed in the rater registry")]
    UnknownRater(RaterId),
    #[error("corpus error: {0}")]
    Corpus(String),
    #[error("allocation log failure: {0}")]
    Log(String),
    #[error("not enough ratings: {0}")]
    NotEnoughRatings(String),
    #[error(transparent)]
    Sheet(#[from] SheetError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// True when the failure came from the sheet collaborator throttling requests.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LedgerError::Sheet(SheetError::RateLimited { .. }))
    }
}
