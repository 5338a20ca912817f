//! Rating questions and their closed answer vocabularies.
//!
//! Each question is a `Metric`. Sheet cells carry the human-readable label of
//! an answer; agreement statistics work on the integer code of that answer.
//! Blank or unrecognized labels encode to the metric's neutral code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;

/// Integer answer code used by agreement statistics.
pub type AnswerCode = usize;

/// Code every metric assigns to blank or unrecognized answers.
pub const NEUTRAL_CODE: AnswerCode = 0;

/// Number of rating questions asked per message.
pub const METRIC_COUNT: usize = 4;

/// One rating question asked for every allocated message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Does the content state a direct opinion?
    DirectnessContent,
    /// Is the opinion expressed directly?
    DirectnessExpression,
    /// Does the content oppose someone else?
    OiContent,
    /// Is the expression emotional or forceful?
    OiExpression,
}

/// A labelled answer and the code it maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Choice {
    /// Exact label shown in the sheet dropdown.
    pub label: &'static str,
    /// Code used by agreement statistics.
    pub code: AnswerCode,
}

const DIRECTNESS_CONTENT_CHOICES: [Choice; 3] = [
    Choice {
        label: "Yes - Direct Content",
        code: 2,
    },
    Choice {
        label: "No - Indirect Content",
        code: 1,
    },
    Choice {
        label: "Neutral - Content contains no opinion",
        code: NEUTRAL_CODE,
    },
];

const DIRECTNESS_EXPRESSION_CHOICES: [Choice; 2] = [
    Choice {
        label: "Yes - Direct Expression",
        code: 2,
    },
    Choice {
        label: "No - Indirect Expression",
        code: 1,
    },
];

const OI_CONTENT_CHOICES: [Choice; 2] = [
    Choice {
        label: "Yes - Content opposes someone else",
        code: 2,
    },
    Choice {
        label: "No - Content does not oppose anyone",
        code: 1,
    },
];

const OI_EXPRESSION_CHOICES: [Choice; 2] = [
    Choice {
        label: "Yes - Expression is emotional/forceful",
        code: 2,
    },
    Choice {
        label: "No - Expression is not emotional/forceful",
        code: 1,
    },
];

impl Metric {
    /// Every metric, in sheet column order.
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::DirectnessContent,
        Metric::DirectnessExpression,
        Metric::OiContent,
        Metric::OiExpression,
    ];

    /// Snake-case field name used in the log header and on the CLI.
    pub fn field_name(self) -> &'static str {
        match self {
            Metric::DirectnessContent => "directness_content",
            Metric::DirectnessExpression => "directness_expression",
            Metric::OiContent => "oi_content",
            Metric::OiExpression => "oi_expression",
        }
    }

    /// Sheet column holding this metric's answers.
    pub fn column(self) -> &'static str {
        match self {
            Metric::DirectnessContent => "E",
            Metric::DirectnessExpression => "F",
            Metric::OiContent => "G",
            Metric::OiExpression => "H",
        }
    }

    /// Position of this metric within `Metric::ALL`.
    pub fn index(self) -> usize {
        match self {
            Metric::DirectnessContent => 0,
            Metric::DirectnessExpression => 1,
            Metric::OiContent => 2,
            Metric::OiExpression => 3,
        }
    }

    /// Labelled answers accepted by the sheet dropdown.
    pub fn choices(self) -> &'static [Choice] {
        match self {
            Metric::DirectnessContent => &DIRECTNESS_CONTENT_CHOICES,
            Metric::DirectnessExpression => &DIRECTNESS_EXPRESSION_CHOICES,
            Metric::OiContent => &OI_CONTENT_CHOICES,
            Metric::OiExpression => &OI_EXPRESSION_CHOICES,
        }
    }

    /// Dropdown labels, in declaration order.
    pub fn labels(self) -> Vec<&'static str> {
        self.choices().iter().map(|choice| choice.label).collect()
    }

    /// Number of distinct codes, neutral included.
    pub fn category_count(self) -> usize {
        self.choices()
            .iter()
            .map(|choice| choice.code)
            .chain(std::iter::once(NEUTRAL_CODE))
            .max()
            .map(|max| max + 1)
            .unwrap_or(1)
    }

    /// Encode a raw cell label. Blank or unknown labels become `NEUTRAL_CODE`.
    pub fn encode(self, label: &str) -> AnswerCode {
        let label = label.trim();
        self.choices()
            .iter()
            .find(|choice| choice.label == label)
            .map(|choice| choice.code)
            .unwrap_or(NEUTRAL_CODE)
    }

    /// True when `label` is one of this metric's dropdown labels.
    pub fn is_valid_label(self, label: &str) -> bool {
        let label = label.trim();
        self.choices().iter().any(|choice| choice.label == label)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

impl FromStr for Metric {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Metric::ALL
            .into_iter()
            .find(|metric| metric.field_name() == normalized)
            .ok_or_else(|| {
                LedgerError::Configuration(format!(
                    "unknown metric '{raw}' (expected one of: {})",
                    Metric::ALL
                        .iter()
                        .map(|metric| metric.field_name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}
