//! Length balancing of the winning and awry conversation subsets.
//!
//! Conversations are split by the `dataset_numeric` column. For every distinct
//! value of the balanced feature, both sides keep `min(winning, awry)`
//! conversations, drawn with a seeded RNG, so the two subsets end up with the
//! same feature distribution.

use std::io;
use std::path::Path;

use csv::WriterBuilder;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::{info, warn};

use crate::constants::balance::{AWRY_VALUE, DATASET_FEATURE, WINNING_VALUE};
use crate::errors::LedgerError;
use crate::metrics::{Summary, describe};
use crate::source::Corpus;
use crate::transport::fs::atomic_write;
use crate::types::{ConversationId, FeatureName};

/// One conversation and its balanced feature value.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureSample {
    /// Sampled conversation.
    pub conversation_id: ConversationId,
    /// Its feature value.
    pub value: f64,
}

/// Result of `balance_by_feature`.
#[derive(Clone, Debug, PartialEq)]
pub struct BalancedSample {
    /// Feature the subsets were balanced on.
    pub feature: FeatureName,
    /// Kept winning conversations, ascending by value.
    pub winning: Vec<FeatureSample>,
    /// Kept awry conversations, ascending by value.
    pub awry: Vec<FeatureSample>,
    /// Conversations without a usable dataset label or feature value.
    pub skipped: usize,
}

impl BalancedSample {
    /// Feature values of the kept winning conversations.
    pub fn winning_values(&self) -> Vec<f64> {
        self.winning.iter().map(|sample| sample.value).collect()
    }

    /// Feature values of the kept awry conversations.
    pub fn awry_values(&self) -> Vec<f64> {
        self.awry.iter().map(|sample| sample.value).collect()
    }

    /// Descriptive statistics of both sides, winning first.
    pub fn summaries(&self) -> (Option<Summary>, Option<Summary>) {
        (describe(&self.winning_values()), describe(&self.awry_values()))
    }
}

/// Balance winning and awry conversations on `feature`.
///
/// A conversation's label and feature value come from its first message that
/// carries both columns.
pub fn balance_by_feature(
    corpus: &Corpus,
    feature: &str,
    seed: u64,
) -> Result<BalancedSample, LedgerError> {
    let mut winning: Vec<FeatureSample> = Vec::new();
    let mut awry: Vec<FeatureSample> = Vec::new();
    let mut skipped = 0usize;
    for (conversation_id, messages) in corpus.conversations() {
        let labelled = messages.iter().find_map(|record| {
            Some((record.feature(DATASET_FEATURE)?, record.feature(feature)?))
        });
        let sample = |value| FeatureSample {
            conversation_id: conversation_id.clone(),
            value,
        };
        match labelled {
            Some((label, value)) if label == WINNING_VALUE && !value.is_nan() => {
                winning.push(sample(value))
            }
            Some((label, value)) if label == AWRY_VALUE && !value.is_nan() => {
                awry.push(sample(value))
            }
            _ => skipped += 1,
        }
    }
    if winning.is_empty() && awry.is_empty() {
        return Err(LedgerError::Corpus(format!(
            "no conversation carries both '{DATASET_FEATURE}' and '{feature}'"
        )));
    }
    if skipped > 0 {
        warn!(
            "[ledger:balance] {} conversations lack '{}' or '{}'",
            skipped, DATASET_FEATURE, feature
        );
    }

    sort_samples(&mut winning);
    sort_samples(&mut awry);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut kept_winning = Vec::new();
    let mut kept_awry = Vec::new();
    let winning_groups: Vec<&[FeatureSample]> =
        winning.chunk_by(|a, b| a.value == b.value).collect();
    let awry_groups: Vec<&[FeatureSample]> = awry.chunk_by(|a, b| a.value == b.value).collect();
    for winning_group in &winning_groups {
        let value = winning_group[0].value;
        let Some(awry_group) = awry_groups.iter().find(|group| group[0].value == value) else {
            continue;
        };
        let keep = winning_group.len().min(awry_group.len());
        kept_winning.extend(winning_group.choose_multiple(&mut rng, keep).cloned());
        kept_awry.extend(awry_group.choose_multiple(&mut rng, keep).cloned());
    }
    sort_samples(&mut kept_winning);
    sort_samples(&mut kept_awry);
    info!(
        "[ledger:balance] '{}': kept {} of {} winning and {} of {} awry conversations",
        feature,
        kept_winning.len(),
        winning.len(),
        kept_awry.len(),
        awry.len()
    );
    Ok(BalancedSample {
        feature: feature.to_string(),
        winning: kept_winning,
        awry: kept_awry,
        skipped,
    })
}

fn sort_samples(samples: &mut [FeatureSample]) {
    samples.sort_by(|a, b| {
        a.value
            .total_cmp(&b.value)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
}

/// Write the resampled winning ids and the describe table of both sides into `dir`.
///
/// Files: `Dataset_<feature>_resampled.csv` and `Dataset_<feature>_describe.csv`.
pub fn write_balanced(dir: &Path, sample: &BalancedSample) -> Result<(), LedgerError> {
    let mut resampled = WriterBuilder::new().from_writer(Vec::new());
    resampled.write_record(["conversation_id", sample.feature.as_str()])?;
    for row in &sample.winning {
        resampled.write_record([row.conversation_id.clone(), row.value.to_string()])?;
    }
    let bytes = resampled
        .into_inner()
        .map_err(|err| LedgerError::Io(io::Error::other(err.to_string())))?;
    atomic_write(
        &dir.join(format!("Dataset_{}_resampled.csv", sample.feature)),
        &bytes,
    )?;

    let mut summary = WriterBuilder::new().from_writer(Vec::new());
    let mut header = vec![""];
    header.extend(Summary::COLUMNS);
    summary.write_record(&header)?;
    let (winning, awry) = sample.summaries();
    for (name, stats) in [("Dataset_1_Winning", winning), ("Dataset_0_Awry", awry)] {
        let mut record = vec![name.to_string()];
        match stats {
            Some(stats) => record.extend(stats.values()),
            None => {
                record.push("0".to_string());
                record.extend(std::iter::repeat_n(String::new(), Summary::COLUMNS.len() - 1));
            }
        }
        summary.write_record(&record)?;
    }
    let bytes = summary
        .into_inner()
        .map_err(|err| LedgerError::Io(io::Error::other(err.to_string())))?;
    atomic_write(
        &dir.join(format!("Dataset_{}_describe.csv", sample.feature)),
        &bytes,
    )
}
