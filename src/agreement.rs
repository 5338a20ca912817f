//! Inter-rater agreement statistics.
//!
//! Ratings are compared over a window of sheet rows that every selected rater
//! has reached: the window ends one row above the earliest first-blank row of
//! the last rating column across raters. Inside the window each cell is encoded
//! through its metric vocabulary, so blanks and unknown labels count as the
//! neutral code.
//!
//! Undefined statistics (no questions, fewer than two raters, zero chance
//! disagreement) are reported as `None`.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use csv::WriterBuilder;
use tracing::info;

use crate::constants::sheet::{FIRST_DATA_ROW, MESSAGE_COL, TEXT_COL};
use crate::errors::LedgerError;
use crate::log::LogStore;
use crate::rating::{AnswerCode, Metric};
use crate::session::Session;
use crate::sheet::{CellRange, SheetClient};
use crate::transport::fs::atomic_write;
use crate::types::{CellText, MessageId, RaterId, RowNumber};

/// Question × category count matrix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrequencyTable {
    counts: Vec<Vec<usize>>,
    categories: usize,
}

impl FrequencyTable {
    /// Pivot a question × rater code matrix into category counts.
    ///
    /// `categories` is a lower bound; codes beyond it widen the table.
    pub fn from_codes(codes: &[Vec<AnswerCode>], categories: usize) -> Self {
        let categories = codes
            .iter()
            .flatten()
            .map(|code| code + 1)
            .max()
            .unwrap_or(0)
            .max(categories);
        let counts = codes
            .iter()
            .map(|answers| {
                let mut row = vec![0usize; categories];
                for code in answers {
                    row[*code] += 1;
                }
                row
            })
            .collect();
        Self { counts, categories }
    }

    /// Build from explicit count rows. Rows shorter than the widest row are zero-padded.
    pub fn from_counts(mut counts: Vec<Vec<usize>>) -> Self {
        let categories = counts.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut counts {
            row.resize(categories, 0);
        }
        Self { counts, categories }
    }

    /// Number of questions (rows).
    pub fn questions(&self) -> usize {
        self.counts.len()
    }

    /// Number of answer categories (columns).
    pub fn categories(&self) -> usize {
        self.categories
    }

    /// Category counts of one question.
    pub fn row(&self, question: usize) -> &[usize] {
        &self.counts[question]
    }

    /// Ratings given for one question.
    pub fn ratings_for(&self, question: usize) -> usize {
        self.counts[question].iter().sum()
    }

    fn rows(&self) -> impl Iterator<Item = &Vec<usize>> {
        self.counts.iter()
    }
}

/// Mean pairwise agreement per question: `Σ_k n_k(n_k − 1) / (n(n − 1))`.
///
/// Questions with fewer than two ratings are ignored.
pub fn observed_agreement(table: &FrequencyTable) -> Option<f64> {
    let per_question: Vec<f64> = table
        .rows()
        .filter_map(|row| {
            let n: usize = row.iter().sum();
            if n < 2 {
                return None;
            }
            let agreeing: usize = row.iter().map(|count| count * count.saturating_sub(1)).sum();
            Some(agreeing as f64 / (n * (n - 1)) as f64)
        })
        .collect();
    mean(&per_question)
}

/// Share of questions on which every rating falls in one category.
pub fn unanimous_fraction(table: &FrequencyTable) -> Option<f64> {
    if table.questions() == 0 {
        return None;
    }
    let unanimous = table
        .rows()
        .filter(|row| {
            let n: usize = row.iter().sum();
            row.iter().any(|count| *count == n)
        })
        .count();
    Some(unanimous as f64 / table.questions() as f64)
}

/// Fleiss' kappa over a frequency table.
///
/// The rater count is taken as the largest row total, as statsmodels does.
pub fn fleiss_kappa(table: &FrequencyTable) -> Option<f64> {
    let subjects = table.questions();
    let raters = table.rows().map(|row| row.iter().sum::<usize>()).max()?;
    if subjects == 0 || raters < 2 {
        return None;
    }
    let total = (subjects * raters) as f64;
    let chance: f64 = (0..table.categories())
        .map(|category| {
            let column: usize = table.rows().map(|row| row[category]).sum();
            let share = column as f64 / total;
            share * share
        })
        .sum();
    let per_subject: Vec<f64> = table
        .rows()
        .map(|row| {
            let squares: usize = row.iter().map(|count| count * count).sum();
            (squares as f64 - raters as f64) / (raters * (raters - 1)) as f64
        })
        .collect();
    let observed = mean(&per_subject)?;
    kappa(observed, chance)
}

/// Cohen's kappa between two raters' codes for the same questions.
pub fn cohen_kappa(first: &[AnswerCode], second: &[AnswerCode]) -> Option<f64> {
    if first.is_empty() || first.len() != second.len() {
        return None;
    }
    let n = first.len() as f64;
    let observed = first
        .iter()
        .zip(second)
        .filter(|(a, b)| a == b)
        .count() as f64
        / n;
    let mut marginals: BTreeMap<AnswerCode, (usize, usize)> = BTreeMap::new();
    for code in first {
        marginals.entry(*code).or_default().0 += 1;
    }
    for code in second {
        marginals.entry(*code).or_default().1 += 1;
    }
    let chance: f64 = marginals
        .values()
        .map(|(a, b)| (*a as f64 / n) * (*b as f64 / n))
        .sum();
    kappa(observed, chance)
}

fn kappa(observed: f64, chance: f64) -> Option<f64> {
    let denominator = 1.0 - chance;
    if denominator.abs() <= f64::EPSILON {
        return None;
    }
    Some((observed - chance) / denominator)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Agreement statistics for one metric over the comparison window.
#[derive(Clone, Debug, PartialEq)]
pub struct AgreementReport {
    /// Metric compared.
    pub metric: Metric,
    /// Raters compared, in the requested order.
    pub raters: Vec<RaterId>,
    /// First compared row.
    pub first_row: RowNumber,
    /// Last compared row.
    pub last_row: RowNumber,
    /// Questions compared.
    pub questions: usize,
    /// Mean pairwise agreement.
    pub observed: Option<f64>,
    /// Share of unanimous questions.
    pub unanimous: Option<f64>,
    /// Fleiss' kappa.
    pub fleiss_kappa: Option<f64>,
    /// Cohen's kappa, only when exactly two raters are compared.
    pub cohen_kappa: Option<f64>,
}

/// A row on which the compared raters did not all give the same answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disagreement {
    /// Sheet row.
    pub row: RowNumber,
    /// Message on that row, as read from the first rater's sheet.
    pub message_id: MessageId,
    /// Message text.
    pub text: String,
    /// Raw label per rater, blank when unrated.
    pub labels: Vec<(RaterId, CellText)>,
}

/// Raw labels and codes read over a window.
struct WindowRatings {
    first_row: RowNumber,
    last_row: RowNumber,
    /// `labels[rater][question]`
    labels: Vec<Vec<CellText>>,
}

impl WindowRatings {
    /// `codes[question][rater]`
    fn codes(&self, metric: Metric) -> Vec<Vec<AnswerCode>> {
        let questions = self.labels.first().map(Vec::len).unwrap_or(0);
        (0..questions)
            .map(|question| {
                self.labels
                    .iter()
                    .map(|column| metric.encode(&column[question]))
                    .collect()
            })
            .collect()
    }
}

impl<C: SheetClient, L: LogStore> Session<C, L> {
    /// Rows every rater in `raters` has reached, as `(first, last)` inclusive.
    pub fn comparison_window(
        &self,
        raters: &[RaterId],
    ) -> Result<(RowNumber, RowNumber), LedgerError> {
        if raters.is_empty() {
            return Err(LedgerError::Configuration("no raters to compare".into()));
        }
        let last_column = Metric::ALL[Metric::ALL.len() - 1].column();
        let mut earliest: Option<RowNumber> = None;
        for rater in raters {
            let sheet = self.sheet_for(rater)?;
            let next = self.sheets.next_unfilled_row(&sheet, last_column)?;
            earliest = Some(earliest.map_or(next, |current| current.min(next)));
        }
        let last_row = earliest.unwrap_or(FIRST_DATA_ROW).saturating_sub(1);
        if last_row < FIRST_DATA_ROW {
            return Err(LedgerError::NotEnoughRatings(format!(
                "raters {} share no rated rows",
                raters.join(", ")
            )));
        }
        Ok((FIRST_DATA_ROW, last_row))
    }

    fn window_ratings(
        &self,
        metric: Metric,
        raters: &[RaterId],
        window: (RowNumber, RowNumber),
    ) -> Result<WindowRatings, LedgerError> {
        let (first_row, last_row) = window;
        let range = CellRange::new(metric.column(), first_row, last_row);
        let mut labels = Vec::with_capacity(raters.len());
        for rater in raters {
            let sheet = self.sheet_for(rater)?;
            labels.push(self.sheets.read_column(&sheet, &range)?);
        }
        Ok(WindowRatings {
            first_row,
            last_row,
            labels,
        })
    }

    fn report_for(
        &self,
        metric: Metric,
        raters: &[RaterId],
        ratings: &WindowRatings,
    ) -> AgreementReport {
        let codes = ratings.codes(metric);
        let table = FrequencyTable::from_codes(&codes, metric.category_count());
        let cohen = if raters.len() == 2 {
            let first: Vec<AnswerCode> = codes.iter().map(|row| row[0]).collect();
            let second: Vec<AnswerCode> = codes.iter().map(|row| row[1]).collect();
            cohen_kappa(&first, &second)
        } else {
            None
        };
        AgreementReport {
            metric,
            raters: raters.to_vec(),
            first_row: ratings.first_row,
            last_row: ratings.last_row,
            questions: codes.len(),
            observed: observed_agreement(&table),
            unanimous: unanimous_fraction(&table),
            fleiss_kappa: fleiss_kappa(&table),
            cohen_kappa: cohen,
        }
    }

    /// Agreement statistics for `metric` across `raters`.
    pub fn compute_agreement(
        &self,
        metric: Metric,
        raters: &[RaterId],
    ) -> Result<AgreementReport, LedgerError> {
        let window = self.comparison_window(raters)?;
        let ratings = self.window_ratings(metric, raters, window)?;
        let report = self.report_for(metric, raters, &ratings);
        info!(
            "[ledger:agreement] {} over rows {}..={}: observed {:?}, fleiss {:?}",
            metric, report.first_row, report.last_row, report.observed, report.fleiss_kappa
        );
        Ok(report)
    }

    /// Agreement statistics for every metric, sharing one comparison window.
    pub fn agreement_summary(
        &self,
        raters: &[RaterId],
    ) -> Result<Vec<AgreementReport>, LedgerError> {
        let window = self.comparison_window(raters)?;
        Metric::ALL
            .into_iter()
            .map(|metric| {
                let ratings = self.window_ratings(metric, raters, window)?;
                Ok(self.report_for(metric, raters, &ratings))
            })
            .collect()
    }

    /// Every row of the window on which the raters' codes for `metric` differ.
    pub fn find_disagreements(
        &self,
        metric: Metric,
        raters: &[RaterId],
    ) -> Result<Vec<Disagreement>, LedgerError> {
        let window = self.comparison_window(raters)?;
        let ratings = self.window_ratings(metric, raters, window)?;
        let reference = self.sheet_for(&raters[0])?;
        let message_ids = self.sheets.read_column(
            &reference,
            &CellRange::new(MESSAGE_COL, window.0, window.1),
        )?;
        let texts = self
            .sheets
            .read_column(&reference, &CellRange::new(TEXT_COL, window.0, window.1))?;

        let disagreements: Vec<Disagreement> = ratings
            .codes(metric)
            .iter()
            .enumerate()
            .filter(|(_, codes)| codes.iter().any(|code| *code != codes[0]))
            .map(|(question, _)| {
                let message_id = message_ids[question].clone();
                let text = match texts[question].as_str() {
                    "" => self
                        .corpus
                        .find_message(&message_id)
                        .map(|record| record.text.clone())
                        .unwrap_or_default(),
                    text => text.to_string(),
                };
                Disagreement {
                    row: window.0 + question as RowNumber,
                    message_id,
                    text,
                    labels: raters
                        .iter()
                        .zip(&ratings.labels)
                        .map(|(rater, column)| (rater.clone(), column[question].clone()))
                        .collect(),
                }
            })
            .collect();
        info!(
            "[ledger:agreement] {} disagreements on {} across {} raters",
            disagreements.len(),
            metric,
            raters.len()
        );
        Ok(disagreements)
    }
}

/// Write disagreements as a CSV table: `row,message_id,text,<rater>...`.
pub fn write_disagreements_csv(
    path: &Path,
    raters: &[RaterId],
    disagreements: &[Disagreement],
) -> Result<(), LedgerError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    let mut header = vec!["row".to_string(), "message_id".to_string(), "text".to_string()];
    header.extend(raters.iter().cloned());
    writer.write_record(&header)?;
    for disagreement in disagreements {
        let mut record = vec![
            disagreement.row.to_string(),
            disagreement.message_id.clone(),
            disagreement.text.clone(),
        ];
        record.extend(disagreement.labels.iter().map(|(_, label)| label.clone()));
        writer.write_record(&record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| LedgerError::Io(io::Error::other(err.to_string())))?;
    atomic_write(path, &bytes)
}
