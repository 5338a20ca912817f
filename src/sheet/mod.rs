//! Spreadsheet collaborator interface.
//!
//! Ownership model:
//! - `SheetClient` is the only way the core touches a rater's sheet. Sheets are
//!   volatile and untrusted: cells may be blank, partially filled, or hold text
//!   outside the dropdown vocabulary.
//! - `PacedSheets` wraps any client with request pacing and rate-limit retries.
//! - `InMemorySheets` and `LocalCsvSheets` are the bundled backends; remote
//!   spreadsheet services plug in by implementing `SheetClient`.

use std::fmt;
use std::str::FromStr;

use crate::constants::sheet::FIRST_DATA_ROW;
use crate::errors::SheetError;
use crate::types::{CellText, RowNumber};

/// In-memory sheet backend.
pub mod memory;
/// CSV-file sheet backend for offline use.
pub mod local;
/// Request pacing and rate-limit retries.
pub mod pacing;

pub use local::LocalCsvSheets;
pub use memory::InMemorySheets;
pub use pacing::{PacedSheets, PacingConfig};

/// One row of cell values, starting at column A.
pub type SheetRow = Vec<CellText>;

/// Address of a single cell, e.g. `E12`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellRef {
    /// Column letters, upper case.
    pub column: String,
    /// One-based row.
    pub row: RowNumber,
}

impl CellRef {
    /// Cell at `column`/`row`.
    pub fn new(column: impl Into<String>, row: RowNumber) -> Self {
        Self {
            column: column.into().to_ascii_uppercase(),
            row,
        }
    }

    /// Zero-based column index.
    pub fn column_index(&self) -> Result<usize, SheetError> {
        column_index(&self.column)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.column, self.row)
    }
}

impl FromStr for CellRef {
    type Err = SheetError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let split = raw
            .find(|ch: char| ch.is_ascii_digit())
            .ok_or_else(|| SheetError::InvalidCell(raw.to_string()))?;
        let (column, row) = raw.split_at(split);
        if column.is_empty() || !column.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(SheetError::InvalidCell(raw.to_string()));
        }
        let row: RowNumber = row
            .parse()
            .map_err(|_| SheetError::InvalidCell(raw.to_string()))?;
        if row == 0 {
            return Err(SheetError::InvalidCell(raw.to_string()));
        }
        Ok(CellRef::new(column, row))
    }
}

/// Single-column row range, e.g. `E3:E10`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CellRange {
    /// Column letters, upper case.
    pub column: String,
    /// First row, inclusive.
    pub start_row: RowNumber,
    /// Last row, inclusive.
    pub end_row: RowNumber,
}

impl CellRange {
    /// Range over `column` from `start_row` to `end_row` inclusive.
    pub fn new(column: impl Into<String>, start_row: RowNumber, end_row: RowNumber) -> Self {
        Self {
            column: column.into().to_ascii_uppercase(),
            start_row,
            end_row,
        }
    }

    /// Number of rows covered.
    pub fn len(&self) -> usize {
        if self.end_row < self.start_row {
            0
        } else {
            (self.end_row - self.start_row + 1) as usize
        }
    }

    /// True when the range covers no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}:{}{}",
            self.column, self.start_row, self.column, self.end_row
        )
    }
}

impl FromStr for CellRange {
    type Err = SheetError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (start, end) = raw
            .split_once(':')
            .ok_or_else(|| SheetError::InvalidCell(raw.to_string()))?;
        let start: CellRef = start.parse()?;
        let end: CellRef = end.parse()?;
        if start.column != end.column {
            return Err(SheetError::InvalidCell(raw.to_string()));
        }
        Ok(CellRange::new(start.column, start.row, end.row))
    }
}

/// Zero-based index of spreadsheet column letters (`A` = 0, `AA` = 26).
pub fn column_index(letters: &str) -> Result<usize, SheetError> {
    if letters.is_empty() {
        return Err(SheetError::InvalidCell(letters.to_string()));
    }
    let mut index = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(SheetError::InvalidCell(letters.to_string()));
        }
        let value = (ch.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        index = index * 26 + value;
    }
    Ok(index - 1)
}

/// Spreadsheet operations the ledger depends on.
///
/// Rows are one-based. Blank cells read as `None`.
pub trait SheetClient {
    /// First row after the last row holding any value (never above the first data row).
    fn next_free_row(&self, sheet: &str) -> Result<RowNumber, SheetError>;

    /// Write `rows` as a contiguous block whose first row is `start_row`, starting at column A.
    fn write_rows(
        &self,
        sheet: &str,
        start_row: RowNumber,
        rows: &[SheetRow],
    ) -> Result<(), SheetError>;

    /// Restrict `range` to the dropdown values in `allowed`.
    fn set_choice_constraint(
        &self,
        sheet: &str,
        range: &CellRange,
        allowed: &[&str],
    ) -> Result<(), SheetError>;

    /// Current value of one cell.
    fn read_cell(&self, sheet: &str, cell: &CellRef) -> Result<Option<CellText>, SheetError>;

    /// First data row whose `column` cell equals `value`.
    fn find_row_by_value(
        &self,
        sheet: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<RowNumber>, SheetError>;

    /// First data row whose `column` cell is blank.
    fn next_unfilled_row(&self, sheet: &str, column: &str) -> Result<RowNumber, SheetError> {
        let mut row = FIRST_DATA_ROW;
        while self.read_cell(sheet, &CellRef::new(column, row))?.is_some() {
            row += 1;
        }
        Ok(row)
    }

    /// Values of `range`, blanks as empty strings.
    fn read_column(&self, sheet: &str, range: &CellRange) -> Result<Vec<CellText>, SheetError> {
        let mut values = Vec::with_capacity(range.len());
        for row in range.start_row..=range.end_row {
            let value = self.read_cell(sheet, &CellRef::new(range.column.as_str(), row))?;
            values.push(value.unwrap_or_default());
        }
        Ok(values)
    }
}

impl<T: SheetClient + ?Sized> SheetClient for &T {
    fn next_free_row(&self, sheet: &str) -> Result<RowNumber, SheetError> {
        (**self).next_free_row(sheet)
    }

    fn write_rows(
        &self,
        sheet: &str,
        start_row: RowNumber,
        rows: &[SheetRow],
    ) -> Result<(), SheetError> {
        (**self).write_rows(sheet, start_row, rows)
    }

    fn set_choice_constraint(
        &self,
        sheet: &str,
        range: &CellRange,
        allowed: &[&str],
    ) -> Result<(), SheetError> {
        (**self).set_choice_constraint(sheet, range, allowed)
    }

    fn read_cell(&self, sheet: &str, cell: &CellRef) -> Result<Option<CellText>, SheetError> {
        (**self).read_cell(sheet, cell)
    }

    fn find_row_by_value(
        &self,
        sheet: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<RowNumber>, SheetError> {
        (**self).find_row_by_value(sheet, column, value)
    }

    fn next_unfilled_row(&self, sheet: &str, column: &str) -> Result<RowNumber, SheetError> {
        (**self).next_unfilled_row(sheet, column)
    }

    fn read_column(&self, sheet: &str, range: &CellRange) -> Result<Vec<CellText>, SheetError> {
        (**self).read_column(sheet, range)
    }
}

/// Dense cell grid shared by the bundled backends. Index 0 is row 1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SheetGrid {
    rows: Vec<SheetRow>,
}

impl SheetGrid {
    pub(crate) fn from_rows(rows: Vec<SheetRow>) -> Self {
        Self { rows }
    }

    pub(crate) fn rows(&self) -> &[SheetRow] {
        &self.rows
    }

    pub(crate) fn cell(&self, cell: &CellRef) -> Result<Option<CellText>, SheetError> {
        let (row_idx, col) = grid_position(cell)?;
        let value = self
            .rows
            .get(row_idx)
            .and_then(|row| row.get(col))
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        Ok(value)
    }

    pub(crate) fn set_cell(&mut self, cell: &CellRef, value: &str) -> Result<(), SheetError> {
        let (row_idx, col) = grid_position(cell)?;
        if self.rows.len() <= row_idx {
            self.rows.resize_with(row_idx + 1, Vec::new);
        }
        let row = &mut self.rows[row_idx];
        if row.len() <= col {
            row.resize(col + 1, String::new());
        }
        row[col] = value.to_string();
        Ok(())
    }

    pub(crate) fn write_rows(&mut self, start_row: RowNumber, rows: &[SheetRow]) {
        let start = start_row.max(1) as usize - 1;
        if self.rows.len() < start + rows.len() {
            self.rows.resize_with(start + rows.len(), Vec::new);
        }
        for (offset, values) in rows.iter().enumerate() {
            let row = &mut self.rows[start + offset];
            if row.len() < values.len() {
                row.resize(values.len(), String::new());
            }
            for (col, value) in values.iter().enumerate() {
                row[col] = value.clone();
            }
        }
    }

    pub(crate) fn next_free_row(&self) -> RowNumber {
        let last_used = self
            .rows
            .iter()
            .rposition(|row| row.iter().any(|value| !value.trim().is_empty()))
            .map(|idx| idx as RowNumber + 1)
            .unwrap_or(0);
        (last_used + 1).max(FIRST_DATA_ROW)
    }

    pub(crate) fn next_unfilled_row(&self, column: &str) -> Result<RowNumber, SheetError> {
        let mut row = FIRST_DATA_ROW;
        while self.cell(&CellRef::new(column, row))?.is_some() {
            row += 1;
        }
        Ok(row)
    }

    pub(crate) fn find_row(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<RowNumber>, SheetError> {
        let col = column_index(column)?;
        let needle = value.trim();
        let found = self
            .rows
            .iter()
            .enumerate()
            .skip(FIRST_DATA_ROW as usize - 1)
            .find(|(_, row)| row.get(col).map(|cell| cell.trim()) == Some(needle))
            .map(|(idx, _)| idx as RowNumber + 1);
        Ok(found)
    }
}

fn grid_position(cell: &CellRef) -> Result<(usize, usize), SheetError> {
    let row_idx = (cell.row as usize)
        .checked_sub(1)
        .ok_or_else(|| SheetError::InvalidCell(cell.to_string()))?;
    Ok((row_idx, cell.column_index()?))
}
