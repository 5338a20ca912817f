use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::sheet::{CONSTRAINTS_SUFFIX, HEADER, HEADER_ROWS};
use crate::errors::SheetError;
use crate::sheet::{CellRange, CellRef, SheetClient, SheetGrid, SheetRow};
use crate::transport::fs::atomic_write;
use crate::types::{CellText, RowNumber};

/// Sheet collaborator backed by one CSV file per rater.
///
/// Sheet addresses are file paths, resolved against `root` when relative.
/// Missing files read as empty sheets and are created with the two header
/// rows on first write. Choice constraints are kept in a JSON sidecar next to
/// the sheet file, since CSV has no notion of cell validation.
#[derive(Clone, Debug)]
pub struct LocalCsvSheets {
    root: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
struct StoredConstraint {
    range: String,
    allowed: Vec<CellText>,
}

impl LocalCsvSheets {
    /// Resolve relative sheet addresses against `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File backing `sheet`.
    pub fn path_for(&self, sheet: &str) -> PathBuf {
        let path = Path::new(sheet);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Sidecar file holding the choice constraints of `sheet`.
    pub fn constraints_path(&self, sheet: &str) -> PathBuf {
        let mut path = self.path_for(sheet).into_os_string();
        path.push(CONSTRAINTS_SUFFIX);
        PathBuf::from(path)
    }

    /// Constraints recorded for `sheet`, as `(range, allowed values)` pairs.
    pub fn constraints(&self, sheet: &str) -> Result<Vec<(CellRange, Vec<CellText>)>, SheetError> {
        self.load_constraints(sheet)?
            .into_iter()
            .map(|stored| {
                let range = stored.range.parse::<CellRange>()?;
                Ok::<_, SheetError>((range, stored.allowed))
            })
            .collect()
    }

    /// Fill one cell in place, as a rater would.
    pub fn set_cell(&self, sheet: &str, cell: &CellRef, value: &str) -> Result<(), SheetError> {
        let mut grid = self.load(sheet)?;
        grid.set_cell(cell, value)?;
        self.store(sheet, &grid)
    }

    fn load(&self, sheet: &str) -> Result<SheetGrid, SheetError> {
        let path = self.path_for(sheet);
        if !path.exists() {
            return Ok(SheetGrid::default());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .map_err(|err| unavailable(sheet, err))?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| SheetError::Malformed {
                sheet: sheet.to_string(),
                details: err.to_string(),
            })?;
            rows.push(record.iter().map(str::to_string).collect::<SheetRow>());
        }
        Ok(SheetGrid::from_rows(rows))
    }

    fn store(&self, sheet: &str, grid: &SheetGrid) -> Result<(), SheetError> {
        let width = grid.rows().iter().map(Vec::len).max().unwrap_or(0);
        let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());
        for row in grid.rows() {
            let mut padded = row.clone();
            padded.resize(width, String::new());
            writer
                .write_record(&padded)
                .map_err(|err| unavailable(sheet, err))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| unavailable(sheet, err))?;
        let path = self.path_for(sheet);
        atomic_write(&path, &bytes).map_err(|err| unavailable(sheet, err))?;
        debug!(
            "[ledger:sheet] wrote {} rows to {}",
            grid.rows().len(),
            path.display()
        );
        Ok(())
    }

    fn load_constraints(&self, sheet: &str) -> Result<Vec<StoredConstraint>, SheetError> {
        let path = self.constraints_path(sheet);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&path).map_err(|err| unavailable(sheet, err))?;
        serde_json::from_slice(&bytes).map_err(|err| SheetError::Malformed {
            sheet: sheet.to_string(),
            details: format!("constraints sidecar: {err}"),
        })
    }
}

fn unavailable(sheet: &str, err: impl Display) -> SheetError {
    SheetError::Unavailable {
        sheet: sheet.to_string(),
        reason: err.to_string(),
    }
}

fn header_rows() -> Vec<SheetRow> {
    let mut rows = vec![HEADER.iter().map(|name| name.to_string()).collect::<SheetRow>()];
    rows.resize(HEADER_ROWS as usize, vec![String::new(); HEADER.len()]);
    rows
}

impl SheetClient for LocalCsvSheets {
    fn next_free_row(&self, sheet: &str) -> Result<RowNumber, SheetError> {
        Ok(self.load(sheet)?.next_free_row())
    }

    fn write_rows(
        &self,
        sheet: &str,
        start_row: RowNumber,
        rows: &[SheetRow],
    ) -> Result<(), SheetError> {
        let mut grid = self.load(sheet)?;
        if grid.rows().is_empty() {
            grid.write_rows(1, &header_rows());
        }
        grid.write_rows(start_row, rows);
        self.store(sheet, &grid)
    }

    fn set_choice_constraint(
        &self,
        sheet: &str,
        range: &CellRange,
        allowed: &[&str],
    ) -> Result<(), SheetError> {
        let mut stored = self.load_constraints(sheet)?;
        stored.push(StoredConstraint {
            range: range.to_string(),
            allowed: allowed.iter().map(|value| value.to_string()).collect(),
        });
        let bytes = serde_json::to_vec_pretty(&stored).map_err(|err| unavailable(sheet, err))?;
        atomic_write(&self.constraints_path(sheet), &bytes).map_err(|err| unavailable(sheet, err))
    }

    fn read_cell(&self, sheet: &str, cell: &CellRef) -> Result<Option<CellText>, SheetError> {
        self.load(sheet)?.cell(cell)
    }

    fn find_row_by_value(
        &self,
        sheet: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<RowNumber>, SheetError> {
        self.load(sheet)?.find_row(column, value)
    }

    fn next_unfilled_row(&self, sheet: &str, column: &str) -> Result<RowNumber, SheetError> {
        self.load(sheet)?.next_unfilled_row(column)
    }

    fn read_column(&self, sheet: &str, range: &CellRange) -> Result<Vec<CellText>, SheetError> {
        let grid = self.load(sheet)?;
        (range.start_row..=range.end_row)
            .map(|row| {
                grid.cell(&CellRef::new(range.column.as_str(), row))
                    .map(Option::unwrap_or_default)
            })
            .collect()
    }
}
