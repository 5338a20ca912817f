use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::errors::SheetError;
use crate::sheet::{CellRange, CellRef, SheetClient, SheetGrid, SheetRow};
use crate::types::{CellText, RowNumber, SheetAddress};

/// Choice constraint recorded against a sheet range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceConstraint {
    /// Constrained range.
    pub range: CellRange,
    /// Allowed dropdown values.
    pub allowed: Vec<CellText>,
}

#[derive(Clone, Debug, Default)]
struct SheetState {
    grid: SheetGrid,
    constraints: Vec<ChoiceConstraint>,
}

/// Sheet collaborator kept entirely in memory.
///
/// Only sheets registered up front exist; any other address is reported as
/// unavailable. Rate-limit responses can be injected to exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemorySheets {
    sheets: RwLock<HashMap<SheetAddress, SheetState>>,
    pending_rate_limits: AtomicU32,
    requests: AtomicUsize,
}

impl InMemorySheets {
    /// Create a backend with no sheets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend holding one empty sheet per address.
    pub fn with_sheets<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SheetAddress>,
    {
        let sheets = addresses
            .into_iter()
            .map(|address| (address.into(), SheetState::default()))
            .collect();
        Self {
            sheets: RwLock::new(sheets),
            ..Self::default()
        }
    }

    /// Register an empty sheet. Existing content is kept.
    pub fn add_sheet(&self, address: impl Into<SheetAddress>) {
        if let Ok(mut sheets) = self.sheets.write() {
            sheets.entry(address.into()).or_default();
        }
    }

    /// Fill one cell, as a rater would.
    pub fn set_cell(&self, sheet: &str, cell: &CellRef, value: &str) -> Result<(), SheetError> {
        self.with_sheet_mut(sheet, |state| state.grid.set_cell(cell, value))
    }

    /// All rows of a sheet, row 1 first.
    pub fn rows(&self, sheet: &str) -> Result<Vec<SheetRow>, SheetError> {
        self.with_sheet(sheet, |state| Ok(state.grid.rows().to_vec()))
    }

    /// Constraints attached to a sheet, in the order they were set.
    pub fn constraints(&self, sheet: &str) -> Result<Vec<ChoiceConstraint>, SheetError> {
        self.with_sheet(sheet, |state| Ok(state.constraints.clone()))
    }

    /// Make the next `count` requests fail with a rate-limit error.
    pub fn inject_rate_limits(&self, count: u32) {
        self.pending_rate_limits.store(count, Ordering::SeqCst);
    }

    /// Number of requests served so far, including rejected ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn admit(&self, sheet: &str) -> Result<(), SheetError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let throttled = self
            .pending_rate_limits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if throttled {
            return Err(SheetError::RateLimited {
                sheet: sheet.to_string(),
            });
        }
        Ok(())
    }

    fn with_sheet<T>(
        &self,
        sheet: &str,
        f: impl FnOnce(&SheetState) -> Result<T, SheetError>,
    ) -> Result<T, SheetError> {
        let sheets = self.sheets.read().map_err(|_| poisoned(sheet))?;
        let state = sheets.get(sheet).ok_or_else(|| missing(sheet))?;
        f(state)
    }

    fn with_sheet_mut<T>(
        &self,
        sheet: &str,
        f: impl FnOnce(&mut SheetState) -> Result<T, SheetError>,
    ) -> Result<T, SheetError> {
        let mut sheets = self.sheets.write().map_err(|_| poisoned(sheet))?;
        let state = sheets.get_mut(sheet).ok_or_else(|| missing(sheet))?;
        f(state)
    }
}

fn poisoned(sheet: &str) -> SheetError {
    SheetError::Unavailable {
        sheet: sheet.to_string(),
        reason: "sheet lock poisoned".into(),
    }
}

fn missing(sheet: &str) -> SheetError {
    SheetError::Unavailable {
        sheet: sheet.to_string(),
        reason: "no such sheet".into(),
    }
}

impl SheetClient for InMemorySheets {
    fn next_free_row(&self, sheet: &str) -> Result<RowNumber, SheetError> {
        self.admit(sheet)?;
        self.with_sheet(sheet, |state| Ok(state.grid.next_free_row()))
    }

    fn write_rows(
        &self,
        sheet: &str,
        start_row: RowNumber,
        rows: &[SheetRow],
    ) -> Result<(), SheetError> {
        self.admit(sheet)?;
        self.with_sheet_mut(sheet, |state| {
            state.grid.write_rows(start_row, rows);
            Ok(())
        })
    }

    fn set_choice_constraint(
        &self,
        sheet: &str,
        range: &CellRange,
        allowed: &[&str],
    ) -> Result<(), SheetError> {
        self.admit(sheet)?;
        self.with_sheet_mut(sheet, |state| {
            state.constraints.push(ChoiceConstraint {
                range: range.clone(),
                allowed: allowed.iter().map(|value| value.to_string()).collect(),
            });
            Ok(())
        })
    }

    fn read_cell(&self, sheet: &str, cell: &CellRef) -> Result<Option<CellText>, SheetError> {
        self.admit(sheet)?;
        self.with_sheet(sheet, |state| state.grid.cell(cell))
    }

    fn find_row_by_value(
        &self,
        sheet: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<RowNumber>, SheetError> {
        self.admit(sheet)?;
        self.with_sheet(sheet, |state| state.grid.find_row(column, value))
    }

    fn next_unfilled_row(&self, sheet: &str, column: &str) -> Result<RowNumber, SheetError> {
        self.admit(sheet)?;
        self.with_sheet(sheet, |state| state.grid.next_unfilled_row(column))
    }

    fn read_column(&self, sheet: &str, range: &CellRange) -> Result<Vec<CellText>, SheetError> {
        self.admit(sheet)?;
        self.with_sheet(sheet, |state| {
            (range.start_row..=range.end_row)
                .map(|row| {
                    state
                        .grid
                        .cell(&CellRef::new(range.column.as_str(), row))
                        .map(Option::unwrap_or_default)
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> SheetRow {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn unknown_sheets_are_unavailable() {
        let sheets = InMemorySheets::new();
        let err = sheets.next_free_row("nowhere").unwrap_err();
        assert!(matches!(
            err,
            SheetError::Unavailable { reason, .. } if reason.contains("no such sheet")
        ));
        sheets.add_sheet("nowhere");
        assert_eq!(sheets.next_free_row("nowhere").unwrap(), 3);
    }

    #[test]
    fn writes_append_blocks_and_record_constraints() {
        let sheets = InMemorySheets::with_sheets(["s1"]);
        sheets
            .write_rows("s1", 3, &[row(&["c1", "m1", "a", "hi"]), row(&["c1", "m2", "b", "yo"])])
            .unwrap();
        assert_eq!(sheets.next_free_row("s1").unwrap(), 5);
        sheets
            .set_choice_constraint("s1", &CellRange::new("E", 3, 4), &["x", "y"])
            .unwrap();
        let constraints = sheets.constraints("s1").unwrap();
        assert_eq!(constraints.len(), 1);
        assert_eq!(constraints[0].allowed, vec!["x", "y"]);
        assert_eq!(sheets.find_row_by_value("s1", "B", "m2").unwrap(), Some(4));
        assert_eq!(sheets.rows("s1").unwrap().len(), 4);
    }

    #[test]
    fn column_reads_fill_blanks_with_empty_strings() {
        let sheets = InMemorySheets::with_sheets(["s1"]);
        sheets.set_cell("s1", &CellRef::new("H", 3), "yes").unwrap();
        sheets.set_cell("s1", &CellRef::new("H", 5), "no").unwrap();
        assert_eq!(sheets.next_unfilled_row("s1", "H").unwrap(), 4);
        let values = sheets.read_column("s1", &CellRange::new("H", 3, 5)).unwrap();
        assert_eq!(values, vec!["yes", "", "no"]);
    }

    #[test]
    fn injected_rate_limits_fail_then_clear() {
        let sheets = InMemorySheets::with_sheets(["s1"]);
        sheets.inject_rate_limits(2);
        assert!(matches!(
            sheets.read_cell("s1", &CellRef::new("E", 3)),
            Err(SheetError::RateLimited { .. })
        ));
        assert!(sheets.read_cell("s1", &CellRef::new("E", 3)).is_err());
        assert_eq!(sheets.read_cell("s1", &CellRef::new("E", 3)).unwrap(), None);
        assert_eq!(sheets.request_count(), 3);
    }
}
