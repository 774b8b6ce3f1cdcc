use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{
    SheetNames, FISCAL_CODE_LEN, HEADER_CODE, HEADER_COST_CENTER, HEADER_DESCRIPTION,
    HEADER_FISCAL_CODE, HEADER_PARENT,
};
use crate::audit::{self, Change};
use crate::db::{
    count, insert_employee, insert_unit, now, overwrite_employee, overwrite_unit, Store,
};
use crate::error::Result;
use crate::models::{Action, Attributes, NewEmployee, NewUnit};

/// Outcome of one import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub inserted: u32,
    pub updated: u32,
    /// Never incremented: every existing row is rewritten and counted as updated
    pub unchanged: u32,
    pub errors: Vec<String>,
}

impl ImportReport {
    /// Summary stored in the change log
    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} updated, {} unchanged",
            self.inserted, self.updated, self.unchanged
        )
    }
}

/// A workbook cell reduced to what reconciliation distinguishes
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

static EMPTY_CELL: Cell = Cell::Empty;

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }
}

impl Cell {
    /// Trimmed text; blank cells read as absent
    fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Number(n) => Some(n.to_string()),
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }

    fn is_blank(&self) -> bool {
        self.text().is_none()
    }

    /// Cost center value and whether the source cell was numeric.
    /// Numeric cells are rounded so `16100.0` reads back as `"16100"`.
    fn cost_center(&self) -> (Option<String>, bool) {
        match self {
            Cell::Number(n) => (Some(format!("{}", n.round() as i64)), true),
            other => (other.text(), false),
        }
    }
}

/// One data row keyed by header
#[derive(Debug, Clone, Default)]
pub(crate) struct SheetRow {
    cells: HashMap<String, Cell>,
}

impl SheetRow {
    fn get(&self, header: &str) -> &Cell {
        self.cells.get(header).unwrap_or(&EMPTY_CELL)
    }

    fn text(&self, header: &str) -> Option<String> {
        self.get(header).text()
    }

    fn is_blank(&self) -> bool {
        self.cells.values().all(Cell::is_blank)
    }

    #[cfg(test)]
    pub(crate) fn with(mut self, header: &str, cell: Cell) -> Self {
        self.cells.insert(header.to_string(), cell);
        self
    }
}

/// A classified data row
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RowKind {
    Unit(NewUnit),
    Employee(NewEmployee),
}

/// Classifies a row by the length of its fiscal code. Returns `None` for a
/// unit row without a code.
pub(crate) fn classify_row(row: &SheetRow) -> Option<RowKind> {
    let attributes = Attributes::from_headers(|header| row.text(header));
    let fiscal_code = row.text(HEADER_FISCAL_CODE).unwrap_or_default();

    if fiscal_code.chars().count() == FISCAL_CODE_LEN {
        let (cost_center, cost_center_numeric) = row.get(HEADER_COST_CENTER).cost_center();
        return Some(RowKind::Employee(NewEmployee {
            fiscal_code,
            file_code: row.text(HEADER_CODE),
            unit_code: row.text(HEADER_PARENT),
            cost_center,
            cost_center_numeric,
            attributes,
        }));
    }

    let code = row.text(HEADER_CODE)?;
    Some(RowKind::Unit(NewUnit {
        code,
        parent_code: row.text(HEADER_PARENT),
        description: row.text(HEADER_DESCRIPTION).unwrap_or_default(),
        cost_center: row.text(HEADER_COST_CENTER),
        attributes,
    }))
}

/// Reads the data rows of the import sheet with their spreadsheet row
/// numbers. Failures are reported as user-facing messages.
fn read_sheet(path: &Path, sheet: &str) -> std::result::Result<Vec<(usize, SheetRow)>, String> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| format!("cannot read workbook {}: {}", path.display(), e))?;

    let wanted = sheet.trim().to_uppercase();
    let name = workbook
        .sheet_names()
        .into_iter()
        .find(|name| name.trim().to_uppercase() == wanted)
        .ok_or_else(|| format!("sheet {} not found in workbook", sheet))?;

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| format!("cannot read sheet {}: {}", name, e))?;
    let first_row = range.start().map(|(row, _)| row as usize).unwrap_or(0);

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row.iter().map(|cell| cell.to_string()).collect(),
        None => return Err(format!("sheet {} is empty", name)),
    };

    let mut data = Vec::new();
    for (offset, cells) in rows.enumerate() {
        let mut row = SheetRow::default();
        for (header, cell) in headers.iter().zip(cells) {
            // The first column with a given header wins
            row.cells.entry(header.clone()).or_insert_with(|| Cell::from(cell));
        }
        if !row.is_blank() {
            // Header is line first_row + 1; data starts on the next line
            data.push((first_row + offset + 2, row));
        }
    }

    if data.is_empty() {
        return Err(format!("sheet {} is empty", name));
    }
    debug!(sheet = %name, rows = data.len(), "sheet read");
    Ok(data)
}

fn upsert(row: RowKind, tx: &rusqlite::Connection, timestamp: &str, report: &mut ImportReport) -> Result<()> {
    match row {
        RowKind::Employee(employee) => {
            let exists = count(
                tx,
                "SELECT COUNT(*) FROM employees WHERE fiscal_code = ?1",
                &employee.fiscal_code,
            )? > 0;
            if exists {
                overwrite_employee(tx, &employee, timestamp, true)?;
                report.updated += 1;
            } else {
                insert_employee(tx, &employee, timestamp)?;
                report.inserted += 1;
            }
        }
        RowKind::Unit(unit) => {
            let exists = count(tx, "SELECT COUNT(*) FROM units WHERE code = ?1", &unit.code)? > 0;
            if exists {
                overwrite_unit(tx, &unit, timestamp, true)?;
                report.updated += 1;
            } else {
                insert_unit(tx, &unit, timestamp)?;
                report.inserted += 1;
            }
        }
    }
    Ok(())
}

impl Store {
    /// Reconciles the store against a workbook
    ///
    /// Every row is upserted by natural key inside one transaction; existing
    /// rows are fully overwritten and reactivated. Problems never abort the
    /// caller: they are collected in the report, and a failed transaction
    /// leaves the store untouched with a single error.
    pub fn import_workbook<P: AsRef<Path>>(&self, path: P, sheets: &SheetNames) -> ImportReport {
        let path = path.as_ref();
        let rows = match read_sheet(path, &sheets.combined) {
            Ok(rows) => rows,
            Err(message) => {
                warn!(path = %path.display(), "{}", message);
                return ImportReport {
                    errors: vec![message],
                    ..Default::default()
                };
            }
        };

        let result = self.write(|tx| {
            let mut report = ImportReport::default();
            let ts = now();

            for (line, row) in &rows {
                match classify_row(row) {
                    Some(kind) => upsert(kind, tx, &ts, &mut report)?,
                    None => {
                        warn!(line, "unit row without code skipped");
                        report.errors.push(format!("row {}: unit without code", line));
                    }
                }
            }

            audit::append(
                tx,
                &Change::system(Action::Import, "import", &report.summary()),
                &ts,
            )?;
            Ok(report)
        });

        match result {
            Ok(report) => {
                info!(
                    inserted = report.inserted,
                    updated = report.updated,
                    errors = report.errors.len(),
                    "import completed"
                );
                report
            }
            Err(e) => {
                warn!(error = %e, "import rolled back");
                ImportReport {
                    errors: vec![format!("import aborted: {}", e)],
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixteen_character_fiscal_code_is_employee() {
        let row = SheetRow::default()
            .with(HEADER_FISCAL_CODE, Cell::Text(" RSSMRA80A01H501Z ".to_string()))
            .with(HEADER_CODE, Cell::Text("0042".to_string()))
            .with(HEADER_PARENT, Cell::Text("G01".to_string()))
            .with("Titolare", Cell::Text("Rossi Mario".to_string()));

        match classify_row(&row) {
            Some(RowKind::Employee(e)) => {
                assert_eq!(e.fiscal_code, "RSSMRA80A01H501Z");
                assert_eq!(e.file_code.as_deref(), Some("0042"));
                assert_eq!(e.unit_code.as_deref(), Some("G01"));
                assert_eq!(e.attributes.owner.as_deref(), Some("Rossi Mario"));
            }
            other => panic!("expected employee, got {:?}", other),
        }
    }

    #[test]
    fn test_other_rows_are_units() {
        let row = SheetRow::default()
            .with(HEADER_FISCAL_CODE, Cell::Text("SHORT".to_string()))
            .with(HEADER_CODE, Cell::Text("G01".to_string()))
            .with(HEADER_COST_CENTER, Cell::Number(16100.0));

        match classify_row(&row) {
            Some(RowKind::Unit(u)) => {
                assert_eq!(u.code, "G01");
                assert_eq!(u.description, "");
                assert_eq!(u.parent_code, None);
                assert_eq!(u.cost_center.as_deref(), Some("16100"));
            }
            other => panic!("expected unit, got {:?}", other),
        }
    }

    #[test]
    fn test_unit_row_without_code_is_rejected() {
        let row = SheetRow::default().with(HEADER_DESCRIPTION, Cell::Text("Orfana".to_string()));
        assert!(classify_row(&row).is_none());
    }

    #[test]
    fn test_cost_center_normalization() {
        assert_eq!(Cell::Number(16100.0).cost_center(), (Some("16100".to_string()), true));
        assert_eq!(Cell::Number(99.6).cost_center(), (Some("100".to_string()), true));
        assert_eq!(Cell::Text(" A12 ".to_string()).cost_center(), (Some("A12".to_string()), false));
        assert_eq!(Cell::Text("   ".to_string()).cost_center(), (None, false));
        assert_eq!(Cell::Empty.cost_center(), (None, false));
    }

    #[test]
    fn test_blank_values_read_as_absent() {
        let row = SheetRow::default()
            .with("Sede_TNS", Cell::Text("  ".to_string()))
            .with("LIVELLO", Cell::Empty);
        assert!(row.is_blank());
        assert_eq!(row.text("Sede_TNS"), None);
        assert_eq!(row.text("missing header"), None);
    }

    #[test]
    fn test_summary_format() {
        let report = ImportReport {
            inserted: 3,
            updated: 2,
            ..Default::default()
        };
        assert_eq!(report.summary(), "3 inserted, 2 updated, 0 unchanged");
    }
}
