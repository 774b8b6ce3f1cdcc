use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{
    SheetNames, COLUMN_ORDER, HEADER_CODE, HEADER_COST_CENTER, HEADER_DESCRIPTION,
    HEADER_FISCAL_CODE, HEADER_PARENT,
};
use crate::audit::{self, Change};
use crate::db::{employee_from_row, now, unit_from_row, Store, EMPLOYEE_SELECT, UNIT_SELECT};
use crate::error::{OrgError, Result};
use crate::models::{Action, Employee, OrgUnit};

/// What an export wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub units: usize,
    pub employees: usize,
}

/// Value of one output cell
#[derive(Debug, Clone, PartialEq)]
enum OutCell<'a> {
    Text(&'a str),
    Number(f64),
}

fn unit_cell<'a>(unit: &'a OrgUnit, header: &str) -> Option<OutCell<'a>> {
    let text = match header {
        HEADER_FISCAL_CODE => None,
        HEADER_DESCRIPTION => Some(unit.description.as_str()),
        HEADER_CODE => Some(unit.code.as_str()),
        HEADER_PARENT => unit.parent_code.as_deref(),
        HEADER_COST_CENTER => unit.cost_center.as_deref(),
        other => unit.attributes.by_header(other),
    };
    text.map(OutCell::Text)
}

fn employee_cell<'a>(employee: &'a Employee, header: &str) -> Option<OutCell<'a>> {
    let text = match header {
        HEADER_FISCAL_CODE => Some(employee.fiscal_code.as_str()),
        HEADER_DESCRIPTION => None,
        HEADER_CODE => Some(employee.file_code.as_deref().unwrap_or(&employee.fiscal_code)),
        HEADER_PARENT => employee.unit_code.as_deref(),
        HEADER_COST_CENTER => {
            let value = employee.cost_center.as_deref();
            if employee.cost_center_numeric {
                if let Some(number) = value.and_then(|v| v.parse::<f64>().ok()) {
                    return Some(OutCell::Number(number));
                }
            }
            value
        }
        other => employee.attributes.by_header(other),
    };
    text.map(OutCell::Text)
}

/// Writes the header row followed by one row per record
fn write_sheet<'a, I>(workbook: &mut Workbook, name: &str, rows: I) -> std::result::Result<(), XlsxError>
where
    I: IntoIterator<Item = Vec<Option<OutCell<'a>>>>,
{
    let sheet: &mut Worksheet = workbook.add_worksheet();
    sheet.set_name(name)?;

    for (col, header) in COLUMN_ORDER.iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }
    for (index, cells) in rows.into_iter().enumerate() {
        let row = index as u32 + 1;
        for (col, cell) in cells.into_iter().enumerate() {
            match cell {
                Some(OutCell::Text(text)) if !text.is_empty() => {
                    sheet.write_string(row, col as u16, text)?;
                }
                Some(OutCell::Number(number)) => {
                    sheet.write_number(row, col as u16, number)?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn unit_rows(units: &[OrgUnit]) -> impl Iterator<Item = Vec<Option<OutCell<'_>>>> {
    units
        .iter()
        .map(|unit| COLUMN_ORDER.iter().map(|h| unit_cell(unit, h)).collect())
}

fn employee_rows(employees: &[Employee]) -> impl Iterator<Item = Vec<Option<OutCell<'_>>>> {
    employees
        .iter()
        .map(|employee| COLUMN_ORDER.iter().map(|h| employee_cell(employee, h)).collect())
}

fn build_workbook(
    path: &Path,
    sheets: &SheetNames,
    units: &[OrgUnit],
    employees: &[Employee],
) -> std::result::Result<(), XlsxError> {
    let mut workbook = Workbook::new();
    write_sheet(
        &mut workbook,
        &sheets.combined,
        unit_rows(units).chain(employee_rows(employees)),
    )?;
    write_sheet(&mut workbook, &sheets.personnel, employee_rows(employees))?;
    write_sheet(&mut workbook, &sheets.units, unit_rows(units))?;
    workbook.save(path)
}

/// The writer only produces OOXML; any other extension is replaced by `.xlsx`
fn xlsx_path(path: &Path) -> PathBuf {
    let is_xlsx = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
    if is_xlsx {
        return path.to_path_buf();
    }
    let normalized = path.with_extension("xlsx");
    warn!(
        requested = %path.display(),
        written = %normalized.display(),
        "export is written as .xlsx"
    );
    normalized
}

impl Store {
    /// Writes all active units and employees to a three-sheet workbook
    ///
    /// The combined sheet holds units (by code) then employees (by fiscal
    /// code); the other two sheets hold one kind each. The file always gets
    /// an `.xlsx` extension; the summary carries the path actually written.
    pub fn export_workbook<P: AsRef<Path>>(&self, path: P, sheets: &SheetNames) -> Result<ExportSummary> {
        let path = &xlsx_path(path.as_ref());
        let (units, employees) = self.read(|conn| {
            let sql = format!("{} WHERE u.deleted_at IS NULL ORDER BY u.code ASC", UNIT_SELECT);
            let units = conn
                .prepare(&sql)?
                .query_map([], unit_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let sql = format!(
                "{} WHERE deleted_at IS NULL ORDER BY fiscal_code ASC",
                EMPLOYEE_SELECT
            );
            let employees = conn
                .prepare(&sql)?
                .query_map([], employee_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((units, employees))
        })?;

        build_workbook(path, sheets, &units, &employees).map_err(|e| match e {
            XlsxError::IoError(io) => OrgError::io(path, io),
            other => OrgError::Workbook(other.to_string()),
        })?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.write(|tx| {
            audit::append(tx, &Change::system(Action::Export, "export", &file_name), &now())?;
            Ok(())
        })?;

        info!(
            path = %path.display(),
            units = units.len(),
            employees = employees.len(),
            "export completed"
        );
        Ok(ExportSummary {
            path: path.to_path_buf(),
            units: units.len(),
            employees: employees.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEmployee, NewUnit};

    fn column(header: &str) -> usize {
        COLUMN_ORDER.iter().position(|h| *h == header).unwrap()
    }

    #[test]
    fn test_employee_code_falls_back_to_fiscal_code() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_employee(&NewEmployee::new("RSSMRA80A01H501Z", "Rossi"))
            .unwrap();
        let mut special = NewEmployee::new("BNCLRA85B41F205X", "Bianchi");
        special.file_code = Some("EXT-7".to_string());
        store.create_employee(&special).unwrap();

        let employees = store.list_employees(false).unwrap();
        let rows: Vec<_> = employee_rows(&employees).collect();
        // Ordered by owner: Bianchi, Rossi
        assert_eq!(rows[0][column(HEADER_CODE)], Some(OutCell::Text("EXT-7")));
        assert_eq!(rows[1][column(HEADER_CODE)], Some(OutCell::Text("RSSMRA80A01H501Z")));
        assert_eq!(rows[1][column(HEADER_DESCRIPTION)], None);
    }

    #[test]
    fn test_numeric_cost_center_is_written_as_number() {
        let store = Store::open_in_memory().unwrap();
        let mut employee = NewEmployee::new("RSSMRA80A01H501Z", "Rossi");
        employee.cost_center = Some("16100".to_string());
        employee.cost_center_numeric = true;
        store.create_employee(&employee).unwrap();

        let mut unit = NewUnit::new("G01", "Gruppo");
        unit.cost_center = Some("16100".to_string());
        store.create_unit(&unit).unwrap();

        let employees = store.list_employees(false).unwrap();
        let units = store.list_units(false).unwrap();
        let employee_row: Vec<_> = employee_rows(&employees).collect();
        let unit_row: Vec<_> = unit_rows(&units).collect();

        assert_eq!(employee_row[0][column(HEADER_COST_CENTER)], Some(OutCell::Number(16100.0)));
        assert_eq!(unit_row[0][column(HEADER_COST_CENTER)], Some(OutCell::Text("16100")));
        assert_eq!(unit_row[0][column(HEADER_FISCAL_CODE)], None);
    }

    #[test]
    fn test_export_writes_file_and_audit_entry() {
        let store = Store::open_in_memory().unwrap();
        store.create_unit(&NewUnit::new("A", "Direzione")).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organigramma.xlsx");
        let summary = store.export_workbook(&path, &SheetNames::default()).unwrap();

        assert!(path.exists());
        assert_eq!(summary.units, 1);
        assert_eq!(summary.employees, 0);

        let history = store.list_changes(&Default::default()).unwrap();
        assert_eq!(history[0].action, Action::Export);
        assert_eq!(history[0].entity_id, "export");
        assert_eq!(history[0].new_value.as_deref(), Some("organigramma.xlsx"));
    }

    #[test]
    fn test_export_replaces_legacy_extension() {
        let store = Store::open_in_memory().unwrap();
        store.create_unit(&NewUnit::new("A", "Direzione")).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let requested = dir.path().join("organigramma.xls");
        let summary = store.export_workbook(&requested, &SheetNames::default()).unwrap();

        assert_eq!(summary.path, dir.path().join("organigramma.xlsx"));
        assert!(summary.path.exists());
        assert!(!requested.exists());
        assert_eq!(xlsx_path(Path::new("out.XLSX")), PathBuf::from("out.XLSX"));
        assert_eq!(xlsx_path(Path::new("out")), PathBuf::from("out.xlsx"));

        let history = store.list_changes(&Default::default()).unwrap();
        assert_eq!(history[0].new_value.as_deref(), Some("organigramma.xlsx"));
    }
}
