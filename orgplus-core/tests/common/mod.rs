//! Shared fixtures for the integration tests

#![allow(dead_code)]

use orgplus_core::{NewEmployee, NewUnit, Store, COLUMN_ORDER};
use rust_xlsxwriter::Workbook;
use std::path::Path;
use tempfile::TempDir;

/// A cell written into a test workbook
#[derive(Debug, Clone, Copy)]
pub enum Cell<'a> {
    Text(&'a str),
    Number(f64),
}

/// Writes a single-sheet workbook using the standard header row
pub fn write_workbook(path: &Path, sheet: &str, rows: &[Vec<(&str, Cell<'_>)>]) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet).unwrap();

    for (col, header) in COLUMN_ORDER.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header).unwrap();
    }
    for (index, cells) in rows.iter().enumerate() {
        let row = index as u32 + 1;
        for (header, cell) in cells {
            let col = COLUMN_ORDER
                .iter()
                .position(|h| h == header)
                .unwrap_or_else(|| panic!("unknown header {:?}", header)) as u16;
            match cell {
                Cell::Text(text) => worksheet.write_string(row, col, *text).unwrap(),
                Cell::Number(number) => worksheet.write_number(row, col, *number).unwrap(),
            };
        }
    }
    workbook.save(path).unwrap();
}

/// A file-backed store in a fresh temporary directory
pub fn temp_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path().join("orgplus.db")).unwrap();
    (dir, store)
}

/// Builds `ROOT > A > A01` with one employee in `A01`
pub fn seed_small_tree(store: &Store) {
    store.create_unit(&NewUnit::new("ROOT", "Azienda")).unwrap();
    store
        .create_unit(&NewUnit::new("A", "Direzione").with_parent("ROOT"))
        .unwrap();
    store
        .create_unit(&NewUnit::new("A01", "Segreteria").with_parent("A"))
        .unwrap();
    store
        .create_employee(&NewEmployee::new("RSSMRA80A01H501Z", "Rossi Mario").in_unit("A01"))
        .unwrap();
}
