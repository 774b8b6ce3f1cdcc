//! Dashboard counters

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::db::Store;
use crate::error::Result;

/// Non-deleted record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub units: u32,
    pub employees: u32,
    pub total: u32,
}

impl Store {
    pub fn counts(&self) -> Result<Counts> {
        self.read(|conn| {
            let units: u32 = conn.query_row(
                "SELECT COUNT(*) FROM units WHERE deleted_at IS NULL",
                [],
                |row| row.get(0),
            )?;
            let employees: u32 = conn.query_row(
                "SELECT COUNT(*) FROM employees WHERE deleted_at IS NULL",
                [],
                |row| row.get(0),
            )?;
            Ok(Counts {
                units,
                employees,
                total: units + employees,
            })
        })
    }

    /// Distinct sites of active units and employees, lower-cased and sorted
    ///
    /// Case folding happens here rather than in SQL: SQLite's `LOWER()` only
    /// folds ASCII letters.
    pub fn sites(&self) -> Result<Vec<String>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT site FROM units WHERE deleted_at IS NULL AND site IS NOT NULL
                 UNION ALL
                 SELECT site FROM employees WHERE deleted_at IS NULL AND site IS NOT NULL",
            )?;
            let mut sites = BTreeSet::new();
            for site in stmt.query_map([], |row| row.get::<_, String>(0))? {
                sites.insert(site?.to_lowercase());
            }
            Ok(sites.into_iter().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewEmployee, NewUnit};

    #[test]
    fn test_counts_skip_deleted_rows() {
        let store = Store::open_in_memory().unwrap();
        store.create_unit(&NewUnit::new("A", "Direzione")).unwrap();
        store.create_unit(&NewUnit::new("B", "Vendite")).unwrap();
        store
            .create_employee(&NewEmployee::new("RSSMRA80A01H501Z", "Rossi").in_unit("A"))
            .unwrap();
        store.delete_unit("B").unwrap();

        assert_eq!(
            store.counts().unwrap(),
            Counts {
                units: 1,
                employees: 1,
                total: 2
            }
        );
    }

    #[test]
    fn test_sites_are_distinct_and_lower_cased() {
        let store = Store::open_in_memory().unwrap();
        let mut unit = NewUnit::new("A", "Direzione");
        unit.attributes.site = Some("Roma".to_string());
        store.create_unit(&unit).unwrap();

        let mut employee = NewEmployee::new("RSSMRA80A01H501Z", "Rossi");
        employee.attributes.site = Some("ROMA".to_string());
        store.create_employee(&employee).unwrap();

        let mut employee = NewEmployee::new("BNCLRA85B41F205X", "Bianchi");
        employee.attributes.site = Some("Milano".to_string());
        store.create_employee(&employee).unwrap();

        assert_eq!(store.sites().unwrap(), vec!["milano", "roma"]);
    }

    #[test]
    fn test_sites_fold_accented_capitals() {
        let store = Store::open_in_memory().unwrap();
        let mut unit = NewUnit::new("A", "Direzione");
        unit.attributes.site = Some("FORLÌ".to_string());
        store.create_unit(&unit).unwrap();

        let mut employee = NewEmployee::new("RSSMRA80A01H501Z", "Rossi");
        employee.attributes.site = Some("Forlì".to_string());
        store.create_employee(&employee).unwrap();

        assert_eq!(store.sites().unwrap(), vec!["forlì"]);
    }
}
