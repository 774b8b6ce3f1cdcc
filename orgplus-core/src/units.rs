//! Create, read and update operations for organizational units
//!
//! Reparenting, deletion and restore live in [`crate::hierarchy`] since they
//! carry tree rules.

use tracing::debug;

use crate::audit::{self, Change, FieldDiff};
use crate::db::{
    employee_from_row, fetch_unit, insert_unit, now, overwrite_unit, unit_from_row, Store,
    EMPLOYEE_SELECT, UNIT_SELECT,
};
use crate::error::{OrgError, Result};
use crate::models::{Action, Attributes, Employee, EntityType, NewUnit, OrgUnit, UnitPatch};

/// Pairs every attribute column with its old and new value
pub(crate) fn attribute_diffs<'a>(old: &'a Attributes, new: &'a Attributes) -> Vec<FieldDiff<'a>> {
    old.iter()
        .zip(new.iter())
        .map(|((column, before), (_, after))| (column, before, after))
        .collect()
}

impl Store {
    /// Lists units ordered by code
    pub fn list_units(&self, include_deleted: bool) -> Result<Vec<OrgUnit>> {
        let filter = if include_deleted {
            ""
        } else {
            " WHERE u.deleted_at IS NULL"
        };
        let sql = format!("{}{} ORDER BY u.code ASC", UNIT_SELECT, filter);
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let units = stmt
                .query_map([], unit_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(units)
        })
    }

    /// Looks a unit up by code, whatever its deletion state
    pub fn get_unit(&self, code: &str) -> Result<Option<OrgUnit>> {
        self.read(|conn| fetch_unit(conn, code))
    }

    /// Direct non-deleted employees of a unit, ordered by owner
    pub fn unit_employees(&self, code: &str) -> Result<Vec<Employee>> {
        let sql = format!(
            "{} WHERE unit_code = ?1 AND deleted_at IS NULL ORDER BY owner ASC",
            EMPLOYEE_SELECT
        );
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let employees = stmt
                .query_map([code], employee_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(employees)
        })
    }

    /// Creates a unit. The code stays reserved by deleted units too.
    pub fn create_unit(&self, unit: &NewUnit) -> Result<OrgUnit> {
        self.write(|tx| {
            if fetch_unit(tx, &unit.code)?.is_some() {
                return Err(OrgError::DuplicateKey {
                    entity: "unit",
                    key: unit.code.clone(),
                });
            }

            let ts = now();
            insert_unit(tx, unit, &ts)?;
            let created = fetch_unit(tx, &unit.code)?.ok_or_else(|| OrgError::unit_not_found(&unit.code))?;
            audit::append(
                tx,
                &Change::event(EntityType::Unit, &created.code, created.label(), Action::Create),
                &ts,
            )?;
            debug!(code = %created.code, "unit created");
            Ok(created)
        })
    }

    /// Applies a partial update and records one audit entry per changed field
    pub fn update_unit(&self, code: &str, patch: &UnitPatch) -> Result<OrgUnit> {
        self.write(|tx| {
            let current = fetch_unit(tx, code)?.ok_or_else(|| OrgError::unit_not_found(code))?;

            let merged = NewUnit {
                code: current.code.clone(),
                parent_code: current.parent_code.clone(),
                description: match &patch.description {
                    Some(value) => value.clone().unwrap_or_default(),
                    None => current.description.clone(),
                },
                cost_center: match &patch.cost_center {
                    Some(value) => value.clone(),
                    None => current.cost_center.clone(),
                },
                attributes: current.attributes.merged(&patch.attributes),
            };

            let ts = now();
            overwrite_unit(tx, &merged, &ts, false)?;

            let mut fields: Vec<FieldDiff<'_>> = vec![
                (
                    "description",
                    Some(current.description.as_str()),
                    Some(merged.description.as_str()),
                ),
                (
                    "cost_center",
                    current.cost_center.as_deref(),
                    merged.cost_center.as_deref(),
                ),
            ];
            fields.extend(attribute_diffs(&current.attributes, &merged.attributes));

            let label = if merged.description.is_empty() {
                merged.code.as_str()
            } else {
                merged.description.as_str()
            };
            let changed =
                audit::append_field_changes(tx, EntityType::Unit, code, label, &fields, &ts)?;
            debug!(code, changed, "unit updated");

            fetch_unit(tx, code)?.ok_or_else(|| OrgError::unit_not_found(code))
        })
    }
}
