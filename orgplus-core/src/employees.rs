//! Employee mutation service
//!
//! Employees carry no tree rules: the unit assignment is an ordinary field
//! and deletion is never guarded.

use tracing::debug;

use crate::audit::{self, Change, FieldDiff};
use crate::db::{
    employee_from_row, fetch_employee, insert_employee, now, overwrite_employee, Store,
    EMPLOYEE_SELECT,
};
use crate::error::{OrgError, Result};
use crate::models::{Action, Employee, EmployeePatch, EntityType, NewEmployee};
use crate::units::attribute_diffs;

fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl Store {
    /// Lists employees ordered by owner, then fiscal code
    pub fn list_employees(&self, include_deleted: bool) -> Result<Vec<Employee>> {
        let filter = if include_deleted {
            ""
        } else {
            " WHERE deleted_at IS NULL"
        };
        let sql = format!(
            "{}{} ORDER BY owner ASC, fiscal_code ASC",
            EMPLOYEE_SELECT, filter
        );
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let employees = stmt
                .query_map([], employee_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(employees)
        })
    }

    /// Looks an employee up by fiscal code, whatever its deletion state
    pub fn get_employee(&self, fiscal_code: &str) -> Result<Option<Employee>> {
        self.read(|conn| fetch_employee(conn, fiscal_code))
    }

    /// Creates an employee. The unit code is not checked: an unresolved
    /// assignment is an orphan, not an error.
    pub fn create_employee(&self, employee: &NewEmployee) -> Result<Employee> {
        self.write(|tx| {
            if fetch_employee(tx, &employee.fiscal_code)?.is_some() {
                return Err(OrgError::DuplicateKey {
                    entity: "employee",
                    key: employee.fiscal_code.clone(),
                });
            }

            let ts = now();
            insert_employee(tx, employee, &ts)?;
            let created = fetch_employee(tx, &employee.fiscal_code)?
                .ok_or_else(|| OrgError::employee_not_found(&employee.fiscal_code))?;
            audit::append(
                tx,
                &Change::event(
                    EntityType::Employee,
                    &created.fiscal_code,
                    created.label(),
                    Action::Create,
                ),
                &ts,
            )?;
            debug!(fiscal_code = %created.fiscal_code, "employee created");
            Ok(created)
        })
    }

    /// Applies a partial update, unit assignment included
    pub fn update_employee(&self, fiscal_code: &str, patch: &EmployeePatch) -> Result<Employee> {
        self.write(|tx| {
            let current = fetch_employee(tx, fiscal_code)?
                .ok_or_else(|| OrgError::employee_not_found(fiscal_code))?;

            let pick = |incoming: &Option<Option<String>>, stored: &Option<String>| match incoming {
                Some(value) => value.clone(),
                None => stored.clone(),
            };
            let merged = NewEmployee {
                fiscal_code: current.fiscal_code.clone(),
                file_code: pick(&patch.file_code, &current.file_code),
                unit_code: pick(&patch.unit_code, &current.unit_code),
                cost_center: pick(&patch.cost_center, &current.cost_center),
                cost_center_numeric: patch
                    .cost_center_numeric
                    .unwrap_or(current.cost_center_numeric),
                attributes: current.attributes.merged(&patch.attributes),
            };

            let ts = now();
            overwrite_employee(tx, &merged, &ts, false)?;

            let mut fields: Vec<FieldDiff<'_>> = vec![
                ("file_code", current.file_code.as_deref(), merged.file_code.as_deref()),
                ("unit_code", current.unit_code.as_deref(), merged.unit_code.as_deref()),
                ("cost_center", current.cost_center.as_deref(), merged.cost_center.as_deref()),
                (
                    "cost_center_numeric",
                    Some(flag(current.cost_center_numeric)),
                    Some(flag(merged.cost_center_numeric)),
                ),
            ];
            fields.extend(attribute_diffs(&current.attributes, &merged.attributes));

            let label = merged
                .attributes
                .owner
                .as_deref()
                .unwrap_or(&merged.fiscal_code);
            let changed = audit::append_field_changes(
                tx,
                EntityType::Employee,
                fiscal_code,
                label,
                &fields,
                &ts,
            )?;
            debug!(fiscal_code, changed, "employee updated");

            fetch_employee(tx, fiscal_code)?.ok_or_else(|| OrgError::employee_not_found(fiscal_code))
        })
    }

    /// Soft-deletes an employee; deleting a deleted employee is a no-op
    pub fn delete_employee(&self, fiscal_code: &str) -> Result<()> {
        self.write(|tx| {
            let employee = fetch_employee(tx, fiscal_code)?
                .ok_or_else(|| OrgError::employee_not_found(fiscal_code))?;
            if employee.is_deleted() {
                return Ok(());
            }

            let ts = now();
            tx.execute(
                "UPDATE employees SET deleted_at = ?1 WHERE fiscal_code = ?2",
                rusqlite::params![ts, fiscal_code],
            )?;
            audit::append(
                tx,
                &Change::event(EntityType::Employee, fiscal_code, employee.label(), Action::Delete),
                &ts,
            )?;
            Ok(())
        })
    }

    /// Clears the deletion mark; restoring an active employee is a no-op
    pub fn restore_employee(&self, fiscal_code: &str) -> Result<()> {
        self.write(|tx| {
            let employee = fetch_employee(tx, fiscal_code)?
                .ok_or_else(|| OrgError::employee_not_found(fiscal_code))?;
            if !employee.is_deleted() {
                return Ok(());
            }

            let ts = now();
            tx.execute(
                "UPDATE employees SET deleted_at = NULL, updated_at = ?1 WHERE fiscal_code = ?2",
                rusqlite::params![ts, fiscal_code],
            )?;
            audit::append(
                tx,
                &Change::event(EntityType::Employee, fiscal_code, employee.label(), Action::Restore),
                &ts,
            )?;
            Ok(())
        })
    }
}
