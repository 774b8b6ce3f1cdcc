//! Full-row writers shared by the mutation service and the import engine
//!
//! Both paths store every column on every write: the mutation service after
//! merging a patch over the stored row, the import engine as a plain
//! overwrite from the workbook.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::error::{OrgError, Result};
use crate::models::{Attributes, NewEmployee, NewUnit};

const UNIT_COLUMNS: [&str; 3] = ["parent_code", "description", "cost_center"];
const EMPLOYEE_COLUMNS: [&str; 4] = ["file_code", "unit_code", "cost_center", "cost_center_numeric"];

fn text(value: Option<&str>) -> Value {
    match value {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn with_attributes(mut values: Vec<Value>, attributes: &Attributes) -> Vec<Value> {
    values.extend(attributes.iter().map(|(_, value)| text(value)));
    values
}

fn unit_values(unit: &NewUnit) -> Vec<Value> {
    with_attributes(
        vec![
            text(unit.parent_code.as_deref()),
            Value::Text(unit.description.clone()),
            text(unit.cost_center.as_deref()),
        ],
        &unit.attributes,
    )
}

fn employee_values(employee: &NewEmployee) -> Vec<Value> {
    with_attributes(
        vec![
            text(employee.file_code.as_deref()),
            text(employee.unit_code.as_deref()),
            text(employee.cost_center.as_deref()),
            Value::Integer(i64::from(employee.cost_center_numeric)),
        ],
        &employee.attributes,
    )
}

fn insert_sql(table: &str, key: &str, leading: &[&str]) -> String {
    let columns: Vec<&str> = std::iter::once(key)
        .chain(leading.iter().copied())
        .chain(Attributes::COLUMNS.iter().copied())
        .chain(["created_at", "updated_at"])
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn overwrite_sql(table: &str, key: &str, leading: &[&str], reactivate: bool) -> String {
    let assignments: Vec<String> = leading
        .iter()
        .chain(Attributes::COLUMNS.iter())
        .chain(["updated_at"].iter())
        .enumerate()
        .map(|(i, column)| format!("{} = ?{}", column, i + 1))
        .collect();
    let key_param = assignments.len() + 1;
    format!(
        "UPDATE {} SET {}{} WHERE {} = ?{}",
        table,
        assignments.join(", "),
        if reactivate { ", deleted_at = NULL" } else { "" },
        key,
        key_param
    )
}

/// Inserts a unit; a taken code surfaces as `DuplicateKey`
pub(crate) fn insert_unit(conn: &Connection, unit: &NewUnit, timestamp: &str) -> Result<i64> {
    let mut values = vec![Value::Text(unit.code.clone())];
    values.extend(unit_values(unit));
    values.push(Value::Text(timestamp.to_string()));
    values.push(Value::Text(timestamp.to_string()));

    conn.execute(&insert_sql("units", "code", &UNIT_COLUMNS), params_from_iter(values))
        .map_err(|e| OrgError::from_insert(e, "unit", &unit.code))?;
    Ok(conn.last_insert_rowid())
}

/// Rewrites every column of the unit keyed by `unit.code`
pub(crate) fn overwrite_unit(
    conn: &Connection,
    unit: &NewUnit,
    timestamp: &str,
    reactivate: bool,
) -> Result<()> {
    let mut values = unit_values(unit);
    values.push(Value::Text(timestamp.to_string()));
    values.push(Value::Text(unit.code.clone()));

    let changed = conn.execute(
        &overwrite_sql("units", "code", &UNIT_COLUMNS, reactivate),
        params_from_iter(values),
    )?;
    if changed == 0 {
        return Err(OrgError::unit_not_found(&unit.code));
    }
    Ok(())
}

/// Inserts an employee; a taken fiscal code surfaces as `DuplicateKey`
pub(crate) fn insert_employee(
    conn: &Connection,
    employee: &NewEmployee,
    timestamp: &str,
) -> Result<i64> {
    let mut values = vec![Value::Text(employee.fiscal_code.clone())];
    values.extend(employee_values(employee));
    values.push(Value::Text(timestamp.to_string()));
    values.push(Value::Text(timestamp.to_string()));

    conn.execute(
        &insert_sql("employees", "fiscal_code", &EMPLOYEE_COLUMNS),
        params_from_iter(values),
    )
    .map_err(|e| OrgError::from_insert(e, "employee", &employee.fiscal_code))?;
    Ok(conn.last_insert_rowid())
}

/// Rewrites every column of the employee keyed by `employee.fiscal_code`
pub(crate) fn overwrite_employee(
    conn: &Connection,
    employee: &NewEmployee,
    timestamp: &str,
    reactivate: bool,
) -> Result<()> {
    let mut values = employee_values(employee);
    values.push(Value::Text(timestamp.to_string()));
    values.push(Value::Text(employee.fiscal_code.clone()));

    let changed = conn.execute(
        &overwrite_sql("employees", "fiscal_code", &EMPLOYEE_COLUMNS, reactivate),
        params_from_iter(values),
    )?;
    if changed == 0 {
        return Err(OrgError::employee_not_found(&employee.fiscal_code));
    }
    Ok(())
}
