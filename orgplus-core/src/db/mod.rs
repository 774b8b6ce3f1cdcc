//! Persistent store for the organizational chart
//!
//! A single SQLite database holds units, employees and the change log.
//! The store is constructed explicitly by the host and handed to every
//! operation; there is no global connection.

mod rows;
mod store;

pub use store::{Store, DEFAULT_BUSY_TIMEOUT};

pub(crate) use rows::{insert_employee, insert_unit, overwrite_employee, overwrite_unit};
pub(crate) use store::{
    count, employee_from_row, fetch_employee, fetch_unit, format_timestamp, get_timestamp, now,
    unit_from_row, EMPLOYEE_SELECT, UNIT_SELECT,
};
