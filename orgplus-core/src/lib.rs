pub mod audit;
pub mod config;
pub mod db;
pub mod employees;
pub mod error;
pub mod hierarchy;
pub mod lock;
pub mod models;
pub mod stats;
pub mod units;
pub mod workbook;

// Re-export commonly used types
pub use audit::{group_history, HistoryFilter, HistoryGroup, CSV_HEADER, DEFAULT_PAGE_SIZE};
pub use config::{config_path, default_database_path, Config};
pub use db::Store;
pub use error::{ErrorKind, OrgError, Result};
pub use hierarchy::{suggest_code, OrphanReport, TreeNode};
pub use lock::InstanceLock;
pub use models::{
    Action, Attributes, AttributesPatch, ChangeLogEntry, Employee, EmployeePatch, EntityType,
    NewEmployee, NewUnit, OrgUnit, UnitPatch,
};
pub use stats::Counts;
pub use workbook::{ExportSummary, ImportReport, SheetNames, COLUMN_ORDER};
