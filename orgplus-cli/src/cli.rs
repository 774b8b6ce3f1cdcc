use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Organizational chart manager: units, employees, workbook import/export and change history")]
pub struct Cli {
    /// Database file (overrides $ORGPLUS_DB and the config file)
    #[clap(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (overrides $ORGPLUS_CONFIG)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[clap(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Organizational unit commands
    #[clap(subcommand)]
    Unit(UnitCommand),

    /// Employee commands
    #[clap(subcommand)]
    Employee(EmployeeCommand),

    /// Reconcile the store against a workbook
    Import {
        /// Workbook to read (.xls or .xlsx)
        file: PathBuf,
    },

    /// Write all active units and employees to a workbook
    Export {
        /// Output workbook (.xlsx)
        file: PathBuf,
    },

    /// Show the change log, newest first
    History {
        /// Substring matched against label, entity id and new value
        #[clap(long)]
        search: Option<String>,

        /// Entity type (unit, employee, system)
        #[clap(long = "type")]
        entity_type: Option<String>,

        /// Action (create, update, delete, restore, import, export)
        #[clap(long)]
        action: Option<String>,

        /// Earliest timestamp (RFC 3339 or YYYY-MM-DD)
        #[clap(long)]
        from: Option<String>,

        /// Latest timestamp (RFC 3339 or YYYY-MM-DD)
        #[clap(long)]
        to: Option<String>,

        /// Page size (defaults to the configured history page size)
        #[clap(long)]
        limit: Option<u32>,

        #[clap(long, default_value_t = 0)]
        offset: u32,

        /// Group field-level entries into operations
        #[clap(long)]
        grouped: bool,
    },

    /// Write the whole change log to a CSV file
    HistoryCsv {
        file: PathBuf,
    },

    /// Count active units and employees
    Stats,

    /// List the distinct sites in use
    Sites,

    /// Print the unit tree
    Tree {
        /// Also list the employees of each unit
        #[clap(long)]
        employees: bool,
    },

    /// List units and employees whose parent or unit does not resolve
    Orphans,

    /// Config file commands
    #[clap(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum UnitCommand {
    /// List units ordered by code
    List {
        /// Include deleted units
        #[clap(long)]
        all: bool,
    },

    /// Show one unit
    Show { code: String },

    /// List the direct employees of a unit
    Employees { code: String },

    /// Create a unit from a JSON object, e.g. '{"code":"A01","parent_code":"A"}'
    Create { json: String },

    /// Update a unit with a JSON object of the fields to change; null clears a field
    Update { code: String, json: String },

    /// Soft-delete a unit without active children or employees
    Delete {
        code: String,

        /// Skip confirmation
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Restore a deleted unit
    Restore { code: String },

    /// Propose a code for a new child of a unit
    SuggestCode { parent: String },

    /// Check whether a code is still free
    CheckCode { code: String },

    /// Move a unit under a new parent
    Move {
        code: String,

        /// New parent code
        #[clap(long, conflicts_with = "root")]
        parent: Option<String>,

        /// Make the unit a root
        #[clap(long)]
        root: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum EmployeeCommand {
    /// List employees ordered by owner
    List {
        /// Include deleted employees
        #[clap(long)]
        all: bool,
    },

    /// Show one employee
    Show { fiscal_code: String },

    /// Create an employee from a JSON object, e.g. '{"fiscal_code":"...","owner":"..."}'
    Create { json: String },

    /// Update an employee with a JSON object of the fields to change; null clears a field
    Update { fiscal_code: String, json: String },

    /// Soft-delete an employee
    Delete {
        fiscal_code: String,

        /// Skip confirmation
        #[clap(long, short = 'y')]
        yes: bool,
    },

    /// Restore a deleted employee
    Restore { fiscal_code: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,

    /// Write a config file with the default settings
    Init {
        /// Overwrite an existing file
        #[clap(long)]
        force: bool,
    },
}
