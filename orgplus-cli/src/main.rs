mod cli;
mod prompts;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use orgplus_core::{
    config_path, Action, ChangeLogEntry, Config, Employee, EmployeePatch, EntityType,
    HistoryFilter, HistoryGroup, InstanceLock, NewEmployee, NewUnit, OrgError, OrgUnit, Store,
    TreeNode, UnitPatch,
};

use crate::cli::{Cli, Command, ConfigCommand, EmployeeCommand, UnitCommand};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(&cli) {
        match err.downcast_ref::<OrgError>() {
            Some(core) if cli.json => {
                let payload = serde_json::json!({
                    "error": core.kind(),
                    "message": core.to_string(),
                });
                println!("{}", payload);
            }
            Some(core) => {
                let kind = serde_json::to_value(core.kind())
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                eprintln!("{} [{}] {}", "error:".red().bold(), kind, core);
            }
            None => eprintln!("{} {:#}", "error:".red().bold(), err),
        }
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("orgplus=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("orgplus=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config_file = match &cli.config {
        Some(path) => path.clone(),
        None => config_path().context("Failed to determine the config directory")?,
    };
    let config = Config::load(&config_file)?;

    if let Command::Config(config_cmd) = &cli.command {
        return handle_config_command(config_cmd, &config, &config_file, cli.json);
    }

    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => config
            .database_path()
            .context("Failed to determine the data directory; pass --db")?,
    };
    debug!(db = %db_path.display(), "opening store");
    let _lock = InstanceLock::acquire(&db_path)?;
    let store = Store::open_with_timeout(&db_path, config.busy_timeout())?;

    match &cli.command {
        Command::Unit(unit_cmd) => handle_unit_command(unit_cmd, &store, cli.json)?,
        Command::Employee(employee_cmd) => handle_employee_command(employee_cmd, &store, cli.json)?,
        Command::Import { file } => {
            let report = store.import_workbook(file, &config.sheet_names());
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "{} {} inserted, {} updated, {} unchanged",
                    "Import:".bold(),
                    report.inserted.to_string().green(),
                    report.updated.to_string().blue(),
                    report.unchanged
                );
                for error in &report.errors {
                    println!("  {} {}", "!".red(), error);
                }
            }
        }
        Command::Export { file } => {
            let summary = store.export_workbook(file, &config.sheet_names())?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "{} {} units, {} employees to {}",
                    "Exported".green(),
                    summary.units,
                    summary.employees,
                    summary.path.display()
                );
            }
        }
        Command::History {
            search,
            entity_type,
            action,
            from,
            to,
            limit,
            offset,
            grouped,
        } => {
            let filter = HistoryFilter {
                search: search.clone(),
                entity_type: entity_type
                    .as_deref()
                    .map(str::parse::<EntityType>)
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
                action: action
                    .as_deref()
                    .map(str::parse::<Action>)
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
                from: from.as_deref().map(|s| parse_bound(s, false)).transpose()?,
                to: to.as_deref().map(|s| parse_bound(s, true)).transpose()?,
                limit: Some(limit.unwrap_or(config.history_page_size)),
                offset: Some(*offset),
            };
            if *grouped {
                let groups = store.grouped_changes(&filter)?;
                if cli.json {
                    print_json(&groups)?;
                } else {
                    print_groups(&groups);
                }
            } else {
                let entries = store.list_changes(&filter)?;
                if cli.json {
                    print_json(&entries)?;
                } else {
                    print_entries(&entries);
                }
            }
        }
        Command::HistoryCsv { file } => {
            let rows = store.export_changes_csv(file)?;
            if cli.json {
                print_json(&serde_json::json!({ "rows": rows, "path": file }))?;
            } else {
                println!("{} {} entries to {}", "Wrote".green(), rows, file.display());
            }
        }
        Command::Stats => {
            let counts = store.counts()?;
            if cli.json {
                print_json(&counts)?;
            } else {
                println!("Units:     {}", counts.units);
                println!("Employees: {}", counts.employees);
                println!("Total:     {}", counts.total);
            }
        }
        Command::Sites => {
            let sites = store.sites()?;
            if cli.json {
                print_json(&sites)?;
            } else if sites.is_empty() {
                println!("{}", "No sites found.".yellow());
            } else {
                for site in sites {
                    println!("{}", site);
                }
            }
        }
        Command::Tree { employees } => {
            let tree = store.unit_tree()?;
            if cli.json {
                print_json(&tree)?;
            } else if tree.is_empty() {
                println!("{}", "No units found.".yellow());
            } else {
                for node in &tree {
                    print_tree(node, 0, *employees);
                }
            }
        }
        Command::Orphans => {
            let report = store.orphans()?;
            if cli.json {
                print_json(&report)?;
            } else if report.is_empty() {
                println!("{}", "No orphans.".green());
            } else {
                for unit in &report.units {
                    println!(
                        "{} {} -> missing parent {}",
                        "unit".cyan(),
                        unit.code,
                        unit.parent_code.as_deref().unwrap_or_default().red()
                    );
                }
                for employee in &report.employees {
                    println!(
                        "{} {} ({}) -> {}",
                        "employee".cyan(),
                        employee.fiscal_code,
                        employee.label(),
                        employee
                            .unit_code
                            .as_deref()
                            .unwrap_or("no unit")
                            .red()
                    );
                }
            }
        }
        Command::Config(config_cmd) => {
            handle_config_command(config_cmd, &config, &config_file, cli.json)?
        }
    }

    store.close()?;
    Ok(())
}

fn handle_unit_command(cmd: &UnitCommand, store: &Store, json: bool) -> Result<()> {
    match cmd {
        UnitCommand::List { all } => {
            let units = store.list_units(*all)?;
            if json {
                return print_json(&units);
            }
            if units.is_empty() {
                println!("{}", "No units found.".yellow());
                return Ok(());
            }
            println!(
                "{:<12} | {:<12} | {:<40} | {:>9}",
                "Code", "Parent", "Description", "Employees"
            );
            println!("{}", "-".repeat(82));
            for unit in units {
                let line = format!(
                    "{:<12} | {:<12} | {:<40} | {:>9}",
                    unit.code,
                    unit.parent_code.as_deref().unwrap_or("-"),
                    truncate(&unit.description, 40),
                    unit.active_employees
                );
                if unit.is_deleted() {
                    println!("{}", line.dimmed());
                } else {
                    println!("{}", line);
                }
            }
        }
        UnitCommand::Show { code } => {
            let unit = store.get_unit(code)?.ok_or_else(|| not_found("unit", code))?;
            if json {
                return print_json(&unit);
            }
            print_unit(&unit);
        }
        UnitCommand::Employees { code } => {
            let employees = store.unit_employees(code)?;
            if json {
                return print_json(&employees);
            }
            print_employee_table(&employees);
        }
        UnitCommand::Create { json: payload } => {
            let new_unit: NewUnit =
                serde_json::from_str(payload).context("Failed to parse unit JSON")?;
            let unit = store.create_unit(&new_unit)?;
            if json {
                return print_json(&unit);
            }
            println!("{} {}", "Unit created:".green(), unit.code);
        }
        UnitCommand::Update { code, json: payload } => {
            let patch: UnitPatch =
                serde_json::from_str(payload).context("Failed to parse unit patch JSON")?;
            let unit = store.update_unit(code, &patch)?;
            if json {
                return print_json(&unit);
            }
            println!("{} {}", "Unit updated:".green(), unit.code);
        }
        UnitCommand::Delete { code, yes } => {
            let unit = store.get_unit(code)?.ok_or_else(|| not_found("unit", code))?;
            if !json {
                println!("{}", "Unit to delete:".yellow());
                println!("  Code: {}", unit.code);
                println!("  Description: {}", unit.description);
            }
            if !prompts::confirm("Are you sure you want to delete this unit?", *yes || json)? {
                println!("{}", "Deletion cancelled.".yellow());
                return Ok(());
            }
            store.delete_unit(code)?;
            if json {
                return print_json(&serde_json::json!({ "deleted": code }));
            }
            println!("{}", "Unit deleted.".green());
        }
        UnitCommand::Restore { code } => {
            store.restore_unit(code)?;
            if json {
                return print_json(&serde_json::json!({ "restored": code }));
            }
            println!("{} {}", "Unit restored:".green(), code);
        }
        UnitCommand::SuggestCode { parent } => {
            let code = store.suggest_code(parent)?;
            if json {
                return print_json(&serde_json::json!({ "code": code }));
            }
            println!("{}", code);
        }
        UnitCommand::CheckCode { code } => {
            let available = store.is_code_available(code)?;
            if json {
                return print_json(&serde_json::json!({ "code": code, "available": available }));
            }
            if available {
                println!("{} is {}", code, "available".green());
            } else {
                println!("{} is {}", code, "taken".red());
            }
        }
        UnitCommand::Move { code, parent, root } => {
            if parent.is_none() && !root {
                bail!("Pass --parent <CODE> or --root");
            }
            store.set_parent(code, parent.as_deref())?;
            if json {
                return print_json(&serde_json::json!({ "code": code, "parent_code": parent }));
            }
            match parent {
                Some(parent) => println!("{} {} under {}", "Moved".green(), code, parent),
                None => println!("{} {} to the top level", "Moved".green(), code),
            }
        }
    }
    Ok(())
}

fn handle_employee_command(cmd: &EmployeeCommand, store: &Store, json: bool) -> Result<()> {
    match cmd {
        EmployeeCommand::List { all } => {
            let employees = store.list_employees(*all)?;
            if json {
                return print_json(&employees);
            }
            print_employee_table(&employees);
        }
        EmployeeCommand::Show { fiscal_code } => {
            let employee = store
                .get_employee(fiscal_code)?
                .ok_or_else(|| not_found("employee", fiscal_code))?;
            if json {
                return print_json(&employee);
            }
            print_employee(&employee);
        }
        EmployeeCommand::Create { json: payload } => {
            let new_employee: NewEmployee =
                serde_json::from_str(payload).context("Failed to parse employee JSON")?;
            let employee = store.create_employee(&new_employee)?;
            if json {
                return print_json(&employee);
            }
            println!("{} {}", "Employee created:".green(), employee.fiscal_code);
        }
        EmployeeCommand::Update {
            fiscal_code,
            json: payload,
        } => {
            let patch: EmployeePatch =
                serde_json::from_str(payload).context("Failed to parse employee patch JSON")?;
            let employee = store.update_employee(fiscal_code, &patch)?;
            if json {
                return print_json(&employee);
            }
            println!("{} {}", "Employee updated:".green(), employee.fiscal_code);
        }
        EmployeeCommand::Delete { fiscal_code, yes } => {
            let employee = store
                .get_employee(fiscal_code)?
                .ok_or_else(|| not_found("employee", fiscal_code))?;
            if !json {
                println!("{}", "Employee to delete:".yellow());
                println!("  Fiscal code: {}", employee.fiscal_code);
                println!("  Name: {}", employee.label());
            }
            if !prompts::confirm("Are you sure you want to delete this employee?", *yes || json)? {
                println!("{}", "Deletion cancelled.".yellow());
                return Ok(());
            }
            store.delete_employee(fiscal_code)?;
            if json {
                return print_json(&serde_json::json!({ "deleted": fiscal_code }));
            }
            println!("{}", "Employee deleted.".green());
        }
        EmployeeCommand::Restore { fiscal_code } => {
            store.restore_employee(fiscal_code)?;
            if json {
                return print_json(&serde_json::json!({ "restored": fiscal_code }));
            }
            println!("{} {}", "Employee restored:".green(), fiscal_code);
        }
    }
    Ok(())
}

fn handle_config_command(
    cmd: &ConfigCommand,
    config: &Config,
    config_file: &Path,
    json: bool,
) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            if json {
                return print_json(config);
            }
            println!("# {}", config_file.display());
            print!("{}", config.to_yaml()?);
            if let Some(db) = config.database_path() {
                println!("# effective database: {}", db.display());
            }
        }
        ConfigCommand::Init { force } => {
            if config_file.exists() && !force {
                bail!(
                    "Config file {:?} already exists; use --force to overwrite",
                    config_file
                );
            }
            Config::default().save(config_file)?;
            println!("{} {}", "Wrote".green(), config_file.display());
        }
    }
    Ok(())
}

fn not_found(entity: &'static str, key: &str) -> OrgError {
    OrgError::NotFound {
        entity,
        key: key.to_string(),
    }
}

/// Parses a history bound; a bare date covers the whole day
fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date {:?}; expected YYYY-MM-DD or RFC 3339", value))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .context("Invalid time of day")?;
    Ok(date.and_time(time).and_utc())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

fn print_attributes(attributes: &orgplus_core::Attributes) {
    for (header, (_, value)) in orgplus_core::Attributes::HEADERS.iter().zip(attributes.iter()) {
        if let Some(value) = value {
            println!("  {:<24} {}", format!("{}:", header), value);
        }
    }
}

fn print_unit(unit: &OrgUnit) {
    println!("{} {}", "Unit".bold(), unit.code.bold());
    if unit.is_deleted() {
        println!("  {}", "(deleted)".red());
    }
    println!("  {:<24} {}", "Parent:", unit.parent_code.as_deref().unwrap_or("-"));
    println!("  {:<24} {}", "Description:", unit.description);
    println!("  {:<24} {}", "Cost center:", unit.cost_center.as_deref().unwrap_or("-"));
    println!("  {:<24} {}", "Active employees:", unit.active_employees);
    print_attributes(&unit.attributes);
    println!("  {:<24} {}", "Created:", unit.created_at.format("%Y-%m-%d %H:%M"));
    println!("  {:<24} {}", "Updated:", unit.updated_at.format("%Y-%m-%d %H:%M"));
}

fn print_employee(employee: &Employee) {
    println!("{} {}", "Employee".bold(), employee.fiscal_code.bold());
    if employee.is_deleted() {
        println!("  {}", "(deleted)".red());
    }
    println!("  {:<24} {}", "Unit:", employee.unit_code.as_deref().unwrap_or("-"));
    println!("  {:<24} {}", "File code:", employee.file_code.as_deref().unwrap_or("-"));
    let numeric = if employee.cost_center_numeric { " (numeric)" } else { "" };
    println!(
        "  {:<24} {}{}",
        "Cost center:",
        employee.cost_center.as_deref().unwrap_or("-"),
        numeric
    );
    print_attributes(&employee.attributes);
    println!("  {:<24} {}", "Created:", employee.created_at.format("%Y-%m-%d %H:%M"));
    println!("  {:<24} {}", "Updated:", employee.updated_at.format("%Y-%m-%d %H:%M"));
}

fn print_employee_table(employees: &[Employee]) {
    if employees.is_empty() {
        println!("{}", "No employees found.".yellow());
        return;
    }
    println!("{:<16} | {:<30} | {:<12} | {:<12}", "Fiscal code", "Name", "Unit", "Level");
    println!("{}", "-".repeat(78));
    for employee in employees {
        let line = format!(
            "{:<16} | {:<30} | {:<12} | {:<12}",
            employee.fiscal_code,
            truncate(employee.label(), 30),
            employee.unit_code.as_deref().unwrap_or("-"),
            employee.attributes.level.as_deref().unwrap_or("")
        );
        if employee.is_deleted() {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }
}

fn print_tree(node: &TreeNode, depth: usize, with_employees: bool) {
    let indent = "  ".repeat(depth);
    let mut line = format!("{}{} {}", indent, node.unit.code.bold(), node.unit.description);
    if node.unit.active_employees > 0 {
        line.push_str(&format!(" ({})", node.unit.active_employees));
    }
    if node.orphan {
        line.push_str(&format!(" {}", "[orphan]".red()));
    }
    println!("{}", line);

    if with_employees {
        for employee in &node.employees {
            println!("{}  - {} {}", indent, employee.label().cyan(), employee.fiscal_code.dimmed());
        }
    }
    for child in &node.children {
        print_tree(child, depth + 1, with_employees);
    }
}

fn action_label(action: Action) -> colored::ColoredString {
    match action {
        Action::Create => action.as_str().green(),
        Action::Update => action.as_str().blue(),
        Action::Delete => action.as_str().red(),
        Action::Restore => action.as_str().yellow(),
        Action::Import | Action::Export => action.as_str().magenta(),
    }
}

fn print_entries(entries: &[ChangeLogEntry]) {
    if entries.is_empty() {
        println!("{}", "No changes found.".yellow());
        return;
    }
    for entry in entries {
        let mut line = format!(
            "{} {:<8} {:<8} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            action_label(entry.action),
            entry.entity_type,
            entry.entity_id
        );
        if let Some(label) = &entry.entity_label {
            line.push_str(&format!(" ({})", label));
        }
        if let Some(field) = &entry.field_name {
            line.push_str(&format!(
                " {}: {} -> {}",
                field,
                entry.old_value.as_deref().unwrap_or("∅"),
                entry.new_value.as_deref().unwrap_or("∅")
            ));
        } else if let Some(value) = &entry.new_value {
            line.push_str(&format!(" {}", value));
        }
        println!("{}", line);
    }
}

fn print_groups(groups: &[HistoryGroup]) {
    if groups.is_empty() {
        println!("{}", "No changes found.".yellow());
        return;
    }
    for group in groups {
        let label = group.entity_label.as_deref().unwrap_or("");
        let count = if group.count > 1 {
            format!(" [{} changes]", group.count)
        } else {
            String::new()
        };
        println!(
            "{} {:<8} {:<8} {} {}{}",
            group.timestamp.format("%Y-%m-%d %H:%M"),
            action_label(group.action),
            group.entity_type,
            group.entity_id,
            label,
            count
        );
        if group.expandable {
            for entry in &group.entries {
                println!(
                    "    {}: {} -> {}",
                    entry.field_name.as_deref().unwrap_or("?"),
                    entry.old_value.as_deref().unwrap_or("∅"),
                    entry.new_value.as_deref().unwrap_or("∅")
                );
            }
        } else if let Some(summary) = group.entries.first().and_then(|e| e.new_value.as_deref()) {
            if group.action != Action::Update {
                println!("    {}", summary);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::path::PathBuf;

    #[test]
    fn test_parse_bound_accepts_dates_and_timestamps() {
        let start = parse_bound("2026-03-02", false).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-03-02T00:00:00+00:00");
        let end = parse_bound("2026-03-02", true).unwrap();
        assert_eq!(end.hour(), 23);
        assert_eq!(end.nanosecond(), 999_000_000);

        let exact = parse_bound("2026-03-02T10:15:00+01:00", false).unwrap();
        assert_eq!(exact.hour(), 9);
        assert!(parse_bound("yesterday", false).is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Direzione generale", 10), "Direzione…");
    }

    #[test]
    fn test_cli_parses_move_to_root() {
        let cli = Cli::try_parse_from(["orgplus", "--db", "x.db", "unit", "move", "A01", "--root"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        match cli.command {
            Command::Unit(UnitCommand::Move { code, parent, root }) => {
                assert_eq!(code, "A01");
                assert_eq!(parent, None);
                assert!(root);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Cli::try_parse_from(["orgplus", "unit", "move", "A", "--root", "--parent", "B"]).is_err());
    }
}
