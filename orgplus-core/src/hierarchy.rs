//! Hierarchy engine for organizational units
//!
//! Units form a forest through weak `parent_code` references. Nothing at the
//! storage layer prevents cycles, so every traversal here works on an arena
//! keyed by code and guards itself with a visited set instead of assuming a
//! DAG.

use regex::Regex;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::audit::{self, Change};
use crate::db::{
    count, employee_from_row, fetch_unit, now, unit_from_row, Store, EMPLOYEE_SELECT, UNIT_SELECT,
};
use crate::error::{OrgError, Result};
use crate::models::{Action, Employee, EntityType, OrgUnit};

static SINGLE_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]$").expect("valid regex"));
static LETTERS_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]+)(\d+)$").expect("valid regex"));

/// Parent/child adjacency of the non-deleted units
#[derive(Debug, Default)]
pub(crate) struct UnitArena {
    children: HashMap<String, Vec<String>>,
}

impl UnitArena {
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT code, parent_code FROM units
             WHERE deleted_at IS NULL AND parent_code IS NOT NULL
             ORDER BY id",
        )?;
        let pairs = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut arena = Self::default();
        for pair in pairs {
            let (code, parent) = pair?;
            arena.children.entry(parent).or_default().push(code);
        }
        Ok(arena)
    }

    /// `code` plus every unit reachable below it. Terminates on cyclic data.
    pub fn descendants(&self, code: &str) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(code.to_string());
        queue.push_back(code);

        while let Some(current) = queue.pop_front() {
            for child in self.children.get(current).into_iter().flatten() {
                if seen.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
        }
        seen
    }
}

/// Proposes the next child code for `parent_code` given its current children.
///
/// Best-effort heuristic, in order of precedence:
/// 1. no children: `parent_code + "01"`
/// 2. every child is a single letter: the letter after the highest one in
///    use, else the first unused letter, else `parent_code_N`
/// 3. some children look like `LETTERS + DIGITS`: the prefix of the last such
///    child with the highest number + 1, zero-padded to that child's width
/// 4. otherwise `parent_code + "_" + (children + 1)`
pub fn suggest_code(parent_code: &str, siblings: &[String]) -> String {
    let fallback = || format!("{}_{}", parent_code, siblings.len() + 1);

    if siblings.is_empty() {
        return format!("{}01", parent_code);
    }

    if siblings.iter().all(|c| SINGLE_LETTER.is_match(c)) {
        let used: HashSet<u8> = siblings.iter().map(|c| c.as_bytes()[0]).collect();
        let after_highest = used.iter().max().and_then(|&max| (max < b'Z').then_some(max + 1));
        return after_highest
            .or_else(|| (b'A'..=b'Z').find(|letter| !used.contains(letter)))
            .map(|letter| char::from(letter).to_string())
            .unwrap_or_else(fallback);
    }

    let matches: Vec<(&str, &str)> = siblings
        .iter()
        .filter_map(|c| LETTERS_DIGITS.captures(c))
        .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect();

    if let Some(&(prefix, digits)) = matches.last() {
        let next = matches
            .iter()
            .filter_map(|(_, n)| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            .checked_add(1);
        return match next {
            Some(next) => format!("{}{:0width$}", prefix, next, width = digits.len()),
            None => fallback(),
        };
    }

    fallback()
}

/// A unit with its active sub-units and employees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub unit: OrgUnit,
    /// Parent code set but not resolving to an active unit, or part of a cycle
    pub orphan: bool,
    pub employees: Vec<Employee>,
    pub children: Vec<TreeNode>,
}

/// Records whose weak references do not resolve to an active unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanReport {
    pub units: Vec<OrgUnit>,
    pub employees: Vec<Employee>,
}

impl OrphanReport {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.employees.is_empty()
    }
}

fn active_units(conn: &Connection) -> Result<Vec<OrgUnit>> {
    let sql = format!("{} WHERE u.deleted_at IS NULL ORDER BY u.code ASC", UNIT_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let units = stmt
        .query_map([], unit_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(units)
}

fn active_employees(conn: &Connection) -> Result<Vec<Employee>> {
    let sql = format!(
        "{} WHERE deleted_at IS NULL ORDER BY owner ASC, fiscal_code ASC",
        EMPLOYEE_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let employees = stmt
        .query_map([], employee_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(employees)
}

fn build_node(
    unit: OrgUnit,
    orphan: bool,
    by_parent: &mut HashMap<String, Vec<OrgUnit>>,
    by_unit: &mut HashMap<String, Vec<Employee>>,
    placed: &mut HashSet<String>,
) -> TreeNode {
    placed.insert(unit.code.clone());
    let employees = by_unit.remove(&unit.code).unwrap_or_default();
    let mut children = Vec::new();
    for child in by_parent.remove(&unit.code).unwrap_or_default() {
        if !placed.contains(&child.code) {
            children.push(build_node(child, false, by_parent, by_unit, placed));
        }
    }

    TreeNode {
        unit,
        orphan,
        employees,
        children,
    }
}

impl Store {
    /// Moves a unit under a new parent (`None` makes it a root)
    pub fn set_parent(&self, code: &str, new_parent: Option<&str>) -> Result<()> {
        self.write(|tx| {
            let current = fetch_unit(tx, code)?.ok_or_else(|| OrgError::unit_not_found(code))?;

            if current.parent_code.as_deref() == new_parent {
                return Ok(());
            }

            if let Some(parent) = new_parent {
                let arena = UnitArena::load(tx)?;
                if arena.descendants(code).contains(parent) {
                    warn!(code, parent, "reparent rejected: cycle");
                    return Err(OrgError::CycleDetected {
                        code: code.to_string(),
                        parent: parent.to_string(),
                    });
                }

                let parent_active: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM units WHERE code = ?1 AND deleted_at IS NULL",
                        [parent],
                        |row| row.get(0),
                    )
                    .optional()?;
                if parent_active.is_none() {
                    return Err(OrgError::ParentNotFound(parent.to_string()));
                }
            }

            let ts = now();
            tx.execute(
                "UPDATE units SET parent_code = ?1, updated_at = ?2 WHERE code = ?3",
                rusqlite::params![new_parent, ts, code],
            )?;
            audit::append(
                tx,
                &Change::field(
                    EntityType::Unit,
                    code,
                    current.label(),
                    "parent_code",
                    current.parent_code.as_deref(),
                    new_parent,
                ),
                &ts,
            )?;
            debug!(code, parent = new_parent, "unit moved");
            Ok(())
        })
    }

    /// Soft-deletes a unit that has no active children and no active employees
    pub fn delete_unit(&self, code: &str) -> Result<()> {
        self.write(|tx| {
            let unit = fetch_unit(tx, code)?.ok_or_else(|| OrgError::unit_not_found(code))?;
            if unit.is_deleted() {
                return Ok(());
            }

            let children = count(
                tx,
                "SELECT COUNT(*) FROM units WHERE parent_code = ?1 AND deleted_at IS NULL",
                code,
            )?;
            if children > 0 {
                warn!(code, children, "delete rejected: active children");
                return Err(OrgError::HasActiveChildren {
                    code: code.to_string(),
                    count: children,
                });
            }

            let employees = count(
                tx,
                "SELECT COUNT(*) FROM employees WHERE unit_code = ?1 AND deleted_at IS NULL",
                code,
            )?;
            if employees > 0 {
                warn!(code, employees, "delete rejected: active employees");
                return Err(OrgError::HasActiveEmployees {
                    code: code.to_string(),
                    count: employees,
                });
            }

            let ts = now();
            tx.execute(
                "UPDATE units SET deleted_at = ?1 WHERE code = ?2",
                rusqlite::params![ts, code],
            )?;
            audit::append(
                tx,
                &Change::event(EntityType::Unit, code, unit.label(), Action::Delete),
                &ts,
            )?;
            Ok(())
        })
    }

    /// Clears the deletion mark. The former parent is not re-validated, so a
    /// restored unit may come back as an orphan.
    pub fn restore_unit(&self, code: &str) -> Result<()> {
        self.write(|tx| {
            let unit = fetch_unit(tx, code)?.ok_or_else(|| OrgError::unit_not_found(code))?;
            if !unit.is_deleted() {
                return Ok(());
            }

            let ts = now();
            tx.execute(
                "UPDATE units SET deleted_at = NULL, updated_at = ?1 WHERE code = ?2",
                rusqlite::params![ts, code],
            )?;
            audit::append(
                tx,
                &Change::event(EntityType::Unit, code, unit.label(), Action::Restore),
                &ts,
            )?;
            Ok(())
        })
    }

    /// Codes of `code` and all its active descendants
    pub fn descendants(&self, code: &str) -> Result<HashSet<String>> {
        self.read(|conn| Ok(UnitArena::load(conn)?.descendants(code)))
    }

    /// Proposes a code for a new child of `parent_code`
    pub fn suggest_code(&self, parent_code: &str) -> Result<String> {
        let siblings = self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT code FROM units WHERE parent_code = ?1 AND deleted_at IS NULL ORDER BY id",
            )?;
            let codes = stmt
                .query_map([parent_code], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(codes)
        })?;
        Ok(suggest_code(parent_code, &siblings))
    }

    /// True when no unit, deleted or not, holds `code`
    pub fn is_code_available(&self, code: &str) -> Result<bool> {
        self.read(|conn| Ok(count(conn, "SELECT COUNT(*) FROM units WHERE code = ?1", code)? == 0))
    }

    /// The active forest, children sorted by code
    pub fn unit_tree(&self) -> Result<Vec<TreeNode>> {
        let (units, employees) = self.read(|conn| Ok((active_units(conn)?, active_employees(conn)?)))?;

        let active: HashSet<String> = units.iter().map(|u| u.code.clone()).collect();
        let mut by_unit: HashMap<String, Vec<Employee>> = HashMap::new();
        for employee in employees {
            if let Some(unit_code) = employee.unit_code.clone() {
                by_unit.entry(unit_code).or_default().push(employee);
            }
        }

        let mut roots: Vec<(OrgUnit, bool)> = Vec::new();
        let mut by_parent: HashMap<String, Vec<OrgUnit>> = HashMap::new();
        for unit in units.iter().cloned() {
            match unit.parent_code.clone() {
                Some(parent) if active.contains(&parent) => {
                    by_parent.entry(parent).or_default().push(unit)
                }
                Some(_) => roots.push((unit, true)),
                None => roots.push((unit, false)),
            }
        }

        let mut placed: HashSet<String> = HashSet::new();
        let mut forest: Vec<TreeNode> = roots
            .into_iter()
            .map(|(unit, orphan)| build_node(unit, orphan, &mut by_parent, &mut by_unit, &mut placed))
            .collect();

        // Units on a parent cycle are unreachable from any root
        for unit in units {
            if !placed.contains(&unit.code) {
                forest.push(build_node(unit, true, &mut by_parent, &mut by_unit, &mut placed));
            }
        }

        Ok(forest)
    }

    /// Active units and employees whose reference does not resolve
    pub fn orphans(&self) -> Result<OrphanReport> {
        let (units, employees) = self.read(|conn| Ok((active_units(conn)?, active_employees(conn)?)))?;
        let active: HashSet<&str> = units.iter().map(|u| u.code.as_str()).collect();

        let orphan_units = units
            .iter()
            .filter(|u| {
                u.parent_code
                    .as_deref()
                    .is_some_and(|parent| !active.contains(parent))
            })
            .cloned()
            .collect();
        let orphan_employees = employees
            .into_iter()
            .filter(|e| {
                e.unit_code
                    .as_deref()
                    .map_or(true, |unit| !active.contains(unit))
            })
            .collect();

        Ok(OrphanReport {
            units: orphan_units,
            employees: orphan_employees,
        })
    }
}
