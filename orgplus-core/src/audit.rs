//! Change log: append-only audit records and history queries
//!
//! Every mutation path appends through [`append`] inside its own
//! transaction. The read side filters at the query layer and then groups
//! field-level rows into user-meaningful operations.
//!
//! Grouping keys on (minute, entity id, action). It is a display heuristic:
//! two unrelated edits of the same entity with the same action inside one
//! wall-clock minute are shown as one operation.

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::db::{format_timestamp, get_timestamp, Store};
use crate::error::{OrgError, Result};
use crate::models::{Action, ChangeLogEntry, EntityType};

/// Default number of rows returned by a history query
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Header row of the CSV export
pub const CSV_HEADER: [&str; 9] = [
    "id",
    "timestamp",
    "entity_type",
    "entity_id",
    "entity_label",
    "action",
    "field_name",
    "old_value",
    "new_value",
];

/// A change about to be appended
#[derive(Debug, Clone)]
pub(crate) struct Change<'a> {
    pub entity_type: EntityType,
    pub entity_id: &'a str,
    pub entity_label: Option<&'a str>,
    pub action: Action,
    pub field_name: Option<&'a str>,
    pub old_value: Option<&'a str>,
    pub new_value: Option<&'a str>,
}

impl<'a> Change<'a> {
    /// A whole-entity event (create, delete, restore)
    pub fn event(entity_type: EntityType, entity_id: &'a str, label: &'a str, action: Action) -> Self {
        Self {
            entity_type,
            entity_id,
            entity_label: Some(label),
            action,
            field_name: None,
            old_value: None,
            new_value: None,
        }
    }

    /// One changed field of an update
    pub fn field(
        entity_type: EntityType,
        entity_id: &'a str,
        label: &'a str,
        field_name: &'a str,
        old_value: Option<&'a str>,
        new_value: Option<&'a str>,
    ) -> Self {
        Self {
            entity_type,
            entity_id,
            entity_label: Some(label),
            action: Action::Update,
            field_name: Some(field_name),
            old_value,
            new_value,
        }
    }

    /// A system-level event keyed by a fixed sentinel id, with a summary as new value
    pub fn system(action: Action, entity_id: &'a str, summary: &'a str) -> Self {
        Self {
            entity_type: EntityType::System,
            entity_id,
            entity_label: None,
            action,
            field_name: None,
            old_value: None,
            new_value: Some(summary),
        }
    }
}

/// Appends one entry stamped with `timestamp` (storage format)
pub(crate) fn append(conn: &Connection, change: &Change<'_>, timestamp: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO change_log
         (timestamp, entity_type, entity_id, entity_label, action, field_name, old_value, new_value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            timestamp,
            change.entity_type.as_str(),
            change.entity_id,
            change.entity_label,
            change.action.as_str(),
            change.field_name,
            change.old_value,
            change.new_value,
        ],
    )?;
    debug!(
        entity = change.entity_id,
        action = %change.action,
        field = change.field_name,
        "change recorded"
    );
    Ok(conn.last_insert_rowid())
}

/// Old and new stringified value of one field
pub(crate) type FieldDiff<'a> = (&'a str, Option<&'a str>, Option<&'a str>);

/// Appends one UPDATE entry per field whose value changed. Returns how many
/// entries were written.
pub(crate) fn append_field_changes(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    label: &str,
    fields: &[FieldDiff<'_>],
    timestamp: &str,
) -> Result<usize> {
    let mut written = 0;
    for &(field, old, new) in fields {
        if old != new {
            append(
                conn,
                &Change::field(entity_type, entity_id, label, field, old, new),
                timestamp,
            )?;
            written += 1;
        }
    }
    Ok(written)
}

/// Filters applied before grouping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Substring matched against label, entity id and new value
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    #[serde(default)]
    pub action: Option<Action>,
    /// Inclusive lower bound
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Several change-log rows shown as one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryGroup {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_label: Option<String>,
    pub action: Action,
    pub count: usize,
    /// Only multi-field updates have details worth expanding
    pub expandable: bool,
    pub entries: Vec<ChangeLogEntry>,
}

/// Groups entries by (minute, entity id, action), keeping first-seen order
pub fn group_history(entries: Vec<ChangeLogEntry>) -> Vec<HistoryGroup> {
    let mut groups: Vec<HistoryGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        let key = format!(
            "{}|{}|{}",
            entry.timestamp.format("%Y-%m-%dT%H:%M"),
            entry.entity_id,
            entry.action
        );
        match index.get(&key) {
            Some(&i) => groups[i].entries.push(entry),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(HistoryGroup {
                    key,
                    timestamp: entry.timestamp,
                    entity_type: entry.entity_type,
                    entity_id: entry.entity_id.clone(),
                    entity_label: entry.entity_label.clone(),
                    action: entry.action,
                    count: 0,
                    expandable: false,
                    entries: vec![entry],
                });
            }
        }
    }

    for group in &mut groups {
        group.count = group.entries.len();
        group.expandable = group.action == Action::Update && group.count > 1;
    }
    groups
}

fn parse_column<T: std::str::FromStr<Err = String>>(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e: String| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeLogEntry> {
    Ok(ChangeLogEntry {
        id: row.get("id")?,
        timestamp: get_timestamp(row, "timestamp")?,
        entity_type: parse_column(row, "entity_type")?,
        entity_id: row.get("entity_id")?,
        entity_label: row.get("entity_label")?,
        action: parse_column(row, "action")?,
        field_name: row.get("field_name")?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
    })
}

/// Escapes LIKE wildcards so the search is a plain substring match
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn query_entries(conn: &Connection, filter: &HistoryFilter) -> Result<Vec<ChangeLogEntry>> {
    let mut conditions: Vec<&str> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        conditions.push(
            "(entity_label LIKE ? ESCAPE '\\' OR entity_id LIKE ? ESCAPE '\\' OR new_value LIKE ? ESCAPE '\\')",
        );
        let pattern = like_pattern(search);
        for _ in 0..3 {
            params.push(Value::Text(pattern.clone()));
        }
    }
    if let Some(entity_type) = filter.entity_type {
        conditions.push("entity_type = ?");
        params.push(Value::Text(entity_type.as_str().to_string()));
    }
    if let Some(action) = filter.action {
        conditions.push("action = ?");
        params.push(Value::Text(action.as_str().to_string()));
    }
    if let Some(from) = &filter.from {
        conditions.push("timestamp >= ?");
        params.push(Value::Text(format_timestamp(from)));
    }
    if let Some(to) = &filter.to {
        conditions.push("timestamp <= ?");
        params.push(Value::Text(format_timestamp(to)));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    params.push(Value::Integer(i64::from(filter.limit.unwrap_or(DEFAULT_PAGE_SIZE))));
    params.push(Value::Integer(i64::from(filter.offset.unwrap_or(0))));

    let sql = format!(
        "SELECT * FROM change_log {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params_from_iter(params.iter()), entry_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

impl Store {
    /// Lists change-log entries, newest first
    pub fn list_changes(&self, filter: &HistoryFilter) -> Result<Vec<ChangeLogEntry>> {
        self.read(|conn| query_entries(conn, filter))
    }

    /// Lists change-log entries grouped into operations
    pub fn grouped_changes(&self, filter: &HistoryFilter) -> Result<Vec<HistoryGroup>> {
        Ok(group_history(self.list_changes(filter)?))
    }

    /// Writes the whole change log to a CSV file, newest first
    ///
    /// Every field is double-quoted with embedded quotes doubled. Returns the
    /// number of data rows written.
    pub fn export_changes_csv<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let entries = self.read(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM change_log ORDER BY timestamp DESC, id DESC")?;
            let entries = stmt
                .query_map([], entry_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })?;

        let path = path.as_ref();
        let mut file = File::create(path).map_err(|e| OrgError::io(path, e))?;
        // The header row is written bare; data fields are always quoted
        writeln!(file, "{}", CSV_HEADER.join(",")).map_err(|e| OrgError::io(path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        for entry in &entries {
            let id = entry.id.to_string();
            let timestamp = format_timestamp(&entry.timestamp);
            writer.write_record([
                id.as_str(),
                timestamp.as_str(),
                entry.entity_type.as_str(),
                entry.entity_id.as_str(),
                entry.entity_label.as_deref().unwrap_or(""),
                entry.action.as_str(),
                entry.field_name.as_deref().unwrap_or(""),
                entry.old_value.as_deref().unwrap_or(""),
                entry.new_value.as_deref().unwrap_or(""),
            ])?;
        }
        writer.flush().map_err(|e| OrgError::io(path, e))?;

        info!(rows = entries.len(), path = %path.display(), "change log exported");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now;
    use chrono::TimeZone;

    fn entry(id: i64, minute: u32, second: u32, entity_id: &str, action: Action) -> ChangeLogEntry {
        ChangeLogEntry {
            id,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 10, minute, second).unwrap(),
            entity_type: EntityType::Unit,
            entity_id: entity_id.to_string(),
            entity_label: Some("Label".to_string()),
            action,
            field_name: None,
            old_value: None,
            new_value: None,
        }
    }

    #[test]
    fn test_group_history_collapses_same_minute_same_entity() {
        let entries = vec![
            entry(4, 5, 50, "A01", Action::Update),
            entry(3, 5, 10, "A01", Action::Update),
            entry(2, 5, 10, "A02", Action::Update),
            entry(1, 4, 59, "A01", Action::Update),
        ];
        let groups = group_history(entries);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].entity_id, "A01");
        assert_eq!(groups[0].count, 2);
        assert!(groups[0].expandable);
        assert_eq!(groups[1].entity_id, "A02");
        assert!(!groups[1].expandable);
        assert_eq!(groups[2].count, 1);

        let json = serde_json::to_value(&groups[0]).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["expandable"], true);
    }

    #[test]
    fn test_group_history_separates_actions() {
        let groups = group_history(vec![
            entry(2, 7, 1, "B", Action::Delete),
            entry(1, 7, 0, "B", Action::Create),
        ]);
        assert_eq!(groups.len(), 2);
        assert!(!groups[0].expandable);
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_x"), "%50\\%\\_x%");
    }

    #[test]
    fn test_list_changes_filters_and_paginates() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                let ts = now();
                append(tx, &Change::event(EntityType::Unit, "A", "Direzione", Action::Create), &ts)?;
                append(tx, &Change::event(EntityType::Employee, "RSSMRA80A01H501Z", "Rossi", Action::Create), &ts)?;
                append(tx, &Change::field(EntityType::Unit, "A", "Direzione", "level", None, Some("100%")), &ts)?;
                append(tx, &Change::system(Action::Import, "import", "3 inserted"), &ts)?;
                Ok(())
            })
            .unwrap();

        let all = store.list_changes(&HistoryFilter::default()).unwrap();
        assert_eq!(all.len(), 4);
        // Newest first; ties broken by id
        assert_eq!(all[0].action, Action::Import);

        let units = store
            .list_changes(&HistoryFilter {
                entity_type: Some(EntityType::Unit),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(units.len(), 2);

        let searched = store
            .list_changes(&HistoryFilter {
                search: Some("100%".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].field_name.as_deref(), Some("level"));

        let page = store
            .list_changes(&HistoryFilter {
                limit: Some(2),
                offset: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 1);

        let future = store
            .list_changes(&HistoryFilter {
                from: Some(Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            })
            .unwrap();
        assert!(future.is_empty());
    }

    #[test]
    fn test_export_changes_csv_quotes_every_field() {
        let store = Store::open_in_memory().unwrap();
        store
            .write(|tx| {
                append(
                    tx,
                    &Change::field(EntityType::Unit, "A", "Sede \"Nord\"", "site", Some("Roma"), None),
                    &now(),
                )?;
                Ok(())
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");
        assert_eq!(store.export_changes_csv(&path).unwrap(), 1);

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,timestamp,entity_type,entity_id,entity_label,action,field_name,old_value,new_value"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"1\",\""));
        assert!(row.contains("\"Sede \"\"Nord\"\"\""));
        assert!(row.ends_with("\"UPDATE\",\"site\",\"Roma\",\"\""));
    }
}
