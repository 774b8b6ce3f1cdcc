//! Data model for organizational units, employees and the change log
//!
//! Units and employees share a fixed set of role/classification fields that
//! the core never interprets. They are declared once in [`attribute_set!`] so
//! that the struct, the patch type, the database columns and the workbook
//! headers cannot drift apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deserializes a field that distinguishes "absent" from "explicitly null".
///
/// Used together with `#[serde(default)]`: a missing key stays `None`, a JSON
/// `null` becomes `Some(None)` and a value becomes `Some(Some(v))`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

macro_rules! attribute_set {
    ($( $field:ident => $column:literal, $header:literal; )+) => {
        /// Opaque role/classification fields carried by units and employees
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct Attributes {
            $(
                #[serde(default)]
                pub $field: Option<String>,
            )+
        }

        /// Partial update of [`Attributes`]; `None` means "leave as is"
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct AttributesPatch {
            $(
                #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
                pub $field: Option<Option<String>>,
            )+
        }

        impl Attributes {
            /// Database column names, in declaration order
            pub const COLUMNS: &'static [&'static str] = &[$($column),+];

            /// Workbook header for each column, in declaration order
            pub const HEADERS: &'static [&'static str] = &[$($header),+];

            /// Iterates over `(column, value)` pairs
            pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&str>)> {
                [$(($column, self.$field.as_deref())),+].into_iter()
            }

            /// Returns the value stored under a workbook header
            pub fn by_header(&self, header: &str) -> Option<&str> {
                match header {
                    $($header => self.$field.as_deref(),)+
                    _ => None,
                }
            }

            /// Builds the set by looking each workbook header up
            pub fn from_headers<F>(mut lookup: F) -> Self
            where
                F: FnMut(&str) -> Option<String>,
            {
                Self {
                    $($field: lookup($header),)+
                }
            }

            pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
                Ok(Self {
                    $($field: row.get($column)?,)+
                })
            }

            /// Applies a patch: present fields win, absent fields are retained
            pub fn merged(&self, patch: &AttributesPatch) -> Self {
                Self {
                    $(
                        $field: match &patch.$field {
                            Some(value) => value.clone(),
                            None => self.$field.clone(),
                        },
                    )+
                }
            }
        }

        impl AttributesPatch {
            /// Returns true when no field is present
            pub fn is_empty(&self) -> bool {
                true $(&& self.$field.is_none())+
            }
        }
    };
}

attribute_set! {
    org_unit_name => "org_unit_name", "Unità Organizzativa";
    owner => "owner", "Titolare";
    level => "level", "LIVELLO";
    roles_over_v => "roles_over_v", "RUOLI OltreV";
    roles => "roles", "RUOLI";
    traveller => "traveller", "Viaggiatore";
    editorial_secretary => "editorial_secretary", "Segr_Redaz";
    approver => "approver", "Approvatore";
    cashier => "cashier", "Cassiere";
    viewers => "viewers", "Visualizzatori";
    secretary => "secretary", "Segretario";
    controller => "controller", "Controllore";
    administration => "administration", "Amministrazione";
    assisted_editorial_secretary => "assisted_editorial_secretary", "SegreteriA Red. Ass.ta";
    assisted_secretary => "assisted_secretary", "SegretariO Ass.to";
    assisted_controller => "assisted_controller", "Controllore Ass.to";
    afc_roles => "afc_roles", "RuoliAFC";
    hr_roles => "hr_roles", "RuoliHR";
    other_roles => "other_roles", "AltriRuoli";
    site => "site", "Sede_TNS";
    union_group => "union_group", "GruppoSind";
}

/// A node of the organizational tree, keyed by its code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgUnit {
    pub id: i64,
    pub code: String,
    pub parent_code: Option<String>,
    pub description: String,
    pub cost_center: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Direct, non-deleted employees assigned to this unit
    pub active_employees: u32,
}

impl OrgUnit {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Display name used for change-log labels
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.code
        } else {
            &self.description
        }
    }
}

/// A person record keyed by fiscal code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    pub fiscal_code: String,
    /// Code as it appeared in the imported workbook, when present
    pub file_code: Option<String>,
    /// Weak reference to a unit code; may not resolve (orphan)
    pub unit_code: Option<String>,
    pub cost_center: Option<String>,
    /// Whether the cost center was a numeric cell in the source workbook
    pub cost_center_numeric: bool,
    #[serde(flatten)]
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Employee {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn label(&self) -> &str {
        self.attributes.owner.as_deref().unwrap_or(&self.fiscal_code)
    }
}

/// Input for creating a unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewUnit {
    pub code: String,
    #[serde(default)]
    pub parent_code: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cost_center: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl NewUnit {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_code: impl Into<String>) -> Self {
        self.parent_code = Some(parent_code.into());
        self
    }
}

/// Input for creating an employee
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEmployee {
    pub fiscal_code: String,
    #[serde(default)]
    pub file_code: Option<String>,
    #[serde(default)]
    pub unit_code: Option<String>,
    #[serde(default)]
    pub cost_center: Option<String>,
    #[serde(default)]
    pub cost_center_numeric: bool,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl NewEmployee {
    pub fn new(fiscal_code: impl Into<String>, owner: impl Into<String>) -> Self {
        let mut employee = Self {
            fiscal_code: fiscal_code.into(),
            ..Default::default()
        };
        employee.attributes.owner = Some(owner.into());
        employee
    }

    pub fn in_unit(mut self, unit_code: impl Into<String>) -> Self {
        self.unit_code = Some(unit_code.into());
        self
    }
}

/// Partial update of a unit. The code and the parent link are not updatable
/// here; reparenting goes through the hierarchy engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitPatch {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub cost_center: Option<Option<String>>,
    #[serde(flatten)]
    pub attributes: AttributesPatch,
}

/// Partial update of an employee, including its unit assignment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmployeePatch {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub file_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub unit_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub cost_center: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_center_numeric: Option<bool>,
    #[serde(flatten)]
    pub attributes: AttributesPatch,
}

/// Kind of entity a change-log entry refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Unit,
    Employee,
    System,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Unit => "unit",
            EntityType::Employee => "employee",
            EntityType::System => "system",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unit" => Ok(EntityType::Unit),
            "employee" => Ok(EntityType::Employee),
            "system" => Ok(EntityType::System),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

/// What happened to the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Create,
    Update,
    Delete,
    Restore,
    Import,
    Export,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Restore => "RESTORE",
            Action::Import => "IMPORT",
            Action::Export => "EXPORT",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Action::Create),
            "UPDATE" => Ok(Action::Update),
            "DELETE" => Ok(Action::Delete),
            "RESTORE" => Ok(Action::Restore),
            "IMPORT" => Ok(Action::Import),
            "EXPORT" => Ok(Action::Export),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_label: Option<String>,
    pub action: Action,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_columns_and_headers_line_up() {
        assert_eq!(Attributes::COLUMNS.len(), 21);
        assert_eq!(Attributes::HEADERS.len(), Attributes::COLUMNS.len());
        assert_eq!(Attributes::HEADERS[0], "Unità Organizzativa");
        assert_eq!(Attributes::COLUMNS[20], "union_group");
    }

    #[test]
    fn test_patch_distinguishes_missing_from_null() {
        let patch: UnitPatch =
            serde_json::from_str(r#"{"description": "Sales", "owner": null}"#).unwrap();

        assert_eq!(patch.description, Some(Some("Sales".to_string())));
        assert_eq!(patch.attributes.owner, Some(None));
        assert_eq!(patch.attributes.level, None);
        assert_eq!(patch.cost_center, None);
    }

    #[test]
    fn test_merged_retains_absent_fields() {
        let current = Attributes {
            owner: Some("Rossi".to_string()),
            level: Some("Q".to_string()),
            site: Some("Milano".to_string()),
            ..Default::default()
        };
        let patch = AttributesPatch {
            owner: Some(None),
            level: Some(Some("D".to_string())),
            ..Default::default()
        };

        let merged = current.merged(&patch);
        assert_eq!(merged.owner, None);
        assert_eq!(merged.level.as_deref(), Some("D"));
        assert_eq!(merged.site.as_deref(), Some("Milano"));
        assert!(!patch.is_empty());
        assert!(AttributesPatch::default().is_empty());
    }

    #[test]
    fn test_attributes_from_headers() {
        let attrs = Attributes::from_headers(|header| match header {
            "Sede_TNS" => Some("Roma".to_string()),
            "Titolare" => Some("Bianchi".to_string()),
            _ => None,
        });
        assert_eq!(attrs.site.as_deref(), Some("Roma"));
        assert_eq!(attrs.by_header("Titolare"), Some("Bianchi"));
        assert_eq!(attrs.by_header("RUOLI"), None);
    }

    #[test]
    fn test_action_and_entity_type_round_trip_through_strings() {
        for action in [Action::Create, Action::Update, Action::Import] {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert_eq!("employee".parse::<EntityType>().unwrap(), EntityType::Employee);
        assert!("team".parse::<EntityType>().is_err());
    }
}
