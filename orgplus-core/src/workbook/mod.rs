//! Spreadsheet reconciliation and export
//!
//! The workbook layout is a fixed external contract: 26 headers in a fixed
//! order, matched byte for byte (including the trailing space of the parent
//! column). Export output must be importable again without loss.

mod export;
mod import;

use serde::{Deserialize, Serialize};

use crate::models::Attributes;

pub use export::ExportSummary;
pub use import::ImportReport;

pub const HEADER_UNIT_NAME: &str = "Unità Organizzativa";
pub const HEADER_COST_CENTER: &str = "CDCCOSTO";
pub const HEADER_FISCAL_CODE: &str = "TxCodFiscale";
pub const HEADER_DESCRIPTION: &str = "DESCRIZIONE";
pub const HEADER_CODE: &str = "Codice";
pub const HEADER_PARENT: &str = "UNITA' OPERATIVA PADRE ";

/// Every column of the workbook, in output order
pub const COLUMN_ORDER: [&str; 26] = [
    HEADER_UNIT_NAME,
    HEADER_COST_CENTER,
    HEADER_FISCAL_CODE,
    HEADER_DESCRIPTION,
    "Titolare",
    "LIVELLO",
    HEADER_CODE,
    HEADER_PARENT,
    "RUOLI OltreV",
    "RUOLI",
    "Viaggiatore",
    "Segr_Redaz",
    "Approvatore",
    "Cassiere",
    "Visualizzatori",
    "Segretario",
    "Controllore",
    "Amministrazione",
    "SegreteriA Red. Ass.ta",
    "SegretariO Ass.to",
    "Controllore Ass.to",
    "RuoliAFC",
    "RuoliHR",
    "AltriRuoli",
    "Sede_TNS",
    "GruppoSind",
];

/// Length of a fiscal code; any other value in that column marks a unit row
pub const FISCAL_CODE_LEN: usize = 16;

/// Sheet names read on import and written on export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetNames {
    /// Source of truth on import, and the combined sheet on export
    pub combined: String,
    pub personnel: String,
    pub units: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            combined: "DB_TNS".to_string(),
            personnel: "TNS Personale".to_string(),
            units: "TNS Strutture".to_string(),
        }
    }
}

/// Whether `header` is one of the attribute columns shared by both row kinds
pub(crate) fn is_attribute_header(header: &str) -> bool {
    Attributes::HEADERS.contains(&header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_order_covers_every_attribute() {
        for header in Attributes::HEADERS {
            assert!(COLUMN_ORDER.contains(header), "{} missing", header);
        }
        let specific = COLUMN_ORDER.iter().filter(|h| !is_attribute_header(h)).count();
        // cost center, fiscal code, description, code, parent
        assert_eq!(specific, 5);
    }

    #[test]
    fn test_parent_header_keeps_trailing_space() {
        assert!(HEADER_PARENT.ends_with(' '));
        assert_eq!(COLUMN_ORDER[7], HEADER_PARENT);
    }
}
