use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// PRISM screen batch a measurement came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScreenId {
    Hts002,
    Mts010,
    Other(String),
}

impl ScreenId {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "HTS002" => ScreenId::Hts002,
            "MTS010" => ScreenId::Mts010,
            other => ScreenId::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ScreenId::Hts002 => "HTS002",
            ScreenId::Mts010 => "MTS010",
            ScreenId::Other(s) => s,
        }
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (drug, cell line) pair. Hashable, used as the lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrismKey {
    pub drug: String,
    pub cell: String,
}

impl PrismKey {
    pub fn new(drug: impl Into<String>, cell: impl Into<String>) -> Self {
        Self {
            drug: drug.into(),
            cell: cell.into(),
        }
    }

    /// Trim both identifiers and optionally case-fold them.
    pub fn norm(&self, casefold: bool) -> Self {
        Self {
            drug: normalize(&self.drug, casefold),
            cell: normalize(&self.cell, casefold),
        }
    }

    pub fn as_tuple(&self) -> (String, String) {
        (self.drug.clone(), self.cell.clone())
    }
}

pub(crate) fn normalize(s: &str, casefold: bool) -> String {
    if casefold {
        s.trim().to_lowercase()
    } else {
        s.trim().to_string()
    }
}

/// One IC50 measurement for a (drug, cell line) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ic50Record {
    pub drug: String,
    pub cell_line: String,
    pub ic50: f64,
    #[serde(default)]
    pub r2: Option<f64>,
    #[serde(default)]
    pub screen_id: Option<ScreenId>,
    /// Remaining columns of the source row, untouched.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Ic50Record {
    pub fn new(drug: impl Into<String>, cell_line: impl Into<String>, ic50: f64) -> Self {
        Self {
            drug: drug.into(),
            cell_line: cell_line.into(),
            ic50,
            r2: None,
            screen_id: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> PrismKey {
        PrismKey::new(self.drug.clone(), self.cell_line.clone())
    }
}

/// Column names used to read a cleaned PRISM table.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub drug: String,
    pub cell: String,
    pub ic50: String,
    pub r2: String,
    pub screen_id: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            drug: "name".to_string(),
            cell: "ccle_name".to_string(),
            ic50: "ic50".to_string(),
            r2: "r2".to_string(),
            screen_id: "screen_id".to_string(),
        }
    }
}

/// Parse a numeric CSV cell, treating the usual pandas NA spellings as missing.
pub(crate) fn parse_float(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if is_missing(s) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| !v.is_nan())
}

pub(crate) fn is_missing(raw: &str) -> bool {
    matches!(
        raw.trim(),
        "" | "NA" | "N/A" | "NaN" | "nan" | "NULL" | "null" | "None" | "<NA>"
    )
}
