//! Station catalogue read from a template workbook.
//!
//! The `Stations` sheet lists one station per row (code in column A, name in
//! column B, variable label in column D). Each kind derives its own aliases
//! from those names; input columns are matched against the aliases exactly
//! first, then by similarity when the kind allows it.

use std::collections::BTreeMap;

use super::normalize::normalize_label;
use super::PrepareKind;
use crate::services::tabular::{Cell, Sheet};

/// Row holding the station codes of the data sheet (spreadsheet row 3).
pub const HEADER_ROW: usize = 2;

/// Observed labels that do not follow the `name debit` pattern, keyed to
/// the catalogue name they stand for.
const FLOW_MANUAL_ALIASES: [(&str, &str); 5] = [
    ("brg de garde debit", "Bge Garde de Sebou"),
    ("barrage de garde debit", "Bge Garde de Sebou"),
    ("pont elmalha debit", "El Malha"),
    ("pont el malha debit", "El Malha"),
    ("pont sebbou debit", "Ain Sebou"),
];

fn integer_code(cell: &Cell) -> Option<i64> {
    match cell {
        Cell::Number(v) if v.is_finite() => Some(v.trunc() as i64),
        _ => None,
    }
}

/// Numeric codes found on row 3 of the data sheet, in column order.
pub fn data_sheet_codes(sheet: &Sheet) -> Vec<i64> {
    (1..sheet.width())
        .filter_map(|col| integer_code(sheet.cell(HEADER_ROW, col)))
        .collect()
}

/// How an input column was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnMatch {
    Exact(i64),
    Fuzzy { code: i64, alias: String },
}

impl ColumnMatch {
    pub fn code(&self) -> i64 {
        match self {
            ColumnMatch::Exact(code) => *code,
            ColumnMatch::Fuzzy { code, .. } => *code,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StationCatalog {
    /// Codes in sheet order.
    pub codes: Vec<i64>,
    pub labels: BTreeMap<i64, String>,
    aliases: BTreeMap<String, i64>,
}

impl StationCatalog {
    /// Read the stations sheet; rows without a numeric code are skipped.
    pub fn from_sheet(sheet: &Sheet, kind: PrepareKind) -> Self {
        let mut catalog = StationCatalog::default();
        for row in 1..sheet.rows.len() {
            let Some(code) = integer_code(sheet.cell(row, 0)) else {
                continue;
            };
            let name = sheet.cell(row, 1).text();
            let variable = sheet.cell(row, 3).text();

            catalog.codes.push(code);
            let label = match kind {
                PrepareKind::PrecipObserved if !variable.is_empty() => variable.clone(),
                _ if !name.is_empty() => name.clone(),
                _ => code.to_string(),
            };
            catalog.labels.insert(code, label);

            for alias in kind_aliases(kind, &name, &variable) {
                catalog.add_alias(&alias, code);
            }
        }

        if kind == PrepareKind::FlowObserved {
            for (observed, station) in FLOW_MANUAL_ALIASES {
                if let Some(code) = catalog.code_for_name(station) {
                    catalog.add_alias(observed, code);
                }
            }
        }
        catalog
    }

    /// First alias wins.
    fn add_alias(&mut self, raw: &str, code: i64) {
        let alias = normalize_label(raw);
        if !alias.is_empty() {
            self.aliases.entry(alias).or_insert(code);
        }
    }

    fn code_for_name(&self, name: &str) -> Option<i64> {
        let wanted = normalize_label(name);
        self.labels
            .iter()
            .find(|(_, label)| normalize_label(label) == wanted)
            .map(|(code, _)| *code)
    }

    pub fn label(&self, code: i64) -> &str {
        self.labels.get(&code).map(String::as_str).unwrap_or("")
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Resolve an input column label. `cutoff` enables similarity matching.
    pub fn match_column(&self, label: &str, cutoff: Option<f32>) -> Option<ColumnMatch> {
        let normalized = normalize_label(label);
        if let Some(code) = self.aliases.get(&normalized) {
            return Some(ColumnMatch::Exact(*code));
        }
        let cutoff = cutoff?;
        if normalized.is_empty() {
            return None;
        }
        let candidates: Vec<&str> = self.aliases.keys().map(String::as_str).collect();
        let best = difflib::get_close_matches(&normalized, candidates, 1, cutoff);
        best.first().and_then(|alias| {
            self.aliases.get(*alias).map(|code| ColumnMatch::Fuzzy {
                code: *code,
                alias: alias.to_string(),
            })
        })
    }
}

fn kind_aliases(kind: PrepareKind, name: &str, variable: &str) -> Vec<String> {
    if name.is_empty() {
        return match kind {
            PrepareKind::PrecipObserved => vec![variable.to_string()],
            _ => Vec::new(),
        };
    }
    match kind {
        PrepareKind::PrecipModel => vec![name.to_string()],
        PrepareKind::PrecipObserved => vec![
            variable.to_string(),
            name.to_string(),
            format!("{}_Pluie 1hr (mm)", name),
            format!("{} Pluie 1hr (mm)", name),
        ],
        PrepareKind::FlowObserved => vec![
            name.to_string(),
            format!("{} debit", name),
            format!("{}_Débit (m3/s)", name),
        ],
        PrepareKind::VolumeObserved => vec![
            name.to_string(),
            format!("{} volume", name),
            format!("brg {} volume", name),
            format!("{}_volume", name),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stations_sheet() -> Sheet {
        let row = |code: f64, name: &str, var: &str| {
            vec![
                Cell::Number(code),
                Cell::Text(name.into()),
                Cell::Empty,
                if var.is_empty() { Cell::Empty } else { Cell::Text(var.into()) },
            ]
        };
        Sheet {
            name: "Stations".into(),
            rows: vec![
                vec![Cell::Text("code".into()), Cell::Text("nom".into())],
                row(101.0, "Zerarda", "Zerarda Pluie"),
                row(102.0, "Bge Garde de Sebou", ""),
                vec![Cell::Text("total".into())],
                row(103.0, "Al Wahda", ""),
            ],
        }
    }

    #[test]
    fn test_codes_and_labels() {
        let catalog = StationCatalog::from_sheet(&stations_sheet(), PrepareKind::PrecipObserved);
        assert_eq!(catalog.codes, vec![101, 102, 103]);
        assert_eq!(catalog.label(101), "Zerarda Pluie");
        assert_eq!(catalog.label(102), "Bge Garde de Sebou");
    }

    #[test]
    fn test_flow_aliases_and_manual_mapping() {
        let catalog = StationCatalog::from_sheet(&stations_sheet(), PrepareKind::FlowObserved);
        assert_eq!(
            catalog.match_column("Al Wahda_Débit (m3/s)", None),
            Some(ColumnMatch::Exact(103))
        );
        assert_eq!(
            catalog.match_column("Brg de Garde Debit", None),
            Some(ColumnMatch::Exact(102))
        );
    }

    #[test]
    fn test_fuzzy_matching_requires_cutoff() {
        let catalog = StationCatalog::from_sheet(&stations_sheet(), PrepareKind::FlowObserved);
        assert_eq!(catalog.match_column("Zrarda debit", None), None);
        let found = catalog.match_column("Zrarda debit", Some(0.82)).unwrap();
        assert_eq!(found.code(), 101);
        assert!(matches!(found, ColumnMatch::Fuzzy { .. }));
        assert_eq!(catalog.match_column("Oued Inconnu", Some(0.82)), None);
    }

    #[test]
    fn test_volume_aliases() {
        let catalog = StationCatalog::from_sheet(&stations_sheet(), PrepareKind::VolumeObserved);
        assert_eq!(
            catalog.match_column("BRG Al Wahda Volume", None),
            Some(ColumnMatch::Exact(103))
        );
    }

    #[test]
    fn test_data_sheet_codes_skip_text() {
        let sheet = Sheet {
            name: "Données".into(),
            rows: vec![
                vec![],
                vec![],
                vec![
                    Cell::Text("timestamp".into()),
                    Cell::Number(101.0),
                    Cell::Text("x".into()),
                    Cell::Number(7.0),
                ],
            ],
        };
        assert_eq!(data_sheet_codes(&sheet), vec![101, 7]);
    }
}
