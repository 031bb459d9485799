//! Spreadsheet preparation for the multi-station import templates.
//!
//! Raw exports (model runs, observed rainfall, river flow, reservoir volume)
//! are reshaped into the `Données` sheet of a multi-station template so they
//! can be uploaded through the time-series import. Each run writes the
//! filled workbook, a JSON and a text report, and a log file.
//!
//! ```text
//! input ──► readers ──► station mapping ──► clean / resample ──► pivot ──► template
//!                          (catalog)            (series)                  (workbook)
//! ```

pub mod catalog;
pub mod error;
pub mod input;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod series;
pub mod workbook;

use std::fmt;
use std::path::PathBuf;

pub use error::{PrepareError, PrepareResult};
pub use pipeline::{run, PrepareOutcome};
pub use series::{Aggregation, Rule};

pub const DEFAULT_DATA_SHEET: &str = "Données";
pub const DEFAULT_STATIONS_SHEET: &str = "Stations";
pub const DEFAULT_DATA_START_ROW: u32 = 4;
pub const DEFAULT_INPUT_SHEET: &str = "DataTable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareKind {
    PrecipModel,
    PrecipObserved,
    FlowObserved,
    VolumeObserved,
}

impl PrepareKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrepareKind::PrecipModel => "precip-model",
            PrepareKind::PrecipObserved => "precip-observed",
            PrepareKind::FlowObserved => "flow-observed",
            PrepareKind::VolumeObserved => "volume-observed",
        }
    }

    /// Report title.
    pub fn title(&self) -> &'static str {
        match self {
            PrepareKind::PrecipModel => "Multi Station Precipitation",
            PrepareKind::PrecipObserved => "Observed Precipitation DataTable",
            PrepareKind::FlowObserved => "Observed Flow",
            PrepareKind::VolumeObserved => "Observed Reservoir Volume",
        }
    }

    /// Name of the measured quantity in warnings and stats keys.
    pub fn quantity(&self) -> &'static str {
        match self {
            PrepareKind::PrecipModel | PrepareKind::PrecipObserved => "rr",
            PrepareKind::FlowObserved => "flow",
            PrepareKind::VolumeObserved => "volume",
        }
    }

    /// Similarity threshold for column matching; `None` means exact only.
    pub fn fuzzy_cutoff(&self) -> Option<f32> {
        match self {
            PrepareKind::FlowObserved => Some(0.82),
            PrepareKind::VolumeObserved => Some(0.8),
            _ => None,
        }
    }

    pub fn default_fill(&self) -> Option<f64> {
        match self {
            PrepareKind::PrecipModel => Some(0.0),
            _ => None,
        }
    }

    pub fn default_rule(&self) -> Option<Rule> {
        match self {
            PrepareKind::FlowObserved | PrepareKind::VolumeObserved => Some(Rule::hourly()),
            _ => None,
        }
    }

    pub fn default_aggregation(&self) -> Aggregation {
        match self {
            PrepareKind::PrecipModel | PrepareKind::PrecipObserved => Aggregation::Sum,
            _ => Aggregation::Mean,
        }
    }

    /// CSV separator; `None` sniffs it from the header line.
    fn csv_delimiter(&self) -> Option<u8> {
        match self {
            PrepareKind::FlowObserved => None,
            _ => Some(b';'),
        }
    }
}

impl fmt::Display for PrepareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a preparation run needs.
#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub kind: PrepareKind,
    pub input: PathBuf,
    pub template: PathBuf,
    pub outdir: PathBuf,
    pub sheet_data: String,
    pub sheet_stations: String,
    /// Input workbook sheet; `None` reads the first sheet.
    pub input_sheet: Option<String>,
    /// 1-based first data row of the data sheet.
    pub data_start_row: u32,
    /// Value for cells without data; `None` leaves them empty.
    pub fill_missing: Option<f64>,
    pub rule: Option<Rule>,
    pub aggregation: Aggregation,
    /// Model label (AROME, ECMWF) for model runs.
    pub model: Option<String>,
    pub strict: bool,
}

impl PrepareOptions {
    pub fn new(
        kind: PrepareKind,
        input: impl Into<PathBuf>,
        template: impl Into<PathBuf>,
        outdir: impl Into<PathBuf>,
    ) -> Self {
        PrepareOptions {
            kind,
            input: input.into(),
            template: template.into(),
            outdir: outdir.into(),
            sheet_data: DEFAULT_DATA_SHEET.to_string(),
            sheet_stations: DEFAULT_STATIONS_SHEET.to_string(),
            input_sheet: match kind {
                PrepareKind::PrecipObserved | PrepareKind::FlowObserved => {
                    Some(DEFAULT_INPUT_SHEET.to_string())
                }
                _ => None,
            },
            data_start_row: DEFAULT_DATA_START_ROW,
            fill_missing: kind.default_fill(),
            rule: kind.default_rule(),
            aggregation: kind.default_aggregation(),
            model: None,
            strict: false,
        }
    }

    /// File name stem shared by every output of a run.
    pub fn output_stem(&self, run_id: &str) -> String {
        match (&self.kind, &self.model) {
            (PrepareKind::PrecipModel, Some(model)) => {
                format!("precip_{}_{}", model.to_lowercase(), run_id)
            }
            (kind, _) => format!("{}_{}", kind.as_str().replace('-', "_"), run_id),
        }
    }
}

/// Parse a `--fill-missing` value: `nan`/`none`/empty leave cells empty.
pub fn parse_fill(raw: &str) -> Result<Option<f64>, String> {
    match raw.trim().to_lowercase().as_str() {
        "" | "nan" | "none" => Ok(None),
        other => other
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("invalid fill value '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_per_kind() {
        let flow = PrepareOptions::new(PrepareKind::FlowObserved, "in.xls", "t.xlsx", "out");
        assert_eq!(flow.rule, Some(Rule::hourly()));
        assert_eq!(flow.fill_missing, None);
        assert_eq!(flow.input_sheet.as_deref(), Some("DataTable"));

        let model = PrepareOptions::new(PrepareKind::PrecipModel, "in.csv", "t.xlsx", "out");
        assert_eq!(model.fill_missing, Some(0.0));
        assert_eq!(model.rule, None);
    }

    #[test]
    fn test_output_stem() {
        let mut model = PrepareOptions::new(PrepareKind::PrecipModel, "in.csv", "t.xlsx", "out");
        model.model = Some("AROME".into());
        assert_eq!(model.output_stem("20240201T000000Z"), "precip_arome_20240201T000000Z");
        let volume = PrepareOptions::new(PrepareKind::VolumeObserved, "v.csv", "t.xlsx", "out");
        assert_eq!(volume.output_stem("X"), "volume_observed_X");
    }

    #[test]
    fn test_parse_fill() {
        assert_eq!(parse_fill("nan"), Ok(None));
        assert_eq!(parse_fill("0"), Ok(Some(0.0)));
        assert!(parse_fill("zero").is_err());
    }
}
