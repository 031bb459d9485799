//! Hydro Sentinel data preparation
//!
//! Reshapes raw exports into the multi-station import template.
//!
//! ```bash
//! hydro-prepare precip-model --model AROME --input arome.csv \
//!     --template template_multi_station_precip_mm.xlsx --outdir outputs/runs
//! hydro-prepare flow-observed --input debits.xls --template template_flow.xlsx
//! ```
//!
//! Exit status: 0 on success, 1 on failure or when `--strict` meets warnings,
//! 2 when the input or the template does not exist.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use hydro_sentinel::prepare::{
    self, parse_fill, Aggregation, PrepareKind, PrepareOptions, Rule, DEFAULT_DATA_SHEET,
    DEFAULT_STATIONS_SHEET,
};

#[derive(Parser, Debug)]
#[command(
    name = "hydro-prepare",
    version,
    about = "Prepare raw hydrological exports for template ingestion."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Raw input file.
    #[arg(long)]
    input: PathBuf,

    /// Excel template to fill.
    #[arg(long)]
    template: PathBuf,

    /// Output directory.
    #[arg(long, default_value = "outputs/runs")]
    outdir: PathBuf,

    /// Template data sheet name.
    #[arg(long = "sheet-data", default_value = DEFAULT_DATA_SHEET)]
    sheet_data: String,

    /// Template station sheet name.
    #[arg(long = "sheet-stations", default_value = DEFAULT_STATIONS_SHEET)]
    sheet_stations: String,

    /// First data row in the data sheet.
    #[arg(long = "data-start-row", default_value_t = 4)]
    data_start_row: u32,

    /// Exit with status 1 when any warning is raised.
    #[arg(long)]
    strict: bool,
}

/// `--fill-missing` value; `nan` leaves cells empty.
#[derive(Clone, Copy, Debug)]
struct Fill(Option<f64>);

impl FromStr for Fill {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fill(s).map(Fill)
    }
}

#[derive(Args, Debug)]
struct ObservedArgs {
    /// Sheet of an `.xlsx` input.
    #[arg(long = "input-sheet")]
    input_sheet: Option<String>,

    /// Value for missing cells, or `nan` to leave them empty.
    #[arg(long = "fill-missing", default_value = "nan")]
    fill_missing: Fill,
}

#[derive(Args, Debug)]
struct ResampleArgs {
    /// Resampling rule (`1h`, `30min`, `1D`).
    #[arg(long = "resample-rule", alias = "rule", default_value = "1h")]
    rule: Rule,

    /// Aggregation inside each bucket.
    #[arg(long, value_enum, default_value_t = Aggregation::Mean)]
    agg: Aggregation,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// AROME/ECMWF model runs (`;` CSV, one row per station and step).
    PrecipModel {
        #[command(flatten)]
        common: CommonArgs,

        /// Model label kept in the report and output names.
        #[arg(long)]
        model: String,

        /// Fill value for missing (time, station) cells.
        #[arg(long = "fill-missing", default_value_t = 0.0)]
        fill_missing: f64,

        /// Optional resampling rule.
        #[arg(long = "resample-rule", alias = "rule")]
        rule: Option<Rule>,

        #[arg(long, value_enum, default_value_t = Aggregation::Sum)]
        agg: Aggregation,
    },
    /// Observed hourly rainfall DataTable.
    PrecipObserved {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        observed: ObservedArgs,
    },
    /// Observed river flow exports.
    FlowObserved {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        observed: ObservedArgs,

        #[command(flatten)]
        resample: ResampleArgs,
    },
    /// Observed reservoir volume exports.
    VolumeObserved {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        observed: ObservedArgs,

        #[command(flatten)]
        resample: ResampleArgs,
    },
}

fn base_options(kind: PrepareKind, common: CommonArgs) -> PrepareOptions {
    let mut options = PrepareOptions::new(kind, common.input, common.template, common.outdir);
    options.sheet_data = common.sheet_data;
    options.sheet_stations = common.sheet_stations;
    options.data_start_row = common.data_start_row;
    options.strict = common.strict;
    options
}

fn apply_observed(options: &mut PrepareOptions, observed: ObservedArgs) {
    if observed.input_sheet.is_some() {
        options.input_sheet = observed.input_sheet;
    }
    options.fill_missing = observed.fill_missing.0;
}

fn options_from(command: Command) -> PrepareOptions {
    match command {
        Command::PrecipModel {
            common,
            model,
            fill_missing,
            rule,
            agg,
        } => {
            let mut options = base_options(PrepareKind::PrecipModel, common);
            options.model = Some(model);
            options.fill_missing = Some(fill_missing);
            options.rule = rule;
            options.aggregation = agg;
            options
        }
        Command::PrecipObserved { common, observed } => {
            let mut options = base_options(PrepareKind::PrecipObserved, common);
            apply_observed(&mut options, observed);
            options
        }
        Command::FlowObserved {
            common,
            observed,
            resample,
        } => {
            let mut options = base_options(PrepareKind::FlowObserved, common);
            apply_observed(&mut options, observed);
            options.rule = Some(resample.rule);
            options.aggregation = resample.agg;
            options
        }
        Command::VolumeObserved {
            common,
            observed,
            resample,
        } => {
            let mut options = base_options(PrepareKind::VolumeObserved, common);
            apply_observed(&mut options, observed);
            options.rule = Some(resample.rule);
            options.aggregation = resample.agg;
            options
        }
    }
}

fn main() -> ExitCode {
    FmtSubscriber::builder()
        .with_max_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = options_from(cli.command);
    match prepare::run(&options, chrono::Utc::now()) {
        Ok(outcome) => {
            println!("Output workbook: {}", outcome.output_file.display());
            println!("Report: {}", outcome.report_txt.display());
            if !outcome.warnings.is_empty() {
                println!("{} warning(s), see {}", outcome.warnings.len(), outcome.log_file.display());
            }
            ExitCode::from(outcome.exit_code)
        }
        Err(err) => {
            eprintln!("ERROR {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
