//! One preparation run, from input file to filled template and reports.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};

use super::catalog::{data_sheet_codes, ColumnMatch, StationCatalog};
use super::error::{PrepareError, PrepareResult};
use super::input::{read_model_csv, read_wide_input, select_volume_columns};
use super::report::{Report, RunLog, TimeQuality};
use super::series::{
    clean_points, dedupe_keep_last, native_step_minutes, resample, time_gaps, Aggregation,
    CleanStats, Matrix, Point,
};
use super::workbook::TemplateBook;
use super::{PrepareKind, PrepareOptions};

pub const RUN_ID_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone)]
pub struct PrepareOutcome {
    pub run_id: String,
    pub output_file: PathBuf,
    pub report_json: PathBuf,
    pub report_txt: PathBuf,
    pub log_file: PathBuf,
    pub warnings: Vec<String>,
    /// 1 when `--strict` is set and warnings were raised, 0 otherwise.
    pub exit_code: u8,
}

struct OutputPaths {
    xlsx: PathBuf,
    log: PathBuf,
    json: PathBuf,
    txt: PathBuf,
}

/// Run a preparation. The log file is written even when the run fails.
pub fn run(options: &PrepareOptions, now: DateTime<Utc>) -> PrepareResult<PrepareOutcome> {
    if !options.input.exists() {
        return Err(PrepareError::InputNotFound(options.input.clone()));
    }
    if !options.template.exists() {
        return Err(PrepareError::TemplateNotFound(options.template.clone()));
    }
    if options.kind == PrepareKind::VolumeObserved && options.aggregation == Aggregation::Sum {
        return Err(PrepareError::InvalidOption {
            option: "--agg",
            message: "volume-observed supports mean, last, min, max and median".into(),
        });
    }
    if options.data_start_row <= 3 {
        return Err(PrepareError::InvalidOption {
            option: "--data-start-row",
            message: "data must start below the header row 3".into(),
        });
    }

    fs::create_dir_all(&options.outdir)?;
    let run_id = now.format(RUN_ID_FORMAT).to_string();
    let stem = options.output_stem(&run_id);
    let paths = OutputPaths {
        xlsx: options.outdir.join(format!("{}.xlsx", stem)),
        log: options.outdir.join(format!("{}.log", stem)),
        json: options.outdir.join(format!("{}_report.json", stem)),
        txt: options.outdir.join(format!("{}_report.txt", stem)),
    };

    let mut log = RunLog::new();
    log.info(format!("Run {} ({})", run_id, options.kind));
    let result = execute(options, &run_id, &paths, &mut log);
    if let Err(e) = &result {
        log.error(e.to_string());
    }
    log.save(&paths.log)?;
    result
}

fn execute(
    options: &PrepareOptions,
    run_id: &str,
    paths: &OutputPaths,
    log: &mut RunLog,
) -> PrepareResult<PrepareOutcome> {
    let kind = options.kind;
    log.info(format!("Loading template: {}", options.template.display()));
    let book = TemplateBook::read(&fs::read(&options.template)?)?;
    let catalog = StationCatalog::from_sheet(book.sheet(&options.sheet_stations)?, kind);
    let template_codes = data_sheet_codes(book.sheet(&options.sheet_data)?);

    log.info(format!("Reading input: {}", options.input.display()));
    let bytes = fs::read(&options.input)?;
    let mut warnings = Vec::new();
    let mut clean_stats = CleanStats::default();

    let (points, input_stats, mut mapping_stats) = if kind == PrepareKind::PrecipModel {
        model_points(&bytes, &mut clean_stats, &mut warnings)?
    } else {
        observed_points(options, &bytes, &catalog, &mut clean_stats, &mut warnings)?
    };

    let native_step = native_step_minutes(&points);
    let points = match options.rule {
        Some(rule) => resample(&points, rule, options.aggregation),
        None => points,
    };
    let points = dedupe_keep_last(points, &mut clean_stats);
    warnings.extend(clean_stats.warnings(kind.quantity()));

    if points.iter().all(|p| p.value.is_none()) {
        return Err(PrepareError::invalid_input(
            "No valid data after mapping/cleaning.",
        ));
    }

    let input_codes: BTreeSet<i64> = points.iter().map(|p| p.code).collect();
    let codes = if kind == PrepareKind::PrecipModel {
        model_station_order(&template_codes, &catalog, &input_codes, &mut warnings, &mut mapping_stats)
    } else {
        observed_station_order(&template_codes, &catalog, &input_codes, &mut warnings)
    };

    let mut matrix = Matrix::pivot(&points, &codes);
    let pre_fill = matrix.missing_cells();
    if let Some(fill) = options.fill_missing {
        matrix.fill(fill);
    }

    let expected = options.rule.map(|r| r.step).unwrap_or_else(|| Duration::hours(1));
    let gaps = time_gaps(&points, expected);
    if !gaps.is_empty() {
        let step = options
            .rule
            .map(|r| r.to_string())
            .unwrap_or_else(|| "hourly".to_string());
        warnings.push(format!("Detected non-{} time gaps: {}", step, gaps.len()));
    }

    let mut output_stats = matrix.stats(kind.quantity(), kind == PrepareKind::PrecipModel);
    output_stats.insert("pre_fill_missing_cells".into(), json!(pre_fill));
    output_stats.insert("fill_missing_value".into(), json!(options.fill_missing));
    let write_stats = book.write_with_matrix(
        &paths.xlsx,
        &options.sheet_data,
        &matrix,
        options.data_start_row,
    )?;
    output_stats.extend(write_stats);
    log.info(format!("Output workbook written: {}", paths.xlsx.display()));

    let report = Report {
        run_id: run_id.to_string(),
        kind: kind.as_str().to_string(),
        model: options.model.clone(),
        input_file: options.input.display().to_string(),
        template_file: options.template.display().to_string(),
        output_file: paths.xlsx.display().to_string(),
        log_file: paths.log.display().to_string(),
        input_stats,
        mapping_stats,
        cleaning_stats: cleaning_stats(&points, &clean_stats, native_step, options),
        output_stats,
        time_quality: TimeQuality {
            expected_step: options
                .rule
                .map(|r| r.to_string())
                .unwrap_or_else(|| "1h".to_string()),
            gap_count: gaps.len(),
            gaps,
        },
        warnings: warnings.clone(),
        strict_mode: options.strict,
    };
    report.write(&paths.json, &paths.txt, kind.title())?;
    log.info(format!("Report JSON written: {}", paths.json.display()));
    log.info(format!("Report TXT written: {}", paths.txt.display()));

    for warning in &warnings {
        log.warn(warning);
    }
    let exit_code = if options.strict && !warnings.is_empty() {
        log.error("Strict mode enabled and warnings were detected.");
        1
    } else {
        log.info("Done.");
        0
    };

    Ok(PrepareOutcome {
        run_id: run_id.to_string(),
        output_file: paths.xlsx.clone(),
        report_json: paths.json.clone(),
        report_txt: paths.txt.clone(),
        log_file: paths.log.clone(),
        warnings,
        exit_code,
    })
}

type Collected = (Vec<Point>, Map<String, Value>, Map<String, Value>);

fn model_points(
    bytes: &[u8],
    stats: &mut CleanStats,
    warnings: &mut Vec<String>,
) -> PrepareResult<Collected> {
    let rows = read_model_csv(bytes)?;
    let mut invalid_station = 0usize;
    let raw: Vec<(Option<NaiveDateTime>, i64, Option<f64>)> = rows
        .iter()
        .filter_map(|row| match row.station_id.as_f64() {
            Some(code) => Some((row.time.as_datetime(), code.trunc() as i64, row.rr.as_f64())),
            None => {
                invalid_station += 1;
                None
            }
        })
        .collect();
    if invalid_station > 0 {
        warnings.push(format!(
            "Invalid station_id converted to NaN and dropped: {}",
            invalid_station
        ));
    }
    let points = clean_points(raw, stats);

    let mut input_stats = Map::new();
    input_stats.insert("input_format".into(), json!("csv"));
    input_stats.insert("raw_rows".into(), json!(rows.len()));
    input_stats.insert("invalid_station_rows".into(), json!(invalid_station));
    Ok((points, input_stats, Map::new()))
}

fn observed_points(
    options: &PrepareOptions,
    bytes: &[u8],
    catalog: &StationCatalog,
    stats: &mut CleanStats,
    warnings: &mut Vec<String>,
) -> PrepareResult<Collected> {
    let kind = options.kind;
    let mut input = read_wide_input(
        &options.input,
        bytes,
        options.input_sheet.as_deref(),
        kind.csv_delimiter(),
    )?;
    let mut input_stats = input.stats();
    if kind == PrepareKind::VolumeObserved {
        let split = select_volume_columns(&mut input)?;
        input_stats.insert("volume_columns_kept".into(), json!(split.kept));
        input_stats.insert("rate_columns_ignored".into(), json!(split.rate));
        input_stats.insert("other_columns_ignored".into(), json!(split.other));
    }
    warnings.append(&mut input.warnings);

    let columns: BTreeSet<&str> = input
        .points
        .iter()
        .filter(|p| p.code.is_none())
        .map(|p| p.column.as_str())
        .collect();
    let mut resolved: BTreeMap<&str, i64> = BTreeMap::new();
    let mut fuzzy = Vec::new();
    let mut unmapped = Vec::new();
    let mut exact = 0usize;
    for column in columns {
        match catalog.match_column(column, kind.fuzzy_cutoff()) {
            Some(ColumnMatch::Exact(code)) => {
                exact += 1;
                resolved.insert(column, code);
            }
            Some(ColumnMatch::Fuzzy { code, alias }) => {
                fuzzy.push(format!(
                    "{} -> code {} ({}) via '{}'",
                    column,
                    code,
                    catalog.label(code),
                    alias
                ));
                resolved.insert(column, code);
            }
            None => unmapped.push(column.to_string()),
        }
    }
    if !fuzzy.is_empty() {
        warnings.push(format!("Fuzzy station mapping used: {}", fuzzy.join(" | ")));
    }
    if !unmapped.is_empty() {
        warnings.push(format!(
            "Unmapped input station columns ignored: {}",
            unmapped.join(", ")
        ));
    }

    let from_code_row = input.points.iter().filter(|p| p.code.is_some()).count();
    let mut dropped = 0usize;
    let raw: Vec<(Option<NaiveDateTime>, i64, Option<f64>)> = input
        .points
        .iter()
        .filter_map(|p| {
            let code = p.code.or_else(|| resolved.get(p.column.as_str()).copied());
            if code.is_none() {
                dropped += 1;
            }
            code.map(|c| (p.time.as_datetime(), c, p.value.as_f64()))
        })
        .collect();

    let mut mapping = Map::new();
    mapping.insert("catalog_aliases".into(), json!(catalog.alias_count()));
    mapping.insert("rows_mapped_from_code_row".into(), json!(from_code_row));
    mapping.insert("exact_column_matches".into(), json!(exact));
    mapping.insert("fuzzy_column_matches".into(), json!(fuzzy.len()));
    mapping.insert("unmapped_station_columns".into(), json!(unmapped));
    mapping.insert("rows_dropped_unmapped".into(), json!(dropped));

    Ok((clean_points(raw, stats), input_stats, mapping))
}

/// Template order first, then new codes from the catalogue and the input.
fn model_station_order(
    template_codes: &[i64],
    catalog: &StationCatalog,
    input_codes: &BTreeSet<i64>,
    warnings: &mut Vec<String>,
    stats: &mut Map<String, Value>,
) -> Vec<i64> {
    let existing: BTreeSet<i64> = template_codes.iter().copied().collect();
    let catalog_codes: BTreeSet<i64> = catalog.codes.iter().copied().collect();
    let added: Vec<i64> = catalog_codes
        .union(input_codes)
        .filter(|c| !existing.contains(c))
        .copied()
        .collect();
    let not_in_catalog: Vec<i64> = input_codes.difference(&catalog_codes).copied().collect();
    let not_in_input: Vec<i64> = catalog_codes.difference(input_codes).copied().collect();

    if !added.is_empty() {
        warnings.push(format!(
            "Station columns added to the data sheet: {}",
            join_codes(&added)
        ));
    }
    if !not_in_catalog.is_empty() {
        warnings.push(format!(
            "Input stations missing from the Stations sheet: {}",
            join_codes(&not_in_catalog)
        ));
    }
    if !not_in_input.is_empty() {
        warnings.push(format!(
            "Stations sheet codes absent from input: {}",
            join_codes(&not_in_input)
        ));
    }

    let mut order = template_codes.to_vec();
    order.extend(&added);
    stats.insert("template_data_station_count_before".into(), json!(template_codes.len()));
    stats.insert("template_stations_sheet_count".into(), json!(catalog_codes.len()));
    stats.insert("input_station_count".into(), json!(input_codes.len()));
    stats.insert("target_station_count_after".into(), json!(order.len()));
    stats.insert("added_station_columns_in_data_sheet".into(), json!(added));
    stats.insert("stations_in_input_not_in_stations_sheet".into(), json!(not_in_catalog));
    stats.insert("stations_in_stations_sheet_not_in_input".into(), json!(not_in_input));
    order
}

/// Sorted union of the catalogue and the template header.
fn observed_station_order(
    template_codes: &[i64],
    catalog: &StationCatalog,
    input_codes: &BTreeSet<i64>,
    warnings: &mut Vec<String>,
) -> Vec<i64> {
    let target: BTreeSet<i64> = catalog
        .codes
        .iter()
        .chain(template_codes)
        .copied()
        .collect();
    let absent: Vec<String> = target
        .iter()
        .filter(|c| !input_codes.contains(c))
        .map(|c| format!("{}:{}", c, catalog.label(*c)))
        .collect();
    if !absent.is_empty() {
        warnings.push(format!(
            "Stations absent in input and filled by --fill-missing: {}",
            absent.join(", ")
        ));
    }
    target.into_iter().collect()
}

fn join_codes(codes: &[i64]) -> String {
    codes
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn cleaning_stats(
    points: &[Point],
    stats: &CleanStats,
    native_step: Option<f64>,
    options: &PrepareOptions,
) -> Map<String, Value> {
    let times: BTreeSet<NaiveDateTime> = points.iter().map(|p| p.time).collect();
    let stations: BTreeSet<i64> = points.iter().map(|p| p.code).collect();
    let iso = |t: Option<&NaiveDateTime>| t.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string());

    let mut out = Map::new();
    out.insert("rows_after_cleaning".into(), json!(points.len()));
    out.insert("native_step_minutes_median".into(), json!(native_step));
    out.insert("resample_rule".into(), json!(options.rule.map(|r| r.to_string())));
    out.insert(
        "resample_agg".into(),
        json!(options.rule.map(|_| options.aggregation.as_str())),
    );
    out.insert("invalid_time_rows".into(), json!(stats.invalid_time_rows));
    out.insert("invalid_value_rows".into(), json!(stats.invalid_value_rows));
    out.insert("negative_value_rows".into(), json!(stats.negative_value_rows));
    out.insert("duplicate_rows_removed".into(), json!(stats.duplicate_rows_removed));
    out.insert("time_min".into(), json!(iso(times.first())));
    out.insert("time_max".into(), json!(iso(times.last())));
    out.insert("station_count".into(), json!(stations.len()));
    out.insert("time_count".into(), json!(times.len()));
    out
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
