//! Cleaning, resampling and pivoting of station time series.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime};
use serde_json::{json, Map, Value};

/// One mapped measurement. `value` is `None` when the cell was not numeric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub time: NaiveDateTime,
    pub code: i64,
    pub value: Option<f64>,
}

/// Aggregation applied inside a resampling bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "prepare-cli", derive(clap::ValueEnum))]
pub enum Aggregation {
    Mean,
    Last,
    Sum,
    Min,
    Max,
    Median,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Mean => "mean",
            Aggregation::Last => "last",
            Aggregation::Sum => "sum",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Median => "median",
        }
    }

    /// Reduce the values of one bucket; `None` entries are ignored and an
    /// all-missing bucket stays missing.
    pub fn apply(&self, values: &[Option<f64>]) -> Option<f64> {
        let present: Vec<f64> = values.iter().flatten().copied().collect();
        if present.is_empty() {
            return None;
        }
        let value = match self {
            Aggregation::Mean => present.iter().sum::<f64>() / present.len() as f64,
            Aggregation::Last => present[present.len() - 1],
            Aggregation::Sum => present.iter().sum(),
            Aggregation::Min => present.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Median => {
                let mut sorted = present;
                sorted.sort_by(f64::total_cmp);
                quantile(&sorted, 0.5)
            }
        };
        Some(value)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Aggregation::Mean),
            "last" => Ok(Aggregation::Last),
            "sum" => Ok(Aggregation::Sum),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "median" => Ok(Aggregation::Median),
            other => Err(format!("Unsupported aggregation: {}", other)),
        }
    }
}

/// Resampling rule such as `1h`, `30min` or `1D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub step: Duration,
}

impl Rule {
    pub fn hourly() -> Self {
        Rule {
            step: Duration::hours(1),
        }
    }

    /// Start of the bucket holding `time`, aligned on the epoch.
    pub fn floor(&self, time: NaiveDateTime) -> NaiveDateTime {
        let step = self.step.num_seconds().max(1);
        let secs = time.and_utc().timestamp();
        let start = secs - secs.rem_euclid(step);
        DateTime::from_timestamp(start, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or(time)
    }
}

impl FromStr for Rule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("missing unit in rule '{}'", raw))?;
        let (count, unit) = raw.split_at(split);
        let count: i64 = if count.is_empty() {
            1
        } else {
            count.parse().map_err(|_| format!("invalid rule '{}'", raw))?
        };
        if count <= 0 {
            return Err(format!("rule must be positive: '{}'", raw));
        }
        let step = match unit {
            "s" | "S" => Duration::seconds(count),
            "min" | "T" => Duration::minutes(count),
            "h" | "H" => Duration::hours(count),
            "d" | "D" => Duration::days(count),
            other => return Err(format!("unknown rule unit '{}'", other)),
        };
        Ok(Rule { step })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.step.num_seconds();
        if secs % 86_400 == 0 {
            write!(f, "{}D", secs / 86_400)
        } else if secs % 3_600 == 0 {
            write!(f, "{}h", secs / 3_600)
        } else if secs % 60 == 0 {
            write!(f, "{}min", secs / 60)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

/// Counters gathered while cleaning; every non-zero counter also produces a
/// warning through [`CleanStats::warnings`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanStats {
    pub invalid_time_rows: usize,
    pub invalid_value_rows: usize,
    pub negative_value_rows: usize,
    pub duplicate_rows_removed: usize,
}

impl CleanStats {
    pub fn warnings(&self, quantity: &str) -> Vec<String> {
        let mut out = Vec::new();
        if self.invalid_time_rows > 0 {
            out.push(format!("Invalid timestamps dropped: {}", self.invalid_time_rows));
        }
        if self.invalid_value_rows > 0 {
            out.push(format!(
                "Non-numeric {} values converted to NaN: {}",
                quantity, self.invalid_value_rows
            ));
        }
        if self.negative_value_rows > 0 {
            out.push(format!(
                "Negative {} values detected and kept as-is: {}",
                quantity, self.negative_value_rows
            ));
        }
        if self.duplicate_rows_removed > 0 {
            out.push(format!(
                "Duplicate (time, station_id) rows removed (keep=last): {}",
                self.duplicate_rows_removed
            ));
        }
        out
    }
}

/// Drop rows whose time did not parse and count bad values.
pub fn clean_points(
    raw: impl IntoIterator<Item = (Option<NaiveDateTime>, i64, Option<f64>)>,
    stats: &mut CleanStats,
) -> Vec<Point> {
    let mut points = Vec::new();
    for (time, code, value) in raw {
        let Some(time) = time else {
            stats.invalid_time_rows += 1;
            continue;
        };
        match value {
            None => stats.invalid_value_rows += 1,
            Some(v) if v < 0.0 => stats.negative_value_rows += 1,
            Some(_) => {}
        }
        points.push(Point { time, code, value });
    }
    points
}

/// Keep the last row of each `(time, code)` pair, then sort by time and code.
pub fn dedupe_keep_last(points: Vec<Point>, stats: &mut CleanStats) -> Vec<Point> {
    let before = points.len();
    let mut latest: HashMap<(NaiveDateTime, i64), Point> = HashMap::with_capacity(before);
    for point in points {
        latest.insert((point.time, point.code), point);
    }
    let mut out: Vec<Point> = latest.into_values().collect();
    stats.duplicate_rows_removed += before - out.len();
    out.sort_by_key(|p| (p.time, p.code));
    out
}

/// Median spacing in minutes between consecutive rows of the same station.
pub fn native_step_minutes(points: &[Point]) -> Option<f64> {
    let mut by_station: BTreeMap<i64, Vec<NaiveDateTime>> = BTreeMap::new();
    for p in points {
        by_station.entry(p.code).or_default().push(p.time);
    }
    let mut deltas: Vec<f64> = Vec::new();
    for times in by_station.values_mut() {
        times.sort();
        deltas.extend(
            times
                .windows(2)
                .map(|w| (w[1] - w[0]).num_seconds() as f64 / 60.0),
        );
    }
    if deltas.is_empty() {
        return None;
    }
    deltas.sort_by(f64::total_cmp);
    Some(quantile(&deltas, 0.5))
}

/// Bucket each station's rows with `rule` and reduce them with `agg`.
///
/// Every bucket between a station's first and last one is emitted; buckets
/// without data carry `None` and are dropped later by [`Matrix::pivot`].
pub fn resample(points: &[Point], rule: Rule, agg: Aggregation) -> Vec<Point> {
    let mut by_station: BTreeMap<i64, BTreeMap<NaiveDateTime, Vec<Option<f64>>>> =
        BTreeMap::new();
    for p in points {
        by_station
            .entry(p.code)
            .or_default()
            .entry(rule.floor(p.time))
            .or_default()
            .push(p.value);
    }

    let step = if rule.step > Duration::zero() {
        rule.step
    } else {
        Duration::seconds(1)
    };
    let mut out = Vec::new();
    for (code, buckets) in by_station {
        let (Some(first), Some(last)) = (
            buckets.keys().next().copied(),
            buckets.keys().next_back().copied(),
        ) else {
            continue;
        };
        let mut time = first;
        while time <= last {
            let value = buckets.get(&time).and_then(|values| agg.apply(values));
            out.push(Point { time, code, value });
            time += step;
        }
    }
    out.sort_by_key(|p| (p.time, p.code));
    out
}

/// Durations printed as `0 days 03:00:00`.
pub fn format_delta(delta: Duration) -> String {
    let total = delta.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    format!(
        "{}{} days {:02}:{:02}:{:02}",
        sign,
        total / 86_400,
        (total % 86_400) / 3_600,
        (total % 3_600) / 60,
        total % 60
    )
}

/// Consecutive distinct times whose spacing differs from `expected`.
pub fn time_gaps(points: &[Point], expected: Duration) -> Vec<String> {
    let times: BTreeSet<NaiveDateTime> = points.iter().map(|p| p.time).collect();
    let times: Vec<NaiveDateTime> = times.into_iter().collect();
    times
        .windows(2)
        .filter(|w| w[1] - w[0] != expected)
        .map(|w| {
            format!(
                "gap={} between {} and {}",
                format_delta(w[1] - w[0]),
                w[0].format("%Y-%m-%d %H:%M:%S"),
                w[1].format("%Y-%m-%d %H:%M:%S")
            )
        })
        .collect()
}

/// Linear interpolation between closest ranks on sorted input.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Time × station grid written into the template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Matrix {
    pub times: Vec<NaiveDateTime>,
    pub codes: Vec<i64>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl Matrix {
    /// Pivot on `codes` (columns keep that order). Times where no listed
    /// station has a value are left out.
    pub fn pivot(points: &[Point], codes: &[i64]) -> Self {
        let column: HashMap<i64, usize> = codes.iter().enumerate().map(|(i, c)| (*c, i)).collect();
        let mut rows: BTreeMap<NaiveDateTime, Vec<Option<f64>>> = BTreeMap::new();
        for p in points {
            let (Some(col), Some(value)) = (column.get(&p.code), p.value) else {
                continue;
            };
            rows.entry(p.time).or_insert_with(|| vec![None; codes.len()])[*col] = Some(value);
        }
        let (times, values) = rows.into_iter().unzip();
        Matrix {
            times,
            codes: codes.to_vec(),
            values,
        }
    }

    pub fn missing_cells(&self) -> usize {
        self.values.iter().flatten().filter(|v| v.is_none()).count()
    }

    pub fn fill(&mut self, value: f64) {
        for cell in self.values.iter_mut().flatten() {
            cell.get_or_insert(value);
        }
    }

    /// `{prefix}_min/max/mean/p95/p99` over the present cells; with
    /// `with_zero_share` also the share of zero and positive cells.
    pub fn stats(&self, prefix: &str, with_zero_share: bool) -> Map<String, Value> {
        let mut present: Vec<f64> = self.values.iter().flatten().flatten().copied().collect();
        present.sort_by(f64::total_cmp);

        let mut stats = Map::new();
        stats.insert("output_rows".into(), json!(self.times.len()));
        stats.insert("output_station_columns".into(), json!(self.codes.len()));

        let mut put = |name: &str, value: Option<f64>| {
            stats.insert(format!("{}_{}", prefix, name), json!(value));
        };
        let any = !present.is_empty();
        put("min", present.first().copied());
        put("max", present.last().copied());
        put(
            "mean",
            any.then(|| present.iter().sum::<f64>() / present.len() as f64),
        );
        put("p95", any.then(|| quantile(&present, 0.95)));
        put("p99", any.then(|| quantile(&present, 0.99)));
        if with_zero_share {
            let share = |pred: fn(f64) -> bool| {
                any.then(|| {
                    present.iter().filter(|v| pred(**v)).count() as f64 * 100.0
                        / present.len() as f64
                })
            };
            put("zero_pct", share(|v| v == 0.0));
            put("non_zero_pct", share(|v| v > 0.0));
        }
        stats
    }
}

#[cfg(test)]
#[path = "series_tests.rs"]
mod series_tests;
