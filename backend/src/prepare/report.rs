//! Run reports and the per-run log file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::error::PrepareResult;

#[derive(Debug, Clone, Serialize)]
pub struct TimeQuality {
    pub expected_step: String,
    pub gap_count: usize,
    pub gaps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_file: String,
    pub template_file: String,
    pub output_file: String,
    pub log_file: String,
    pub input_stats: Map<String, Value>,
    pub mapping_stats: Map<String, Value>,
    pub cleaning_stats: Map<String, Value>,
    pub output_stats: Map<String, Value>,
    pub time_quality: TimeQuality,
    pub warnings: Vec<String>,
    pub strict_mode: bool,
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(render_value).collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}

fn section(lines: &mut Vec<String>, title: &str, stats: &Map<String, Value>) {
    lines.push(String::new());
    lines.push(title.to_string());
    for (key, value) in stats {
        lines.push(format!("- {}: {}", key, render_value(value)));
    }
}

impl Report {
    /// Plain-text rendering; stats keys come out sorted.
    pub fn to_text(&self, title: &str) -> String {
        let mut lines = vec![
            format!("Transformation Report - {}", title),
            format!("run_id: {}", self.run_id),
        ];
        if let Some(model) = &self.model {
            lines.push(format!("model: {}", model));
        }
        lines.push(format!("input_file: {}", self.input_file));
        lines.push(format!("template_file: {}", self.template_file));
        lines.push(format!("output_file: {}", self.output_file));

        section(&mut lines, "Input Stats", &self.input_stats);
        section(&mut lines, "Mapping Stats", &self.mapping_stats);
        section(&mut lines, "Cleaning Stats", &self.cleaning_stats);
        section(&mut lines, "Output Stats", &self.output_stats);

        lines.push(String::new());
        lines.push("Time Quality".to_string());
        lines.push(format!("- expected_step: {}", self.time_quality.expected_step));
        lines.push(format!("- gap_count: {}", self.time_quality.gap_count));
        lines.extend(self.time_quality.gaps.iter().map(|g| format!("  * {}", g)));

        lines.push(String::new());
        lines.push("Warnings".to_string());
        if self.warnings.is_empty() {
            lines.push("- none".to_string());
        } else {
            lines.extend(self.warnings.iter().map(|w| format!("- {}", w)));
        }
        lines.join("\n") + "\n"
    }

    pub fn write(&self, json_path: &Path, txt_path: &Path, title: &str) -> PrepareResult<()> {
        std::fs::write(json_path, serde_json::to_string_pretty(self)?)?;
        std::fs::write(txt_path, self.to_text(title))?;
        Ok(())
    }
}

/// Lines for the run log file, mirrored to the `log` facade as they come.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, level: &str, message: &str) {
        let now: DateTime<Utc> = Utc::now();
        self.lines.push(format!(
            "{} [{}] {}",
            now.format("%Y-%m-%d %H:%M:%S,%3f"),
            level,
            message
        ));
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        log::info!("{}", message.as_ref());
        self.push("INFO", message.as_ref());
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        log::warn!("{}", message.as_ref());
        self.push("WARNING", message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        log::error!("{}", message.as_ref());
        self.push("ERROR", message.as_ref());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn save(&self, path: &Path) -> PrepareResult<PathBuf> {
        let mut text = self.lines.join("\n");
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(path.to_path_buf())
    }
}
