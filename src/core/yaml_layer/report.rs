//! Run summaries exported as `test-results.<ext>` next to the workspace.

use crate::core::{error::AppError, types::ErrorCategory};
use crate::core::yaml_layer::executor::{ExecutionCounts, ExecutionReport, StepOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Html,
    Text,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Html => "html",
            ReportFormat::Text => "txt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub checkpoint: String,
    pub position: u32,
    pub action: String,
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentReport {
    pub file: String,
    pub name: String,
    pub success: bool,
    pub duration_ms: i64,
    pub counts: ExecutionCounts,
    pub failures: Vec<StepFailure>,
}

impl DocumentReport {
    pub fn from_execution(file: &Path, name: &str, execution: &ExecutionReport) -> Self {
        let failures = execution
            .results
            .iter()
            .filter_map(|result| match &result.outcome {
                StepOutcome::Failed { error, .. } => Some(StepFailure {
                    checkpoint: result.checkpoint.clone(),
                    position: result.position,
                    action: result.action.to_string(),
                    source: result.source.clone(),
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect();
        Self {
            file: file.display().to_string(),
            name: name.to_string(),
            success: execution.is_success(),
            duration_ms: execution
                .finished_at
                .signed_duration_since(execution.started_at)
                .num_milliseconds(),
            counts: execution.counts.clone(),
            failures,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub passed: usize,
    pub failed: usize,
    pub documents: Vec<DocumentReport>,
}

impl RunReport {
    pub fn new(documents: Vec<DocumentReport>) -> Self {
        let passed = documents.iter().filter(|document| document.success).count();
        Self {
            generated_at: Utc::now(),
            passed,
            failed: documents.len() - passed,
            documents,
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, AppError> {
        match format {
            ReportFormat::Json => serde_json::to_string_pretty(self).map_err(|e| {
                AppError::new(
                    ErrorCategory::SerializationError,
                    format!("Failed to serialize run report: {}", e),
                )
                .with_code("REPORT-JSON-001")
            }),
            ReportFormat::Html => Ok(self.html()),
            ReportFormat::Text => Ok(self.text()),
        }
    }

    /// Write `test-results.<ext>` into `dir` and return its path.
    pub fn write(&self, format: ReportFormat, dir: &Path) -> Result<PathBuf, AppError> {
        let path = dir.join(format!("test-results.{}", format.extension()));
        let content = self.render(format)?;
        std::fs::write(&path, content).map_err(|e| {
            AppError::from(e)
                .with_code("REPORT-IO-001")
                .with_context("path", path.display().to_string())
        })?;
        tracing::info!(path = %path.display(), documents = self.documents.len(), "run report written");
        Ok(path)
    }

    fn text(&self) -> String {
        let mut report = String::new();
        report.push_str(&build_summary_section(self));
        for document in &self.documents {
            report.push_str(&build_document_section(document));
        }
        report
    }

    fn html(&self) -> String {
        let mut rows = String::new();
        for document in &self.documents {
            let status = if document.success { "passed" } else { "failed" };
            rows.push_str(&format!(
                "<tr class=\"{status}\"><td>{}</td><td>{}</td><td>{status}</td><td>{}</td><td>{}</td><td>{}</td><td>{} ms</td></tr>\n",
                escape_html(&document.file),
                escape_html(&document.name),
                document.counts.succeeded + document.counts.succeeded_no_identifier,
                document.counts.failed,
                document.counts.skipped,
                document.duration_ms,
            ));
            for failure in &document.failures {
                rows.push_str(&format!(
                    "<tr class=\"failure\"><td colspan=\"7\">{}#{} {} ({}): {}</td></tr>\n",
                    escape_html(&failure.checkpoint),
                    failure.position,
                    escape_html(&failure.action),
                    escape_html(&failure.source),
                    escape_html(&failure.error),
                ));
            }
        }
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>Stepline test results</title>\n\
<style>body{{font-family:sans-serif}}td,th{{padding:4px 8px;text-align:left}}.passed{{color:#1a7f37}}.failed,.failure{{color:#cf222e}}</style>\n\
</head>\n<body>\n<h1>Stepline test results</h1>\n<p>Generated {}: {} passed, {} failed</p>\n<table>\n\
<tr><th>File</th><th>Test</th><th>Status</th><th>Created</th><th>Failed</th><th>Skipped</th><th>Duration</th></tr>\n{}</table>\n</body>\n</html>\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.passed,
            self.failed,
            rows
        )
    }
}

fn build_summary_section(report: &RunReport) -> String {
    let mut section = String::new();
    section.push_str("=== Stepline Test Results ===\n\n");
    section.push_str(&format!(
        "Generated At: {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("Documents: {}\n", report.documents.len()));
    section.push_str(&format!("Passed: {}\n", report.passed));
    section.push_str(&format!("Failed: {}\n", report.failed));
    section
}

fn build_document_section(document: &DocumentReport) -> String {
    let mut section = String::new();
    section.push_str(&format!(
        "\n--- {} ({}) ---\n",
        document.name,
        document.file
    ));
    section.push_str(&format!(
        "Status: {}\n",
        if document.success { "passed" } else { "failed" }
    ));
    let counts = &document.counts;
    section.push_str(&format!(
        "Steps: {} created, {} without id, {} failed, {} skipped, {} not attempted\n",
        counts.succeeded,
        counts.succeeded_no_identifier,
        counts.failed,
        counts.skipped,
        counts.not_attempted
    ));
    section.push_str(&format!("Duration: {} ms\n", document.duration_ms));
    for failure in &document.failures {
        section.push_str(&format!(
            "  FAIL {}#{} {} at {}: {}\n",
            failure.checkpoint, failure.position, failure.action, failure.source, failure.error
        ));
    }
    section
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
