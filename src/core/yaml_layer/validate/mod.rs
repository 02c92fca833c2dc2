//! Layered validation of normalized test documents.
//!
//! Rules are grouped into four ordered layers. Every rule in a layer runs and
//! its issues are batched; a layer that produced errors stops the later layers,
//! since those assume the earlier invariants hold.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::actions::ActionRegistry;
use crate::core::yaml_layer::document::NormalizedDocument;
use crate::core::yaml_layer::expression::ExpressionEngine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub mod rules;
pub use rules::*;

/// Largest bound a single loop may expand to.
pub const MAX_LOOP_ITERATIONS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLayer {
    Schema,
    Semantic,
    CrossReference,
    BestPractice,
}

impl ValidationLayer {
    pub const ORDER: [ValidationLayer; 4] = [
        ValidationLayer::Schema,
        ValidationLayer::Semantic,
        ValidationLayer::CrossReference,
        ValidationLayer::BestPractice,
    ];
}

impl fmt::Display for ValidationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationLayer::Schema => write!(f, "schema"),
            ValidationLayer::Semantic => write!(f, "semantic"),
            ValidationLayer::CrossReference => write!(f, "cross-reference"),
            ValidationLayer::BestPractice => write!(f, "best-practice"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

impl IssueSeverity {
    fn rank(&self) -> u8 {
        match self {
            IssueSeverity::Error => 2,
            IssueSeverity::Warning => 1,
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueSeverity::Error => write!(f, "error"),
            IssueSeverity::Warning => write!(f, "warning"),
        }
    }
}

/// One finding with a stable code and the document path it applies to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub layer: ValidationLayer,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
}

impl ValidationIssue {
    pub fn error(
        layer: ValidationLayer,
        code: impl Into<String>,
        message: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            severity: IssueSeverity::Error,
            layer,
            message: message.into(),
            path: path.into(),
            suggestion: None,
            example: None,
        }
    }

    pub fn warning(
        code: impl Into<String>,
        message: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            ..Self::error(ValidationLayer::BestPractice, code, message, path)
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        let example = example.into();
        if !example.is_empty() {
            self.example = Some(example);
        }
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.severity, self.code, self.path, self.message
        )
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Layers that ran; later layers are absent when an earlier one failed.
    pub layers: Vec<ValidationLayer>,
}

impl ValidationReport {
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(self.warnings.iter())
    }

    /// Convert a failed report into the error surfaced to callers.
    pub fn into_error(self) -> AppError {
        let summary = self
            .errors
            .iter()
            .map(|issue| format!("[{}] {}: {}", issue.code, issue.path, issue.message))
            .collect::<Vec<_>>()
            .join("\n");
        let mut error = AppError::new(
            ErrorCategory::ValidationError,
            format!("document failed validation with {} error(s)", self.errors.len()),
        )
        .with_code("YAML-VAL-001")
        .with_context("issues", summary);
        if let Some(first) = self.errors.first() {
            error.add_context("path", &first.path);
            if let Some(suggestion) = &first.suggestion {
                error = error.with_suggestion(suggestion.clone());
            }
        }
        error
    }
}

/// Everything a rule may consult.
pub struct RuleContext<'a> {
    pub document: &'a NormalizedDocument,
    pub registry: &'a ActionRegistry,
    pub engine: &'a ExpressionEngine,
    pub env: &'a BTreeMap<String, String>,
}

/// Trait implemented by validation rules.
pub trait ValidationRule: Send + Sync {
    fn layer(&self) -> ValidationLayer;
    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue>;
}

/// Runs the built-in rules layer by layer.
pub struct Validator {
    registry: ActionRegistry,
    engine: ExpressionEngine,
    env: BTreeMap<String, String>,
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ActionRegistry::default())
    }
}

impl Validator {
    pub fn new(registry: ActionRegistry) -> Self {
        Self {
            registry,
            engine: ExpressionEngine::default(),
            env: BTreeMap::new(),
            rules: built_in_rules(),
        }
    }

    /// Environment snapshot used to check `${ENV:NAME}` references.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn validate(&self, document: &NormalizedDocument) -> ValidationReport {
        let ctx = RuleContext {
            document,
            registry: &self.registry,
            engine: &self.engine,
            env: &self.env,
        };
        let mut report = ValidationReport::default();
        for layer in ValidationLayer::ORDER {
            let mut issues: Vec<ValidationIssue> = self
                .rules
                .iter()
                .filter(|rule| rule.layer() == layer)
                .flat_map(|rule| rule.check(&ctx))
                .collect();
            report.layers.push(layer);
            let failed = issues
                .iter()
                .any(|issue| issue.severity == IssueSeverity::Error);
            for issue in issues.drain(..) {
                match issue.severity {
                    IssueSeverity::Error => report.errors.push(issue),
                    IssueSeverity::Warning => report.warnings.push(issue),
                }
            }
            if failed {
                tracing::debug!(layer = %layer, "validation stopped after failing layer");
                break;
            }
        }
        sort_issues(&mut report.errors);
        sort_issues(&mut report.warnings);
        report.ok = report.errors.is_empty();
        report
    }
}

/// Sort by `(severity desc, code asc, path asc)`.
fn sort_issues(issues: &mut [ValidationIssue]) {
    issues.sort_by(|a, b| {
        b.severity
            .rank()
            .cmp(&a.severity.rank())
            .then(a.code.cmp(&b.code))
            .then(a.path.cmp(&b.path))
    });
}
