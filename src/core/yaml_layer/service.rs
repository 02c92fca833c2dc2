#![allow(clippy::result_large_err)] // Every pipeline stage reports failures as AppError.

//! Read → detect → normalize → validate → compile, in one place.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::actions::ActionRegistry;
use crate::core::yaml_layer::compiler::{CompileContext, CompiledProgram, Compiler};
use crate::core::yaml_layer::convert::{convert, Conversion};
use crate::core::yaml_layer::detector::{detect, Detection, DetectorConfig};
use crate::core::yaml_layer::document::{Dialect, NormalizedDocument};
use crate::core::yaml_layer::normalizer::{load_tree, normalize};
use crate::core::yaml_layer::validate::{ValidationReport, Validator};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A document that made it through detection and normalization.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub source: Option<PathBuf>,
    /// Absent when the dialect was forced.
    pub detection: Option<Detection>,
    pub normalized: NormalizedDocument,
}

impl LoadedDocument {
    pub fn dialect(&self) -> Dialect {
        self.normalized.dialect
    }

    pub fn label(&self) -> String {
        self.source
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| self.normalized.document.name.clone())
    }
}

pub struct YamlLayer {
    detector: DetectorConfig,
    registry: ActionRegistry,
    env: BTreeMap<String, String>,
}

impl Default for YamlLayer {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl YamlLayer {
    pub fn new(detector: DetectorConfig) -> Self {
        Self {
            detector,
            registry: ActionRegistry::standard().clone(),
            env: std::env::vars().collect(),
        }
    }

    /// Replace the environment used for `${ENV:NAME}` references.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn read(path: &Path) -> Result<String, AppError> {
        std::fs::read_to_string(path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", path.display(), err),
            )
            .with_context("file", path.display().to_string())
        })
    }

    /// Score the document without deciding; callers show all scores.
    pub fn detect(&self, text: &str) -> Result<Detection, AppError> {
        let tree = load_tree(text)?;
        let detection = detect(&tree);
        tracing::debug!(
            dialect = %detection.dialect,
            confidence = detection.confidence,
            "dialect scores: {:?}",
            detection.scores
        );
        Ok(detection)
    }

    pub fn load(&self, text: &str, forced: Option<Dialect>) -> Result<LoadedDocument, AppError> {
        let tree = load_tree(text)?;
        let (dialect, detection) = match forced {
            Some(dialect) => (dialect, None),
            None => {
                let detection = detect(&tree);
                let dialect = detection.decide(&self.detector)?;
                (dialect, Some(detection))
            }
        };
        let normalized = normalize(&tree, dialect)?;
        Ok(LoadedDocument {
            source: None,
            detection,
            normalized,
        })
    }

    pub fn load_file(&self, path: &Path, forced: Option<Dialect>) -> Result<LoadedDocument, AppError> {
        let text = Self::read(path)?;
        let mut loaded = self.load(&text, forced).map_err(|mut err| {
            err.add_context("file", &path.display().to_string());
            err
        })?;
        loaded.source = Some(path.to_path_buf());
        Ok(loaded)
    }

    pub fn validate(&self, loaded: &LoadedDocument) -> ValidationReport {
        let report = Validator::new(self.registry.clone())
            .with_env(self.env.clone())
            .validate(&loaded.normalized);
        tracing::info!(
            document = %loaded.label(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "validation finished"
        );
        report
    }

    /// Validation errors stop compilation; warnings do not.
    pub fn compile(&self, loaded: &LoadedDocument, ctx: &CompileContext) -> Result<CompiledProgram, AppError> {
        let report = self.validate(loaded);
        if !report.ok {
            return Err(report.into_error());
        }
        let ctx = CompileContext {
            env: self.env.clone(),
            ..ctx.clone()
        };
        let program = Compiler::new(&self.registry, &ctx).compile(&loaded.normalized)?;
        tracing::info!(
            document = %loaded.label(),
            instructions = program.instructions.len(),
            digest = %program.digest,
            "compiled"
        );
        Ok(program)
    }

    pub fn convert(&self, loaded: &LoadedDocument, target: Dialect) -> Result<Conversion, AppError> {
        convert(&loaded.normalized, target)
    }
}
