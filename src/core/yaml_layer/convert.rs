#![allow(clippy::result_large_err)] // Conversion shares AppError with the rest of the pipeline.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::dialect::strategy_for;
use crate::core::yaml_layer::document::{Dialect, NormalizedDocument};
use serde::Serialize;

/// A document re-serialized in another dialect.
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub from: Dialect,
    pub dialect: Dialect,
    pub yaml: String,
    /// Fields the target dialect cannot carry; they were dropped or merged.
    pub warnings: Vec<String>,
}

pub fn convert(document: &NormalizedDocument, target: Dialect) -> Result<Conversion, AppError> {
    let rendered = strategy_for(target).render(&document.document);
    let yaml = serde_yaml::to_string(&rendered.value).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to serialize {} document: {}", target, err),
        )
        .with_code("YAML-CONV-001")
    })?;
    for warning in &rendered.warnings {
        tracing::warn!(from = %document.dialect, to = %target, "{}", warning);
    }
    Ok(Conversion {
        from: document.dialect,
        dialect: target,
        yaml,
        warnings: rendered.warnings,
    })
}
