#![allow(clippy::result_large_err)] // Normalizer returns AppError so the offending document path travels with the failure.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::dialect::strategy_for;
use crate::core::yaml_layer::document::{Dialect, NormalizedDocument};
use serde_json::{Map, Number, Value};

/// Parse raw YAML text into the decoder's generic value tree.
pub fn parse_yaml(text: &str) -> Result<serde_yaml::Value, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::new(ErrorCategory::NormalizationError, "test document is empty")
            .with_code("YAML-NORM-005"));
    }
    serde_yaml::from_str(text).map_err(|err| {
        let mut error = AppError::new(
            ErrorCategory::NormalizationError,
            format!("failed to parse YAML: {}", err),
        )
        .with_code("YAML-NORM-005");
        if let Some(location) = err.location() {
            error.add_context(
                "path",
                &format!("line {}, column {}", location.line(), location.column()),
            );
        }
        error
    })
}

/// Convert the generic YAML tree into a strictly string-keyed JSON tree.
///
/// Scalar keys (numbers, booleans, null) are stringified; sequence or mapping
/// keys are rejected with the path of the map that holds them.
pub fn to_canonical_tree(value: &serde_yaml::Value) -> Result<Value, AppError> {
    convert(value, "")
}

fn convert(value: &serde_yaml::Value, path: &str) -> Result<Value, AppError> {
    match value {
        serde_yaml::Value::Null => Ok(Value::Null),
        serde_yaml::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_yaml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::Number(Number::from(u)))
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        AppError::new(
                            ErrorCategory::NormalizationError,
                            format!("number {} has no JSON representation", n),
                        )
                        .with_code("YAML-NORM-002")
                        .with_context("path", display_path(path))
                    })
            }
        }
        serde_yaml::Value::String(s) => Ok(Value::String(s.clone())),
        serde_yaml::Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                out.push(convert(item, &format!("{}[{}]", path, index))?);
            }
            Ok(Value::Array(out))
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = Map::new();
            for (key, item) in mapping {
                let key = stringify_key(key, path)?;
                let child = child_path(path, &key);
                if out.contains_key(&key) {
                    return Err(AppError::new(
                        ErrorCategory::NormalizationError,
                        format!("key '{}' appears more than once after stringification", key),
                    )
                    .with_code("YAML-NORM-001")
                    .with_context("path", display_path(path)));
                }
                let converted = convert(item, &child)?;
                out.insert(key, converted);
            }
            Ok(Value::Object(out))
        }
        serde_yaml::Value::Tagged(tagged) => convert(&tagged.value, path),
    }
}

fn stringify_key(key: &serde_yaml::Value, path: &str) -> Result<String, AppError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok("null".to_string()),
        serde_yaml::Value::Tagged(tagged) => stringify_key(&tagged.value, path),
        serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => Err(AppError::new(
            ErrorCategory::NormalizationError,
            "mapping keys must be scalars; found a sequence or mapping used as a key",
        )
        .with_code("YAML-NORM-001")
        .with_context("path", display_path(path))
        .with_suggestion("Quote the key or move the structure into the value")),
    }
}

/// Normalize a canonical tree written in `dialect` into the shared document shape.
pub fn normalize(raw: &Value, dialect: Dialect) -> Result<NormalizedDocument, AppError> {
    let document = strategy_for(dialect).parse(raw)?;
    Ok(NormalizedDocument { dialect, document })
}

/// Convenience wrapper: YAML text straight to the canonical tree.
pub fn load_tree(text: &str) -> Result<Value, AppError> {
    to_canonical_tree(&parse_yaml(text)?)
}

pub(crate) fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

pub(crate) fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

/// Canonical spelling for named keyboard keys; unknown names pass through.
pub fn canonical_key_name(name: &str) -> String {
    let mapped = match name.trim().to_ascii_lowercase().as_str() {
        "enter" | "return" => "Enter",
        "esc" | "escape" => "Escape",
        "tab" => "Tab",
        "space" => "Space",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "up" | "arrowup" => "ArrowUp",
        "down" | "arrowdown" => "ArrowDown",
        "left" | "arrowleft" => "ArrowLeft",
        "right" | "arrowright" => "ArrowRight",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        _ => return name.to_string(),
    };
    mapped.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringifies_scalar_keys() {
        let tree = load_tree("data:\n  1: one\n  true: yes\n  ~: nothing\n").expect("tree");
        assert_eq!(
            tree,
            json!({"data": {"1": "one", "true": "yes", "null": "nothing"}})
        );
    }

    #[test]
    fn rejects_mapping_keys_with_path() {
        let err = load_tree("checkpoints:\n  - steps:\n      - ? [a, b]\n        : click\n")
            .expect_err("complex key");
        assert_eq!(err.code, "YAML-NORM-001");
        assert_eq!(err.path(), Some("checkpoints[0].steps[0]"));
    }

    #[test]
    fn rejects_keys_that_collide_after_stringification() {
        let err = load_tree("data:\n  1: a\n  \"1\": b\n").expect_err("collision");
        assert_eq!(err.code, "YAML-NORM-001");
        assert_eq!(err.path(), Some("data"));
    }

    #[test]
    fn empty_documents_are_rejected() {
        let err = parse_yaml("   \n").expect_err("empty");
        assert_eq!(err.code, "YAML-NORM-005");
    }

    #[test]
    fn key_names_are_canonicalized() {
        assert_eq!(canonical_key_name("enter"), "Enter");
        assert_eq!(canonical_key_name("ESC"), "Escape");
        assert_eq!(canonical_key_name("down"), "ArrowDown");
        assert_eq!(canonical_key_name("F5"), "F5");
    }
}
