use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::template::strip_braces;
use regex::Regex;
use rhai::{Array, Dynamic, Engine, Map, Scope, AST};
use serde_json::{Map as JsonMap, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

const KEYWORDS: &[&str] = &[
    "true", "false", "if", "else", "in", "let", "const", "fn", "return", "switch", "while",
    "loop", "for", "do", "until", "this", "is",
];

/// Condition evaluation engine using a locked-down Rhai configuration.
///
/// Conditions may reference variables either bare (`total > 10`) or as
/// template tokens (`{{total}} > 10`); both forms compile to the same script.
pub struct ExpressionEngine {
    engine: Engine,
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        let mut engine = Engine::new_raw();
        engine.set_max_operations(50_000);
        engine.set_max_call_levels(64);
        engine.set_max_expr_depths(64, 64);
        engine.on_print(|_| {});
        engine.on_debug(|_, _, _| {});
        ExpressionEngine { engine }
    }
}

impl ExpressionEngine {
    /// Condition text as handed to Rhai.
    pub fn prepare(expr: &str) -> String {
        strip_braces(expr)
    }

    /// Compile the given condition into an AST.
    pub fn compile(&self, expr: &str) -> Result<AST, AppError> {
        self.engine.compile(Self::prepare(expr)).map_err(|err| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("invalid condition '{}': {}", expr, err),
            )
            .with_code("YAML-EXPR-001")
        })
    }

    /// Root identifiers referenced by the condition, string literals excluded.
    pub fn identifiers(expr: &str) -> BTreeSet<String> {
        static LITERALS: OnceLock<Regex> = OnceLock::new();
        static IDENTS: OnceLock<Regex> = OnceLock::new();
        let literals = LITERALS.get_or_init(|| {
            Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`[^`]*`"#).expect("literal pattern is valid")
        });
        let idents = IDENTS.get_or_init(|| {
            Regex::new(r"(?P<dot>\.)?\b(?P<name>[A-Za-z_][A-Za-z0-9_]*)\b(?P<call>\s*\()?")
                .expect("identifier pattern is valid")
        });
        let prepared = Self::prepare(expr);
        let stripped = literals.replace_all(&prepared, " ");
        idents
            .captures_iter(&stripped)
            .filter(|captures| captures.name("dot").is_none() && captures.name("call").is_none())
            .filter_map(|captures| captures.name("name").map(|name| name.as_str().to_string()))
            .filter(|name| !KEYWORDS.contains(&name.as_str()))
            .collect()
    }

    /// Evaluate a condition that must produce a boolean.
    pub fn evaluate_bool(&self, expr: &str, bindings: &BTreeMap<String, Value>) -> Result<bool, AppError> {
        match self.evaluate(expr, bindings)? {
            Value::Bool(result) => Ok(result),
            other => Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("condition '{}' evaluated to {} instead of a boolean", expr, other),
            )
            .with_code("YAML-EXPR-002")),
        }
    }

    /// Evaluate the given condition with every binding pushed into scope.
    pub fn evaluate(&self, expr: &str, bindings: &BTreeMap<String, Value>) -> Result<Value, AppError> {
        let mut scope = Scope::new();
        for (name, value) in bindings {
            scope.push_dynamic(name.as_str(), to_dynamic(value));
        }

        let result = self
            .engine
            .eval_with_scope::<Dynamic>(&mut scope, &Self::prepare(expr))
            .map_err(|err| {
                AppError::new(
                    ErrorCategory::ValidationError,
                    format!("failed to evaluate condition '{}': {}", expr, err),
                )
                .with_code("YAML-EXPR-001")
            })?;
        Ok(from_dynamic(result))
    }
}

fn to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::from(0_i64)
            }
        }
        // Captured text that looks numeric compares as a number.
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => Dynamic::from(i),
            Err(_) => Dynamic::from(s.clone()),
        },
        Value::Array(items) => {
            let mut arr = Array::new();
            for item in items {
                arr.push(to_dynamic(item));
            }
            Dynamic::from_array(arr)
        }
        Value::Object(map) => {
            let mut rhai_map = Map::new();
            for (key, value) in map {
                rhai_map.insert(key.into(), to_dynamic(value));
            }
            Dynamic::from_map(rhai_map)
        }
    }
}

fn from_dynamic(value: Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Some(b) = value.clone().try_cast::<bool>() {
        return Value::Bool(b);
    }
    if let Some(i) = value.clone().try_cast::<i64>() {
        return Value::Number(Number::from(i));
    }
    if let Some(f) = value.clone().try_cast::<f64>() {
        if let Some(num) = Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    if let Some(s) = value.clone().try_cast::<String>() {
        return Value::String(s);
    }
    if let Some(arr) = value.clone().try_cast::<Array>() {
        return Value::Array(arr.into_iter().map(from_dynamic).collect());
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let mut json_map = JsonMap::new();
        for (key, value) in map {
            json_map.insert(key.into(), from_dynamic(value));
        }
        return Value::Object(json_map);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_tokens_and_bare_names_evaluate_alike() {
        let engine = ExpressionEngine::default();
        let mut bindings = BTreeMap::new();
        bindings.insert("total".to_string(), json!(12));
        assert!(engine.evaluate_bool("{{total}} > 10", &bindings).expect("eval"));
        assert!(engine.evaluate_bool("total > 10", &bindings).expect("eval"));
    }

    #[test]
    fn captured_numeric_text_compares_as_number() {
        let engine = ExpressionEngine::default();
        let mut bindings = BTreeMap::new();
        bindings.insert("count".to_string(), json!("3"));
        assert!(!engine.evaluate_bool("count > 5", &bindings).expect("eval"));
    }

    #[test]
    fn identifiers_skip_literals_fields_and_keywords() {
        let names = ExpressionEngine::identifiers("{{user.role}} == \"admin\" && enabled == true");
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["enabled".to_string(), "user".to_string()]
        );
    }

    #[test]
    fn non_boolean_results_are_rejected() {
        let engine = ExpressionEngine::default();
        let err = engine
            .evaluate_bool("1 + 1", &BTreeMap::new())
            .expect_err("not a bool");
        assert_eq!(err.code, "YAML-EXPR-002");
    }

    #[test]
    fn syntax_errors_are_reported_at_compile_time() {
        let engine = ExpressionEngine::default();
        assert!(engine.compile("total >").is_err());
        assert!(engine.compile("{{total}} >= 3").is_ok());
    }
}
