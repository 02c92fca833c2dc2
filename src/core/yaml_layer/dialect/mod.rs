#![allow(clippy::result_large_err)] // Dialect parsers return AppError carrying the source path of the failure.

//! Per-dialect strategies mapping between the canonical tree and [`TestDocument`].

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::actions::{ActionKind, ActionRegistry};
use crate::core::yaml_layer::document::{
    ArgValue, Dialect, ForeachBlock, IfBlock, RepeatBlock, StepKind, StepNode, TestConfig,
    TestDocument, TryBlock, UseBlock,
};
use crate::core::yaml_layer::normalizer::{canonical_key_name, child_path, display_path};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use serde_yaml::{Mapping, Value as Yaml};
use std::time::Duration;

mod compact;
mod extended;
mod simplified;

pub use compact::CompactDialect;
pub use extended::ExtendedDialect;
pub use simplified::SimplifiedDialect;

/// Rendered document plus notes about information the dialect cannot express.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub value: Yaml,
    pub warnings: Vec<String>,
}

/// Strategy selected once per document by the detector.
pub trait DialectStrategy: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Map a canonical tree written in this dialect to the shared document.
    fn parse(&self, tree: &Value) -> Result<TestDocument, AppError>;

    /// Re-serialize a document in this dialect.
    fn render(&self, document: &TestDocument) -> Rendered;

    /// Render a single step, used for fix examples in diagnostics.
    fn render_step(&self, step: &StepNode) -> Yaml;

    fn description(&self) -> &'static str;

    fn example(&self) -> &'static str;
}

static COMPACT: CompactDialect = CompactDialect;
static SIMPLIFIED: SimplifiedDialect = SimplifiedDialect;
static EXTENDED: ExtendedDialect = ExtendedDialect;

pub fn strategy_for(dialect: Dialect) -> &'static dyn DialectStrategy {
    match dialect {
        Dialect::Compact => &COMPACT,
        Dialect::Simplified => &SIMPLIFIED,
        Dialect::Extended => &EXTENDED,
    }
}

/// Render one action step in `dialect` as a YAML snippet.
pub fn example_snippet(dialect: Dialect, kind: ActionKind, args: Vec<ArgValue>) -> String {
    let step = StepNode::new(StepNode::action(kind.name(), args), 1, "");
    let rendered = Yaml::Sequence(vec![strategy_for(dialect).render_step(&step)]);
    serde_yaml::to_string(&rendered)
        .map(|text| text.trim_end().to_string())
        .unwrap_or_default()
}

pub(crate) fn structure_error(path: &str, message: impl Into<String>) -> AppError {
    AppError::new(ErrorCategory::NormalizationError, message)
        .with_code("YAML-NORM-003")
        .with_context("path", display_path(path))
}

pub(crate) fn expect_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, AppError> {
    value
        .as_object()
        .ok_or_else(|| structure_error(path, format!("expected a mapping, found {}", kind_of(value))))
}

pub(crate) fn expect_array<'a>(value: &'a Value, path: &str) -> Result<&'a [Value], AppError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(&[]),
        other => Err(structure_error(
            path,
            format!("expected a list of steps, found {}", kind_of(other)),
        )),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Reject top-level fields the dialect does not define.
pub(crate) fn reject_unknown_fields(
    map: &Map<String, Value>,
    allowed: &[&str],
    dialect: Dialect,
    path: &str,
) -> Result<(), AppError> {
    let unknown: Vec<&str> = map
        .keys()
        .map(String::as_str)
        .filter(|key| !allowed.contains(key))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(AppError::new(
        ErrorCategory::NormalizationError,
        format!(
            "field(s) {} are not part of the {} dialect",
            unknown.join(", "),
            dialect
        ),
    )
    .with_code("YAML-NORM-007")
    .with_context("path", display_path(path))
    .with_suggestion(format!("Allowed fields: {}", allowed.join(", "))))
}

/// Scalar field rendered as a string; composite values are structural errors.
pub(crate) fn opt_string(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, AppError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(structure_error(
            &child_path(path, key),
            format!("expected a scalar, found {}", kind_of(other)),
        )),
    }
}

pub(crate) fn opt_bool(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<bool>, AppError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) if s == "true" || s == "false" => Ok(Some(s == "true")),
        Some(other) => Err(structure_error(
            &child_path(path, key),
            format!("expected true or false, found {}", kind_of(other)),
        )),
    }
}

pub(crate) fn opt_u64(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<u64>, AppError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            structure_error(
                &child_path(path, key),
                format!("expected a non-negative integer, found {}", n),
            )
        }),
        Some(other) => Err(structure_error(
            &child_path(path, key),
            format!("expected a non-negative integer, found {}", kind_of(other)),
        )),
    }
}

/// Millisecond timeout given as an integer or a humantime string such as `30s`.
pub(crate) fn opt_millis(
    map: &Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<u64>, AppError> {
    match map.get(key) {
        Some(Value::String(text)) => humantime::parse_duration(text)
            .map(|duration: Duration| Some(duration.as_millis() as u64))
            .map_err(|err| {
                structure_error(
                    &child_path(path, key),
                    format!("invalid duration '{}': {}", text, err),
                )
            }),
        _ => opt_u64(map, key, path),
    }
}

/// Variables given either as a mapping or as a list of `{name, value}` entries.
pub(crate) fn parse_variables(
    value: Option<&Value>,
    path: &str,
) -> Result<IndexMap<String, Value>, AppError> {
    let mut variables = IndexMap::new();
    match value {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (name, value) in map {
                variables.insert(name.clone(), value.clone());
            }
        }
        Some(Value::Array(entries)) => {
            for (index, entry) in entries.iter().enumerate() {
                let entry_path = format!("{}[{}]", path, index);
                let entry = expect_object(entry, &entry_path)?;
                let name = opt_string(entry, "name", &entry_path)?.ok_or_else(|| {
                    structure_error(&entry_path, "variable entry is missing 'name'")
                })?;
                if variables.contains_key(&name) {
                    return Err(AppError::new(
                        ErrorCategory::NormalizationError,
                        format!("variable '{}' is declared more than once", name),
                    )
                    .with_code("YAML-NORM-006")
                    .with_context("path", entry_path));
                }
                variables.insert(name, entry.get("value").cloned().unwrap_or(Value::Null));
            }
        }
        Some(other) => {
            return Err(structure_error(
                path,
                format!("variables must be a mapping or a list, found {}", kind_of(other)),
            ))
        }
    }
    Ok(variables)
}

/// Reusable blocks: `name -> [steps]`, each list parsed with the dialect's step parser.
pub(crate) fn parse_blocks<F>(
    value: Option<&Value>,
    path: &str,
    parse_steps: F,
) -> Result<IndexMap<String, Vec<StepNode>>, AppError>
where
    F: Fn(&Value, &str) -> Result<Vec<StepNode>, AppError>,
{
    let mut blocks = IndexMap::new();
    if let Some(value) = value {
        if value.is_null() {
            return Ok(blocks);
        }
        for (name, steps) in expect_object(value, path)? {
            let block_path = child_path(path, name);
            blocks.insert(name.clone(), parse_steps(steps, &block_path)?);
        }
    }
    Ok(blocks)
}

/// The single key of a step mapping; zero or several keys are structural errors.
pub(crate) fn single_entry<'a>(
    map: &'a Map<String, Value>,
    path: &str,
) -> Result<(&'a str, &'a Value), AppError> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => Ok((key.as_str(), value)),
        (None, _) => Err(AppError::new(
            ErrorCategory::NormalizationError,
            "step is empty; each step must name exactly one action",
        )
        .with_code("YAML-NORM-004")
        .with_context("path", display_path(path))),
        (Some(_), Some(_)) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            Err(AppError::new(
                ErrorCategory::NormalizationError,
                format!(
                    "step must contain exactly one action; found {}",
                    keys.join(", ")
                ),
            )
            .with_code("YAML-NORM-004")
            .with_context("path", display_path(path))
            .with_suggestion("Split the step into one list entry per action"))
        }
    }
}

/// `{key: value}` with exactly one pair, used by compact selector forms.
pub(crate) fn single_pair(value: &Value) -> Option<(&str, &Value)> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    map.iter().next().map(|(key, value)| (key.as_str(), value))
}

pub(crate) fn arg(value: &Value) -> Option<ArgValue> {
    ArgValue::from_json(value)
}

pub(crate) fn args_of(values: &[&Value]) -> Vec<ArgValue> {
    values.iter().filter_map(|value| arg(value)).collect()
}

/// `"x,y"` pairs used by scroll and mouse positions.
pub(crate) fn parse_coordinates(text: &str) -> Option<(i64, i64)> {
    let (x, y) = text.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

pub(crate) fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

/// Generic `{action-name: scalar | {param: value}}` form shared by every dialect.
pub(crate) fn generic_action(name: &str, value: &Value) -> StepKind {
    let Some(kind) = ActionKind::from_alias(name) else {
        return StepNode::action(name, arg(value).into_iter().collect());
    };
    let args = match value {
        Value::Object(fields) => {
            let mut args = Vec::new();
            if let Some(handler) = ActionRegistry::standard().get(kind) {
                for param in handler.params() {
                    match fields.get(param.name).and_then(arg) {
                        Some(value) => args.push(value),
                        None => break,
                    }
                }
            }
            args
        }
        other => arg(other).into_iter().collect(),
    };
    StepNode::action(kind.name(), args)
}

/// Generic rendering: a scalar for one argument, a `{param: value}` map otherwise.
pub(crate) fn render_generic(kind: ActionKind, args: &[ArgValue]) -> Yaml {
    let body = match args {
        [single] => arg_to_yaml(single),
        _ => {
            let mut fields = Mapping::new();
            if let Some(handler) = ActionRegistry::standard().get(kind) {
                for (param, value) in handler.params().iter().zip(args) {
                    fields.insert(ystr(param.name), arg_to_yaml(value));
                }
            }
            Yaml::Mapping(fields)
        }
    };
    ymap(vec![(kind.name(), body)])
}

pub(crate) fn ystr(text: &str) -> Yaml {
    Yaml::String(text.to_string())
}

pub(crate) fn ymap(entries: Vec<(&str, Yaml)>) -> Yaml {
    let mut mapping = Mapping::new();
    for (key, value) in entries {
        mapping.insert(ystr(key), value);
    }
    Yaml::Mapping(mapping)
}

pub(crate) fn arg_to_yaml(value: &ArgValue) -> Yaml {
    match value {
        ArgValue::Flag(b) => Yaml::Bool(*b),
        ArgValue::Number(n) => Yaml::Number((*n).into()),
        ArgValue::Text(s) => Yaml::String(s.clone()),
    }
}

pub(crate) fn json_to_yaml(value: &Value) -> Yaml {
    serde_yaml::to_value(value).unwrap_or(Yaml::Null)
}

pub(crate) fn variables_to_yaml(variables: &IndexMap<String, Value>) -> Yaml {
    let mut mapping = Mapping::new();
    for (name, value) in variables {
        mapping.insert(ystr(name), json_to_yaml(value));
    }
    Yaml::Mapping(mapping)
}

/// Push `key: value` only when the value is present.
pub(crate) fn push_opt(mapping: &mut Mapping, key: &str, value: Option<&String>) {
    if let Some(value) = value {
        mapping.insert(ystr(key), ystr(value));
    }
}

/// Full `config` mapping shared by the simplified and extended dialects.
pub(crate) fn parse_config(value: Option<&Value>, path: &str) -> Result<TestConfig, AppError> {
    let Some(value) = value.filter(|value| !value.is_null()) else {
        return Ok(TestConfig::default());
    };
    let map = expect_object(value, path)?;
    Ok(TestConfig {
        continue_on_error: opt_bool(map, "continue_on_error", path)?,
        timeout_ms: opt_millis(map, "timeout", path)?,
        retry: opt_u64(map, "retry", path)?.map(|n| n.min(u32::MAX as u64) as u32),
        screenshot_on_failure: opt_bool(map, "screenshot_on_failure", path)?,
        viewport: opt_string(map, "viewport", path)?,
        output_format: opt_string(map, "output_format", path)?,
    })
}

pub(crate) fn render_config(config: &TestConfig) -> Option<Yaml> {
    if config.is_empty() {
        return None;
    }
    let mut mapping = Mapping::new();
    if let Some(flag) = config.continue_on_error {
        mapping.insert(ystr("continue_on_error"), Yaml::Bool(flag));
    }
    if let Some(timeout) = config.timeout_ms {
        mapping.insert(ystr("timeout"), Yaml::Number(timeout.into()));
    }
    if let Some(retry) = config.retry {
        mapping.insert(ystr("retry"), Yaml::Number(u64::from(retry).into()));
    }
    if let Some(flag) = config.screenshot_on_failure {
        mapping.insert(ystr("screenshot_on_failure"), Yaml::Bool(flag));
    }
    push_opt(&mut mapping, "viewport", config.viewport.as_ref());
    push_opt(&mut mapping, "output_format", config.output_format.as_ref());
    Some(Yaml::Mapping(mapping))
}

/// Control constructs spelled the same way by the simplified and extended dialects.
pub(crate) struct ControlFields<'a> {
    pub map: &'a Map<String, Value>,
    pub path: &'a str,
}

impl<'a> ControlFields<'a> {
    pub fn if_block<F>(&self, parse_steps: &F) -> Result<StepKind, AppError>
    where
        F: Fn(&Value, &str) -> Result<Vec<StepNode>, AppError>,
    {
        Ok(StepKind::If(IfBlock {
            condition: opt_string(self.map, "condition", self.path)?.unwrap_or_default(),
            then: self.steps("then", parse_steps)?,
            otherwise: self.steps("else", parse_steps)?,
        }))
    }

    pub fn repeat_block<F>(&self, parse_steps: &F) -> Result<StepKind, AppError>
    where
        F: Fn(&Value, &str) -> Result<Vec<StepNode>, AppError>,
    {
        Ok(StepKind::Repeat(RepeatBlock {
            times: self.map.get("times").cloned().unwrap_or(Value::Null),
            var: opt_string(self.map, "as", self.path)?,
            until: opt_string(self.map, "until", self.path)?,
            steps: self.steps("steps", parse_steps)?,
        }))
    }

    pub fn foreach_block<F>(&self, parse_steps: &F) -> Result<StepKind, AppError>
    where
        F: Fn(&Value, &str) -> Result<Vec<StepNode>, AppError>,
    {
        Ok(StepKind::Foreach(ForeachBlock {
            over: self.map.get("over").cloned().unwrap_or(Value::Null),
            var: opt_string(self.map, "as", self.path)?.unwrap_or_else(|| "item".to_string()),
            max: self.map.get("max").cloned(),
            until: opt_string(self.map, "until", self.path)?,
            steps: self.steps("steps", parse_steps)?,
        }))
    }

    pub fn try_block<F>(&self, parse_steps: &F) -> Result<StepKind, AppError>
    where
        F: Fn(&Value, &str) -> Result<Vec<StepNode>, AppError>,
    {
        Ok(StepKind::Try(TryBlock {
            steps: self.steps("steps", parse_steps)?,
            catch: self.steps("catch", parse_steps)?,
        }))
    }

    fn steps<F>(&self, key: &str, parse_steps: &F) -> Result<Vec<StepNode>, AppError>
    where
        F: Fn(&Value, &str) -> Result<Vec<StepNode>, AppError>,
    {
        match self.map.get(key) {
            Some(value) => parse_steps(value, &child_path(self.path, key)),
            None => Ok(Vec::new()),
        }
    }
}

pub(crate) fn use_block(name: Option<String>) -> StepKind {
    StepKind::Use(UseBlock {
        block: name.unwrap_or_default(),
    })
}

/// Control blocks rendered with the shared simplified/extended field names.
pub(crate) fn render_control_fields<F>(kind: &StepKind, render_steps: &F) -> Vec<(&'static str, Yaml)>
where
    F: Fn(&[StepNode]) -> Yaml,
{
    let mut fields = Vec::new();
    match kind {
        StepKind::If(block) => {
            fields.push(("condition", ystr(&block.condition)));
            fields.push(("then", render_steps(&block.then)));
            if !block.otherwise.is_empty() {
                fields.push(("else", render_steps(&block.otherwise)));
            }
        }
        StepKind::Repeat(block) => {
            fields.push(("times", json_to_yaml(&block.times)));
            if let Some(var) = &block.var {
                fields.push(("as", ystr(var)));
            }
            if let Some(until) = &block.until {
                fields.push(("until", ystr(until)));
            }
            fields.push(("steps", render_steps(&block.steps)));
        }
        StepKind::Foreach(block) => {
            fields.push(("over", json_to_yaml(&block.over)));
            fields.push(("as", ystr(&block.var)));
            if let Some(max) = &block.max {
                fields.push(("max", json_to_yaml(max)));
            }
            if let Some(until) = &block.until {
                fields.push(("until", ystr(until)));
            }
            fields.push(("steps", render_steps(&block.steps)));
        }
        StepKind::Try(block) => {
            fields.push(("steps", render_steps(&block.steps)));
            if !block.catch.is_empty() {
                fields.push(("catch", render_steps(&block.catch)));
            }
        }
        StepKind::Use(_) | StepKind::Action(_) => {}
    }
    fields
}

/// Number each parsed step by its declaration order.
pub(crate) fn parse_step_list<F>(value: &Value, path: &str, parse_step: F) -> Result<Vec<StepNode>, AppError>
where
    F: Fn(&Value, &str) -> Result<StepKind, AppError>,
{
    let items = expect_array(value, path)?;
    let mut steps = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let step_path = format!("{}[{}]", path, index);
        let kind = canonicalize_keys(parse_step(item, &step_path)?);
        steps.push(StepNode::new(kind, index + 1, step_path));
    }
    Ok(steps)
}

/// Named keys are stored in one spelling whatever the author wrote.
fn canonicalize_keys(mut kind: StepKind) -> StepKind {
    if let StepKind::Action(call) = &mut kind {
        if call.name == ActionKind::Key.name() {
            if let Some(ArgValue::Text(key)) = call.args.first_mut() {
                *key = canonical_key_name(key);
            }
        }
    }
    kind
}

pub(crate) fn call(kind: ActionKind, args: Vec<ArgValue>) -> StepKind {
    StepNode::action(kind.name(), args)
}

/// `{selector: value}` as two arguments; any other shape is taken as one scalar.
pub(crate) fn pair_args(value: &Value) -> Vec<ArgValue> {
    match single_pair(value) {
        Some((key, inner)) => {
            let mut args = vec![ArgValue::text(key)];
            args.extend(arg(inner));
            args
        }
        None => args_of(&[value]),
    }
}

/// Renumber a list after steps were inserted or merged.
pub(crate) fn renumber(steps: &mut [StepNode]) {
    for (index, step) in steps.iter_mut().enumerate() {
        step.raw_position = index + 1;
    }
}

/// Standard `setup` / `main` / `teardown` layout check used by every renderer.
pub(crate) fn is_sectioned(document: &TestDocument) -> bool {
    let names: Vec<&str> = document.checkpoints.iter().map(|cp| cp.name.as_str()).collect();
    let sectioned = matches!(
        names.as_slice(),
        ["main"] | ["setup", "main"] | ["main", "teardown"] | ["setup", "main", "teardown"]
    );
    sectioned && document.checkpoints.iter().all(|cp| cp.variables.is_empty())
}

pub const SETUP: &str = "setup";
pub const MAIN: &str = "main";
pub const TEARDOWN: &str = "teardown";
