use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// YAML dialects accepted by the test-definition layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Compact,
    Simplified,
    Extended,
}

impl Dialect {
    pub const ALL: [Dialect; 3] = [Dialect::Compact, Dialect::Simplified, Dialect::Extended];

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Compact => "compact",
            Dialect::Simplified => "simplified",
            Dialect::Extended => "extended",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Dialect::Compact),
            "simplified" | "simple" => Ok(Dialect::Simplified),
            "extended" => Ok(Dialect::Extended),
            other => Err(format!(
                "unknown dialect '{}'; supported values are compact, simplified, extended",
                other
            )),
        }
    }
}

/// Typed positional argument of an action call.
///
/// The interpretation (selector, URL, duration, ...) comes from the action
/// signature in [`crate::core::yaml_layer::actions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Flag(bool),
    Number(i64),
    Text(String),
}

impl ArgValue {
    pub fn text<T: Into<String>>(value: T) -> Self {
        ArgValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArgValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert a scalar JSON value. Composite values and null have no argument form.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ArgValue::Flag(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ArgValue::Number(i)),
                None => Some(ArgValue::Text(n.to_string())),
            },
            Value::String(s) => Some(ArgValue::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Flag(b) => Value::Bool(*b),
            ArgValue::Number(n) => Value::from(*n),
            ArgValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Flag(b) => write!(f, "{}", b),
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::Text(s) => f.write_str(s),
        }
    }
}

/// Project/goal/journey/checkpoint the document starts from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartingContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}

impl StartingContext {
    pub fn is_empty(&self) -> bool {
        self == &StartingContext::default()
    }
}

/// Per-document execution settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_on_failure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
}

impl TestConfig {
    pub fn is_empty(&self) -> bool {
        self == &TestConfig::default()
    }
}

/// Dialect-independent representation of one test file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "StartingContext::is_empty")]
    pub starting_context: StartingContext,
    #[serde(default, skip_serializing_if = "TestConfig::is_empty")]
    pub config: TestConfig,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub blocks: IndexMap<String, Vec<StepNode>>,
    pub checkpoints: Vec<CheckpointBlock>,
}

impl TestDocument {
    /// Every step list in the document: checkpoints first, then blocks.
    pub fn step_lists(&self) -> impl Iterator<Item = &[StepNode]> {
        self.checkpoints
            .iter()
            .map(|cp| cp.steps.as_slice())
            .chain(self.blocks.values().map(|steps| steps.as_slice()))
    }

    pub fn step_count(&self) -> usize {
        let mut count = 0;
        for steps in self.step_lists() {
            visit_steps(steps, &mut |_| count += 1);
        }
        count
    }
}

/// Named group of steps bound to one remote checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointBlock {
    pub name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, Value>,
    pub steps: Vec<StepNode>,
}

impl CheckpointBlock {
    pub fn new<T: Into<String>>(name: T, steps: Vec<StepNode>) -> Self {
        Self {
            name: name.into(),
            variables: IndexMap::new(),
            steps,
        }
    }
}

/// One logical step. Equality ignores `path`, which only locates the step in its source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepNode {
    #[serde(flatten)]
    pub kind: StepKind,
    pub raw_position: usize,
    #[serde(skip)]
    pub path: String,
}

impl PartialEq for StepNode {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.raw_position == other.raw_position
    }
}

impl StepNode {
    pub fn new(kind: StepKind, raw_position: usize, path: impl Into<String>) -> Self {
        Self {
            kind,
            raw_position,
            path: path.into(),
        }
    }

    pub fn action<T: Into<String>>(name: T, args: Vec<ArgValue>) -> StepKind {
        StepKind::Action(ActionCall {
            name: name.into(),
            args,
        })
    }

    /// Nested step lists owned by a control construct, with their path suffixes.
    pub fn children(&self) -> Vec<(&'static str, &[StepNode])> {
        match &self.kind {
            StepKind::Action(_) | StepKind::Use(_) => Vec::new(),
            StepKind::If(block) => vec![("then", &block.then), ("else", &block.otherwise)],
            StepKind::Repeat(block) => vec![("steps", &block.steps)],
            StepKind::Foreach(block) => vec![("steps", &block.steps)],
            StepKind::Try(block) => vec![("steps", &block.steps), ("catch", &block.catch)],
        }
    }
}

/// Walk a step list depth-first in document order.
pub fn visit_steps<'a>(steps: &'a [StepNode], visitor: &mut dyn FnMut(&'a StepNode)) {
    for step in steps {
        visitor(step);
        for (_, nested) in step.children() {
            visit_steps(nested, visitor);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Action(ActionCall),
    If(IfBlock),
    Repeat(RepeatBlock),
    Foreach(ForeachBlock),
    Try(TryBlock),
    Use(UseBlock),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<ArgValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfBlock {
    pub condition: String,
    pub then: Vec<StepNode>,
    #[serde(default, rename = "else", skip_serializing_if = "Vec::is_empty")]
    pub otherwise: Vec<StepNode>,
}

/// Counted loop. `times` stays a raw value so bounds are checked by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatBlock {
    pub times: Value,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    pub steps: Vec<StepNode>,
}

/// Data-driven loop over a literal list or a compile-time list variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeachBlock {
    pub over: Value,
    #[serde(rename = "as")]
    pub var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    pub steps: Vec<StepNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryBlock {
    pub steps: Vec<StepNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catch: Vec<StepNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseBlock {
    pub block: String,
}

/// Normalizer output: the canonical document plus the dialect it was written in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedDocument {
    pub dialect: Dialect,
    pub document: TestDocument,
}
