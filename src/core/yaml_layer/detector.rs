#![allow(clippy::result_large_err)] // Detection failures are reported as AppError with scores attached.

//! Dialect detection by weighted structural votes.
//!
//! Detection inspects the string-keyed tree produced by the normalizer's first
//! pass and never looks at dialect-specific types. Every feature contributes a
//! fixed weight per dialect; the best score wins unless the runner-up is too
//! close or the winner too weak, in which case the caller must name the
//! dialect explicitly.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::document::Dialect;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Keys only the compact dialect uses as step actions.
pub const COMPACT_ACTION_KEYS: &[&str] = &[
    "c", "t", "k", "h", "ch", "nch", "eq", "neq", "gt", "lt", "nav", "js", "note", "loop", "run",
    "dialog",
];

/// Keys characteristic of simplified steps.
pub const SIMPLIFIED_STEP_KEYS: &[&str] = &[
    "navigate", "click", "write", "assert", "comment", "repeat", "foreach", "use", "type", "goto",
];

const EXTENDED_STEP_TYPES: &[&str] = &[
    "navigate", "interact", "assert", "wait", "data", "misc", "scroll", "cookie", "dialog",
    "window", "mouse", "control",
];

const SAMPLE_SIZE: usize = 10;
const MAJORITY: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectorConfig {
    pub min_confidence: f64,
    pub ambiguity_epsilon: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            ambiguity_epsilon: 0.1,
        }
    }
}

/// Weight one present feature contributed to one dialect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vote {
    pub dialect: Dialect,
    pub weight: f64,
}

/// A structural feature observed in the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: &'static str,
    pub votes: Vec<Vote>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub dialect: Dialect,
    pub confidence: f64,
    pub scores: BTreeMap<Dialect, f64>,
    pub signals: Vec<Signal>,
    /// Top-level markers of two dialects at once (`test` + `name`, `do` + `steps`).
    pub mixed_markers: Option<String>,
}

#[derive(Debug, Default)]
struct Features {
    has_test_field: bool,
    has_do_field: bool,
    has_nav_field: bool,
    has_data_field: bool,
    has_name_field: bool,
    has_steps_field: bool,
    has_checkpoints_field: bool,
    has_infrastructure: bool,
    has_extended_config: bool,
    has_compact_actions: bool,
    majority_compact_actions: bool,
    has_simplified_steps: bool,
    majority_simplified_steps: bool,
    has_type_field_in_steps: bool,
    majority_type_steps: bool,
}

impl Features {
    fn extract(root: &Map<String, Value>) -> Self {
        let sample = sample_steps(root);
        let total = sample.len();
        let count = |predicate: &dyn Fn(&Map<String, Value>) -> bool| {
            sample.iter().filter(|&&step| predicate(step)).count()
        };
        let compact = count(&|step| single_key_in(step, COMPACT_ACTION_KEYS));
        let simplified = count(&|step| single_key_in(step, SIMPLIFIED_STEP_KEYS));
        let typed = count(&is_typed_step);
        let majority = |hits: usize| total > 0 && hits as f64 / total as f64 > MAJORITY;

        let has_extended_config = root
            .get("config")
            .and_then(Value::as_object)
            .map(|config| {
                config.contains_key("screenshot_on_failure") || config.contains_key("output_format")
            })
            .unwrap_or(false);

        Features {
            has_test_field: root.contains_key("test"),
            has_do_field: root.contains_key("do"),
            has_nav_field: root.contains_key("nav"),
            has_data_field: root.contains_key("data"),
            has_name_field: root.contains_key("name"),
            has_steps_field: root.contains_key("steps"),
            has_checkpoints_field: root.contains_key("checkpoints"),
            has_infrastructure: root.contains_key("infrastructure"),
            has_extended_config,
            has_compact_actions: compact > 0,
            majority_compact_actions: majority(compact),
            has_simplified_steps: simplified > 0,
            majority_simplified_steps: majority(simplified),
            has_type_field_in_steps: typed > 0,
            majority_type_steps: majority(typed),
        }
    }

    /// Ordered predicate table: feature name, present, votes.
    fn table(&self) -> Vec<(&'static str, bool, Vec<(Dialect, f64)>)> {
        use Dialect::{Compact, Extended, Simplified};
        let steps_or_checkpoints = self.has_steps_field || self.has_checkpoints_field;
        vec![
            ("has_test_field", self.has_test_field, vec![(Compact, 0.30), (Simplified, -0.30), (Extended, -0.30)]),
            ("has_do_field", self.has_do_field, vec![(Compact, 0.30), (Simplified, -0.30), (Extended, -0.30)]),
            ("has_compact_actions", self.has_compact_actions, vec![(Compact, 0.20), (Extended, -0.20)]),
            ("majority_compact_actions", self.majority_compact_actions, vec![(Compact, 0.10)]),
            ("has_nav_field", self.has_nav_field, vec![(Compact, 0.05)]),
            ("has_data_field", self.has_data_field, vec![(Compact, 0.05)]),
            ("has_name_field", self.has_name_field, vec![(Compact, -0.20), (Simplified, 0.30), (Extended, 0.15)]),
            ("has_steps_field", self.has_steps_field, vec![(Compact, -0.20)]),
            ("has_steps_or_checkpoints", steps_or_checkpoints, vec![(Simplified, 0.30), (Extended, 0.15)]),
            ("has_simplified_steps", self.has_simplified_steps, vec![(Simplified, 0.20), (Extended, -0.10)]),
            ("majority_simplified_steps", self.majority_simplified_steps, vec![(Simplified, 0.20)]),
            ("has_type_field_in_steps", self.has_type_field_in_steps, vec![(Simplified, -0.30), (Extended, 0.40)]),
            ("majority_type_steps", self.majority_type_steps, vec![(Extended, 0.10)]),
            ("has_infrastructure", self.has_infrastructure, vec![(Compact, -0.30), (Simplified, -0.10), (Extended, 0.15)]),
            ("has_extended_config", self.has_extended_config, vec![(Extended, 0.05)]),
        ]
    }
}

fn single_key_in(step: &Map<String, Value>, keys: &[&str]) -> bool {
    step.len() == 1 && step.keys().all(|key| keys.contains(&key.as_str()))
}

fn is_typed_step(step: &Map<String, Value>) -> bool {
    step.get("type")
        .and_then(Value::as_str)
        .map(|value| EXTENDED_STEP_TYPES.contains(&value))
        .unwrap_or(false)
}

/// First steps across the top-level step lists, in document order.
fn sample_steps(root: &Map<String, Value>) -> Vec<&Map<String, Value>> {
    let mut lists: Vec<&Value> = ["do", "steps", "setup", "teardown"]
        .iter()
        .filter_map(|key| root.get(*key))
        .collect();
    if let Some(Value::Array(checkpoints)) = root.get("checkpoints") {
        lists.extend(checkpoints.iter().filter_map(|checkpoint| checkpoint.get("steps")));
    }
    lists
        .into_iter()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(Value::as_object)
        .take(SAMPLE_SIZE)
        .collect()
}

fn round(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}

/// Score the document against every dialect. Pure; never fails.
pub fn detect(raw: &Value) -> Detection {
    let empty = Map::new();
    let root = raw.as_object().unwrap_or(&empty);
    let features = Features::extract(root);

    let mut totals: BTreeMap<Dialect, f64> = Dialect::ALL.iter().map(|d| (*d, 0.0)).collect();
    let mut signals = Vec::new();
    for (name, present, votes) in features.table() {
        if !present {
            continue;
        }
        for (dialect, weight) in &votes {
            *totals.entry(*dialect).or_insert(0.0) += weight;
        }
        signals.push(Signal {
            name,
            votes: votes
                .into_iter()
                .map(|(dialect, weight)| Vote { dialect, weight })
                .collect(),
        });
    }
    let scores: BTreeMap<Dialect, f64> = totals
        .into_iter()
        .map(|(dialect, score)| (dialect, round(score.clamp(0.0, 1.0))))
        .collect();

    // Ties resolve to the earlier dialect in declaration order.
    let (dialect, confidence) = scores
        .iter()
        .fold((Dialect::Compact, f64::MIN), |best, (dialect, score)| {
            if *score > best.1 {
                (*dialect, *score)
            } else {
                best
            }
        });

    let mixed_markers = if features.has_test_field && features.has_name_field {
        Some("both 'test' and 'name' are present".to_string())
    } else if features.has_do_field && features.has_steps_field {
        Some("both 'do' and 'steps' are present".to_string())
    } else {
        None
    };

    tracing::debug!(
        dialect = %dialect,
        confidence,
        signals = signals.len(),
        "scored yaml dialects"
    );

    Detection {
        dialect,
        confidence,
        scores,
        signals,
        mixed_markers,
    }
}

impl Detection {
    pub fn runner_up(&self) -> Option<(Dialect, f64)> {
        self.scores
            .iter()
            .filter(|(dialect, _)| **dialect != self.dialect)
            .map(|(dialect, score)| (*dialect, *score))
            .fold(None, |best: Option<(Dialect, f64)>, candidate| match best {
                Some(current) if current.1 >= candidate.1 => Some(current),
                _ => Some(candidate),
            })
    }

    /// Accept the winner or fail with an ambiguity / unrecognized error.
    pub fn decide(&self, config: &DetectorConfig) -> Result<Dialect, AppError> {
        if let Some(reason) = &self.mixed_markers {
            return Err(self.error(
                "YAML-DET-001",
                format!("dialect is ambiguous: {}", reason),
            ));
        }
        if let Some((second, score)) = self.runner_up() {
            let gap = ((self.confidence - score) * 1000.0).round() as i64;
            let epsilon = (config.ambiguity_epsilon * 1000.0).round() as i64;
            if gap < epsilon {
                return Err(self.error(
                    "YAML-DET-001",
                    format!(
                        "dialect is ambiguous: {} scored {:.2} and {} scored {:.2}",
                        self.dialect, self.confidence, second, score
                    ),
                ));
            }
        }
        if self.confidence < config.min_confidence {
            return Err(self.error(
                "YAML-DET-002",
                format!(
                    "document does not look like any known dialect (best: {} at {:.2}, need {:.2})",
                    self.dialect, self.confidence, config.min_confidence
                ),
            ));
        }
        Ok(self.dialect)
    }

    fn error(&self, code: &str, message: String) -> AppError {
        let scores = self
            .scores
            .iter()
            .map(|(dialect, score)| format!("{}={:.2}", dialect, score))
            .collect::<Vec<_>>()
            .join(", ");
        let signals = self
            .signals
            .iter()
            .map(|signal| signal.name)
            .collect::<Vec<_>>()
            .join(", ");
        AppError::new(ErrorCategory::DetectionError, message)
            .with_code(code)
            .with_context("scores", scores)
            .with_context("signals", signals)
            .with_suggestion("Pass --dialect compact|simplified|extended to skip detection")
    }
}

/// Detector bound to configured thresholds.
#[derive(Debug, Clone, Default)]
pub struct FormatDetector {
    config: DetectorConfig,
}

impl FormatDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Score and decide in one step.
    pub fn detect(&self, raw: &Value) -> Result<Detection, AppError> {
        let detection = detect(raw);
        detection.decide(&self.config)?;
        Ok(detection)
    }
}
