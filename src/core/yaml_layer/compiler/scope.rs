use crate::core::yaml_layer::template::{references, substitute, Reference};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

const MAX_NESTED_SUBSTITUTIONS: usize = 8;

/// Where a `{{name}}` reference was found.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'v> {
    Bound(&'v Value),
    /// Produced by an earlier `store`; substituted by the executor.
    Captured,
    Missing,
}

/// Compile-time variable scopes, searched loop → checkpoint → document.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    document: &'a IndexMap<String, Value>,
    checkpoint: Option<&'a IndexMap<String, Value>>,
    loops: Vec<(String, Value)>,
}

impl<'a> Scope<'a> {
    pub fn new(document: &'a IndexMap<String, Value>) -> Self {
        Self {
            document,
            checkpoint: None,
            loops: Vec::new(),
        }
    }

    pub fn with_checkpoint(&self, variables: &'a IndexMap<String, Value>) -> Self {
        Self {
            document: self.document,
            checkpoint: Some(variables),
            loops: self.loops.clone(),
        }
    }

    pub fn with_loop_var(&self, name: &str, value: Value) -> Self {
        let mut next = self.clone();
        next.loops.push((name.to_string(), value));
        next
    }

    /// Innermost binding of `root`, if any compile-time scope declares it.
    pub fn get(&self, root: &str) -> Option<&Value> {
        self.loops
            .iter()
            .rev()
            .find(|(name, _)| name == root)
            .map(|(_, value)| value)
            .or_else(|| self.checkpoint.and_then(|vars| vars.get(root)))
            .or_else(|| self.document.get(root))
    }

    pub fn lookup<'s>(&'s self, path: &str, captured: &BTreeSet<String>) -> Lookup<'s> {
        let mut parts = path.split('.');
        let root = parts.next().unwrap_or_default();
        match self.get(root) {
            Some(value) => {
                let mut current = value;
                for part in parts {
                    let next = match current {
                        Value::Object(map) => map.get(part),
                        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
                        _ => None,
                    };
                    match next {
                        Some(value) => current = value,
                        None => return Lookup::Missing,
                    }
                }
                Lookup::Bound(current)
            }
            None if captured.contains(root) => Lookup::Captured,
            None => Lookup::Missing,
        }
    }
}

/// Result of substituting one text value.
#[derive(Debug, Default)]
pub struct Substitution {
    pub text: String,
    pub runtime: BTreeSet<String>,
    pub missing: Vec<String>,
    pub missing_env: Vec<String>,
    /// Declared variables still present once the depth ran out: their
    /// values keep expanding into references to each other.
    pub cyclic: Vec<String>,
}

/// Text form of a bound value as it appears inside an argument.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace every compile-time reference in `text`. Declared values that
/// themselves hold references are expanded too, up to a fixed depth.
pub fn substitute_text(
    text: &str,
    scope: &Scope<'_>,
    captured: &BTreeSet<String>,
    env: &BTreeMap<String, String>,
) -> Substitution {
    let mut result = Substitution::default();
    let mut current = text.to_string();
    let mut settled = false;
    for _ in 0..MAX_NESTED_SUBSTITUTIONS {
        let mut changed = false;
        let next = substitute(&current, |reference| match reference {
            Reference::Variable { root, path } => match scope.lookup(path, captured) {
                Lookup::Bound(value) => {
                    changed = true;
                    Some(display_value(value))
                }
                Lookup::Captured => {
                    result.runtime.insert(root.clone());
                    None
                }
                Lookup::Missing => {
                    if !result.missing.contains(path) {
                        result.missing.push(path.clone());
                    }
                    None
                }
            },
            Reference::Env(name) => match env.get(name) {
                Some(value) => {
                    changed = true;
                    Some(value.clone())
                }
                None => {
                    if !result.missing_env.contains(name) {
                        result.missing_env.push(name.clone());
                    }
                    None
                }
            },
        });
        current = next;
        if !changed {
            settled = true;
            break;
        }
    }
    if !settled {
        for reference in references(&current) {
            if let Reference::Variable { root, path } = reference {
                if matches!(scope.lookup(&path, captured), Lookup::Bound(_)) && !result.cyclic.contains(&root) {
                    result.cyclic.push(root);
                }
            }
        }
    }
    result.text = current;
    result
}
