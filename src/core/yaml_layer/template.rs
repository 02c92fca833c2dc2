//! `{{name}}` and `${ENV:NAME}` references inside step arguments.

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\{\{\s*(?P<var>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}|\$\{ENV:(?P<env>[A-Za-z_][A-Za-z0-9_]*)\}",
        )
        .expect("token pattern is valid")
    })
}

/// One reference found in a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `{{root.field}}`: `root` is the variable, `path` the full dotted text.
    Variable { root: String, path: String },
    Env(String),
}

impl Reference {
    fn from_captures(captures: &Captures<'_>) -> Option<Self> {
        if let Some(var) = captures.name("var") {
            let path = var.as_str().to_string();
            let root = path.split('.').next().unwrap_or_default().to_string();
            return Some(Reference::Variable { root, path });
        }
        captures
            .name("env")
            .map(|env| Reference::Env(env.as_str().to_string()))
    }
}

pub fn references(text: &str) -> Vec<Reference> {
    token_pattern()
        .captures_iter(text)
        .filter_map(|captures| Reference::from_captures(&captures))
        .collect()
}

pub fn has_references(text: &str) -> bool {
    token_pattern().is_match(text)
}

/// The variable path when `text` is exactly one `{{token}}`.
pub fn single_token(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let captures = token_pattern().captures(trimmed)?;
    let whole = captures.get(0)?;
    if whole.start() != 0 || whole.end() != trimmed.len() {
        return None;
    }
    match Reference::from_captures(&captures)? {
        Reference::Variable { path, .. } => Some(path),
        Reference::Env(_) => None,
    }
}

/// Replace every reference using `resolve`; `None` leaves the token in place.
pub fn substitute<F>(text: &str, mut resolve: F) -> String
where
    F: FnMut(&Reference) -> Option<String>,
{
    token_pattern()
        .replace_all(text, |captures: &Captures<'_>| {
            Reference::from_captures(captures)
                .and_then(|reference| resolve(&reference))
                .unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

/// Rewrite `{{name}}` to `name` so conditions read as plain expressions.
pub fn strip_braces(text: &str) -> String {
    substitute(text, |reference| match reference {
        Reference::Variable { path, .. } => Some(path.clone()),
        Reference::Env(_) => None,
    })
}
