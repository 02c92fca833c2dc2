//! Expansion of `run` file arguments that carry shell-style wildcards.

use crate::core::{error::AppError, types::ErrorCategory};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

fn is_pattern(text: &str) -> bool {
    text.contains(['*', '?', '['])
}

/// Expand every wildcard argument into the files it matches, keeping the
/// argument order. Plain paths pass through untouched so a missing file is
/// reported by whoever opens it.
pub fn expand_patterns(arguments: &[PathBuf]) -> Result<Vec<PathBuf>, AppError> {
    let mut seen = BTreeSet::new();
    let mut files = Vec::new();
    for argument in arguments {
        let text = argument.to_string_lossy();
        if !is_pattern(&text) {
            if seen.insert(argument.clone()) {
                files.push(argument.clone());
            }
            continue;
        }
        let matches = expand(argument)?;
        if matches.is_empty() {
            return Err(AppError::new(
                ErrorCategory::IoError,
                format!("no files match '{}'", text),
            )
            .with_code("YAML-RUN-001")
            .with_suggestion("Quote the pattern so the shell leaves it alone, or check the directory"));
        }
        for file in matches {
            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
    }
    Ok(files)
}

fn expand(pattern: &Path) -> Result<Vec<PathBuf>, AppError> {
    let mut base = PathBuf::new();
    let mut rest = Vec::new();
    for component in pattern.components() {
        let text = component.as_os_str().to_string_lossy().into_owned();
        if rest.is_empty() && (!is_pattern(&text) || !matches!(component, Component::Normal(_))) {
            base.push(component);
        } else {
            rest.push(text);
        }
    }
    let relative = rest.join("/");
    let matcher = glob_regex(&relative)?;
    let depth = if relative.contains("**") {
        usize::MAX
    } else {
        rest.len()
    };
    let root = if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base.clone()
    };

    let mut found = Vec::new();
    for entry in WalkDir::new(&root)
        .min_depth(1)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(suffix) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let suffix = suffix
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if matcher.is_match(&suffix) {
            found.push(base.join(suffix));
        }
    }
    tracing::debug!(pattern = %pattern.display(), matches = found.len(), "expanded file pattern");
    Ok(found)
}

/// Translate `*`, `**`, `?` and `[...]` into an anchored regex over `/`-separated paths.
fn glob_regex(pattern: &str) -> Result<Regex, AppError> {
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:[^/]*/)*");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|c| *c == ']') {
                Some(offset) => {
                    let mut class: String = chars[i + 1..i + 1 + offset].iter().collect();
                    if let Some(negated) = class.strip_prefix('!') {
                        class = format!("^{}", negated);
                    }
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                    i += offset + 2;
                    continue;
                }
                None => out.push_str(r"\["),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }
    out.push('$');
    Regex::new(&out).map_err(|err| {
        AppError::new(
            ErrorCategory::ValidationError,
            format!("invalid file pattern '{}': {}", pattern, err),
        )
        .with_code("YAML-RUN-002")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        fs::create_dir_all(dir.path().join("suite/nested")).expect("dirs");
        for file in ["suite/b.yaml", "suite/a.yaml", "suite/notes.md", "suite/nested/c.yaml"] {
            fs::write(dir.path().join(file), "name: x\n").expect("write");
        }
        dir
    }

    #[test]
    fn star_stays_in_one_directory() {
        let dir = tree();
        let files = expand_patterns(&[dir.path().join("suite/*.yaml")]).expect("expanded");
        assert_eq!(
            files,
            vec![dir.path().join("suite/a.yaml"), dir.path().join("suite/b.yaml")]
        );
    }

    #[test]
    fn double_star_descends() {
        let dir = tree();
        let files = expand_patterns(&[dir.path().join("suite/**/*.yaml")]).expect("expanded");
        assert_eq!(files.len(), 3);
        assert!(files.contains(&dir.path().join("suite/nested/c.yaml")));
    }

    #[test]
    fn literals_pass_through_and_duplicates_collapse() {
        let dir = tree();
        let literal = dir.path().join("suite/b.yaml");
        let files = expand_patterns(&[
            literal.clone(),
            dir.path().join("suite/?.yaml"),
            PathBuf::from("missing.yaml"),
        ])
        .expect("expanded");
        assert_eq!(
            files,
            vec![literal, dir.path().join("suite/a.yaml"), PathBuf::from("missing.yaml")]
        );
    }

    #[test]
    fn unmatched_pattern_is_an_error() {
        let dir = tree();
        let err = expand_patterns(&[dir.path().join("suite/*.json")]).expect_err("no match");
        assert_eq!(err.code, "YAML-RUN-001");
        assert!(err.message.contains("*.json"));
    }

    #[test]
    fn character_classes_translate() {
        let regex = glob_regex("[!b].yaml").expect("regex");
        assert!(regex.is_match("a.yaml"));
        assert!(!regex.is_match("b.yaml"));
        assert!(!glob_regex("*.yaml").expect("regex").is_match("nested/c.yaml"));
    }
}
