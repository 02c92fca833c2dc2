#![allow(clippy::result_large_err)] // Session persistence returns AppError so IO failures keep the file path.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

fn default_next_position() -> u32 {
    1
}

fn default_auto_increment() -> bool {
    true
}

/// Where the next step of a session is appended, plus values captured so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_checkpoint_id: Option<String>,
    #[serde(default = "default_next_position")]
    pub next_position: u32,
    #[serde(default)]
    pub variable_bindings: IndexMap<String, Value>,
    #[serde(default = "default_auto_increment")]
    pub auto_increment_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journey_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self {
            current_checkpoint_id: None,
            next_position: default_next_position(),
            variable_bindings: IndexMap::new(),
            auto_increment_enabled: default_auto_increment(),
            project_id: None,
            goal_id: None,
            journey_id: None,
            updated_at: None,
        }
    }
}

impl SessionContext {
    /// Point the session at a checkpoint; the position restarts unless given.
    pub fn set_checkpoint(&mut self, checkpoint_id: impl Into<String>, position: Option<u32>) {
        self.current_checkpoint_id = Some(checkpoint_id.into());
        self.next_position = position.unwrap_or(1).max(1);
        self.touch();
    }

    /// Record a successful step at `position`.
    pub fn advance_past(&mut self, position: u32) {
        if self.auto_increment_enabled {
            self.next_position = position.saturating_add(1);
        }
        self.touch();
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.variable_bindings.insert(name.into(), value);
        self.touch();
    }

    /// Forget a value that no longer reflects the page.
    pub fn unbind(&mut self, name: &str) {
        if self.variable_bindings.shift_remove(name).is_some() {
            self.touch();
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// JSON-file backed session storage; concurrent writers overwrite each other.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<workspace>/.stepline/session.json`
    pub fn for_workspace(workspace_root: &Path) -> Self {
        Self::new(workspace_root.join(".stepline").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields a fresh session.
    pub fn load(&self) -> Result<SessionContext, AppError> {
        if !self.path.exists() {
            return Ok(SessionContext::default());
        }
        let bytes = fs::read(&self.path).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to read {}: {}", self.path.display(), err),
            )
        })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to parse session file {}: {}", self.path.display(), err),
            )
            .with_suggestion("Run `stepline session reset` to start a new session")
        })
    }

    pub fn save(&self, session: &SessionContext) -> Result<(), AppError> {
        let content = serde_json::to_vec_pretty(session).map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("failed to serialize session: {}", err),
            )
        })?;
        atomic_write(&self.path, &content)?;
        tracing::debug!(path = %self.path.display(), next_position = session.next_position, "session saved");
        Ok(())
    }

    pub fn reset(&self) -> Result<SessionContext, AppError> {
        let session = SessionContext::default();
        self.save(&session)?;
        Ok(session)
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::new(
                ErrorCategory::IoError,
                format!("failed to create directory {}: {}", parent.display(), err),
            )
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to write {}: {}", tmp_path.display(), err),
        )
    })?;
    fs::rename(&tmp_path, path).map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!(
                "failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                err
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_a_fresh_session() {
        let dir = TempDir::new().expect("tempdir");
        let store = SessionStore::for_workspace(dir.path());
        let session = store.load().expect("load");
        assert_eq!(session.next_position, 1);
        assert!(session.auto_increment_enabled);
        assert!(session.current_checkpoint_id.is_none());
    }

    #[test]
    fn save_then_load_keeps_bindings_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let store = SessionStore::for_workspace(dir.path());
        let mut session = SessionContext::default();
        session.set_checkpoint("42", Some(3));
        session.bind("zeta", json!("last"));
        session.bind("alpha", json!(1));
        store.save(&session).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded, session);
        let names: Vec<&String> = loaded.variable_bindings.keys().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn advance_respects_auto_increment() {
        let mut session = SessionContext::default();
        session.advance_past(4);
        assert_eq!(session.next_position, 5);
        session.auto_increment_enabled = false;
        session.advance_past(9);
        assert_eq!(session.next_position, 5);
    }

    #[test]
    fn corrupt_files_are_reported() {
        let dir = TempDir::new().expect("tempdir");
        let store = SessionStore::for_workspace(dir.path());
        fs::create_dir_all(store.path().parent().expect("parent")).expect("mkdir");
        fs::write(store.path(), "{not json").expect("write");
        let err = store.load().expect_err("corrupt");
        assert_eq!(err.category, ErrorCategory::SerializationError);
    }
}
