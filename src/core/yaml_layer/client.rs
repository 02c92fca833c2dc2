//! Boundary to the remote step-creation API.

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::actions::ActionKind;
use crate::core::yaml_layer::document::ArgValue;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One step to append to a remote checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRequest {
    pub checkpoint_id: String,
    pub position: u32,
    pub action: ActionKind,
    pub args: Vec<ArgValue>,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepCreated {
    /// Absent when the API accepted the step without returning a usable id.
    pub id: Option<u64>,
    /// Value produced by the step, bound to its captured variable.
    pub output: Option<Value>,
}

/// Error types for step API calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl StepApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StepApiError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StepApiError::NotFound(_) => "not-found",
            StepApiError::Validation(_) => "validation",
            StepApiError::Unauthorized(_) => "unauthorized",
            StepApiError::Transient(_) => "transient",
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body.trim())
        };
        match status.as_u16() {
            404 => StepApiError::NotFound(detail),
            400 | 409 | 422 => StepApiError::Validation(detail),
            401 | 403 => StepApiError::Unauthorized(detail),
            _ => StepApiError::Transient(detail),
        }
    }
}

/// Interface the executor dispatches compiled instructions through.
#[async_trait]
pub trait StepApiClient: Send + Sync {
    async fn create_step(&self, request: &StepRequest) -> Result<StepCreated, StepApiError>;
}

/// `POST {base}/teststeps?envelope=false` with a bearer token.
#[derive(Clone)]
pub struct HttpStepClient {
    http: reqwest::Client,
    base_url: url::Url,
    token: Option<String>,
}

impl HttpStepClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        let base_url = url::Url::parse(base_url).map_err(|err| {
            AppError::new(
                ErrorCategory::ConfigError,
                format!("invalid API base URL '{}': {}", base_url, err),
            )
            .with_suggestion("Set [api] base_url in stepline.toml or STEPLINE_API_URL")
        })?;
        let http = reqwest::Client::builder().timeout(timeout).build().map_err(|err| {
            AppError::new(
                ErrorCategory::InternalError,
                format!("failed to build HTTP client: {}", err),
            )
        })?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/teststeps?envelope=false",
            self.base_url.as_str().trim_end_matches('/')
        )
    }

    fn body(request: &StepRequest) -> Value {
        let checkpoint = match request.checkpoint_id.parse::<u64>() {
            Ok(id) => json!(id),
            Err(_) => json!(request.checkpoint_id),
        };
        json!({
            "checkpointId": checkpoint,
            "stepIndex": request.position,
            "parsedStep": request.payload,
        })
    }
}

/// `{item: {id}}`; zero, missing or non-numeric ids mean "no identifier".
fn parse_created(value: &Value) -> StepCreated {
    let item = value.get("item").unwrap_or(value);
    let id = match item.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .filter(|id| *id > 0);
    StepCreated {
        id,
        output: item.get("output").filter(|output| !output.is_null()).cloned(),
    }
}

#[async_trait]
impl StepApiClient for HttpStepClient {
    async fn create_step(&self, request: &StepRequest) -> Result<StepCreated, StepApiError> {
        let mut builder = self.http.post(self.endpoint()).json(&Self::body(request));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| StepApiError::Transient(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StepApiError::from_status(status, &text));
        }

        let text = response
            .text()
            .await
            .map_err(|err| StepApiError::Transient(err.to_string()))?;
        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|err| {
                tracing::warn!("step API returned unparseable body: {}", err);
                Value::Null
            })
        };
        Ok(parse_created(&value))
    }
}

/// Client that records requests instead of sending them; used by `--dry-run`.
#[derive(Default)]
pub struct DryRunClient {
    next_id: AtomicU64,
    requests: Mutex<Vec<StepRequest>>,
}

impl DryRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepApiClient for DryRunClient {
    async fn create_step(&self, request: &StepRequest) -> Result<StepCreated, StepApiError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StepCreated {
            id: Some(id),
            output: None,
        })
    }
}
