//! Sequential dispatch of compiled instructions to the step API.

use crate::core::yaml_layer::actions::{ActionKind, ActionRegistry, RetryPolicy};
use crate::core::yaml_layer::client::{StepApiClient, StepApiError, StepCreated, StepRequest};
use crate::core::yaml_layer::compiler::{CheckpointRef, CompiledInstruction, Guard};
use crate::core::yaml_layer::document::ArgValue;
use crate::core::yaml_layer::expression::ExpressionEngine;
use crate::core::yaml_layer::session::{SessionContext, SessionStore};
use crate::core::yaml_layer::template::{substitute, Reference};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Backoff applied to idempotent instructions on transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            jitter_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub retry: RetrySettings,
    pub continue_on_error: bool,
    /// The checkpoint came from an override; the session file is left untouched.
    pub checkpoint_override: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StepOutcome {
    Succeeded { step_id: u64 },
    SucceededNoIdentifier,
    Failed { error: String, kind: String, fatal: bool },
    SkippedByCondition { reason: String },
    NotAttempted,
}

impl StepOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded { .. } => "succeeded",
            StepOutcome::SucceededNoIdentifier => "succeeded-no-identifier",
            StepOutcome::Failed { .. } => "failed",
            StepOutcome::SkippedByCondition { .. } => "skipped-by-condition",
            StepOutcome::NotAttempted => "not-attempted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstructionResult {
    pub index: usize,
    pub checkpoint: String,
    pub position: u32,
    pub action: ActionKind,
    pub source: String,
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionCounts {
    pub succeeded: usize,
    pub succeeded_no_identifier: usize,
    pub failed: usize,
    pub skipped: usize,
    pub not_attempted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub results: Vec<InstructionResult>,
    pub counts: ExecutionCounts,
    pub aborted: bool,
    pub interrupted: bool,
    pub session: SessionContext,
    /// First free position per checkpoint id once the run ended.
    pub next_positions: BTreeMap<String, u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        !self.aborted && !self.interrupted && self.counts.failed == 0
    }
}

/// Sender flips to `true` to stop a run between instructions or attempts.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

enum Dispatch {
    Done(Result<StepCreated, StepApiError>),
    Interrupted,
}

pub struct Executor {
    client: Arc<dyn StepApiClient>,
    registry: ActionRegistry,
    engine: ExpressionEngine,
    options: ExecutorOptions,
    store: Option<SessionStore>,
    cancel: Option<watch::Receiver<bool>>,
    start_positions: BTreeMap<String, u32>,
}

impl Executor {
    pub fn new(client: Arc<dyn StepApiClient>) -> Self {
        Self {
            client,
            registry: ActionRegistry::default(),
            engine: ExpressionEngine::default(),
            options: ExecutorOptions::default(),
            store: None,
            cancel: None,
            start_positions: BTreeMap::new(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Persist the session after every success and when the run ends.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Continue numbering where an earlier run on the same checkpoints stopped.
    pub fn with_start_positions(mut self, positions: BTreeMap<String, u32>) -> Self {
        self.start_positions = positions;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    fn persist(&self, session: &SessionContext) {
        if self.options.checkpoint_override {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.save(session) {
                tracing::error!("failed to save session: {}", err);
            }
        }
    }

    /// Dispatch `instructions` in order.
    ///
    /// Compiled positions are a plan: the position sent with each request is
    /// the next free slot of its checkpoint, so skipped branches, unused try
    /// handlers and failed steps leave no gaps.
    pub async fn run(
        &self,
        instructions: &[CompiledInstruction],
        session: &mut SessionContext,
    ) -> ExecutionReport {
        let started_at = Utc::now();
        let mut results = Vec::with_capacity(instructions.len());
        let mut failed_groups: BTreeSet<u32> = BTreeSet::new();
        let mut cursors: BTreeMap<String, u32> = BTreeMap::new();
        let mut unbound: BTreeSet<String> = BTreeSet::new();
        let mut aborted = false;
        let mut interrupted = false;

        for (index, instruction) in instructions.iter().enumerate() {
            let checkpoint = resolve_checkpoint(instruction, session);
            let position = match &checkpoint {
                Some(id) => *cursors.entry(id.clone()).or_insert_with(|| {
                    self.start_positions
                        .get(id)
                        .copied()
                        .unwrap_or(instruction.position)
                }),
                None => instruction.position,
            };
            let mut result = InstructionResult {
                index,
                checkpoint: checkpoint
                    .clone()
                    .unwrap_or_else(|| instruction.checkpoint.to_string()),
                position,
                action: instruction.action,
                source: instruction.source.clone(),
                attempts: 0,
                outcome: StepOutcome::NotAttempted,
                payload: None,
            };
            if aborted || interrupted {
                results.push(result);
                continue;
            }
            if self.cancelled() {
                tracing::warn!(index, "run interrupted; remaining instructions not attempted");
                interrupted = true;
                results.push(result);
                continue;
            }

            if let Some(reason) = guard_skip(instruction.control.guard, &failed_groups) {
                result.outcome = StepOutcome::SkippedByCondition { reason };
                results.push(result);
                continue;
            }

            match self.conditions_hold(instruction, session, &unbound) {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    tracing::info!(position, action = %instruction.action, "skipped by condition");
                    result.outcome = StepOutcome::SkippedByCondition { reason };
                    results.push(result);
                    continue;
                }
                Err(error) => {
                    result.outcome = fatal(error, "condition");
                    aborted = true;
                    results.push(result);
                    continue;
                }
            }

            let (checkpoint_id, args) = match self.prepare(instruction, checkpoint, session, &unbound) {
                Ok(prepared) => prepared,
                Err(error) => {
                    result.outcome = fatal(error, "binding");
                    aborted = true;
                    results.push(result);
                    continue;
                }
            };
            let Some(handler) = self.registry.get(instruction.action) else {
                result.outcome = fatal(format!("action '{}' is not registered", instruction.action), "internal");
                aborted = true;
                results.push(result);
                continue;
            };
            let request = StepRequest {
                checkpoint_id: checkpoint_id.clone(),
                position,
                action: instruction.action,
                payload: handler.payload(&args),
                args,
            };
            result.payload = Some(request.payload.clone());

            let (dispatch, attempts) = self.dispatch(instruction, &request).await;
            result.attempts = attempts;
            match dispatch {
                Dispatch::Interrupted => {
                    interrupted = true;
                    result.outcome = StepOutcome::Failed {
                        error: "interrupted while waiting to retry".to_string(),
                        kind: "interrupted".to_string(),
                        fatal: false,
                    };
                }
                Dispatch::Done(Ok(created)) => {
                    result.outcome = match created.id {
                        Some(step_id) => StepOutcome::Succeeded { step_id },
                        None => {
                            tracing::warn!(
                                position,
                                action = %instruction.action,
                                "step created without an identifier"
                            );
                            StepOutcome::SucceededNoIdentifier
                        }
                    };
                    if let Some(name) = &instruction.captures {
                        match created.output {
                            Some(value) => {
                                unbound.remove(name);
                                session.bind(name.clone(), value);
                            }
                            None => {
                                tracing::warn!(
                                    position,
                                    variable = %name,
                                    "step API returned no value for the captured variable"
                                );
                                unbound.insert(name.clone());
                                session.unbind(name);
                            }
                        }
                    }
                    if let Some(cursor) = cursors.get_mut(&checkpoint_id) {
                        *cursor = position.saturating_add(1);
                    }
                    session.current_checkpoint_id = Some(checkpoint_id);
                    session.advance_past(position);
                    self.persist(session);
                    tracing::info!(
                        position,
                        action = %instruction.action,
                        attempts,
                        outcome = result.outcome.label(),
                        "instruction dispatched"
                    );
                }
                Dispatch::Done(Err(error)) => {
                    let transient = error.is_transient();
                    let in_try_body = matches!(instruction.control.guard, Some(Guard::Body(_)));
                    let fatal = !transient || !(self.options.continue_on_error || in_try_body);
                    if let Some(Guard::Body(group)) = instruction.control.guard {
                        failed_groups.insert(group);
                    }
                    tracing::error!(
                        position,
                        action = %instruction.action,
                        attempts,
                        kind = error.kind(),
                        fatal,
                        "instruction failed: {}",
                        error
                    );
                    result.outcome = StepOutcome::Failed {
                        error: error.to_string(),
                        kind: error.kind().to_string(),
                        fatal,
                    };
                    aborted = fatal;
                }
            }
            results.push(result);
        }

        self.persist(session);
        let counts = count(&results);
        ExecutionReport {
            results,
            counts,
            aborted,
            interrupted,
            session: session.clone(),
            next_positions: cursors,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// `Ok(Some(reason))` when a runtime condition does not hold.
    fn conditions_hold(
        &self,
        instruction: &CompiledInstruction,
        session: &SessionContext,
        unbound: &BTreeSet<String>,
    ) -> Result<Option<String>, String> {
        for condition in &instruction.control.conditions {
            if let Some(name) = ExpressionEngine::identifiers(&condition.expression)
                .into_iter()
                .find(|name| unbound.contains(name) && !condition.bindings.contains_key(name))
            {
                return Err(format!(
                    "condition '{}' depends on '{}', but the step that captures it returned no value",
                    condition.expression, name
                ));
            }
            let mut bindings: BTreeMap<String, Value> = condition.bindings.clone();
            for (name, value) in &session.variable_bindings {
                bindings.insert(name.clone(), value.clone());
            }
            let outcome = self
                .engine
                .evaluate_bool(&condition.expression, &bindings)
                .map_err(|err| err.message)?;
            if outcome != condition.expect {
                return Ok(Some(format!(
                    "'{}' evaluated to {}",
                    condition.expression, outcome
                )));
            }
        }
        Ok(None)
    }

    /// Require a target checkpoint and substitute captured placeholders.
    fn prepare(
        &self,
        instruction: &CompiledInstruction,
        checkpoint: Option<String>,
        session: &SessionContext,
        unbound: &BTreeSet<String>,
    ) -> Result<(String, Vec<ArgValue>), String> {
        let checkpoint_id = checkpoint.ok_or_else(|| {
            "no checkpoint is set; run `stepline session set --checkpoint ID` or pass --checkpoint"
                .to_string()
        })?;
        if instruction.runtime_variables.is_empty() {
            return Ok((checkpoint_id, instruction.args.clone()));
        }
        if let Some(name) = instruction
            .runtime_variables
            .iter()
            .find(|name| unbound.contains(*name))
        {
            return Err(format!(
                "'{}' was captured without a value, so its placeholder cannot be filled",
                name
            ));
        }

        let mut missing = Vec::new();
        let args = instruction
            .args
            .iter()
            .map(|arg| match arg {
                ArgValue::Text(text) => ArgValue::Text(substitute(text, |reference| match reference {
                    Reference::Variable { root, path } if instruction.runtime_variables.contains(root) => {
                        let value = lookup_binding(session, path);
                        if value.is_none() && !missing.contains(root) {
                            missing.push(root.clone());
                        }
                        value
                    }
                    _ => None,
                })),
                other => other.clone(),
            })
            .collect();
        if !missing.is_empty() {
            return Err(format!("captured variable(s) not bound: {}", missing.join(", ")));
        }
        Ok((checkpoint_id, args))
    }

    async fn dispatch(&self, instruction: &CompiledInstruction, request: &StepRequest) -> (Dispatch, u32) {
        let settings = &self.options.retry;
        let max_attempts = match instruction.retry {
            RetryPolicy::IdempotentRetry => settings.max_attempts.max(1),
            RetryPolicy::None => 1,
        };
        let mut backoff_ms = settings.backoff_ms;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let result = self.client.create_step(request).await;
            match result {
                Err(error) if error.is_transient() && attempts < max_attempts => {
                    let sleep_ms = backoff_ms.min(settings.max_backoff_ms).saturating_add(
                        if settings.jitter_ms > 0 {
                            rand::thread_rng().gen_range(0..=settings.jitter_ms)
                        } else {
                            0
                        },
                    );
                    tracing::warn!(
                        position = request.position,
                        attempt = attempts,
                        max_attempts,
                        sleep_ms,
                        "transient failure, retrying: {}",
                        error
                    );
                    if !self.wait(sleep_ms).await {
                        return (Dispatch::Interrupted, attempts);
                    }
                    backoff_ms = ((backoff_ms as f64) * settings.backoff_multiplier)
                        .min(settings.max_backoff_ms as f64) as u64;
                }
                other => return (Dispatch::Done(other), attempts),
            }
        }
    }

    /// Sleep unless cancelled first; `false` means the run was interrupted.
    async fn wait(&self, millis: u64) -> bool {
        let Some(cancel) = &self.cancel else {
            if millis > 0 {
                sleep(Duration::from_millis(millis)).await;
            }
            return true;
        };
        let mut cancel = cancel.clone();
        if *cancel.borrow() {
            return false;
        }
        tokio::select! {
            _ = sleep(Duration::from_millis(millis)) => !*cancel.borrow(),
            changed = cancel.changed() => match changed {
                Ok(()) => !*cancel.borrow(),
                Err(_) => {
                    sleep(Duration::from_millis(millis)).await;
                    true
                }
            },
        }
    }
}

fn resolve_checkpoint(instruction: &CompiledInstruction, session: &SessionContext) -> Option<String> {
    match &instruction.checkpoint {
        CheckpointRef::Id(id) => Some(id.clone()),
        CheckpointRef::Session => session.current_checkpoint_id.clone(),
    }
}

fn fatal(error: String, kind: &str) -> StepOutcome {
    tracing::error!(kind, "instruction cannot run: {}", error);
    StepOutcome::Failed {
        error,
        kind: kind.to_string(),
        fatal: true,
    }
}

fn guard_skip(guard: Option<Guard>, failed_groups: &BTreeSet<u32>) -> Option<String> {
    match guard {
        Some(Guard::Body(group)) if failed_groups.contains(&group) => {
            Some(format!("an earlier step of try group {} failed", group))
        }
        Some(Guard::Handler(group)) if !failed_groups.contains(&group) => {
            Some(format!("try group {} succeeded", group))
        }
        _ => None,
    }
}

fn lookup_binding(session: &SessionContext, path: &str) -> Option<String> {
    let mut parts = path.split('.');
    let mut current = session.variable_bindings.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(match current {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    })
}

fn count(results: &[InstructionResult]) -> ExecutionCounts {
    let mut counts = ExecutionCounts::default();
    for result in results {
        match result.outcome {
            StepOutcome::Succeeded { .. } => counts.succeeded += 1,
            StepOutcome::SucceededNoIdentifier => counts.succeeded_no_identifier += 1,
            StepOutcome::Failed { .. } => counts.failed += 1,
            StepOutcome::SkippedByCondition { .. } => counts.skipped += 1,
            StepOutcome::NotAttempted => counts.not_attempted += 1,
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::yaml_layer::compiler::{InstructionControl, RuntimeCondition};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<StepCreated, StepApiError>>>,
        seen: Mutex<Vec<StepRequest>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<StepCreated, StepApiError>>) -> Arc<Self> {
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl StepApiClient for Scripted {
        async fn create_step(&self, request: &StepRequest) -> Result<StepCreated, StepApiError> {
            self.seen.lock().expect("lock").push(request.clone());
            self.replies
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or(Ok(StepCreated { id: Some(99), output: None }))
        }
    }

    fn instruction(position: u32, action: ActionKind, args: Vec<ArgValue>) -> CompiledInstruction {
        CompiledInstruction {
            checkpoint: CheckpointRef::Session,
            checkpoint_name: "main".to_string(),
            position,
            action,
            args,
            retry: ActionRegistry::standard()
                .get(action)
                .map(|handler| handler.retry_policy())
                .unwrap_or(RetryPolicy::None),
            control: InstructionControl::default(),
            runtime_variables: Vec::new(),
            captures: None,
            source: format!("do[{}]", position - 1),
        }
    }

    fn quick_retries() -> ExecutorOptions {
        ExecutorOptions {
            retry: RetrySettings {
                backoff_ms: 0,
                jitter_ms: 0,
                ..RetrySettings::default()
            },
            ..ExecutorOptions::default()
        }
    }

    fn session() -> SessionContext {
        let mut session = SessionContext::default();
        session.set_checkpoint("1680", None);
        session
    }

    #[tokio::test]
    async fn missing_identifier_is_a_distinct_success() {
        let client = Scripted::new(vec![Ok(StepCreated::default())]);
        let executor = Executor::new(client).with_options(quick_retries());
        let mut session = session();
        let report = executor
            .run(&[instruction(1, ActionKind::Click, vec![ArgValue::text("Go")])], &mut session)
            .await;
        assert_eq!(report.results[0].outcome, StepOutcome::SucceededNoIdentifier);
        assert_eq!(session.next_position, 2);
    }

    #[tokio::test]
    async fn non_idempotent_steps_are_attempted_once() {
        let client = Scripted::new(vec![Err(StepApiError::Transient("503".to_string()))]);
        let executor = Executor::new(client.clone()).with_options(quick_retries());
        let mut session = session();
        let report = executor
            .run(&[instruction(1, ActionKind::Click, vec![ArgValue::text("Go")])], &mut session)
            .await;
        assert_eq!(report.results[0].attempts, 1);
        assert!(report.aborted);
        assert_eq!(client.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn try_handlers_run_only_after_a_body_failure() {
        let client = Scripted::new(vec![
            Err(StepApiError::Transient("busy".to_string())),
            Ok(StepCreated { id: Some(5), output: None }),
        ]);
        let executor = Executor::new(client).with_options(quick_retries());
        let mut body = instruction(1, ActionKind::Click, vec![ArgValue::text("#maybe")]);
        body.control.guard = Some(Guard::Body(1));
        let mut skipped = instruction(2, ActionKind::Click, vec![ArgValue::text("#next")]);
        skipped.control.guard = Some(Guard::Body(1));
        let mut handler = instruction(3, ActionKind::Comment, vec![ArgValue::text("recovered")]);
        handler.control.guard = Some(Guard::Handler(1));

        let mut session = session();
        let report = executor.run(&[body, skipped, handler], &mut session).await;
        assert!(!report.aborted);
        assert!(matches!(report.results[0].outcome, StepOutcome::Failed { fatal: false, .. }));
        assert!(matches!(report.results[1].outcome, StepOutcome::SkippedByCondition { .. }));
        assert_eq!(report.results[2].outcome, StepOutcome::Succeeded { step_id: 5 });
    }

    #[tokio::test]
    async fn runtime_conditions_and_placeholders_use_session_bindings() {
        let client = Scripted::new(vec![]);
        let executor = Executor::new(client.clone()).with_options(quick_retries());
        let mut guarded = instruction(1, ActionKind::Write, vec![ArgValue::text("#q"), ArgValue::text("n={{total}}")]);
        guarded.runtime_variables = vec!["total".to_string()];
        guarded.control.conditions = vec![RuntimeCondition {
            expression: "{{total}} > 10".to_string(),
            expect: true,
            bindings: BTreeMap::new(),
        }];
        let mut otherwise = instruction(2, ActionKind::Click, vec![ArgValue::text("#small")]);
        otherwise.control.conditions = vec![RuntimeCondition {
            expression: "{{total}} > 10".to_string(),
            expect: false,
            bindings: BTreeMap::new(),
        }];

        let mut session = session();
        session.bind("total", json!(12));
        let report = executor.run(&[guarded, otherwise], &mut session).await;
        assert_eq!(report.counts.succeeded, 1);
        assert_eq!(report.counts.skipped, 1);
        let seen = client.seen.lock().expect("lock");
        assert_eq!(seen[0].args[1], ArgValue::text("n=12"));
    }

    #[tokio::test]
    async fn overrides_never_touch_the_session_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = SessionStore::for_workspace(dir.path());
        let client = Scripted::new(vec![]);
        let executor = Executor::new(client)
            .with_options(ExecutorOptions {
                checkpoint_override: true,
                ..quick_retries()
            })
            .with_store(store.clone());
        let mut session = session();
        executor
            .run(&[instruction(1, ActionKind::Click, vec![ArgValue::text("Go")])], &mut session)
            .await;
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_instruction() {
        let (tx, rx) = cancellation();
        tx.send(true).expect("send");
        let executor = Executor::new(Scripted::new(vec![]))
            .with_options(quick_retries())
            .with_cancellation(rx);
        let mut session = session();
        let report = executor
            .run(&[instruction(1, ActionKind::Click, vec![ArgValue::text("Go")])], &mut session)
            .await;
        assert!(report.interrupted);
        assert_eq!(report.counts.not_attempted, 1);
        assert_eq!(session.next_position, 1);
    }
}
