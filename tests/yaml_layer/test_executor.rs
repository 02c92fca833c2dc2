use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use stepline::core::yaml_layer::{
    ArgValue, CompileContext, CompiledProgram, Executor, ExecutorOptions, RetrySettings,
    SessionContext, SessionStore, StepApiClient, StepApiError, StepCreated, StepOutcome,
    StepRequest, YamlLayer,
};
use tempfile::TempDir;

/// Replies in order, then succeeds with increasing ids.
struct ScriptedApi {
    replies: Mutex<Vec<Result<StepCreated, StepApiError>>>,
    requests: Mutex<Vec<StepRequest>>,
}

impl ScriptedApi {
    fn new(mut replies: Vec<Result<StepCreated, StepApiError>>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepApiClient for ScriptedApi {
    async fn create_step(&self, request: &StepRequest) -> Result<StepCreated, StepApiError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let fallback = StepCreated {
            id: Some(100 + requests.len() as u64),
            output: None,
        };
        self.replies.lock().unwrap().pop().unwrap_or(Ok(fallback))
    }
}

fn program(text: &str) -> CompiledProgram {
    let layer = YamlLayer::default();
    let loaded = layer.load(text, None).unwrap();
    layer
        .compile(&loaded, &CompileContext::default().with_session(None, 1))
        .unwrap()
}

fn fast_options() -> ExecutorOptions {
    ExecutorOptions {
        retry: RetrySettings {
            backoff_ms: 0,
            jitter_ms: 0,
            ..RetrySettings::default()
        },
        ..ExecutorOptions::default()
    }
}

fn session_at(checkpoint: &str) -> SessionContext {
    let mut session = SessionContext::default();
    session.set_checkpoint(checkpoint, None);
    session
}

#[tokio::test]
async fn permanent_failure_after_retries_stops_the_run() {
    let program = program(
        "test: Checkout\ndo:\n  - c: \"#open\"\n  - nav: https://x.test/cart\n  - c: \"#pay\"\n  - c: \"#confirm\"\n  - ch: Thanks\n",
    );
    let api = ScriptedApi::new(vec![
        Ok(StepCreated { id: Some(1), output: None }),
        Err(StepApiError::Transient("503 Service Unavailable".to_string())),
        Err(StepApiError::Transient("503 Service Unavailable".to_string())),
        Err(StepApiError::Transient("503 Service Unavailable".to_string())),
        Err(StepApiError::Validation("unsupported url".to_string())),
    ]);
    let dir = TempDir::new().unwrap();
    let store = SessionStore::for_workspace(dir.path());
    let executor = Executor::new(api.clone())
        .with_options(fast_options())
        .with_store(store.clone());

    let mut session = session_at("1680");
    let report = executor.run(&program.instructions, &mut session).await;

    let labels: Vec<&str> = report.results.iter().map(|r| r.outcome.label()).collect();
    assert_eq!(
        labels,
        vec!["succeeded", "failed", "not-attempted", "not-attempted", "not-attempted"]
    );
    assert_eq!(report.results[0].outcome, StepOutcome::Succeeded { step_id: 1 });
    assert_eq!(report.results[1].attempts, 4);
    match &report.results[1].outcome {
        StepOutcome::Failed { kind, fatal, .. } => {
            assert_eq!(kind, "validation");
            assert!(*fatal);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(report.aborted);
    assert!(!report.is_success());
    assert_eq!(report.counts.succeeded, 1);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.not_attempted, 3);

    assert_eq!(session.next_position, 2);
    assert_eq!(api.requests().len(), 5);
    assert_eq!(store.load().unwrap().next_position, 2);
}

#[tokio::test]
async fn continue_on_error_runs_past_transient_failures() {
    let program = program("test: Soft\ndo:\n  - c: \"#one\"\n  - c: \"#two\"\n");
    let api = ScriptedApi::new(vec![Err(StepApiError::Transient("timeout".to_string()))]);
    let executor = Executor::new(api.clone()).with_options(ExecutorOptions {
        continue_on_error: true,
        ..fast_options()
    });

    let mut session = session_at("7");
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(!report.aborted);
    assert!(matches!(
        report.results[0].outcome,
        StepOutcome::Failed { fatal: false, .. }
    ));
    assert!(matches!(report.results[1].outcome, StepOutcome::Succeeded { .. }));
    // The failed step was never created, so the next one takes its slot.
    let positions: Vec<u32> = api.requests().iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![1, 1]);
    assert_eq!(session.next_position, 2);
}

#[tokio::test]
async fn captured_output_feeds_later_steps() {
    let program = program(
        "name: Order\nsteps:\n  - store: {selector: \"#order\", as: order}\n  - write: {selector: \"#search\", text: \"Order {{order}}\"}\n",
    );
    let api = ScriptedApi::new(vec![Ok(StepCreated {
        id: Some(11),
        output: Some(json!("A-17")),
    })]);
    let executor = Executor::new(api.clone()).with_options(fast_options());

    let mut session = session_at("42");
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(report.is_success(), "{:?}", report.results);
    assert_eq!(session.variable_bindings.get("order"), Some(&json!("A-17")));
    let requests = api.requests();
    assert_eq!(requests[1].args[1], ArgValue::text("Order A-17"));
    assert!(requests.iter().all(|request| request.checkpoint_id == "42"));
}

#[tokio::test]
async fn session_without_checkpoint_fails_before_dispatch() {
    let program = program("test: Lost\ndo:\n  - c: \"#go\"\n");
    let api = ScriptedApi::new(vec![]);
    let executor = Executor::new(api.clone()).with_options(fast_options());

    let mut session = SessionContext::default();
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(report.aborted);
    assert!(api.requests().is_empty());
    match &report.results[0].outcome {
        StepOutcome::Failed { error, .. } => assert!(error.contains("no checkpoint is set")),
        other => panic!("unexpected outcome {:?}", other),
    }
}

const CONDITIONAL: &str = "name: Bulk\nsteps:\n  - store: {selector: \"#total\", as: total}\n  - if:\n      condition: \"{{total}} > 10\"\n      then:\n        - click: \"#bulk\"\n      else:\n        - click: \"#small\"\n  - click: \"#done\"\n";

fn clicked(api: &ScriptedApi) -> Vec<(u32, String)> {
    api.requests()
        .iter()
        .map(|r| (r.position, r.args.first().map(ToString::to_string).unwrap_or_default()))
        .collect()
}

#[tokio::test]
async fn runtime_branch_follows_the_captured_reply() {
    let program = program(CONDITIONAL);
    let api = ScriptedApi::new(vec![Ok(StepCreated {
        id: Some(1),
        output: Some(json!("12")),
    })]);
    let executor = Executor::new(api.clone()).with_options(fast_options());

    let mut session = session_at("1680");
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(report.is_success(), "{:?}", report.results);
    assert_eq!(report.counts.skipped, 1);
    let sent = clicked(&api);
    assert_eq!(sent[1], (2, "#bulk".to_string()));
    assert_eq!(sent[2], (3, "#done".to_string()));
    assert_eq!(sent.len(), 3);
    assert_eq!(session.next_position, 4);
    assert_eq!(report.next_positions.get("1680"), Some(&4));
}

#[tokio::test]
async fn capture_without_a_value_stops_dependent_conditions() {
    let program = program(CONDITIONAL);
    let api = ScriptedApi::new(vec![Ok(StepCreated { id: Some(1), output: None })]);
    let executor = Executor::new(api.clone()).with_options(fast_options());

    let mut session = session_at("1680");
    session.bind("total", json!(12));
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(report.aborted);
    assert_eq!(api.requests().len(), 1);
    assert!(!session.variable_bindings.contains_key("total"));
    match &report.results[1].outcome {
        StepOutcome::Failed { error, kind, fatal } => {
            assert_eq!(kind, "condition");
            assert!(*fatal);
            assert!(error.contains("'total'"), "{}", error);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(report.counts.not_attempted, 2);
    assert_eq!(session.next_position, 2);
}

#[tokio::test]
async fn capture_without_a_value_stops_dependent_placeholders() {
    let program = program(
        "name: Order\nsteps:\n  - store: {selector: \"#order\", as: order}\n  - write: {selector: \"#search\", text: \"Order {{order}}\"}\n",
    );
    let api = ScriptedApi::new(vec![Ok(StepCreated { id: Some(1), output: None })]);
    let executor = Executor::new(api.clone()).with_options(fast_options());

    let mut session = session_at("42");
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(report.aborted);
    assert_eq!(api.requests().len(), 1);
    assert!(matches!(
        &report.results[1].outcome,
        StepOutcome::Failed { kind, .. } if kind == "binding"
    ));
}

#[tokio::test]
async fn unused_try_handlers_leave_no_gap() {
    let program = program(
        "name: Guarded\nsteps:\n  - try:\n      steps:\n        - click: \"#pay\"\n      catch:\n        - click: \"#retry\"\n        - click: \"#cancel\"\n  - click: \"#done\"\n",
    );
    assert_eq!(program.instructions.len(), 4);
    let api = ScriptedApi::new(vec![]);
    let dir = TempDir::new().unwrap();
    let store = SessionStore::for_workspace(dir.path());
    let executor = Executor::new(api.clone())
        .with_options(fast_options())
        .with_store(store.clone());

    let mut session = session_at("9");
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(report.is_success());
    assert_eq!(
        clicked(&api),
        vec![(1, "#pay".to_string()), (2, "#done".to_string())]
    );
    assert_eq!(report.results[3].position, 2);
    assert_eq!(store.load().unwrap().next_position, 3);
}

#[tokio::test]
async fn start_positions_continue_an_earlier_run() {
    let program = program("test: Second\ndo:\n  - c: \"#b1\"\n  - c: \"#b2\"\n");
    let api = ScriptedApi::new(vec![]);
    let executor = Executor::new(api.clone())
        .with_options(fast_options())
        .with_start_positions([("1680".to_string(), 5)].into_iter().collect());

    let mut session = session_at("1680");
    let report = executor.run(&program.instructions, &mut session).await;

    assert!(report.is_success());
    let positions: Vec<u32> = api.requests().iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![5, 6]);
    assert_eq!(session.next_position, 7);
}
