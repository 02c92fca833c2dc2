#![allow(clippy::result_large_err)] // Compilation errors carry the offending document path as AppError context.

//! Flattens a normalized document into ordered, checkpoint-addressed
//! instructions.
//!
//! Every checkpoint resolves to a remote id (or to the session's current
//! checkpoint), blocks are inlined, bounded loops are unrolled and
//! compile-time conditions are folded away. Conditions that depend on values
//! captured while running are attached to the instructions as data for the
//! executor. Compilation either produces the whole program or fails.

pub mod scope;

pub use scope::{Lookup, Scope};

use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use crate::core::yaml_layer::actions::{ActionKind, ActionRegistry, ParamKind, RetryPolicy};
use crate::core::yaml_layer::document::{
    ActionCall, ArgValue, Dialect, ForeachBlock, IfBlock, NormalizedDocument, RepeatBlock,
    StepKind, StepNode, TestDocument,
};
use crate::core::yaml_layer::expression::ExpressionEngine;
use crate::core::yaml_layer::template::single_token;
use crate::core::yaml_layer::validate::{DEFAULT_REPEAT_VAR, MAX_LOOP_ITERATIONS};
use scope::{display_value, substitute_text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Upper bound on the instructions one document may expand to.
pub const MAX_INSTRUCTIONS: usize = 10_000;

/// Remote checkpoint an instruction is appended to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CheckpointRef {
    Id(String),
    /// Whatever checkpoint the session points at when the instruction runs.
    Session,
}

impl fmt::Display for CheckpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointRef::Id(id) => f.write_str(id),
            CheckpointRef::Session => f.write_str("<session>"),
        }
    }
}

/// Condition evaluated by the executor before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeCondition {
    pub expression: String,
    pub expect: bool,
    /// Compile-time values the expression also refers to (loop variables, declarations).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "group", rename_all = "snake_case")]
pub enum Guard {
    Body(u32),
    Handler(u32),
}

impl Guard {
    pub fn group(&self) -> u32 {
        match self {
            Guard::Body(group) | Guard::Handler(group) => *group,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionControl {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<RuntimeCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
}

impl InstructionControl {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.guard.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledInstruction {
    pub checkpoint: CheckpointRef,
    pub checkpoint_name: String,
    pub position: u32,
    pub action: ActionKind,
    pub args: Vec<ArgValue>,
    pub retry: RetryPolicy,
    #[serde(default, skip_serializing_if = "InstructionControl::is_empty")]
    pub control: InstructionControl,
    /// Captured variables whose `{{name}}` placeholders remain in `args`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_variables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captures: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub name: String,
    pub checkpoint: CheckpointRef,
    pub instructions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub name: String,
    pub dialect: Dialect,
    /// SHA-256 of the canonical document, stable across dialects.
    pub digest: String,
    pub continue_on_error: bool,
    pub checkpoints: Vec<CheckpointSummary>,
    pub instructions: Vec<CompiledInstruction>,
}

/// Inputs resolved outside the document.
#[derive(Debug, Clone)]
pub struct CompileContext {
    /// Checkpoint name → remote id.
    pub checkpoint_ids: BTreeMap<String, String>,
    /// Applies to every checkpoint without an explicit id.
    pub target_checkpoint: Option<String>,
    /// When set, session-bound checkpoints compile against this id.
    pub session_checkpoint: Option<String>,
    pub start_position: u32,
    pub env: BTreeMap<String, String>,
}

impl Default for CompileContext {
    fn default() -> Self {
        Self {
            checkpoint_ids: BTreeMap::new(),
            target_checkpoint: None,
            session_checkpoint: None,
            start_position: 1,
            env: BTreeMap::new(),
        }
    }
}

impl CompileContext {
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_target_checkpoint(mut self, id: impl Into<String>) -> Self {
        self.target_checkpoint = Some(id.into());
        self
    }

    pub fn with_session(mut self, checkpoint: Option<String>, start_position: u32) -> Self {
        self.session_checkpoint = checkpoint;
        self.start_position = start_position.max(1);
        self
    }
}

fn compile_error(code: &str, message: impl Into<String>, path: &str) -> AppError {
    let mut error = AppError::new(ErrorCategory::CompilationError, message).with_code(code);
    if !path.is_empty() {
        error.add_context("path", path);
    }
    error
}

/// Sha256 over the canonical JSON form of the document.
pub fn document_digest(document: &TestDocument) -> Result<String, AppError> {
    let bytes = serde_json::to_vec(document).map_err(|err| {
        AppError::new(
            ErrorCategory::SerializationError,
            format!("failed to serialize document for hashing: {}", err),
        )
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn compile(
    document: &NormalizedDocument,
    ctx: &CompileContext,
) -> Result<CompiledProgram, AppError> {
    Compiler::new(ActionRegistry::standard(), ctx).compile(document)
}

/// Per-checkpoint state threaded through nested step lists.
#[derive(Clone)]
struct Frame<'a> {
    checkpoint: CheckpointRef,
    checkpoint_name: &'a str,
    scope: Scope<'a>,
    conditions: Vec<RuntimeCondition>,
    guard: Option<Guard>,
}

pub struct Compiler<'r> {
    registry: &'r ActionRegistry,
    ctx: &'r CompileContext,
    engine: ExpressionEngine,
}

struct Run<'d> {
    document: &'d TestDocument,
    instructions: Vec<CompiledInstruction>,
    counters: BTreeMap<CheckpointRef, u32>,
    captured: BTreeSet<String>,
    next_group: u32,
    block_stack: Vec<&'d str>,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r ActionRegistry, ctx: &'r CompileContext) -> Self {
        Self {
            registry,
            ctx,
            engine: ExpressionEngine::default(),
        }
    }

    pub fn compile(&self, normalized: &NormalizedDocument) -> Result<CompiledProgram, AppError> {
        let document = &normalized.document;
        let mut run = Run {
            document,
            instructions: Vec::new(),
            counters: BTreeMap::new(),
            captured: BTreeSet::new(),
            next_group: 1,
            block_stack: Vec::new(),
        };
        let root_scope = Scope::new(&document.variables);
        let mut checkpoints = Vec::new();

        for checkpoint in &document.checkpoints {
            let reference = self.resolve_checkpoint(&checkpoint.name, document);
            let before = run.instructions.len();
            let frame = Frame {
                checkpoint: reference.clone(),
                checkpoint_name: &checkpoint.name,
                scope: root_scope.with_checkpoint(&checkpoint.variables),
                conditions: Vec::new(),
                guard: None,
            };
            self.compile_steps(&checkpoint.steps, &frame, &mut run)?;
            checkpoints.push(CheckpointSummary {
                name: checkpoint.name.clone(),
                checkpoint: reference,
                instructions: run.instructions.len() - before,
            });
        }

        tracing::debug!(
            name = %document.name,
            instructions = run.instructions.len(),
            "compiled document"
        );

        Ok(CompiledProgram {
            name: document.name.clone(),
            dialect: normalized.dialect,
            digest: document_digest(document)?,
            continue_on_error: document.config.continue_on_error.unwrap_or(false),
            checkpoints,
            instructions: run.instructions,
        })
    }

    fn resolve_checkpoint(&self, name: &str, document: &TestDocument) -> CheckpointRef {
        if let Some(id) = self.ctx.checkpoint_ids.get(name) {
            return CheckpointRef::Id(id.clone());
        }
        if let Some(id) = &self.ctx.target_checkpoint {
            return CheckpointRef::Id(id.clone());
        }
        let declared = document
            .starting_context
            .checkpoint
            .as_deref()
            .map(str::trim)
            .filter(|id| id.parse::<u64>().map(|n| n > 0).unwrap_or(false));
        if let Some(id) = declared {
            return CheckpointRef::Id(id.to_string());
        }
        match &self.ctx.session_checkpoint {
            Some(id) => CheckpointRef::Id(id.clone()),
            None => CheckpointRef::Session,
        }
    }

    fn is_session_bound(&self, reference: &CheckpointRef) -> bool {
        match reference {
            CheckpointRef::Session => true,
            CheckpointRef::Id(id) => self.ctx.session_checkpoint.as_deref() == Some(id.as_str()),
        }
    }

    fn compile_steps<'d>(
        &self,
        steps: &'d [StepNode],
        frame: &Frame<'d>,
        run: &mut Run<'d>,
    ) -> Result<(), AppError> {
        for step in steps {
            match &step.kind {
                StepKind::Action(call) => self.emit(call, step, frame, run)?,
                StepKind::If(block) => self.compile_if(block, step, frame, run)?,
                StepKind::Repeat(block) => self.compile_repeat(block, step, frame, run)?,
                StepKind::Foreach(block) => self.compile_foreach(block, step, frame, run)?,
                StepKind::Try(block) => {
                    let group = run.next_group;
                    run.next_group += 1;
                    let body = Frame {
                        guard: Some(Guard::Body(group)),
                        ..frame.clone()
                    };
                    self.compile_steps(&block.steps, &body, run)?;
                    let handler = Frame {
                        guard: Some(Guard::Handler(group)),
                        ..frame.clone()
                    };
                    self.compile_steps(&block.catch, &handler, run)?;
                }
                StepKind::Use(block) => {
                    let document = run.document;
                    let (name, steps) = document.blocks.get_key_value(&block.block).ok_or_else(|| {
                        compile_error(
                            "YAML-CMP-005",
                            format!("block '{}' is not declared", block.block),
                            &step.path,
                        )
                    })?;
                    if run.block_stack.contains(&name.as_str()) {
                        let mut chain: Vec<&str> = run.block_stack.clone();
                        chain.push(name);
                        return Err(compile_error(
                            "YAML-CMP-005",
                            format!("block cycle {}", chain.join(" -> ")),
                            &step.path,
                        ));
                    }
                    run.block_stack.push(name);
                    self.compile_steps(steps, frame, run)?;
                    run.block_stack.pop();
                }
            }
        }
        Ok(())
    }

    fn emit<'d>(
        &self,
        call: &ActionCall,
        step: &StepNode,
        frame: &Frame<'d>,
        run: &mut Run<'d>,
    ) -> Result<(), AppError> {
        let handler = self.registry.resolve(&call.name).ok_or_else(|| {
            compile_error(
                "YAML-CMP-001",
                format!("unknown action '{}'", call.name),
                &step.path,
            )
        })?;
        let params = handler.params();
        if call.args.len() < handler.required_count() || call.args.len() > params.len() {
            return Err(compile_error(
                "YAML-CMP-001",
                format!(
                    "action '{}' takes {} argument(s), found {}",
                    handler.kind(),
                    params.len(),
                    call.args.len()
                ),
                &step.path,
            ));
        }
        if run.instructions.len() >= MAX_INSTRUCTIONS {
            return Err(compile_error(
                "YAML-CMP-006",
                format!("document expands to more than {} instructions", MAX_INSTRUCTIONS),
                &step.path,
            ));
        }

        let mut runtime = BTreeSet::new();
        let mut args = Vec::with_capacity(call.args.len());
        for (param, arg) in params.iter().zip(&call.args) {
            args.push(self.resolve_arg(param.kind, handler.kind(), arg, step, frame, run, &mut runtime)?);
        }

        let start = if self.is_session_bound(&frame.checkpoint) {
            self.ctx.start_position
        } else {
            1
        };
        let counter = run.counters.entry(frame.checkpoint.clone()).or_insert(start);
        let position = *counter;
        *counter += 1;

        let captures = handler.captured_variable(&args).map(str::to_string);
        if let Some(name) = &captures {
            run.captured.insert(name.clone());
        }

        run.instructions.push(CompiledInstruction {
            checkpoint: frame.checkpoint.clone(),
            checkpoint_name: frame.checkpoint_name.to_string(),
            position,
            action: handler.kind(),
            args,
            retry: handler.retry_policy(),
            control: InstructionControl {
                conditions: frame.conditions.clone(),
                guard: frame.guard,
            },
            runtime_variables: runtime.into_iter().collect(),
            captures,
            source: step.path.clone(),
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_arg(
        &self,
        kind: ParamKind,
        action: ActionKind,
        arg: &ArgValue,
        step: &StepNode,
        frame: &Frame<'_>,
        run: &Run<'_>,
        runtime: &mut BTreeSet<String>,
    ) -> Result<ArgValue, AppError> {
        let ArgValue::Text(text) = arg else {
            return Ok(arg.clone());
        };
        let token = single_token(text).is_some();
        let resolved = self.substitute(text, step, frame, run)?;
        let placeholder = !resolved.runtime.is_empty();
        runtime.extend(resolved.runtime);
        let text = resolved.text;

        if placeholder {
            return Ok(ArgValue::Text(text));
        }
        match kind {
            ParamKind::Number | ParamKind::Duration if token => {
                text.trim().parse::<i64>().map(ArgValue::Number).map_err(|_| {
                    compile_error(
                        "YAML-CMP-008",
                        format!("'{}' of '{}' resolved to '{}', which is not a number", arg, action, text),
                        &step.path,
                    )
                })
            }
            ParamKind::Flag if token => match text.trim() {
                "true" => Ok(ArgValue::Flag(true)),
                "false" => Ok(ArgValue::Flag(false)),
                other => Err(compile_error(
                    "YAML-CMP-008",
                    format!("'{}' of '{}' resolved to '{}', which is not true or false", arg, action, other),
                    &step.path,
                )),
            },
            ParamKind::Url if action == ActionKind::Navigate => {
                self.join_base_url(&text, step, frame, run).map(ArgValue::Text)
            }
            _ => Ok(ArgValue::Text(text)),
        }
    }

    fn substitute(
        &self,
        text: &str,
        step: &StepNode,
        frame: &Frame<'_>,
        run: &Run<'_>,
    ) -> Result<scope::Substitution, AppError> {
        let resolved = substitute_text(text, &frame.scope, &run.captured, &self.ctx.env);
        if let Some(name) = resolved.missing.first() {
            return Err(compile_error(
                "YAML-CMP-002",
                format!(
                    "variable '{}' at {} is not declared in any enclosing scope",
                    name,
                    if step.path.is_empty() { "<step>" } else { &step.path }
                ),
                &step.path,
            )
            .with_context("variable", name.clone())
            .with_suggestion("Declare the variable or capture it with an earlier store step"));
        }
        if let Some(name) = resolved.cyclic.first() {
            return Err(compile_error(
                "YAML-CMP-002",
                format!("variable '{}' does not resolve; its value refers back to itself", name),
                &step.path,
            )
            .with_context("variable", name.clone())
            .with_suggestion("Give one of the variables in the cycle a literal value"));
        }
        if let Some(name) = resolved.missing_env.first() {
            return Err(compile_error(
                "YAML-CMP-003",
                format!("environment variable '{}' is not set", name),
                &step.path,
            )
            .with_context("variable", name.clone()));
        }
        Ok(resolved)
    }

    fn join_base_url(
        &self,
        target: &str,
        step: &StepNode,
        frame: &Frame<'_>,
        run: &Run<'_>,
    ) -> Result<String, AppError> {
        if url::Url::parse(target).is_ok() {
            return Ok(target.to_string());
        }
        let Some(base) = &run.document.base_url else {
            return Ok(target.to_string());
        };
        let base = self.substitute(base, step, frame, run)?.text;
        url::Url::parse(&base)
            .and_then(|base| base.join(target))
            .map(|joined| joined.to_string())
            .map_err(|err| {
                compile_error(
                    "YAML-CMP-008",
                    format!("cannot join '{}' onto base URL '{}': {}", target, base, err),
                    &step.path,
                )
            })
    }

    fn compile_if<'d>(
        &self,
        block: &'d IfBlock,
        step: &'d StepNode,
        frame: &Frame<'d>,
        run: &mut Run<'d>,
    ) -> Result<(), AppError> {
        let mut bindings = BTreeMap::new();
        let mut deferred = false;
        for name in ExpressionEngine::identifiers(&block.condition) {
            match frame.scope.lookup(&name, &run.captured) {
                Lookup::Bound(value) => {
                    bindings.insert(name, value.clone());
                }
                Lookup::Captured => deferred = true,
                Lookup::Missing => {
                    return Err(compile_error(
                        "YAML-CMP-002",
                        format!("condition refers to undeclared variable '{}'", name),
                        &step.path,
                    )
                    .with_context("variable", name));
                }
            }
        }

        if deferred {
            self.engine.compile(&block.condition).map_err(|err| {
                compile_error("YAML-CMP-007", err.message, &step.path)
            })?;
            for (branch, expect) in [(&block.then, true), (&block.otherwise, false)] {
                let mut nested = frame.clone();
                nested.conditions.push(RuntimeCondition {
                    expression: block.condition.clone(),
                    expect,
                    bindings: bindings.clone(),
                });
                self.compile_steps(branch, &nested, run)?;
            }
            return Ok(());
        }

        let taken = self
            .engine
            .evaluate_bool(&block.condition, &bindings)
            .map_err(|err| compile_error("YAML-CMP-007", err.message, &step.path))?;
        tracing::debug!(condition = %block.condition, taken, path = %step.path, "folded condition");
        let branch = if taken { &block.then } else { &block.otherwise };
        self.compile_steps(branch, frame, run)
    }

    /// Literal or single-token loop bound, checked against the iteration cap.
    fn loop_bound(
        &self,
        value: &Value,
        label: &str,
        step: &StepNode,
        frame: &Frame<'_>,
        run: &Run<'_>,
    ) -> Result<u64, AppError> {
        let resolved = match value {
            Value::String(text) => match single_token(text) {
                Some(path) => match frame.scope.lookup(&path, &run.captured) {
                    Lookup::Bound(value) => value.clone(),
                    Lookup::Captured => {
                        return Err(compile_error(
                            "YAML-CMP-004",
                            format!("loop {} depends on runtime value '{}'", label, path),
                            &step.path,
                        ))
                    }
                    Lookup::Missing => {
                        return Err(compile_error(
                            "YAML-CMP-002",
                            format!("loop {} refers to undeclared variable '{}'", label, path),
                            &step.path,
                        )
                        .with_context("variable", path))
                    }
                },
                None => value.clone(),
            },
            other => other.clone(),
        };
        let count = match &resolved {
            Value::Number(n) => n.as_u64(),
            Value::String(text) => text.trim().parse::<u64>().ok(),
            _ => None,
        };
        match count {
            Some(count) if count <= MAX_LOOP_ITERATIONS => Ok(count),
            Some(count) => Err(compile_error(
                "YAML-CMP-004",
                format!("loop {} {} exceeds the limit of {}", label, count, MAX_LOOP_ITERATIONS),
                &step.path,
            )),
            None => Err(compile_error(
                "YAML-CMP-004",
                format!("loop {} '{}' is not a non-negative integer", label, display_value(&resolved)),
                &step.path,
            )),
        }
    }

    fn reject_until(&self, until: Option<&String>, step: &StepNode) -> Result<(), AppError> {
        match until {
            Some(condition) => Err(compile_error(
                "YAML-CMP-004",
                format!("loop with runtime stop condition '{}' cannot be unrolled", condition),
                &step.path,
            )),
            None => Ok(()),
        }
    }

    fn compile_repeat<'d>(
        &self,
        block: &'d RepeatBlock,
        step: &'d StepNode,
        frame: &Frame<'d>,
        run: &mut Run<'d>,
    ) -> Result<(), AppError> {
        self.reject_until(block.until.as_ref(), step)?;
        let times = self.loop_bound(&block.times, "times", step, frame, run)?;
        let var = block.var.as_deref().unwrap_or(DEFAULT_REPEAT_VAR);
        for index in 1..=times {
            let nested = Frame {
                scope: frame.scope.with_loop_var(var, Value::from(index)),
                ..frame.clone()
            };
            self.compile_steps(&block.steps, &nested, run)?;
        }
        Ok(())
    }

    fn compile_foreach<'d>(
        &self,
        block: &'d ForeachBlock,
        step: &'d StepNode,
        frame: &Frame<'d>,
        run: &mut Run<'d>,
    ) -> Result<(), AppError> {
        self.reject_until(block.until.as_ref(), step)?;
        let items: Vec<Value> = match &block.over {
            Value::Array(items) => items.clone(),
            Value::String(text) => {
                let name = single_token(text).unwrap_or_else(|| text.trim().to_string());
                match frame.scope.lookup(&name, &run.captured) {
                    Lookup::Bound(Value::Array(items)) => items.clone(),
                    Lookup::Bound(_) => {
                        return Err(compile_error(
                            "YAML-CMP-004",
                            format!("foreach source '{}' is not a list", name),
                            &step.path,
                        ))
                    }
                    Lookup::Captured => {
                        return Err(compile_error(
                            "YAML-CMP-004",
                            format!("foreach source '{}' is only known at runtime", name),
                            &step.path,
                        ))
                    }
                    Lookup::Missing => {
                        return Err(compile_error(
                            "YAML-CMP-002",
                            format!("foreach source '{}' is not declared", name),
                            &step.path,
                        )
                        .with_context("variable", name))
                    }
                }
            }
            Value::Null => Vec::new(),
            other => {
                return Err(compile_error(
                    "YAML-CMP-004",
                    format!("cannot iterate over {}", other),
                    &step.path,
                ))
            }
        };
        let limit = match &block.max {
            Some(max) => self.loop_bound(max, "max", step, frame, run)? as usize,
            None => items.len(),
        };
        if limit.min(items.len()) as u64 > MAX_LOOP_ITERATIONS {
            return Err(compile_error(
                "YAML-CMP-004",
                format!(
                    "foreach over {} items exceeds the limit of {}",
                    items.len(),
                    MAX_LOOP_ITERATIONS
                ),
                &step.path,
            ));
        }
        for item in items.into_iter().take(limit) {
            let nested = Frame {
                scope: frame.scope.with_loop_var(&block.var, item),
                ..frame.clone()
            };
            self.compile_steps(&block.steps, &nested, run)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::yaml_layer::normalizer;

    fn program(text: &str, dialect: Dialect, ctx: &CompileContext) -> Result<CompiledProgram, AppError> {
        let tree = normalizer::load_tree(text).expect("tree");
        let document = normalizer::normalize(&tree, dialect).expect("normalized");
        compile(&document, ctx)
    }

    #[test]
    fn positions_restart_per_checkpoint_and_continue_for_shared_ids() {
        let mut ctx = CompileContext::default();
        ctx.checkpoint_ids.insert("setup".to_string(), "7".to_string());
        ctx.checkpoint_ids.insert("main".to_string(), "9".to_string());
        ctx.checkpoint_ids.insert("teardown".to_string(), "7".to_string());
        let program = program(
            "test: T\nsetup:\n  - nav: https://x.test\ndo:\n  - c: Go\n  - c: Again\nteardown:\n  - c: Logout\n",
            Dialect::Compact,
            &ctx,
        )
        .expect("compiled");
        let positions: Vec<(String, u32)> = program
            .instructions
            .iter()
            .map(|i| (i.checkpoint.to_string(), i.position))
            .collect();
        assert_eq!(
            positions,
            vec![
                ("7".to_string(), 1),
                ("9".to_string(), 1),
                ("9".to_string(), 2),
                ("7".to_string(), 2)
            ]
        );
    }

    #[test]
    fn session_checkpoint_starts_at_the_session_position() {
        let ctx = CompileContext::default().with_session(None, 5);
        let program = program("test: T\ndo:\n  - c: A\n  - c: B\n", Dialect::Compact, &ctx).expect("compiled");
        assert!(program.instructions.iter().all(|i| i.checkpoint == CheckpointRef::Session));
        assert_eq!(program.instructions[0].position, 5);
        assert_eq!(program.instructions[1].position, 6);
    }

    #[test]
    fn loops_unroll_with_loop_variables() {
        let program = program(
            "name: Loop\nvariables:\n  users: [ann, bob, cid]\nsteps:\n  - repeat:\n      times: 2\n      steps:\n        - comment: \"pass {{index}}\"\n  - foreach:\n      over: users\n      as: user\n      max: 2\n      steps:\n        - write: {selector: \"#u\", text: \"{{user}}\"}\n",
            Dialect::Simplified,
            &CompileContext::default(),
        )
        .expect("compiled");
        let args: Vec<String> = program
            .instructions
            .iter()
            .map(|i| i.args.last().map(ToString::to_string).unwrap_or_default())
            .collect();
        assert_eq!(args, vec!["pass 1", "pass 2", "ann", "bob"]);
    }

    #[test]
    fn static_conditions_fold_and_runtime_conditions_attach() {
        let program = program(
            "name: Cond\nvariables:\n  role: admin\nsteps:\n  - store: {selector: \"#total\", as: total}\n  - if:\n      condition: role == \"admin\"\n      then:\n        - click: \"#admin\"\n      else:\n        - click: \"#user\"\n  - if:\n      condition: \"{{total}} > 10\"\n      then:\n        - click: \"#bulk\"\n",
            Dialect::Simplified,
            &CompileContext::default(),
        )
        .expect("compiled");
        assert_eq!(program.instructions.len(), 3);
        assert_eq!(program.instructions[1].args, vec![ArgValue::text("#admin")]);
        assert!(program.instructions[1].control.is_empty());
        let runtime = &program.instructions[2].control.conditions;
        assert_eq!(runtime.len(), 1);
        assert!(runtime[0].expect);
        assert_eq!(runtime[0].expression, "{{total}} > 10");
    }

    #[test]
    fn captured_values_become_runtime_placeholders() {
        let program = program(
            "name: Capture\nsteps:\n  - store: {selector: \"#order\", as: order}\n  - write: {selector: \"#q\", text: \"Order {{order}}\"}\n",
            Dialect::Simplified,
            &CompileContext::default(),
        )
        .expect("compiled");
        let write = &program.instructions[1];
        assert_eq!(write.args[1], ArgValue::text("Order {{order}}"));
        assert_eq!(write.runtime_variables, vec!["order".to_string()]);
        assert_eq!(program.instructions[0].captures.as_deref(), Some("order"));
    }

    #[test]
    fn undeclared_variables_fail_with_the_path() {
        let err = program(
            "name: Broken\nsteps:\n  - write: {selector: \"#u\", text: \"{{username}}\"}\n",
            Dialect::Simplified,
            &CompileContext::default(),
        )
        .expect_err("unresolved");
        assert_eq!(err.code, "YAML-CMP-002");
        assert!(err.message.contains("username"));
        assert_eq!(err.path(), Some("steps[0]"));
    }

    #[test]
    fn variables_referring_to_each_other_fail() {
        let err = program(
            "name: Loop\nvariables:\n  a: \"{{b}}\"\n  b: \"{{a}}\"\nsteps:\n  - write: {selector: \"#u\", text: \"{{a}}\"}\n",
            Dialect::Simplified,
            &CompileContext::default(),
        )
        .expect_err("cycle");
        assert_eq!(err.code, "YAML-CMP-002");
        assert_eq!(err.context.get("variable").map(String::as_str), Some("a"));
        assert!(err.message.contains("refers back to itself"));
    }

    #[test]
    fn try_blocks_mark_guard_groups() {
        let program = program(
            "name: Guarded\nsteps:\n  - try:\n      steps:\n        - click: \"#maybe\"\n      catch:\n        - comment: recovered\n",
            Dialect::Simplified,
            &CompileContext::default(),
        )
        .expect("compiled");
        assert_eq!(program.instructions[0].control.guard, Some(Guard::Body(1)));
        assert_eq!(program.instructions[1].control.guard, Some(Guard::Handler(1)));
    }

    #[test]
    fn relative_navigation_joins_the_base_url() {
        let program = program(
            "test: Rel\nbase: https://shop.test/app/\ndo:\n  - nav: login\n",
            Dialect::Compact,
            &CompileContext::default(),
        )
        .expect("compiled");
        assert_eq!(program.instructions[0].args, vec![ArgValue::text("https://shop.test/app/login")]);
    }

    #[test]
    fn numeric_tokens_are_coerced() {
        let program = program(
            "name: Wait\nvariables:\n  pause: 250\nsteps:\n  - wait: {duration: \"{{pause}}\"}\n",
            Dialect::Simplified,
            &CompileContext::default(),
        )
        .expect("compiled");
        assert_eq!(program.instructions[0].action, ActionKind::WaitTime);
        assert_eq!(program.instructions[0].args, vec![ArgValue::Number(250)]);
    }
}
