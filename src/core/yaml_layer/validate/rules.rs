use super::{RuleContext, ValidationIssue, ValidationLayer, ValidationRule, MAX_LOOP_ITERATIONS};
use crate::core::yaml_layer::actions::{ActionHandler, ActionKind, ParamKind};
use crate::core::yaml_layer::dialect::example_snippet;
use crate::core::yaml_layer::document::{
    ArgValue, CheckpointBlock, Dialect, StepKind, StepNode, TestDocument,
};
use crate::core::yaml_layer::expression::ExpressionEngine;
use crate::core::yaml_layer::template::{has_references, references, single_token, Reference};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

pub fn built_in_rules() -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(DocumentNameRule),
        Box::new(StepsPresentRule),
        Box::new(UnknownActionRule),
        Box::new(ArgumentCountRule),
        Box::new(ArgumentTypeRule),
        Box::new(ControlShapeRule),
        Box::new(EmptyBlockReferenceRule),
        Box::new(DuplicateCheckpointRule),
        Box::new(LoopBoundRule),
        Box::new(UnboundedLoopRule),
        Box::new(CheckpointIdentifierRule),
        Box::new(NegativeValueRule),
        Box::new(FormatRule),
        Box::new(UrlRule),
        Box::new(ConditionSyntaxRule),
        Box::new(VariableResolutionRule),
        Box::new(UnknownBlockRule),
        Box::new(BlockCycleRule),
        Box::new(VariableCycleRule),
        Box::new(ConditionIdentifierRule),
        Box::new(ForeachSourceRule),
        Box::new(FixedWaitRule),
        Box::new(NavigateWithoutWaitRule),
        Box::new(HardcodedCredentialRule),
        Box::new(LongNameRule),
        Box::new(AbsoluteXPathRule),
        Box::new(EmptyCheckpointRule),
        Box::new(UnusedVariableRule),
    ]
}

/// Default loop variable bound by `repeat` when none is named.
pub const DEFAULT_REPEAT_VAR: &str = "index";

/// A step together with the scope visible where it is declared.
pub(crate) struct Visit<'a> {
    pub step: &'a StepNode,
    pub checkpoint: Option<&'a CheckpointBlock>,
    pub loop_vars: Vec<String>,
    pub in_block: bool,
    pub next: Option<&'a StepNode>,
}

impl Visit<'_> {
    fn path(&self) -> String {
        if self.step.path.is_empty() {
            format!("step {}", self.step.raw_position)
        } else {
            self.step.path.clone()
        }
    }
}

/// Checkpoints in order, then reusable blocks; nested bodies depth-first.
pub(crate) fn walk<'a>(document: &'a TestDocument, visitor: &mut dyn FnMut(&Visit<'a>)) {
    for checkpoint in &document.checkpoints {
        walk_list(&checkpoint.steps, Some(checkpoint), false, &mut Vec::new(), visitor);
    }
    for steps in document.blocks.values() {
        walk_list(steps, None, true, &mut Vec::new(), visitor);
    }
}

fn walk_list<'a>(
    steps: &'a [StepNode],
    checkpoint: Option<&'a CheckpointBlock>,
    in_block: bool,
    loop_vars: &mut Vec<String>,
    visitor: &mut dyn FnMut(&Visit<'a>),
) {
    for (index, step) in steps.iter().enumerate() {
        visitor(&Visit {
            step,
            checkpoint,
            loop_vars: loop_vars.clone(),
            in_block,
            next: steps.get(index + 1),
        });
        let bound = loop_variable(step);
        if let Some(var) = &bound {
            loop_vars.push(var.clone());
        }
        for (_, nested) in step.children() {
            walk_list(nested, checkpoint, in_block, loop_vars, visitor);
        }
        if bound.is_some() {
            loop_vars.pop();
        }
    }
}

pub(crate) fn loop_variable(step: &StepNode) -> Option<String> {
    match &step.kind {
        StepKind::Repeat(block) => Some(
            block
                .var
                .clone()
                .unwrap_or_else(|| DEFAULT_REPEAT_VAR.to_string()),
        ),
        StepKind::Foreach(block) => Some(block.var.clone()),
        _ => None,
    }
}

fn handler_for(ctx: &RuleContext<'_>, name: &str) -> Option<Arc<dyn ActionHandler>> {
    ctx.registry.resolve(name)
}

fn example(ctx: &RuleContext<'_>, kind: ActionKind) -> String {
    match ctx.registry.get(kind) {
        Some(handler) => example_snippet(ctx.document.dialect, kind, handler.sample_args()),
        None => String::new(),
    }
}

fn name_field(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Compact => "test",
        _ => "name",
    }
}

fn steps_field(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Compact => "do",
        _ => "steps",
    }
}

fn variables_field(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Compact => "data",
        _ => "variables",
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Every action call with its handler, skipping unknown names.
fn for_each_action<'a>(
    ctx: &RuleContext<'a>,
    mut visitor: impl FnMut(&Visit<'a>, &[ArgValue], &Arc<dyn ActionHandler>),
) {
    walk(&ctx.document.document, &mut |visit| {
        if let StepKind::Action(call) = &visit.step.kind {
            if let Some(handler) = handler_for(ctx, &call.name) {
                visitor(visit, &call.args, &handler);
            }
        }
    });
}

// ---------------------------------------------------------------- schema

struct DocumentNameRule;

impl ValidationRule for DocumentNameRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Schema
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if !ctx.document.document.name.trim().is_empty() {
            return Vec::new();
        }
        let field = name_field(ctx.document.dialect);
        vec![ValidationIssue::error(
            ValidationLayer::Schema,
            "YAML-SCH-001",
            format!("missing required field '{}'", field),
            field,
        )
        .with_suggestion(format!("Add a top-level '{}' naming the test", field))
        .with_example(format!("{}: Checkout happy path", field))]
    }
}

struct StepsPresentRule;

impl ValidationRule for StepsPresentRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Schema
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let document = &ctx.document.document;
        if document.checkpoints.iter().any(|cp| !cp.steps.is_empty()) {
            return Vec::new();
        }
        let field = steps_field(ctx.document.dialect);
        vec![ValidationIssue::error(
            ValidationLayer::Schema,
            "YAML-SCH-002",
            "document contains no steps",
            field,
        )
        .with_suggestion(format!("Add at least one step under '{}'", field))
        .with_example(example(ctx, ActionKind::Navigate))]
    }
}

struct UnknownActionRule;

impl ValidationRule for UnknownActionRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Schema
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        walk(&ctx.document.document, &mut |visit| {
            let StepKind::Action(call) = &visit.step.kind else {
                return;
            };
            if handler_for(ctx, &call.name).is_some() {
                return;
            }
            let mut issue = ValidationIssue::error(
                ValidationLayer::Schema,
                "YAML-SCH-003",
                format!(
                    "unknown action '{}' for the {} dialect",
                    call.name, ctx.document.dialect
                ),
                visit.path(),
            );
            let bare = call.name.rsplit('.').next().unwrap_or(&call.name);
            let guess = ActionKind::from_alias(bare).or_else(|| ActionKind::closest(bare));
            issue = match guess {
                Some(kind) => issue
                    .with_suggestion(format!("Did you mean '{}'?", kind))
                    .with_example(example(ctx, kind)),
                None => issue.with_suggestion(format!(
                    "Supported actions: {}",
                    ActionKind::ALL
                        .iter()
                        .map(|kind| kind.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            };
            out.push(issue);
        });
        out
    }
}

struct ArgumentCountRule;

impl ValidationRule for ArgumentCountRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Schema
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        for_each_action(ctx, |visit, args, handler| {
            let required = handler.required_count();
            let max = handler.params().len();
            if args.len() >= required && args.len() <= max {
                return;
            }
            let names: Vec<&str> = handler.params().iter().map(|param| param.name).collect();
            let expected = if required == max {
                format!("{}", required)
            } else {
                format!("{} to {}", required, max)
            };
            out.push(
                ValidationIssue::error(
                    ValidationLayer::Schema,
                    "YAML-SCH-004",
                    format!(
                        "action '{}' expects {} argument(s) ({}), found {}",
                        handler.kind(),
                        expected,
                        names.join(", "),
                        args.len()
                    ),
                    visit.path(),
                )
                .with_suggestion(format!("Provide {} for '{}'", names.join(" and "), handler.kind()))
                .with_example(example(ctx, handler.kind())),
            );
        });
        out
    }
}

struct ArgumentTypeRule;

impl ArgumentTypeRule {
    fn problem(kind: ParamKind, value: &ArgValue) -> Option<String> {
        match (kind, value) {
            (ParamKind::Number | ParamKind::Duration, ArgValue::Number(_)) => None,
            (ParamKind::Number | ParamKind::Duration, ArgValue::Text(text))
                if single_token(text).is_some() =>
            {
                None
            }
            (ParamKind::Number | ParamKind::Duration, other) => Some(format!(
                "must be a number, found {}",
                describe_arg(other)
            )),
            (ParamKind::Flag, ArgValue::Flag(_)) => None,
            (ParamKind::Flag, other) => Some(format!("must be true or false, found {}", describe_arg(other))),
            (ParamKind::Text, ArgValue::Text(_) | ArgValue::Number(_)) => None,
            (ParamKind::Selector, ArgValue::Text(text)) if text.trim().is_empty() => {
                Some("selector must not be empty".to_string())
            }
            (ParamKind::Variable, ArgValue::Text(text)) if !is_identifier(text) => Some(format!(
                "'{}' is not a valid variable name",
                text
            )),
            (_, ArgValue::Text(text)) if text.trim().is_empty() => Some("must not be empty".to_string()),
            (_, ArgValue::Text(_)) => None,
            (_, other) => Some(format!("must be a string, found {}", describe_arg(other))),
        }
    }
}

fn describe_arg(value: &ArgValue) -> String {
    match value {
        ArgValue::Flag(b) => format!("boolean {}", b),
        ArgValue::Number(n) => format!("number {}", n),
        ArgValue::Text(s) => format!("string '{}'", s),
    }
}

impl ValidationRule for ArgumentTypeRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Schema
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        for_each_action(ctx, |visit, args, handler| {
            for (param, value) in handler.params().iter().zip(args) {
                if let Some(problem) = Self::problem(param.kind, value) {
                    out.push(
                        ValidationIssue::error(
                            ValidationLayer::Schema,
                            "YAML-SCH-005",
                            format!("{} of '{}' {}", param.name, handler.kind(), problem),
                            visit.path(),
                        )
                        .with_suggestion(format!(
                            "'{}' takes a {:?} value",
                            param.name, param.kind
                        ))
                        .with_example(example(ctx, handler.kind())),
                    );
                }
            }
        });
        out
    }
}

struct ControlShapeRule;

impl ValidationRule for ControlShapeRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Schema
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        let mut push = |path: String, message: &str| {
            out.push(ValidationIssue::error(
                ValidationLayer::Schema,
                "YAML-SCH-006",
                message.to_string(),
                path,
            ));
        };
        walk(&ctx.document.document, &mut |visit| match &visit.step.kind {
            StepKind::If(block) => {
                if block.condition.trim().is_empty() {
                    push(visit.path(), "if requires a non-empty condition");
                }
                if block.then.is_empty() && block.otherwise.is_empty() {
                    push(visit.path(), "if has neither then nor else steps");
                }
            }
            StepKind::Repeat(block) => {
                if block.steps.is_empty() {
                    push(visit.path(), "repeat has no steps");
                }
                if let Some(var) = &block.var {
                    if !is_identifier(var) {
                        push(visit.path(), "repeat 'as' must be a valid variable name");
                    }
                }
            }
            StepKind::Foreach(block) => {
                if block.steps.is_empty() {
                    push(visit.path(), "foreach has no steps");
                }
                if !is_identifier(&block.var) {
                    push(visit.path(), "foreach 'as' must be a valid variable name");
                }
                if block.over.is_null() {
                    push(visit.path(), "foreach requires 'over'");
                }
            }
            StepKind::Try(block) => {
                if block.steps.is_empty() {
                    push(visit.path(), "try has no steps");
                }
            }
            StepKind::Action(_) | StepKind::Use(_) => {}
        });
        out
    }
}

struct EmptyBlockReferenceRule;

impl ValidationRule for EmptyBlockReferenceRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Schema
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        walk(&ctx.document.document, &mut |visit| {
            if let StepKind::Use(block) = &visit.step.kind {
                if block.block.trim().is_empty() {
                    out.push(
                        ValidationIssue::error(
                            ValidationLayer::Schema,
                            "YAML-SCH-007",
                            "block reference has no block name",
                            visit.path(),
                        )
                        .with_suggestion("Name one of the blocks declared under 'blocks'"),
                    );
                }
            }
        });
        out
    }
}

// -------------------------------------------------------------- semantic

struct DuplicateCheckpointRule;

impl ValidationRule for DuplicateCheckpointRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        let mut out = Vec::new();
        for (index, checkpoint) in ctx.document.document.checkpoints.iter().enumerate() {
            let path = format!("checkpoints[{}]", index);
            if checkpoint.name.trim().is_empty() {
                out.push(ValidationIssue::error(
                    ValidationLayer::Semantic,
                    "YAML-SEM-001",
                    "checkpoint has no name",
                    path,
                ));
                continue;
            }
            if let Some(first) = seen.get(checkpoint.name.as_str()).copied() {
                out.push(
                    ValidationIssue::error(
                        ValidationLayer::Semantic,
                        "YAML-SEM-001",
                        format!(
                            "checkpoint name '{}' is already used by checkpoints[{}]",
                            checkpoint.name, first
                        ),
                        path,
                    )
                    .with_suggestion("Give every checkpoint a unique name"),
                );
            } else {
                seen.insert(checkpoint.name.as_str(), index);
            }
        }
        out
    }
}

/// Loop bounds must be literal non-negative integers within the cap, or a single token.
fn bound_problem(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => match n.as_u64() {
            Some(count) if count <= MAX_LOOP_ITERATIONS => None,
            Some(count) => Some(format!(
                "bound {} exceeds the limit of {} iterations",
                count, MAX_LOOP_ITERATIONS
            )),
            None => Some(format!("bound {} is not a non-negative integer", n)),
        },
        Value::String(text) if single_token(text).is_some() => None,
        Value::Null => Some("bound is missing".to_string()),
        other => Some(format!("bound {} is not a finite integer", other)),
    }
}

struct LoopBoundRule;

impl ValidationRule for LoopBoundRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        walk(&ctx.document.document, &mut |visit| {
            let problems = match &visit.step.kind {
                StepKind::Repeat(block) => vec![("times", bound_problem(&block.times))],
                StepKind::Foreach(block) => {
                    let mut problems = vec![(
                        "max",
                        block.max.as_ref().and_then(bound_problem),
                    )];
                    if let Value::Array(items) = &block.over {
                        if block.max.is_none() && items.len() as u64 > MAX_LOOP_ITERATIONS {
                            problems.push((
                                "over",
                                Some(format!(
                                    "{} items exceed the limit of {} iterations",
                                    items.len(),
                                    MAX_LOOP_ITERATIONS
                                )),
                            ));
                        }
                    }
                    problems
                }
                _ => Vec::new(),
            };
            for (field, problem) in problems {
                if let Some(problem) = problem {
                    out.push(
                        ValidationIssue::error(
                            ValidationLayer::Semantic,
                            "YAML-SEM-002",
                            format!("loop {}: {}", field, problem),
                            visit.path(),
                        )
                        .with_suggestion(format!(
                            "Use a literal count between 0 and {}",
                            MAX_LOOP_ITERATIONS
                        )),
                    );
                }
            }
        });
        out
    }
}

struct UnboundedLoopRule;

impl ValidationRule for UnboundedLoopRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        walk(&ctx.document.document, &mut |visit| {
            let until = match &visit.step.kind {
                StepKind::Repeat(block) => block.until.as_ref(),
                StepKind::Foreach(block) => block.until.as_ref(),
                _ => None,
            };
            if let Some(until) = until {
                out.push(
                    ValidationIssue::error(
                        ValidationLayer::Semantic,
                        "YAML-SEM-003",
                        format!(
                            "loop stops on runtime condition '{}'; the number of steps cannot be known before execution",
                            until
                        ),
                        visit.path(),
                    )
                    .with_suggestion("Replace 'until' with a fixed count or a bounded list"),
                );
            }
        });
        out
    }
}

struct CheckpointIdentifierRule;

impl ValidationRule for CheckpointIdentifierRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let Some(id) = &ctx.document.document.starting_context.checkpoint else {
            return Vec::new();
        };
        let trimmed = id.trim();
        let starts_numeric = trimmed.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false);
        let all_digits = !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit());
        let problem = if trimmed.is_empty() {
            Some("checkpoint identifier is empty".to_string())
        } else if starts_numeric && !all_digits {
            Some(format!("checkpoint identifier '{}' is not a number", id))
        } else if all_digits && trimmed.parse::<u64>().map(|n| n == 0).unwrap_or(true) {
            Some(format!("checkpoint identifier '{}' is out of range", id))
        } else {
            None
        };
        let path = match ctx.document.dialect {
            Dialect::Extended => "infrastructure.checkpoint",
            _ => "checkpoint",
        };
        problem
            .map(|message| {
                vec![ValidationIssue::error(
                    ValidationLayer::Semantic,
                    "YAML-SEM-004",
                    message,
                    path,
                )
                .with_suggestion("Use a positive numeric checkpoint id or a checkpoint name")]
            })
            .unwrap_or_default()
    }
}

struct NegativeValueRule;

impl ValidationRule for NegativeValueRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        for_each_action(ctx, |visit, args, handler| {
            for (param, value) in handler.params().iter().zip(args) {
                if let (true, Some(n)) = (param.kind.is_numeric(), value.as_number()) {
                    if n < 0 {
                        out.push(ValidationIssue::error(
                            ValidationLayer::Semantic,
                            "YAML-SEM-005",
                            format!("{} of '{}' must not be negative, found {}", param.name, handler.kind(), n),
                            visit.path(),
                        ));
                    }
                }
            }
        });
        out
    }
}

fn size_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+x\d+$").expect("size pattern is valid"))
}

struct FormatRule;

impl ValidationRule for FormatRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        let malformed = |text: &str| !has_references(text) && !size_pattern().is_match(text.trim());
        if let Some(viewport) = &ctx.document.document.config.viewport {
            if malformed(viewport) {
                out.push(ValidationIssue::error(
                    ValidationLayer::Semantic,
                    "YAML-SEM-006",
                    format!("viewport '{}' must look like WIDTHxHEIGHT", viewport),
                    "config.viewport",
                ));
            }
        }
        for_each_action(ctx, |visit, args, handler| {
            for (param, value) in handler.params().iter().zip(args) {
                if param.kind != ParamKind::Size {
                    continue;
                }
                if let ArgValue::Text(text) = value {
                    if malformed(text) {
                        out.push(
                            ValidationIssue::error(
                                ValidationLayer::Semantic,
                                "YAML-SEM-006",
                                format!("size '{}' must look like WIDTHxHEIGHT", text),
                                visit.path(),
                            )
                            .with_example(example(ctx, handler.kind())),
                        );
                    }
                }
            }
        });
        out
    }
}

struct UrlRule;

impl UrlRule {
    fn is_absolute(text: &str) -> bool {
        url::Url::parse(text)
            .map(|url| matches!(url.scheme(), "http" | "https" | "file"))
            .unwrap_or(false)
    }
}

impl ValidationRule for UrlRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        let base = ctx.document.document.base_url.as_deref();
        let base_ok = base.map(|url| Self::is_absolute(url) || has_references(url));
        if base_ok == Some(false) {
            out.push(ValidationIssue::error(
                ValidationLayer::Semantic,
                "YAML-SEM-007",
                format!("base URL '{}' is not absolute", base.unwrap_or_default()),
                match ctx.document.dialect {
                    Dialect::Compact => "base",
                    _ => "base_url",
                },
            ));
        }
        for_each_action(ctx, |visit, args, handler| {
            for (param, value) in handler.params().iter().zip(args) {
                let (ParamKind::Url, ArgValue::Text(text)) = (param.kind, value) else {
                    continue;
                };
                if has_references(text) || Self::is_absolute(text) || base_ok == Some(true) {
                    continue;
                }
                out.push(
                    ValidationIssue::error(
                        ValidationLayer::Semantic,
                        "YAML-SEM-007",
                        format!(
                            "URL '{}' is relative and the document declares no base URL",
                            text
                        ),
                        visit.path(),
                    )
                    .with_suggestion("Use an absolute http(s) URL or declare a base URL"),
                );
            }
        });
        out
    }
}

struct ConditionSyntaxRule;

impl ValidationRule for ConditionSyntaxRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::Semantic
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        walk(&ctx.document.document, &mut |visit| {
            if let StepKind::If(block) = &visit.step.kind {
                if let Err(err) = ctx.engine.compile(&block.condition) {
                    out.push(
                        ValidationIssue::error(
                            ValidationLayer::Semantic,
                            "YAML-SEM-008",
                            err.message,
                            visit.path(),
                        )
                        .with_suggestion("Write conditions like '{{total}} > 10' or 'role == \"admin\"'"),
                    );
                }
            }
        });
        out
    }
}

// ------------------------------------------------------- cross-reference

/// Names visible at a step, excluding captured ones.
fn declared_scope(document: &TestDocument, visit: &Visit<'_>) -> BTreeSet<String> {
    let mut scope: BTreeSet<String> = document.variables.keys().cloned().collect();
    scope.extend(visit.loop_vars.iter().cloned());
    if visit.in_block {
        for checkpoint in &document.checkpoints {
            scope.extend(checkpoint.variables.keys().cloned());
        }
    } else if let Some(checkpoint) = visit.checkpoint {
        scope.extend(checkpoint.variables.keys().cloned());
    }
    scope
}

/// Variables a step captures when it succeeds, following block references.
fn captures_of(
    ctx: &RuleContext<'_>,
    step: &StepNode,
    visiting: &mut BTreeSet<String>,
    out: &mut BTreeSet<String>,
) {
    match &step.kind {
        StepKind::Action(call) => {
            if let Some(handler) = handler_for(ctx, &call.name) {
                if let Some(name) = handler.captured_variable(&call.args) {
                    out.insert(name.to_string());
                }
            }
        }
        StepKind::Use(block) => {
            if !visiting.insert(block.block.clone()) {
                return;
            }
            if let Some(steps) = ctx.document.document.blocks.get(&block.block) {
                for nested in steps {
                    captures_of(ctx, nested, visiting, out);
                }
            }
        }
        _ => {
            for (_, nested) in step.children() {
                for child in nested {
                    captures_of(ctx, child, visiting, out);
                }
            }
        }
    }
}

/// Text fields of a step that may carry `{{name}}` references, with a label.
fn reference_sites(step: &StepNode) -> Vec<(&'static str, String)> {
    match &step.kind {
        StepKind::Action(call) => call
            .args
            .iter()
            .filter_map(ArgValue::as_text)
            .map(|text| ("argument", text.to_string()))
            .collect(),
        StepKind::Repeat(block) => block
            .times
            .as_str()
            .map(|text| vec![("times", text.to_string())])
            .unwrap_or_default(),
        StepKind::Foreach(block) => {
            let mut sites = Vec::new();
            if let Some(text) = block.over.as_str() {
                sites.push(("over", text.to_string()));
            }
            if let Some(text) = block.max.as_ref().and_then(Value::as_str) {
                sites.push(("max", text.to_string()));
            }
            sites
        }
        _ => Vec::new(),
    }
}

struct VariableResolutionRule;

impl ValidationRule for VariableResolutionRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::CrossReference
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let document = &ctx.document.document;
        let mut all_captured = BTreeSet::new();
        walk(document, &mut |visit| {
            captures_of(ctx, visit.step, &mut BTreeSet::new(), &mut all_captured);
        });

        let mut captured = BTreeSet::new();
        let mut out = Vec::new();
        walk(document, &mut |visit| {
            let scope = declared_scope(document, visit);
            for (site, text) in reference_sites(visit.step) {
                for reference in references(&text) {
                    match reference {
                        Reference::Variable { root, path } => {
                            let known = scope.contains(&root)
                                || captured.contains(&root)
                                || (visit.in_block && all_captured.contains(&root));
                            if !known {
                                out.push(
                                    ValidationIssue::error(
                                        ValidationLayer::CrossReference,
                                        "YAML-REF-001",
                                        format!(
                                            "variable '{}' in {} '{{{{{}}}}}' is not declared in any enclosing scope",
                                            root, site, path
                                        ),
                                        visit.path(),
                                    )
                                    .with_suggestion(format!(
                                        "Declare '{}' under '{}' or capture it with an earlier store step",
                                        root,
                                        variables_field(ctx.document.dialect)
                                    )),
                                );
                            }
                        }
                        Reference::Env(name) => {
                            if !ctx.env.contains_key(&name) {
                                out.push(
                                    ValidationIssue::error(
                                        ValidationLayer::CrossReference,
                                        "YAML-REF-001",
                                        format!("environment variable '{}' is not set", name),
                                        visit.path(),
                                    )
                                    .with_suggestion(format!("Export {} before running", name)),
                                );
                            }
                        }
                    }
                }
            }
            if !visit.in_block {
                let mut visiting = BTreeSet::new();
                match &visit.step.kind {
                    StepKind::Action(_) | StepKind::Use(_) => {
                        captures_of(ctx, visit.step, &mut visiting, &mut captured)
                    }
                    _ => {}
                }
            }
        });
        out
    }
}

struct UnknownBlockRule;

impl ValidationRule for UnknownBlockRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::CrossReference
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let blocks = &ctx.document.document.blocks;
        let mut out = Vec::new();
        walk(&ctx.document.document, &mut |visit| {
            if let StepKind::Use(block) = &visit.step.kind {
                if !block.block.trim().is_empty() && !blocks.contains_key(&block.block) {
                    let available: Vec<&str> = blocks.keys().map(String::as_str).collect();
                    out.push(
                        ValidationIssue::error(
                            ValidationLayer::CrossReference,
                            "YAML-REF-002",
                            format!("block '{}' is not declared", block.block),
                            visit.path(),
                        )
                        .with_suggestion(if available.is_empty() {
                            "Declare the block under 'blocks'".to_string()
                        } else {
                            format!("Declared blocks: {}", available.join(", "))
                        }),
                    );
                }
            }
        });
        out
    }
}

struct BlockCycleRule;

impl ValidationRule for BlockCycleRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::CrossReference
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let blocks = &ctx.document.document.blocks;
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();
        for name in blocks.keys() {
            nodes.insert(name.as_str(), graph.add_node(name.as_str()));
        }
        for (name, steps) in blocks {
            let mut targets = Vec::new();
            for step in steps {
                collect_uses(step, &mut targets);
            }
            for target in targets {
                if let (Some(from), Some(to)) = (nodes.get(name.as_str()), nodes.get(target)) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }

        let mut out = Vec::new();
        for component in tarjan_scc(&graph) {
            let is_cycle = if component.len() > 1 {
                true
            } else {
                graph.find_edge(component[0], component[0]).is_some()
            };
            if !is_cycle {
                continue;
            }
            let mut names: Vec<&str> = component.iter().map(|idx| graph[*idx]).collect();
            names.sort();
            out.push(
                ValidationIssue::error(
                    ValidationLayer::CrossReference,
                    "YAML-REF-003",
                    format!("blocks {} reference each other in a cycle", names.join(" -> ")),
                    format!("blocks.{}", names[0]),
                )
                .with_suggestion("Break the cycle so every block expands to a finite list of steps"),
            );
        }
        out
    }
}

struct VariableCycleRule;

impl VariableCycleRule {
    fn collect_roots(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(text) => {
                for reference in references(text) {
                    if let Reference::Variable { root, .. } = reference {
                        out.push(root);
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| Self::collect_roots(item, out)),
            Value::Object(fields) => fields.values().for_each(|item| Self::collect_roots(item, out)),
            _ => {}
        }
    }

    /// Names of every cycle among `scope`, each sorted.
    fn cycles(scope: &BTreeMap<&str, &Value>) -> Vec<Vec<String>> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: BTreeMap<&str, NodeIndex> = BTreeMap::new();
        for name in scope.keys().copied() {
            nodes.insert(name, graph.add_node(name));
        }
        for (name, value) in scope {
            let mut roots = Vec::new();
            Self::collect_roots(value, &mut roots);
            for root in roots {
                if let (Some(from), Some(to)) = (nodes.get(name), nodes.get(root.as_str())) {
                    graph.update_edge(*from, *to, ());
                }
            }
        }
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || graph.find_edge(component[0], component[0]).is_some()
            })
            .map(|component| {
                let mut names: Vec<String> =
                    component.iter().map(|idx| graph[*idx].to_string()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }
}

impl ValidationRule for VariableCycleRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::CrossReference
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let document = &ctx.document.document;
        let field = variables_field(ctx.document.dialect);
        let base: BTreeMap<&str, &Value> = document
            .variables
            .iter()
            .map(|(name, value)| (name.as_str(), value))
            .collect();

        let mut scopes = vec![(None, base.clone())];
        for (index, checkpoint) in document.checkpoints.iter().enumerate() {
            if checkpoint.variables.is_empty() {
                continue;
            }
            let mut merged = base.clone();
            merged.extend(checkpoint.variables.iter().map(|(name, value)| (name.as_str(), value)));
            scopes.push((Some((index, checkpoint)), merged));
        }

        let mut reported = BTreeSet::new();
        let mut out = Vec::new();
        for (checkpoint, scope) in scopes {
            for names in Self::cycles(&scope) {
                let first = &names[0];
                let path = match checkpoint {
                    Some((index, block)) if block.variables.contains_key(first) => {
                        format!("checkpoints[{}].variables.{}", index, first)
                    }
                    _ => format!("{}.{}", field, first),
                };
                if !reported.insert(path.clone()) {
                    continue;
                }
                let message = if names.len() == 1 {
                    format!("variable '{}' refers to itself", first)
                } else {
                    format!("variables {} refer to each other in a cycle", names.join(" -> "))
                };
                out.push(
                    ValidationIssue::error(ValidationLayer::CrossReference, "YAML-REF-006", message, path)
                        .with_suggestion("Give one of the variables a literal value"),
                );
            }
        }
        out
    }
}

fn collect_uses<'a>(step: &'a StepNode, out: &mut Vec<&'a str>) {
    if let StepKind::Use(block) = &step.kind {
        out.push(block.block.as_str());
    }
    for (_, nested) in step.children() {
        for child in nested {
            collect_uses(child, out);
        }
    }
}

struct ConditionIdentifierRule;

impl ValidationRule for ConditionIdentifierRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::CrossReference
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let document = &ctx.document.document;
        let mut all_captured = BTreeSet::new();
        walk(document, &mut |visit| {
            captures_of(ctx, visit.step, &mut BTreeSet::new(), &mut all_captured);
        });
        let mut out = Vec::new();
        walk(document, &mut |visit| {
            let StepKind::If(block) = &visit.step.kind else {
                return;
            };
            let scope = declared_scope(document, visit);
            for name in ExpressionEngine::identifiers(&block.condition) {
                if !scope.contains(&name) && !all_captured.contains(&name) {
                    out.push(
                        ValidationIssue::error(
                            ValidationLayer::CrossReference,
                            "YAML-REF-004",
                            format!("condition refers to unknown identifier '{}'", name),
                            visit.path(),
                        )
                        .with_suggestion("Conditions may use declared, loop or captured variables"),
                    );
                }
            }
        });
        out
    }
}

struct ForeachSourceRule;

impl ValidationRule for ForeachSourceRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::CrossReference
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let document = &ctx.document.document;
        let mut out = Vec::new();
        walk(document, &mut |visit| {
            let StepKind::Foreach(block) = &visit.step.kind else {
                return;
            };
            let problem = match &block.over {
                Value::Array(_) => None,
                Value::String(text) => {
                    let name = single_token(text).unwrap_or_else(|| text.trim().to_string());
                    let declared = visit
                        .checkpoint
                        .and_then(|checkpoint| checkpoint.variables.get(&name))
                        .or_else(|| document.variables.get(&name));
                    match declared {
                        Some(Value::Array(_)) => None,
                        Some(_) => Some(format!("variable '{}' is not a list", name)),
                        None if visit.loop_vars.contains(&name) => None,
                        None => Some(format!("'{}' does not name a declared list variable", name)),
                    }
                }
                Value::Null => None,
                other => Some(format!("cannot iterate over {}", other)),
            };
            if let Some(problem) = problem {
                out.push(
                    ValidationIssue::error(
                        ValidationLayer::CrossReference,
                        "YAML-REF-005",
                        format!("foreach source must be known at compile time: {}", problem),
                        visit.path(),
                    )
                    .with_suggestion("Iterate over a literal list or a list declared in variables"),
                );
            }
        });
        out
    }
}

// --------------------------------------------------------- best practice

struct FixedWaitRule;

impl ValidationRule for FixedWaitRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::BestPractice
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        for_each_action(ctx, |visit, args, handler| {
            if handler.kind() == ActionKind::WaitTime {
                let duration = args.first().map(ToString::to_string).unwrap_or_default();
                out.push(
                    ValidationIssue::warning(
                        "YAML-BP-001",
                        format!("fixed wait of {} ms; waiting for an element is more robust", duration),
                        visit.path(),
                    )
                    .with_example(example(ctx, ActionKind::WaitElement)),
                );
            }
        });
        out
    }
}

struct NavigateWithoutWaitRule;

impl ValidationRule for NavigateWithoutWaitRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::BestPractice
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        walk(&ctx.document.document, &mut |visit| {
            let StepKind::Action(call) = &visit.step.kind else {
                return;
            };
            if call.name != ActionKind::Navigate.name() {
                return;
            }
            let Some(next) = visit.next else {
                return;
            };
            let settles = match &next.kind {
                StepKind::Action(next_call) => {
                    next_call.name.starts_with("wait-") || next_call.name.starts_with("assert-")
                }
                _ => false,
            };
            if !settles {
                out.push(
                    ValidationIssue::warning(
                        "YAML-BP-002",
                        "navigation is not followed by a wait or assertion",
                        visit.path(),
                    )
                    .with_example(example(ctx, ActionKind::WaitElement)),
                );
            }
        });
        out
    }
}

struct HardcodedCredentialRule;

impl HardcodedCredentialRule {
    fn sensitive(name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        ["password", "passwd", "secret", "token", "api_key", "apikey"]
            .iter()
            .any(|marker| lowered.contains(marker))
    }
}

impl ValidationRule for HardcodedCredentialRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::BestPractice
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let document = &ctx.document.document;
        let field = variables_field(ctx.document.dialect);
        let mut scopes = vec![(field.to_string(), &document.variables)];
        for (index, checkpoint) in document.checkpoints.iter().enumerate() {
            scopes.push((format!("checkpoints[{}].variables", index), &checkpoint.variables));
        }
        let mut out = Vec::new();
        for (prefix, variables) in scopes {
            for (name, value) in variables {
                let literal = value
                    .as_str()
                    .map(|text| !text.is_empty() && !has_references(text))
                    .unwrap_or(false);
                if literal && Self::sensitive(name) {
                    out.push(
                        ValidationIssue::warning(
                            "YAML-BP-003",
                            format!("variable '{}' looks like a hard-coded credential", name),
                            format!("{}.{}", prefix, name),
                        )
                        .with_suggestion(format!(
                            "Read it from the environment: ${{ENV:{}}}",
                            name.to_ascii_uppercase()
                        )),
                    );
                }
            }
        }
        out
    }
}

struct LongNameRule;

impl ValidationRule for LongNameRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::BestPractice
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let length = ctx.document.document.name.chars().count();
        if length <= 100 {
            return Vec::new();
        }
        vec![ValidationIssue::warning(
            "YAML-BP-004",
            format!("test name is {} characters long; keep it under 100", length),
            name_field(ctx.document.dialect),
        )]
    }
}

struct AbsoluteXPathRule;

impl ValidationRule for AbsoluteXPathRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::BestPractice
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let mut out = Vec::new();
        for_each_action(ctx, |visit, args, handler| {
            for (param, value) in handler.params().iter().zip(args) {
                let (ParamKind::Selector, ArgValue::Text(text)) = (param.kind, value) else {
                    continue;
                };
                let text = text.trim();
                if text.starts_with("/html") || text.starts_with("//html") || text.starts_with("/body") {
                    out.push(
                        ValidationIssue::warning(
                            "YAML-BP-005",
                            format!("absolute XPath '{}' breaks when the page layout changes", text),
                            visit.path(),
                        )
                        .with_suggestion("Prefer an id, data attribute or visible text"),
                    );
                }
            }
        });
        out
    }
}

struct EmptyCheckpointRule;

impl ValidationRule for EmptyCheckpointRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::BestPractice
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        ctx.document
            .document
            .checkpoints
            .iter()
            .enumerate()
            .filter(|(_, checkpoint)| checkpoint.steps.is_empty())
            .map(|(index, checkpoint)| {
                ValidationIssue::warning(
                    "YAML-BP-006",
                    format!("checkpoint '{}' has no steps", checkpoint.name),
                    format!("checkpoints[{}]", index),
                )
            })
            .collect()
    }
}

struct UnusedVariableRule;

impl ValidationRule for UnusedVariableRule {
    fn layer(&self) -> ValidationLayer {
        ValidationLayer::BestPractice
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let document = &ctx.document.document;
        let mut used = BTreeSet::new();
        walk(document, &mut |visit| {
            for (_, text) in reference_sites(visit.step) {
                for reference in references(&text) {
                    if let Reference::Variable { root, .. } = reference {
                        used.insert(root);
                    }
                }
                used.insert(text.trim().to_string());
            }
            if let StepKind::If(block) = &visit.step.kind {
                used.extend(ExpressionEngine::identifiers(&block.condition));
            }
        });

        let field = variables_field(ctx.document.dialect);
        let mut out = Vec::new();
        let mut report = |name: &String, path: String| {
            if !used.contains(name) {
                out.push(ValidationIssue::warning(
                    "YAML-BP-007",
                    format!("variable '{}' is declared but never used", name),
                    path,
                ));
            }
        };
        for name in document.variables.keys() {
            report(name, format!("{}.{}", field, name));
        }
        for (index, checkpoint) in document.checkpoints.iter().enumerate() {
            for name in checkpoint.variables.keys() {
                report(name, format!("checkpoints[{}].variables.{}", index, name));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::yaml_layer::validate::Validator;
    use crate::core::yaml_layer::{detector, normalizer};

    fn validate(text: &str) -> super::super::ValidationReport {
        let tree = normalizer::load_tree(text).expect("tree");
        let dialect = detector::detect(&tree).dialect;
        let document = normalizer::normalize(&tree, dialect).expect("normalized");
        Validator::default().validate(&document)
    }

    fn codes(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|issue| issue.code.as_str()).collect()
    }

    #[test]
    fn schema_errors_are_batched_and_stop_later_layers() {
        let report = validate("test: Broken\ndo:\n  - clik: \"#go\"\n  - wait-time: soon\n  - c: \"{{missing}}\"\n");
        assert!(!report.ok);
        assert_eq!(codes(&report.errors), vec!["YAML-SCH-003", "YAML-SCH-005"]);
        assert_eq!(report.layers, vec![ValidationLayer::Schema]);
        let unknown = &report.errors[0];
        assert_eq!(unknown.path, "do[0]");
        assert_eq!(unknown.suggestion.as_deref(), Some("Did you mean 'click'?"));
        assert_eq!(unknown.example.as_deref(), Some("- c: '#submit'"));
    }

    #[test]
    fn unresolved_variables_are_cross_reference_errors() {
        let report = validate("name: Login\nsteps:\n  - navigate: https://x.test\n  - write: {selector: \"#u\", text: \"{{username}}\"}\n");
        assert_eq!(codes(&report.errors), vec!["YAML-REF-001"]);
        assert_eq!(report.errors[0].path, "steps[1]");
        assert!(report.errors[0].message.contains("username"));
    }

    #[test]
    fn captured_variables_resolve_only_after_the_store() {
        let report = validate(
            "name: Capture\nsteps:\n  - navigate: https://x.test\n  - write: {selector: \"#a\", text: \"{{total}}\"}\n  - store: {selector: \"#t\", as: total}\n  - write: {selector: \"#b\", text: \"{{total}}\"}\n",
        );
        assert_eq!(codes(&report.errors), vec!["YAML-REF-001"]);
        assert_eq!(report.errors[0].path, "steps[1]");
    }

    #[test]
    fn block_cycles_are_detected() {
        let report = validate(
            "name: Cycle\nblocks:\n  a:\n    - use: b\n  b:\n    - use: a\nsteps:\n  - use: a\n",
        );
        assert_eq!(codes(&report.errors), vec!["YAML-REF-003"]);
        assert_eq!(report.errors[0].path, "blocks.a");
    }

    #[test]
    fn variable_cycles_are_detected() {
        let report = validate(
            "test: Cycle\ndata:\n  a: \"{{b}}\"\n  b: \"{{a}}\"\n  c: \"x{{c}}\"\n  d: plain\ndo:\n  - nav: https://x.test\n  - ch: \"{{a}}{{c}}{{d}}\"\n",
        );
        assert_eq!(codes(&report.errors), vec!["YAML-REF-006", "YAML-REF-006"]);
        assert_eq!(report.errors[0].path, "data.a");
        assert!(report.errors[0].message.contains("a -> b"));
        assert_eq!(report.errors[1].path, "data.c");
    }

    #[test]
    fn until_loops_are_rejected() {
        let report = validate(
            "test: Poll\ndo:\n  - loop:\n      times: 5\n      until: done\n      do:\n        - c: \"#refresh\"\n",
        );
        assert_eq!(codes(&report.errors), vec!["YAML-SEM-003"]);
    }

    #[test]
    fn best_practice_findings_never_fail_validation() {
        let report = validate(
            "name: Slow\nvariables:\n  password: hunter2\n  unused: 1\nsteps:\n  - navigate: https://x.test\n  - click: /html/body/div[2]/a\n  - wait: 2000\n  - write: {selector: \"#p\", text: \"{{password}}\"}\n",
        );
        assert!(report.ok);
        assert_eq!(
            codes(&report.warnings),
            vec!["YAML-BP-001", "YAML-BP-002", "YAML-BP-003", "YAML-BP-005", "YAML-BP-007"]
        );
    }

    #[test]
    fn relative_urls_need_a_base() {
        let report = validate("name: Rel\nsteps:\n  - navigate: /login\n");
        assert_eq!(codes(&report.errors), vec!["YAML-SEM-007"]);
        let report = validate("name: Rel\nbase_url: https://x.test\nsteps:\n  - navigate: /login\n  - assert: Welcome\n");
        assert!(report.ok);
    }
}
