use super::*;
use crate::core::yaml_layer::actions::Slot;
use crate::core::yaml_layer::document::{CheckpointBlock, StartingContext};

/// Verbose dialect: every step is `{type, command, target, value, options}`.
pub struct ExtendedDialect;

const TOP_LEVEL: &[&str] = &[
    "name",
    "description",
    "base_url",
    "infrastructure",
    "config",
    "variables",
    "blocks",
    "setup",
    "steps",
    "checkpoints",
    "teardown",
];
const INFRASTRUCTURE_FIELDS: &[&str] = &["organization_id", "project", "goal", "journey", "checkpoint"];
const CHECKPOINT_FIELDS: &[&str] = &["name", "variables", "steps"];
const STEP_FIELDS: &[&str] = &[
    "type",
    "command",
    "target",
    "value",
    "options",
    "description",
    "condition",
    "then",
    "else",
    "times",
    "as",
    "over",
    "max",
    "until",
    "steps",
    "catch",
];

/// `(type, command)` spelling of every action.
const COMMANDS: &[(&str, &str, ActionKind)] = &[
    ("navigate", "", ActionKind::Navigate),
    ("interact", "click", ActionKind::Click),
    ("interact", "write", ActionKind::Write),
    ("interact", "clear", ActionKind::Clear),
    ("interact", "key", ActionKind::Key),
    ("interact", "hover", ActionKind::Hover),
    ("interact", "select", ActionKind::SelectOption),
    ("interact", "select-index", ActionKind::SelectIndex),
    ("interact", "upload", ActionKind::Upload),
    ("assert", "exists", ActionKind::AssertExists),
    ("assert", "not-exists", ActionKind::AssertNotExists),
    ("assert", "equals", ActionKind::AssertEquals),
    ("assert", "not-equals", ActionKind::AssertNotEquals),
    ("assert", "greater-than", ActionKind::AssertGreaterThan),
    ("assert", "less-than", ActionKind::AssertLessThan),
    ("wait", "time", ActionKind::WaitTime),
    ("wait", "element", ActionKind::WaitElement),
    ("data", "store", ActionKind::StoreElementText),
    ("data", "store-value", ActionKind::StoreValue),
    ("misc", "comment", ActionKind::Comment),
    ("misc", "execute-js", ActionKind::ExecuteJs),
    ("scroll", "top", ActionKind::ScrollTop),
    ("scroll", "bottom", ActionKind::ScrollBottom),
    ("scroll", "position", ActionKind::ScrollPosition),
    ("scroll", "element", ActionKind::ScrollElement),
    ("cookie", "create", ActionKind::CookieCreate),
    ("cookie", "delete", ActionKind::CookieDelete),
    ("cookie", "clear", ActionKind::CookieClear),
    ("dialog", "alert", ActionKind::DismissAlert),
    ("dialog", "confirm", ActionKind::DismissConfirm),
    ("dialog", "prompt", ActionKind::DismissPrompt),
    ("window", "maximize", ActionKind::WindowMaximize),
    ("window", "resize", ActionKind::WindowResize),
    ("window", "next-tab", ActionKind::SwitchNextTab),
    ("window", "prev-tab", ActionKind::SwitchPrevTab),
    ("mouse", "down", ActionKind::MouseDown),
    ("mouse", "up", ActionKind::MouseUp),
    ("mouse", "move", ActionKind::MouseMove),
];

pub(crate) fn command_for(kind: ActionKind) -> Option<(&'static str, &'static str)> {
    COMMANDS
        .iter()
        .find(|(_, _, candidate)| *candidate == kind)
        .map(|(step_type, command, _)| (*step_type, *command))
}

fn lookup(step_type: &str, command: &str) -> Option<ActionKind> {
    let command = command.trim().to_ascii_lowercase().replace('_', "-");
    COMMANDS
        .iter()
        .find(|(t, c, _)| *t == step_type && *c == command)
        .map(|(_, _, kind)| *kind)
}

impl ExtendedDialect {
    fn parse_steps(value: &Value, path: &str) -> Result<Vec<StepNode>, AppError> {
        parse_step_list(value, path, Self::parse_step)
    }

    fn parse_step(value: &Value, path: &str) -> Result<StepKind, AppError> {
        let map = expect_object(value, path)?;
        reject_unknown_fields(map, STEP_FIELDS, Dialect::Extended, path)?;
        let step_type = opt_string(map, "type", path)?.ok_or_else(|| {
            AppError::new(
                ErrorCategory::NormalizationError,
                "extended step is missing 'type'",
            )
            .with_code("YAML-NORM-004")
            .with_context("path", display_path(path))
            .with_suggestion("Every step needs a type such as navigate, interact or assert")
        })?;
        let command = opt_string(map, "command", path)?.unwrap_or_default();

        if step_type == "control" {
            let control = ControlFields { map, path };
            return match command.as_str() {
                "if" => control.if_block(&Self::parse_steps),
                "repeat" => control.repeat_block(&Self::parse_steps),
                "foreach" => control.foreach_block(&Self::parse_steps),
                "try" => control.try_block(&Self::parse_steps),
                "use" => Ok(use_block(opt_string(map, "target", path)?)),
                other => Err(structure_error(
                    &child_path(path, "command"),
                    format!(
                        "unknown control command '{}'; expected if, repeat, foreach, try or use",
                        other
                    ),
                )),
            };
        }

        let options = match map.get("options") {
            None | Some(Value::Null) => None,
            Some(value) => Some(expect_object(value, &child_path(path, "options"))?),
        };
        let Some(kind) = lookup(&step_type, &command) else {
            let name = if command.is_empty() {
                step_type
            } else {
                format!("{}.{}", step_type, command)
            };
            let args = args_of(&[
                map.get("target").unwrap_or(&Value::Null),
                map.get("value").unwrap_or(&Value::Null),
            ]);
            return Ok(StepNode::action(name, args));
        };

        let mut args = Vec::new();
        if let Some(handler) = ActionRegistry::standard().get(kind) {
            for param in handler.params() {
                let value = match param.slot {
                    Slot::Target => map.get("target"),
                    Slot::Value => map.get("value"),
                    Slot::Option => options.and_then(|options| options.get(param.name)),
                };
                match value.and_then(arg) {
                    Some(value) => args.push(value),
                    None => break,
                }
            }
        }
        Ok(call(kind, args))
    }

    fn parse_checkpoints(value: &Value, path: &str) -> Result<Vec<CheckpointBlock>, AppError> {
        let items = expect_array(value, path)?;
        let mut checkpoints = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let item_path = format!("{}[{}]", path, index);
            let map = expect_object(item, &item_path)?;
            reject_unknown_fields(map, CHECKPOINT_FIELDS, Dialect::Extended, &item_path)?;
            checkpoints.push(CheckpointBlock {
                name: opt_string(map, "name", &item_path)?.unwrap_or_default(),
                variables: parse_variables(map.get("variables"), &child_path(&item_path, "variables"))?,
                steps: match map.get("steps") {
                    Some(steps) => Self::parse_steps(steps, &child_path(&item_path, "steps"))?,
                    None => Vec::new(),
                },
            });
        }
        Ok(checkpoints)
    }

    fn parse_infrastructure(value: Option<&Value>) -> Result<StartingContext, AppError> {
        let Some(value) = value.filter(|value| !value.is_null()) else {
            return Ok(StartingContext::default());
        };
        let path = "infrastructure";
        let map = expect_object(value, path)?;
        reject_unknown_fields(map, INFRASTRUCTURE_FIELDS, Dialect::Extended, path)?;
        Ok(StartingContext {
            organization_id: opt_string(map, "organization_id", path)?,
            project: opt_string(map, "project", path)?,
            goal: opt_string(map, "goal", path)?,
            journey: opt_string(map, "journey", path)?,
            checkpoint: opt_string(map, "checkpoint", path)?,
        })
    }

    fn render_steps(steps: &[StepNode]) -> Yaml {
        Yaml::Sequence(steps.iter().map(|step| Self.render_step(step)).collect())
    }

    fn render_action(kind: ActionKind, args: &[ArgValue]) -> Yaml {
        let mut mapping = Mapping::new();
        if let Some((step_type, command)) = command_for(kind) {
            mapping.insert(ystr("type"), ystr(step_type));
            if !command.is_empty() {
                mapping.insert(ystr("command"), ystr(command));
            }
        }
        let mut options = Mapping::new();
        if let Some(handler) = ActionRegistry::standard().get(kind) {
            for (param, value) in handler.params().iter().zip(args) {
                match param.slot {
                    Slot::Target => {
                        mapping.insert(ystr("target"), arg_to_yaml(value));
                    }
                    Slot::Value => {
                        mapping.insert(ystr("value"), arg_to_yaml(value));
                    }
                    Slot::Option => {
                        options.insert(ystr(param.name), arg_to_yaml(value));
                    }
                }
            }
        }
        if !options.is_empty() {
            mapping.insert(ystr("options"), Yaml::Mapping(options));
        }
        Yaml::Mapping(mapping)
    }

    /// Unknown names stay visible as `type.command` so validation can report them.
    fn render_unknown(name: &str, args: &[ArgValue]) -> Yaml {
        let mut mapping = Mapping::new();
        match name.split_once('.') {
            Some((step_type, command)) => {
                mapping.insert(ystr("type"), ystr(step_type));
                mapping.insert(ystr("command"), ystr(command));
            }
            None => {
                mapping.insert(ystr("type"), ystr(name));
            }
        }
        if let Some(target) = args.first() {
            mapping.insert(ystr("target"), arg_to_yaml(target));
        }
        if let Some(value) = args.get(1) {
            mapping.insert(ystr("value"), arg_to_yaml(value));
        }
        Yaml::Mapping(mapping)
    }
}

impl DialectStrategy for ExtendedDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Extended
    }

    fn parse(&self, tree: &Value) -> Result<TestDocument, AppError> {
        let map = expect_object(tree, "")?;
        reject_unknown_fields(map, TOP_LEVEL, Dialect::Extended, "")?;

        let mut checkpoints = Vec::new();
        if let Some(setup) = map.get("setup") {
            let steps = Self::parse_steps(setup, SETUP)?;
            if !steps.is_empty() {
                checkpoints.push(CheckpointBlock::new(SETUP, steps));
            }
        }
        match (map.get("steps"), map.get("checkpoints")) {
            (Some(_), Some(_)) => {
                return Err(structure_error(
                    "",
                    "use either 'steps' or 'checkpoints', not both",
                ))
            }
            (Some(steps), None) => {
                checkpoints.push(CheckpointBlock::new(MAIN, Self::parse_steps(steps, "steps")?))
            }
            (None, Some(list)) => checkpoints.extend(Self::parse_checkpoints(list, "checkpoints")?),
            (None, None) => checkpoints.push(CheckpointBlock::new(MAIN, Vec::new())),
        }
        if let Some(teardown) = map.get("teardown") {
            let steps = Self::parse_steps(teardown, TEARDOWN)?;
            if !steps.is_empty() {
                checkpoints.push(CheckpointBlock::new(TEARDOWN, steps));
            }
        }

        Ok(TestDocument {
            name: opt_string(map, "name", "")?.unwrap_or_default(),
            description: opt_string(map, "description", "")?,
            base_url: opt_string(map, "base_url", "")?,
            starting_context: Self::parse_infrastructure(map.get("infrastructure"))?,
            config: parse_config(map.get("config"), "config")?,
            variables: parse_variables(map.get("variables"), "variables")?,
            blocks: parse_blocks(map.get("blocks"), "blocks", Self::parse_steps)?,
            checkpoints,
        })
    }

    fn render(&self, document: &TestDocument) -> Rendered {
        let mut root = Mapping::new();
        root.insert(ystr("name"), ystr(&document.name));
        push_opt(&mut root, "description", document.description.as_ref());
        push_opt(&mut root, "base_url", document.base_url.as_ref());

        let context = &document.starting_context;
        if !context.is_empty() {
            let mut infrastructure = Mapping::new();
            push_opt(&mut infrastructure, "organization_id", context.organization_id.as_ref());
            push_opt(&mut infrastructure, "project", context.project.as_ref());
            push_opt(&mut infrastructure, "goal", context.goal.as_ref());
            push_opt(&mut infrastructure, "journey", context.journey.as_ref());
            push_opt(&mut infrastructure, "checkpoint", context.checkpoint.as_ref());
            root.insert(ystr("infrastructure"), Yaml::Mapping(infrastructure));
        }
        if let Some(config) = render_config(&document.config) {
            root.insert(ystr("config"), config);
        }
        if !document.variables.is_empty() {
            root.insert(ystr("variables"), variables_to_yaml(&document.variables));
        }
        if !document.blocks.is_empty() {
            let mut blocks = Mapping::new();
            for (name, steps) in &document.blocks {
                blocks.insert(ystr(name), Self::render_steps(steps));
            }
            root.insert(ystr("blocks"), Yaml::Mapping(blocks));
        }

        if is_sectioned(document) {
            for checkpoint in &document.checkpoints {
                let key = if checkpoint.name == MAIN { "steps" } else { checkpoint.name.as_str() };
                root.insert(ystr(key), Self::render_steps(&checkpoint.steps));
            }
        } else {
            let list = document
                .checkpoints
                .iter()
                .map(|checkpoint| {
                    let mut entry = Mapping::new();
                    entry.insert(ystr("name"), ystr(&checkpoint.name));
                    if !checkpoint.variables.is_empty() {
                        entry.insert(ystr("variables"), variables_to_yaml(&checkpoint.variables));
                    }
                    entry.insert(ystr("steps"), Self::render_steps(&checkpoint.steps));
                    Yaml::Mapping(entry)
                })
                .collect();
            root.insert(ystr("checkpoints"), Yaml::Sequence(list));
        }

        Rendered {
            value: Yaml::Mapping(root),
            warnings: Vec::new(),
        }
    }

    fn render_step(&self, step: &StepNode) -> Yaml {
        match &step.kind {
            StepKind::Action(action) => match ActionKind::parse(&action.name) {
                Some(kind) => Self::render_action(kind, &action.args),
                None => Self::render_unknown(&action.name, &action.args),
            },
            StepKind::Use(block) => ymap(vec![
                ("type", ystr("control")),
                ("command", ystr("use")),
                ("target", ystr(&block.block)),
            ]),
            control => {
                let command = match control {
                    StepKind::If(_) => "if",
                    StepKind::Repeat(_) => "repeat",
                    StepKind::Foreach(_) => "foreach",
                    _ => "try",
                };
                let mut fields = vec![("type", ystr("control")), ("command", ystr(command))];
                fields.extend(render_control_fields(control, &Self::render_steps));
                ymap(fields)
            }
        }
    }

    fn description(&self) -> &'static str {
        "Extended dialect: every step is an explicit {type, command, target, value, options} \
         record, with optional infrastructure identifiers; carries the most metadata."
    }

    fn example(&self) -> &'static str {
        "name: Login\ninfrastructure:\n  project: Web\n  goal: Auth\nsteps:\n  - type: navigate\n    target: https://example.test/login\n  - type: interact\n    command: write\n    target: \"#user\"\n    value: alice\n  - type: assert\n    command: exists\n    target: Welcome\n"
    }
}
