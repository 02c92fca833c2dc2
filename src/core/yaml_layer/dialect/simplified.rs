use super::*;
use crate::core::yaml_layer::document::{CheckpointBlock, StartingContext};

/// Readable dialect: `name:` plus full action names under `steps:` or `checkpoints:`.
pub struct SimplifiedDialect;

const TOP_LEVEL: &[&str] = &[
    "name",
    "description",
    "base_url",
    "starting_url",
    "project",
    "goal",
    "journey",
    "checkpoint",
    "config",
    "variables",
    "blocks",
    "setup",
    "steps",
    "checkpoints",
    "teardown",
];
const CHECKPOINT_FIELDS: &[&str] = &["name", "variables", "steps"];

impl SimplifiedDialect {
    fn parse_steps(value: &Value, path: &str) -> Result<Vec<StepNode>, AppError> {
        parse_step_list(value, path, Self::parse_step)
    }

    fn parse_step(value: &Value, path: &str) -> Result<StepKind, AppError> {
        let map = expect_object(value, path)?;
        let (key, body) = single_entry(map, path)?;
        let body_path = child_path(path, key);
        let field = |name: &str| body.get(name).unwrap_or(&Value::Null);

        let kind = match (key, body) {
            ("navigate", Value::String(_)) => call(ActionKind::Navigate, args_of(&[body])),
            ("click", Value::String(_)) => call(ActionKind::Click, args_of(&[body])),
            ("write", Value::Object(_)) => {
                call(ActionKind::Write, args_of(&[field("selector"), field("text")]))
            }
            ("assert", Value::Object(fields)) => Self::assert_step(fields, &body_path)?,
            ("assert", _) => call(ActionKind::AssertExists, args_of(&[body])),
            ("wait", Value::Number(_)) => call(ActionKind::WaitTime, args_of(&[body])),
            ("wait", Value::String(text)) if is_digits(text) => {
                call(ActionKind::WaitTime, args_of(&[body]))
            }
            ("wait", Value::String(_)) => call(ActionKind::WaitElement, args_of(&[body])),
            ("wait", Value::Object(fields)) if fields.contains_key("duration") => {
                call(ActionKind::WaitTime, args_of(&[field("duration")]))
            }
            ("wait", Value::Object(_)) => call(
                ActionKind::WaitElement,
                args_of(&[field("selector"), field("timeout")]),
            ),
            ("store", Value::Object(fields)) if fields.contains_key("value") => {
                call(ActionKind::StoreValue, args_of(&[field("value"), field("as")]))
            }
            ("store", Value::Object(_)) => call(
                ActionKind::StoreElementText,
                args_of(&[field("selector"), field("as")]),
            ),
            ("select", Value::Object(fields)) if fields.contains_key("index") => call(
                ActionKind::SelectIndex,
                args_of(&[field("selector"), field("index")]),
            ),
            ("select", Value::Object(_)) => call(
                ActionKind::SelectOption,
                args_of(&[field("selector"), field("option")]),
            ),
            ("scroll", Value::String(text)) => match text.as_str() {
                "top" => call(ActionKind::ScrollTop, vec![]),
                "bottom" => call(ActionKind::ScrollBottom, vec![]),
                other => match parse_coordinates(other) {
                    Some((x, y)) => call(
                        ActionKind::ScrollPosition,
                        vec![ArgValue::Number(x), ArgValue::Number(y)],
                    ),
                    None => call(ActionKind::ScrollElement, args_of(&[body])),
                },
            },
            ("scroll", Value::Object(_)) => {
                call(ActionKind::ScrollPosition, args_of(&[field("x"), field("y")]))
            }
            ("hover", Value::String(_)) => call(ActionKind::Hover, args_of(&[body])),
            ("key", Value::Object(_)) => {
                call(ActionKind::Key, args_of(&[field("key"), field("selector")]))
            }
            ("key", _) => call(ActionKind::Key, args_of(&[body])),
            ("comment", _) => call(ActionKind::Comment, args_of(&[body])),
            ("if", _) => Self::control(body, &body_path)?.if_block(&Self::parse_steps)?,
            ("repeat", _) => Self::control(body, &body_path)?.repeat_block(&Self::parse_steps)?,
            ("foreach", _) => Self::control(body, &body_path)?.foreach_block(&Self::parse_steps)?,
            ("try", _) => Self::control(body, &body_path)?.try_block(&Self::parse_steps)?,
            ("use", _) => use_block(arg(body).map(|name| name.to_string())),
            (other, _) => generic_action(other, body),
        };
        Ok(kind)
    }

    fn control<'a>(body: &'a Value, path: &'a str) -> Result<ControlFields<'a>, AppError> {
        Ok(ControlFields {
            map: expect_object(body, path)?,
            path,
        })
    }

    fn assert_step(fields: &Map<String, Value>, path: &str) -> Result<StepKind, AppError> {
        let selector = fields.get("selector").unwrap_or(&Value::Null);
        let comparisons = [
            ("equals", ActionKind::AssertEquals),
            ("not_equals", ActionKind::AssertNotEquals),
            ("gt", ActionKind::AssertGreaterThan),
            ("lt", ActionKind::AssertLessThan),
        ];
        for (key, kind) in comparisons {
            if let Some(expected) = fields.get(key) {
                return Ok(call(kind, args_of(&[selector, expected])));
            }
        }
        match opt_bool(fields, "exists", path)? {
            Some(false) => Ok(call(ActionKind::AssertNotExists, args_of(&[selector]))),
            _ => Ok(call(ActionKind::AssertExists, args_of(&[selector]))),
        }
    }

    fn parse_checkpoints(value: &Value, path: &str) -> Result<Vec<CheckpointBlock>, AppError> {
        let items = expect_array(value, path)?;
        let mut checkpoints = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let item_path = format!("{}[{}]", path, index);
            let map = expect_object(item, &item_path)?;
            reject_unknown_fields(map, CHECKPOINT_FIELDS, Dialect::Simplified, &item_path)?;
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

    fn render_steps(steps: &[StepNode]) -> Yaml {
        Yaml::Sequence(steps.iter().map(|step| Self.render_step(step)).collect())
    }

    fn render_action(kind: ActionKind, args: &[ArgValue]) -> Option<Yaml> {
        use ActionKind::*;
        let scalar = |key: &str| -> Option<Yaml> {
            let [only] = args else { return None };
            Some(ymap(vec![(key, arg_to_yaml(only))]))
        };
        let fields = |key: &str, names: &[&str]| -> Option<Yaml> {
            if names.len() != args.len() {
                return None;
            }
            let body = names
                .iter()
                .zip(args)
                .map(|(name, value)| (*name, arg_to_yaml(value)))
                .collect();
            Some(ymap(vec![(key, ymap(body))]))
        };
        match kind {
            Navigate => scalar("navigate"),
            Click => scalar("click"),
            Write => fields("write", &["selector", "text"]),
            AssertExists => scalar("assert"),
            AssertNotExists => {
                let [selector] = args else { return None };
                Some(ymap(vec![(
                    "assert",
                    ymap(vec![("selector", arg_to_yaml(selector)), ("exists", Yaml::Bool(false))]),
                )]))
            }
            AssertEquals => fields("assert", &["selector", "equals"]),
            AssertNotEquals => fields("assert", &["selector", "not_equals"]),
            AssertGreaterThan => fields("assert", &["selector", "gt"]),
            AssertLessThan => fields("assert", &["selector", "lt"]),
            WaitTime if args.first().and_then(ArgValue::as_number).is_some() => scalar("wait"),
            WaitElement if args.len() == 1 => scalar("wait"),
            WaitElement => fields("wait", &["selector", "timeout"]),
            StoreElementText => fields("store", &["selector", "as"]),
            StoreValue => fields("store", &["value", "as"]),
            SelectOption => fields("select", &["selector", "option"]),
            SelectIndex => fields("select", &["selector", "index"]),
            ScrollTop if args.is_empty() => Some(ymap(vec![("scroll", ystr("top"))])),
            ScrollBottom if args.is_empty() => Some(ymap(vec![("scroll", ystr("bottom"))])),
            ScrollPosition => fields("scroll", &["x", "y"]),
            ScrollElement => scalar("scroll"),
            Hover => scalar("hover"),
            Key if args.len() == 1 => scalar("key"),
            Key => fields("key", &["key", "selector"]),
            Comment => scalar("comment"),
            _ => None,
        }
    }
}

impl DialectStrategy for SimplifiedDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Simplified
    }

    fn parse(&self, tree: &Value) -> Result<TestDocument, AppError> {
        let map = expect_object(tree, "")?;
        reject_unknown_fields(map, TOP_LEVEL, Dialect::Simplified, "")?;

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

        let base_url = match opt_string(map, "base_url", "")? {
            Some(url) => Some(url),
            None => opt_string(map, "starting_url", "")?,
        };

        Ok(TestDocument {
            name: opt_string(map, "name", "")?.unwrap_or_default(),
            description: opt_string(map, "description", "")?,
            base_url,
            starting_context: StartingContext {
                organization_id: None,
                project: opt_string(map, "project", "")?,
                goal: opt_string(map, "goal", "")?,
                journey: opt_string(map, "journey", "")?,
                checkpoint: opt_string(map, "checkpoint", "")?,
            },
            config: parse_config(map.get("config"), "config")?,
            variables: parse_variables(map.get("variables"), "variables")?,
            blocks: parse_blocks(map.get("blocks"), "blocks", Self::parse_steps)?,
            checkpoints,
        })
    }

    fn render(&self, document: &TestDocument) -> Rendered {
        let mut warnings = Vec::new();
        let mut root = Mapping::new();
        root.insert(ystr("name"), ystr(&document.name));
        push_opt(&mut root, "description", document.description.as_ref());
        push_opt(&mut root, "base_url", document.base_url.as_ref());

        let context = &document.starting_context;
        if context.organization_id.is_some() {
            warnings.push(
                "simplified dialect has no organization_id; the value was dropped".to_string(),
            );
        }
        push_opt(&mut root, "project", context.project.as_ref());
        push_opt(&mut root, "goal", context.goal.as_ref());
        push_opt(&mut root, "journey", context.journey.as_ref());
        push_opt(&mut root, "checkpoint", context.checkpoint.as_ref());

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
            warnings,
        }
    }

    fn render_step(&self, step: &StepNode) -> Yaml {
        match &step.kind {
            StepKind::Action(action) => match ActionKind::parse(&action.name) {
                Some(kind) => Self::render_action(kind, &action.args)
                    .unwrap_or_else(|| render_generic(kind, &action.args)),
                None => ymap(vec![(
                    action.name.as_str(),
                    action.args.first().map(arg_to_yaml).unwrap_or(Yaml::Null),
                )]),
            },
            StepKind::Use(block) => ymap(vec![("use", ystr(&block.block))]),
            control => {
                let key = match control {
                    StepKind::If(_) => "if",
                    StepKind::Repeat(_) => "repeat",
                    StepKind::Foreach(_) => "foreach",
                    _ => "try",
                };
                ymap(vec![(key, ymap(render_control_fields(control, &Self::render_steps)))])
            }
        }
    }

    fn description(&self) -> &'static str {
        "Simplified dialect: `name:` plus a `steps:` (or `checkpoints:`) list using full \
         action names with descriptive sub-keys such as `selector` and `text`."
    }

    fn example(&self) -> &'static str {
        "name: Login\nbase_url: https://example.test\nsteps:\n  - navigate: /login\n  - write: {selector: \"#user\", text: alice}\n  - click: \"#submit\"\n  - assert: Welcome\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::yaml_layer::normalizer::load_tree;

    fn parse(text: &str) -> Result<TestDocument, AppError> {
        SimplifiedDialect.parse(&load_tree(text).expect("tree"))
    }

    #[test]
    fn descriptive_forms_map_to_canonical_actions() {
        let document = parse(
            "name: Checkout\nsteps:\n  - navigate: https://shop.test\n  - write: {selector: \"#q\", text: shoes}\n  - assert: {selector: \"#count\", gt: 0}\n  - assert: {selector: \"#error\", exists: false}\n  - select: {selector: \"#size\", index: 2}\n",
        )
        .expect("document");
        let names: Vec<&str> = document.checkpoints[0]
            .steps
            .iter()
            .map(|step| match &step.kind {
                StepKind::Action(call) => call.name.as_str(),
                _ => "control",
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "navigate",
                "write",
                "assert-greater-than",
                "assert-not-exists",
                "select-index"
            ]
        );
    }

    #[test]
    fn variables_accept_list_form_and_reject_duplicates() {
        let document = parse(
            "name: Vars\nvariables:\n  - {name: user, value: alice}\nsteps:\n  - click: \"#go\"\n",
        )
        .expect("document");
        assert_eq!(document.variables["user"], serde_json::json!("alice"));

        let err = parse(
            "name: Vars\nvariables:\n  - {name: user, value: a}\n  - {name: user, value: b}\nsteps: []\n",
        )
        .expect_err("duplicate");
        assert_eq!(err.code, "YAML-NORM-006");
        assert_eq!(err.path(), Some("variables[1]"));
    }

    #[test]
    fn steps_and_checkpoints_are_mutually_exclusive() {
        let err = parse("name: Both\nsteps: []\ncheckpoints: []\n").expect_err("both");
        assert_eq!(err.code, "YAML-NORM-003");
    }

    #[test]
    fn generic_form_accepts_any_canonical_action() {
        let document = parse(
            "name: Generic\nsteps:\n  - cookie-create: {name: session, value: abc}\n  - window-maximize: {}\n",
        )
        .expect("document");
        let steps = &document.checkpoints[0].steps;
        assert_eq!(
            steps[0].kind,
            StepNode::action(
                "cookie-create",
                vec![ArgValue::text("session"), ArgValue::text("abc")]
            )
        );
        assert_eq!(steps[1].kind, StepNode::action("window-maximize", vec![]));
    }

    #[test]
    fn named_checkpoints_render_back_to_a_checkpoint_list() {
        let document = parse(
            "name: Flow\ncheckpoints:\n  - name: Login\n    variables: {user: alice}\n    steps:\n      - write: {selector: \"#u\", text: \"{{user}}\"}\n  - name: Cart\n    steps:\n      - repeat:\n          times: 2\n          steps:\n            - click: \"#add\"\n",
        )
        .expect("document");
        let rendered = SimplifiedDialect.render(&document);
        let text = serde_yaml::to_string(&rendered.value).expect("yaml");
        assert!(text.contains("checkpoints:"));
        assert_eq!(parse(&text).expect("reparsed"), document);
    }
}
