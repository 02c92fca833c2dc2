use super::*;
use crate::core::yaml_layer::document::CheckpointBlock;

/// Abbreviated dialect: `test:` plus single-letter action keys under `do:`.
pub struct CompactDialect;

const TOP_LEVEL: &[&str] = &[
    "test", "desc", "base", "nav", "config", "data", "blocks", "setup", "do", "teardown",
];
const CONFIG_FIELDS: &[&str] = &["retry", "timeout", "on_error", "viewport"];

impl CompactDialect {
    fn parse_steps(value: &Value, path: &str) -> Result<Vec<StepNode>, AppError> {
        parse_step_list(value, path, Self::parse_step)
    }

    fn parse_step(value: &Value, path: &str) -> Result<StepKind, AppError> {
        let map = expect_object(value, path)?;
        let (key, body) = single_entry(map, path)?;
        let body_path = child_path(path, key);
        let kind = match key {
            "nav" => call(ActionKind::Navigate, args_of(&[body])),
            "c" => call(ActionKind::Click, args_of(&[body])),
            "t" => call(ActionKind::Write, pair_args(body)),
            "clear" => call(ActionKind::Clear, args_of(&[body])),
            "h" => call(ActionKind::Hover, args_of(&[body])),
            "k" => match single_pair(body) {
                Some((selector, key)) => {
                    let mut args: Vec<ArgValue> = arg(key).into_iter().collect();
                    args.push(ArgValue::text(selector));
                    call(ActionKind::Key, args)
                }
                None => call(ActionKind::Key, args_of(&[body])),
            },
            "select" => match single_pair(body) {
                Some((_, Value::Number(_))) => call(ActionKind::SelectIndex, pair_args(body)),
                _ => call(ActionKind::SelectOption, pair_args(body)),
            },
            "scroll" => scroll_step(body),
            "ch" => call(ActionKind::AssertExists, args_of(&[body])),
            "nch" => call(ActionKind::AssertNotExists, args_of(&[body])),
            "eq" => call(ActionKind::AssertEquals, pair_args(body)),
            "neq" => call(ActionKind::AssertNotEquals, pair_args(body)),
            "gt" => call(ActionKind::AssertGreaterThan, pair_args(body)),
            "lt" => call(ActionKind::AssertLessThan, pair_args(body)),
            "store" => Self::store_step(body, &body_path)?,
            "cookie" => cookie_step(body),
            "wait" => Self::wait_step(body, &body_path)?,
            "js" => match body {
                Value::Object(fields) => call(
                    ActionKind::ExecuteJs,
                    args_of(&[
                        fields.get("script").unwrap_or(&Value::Null),
                        fields.get("as").unwrap_or(&Value::Null),
                    ]),
                ),
                scalar => call(ActionKind::ExecuteJs, args_of(&[scalar])),
            },
            "note" => call(ActionKind::Comment, args_of(&[body])),
            "dialog" => dialog_step(body),
            "window" => window_step(body),
            "upload" => call(ActionKind::Upload, pair_args(body)),
            "mouse" => mouse_step(body),
            "if" => {
                let fields = expect_object(body, &body_path)?;
                StepKind::If(IfBlock {
                    condition: opt_string(fields, "cond", &body_path)?.unwrap_or_default(),
                    then: Self::nested(fields, "then", &body_path)?,
                    otherwise: Self::nested(fields, "else", &body_path)?,
                })
            }
            "loop" => Self::loop_step(body, &body_path)?,
            "try" => {
                let fields = expect_object(body, &body_path)?;
                StepKind::Try(TryBlock {
                    steps: Self::nested(fields, "do", &body_path)?,
                    catch: Self::nested(fields, "catch", &body_path)?,
                })
            }
            "run" => use_block(arg(body).map(|name| name.to_string())),
            other => generic_action(other, body),
        };
        Ok(kind)
    }

    fn nested(fields: &Map<String, Value>, key: &str, path: &str) -> Result<Vec<StepNode>, AppError> {
        match fields.get(key) {
            Some(value) => Self::parse_steps(value, &child_path(path, key)),
            None => Ok(Vec::new()),
        }
    }

    fn store_step(body: &Value, path: &str) -> Result<StepKind, AppError> {
        if let Value::Object(fields) = body {
            if fields.contains_key("value") || fields.contains_key("as") {
                let value = fields.get("value").unwrap_or(&Value::Null);
                let var = fields.get("as").unwrap_or(&Value::Null);
                return Ok(call(ActionKind::StoreValue, args_of(&[value, var])));
            }
            if single_pair(body).is_none() {
                return Err(structure_error(
                    path,
                    "store expects {selector: variable} or {value, as}",
                ));
            }
        }
        Ok(call(ActionKind::StoreElementText, pair_args(body)))
    }

    fn wait_step(body: &Value, path: &str) -> Result<StepKind, AppError> {
        let kind = match body {
            Value::Number(_) => call(ActionKind::WaitTime, args_of(&[body])),
            Value::String(text) if is_digits(text) => call(ActionKind::WaitTime, args_of(&[body])),
            Value::Object(fields) => {
                let target = fields.get("for").unwrap_or(&Value::Null);
                let max = fields.get("max").unwrap_or(&Value::Null);
                if target.is_null() {
                    return Err(structure_error(path, "wait mapping requires 'for'"));
                }
                call(ActionKind::WaitElement, args_of(&[target, max]))
            }
            other => call(ActionKind::WaitElement, args_of(&[other])),
        };
        Ok(kind)
    }

    fn loop_step(body: &Value, path: &str) -> Result<StepKind, AppError> {
        let fields = expect_object(body, path)?;
        let steps = Self::nested(fields, "do", path)?;
        let var = opt_string(fields, "as", path)?;
        let until = opt_string(fields, "until", path)?;
        let counted = fields
            .get("times")
            .or_else(|| fields.get("over").filter(|over| over.is_number()));
        if let Some(times) = counted {
            return Ok(StepKind::Repeat(RepeatBlock {
                times: times.clone(),
                var,
                until,
                steps,
            }));
        }
        Ok(StepKind::Foreach(ForeachBlock {
            over: fields.get("over").cloned().unwrap_or(Value::Null),
            var: var.unwrap_or_else(|| "item".to_string()),
            max: fields.get("max").cloned(),
            until,
            steps,
        }))
    }

    fn parse_config(value: Option<&Value>, path: &str) -> Result<TestConfig, AppError> {
        let Some(value) = value.filter(|value| !value.is_null()) else {
            return Ok(TestConfig::default());
        };
        let map = expect_object(value, path)?;
        reject_unknown_fields(map, CONFIG_FIELDS, Dialect::Compact, path)?;
        let continue_on_error = match opt_string(map, "on_error", path)?.as_deref() {
            None => None,
            Some("continue") => Some(true),
            Some("stop") => Some(false),
            Some(other) => {
                return Err(structure_error(
                    &child_path(path, "on_error"),
                    format!("on_error must be 'continue' or 'stop', found '{}'", other),
                ))
            }
        };
        Ok(TestConfig {
            continue_on_error,
            timeout_ms: opt_millis(map, "timeout", path)?,
            retry: opt_u64(map, "retry", path)?.map(|n| n.min(u32::MAX as u64) as u32),
            viewport: opt_string(map, "viewport", path)?,
            ..TestConfig::default()
        })
    }

    fn render_steps(steps: &[StepNode]) -> Yaml {
        Yaml::Sequence(steps.iter().map(|step| Self.render_step(step)).collect())
    }

    fn render_action(kind: ActionKind, args: &[ArgValue]) -> Option<Yaml> {
        use ActionKind::*;
        let text = |index: usize| args.get(index).map(|value| value.to_string());
        let pair = |key: &str| -> Option<Yaml> {
            let [first, second] = args else { return None };
            Some(ymap(vec![(
                key,
                ymap(vec![(first.to_string().as_str(), arg_to_yaml(second))]),
            )]))
        };
        let scalar = |key: &str| -> Option<Yaml> {
            let [only] = args else { return None };
            Some(ymap(vec![(key, arg_to_yaml(only))]))
        };
        let word = |key: &str, value: &str| Some(ymap(vec![(key, ystr(value))]));

        match (kind, args.len()) {
            (Navigate, _) => scalar("nav"),
            (Click, _) => scalar("c"),
            (Write, _) => pair("t"),
            (Clear, _) => scalar("clear"),
            (Hover, _) => scalar("h"),
            (Key, 1) => scalar("k"),
            (Key, 2) => Some(ymap(vec![(
                "k",
                ymap(vec![(text(1)?.as_str(), arg_to_yaml(&args[0]))]),
            )])),
            (SelectOption, _) | (SelectIndex, _) => pair("select"),
            (ScrollTop, 0) => word("scroll", "top"),
            (ScrollBottom, 0) => word("scroll", "bottom"),
            (ScrollPosition, 2) => word("scroll", &format!("{},{}", text(0)?, text(1)?)),
            (ScrollElement, _) => scalar("scroll"),
            (AssertExists, _) => scalar("ch"),
            (AssertNotExists, _) => scalar("nch"),
            (AssertEquals, _) => pair("eq"),
            (AssertNotEquals, _) => pair("neq"),
            (AssertGreaterThan, _) => pair("gt"),
            (AssertLessThan, _) => pair("lt"),
            (StoreElementText, _) => pair("store"),
            (StoreValue, 2) => Some(ymap(vec![(
                "store",
                ymap(vec![("value", arg_to_yaml(&args[0])), ("as", arg_to_yaml(&args[1]))]),
            )])),
            (CookieCreate, _) => pair("cookie"),
            (CookieDelete, 1) => Some(ymap(vec![(
                "cookie",
                ymap(vec![("delete", arg_to_yaml(&args[0]))]),
            )])),
            (CookieClear, 0) => word("cookie", "clear"),
            (WaitTime, 1) if args[0].as_number().is_some() => scalar("wait"),
            (WaitElement, 1) => scalar("wait"),
            (WaitElement, 2) => Some(ymap(vec![(
                "wait",
                ymap(vec![("for", arg_to_yaml(&args[0])), ("max", arg_to_yaml(&args[1]))]),
            )])),
            (ExecuteJs, 1) => scalar("js"),
            (ExecuteJs, 2) => Some(ymap(vec![(
                "js",
                ymap(vec![("script", arg_to_yaml(&args[0])), ("as", arg_to_yaml(&args[1]))]),
            )])),
            (Comment, _) => scalar("note"),
            (DismissAlert, 0) => word("dialog", "accept"),
            (DismissConfirm, 1) => match args[0] {
                ArgValue::Flag(true) => word("dialog", "confirm"),
                ArgValue::Flag(false) => word("dialog", "cancel"),
                _ => None,
            },
            (DismissPrompt, 1) if !is_dialog_word(&args[0].to_string()) => scalar("dialog"),
            (WindowMaximize, 0) => word("window", "maximize"),
            (WindowResize, 1) => scalar("window"),
            (SwitchNextTab, 0) => word("window", "next"),
            (SwitchPrevTab, 0) => word("window", "prev"),
            (Upload, _) => pair("upload"),
            (MouseDown, 0) => word("mouse", "down"),
            (MouseUp, 0) => word("mouse", "up"),
            (MouseDown, 1) | (MouseUp, 1) => {
                let action = if kind == MouseDown { "down" } else { "up" };
                Some(ymap(vec![(
                    "mouse",
                    ymap(vec![("action", ystr(action)), ("target", arg_to_yaml(&args[0]))]),
                )]))
            }
            (MouseMove, 2) => word("mouse", &format!("{},{}", text(0)?, text(1)?)),
            _ => None,
        }
    }
}

fn scroll_step(body: &Value) -> StepKind {
    match body {
        Value::String(text) if text == "top" => call(ActionKind::ScrollTop, vec![]),
        Value::String(text) if text == "bottom" => call(ActionKind::ScrollBottom, vec![]),
        Value::String(text) => match parse_coordinates(text) {
            Some((x, y)) => call(
                ActionKind::ScrollPosition,
                vec![ArgValue::Number(x), ArgValue::Number(y)],
            ),
            None => call(ActionKind::ScrollElement, args_of(&[body])),
        },
        Value::Number(_) => {
            let mut args = vec![ArgValue::Number(0)];
            args.extend(arg(body));
            call(ActionKind::ScrollPosition, args)
        }
        other => call(ActionKind::ScrollElement, args_of(&[other])),
    }
}

fn cookie_step(body: &Value) -> StepKind {
    match body {
        Value::String(text) if text == "clear" => call(ActionKind::CookieClear, vec![]),
        _ => match single_pair(body) {
            Some(("delete", name)) => call(ActionKind::CookieDelete, args_of(&[name])),
            _ => call(ActionKind::CookieCreate, pair_args(body)),
        },
    }
}

fn is_dialog_word(text: &str) -> bool {
    matches!(text, "accept" | "dismiss" | "confirm" | "cancel")
}

fn dialog_step(body: &Value) -> StepKind {
    match body.as_str() {
        Some("accept") | Some("dismiss") => call(ActionKind::DismissAlert, vec![]),
        Some("confirm") => call(ActionKind::DismissConfirm, vec![ArgValue::Flag(true)]),
        Some("cancel") => call(ActionKind::DismissConfirm, vec![ArgValue::Flag(false)]),
        _ => call(ActionKind::DismissPrompt, args_of(&[body])),
    }
}

fn window_step(body: &Value) -> StepKind {
    match body.as_str() {
        Some("maximize") => call(ActionKind::WindowMaximize, vec![]),
        Some("next") => call(ActionKind::SwitchNextTab, vec![]),
        Some("prev") => call(ActionKind::SwitchPrevTab, vec![]),
        _ => call(ActionKind::WindowResize, args_of(&[body])),
    }
}

fn mouse_step(body: &Value) -> StepKind {
    match body {
        Value::String(text) if text == "down" => call(ActionKind::MouseDown, vec![]),
        Value::String(text) if text == "up" => call(ActionKind::MouseUp, vec![]),
        Value::String(text) => match parse_coordinates(text) {
            Some((x, y)) => call(
                ActionKind::MouseMove,
                vec![ArgValue::Number(x), ArgValue::Number(y)],
            ),
            None => StepNode::action(format!("mouse.{}", text), vec![]),
        },
        Value::Object(fields) => {
            let target = fields.get("target").unwrap_or(&Value::Null);
            match fields.get("action").and_then(Value::as_str) {
                Some("down") => call(ActionKind::MouseDown, args_of(&[target])),
                Some("up") => call(ActionKind::MouseUp, args_of(&[target])),
                Some(other) => StepNode::action(format!("mouse.{}", other), args_of(&[target])),
                None => StepNode::action("mouse", args_of(&[target])),
            }
        }
        other => StepNode::action("mouse", args_of(&[other])),
    }
}

impl DialectStrategy for CompactDialect {
    fn dialect(&self) -> Dialect {
        Dialect::Compact
    }

    fn parse(&self, tree: &Value) -> Result<TestDocument, AppError> {
        let map = expect_object(tree, "")?;
        reject_unknown_fields(map, TOP_LEVEL, Dialect::Compact, "")?;

        let mut main = match map.get("do") {
            Some(value) => Self::parse_steps(value, "do")?,
            None => Vec::new(),
        };
        if let Some(url) = map.get("nav") {
            main.insert(
                0,
                StepNode::new(call(ActionKind::Navigate, args_of(&[url])), 1, "nav"),
            );
            renumber(&mut main);
        }

        let mut checkpoints = Vec::new();
        if let Some(setup) = map.get("setup") {
            let steps = Self::parse_steps(setup, SETUP)?;
            if !steps.is_empty() {
                checkpoints.push(CheckpointBlock::new(SETUP, steps));
            }
        }
        checkpoints.push(CheckpointBlock::new(MAIN, main));
        if let Some(teardown) = map.get("teardown") {
            let steps = Self::parse_steps(teardown, TEARDOWN)?;
            if !steps.is_empty() {
                checkpoints.push(CheckpointBlock::new(TEARDOWN, steps));
            }
        }

        Ok(TestDocument {
            name: opt_string(map, "test", "")?.unwrap_or_default(),
            description: opt_string(map, "desc", "")?,
            base_url: opt_string(map, "base", "")?,
            starting_context: Default::default(),
            config: Self::parse_config(map.get("config"), "config")?,
            variables: parse_variables(map.get("data"), "data")?,
            blocks: parse_blocks(map.get("blocks"), "blocks", Self::parse_steps)?,
            checkpoints,
        })
    }

    fn render(&self, document: &TestDocument) -> Rendered {
        let mut warnings = Vec::new();
        let mut root = Mapping::new();
        root.insert(ystr("test"), ystr(&document.name));
        push_opt(&mut root, "desc", document.description.as_ref());
        push_opt(&mut root, "base", document.base_url.as_ref());

        if !document.starting_context.is_empty() {
            warnings.push(
                "compact dialect has no starting context; project/goal/journey/checkpoint were dropped"
                    .to_string(),
            );
        }

        let config = &document.config;
        if config.screenshot_on_failure.is_some() {
            warnings.push("config.screenshot_on_failure is not expressible in compact and was dropped".to_string());
        }
        if config.output_format.is_some() {
            warnings.push("config.output_format is not expressible in compact and was dropped".to_string());
        }
        let mut compact_config = Mapping::new();
        if let Some(retry) = config.retry {
            compact_config.insert(ystr("retry"), Yaml::Number(u64::from(retry).into()));
        }
        if let Some(timeout) = config.timeout_ms {
            compact_config.insert(ystr("timeout"), Yaml::Number(timeout.into()));
        }
        if let Some(flag) = config.continue_on_error {
            compact_config.insert(ystr("on_error"), ystr(if flag { "continue" } else { "stop" }));
        }
        push_opt(&mut compact_config, "viewport", config.viewport.as_ref());
        if !compact_config.is_empty() {
            root.insert(ystr("config"), Yaml::Mapping(compact_config));
        }

        let mut variables = document.variables.clone();
        for checkpoint in &document.checkpoints {
            for (name, value) in &checkpoint.variables {
                warnings.push(format!(
                    "checkpoint variable '{}' from '{}' was hoisted into data",
                    name, checkpoint.name
                ));
                variables.entry(name.clone()).or_insert_with(|| value.clone());
            }
        }
        if !variables.is_empty() {
            root.insert(ystr("data"), variables_to_yaml(&variables));
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
                let key = if checkpoint.name == MAIN { "do" } else { checkpoint.name.as_str() };
                root.insert(ystr(key), Self::render_steps(&checkpoint.steps));
            }
        } else {
            let names: Vec<&str> = document.checkpoints.iter().map(|cp| cp.name.as_str()).collect();
            warnings.push(format!(
                "checkpoints {} were merged into a single do list",
                names.join(", ")
            ));
            let merged: Vec<StepNode> = document
                .checkpoints
                .iter()
                .flat_map(|cp| cp.steps.iter().cloned())
                .collect();
            root.insert(ystr("do"), Self::render_steps(&merged));
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
            StepKind::If(block) => {
                let mut fields = vec![
                    ("cond", ystr(&block.condition)),
                    ("then", Self::render_steps(&block.then)),
                ];
                if !block.otherwise.is_empty() {
                    fields.push(("else", Self::render_steps(&block.otherwise)));
                }
                ymap(vec![("if", ymap(fields))])
            }
            StepKind::Repeat(block) => {
                let mut fields = vec![("times", json_to_yaml(&block.times))];
                if let Some(var) = &block.var {
                    fields.push(("as", ystr(var)));
                }
                if let Some(until) = &block.until {
                    fields.push(("until", ystr(until)));
                }
                fields.push(("do", Self::render_steps(&block.steps)));
                ymap(vec![("loop", ymap(fields))])
            }
            StepKind::Foreach(block) => {
                let mut fields = vec![
                    ("over", json_to_yaml(&block.over)),
                    ("as", ystr(&block.var)),
                ];
                if let Some(max) = &block.max {
                    fields.push(("max", json_to_yaml(max)));
                }
                if let Some(until) = &block.until {
                    fields.push(("until", ystr(until)));
                }
                fields.push(("do", Self::render_steps(&block.steps)));
                ymap(vec![("loop", ymap(fields))])
            }
            StepKind::Try(block) => {
                let mut fields = vec![("do", Self::render_steps(&block.steps))];
                if !block.catch.is_empty() {
                    fields.push(("catch", Self::render_steps(&block.catch)));
                }
                ymap(vec![("try", ymap(fields))])
            }
            StepKind::Use(block) => ymap(vec![("run", ystr(&block.block))]),
        }
    }

    fn description(&self) -> &'static str {
        "Compact dialect: `test:` names the document and `do:` lists steps using \
         abbreviated keys (nav, c, t, ch, eq, ...) for a minimal token footprint."
    }

    fn example(&self) -> &'static str {
        "test: Login\nnav: https://example.test/login\ndo:\n  - t: {\"#user\": alice}\n  - c: \"#submit\"\n  - ch: Welcome\n"
    }
}
