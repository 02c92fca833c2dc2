//! Closed action vocabulary and the handler registry keyed by it.
//!
//! Every primitive browser action the compiler can emit is an [`ActionKind`].
//! Behaviour that differs per action (argument signature, retry policy,
//! variable capture, API payload) lives behind [`ActionHandler`], so adding a
//! primitive means registering one more handler.

use crate::core::yaml_layer::document::ArgValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Navigate,
    Click,
    Write,
    Clear,
    Key,
    Hover,
    SelectOption,
    SelectIndex,
    ScrollTop,
    ScrollBottom,
    ScrollPosition,
    ScrollElement,
    AssertExists,
    AssertNotExists,
    AssertEquals,
    AssertNotEquals,
    AssertGreaterThan,
    AssertLessThan,
    StoreElementText,
    StoreValue,
    CookieCreate,
    CookieDelete,
    CookieClear,
    WaitTime,
    WaitElement,
    ExecuteJs,
    Comment,
    DismissAlert,
    DismissConfirm,
    DismissPrompt,
    WindowMaximize,
    WindowResize,
    SwitchNextTab,
    SwitchPrevTab,
    Upload,
    MouseDown,
    MouseUp,
    MouseMove,
}

impl ActionKind {
    pub const ALL: [ActionKind; 38] = [
        ActionKind::Navigate,
        ActionKind::Click,
        ActionKind::Write,
        ActionKind::Clear,
        ActionKind::Key,
        ActionKind::Hover,
        ActionKind::SelectOption,
        ActionKind::SelectIndex,
        ActionKind::ScrollTop,
        ActionKind::ScrollBottom,
        ActionKind::ScrollPosition,
        ActionKind::ScrollElement,
        ActionKind::AssertExists,
        ActionKind::AssertNotExists,
        ActionKind::AssertEquals,
        ActionKind::AssertNotEquals,
        ActionKind::AssertGreaterThan,
        ActionKind::AssertLessThan,
        ActionKind::StoreElementText,
        ActionKind::StoreValue,
        ActionKind::CookieCreate,
        ActionKind::CookieDelete,
        ActionKind::CookieClear,
        ActionKind::WaitTime,
        ActionKind::WaitElement,
        ActionKind::ExecuteJs,
        ActionKind::Comment,
        ActionKind::DismissAlert,
        ActionKind::DismissConfirm,
        ActionKind::DismissPrompt,
        ActionKind::WindowMaximize,
        ActionKind::WindowResize,
        ActionKind::SwitchNextTab,
        ActionKind::SwitchPrevTab,
        ActionKind::Upload,
        ActionKind::MouseDown,
        ActionKind::MouseUp,
        ActionKind::MouseMove,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Write => "write",
            ActionKind::Clear => "clear",
            ActionKind::Key => "key",
            ActionKind::Hover => "hover",
            ActionKind::SelectOption => "select-option",
            ActionKind::SelectIndex => "select-index",
            ActionKind::ScrollTop => "scroll-top",
            ActionKind::ScrollBottom => "scroll-bottom",
            ActionKind::ScrollPosition => "scroll-position",
            ActionKind::ScrollElement => "scroll-element",
            ActionKind::AssertExists => "assert-exists",
            ActionKind::AssertNotExists => "assert-not-exists",
            ActionKind::AssertEquals => "assert-equals",
            ActionKind::AssertNotEquals => "assert-not-equals",
            ActionKind::AssertGreaterThan => "assert-greater-than",
            ActionKind::AssertLessThan => "assert-less-than",
            ActionKind::StoreElementText => "store-element-text",
            ActionKind::StoreValue => "store-value",
            ActionKind::CookieCreate => "cookie-create",
            ActionKind::CookieDelete => "cookie-delete",
            ActionKind::CookieClear => "cookie-clear",
            ActionKind::WaitTime => "wait-time",
            ActionKind::WaitElement => "wait-element",
            ActionKind::ExecuteJs => "execute-js",
            ActionKind::Comment => "comment",
            ActionKind::DismissAlert => "dismiss-alert",
            ActionKind::DismissConfirm => "dismiss-confirm",
            ActionKind::DismissPrompt => "dismiss-prompt",
            ActionKind::WindowMaximize => "window-maximize",
            ActionKind::WindowResize => "window-resize",
            ActionKind::SwitchNextTab => "switch-next-tab",
            ActionKind::SwitchPrevTab => "switch-prev-tab",
            ActionKind::Upload => "upload",
            ActionKind::MouseDown => "mouse-down",
            ActionKind::MouseUp => "mouse-up",
            ActionKind::MouseMove => "mouse-move",
        }
    }

    /// Exact canonical name lookup.
    pub fn parse(name: &str) -> Option<Self> {
        ActionKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Canonical name or one of the long-form aliases shared by the verbose dialects.
    pub fn from_alias(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase().replace('_', "-");
        if let Some(kind) = ActionKind::parse(&lowered) {
            return Some(kind);
        }
        let kind = match lowered.as_str() {
            "goto" | "open" | "visit" => ActionKind::Navigate,
            "type" | "fill" | "input" => ActionKind::Write,
            "press" => ActionKind::Key,
            "check" | "exists" | "assert" => ActionKind::AssertExists,
            "not-exists" => ActionKind::AssertNotExists,
            "equals" => ActionKind::AssertEquals,
            "not-equals" => ActionKind::AssertNotEquals,
            "greater-than" | "gt" => ActionKind::AssertGreaterThan,
            "less-than" | "lt" => ActionKind::AssertLessThan,
            "js" | "execute" | "script" => ActionKind::ExecuteJs,
            "note" => ActionKind::Comment,
            "sleep" => ActionKind::WaitTime,
            "maximize" => ActionKind::WindowMaximize,
            "resize" => ActionKind::WindowResize,
            _ => return None,
        };
        Some(kind)
    }

    /// Closest canonical name for "did you mean" suggestions.
    pub fn closest(name: &str) -> Option<Self> {
        let lowered = name.to_ascii_lowercase();
        ActionKind::ALL
            .iter()
            .copied()
            .map(|kind| (edit_distance(&lowered, kind.name()), kind))
            .filter(|(distance, _)| *distance <= 3)
            .min_by_key(|(distance, kind)| (*distance, *kind))
            .map(|(_, kind)| kind)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut current = vec![i + 1; b_chars.len() + 1];
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            current[j + 1] = (previous[j] + cost)
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        previous = current;
    }
    previous[b_chars.len()]
}

/// What an argument means to the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Url,
    Selector,
    Text,
    Number,
    Duration,
    Variable,
    Key,
    Size,
    Flag,
}

impl ParamKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, ParamKind::Number | ParamKind::Duration)
    }

    fn sample(self, name: &str) -> ArgValue {
        match self {
            ParamKind::Url => ArgValue::text("https://example.test/login"),
            ParamKind::Selector => ArgValue::text("#submit"),
            ParamKind::Text => ArgValue::text(match name {
                "script" => "return document.title",
                "name" => "session",
                _ => "Welcome",
            }),
            ParamKind::Number => ArgValue::Number(if name == "index" { 0 } else { 100 }),
            ParamKind::Duration => ArgValue::Number(2000),
            ParamKind::Variable => ArgValue::text("token"),
            ParamKind::Key => ArgValue::text("Enter"),
            ParamKind::Size => ArgValue::text("1280x720"),
            ParamKind::Flag => ArgValue::Flag(true),
        }
    }
}

/// Where the extended dialect stores an argument: `target`, `value`, or `options.<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Target,
    Value,
    Option,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub slot: Slot,
    pub required: bool,
}

const fn req(name: &'static str, kind: ParamKind, slot: Slot) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        slot,
        required: true,
    }
}

const fn opt(name: &'static str, kind: ParamKind, slot: Slot) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        slot,
        required: false,
    }
}

const SELECTOR: ParamSpec = req("selector", ParamKind::Selector, Slot::Target);

const NO_PARAMS: &[ParamSpec] = &[];
const URL_ONLY: &[ParamSpec] = &[req("url", ParamKind::Url, Slot::Target)];
const SELECTOR_ONLY: &[ParamSpec] = &[SELECTOR];
const OPTIONAL_SELECTOR: &[ParamSpec] = &[opt("selector", ParamKind::Selector, Slot::Target)];
const SELECTOR_TEXT: &[ParamSpec] = &[SELECTOR, req("text", ParamKind::Text, Slot::Value)];
const SELECTOR_EXPECTED: &[ParamSpec] =
    &[SELECTOR, req("expected", ParamKind::Text, Slot::Value)];
const KEY_PARAMS: &[ParamSpec] = &[
    req("key", ParamKind::Key, Slot::Value),
    opt("selector", ParamKind::Selector, Slot::Target),
];
const SELECT_OPTION: &[ParamSpec] = &[SELECTOR, req("option", ParamKind::Text, Slot::Value)];
const SELECT_INDEX: &[ParamSpec] = &[SELECTOR, req("index", ParamKind::Number, Slot::Value)];
const COORDINATES: &[ParamSpec] = &[
    req("x", ParamKind::Number, Slot::Option),
    req("y", ParamKind::Number, Slot::Option),
];
const STORE_ELEMENT: &[ParamSpec] =
    &[SELECTOR, req("variable", ParamKind::Variable, Slot::Value)];
const STORE_LITERAL: &[ParamSpec] = &[
    req("value", ParamKind::Text, Slot::Value),
    req("variable", ParamKind::Variable, Slot::Option),
];
const COOKIE_CREATE: &[ParamSpec] = &[
    req("name", ParamKind::Text, Slot::Target),
    req("value", ParamKind::Text, Slot::Value),
];
const COOKIE_NAME: &[ParamSpec] = &[req("name", ParamKind::Text, Slot::Target)];
const WAIT_TIME: &[ParamSpec] = &[req("duration", ParamKind::Duration, Slot::Value)];
const WAIT_ELEMENT: &[ParamSpec] =
    &[SELECTOR, opt("timeout", ParamKind::Duration, Slot::Option)];
const EXECUTE_JS: &[ParamSpec] = &[
    req("script", ParamKind::Text, Slot::Value),
    opt("variable", ParamKind::Variable, Slot::Option),
];
const TEXT_ONLY: &[ParamSpec] = &[req("text", ParamKind::Text, Slot::Value)];
const ACCEPT_FLAG: &[ParamSpec] = &[req("accept", ParamKind::Flag, Slot::Value)];
const WINDOW_SIZE: &[ParamSpec] = &[req("size", ParamKind::Size, Slot::Value)];
const UPLOAD: &[ParamSpec] = &[SELECTOR, req("url", ParamKind::Url, Slot::Value)];

/// Whether a failed dispatch may be repeated safely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryPolicy {
    None,
    IdempotentRetry,
}

/// Per-action behaviour consumed by the validator, compiler and executor.
pub trait ActionHandler: Send + Sync + 'static {
    fn kind(&self) -> ActionKind;

    /// Ordered argument signature; optional parameters are trailing.
    fn params(&self) -> &[ParamSpec];

    fn retry_policy(&self) -> RetryPolicy;

    /// Variable bound from the step's output when it succeeds.
    fn captured_variable<'a>(&self, args: &'a [ArgValue]) -> Option<&'a str>;

    /// Body of the `parsedStep` object sent to the step API.
    fn payload(&self, args: &[ArgValue]) -> Value;

    /// One-line human description used by text output and comments.
    fn describe(&self, args: &[ArgValue]) -> String {
        let rendered: Vec<String> = args.iter().map(|arg| format!("{:?}", arg.to_string())).collect();
        if rendered.is_empty() {
            self.kind().name().to_string()
        } else {
            format!("{} {}", self.kind().name(), rendered.join(" "))
        }
    }

    /// Plausible arguments used to render fix examples.
    fn sample_args(&self) -> Vec<ArgValue> {
        self.params()
            .iter()
            .filter(|param| param.required)
            .map(|param| param.kind.sample(param.name))
            .collect()
    }

    fn required_count(&self) -> usize {
        self.params().iter().filter(|param| param.required).count()
    }
}

/// Table-driven handler used for every built-in primitive.
pub struct PrimitiveAction {
    kind: ActionKind,
    params: &'static [ParamSpec],
    retry: RetryPolicy,
    capture: Option<usize>,
    api_action: &'static str,
}

impl PrimitiveAction {
    pub fn builtin(kind: ActionKind) -> Self {
        use ActionKind::*;
        use RetryPolicy::{IdempotentRetry as Idem, None as Once};

        let (params, retry, capture, api_action) = match kind {
            Navigate => (URL_ONLY, Idem, None, "NAVIGATE"),
            Click => (SELECTOR_ONLY, Once, None, "CLICK"),
            Write => (SELECTOR_TEXT, Once, None, "WRITE"),
            Clear => (SELECTOR_ONLY, Once, None, "CLEAR"),
            Key => (KEY_PARAMS, Once, None, "KEY"),
            Hover => (SELECTOR_ONLY, Idem, None, "MOUSE_OVER"),
            SelectOption => (SELECT_OPTION, Once, None, "PICK"),
            SelectIndex => (SELECT_INDEX, Once, None, "PICK_INDEX"),
            ScrollTop => (NO_PARAMS, Idem, None, "SCROLL_TOP"),
            ScrollBottom => (NO_PARAMS, Idem, None, "SCROLL_BOTTOM"),
            ScrollPosition => (COORDINATES, Idem, None, "SCROLL_POSITION"),
            ScrollElement => (SELECTOR_ONLY, Idem, None, "SCROLL_ELEMENT"),
            AssertExists => (SELECTOR_ONLY, Idem, None, "ASSERT_EXISTS"),
            AssertNotExists => (SELECTOR_ONLY, Idem, None, "ASSERT_NOT_EXISTS"),
            AssertEquals => (SELECTOR_EXPECTED, Idem, None, "ASSERT_EQUALS"),
            AssertNotEquals => (SELECTOR_EXPECTED, Idem, None, "ASSERT_NOT_EQUALS"),
            AssertGreaterThan => (SELECTOR_EXPECTED, Idem, None, "ASSERT_GREATER_THAN"),
            AssertLessThan => (SELECTOR_EXPECTED, Idem, None, "ASSERT_LESS_THAN"),
            StoreElementText => (STORE_ELEMENT, Idem, Some(1), "STORE"),
            StoreValue => (STORE_LITERAL, Idem, Some(1), "STORE_VALUE"),
            CookieCreate => (COOKIE_CREATE, Once, None, "ADD_COOKIE"),
            CookieDelete => (COOKIE_NAME, Once, None, "DELETE_COOKIE"),
            CookieClear => (NO_PARAMS, Once, None, "CLEAR_COOKIES"),
            WaitTime => (WAIT_TIME, Idem, None, "WAIT_TIME"),
            WaitElement => (WAIT_ELEMENT, Idem, None, "WAIT_FOR_ELEMENT"),
            ExecuteJs => (EXECUTE_JS, Once, Some(1), "EXECUTE"),
            Comment => (TEXT_ONLY, Idem, None, "COMMENT"),
            DismissAlert => (NO_PARAMS, Once, None, "DISMISS_ALERT"),
            DismissConfirm => (ACCEPT_FLAG, Once, None, "DISMISS_CONFIRM"),
            DismissPrompt => (TEXT_ONLY, Once, None, "DISMISS_PROMPT"),
            WindowMaximize => (NO_PARAMS, Idem, None, "WINDOW_MAXIMIZE"),
            WindowResize => (WINDOW_SIZE, Idem, None, "WINDOW_RESIZE"),
            SwitchNextTab => (NO_PARAMS, Idem, None, "SWITCH_NEXT_TAB"),
            SwitchPrevTab => (NO_PARAMS, Idem, None, "SWITCH_PREV_TAB"),
            Upload => (UPLOAD, Once, None, "UPLOAD_URL"),
            MouseDown => (OPTIONAL_SELECTOR, Once, None, "MOUSE_DOWN"),
            MouseUp => (OPTIONAL_SELECTOR, Once, None, "MOUSE_UP"),
            MouseMove => (COORDINATES, Idem, None, "MOUSE_MOVE_TO"),
        };

        Self {
            kind,
            params,
            retry,
            capture,
            api_action,
        }
    }
}

impl ActionHandler for PrimitiveAction {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn params(&self) -> &[ParamSpec] {
        self.params
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn captured_variable<'a>(&self, args: &'a [ArgValue]) -> Option<&'a str> {
        self.capture
            .and_then(|index| args.get(index))
            .and_then(ArgValue::as_text)
    }

    fn payload(&self, args: &[ArgValue]) -> Value {
        let mut step = Map::new();
        let mut meta = Map::new();
        step.insert("action".to_string(), Value::String(self.api_action.to_string()));
        for (param, arg) in self.params.iter().zip(args) {
            if param.kind == ParamKind::Selector {
                let clue = json!({ "clue": arg.to_string() }).to_string();
                step.insert(
                    "target".to_string(),
                    json!({ "selectors": [{ "type": "GUESS", "value": clue }] }),
                );
            } else if !step.contains_key("value")
                && (param.slot == Slot::Value || param.kind == ParamKind::Url)
            {
                step.insert("value".to_string(), Value::String(arg.to_string()));
            } else {
                meta.insert(param.name.to_string(), arg.to_json());
            }
        }
        meta.insert("kind".to_string(), Value::String(self.kind.name().to_string()));
        step.insert("meta".to_string(), Value::Object(meta));
        Value::Object(step)
    }
}

/// Builder used to register action handlers.
pub struct ActionRegistryBuilder {
    handlers: BTreeMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl Default for ActionRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistryBuilder {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Builder pre-populated with a [`PrimitiveAction`] for every kind.
    pub fn with_builtins() -> Self {
        let mut builder = Self::new();
        for kind in ActionKind::ALL {
            builder.register(PrimitiveAction::builtin(kind));
        }
        builder
    }

    pub fn register<T: ActionHandler>(&mut self, handler: T) -> &mut Self {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            panic!("duplicate action handler registered: {}", kind);
        }
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Swap the handler for an already registered kind.
    pub fn replace<T: ActionHandler>(&mut self, handler: T) -> &mut Self {
        self.handlers.insert(handler.kind(), Arc::new(handler));
        self
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            inner: Arc::new(self.handlers),
        }
    }
}

/// Immutable registry shared by the validator, compiler and executor.
#[derive(Clone)]
pub struct ActionRegistry {
    inner: Arc<BTreeMap<ActionKind, Arc<dyn ActionHandler>>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::standard().clone()
    }
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    /// Process-wide registry with every built-in primitive.
    pub fn standard() -> &'static ActionRegistry {
        static STANDARD: OnceLock<ActionRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| ActionRegistryBuilder::with_builtins().build())
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.inner.get(&kind).cloned()
    }

    /// Resolve a canonical action name to its registered handler.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        ActionKind::parse(name).and_then(|kind| self.get(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.inner.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_builtin_handler() {
        let registry = ActionRegistry::standard();
        assert_eq!(registry.kinds().count(), ActionKind::ALL.len());
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.name()), Some(kind));
        }
    }

    #[test]
    fn aliases_resolve_to_canonical_kinds() {
        assert_eq!(ActionKind::from_alias("goto"), Some(ActionKind::Navigate));
        assert_eq!(ActionKind::from_alias("type"), Some(ActionKind::Write));
        assert_eq!(
            ActionKind::from_alias("assert_not_equals"),
            Some(ActionKind::AssertNotEquals)
        );
        assert_eq!(ActionKind::from_alias("teleport"), None);
    }

    #[test]
    fn closest_suggests_near_misses() {
        assert_eq!(ActionKind::closest("clik"), Some(ActionKind::Click));
        assert_eq!(ActionKind::closest("zzzzzzzzzzzz"), None);
    }

    #[test]
    fn payload_places_selector_in_target_and_text_in_value() {
        let handler = ActionRegistry::standard()
            .get(ActionKind::Write)
            .expect("write handler");
        let payload = handler.payload(&[ArgValue::text("#user"), ArgValue::text("alice")]);
        assert_eq!(payload["action"], "WRITE");
        assert_eq!(payload["value"], "alice");
        assert_eq!(
            payload["target"]["selectors"][0]["value"],
            "{\"clue\":\"#user\"}"
        );
        assert_eq!(payload["meta"]["kind"], "write");
    }

    #[test]
    fn store_captures_the_variable_argument() {
        let handler = ActionRegistry::standard()
            .get(ActionKind::StoreElementText)
            .expect("store handler");
        let args = [ArgValue::text("#total"), ArgValue::text("total")];
        assert_eq!(handler.captured_variable(&args), Some("total"));
        assert_eq!(handler.retry_policy(), RetryPolicy::IdempotentRetry);
    }

    #[test]
    fn mutating_actions_are_not_retried() {
        let registry = ActionRegistry::standard();
        for kind in [ActionKind::Click, ActionKind::Write, ActionKind::Upload] {
            let handler = registry.get(kind).expect("handler");
            assert_eq!(handler.retry_policy(), RetryPolicy::None, "{}", kind);
        }
    }
}
