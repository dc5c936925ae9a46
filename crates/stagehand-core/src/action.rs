//! The declarative action vocabulary.
//!
//! Test content is written as flat JSON records such as
//! `{"tap": "button[name=save]"}` or
//! `{"assert": "Save", "using": "name", "exists": true}`. Exactly one
//! *primary* key names the operation; the remaining keys are its arguments.
//!
//! Records are parsed eagerly into the closed [`Action`] enum. Unknown
//! primary keys, two primary keys in one record and any unrecognised
//! secondary key are rejected here, before anything runs. The `using` key is
//! kept as written and only checked when the query is built, because an
//! invalid `using` is a query error at run time rather than a parse error.
//! Numbers and regular expressions that reference variables (`"${n}"`) are
//! likewise kept as text and only parsed or compiled when the action runs.
//!
//! # Example
//!
//! ```
//! use stagehand_core::action::Action;
//!
//! let action = Action::from_value(serde_json::json!({
//!     "typeIn": "textfield[name=email]",
//!     "text": "${user}@example.test",
//! }))
//! .unwrap();
//! assert_eq!(action.verb(), "typeIn");
//! ```

use std::fmt;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::asset::{AssetKind, AssetReference};
use crate::driver::{ScrollDirection, ScrollOptions, TapOptions};
use crate::selector::{Property, Query, SelectorError};
use crate::variables::VariableStore;

/// Keys allowed on every record and otherwise ignored.
const ANNOTATION_KEYS: &[&str] = &["description", "comment"];

const PRIMARY_KEYS: &[&str] = &[
    "tap",
    "typeIn",
    "setValue",
    "setTo",
    "scroll",
    "scrollTo",
    "sendKeys",
    "assert",
    "store",
    "save",
    "saveAll",
    "saveObject",
    "deleteVar",
    "getConfig",
    "setConfig",
    "retries",
    "execute",
    "executeWidget",
    "executeOver",
    "validate",
    "wait",
    "waitFor",
    "osexec",
    "debug",
    "saveToFile",
    "launch",
    "terminate",
    "home",
    "lock",
    "screenshot",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionParseError {
    #[error("an action must be a JSON object")]
    NotAnObject,

    #[error("no known action key in record (keys: {0})")]
    Unknown(String),

    #[error("record has more than one action key: {0}")]
    Ambiguous(String),

    #[error("`{verb}` does not take a `{key}` key")]
    UnexpectedKey { verb: &'static str, key: String },

    #[error("`{verb}` requires a `{key}` key")]
    MissingKey { verb: &'static str, key: &'static str },

    #[error("`{verb}`: `{key}` must be {expected}")]
    InvalidValue {
        verb: &'static str,
        key: &'static str,
        expected: &'static str,
    },

    #[error("`assert` takes at most one of exists, is<Property>, matches<Property> or hasCount*, found {0}")]
    Assertion(String),
}

/// The element an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Raw `using` key; validated when the query is built.
    pub using: String,
    pub selector: String,
}

impl Target {
    pub fn new(using: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            using: using.into(),
            selector: selector.into(),
        }
    }

    /// Interpolates variables and builds the query.
    pub fn query(&self, variables: &VariableStore) -> Result<Query, SelectorError> {
        Query::parse(
            &variables.interpolate(&self.using),
            &variables.interpolate(&self.selector),
        )
    }
}

/// A regular expression, compiled up front unless it references variables.
#[derive(Debug, Clone)]
pub enum Pattern {
    Compiled(Regex),
    Dynamic(String),
}

impl Pattern {
    /// The compiled expression. On failure returns the interpolated source.
    pub fn resolve(&self, variables: &VariableStore) -> Result<Regex, String> {
        match self {
            Pattern::Compiled(regex) => Ok(regex.clone()),
            Pattern::Dynamic(source) => {
                let source = variables.interpolate(source);
                Regex::new(&source).map_err(|_| source)
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Compiled(regex) => write!(f, "{}", regex),
            Pattern::Dynamic(source) => write!(f, "{}", source),
        }
    }
}

/// Regex capture applied before storing a value.
#[derive(Debug, Clone)]
pub struct Capture {
    pub pattern: Pattern,
    /// Group to store; `None` stores the full match followed by every group.
    pub index: Option<Count>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountComparison {
    Equals,
    GreaterThan,
    LessThan,
}

impl CountComparison {
    pub fn holds(self, actual: usize, expected: usize) -> bool {
        match self {
            CountComparison::Equals => actual == expected,
            CountComparison::GreaterThan => actual > expected,
            CountComparison::LessThan => actual < expected,
        }
    }

    /// Whether an empty result could still satisfy the comparison.
    pub fn accepts_empty(self, expected: usize) -> bool {
        self.holds(0, expected)
    }
}

/// A non-negative integer, literal or read from a variable at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Count {
    Fixed(u64),
    Dynamic(String),
}

impl Count {
    /// The number. On failure returns the interpolated text.
    pub fn resolve(&self, variables: &VariableStore) -> Result<u64, String> {
        match self {
            Count::Fixed(n) => Ok(*n),
            Count::Dynamic(text) => {
                let text = variables.interpolate(text);
                text.trim().parse().map_err(|_| text)
            }
        }
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Count::Fixed(n) => write!(f, "{}", n),
            Count::Dynamic(text) => write!(f, "{}", text),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    Tap {
        target: Target,
        options: TapOptions,
        refresh: bool,
    },
    TypeIn {
        target: Target,
        text: String,
        refresh: bool,
    },
    SetValue {
        target: Target,
        text: String,
        refresh: bool,
    },
    Scroll {
        target: Target,
        options: ScrollOptions,
        refresh: bool,
    },
    ScrollTo {
        target: Target,
        refresh: bool,
    },
    SendKeys {
        keys: String,
        into: Option<Target>,
        refresh: bool,
    },
    AssertExists {
        target: Target,
        exists: bool,
    },
    AssertIs {
        target: Target,
        property: Property,
        expected: Value,
    },
    AssertMatches {
        target: Target,
        property: Property,
        pattern: Pattern,
    },
    AssertCount {
        target: Target,
        comparison: CountComparison,
        count: Count,
    },
    Store {
        text: String,
        name: String,
        capture: Option<Capture>,
        persist: bool,
    },
    Save {
        target: Target,
        name: String,
        property: Property,
        capture: Option<Capture>,
        persist: bool,
        if_exists: bool,
    },
    SaveAll {
        target: Target,
        name: String,
        property: Property,
        persist: bool,
    },
    SaveObject {
        object: Value,
        name: String,
        persist: bool,
    },
    DeleteVar {
        name: String,
    },
    GetConfig {
        key: String,
        name: String,
        persist: bool,
    },
    SetConfig {
        key: String,
        value: Value,
    },
    Execute {
        reference: AssetReference,
    },
    ExecuteAndRepeat {
        reference: AssetReference,
        times: Count,
        counter: String,
    },
    ExecuteOver {
        reference: AssetReference,
        items: Vec<Value>,
        bind: String,
        counter: Option<String>,
    },
    ExecuteOverVariable {
        reference: AssetReference,
        variable: String,
        bind: String,
        counter: Option<String>,
    },
    Validate {
        reference: AssetReference,
    },
    Wait {
        duration_ms: Count,
    },
    WaitFor {
        target: Target,
        attempts: Option<Count>,
    },
    OsExec {
        program: String,
        args: Vec<String>,
        name: Option<String>,
    },
    Debug {
        message: Option<String>,
        tree: bool,
    },
    SaveToFile {
        path: String,
        content: String,
    },
    Launch {
        app_id: String,
    },
    Terminate {
        app_id: String,
    },
    Home,
    Lock,
    Screenshot {
        path: Option<String>,
        name: Option<String>,
    },
}

impl Action {
    pub fn from_value(value: Value) -> Result<Self, ActionParseError> {
        match value {
            Value::Object(map) => Self::try_from(map),
            _ => Err(ActionParseError::NotAnObject),
        }
    }

    /// Stable camelCase name, used in logs and journal records.
    pub fn verb(&self) -> &'static str {
        match self {
            Action::Tap { options, .. } if options.hold_ms.is_some() => "longPress",
            Action::Tap { options, .. } if options.count == 2 => "doubleTap",
            Action::Tap { .. } => "tap",
            Action::TypeIn { .. } => "typeIn",
            Action::SetValue { .. } => "setValue",
            Action::Scroll { .. } => "scroll",
            Action::ScrollTo { .. } => "scrollTo",
            Action::SendKeys { .. } => "sendKeys",
            Action::AssertExists { .. } => "assertExists",
            Action::AssertIs { .. } => "assertIs",
            Action::AssertMatches { .. } => "assertMatches",
            Action::AssertCount { comparison, .. } => match comparison {
                CountComparison::Equals => "assertHasCount",
                CountComparison::GreaterThan => "assertHasCountGreaterThan",
                CountComparison::LessThan => "assertHasCountLessThan",
            },
            Action::Store { .. } => "storeAs",
            Action::Save { if_exists: true, .. } => "saveAsIfExists",
            Action::Save { .. } => "saveAs",
            Action::SaveAll { .. } => "saveAllAs",
            Action::SaveObject { .. } => "saveObjectAs",
            Action::DeleteVar { .. } => "deleteVar",
            Action::GetConfig { .. } => "getConfigAs",
            Action::SetConfig { .. } => "setConfigTo",
            Action::Execute { reference } if reference.kind == AssetKind::Widget => "executeWidget",
            Action::Execute { .. } => "execute",
            Action::ExecuteAndRepeat { .. } => "executeAndRepeat",
            Action::ExecuteOver { .. } => "executeOver",
            Action::ExecuteOverVariable { .. } => "executeOverVariable",
            Action::Validate { .. } => "validate",
            Action::Wait { .. } => "wait",
            Action::WaitFor { .. } => "waitFor",
            Action::OsExec { .. } => "osexec",
            Action::Debug { .. } => "debug",
            Action::SaveToFile { .. } => "saveToFile",
            Action::Launch { .. } => "launch",
            Action::Terminate { .. } => "terminate",
            Action::Home => "home",
            Action::Lock => "lock",
            Action::Screenshot { .. } => "screenshot",
        }
    }

    /// The verb phrase used in "Should <phrase> `<target>`" messages.
    pub fn phrase(&self) -> &'static str {
        match self {
            Action::Tap { options, .. } if options.hold_ms.is_some() => "long press",
            Action::Tap { options, .. } if options.count == 2 => "double tap",
            Action::Tap { .. } => "tap",
            Action::TypeIn { .. } => "type into",
            Action::SetValue { .. } => "set the value of",
            Action::Scroll { .. } => "scroll",
            Action::ScrollTo { .. } => "scroll to",
            Action::SendKeys { .. } => "send keys",
            Action::AssertExists { exists: true, .. } => "find",
            Action::AssertExists { .. } => "not find",
            Action::AssertIs { .. } => "verify",
            Action::AssertMatches { .. } => "match",
            Action::AssertCount { .. } => "count",
            Action::Store { .. } | Action::Save { .. } | Action::SaveAll { .. } | Action::SaveObject { .. } => {
                "save"
            }
            Action::DeleteVar { .. } => "delete",
            Action::GetConfig { .. } => "read config",
            Action::SetConfig { .. } => "set config",
            Action::Execute { .. }
            | Action::ExecuteAndRepeat { .. }
            | Action::ExecuteOver { .. }
            | Action::ExecuteOverVariable { .. } => "execute",
            Action::Validate { .. } => "validate",
            Action::Wait { .. } => "wait",
            Action::WaitFor { .. } => "wait for",
            Action::OsExec { .. } => "run",
            Action::Debug { .. } => "debug",
            Action::SaveToFile { .. } => "write",
            Action::Launch { .. } => "launch",
            Action::Terminate { .. } => "terminate",
            Action::Home => "go",
            Action::Lock => "lock",
            Action::Screenshot { .. } => "capture",
        }
    }

    /// What the action is aimed at, as written in the record.
    pub fn target_text(&self) -> String {
        match self {
            Action::Tap { target, .. }
            | Action::TypeIn { target, .. }
            | Action::SetValue { target, .. }
            | Action::Scroll { target, .. }
            | Action::ScrollTo { target, .. }
            | Action::AssertExists { target, .. }
            | Action::AssertIs { target, .. }
            | Action::AssertMatches { target, .. }
            | Action::AssertCount { target, .. }
            | Action::Save { target, .. }
            | Action::SaveAll { target, .. }
            | Action::WaitFor { target, .. } => target.selector.clone(),
            Action::SendKeys { keys, into, .. } => match into {
                Some(target) => target.selector.clone(),
                None => keys.clone(),
            },
            Action::Store { name, .. }
            | Action::SaveObject { name, .. }
            | Action::DeleteVar { name } => name.clone(),
            Action::GetConfig { key, .. } | Action::SetConfig { key, .. } => key.clone(),
            Action::Execute { reference }
            | Action::ExecuteAndRepeat { reference, .. }
            | Action::ExecuteOver { reference, .. }
            | Action::ExecuteOverVariable { reference, .. }
            | Action::Validate { reference } => reference.name.clone(),
            Action::Wait { duration_ms } => format!("{duration_ms}ms"),
            Action::OsExec { program, .. } => program.clone(),
            Action::Debug { message, .. } => message.clone().unwrap_or_default(),
            Action::SaveToFile { path, .. } => path.clone(),
            Action::Launch { app_id } | Action::Terminate { app_id } => app_id.clone(),
            Action::Home => "home".to_string(),
            Action::Lock => "device".to_string(),
            Action::Screenshot { path, name } => path
                .clone()
                .or_else(|| name.clone())
                .unwrap_or_else(|| "screen".to_string()),
        }
    }

    /// Whether this action is a composition that evaluates a nested asset.
    pub fn is_composition(&self) -> bool {
        matches!(
            self,
            Action::Execute { .. }
                | Action::ExecuteAndRepeat { .. }
                | Action::ExecuteOver { .. }
                | Action::ExecuteOverVariable { .. }
                | Action::Validate { .. }
        )
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Action::try_from(map).map_err(serde::de::Error::custom)
    }
}

/// A record being consumed key by key.
struct Record {
    verb: &'static str,
    map: Map<String, Value>,
}

impl Record {
    fn take(&mut self, key: &str) -> Option<Value> {
        self.map.remove(key)
    }

    fn invalid(&self, key: &'static str, expected: &'static str) -> ActionParseError {
        ActionParseError::InvalidValue {
            verb: self.verb,
            key,
            expected,
        }
    }

    /// Strings as-is; numbers and booleans in their JSON text form.
    fn string(&mut self, key: &'static str) -> Result<Option<String>, ActionParseError> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
            Some(_) => Err(self.invalid(key, "a string")),
        }
    }

    fn require_string(&mut self, key: &'static str) -> Result<String, ActionParseError> {
        self.string(key)?.ok_or(ActionParseError::MissingKey {
            verb: self.verb,
            key,
        })
    }

    fn bool(&mut self, key: &'static str) -> Result<Option<bool>, ActionParseError> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::String(s)) if s == "true" || s == "false" => Ok(Some(s == "true")),
            Some(_) => Err(self.invalid(key, "a boolean")),
        }
    }

    fn u64(&mut self, key: &'static str) -> Result<Option<u64>, ActionParseError> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or(self.invalid(key, "a non-negative integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, "a non-negative integer")),
            Some(_) => Err(self.invalid(key, "a non-negative integer")),
        }
    }

    fn string_list(&mut self, key: &'static str) -> Result<Vec<String>, ActionParseError> {
        match self.take(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    Value::Number(_) | Value::Bool(_) => Ok(v.to_string()),
                    _ => Err(self.invalid(key, "an array of strings")),
                })
                .collect(),
            Some(_) => Err(self.invalid(key, "an array of strings")),
        }
    }

    /// A `u64` that must also fit `T`.
    fn narrow<T: TryFrom<u64>>(&mut self, key: &'static str) -> Result<Option<T>, ActionParseError> {
        match self.u64(key)? {
            Some(n) => T::try_from(n)
                .map(Some)
                .map_err(|_| self.invalid(key, "a smaller integer")),
            None => Ok(None),
        }
    }

    /// A literal integer that fits `T`, or text referencing a variable.
    fn count<T: TryFrom<u64>>(&mut self, key: &'static str) -> Result<Option<Count>, ActionParseError> {
        match self.take(key) {
            Some(Value::String(s)) if s.contains("${") => Ok(Some(Count::Dynamic(s))),
            Some(value) => {
                self.map.insert(key.to_string(), value);
                match self.u64(key)? {
                    Some(n) if T::try_from(n).is_err() => Err(self.invalid(key, "a smaller integer")),
                    n => Ok(n.map(Count::Fixed)),
                }
            }
            None => Ok(None),
        }
    }

    fn pattern(&mut self, key: &'static str) -> Result<Option<Pattern>, ActionParseError> {
        match self.string(key)? {
            Some(source) if source.contains("${") => Ok(Some(Pattern::Dynamic(source))),
            Some(source) => Regex::new(&source)
                .map(|regex| Some(Pattern::Compiled(regex)))
                .map_err(|_| self.invalid(key, "a valid regular expression")),
            None => Ok(None),
        }
    }

    fn target(&mut self, selector: String) -> Result<Target, ActionParseError> {
        let using = self.string("using")?.unwrap_or_else(|| "selector".to_string());
        Ok(Target { using, selector })
    }

    fn refresh(&mut self) -> Result<bool, ActionParseError> {
        Ok(self.bool("refresh")?.unwrap_or(true))
    }

    fn capture(&mut self) -> Result<Option<Capture>, ActionParseError> {
        let pattern = self.pattern("capture")?;
        let index = self.count::<usize>("index")?;
        match (pattern, index) {
            (Some(pattern), index) => Ok(Some(Capture { pattern, index })),
            (None, Some(_)) => Err(ActionParseError::UnexpectedKey {
                verb: self.verb,
                key: "index".to_string(),
            }),
            (None, None) => Ok(None),
        }
    }

    fn property(&mut self, default: Property) -> Result<Property, ActionParseError> {
        match self.string("property")? {
            Some(p) => p.parse().map_err(|_| self.invalid("property", "an element property")),
            None => Ok(default),
        }
    }

    fn reference(&mut self, name: String, default: AssetKind) -> Result<AssetReference, ActionParseError> {
        let kind = match self.string("type")? {
            Some(t) => t.parse().map_err(|_| self.invalid("type", "an asset type"))?,
            None => default,
        };
        Ok(AssetReference {
            kind,
            name,
            suite: self.string("suite")?,
            module: self.string("module")?,
            platform: self.string("platform")?,
            accept: self.bool("accept")?.unwrap_or(true),
            run: self.bool("run")?.unwrap_or(true),
        })
    }

    /// Fails on any key left unconsumed.
    fn finish(mut self) -> Result<(), ActionParseError> {
        for key in ANNOTATION_KEYS {
            self.map.remove(*key);
        }
        match self.map.keys().next() {
            Some(key) => Err(ActionParseError::UnexpectedKey {
                verb: self.verb,
                key: key.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn primary_string(verb: &'static str, value: Value) -> Result<String, ActionParseError> {
    match value {
        Value::String(s) => Ok(s),
        v @ (Value::Number(_) | Value::Bool(_)) => Ok(v.to_string()),
        _ => Err(ActionParseError::InvalidValue {
            verb,
            key: verb,
            expected: "a string",
        }),
    }
}

fn parse_assert(rec: &mut Record, target: Target) -> Result<Action, ActionParseError> {
    const IS_KEYS: &[(&str, Property)] = &[
        ("isEnabled", Property::Enabled),
        ("isVisible", Property::Visible),
        ("isLabel", Property::Label),
        ("isValue", Property::Value),
        ("isName", Property::Name),
        ("isType", Property::Type),
        ("isId", Property::Id),
    ];
    const MATCHES_KEYS: &[(&str, Property)] = &[
        ("matchesLabel", Property::Label),
        ("matchesValue", Property::Value),
        ("matchesName", Property::Name),
        ("matchesType", Property::Type),
        ("matchesId", Property::Id),
    ];
    const COUNT_KEYS: &[(&str, CountComparison)] = &[
        ("hasCount", CountComparison::Equals),
        ("hasCountGreaterThan", CountComparison::GreaterThan),
        ("hasCountLessThan", CountComparison::LessThan),
    ];

    let present: Vec<&str> = std::iter::once("exists")
        .chain(IS_KEYS.iter().map(|(k, _)| *k))
        .chain(MATCHES_KEYS.iter().map(|(k, _)| *k))
        .chain(COUNT_KEYS.iter().map(|(k, _)| *k))
        .filter(|k| rec.map.contains_key(*k))
        .collect();
    let key = match present.as_slice() {
        [] => return Ok(Action::AssertExists { target, exists: true }),
        [key] => *key,
        many => return Err(ActionParseError::Assertion(many.join(", "))),
    };
    if key == "exists" {
        let exists = rec.bool("exists")?.unwrap_or(true);
        return Ok(Action::AssertExists { target, exists });
    }
    if let Some((k, property)) = IS_KEYS.iter().find(|(k, _)| *k == key) {
        let expected = rec.take(k).unwrap_or(Value::Null);
        return Ok(Action::AssertIs {
            target,
            property: *property,
            expected,
        });
    }
    if let Some((k, property)) = MATCHES_KEYS.iter().find(|(k, _)| *k == key) {
        let pattern = rec
            .pattern(*k)?
            .ok_or(rec.invalid(*k, "a valid regular expression"))?;
        return Ok(Action::AssertMatches {
            target,
            property: *property,
            pattern,
        });
    }
    let (k, comparison) = COUNT_KEYS
        .iter()
        .find(|(k, _)| *k == key)
        .copied()
        .unwrap_or(("hasCount", CountComparison::Equals));
    let count = rec
        .count::<usize>(k)?
        .ok_or(rec.invalid(k, "a non-negative integer"))?;
    Ok(Action::AssertCount {
        target,
        comparison,
        count,
    })
}

impl TryFrom<Map<String, Value>> for Action {
    type Error = ActionParseError;

    fn try_from(mut map: Map<String, Value>) -> Result<Self, Self::Error> {
        let primaries: Vec<&'static str> = PRIMARY_KEYS
            .iter()
            .copied()
            .filter(|k| map.contains_key(*k))
            .collect();
        let verb = match primaries.as_slice() {
            [one] => *one,
            [] => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                return Err(ActionParseError::Unknown(keys.join(", ")));
            }
            many => return Err(ActionParseError::Ambiguous(many.join(", "))),
        };
        let primary = map.remove(verb).unwrap_or(Value::Null);
        let mut rec = Record { verb, map };

        let action = match verb {
            "tap" => {
                let target = rec.target(primary_string(verb, primary)?)?;
                let count = rec.narrow::<u32>("count")?.unwrap_or(1);
                let hold_ms = rec.u64("hold")?;
                Action::Tap {
                    target,
                    options: TapOptions { count, hold_ms },
                    refresh: rec.refresh()?,
                }
            }
            "typeIn" => Action::TypeIn {
                target: rec.target(primary_string(verb, primary)?)?,
                text: rec.require_string("text")?,
                refresh: rec.refresh()?,
            },
            "setValue" | "setTo" => Action::SetValue {
                target: rec.target(primary_string(verb, primary)?)?,
                text: rec.require_string("to")?,
                refresh: rec.refresh()?,
            },
            "scroll" => {
                let target = rec.target(primary_string(verb, primary)?)?;
                let direction = match rec.string("direction")? {
                    Some(d) => serde_json::from_value::<ScrollDirection>(Value::String(d))
                        .map_err(|_| rec.invalid("direction", "one of up, down, left, right"))?,
                    None => ScrollDirection::default(),
                };
                let distance = match rec.take("distance") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(v.as_f64().ok_or(rec.invalid("distance", "a number"))?),
                };
                Action::Scroll {
                    target,
                    options: ScrollOptions {
                        direction,
                        distance,
                        into_view: false,
                    },
                    refresh: rec.refresh()?,
                }
            }
            "scrollTo" => Action::ScrollTo {
                target: rec.target(primary_string(verb, primary)?)?,
                refresh: rec.refresh()?,
            },
            "sendKeys" => {
                let keys = primary_string(verb, primary)?;
                let into = match rec.string("into")? {
                    Some(selector) => Some(rec.target(selector)?),
                    None => None,
                };
                Action::SendKeys {
                    keys,
                    into,
                    refresh: rec.refresh()?,
                }
            }
            "assert" => {
                let target = rec.target(primary_string(verb, primary)?)?;
                parse_assert(&mut rec, target)?
            }
            "store" => Action::Store {
                text: primary_string(verb, primary)?,
                name: rec.require_string("as")?,
                capture: rec.capture()?,
                persist: rec.bool("persist")?.unwrap_or(false),
            },
            "save" => Action::Save {
                target: rec.target(primary_string(verb, primary)?)?,
                name: rec.require_string("as")?,
                property: rec.property(Property::Value)?,
                capture: rec.capture()?,
                persist: rec.bool("persist")?.unwrap_or(false),
                if_exists: rec.bool("ifExists")?.unwrap_or(false),
            },
            "saveAll" => Action::SaveAll {
                target: rec.target(primary_string(verb, primary)?)?,
                name: rec.require_string("as")?,
                property: rec.property(Property::Value)?,
                persist: rec.bool("persist")?.unwrap_or(false),
            },
            "saveObject" => {
                let object = match primary {
                    Value::String(s) => serde_json::from_str(&s)
                        .map_err(|_| rec.invalid("saveObject", "a JSON object or JSON text"))?,
                    other => other,
                };
                Action::SaveObject {
                    object,
                    name: rec.require_string("as")?,
                    persist: rec.bool("persist")?.unwrap_or(false),
                }
            }
            "deleteVar" => Action::DeleteVar {
                name: primary_string(verb, primary)?,
            },
            "getConfig" => Action::GetConfig {
                key: primary_string(verb, primary)?,
                name: rec.require_string("as")?,
                persist: rec.bool("persist")?.unwrap_or(false),
            },
            "setConfig" => Action::SetConfig {
                key: primary_string(verb, primary)?,
                value: rec.take("to").ok_or(ActionParseError::MissingKey { verb, key: "to" })?,
            },
            "retries" => {
                rec.map.insert("retries".to_string(), primary);
                let n = rec.u64("retries")?.ok_or(rec.invalid("retries", "a non-negative integer"))?;
                Action::SetConfig {
                    key: "retries".to_string(),
                    value: Value::from(n),
                }
            }
            "execute" | "executeWidget" => {
                let default = if verb == "executeWidget" { AssetKind::Widget } else { AssetKind::Action };
                let reference = rec.reference(primary_string(verb, primary)?, default)?;
                let counter = rec.string("counter")?;
                match rec.count::<u64>("repeat")? {
                    None => {
                        if counter.is_some() {
                            return Err(ActionParseError::UnexpectedKey {
                                verb,
                                key: "counter".to_string(),
                            });
                        }
                        Action::Execute { reference }
                    }
                    Some(times) => {
                        Action::ExecuteAndRepeat {
                            reference,
                            times,
                            counter: counter.unwrap_or_else(|| "index".to_string()),
                        }
                    }
                }
            }
            "executeOver" => {
                let reference = rec.reference(primary_string(verb, primary)?, AssetKind::Action)?;
                let bind = rec.string("as")?.unwrap_or_else(|| "item".to_string());
                let counter = rec.string("counter")?;
                match (rec.take("items"), rec.string("variable")?) {
                    (Some(Value::Array(items)), None) => Action::ExecuteOver {
                        reference,
                        items,
                        bind,
                        counter,
                    },
                    (None, Some(variable)) => Action::ExecuteOverVariable {
                        reference,
                        variable,
                        bind,
                        counter,
                    },
                    (Some(Value::Array(_)), Some(_)) => {
                        return Err(ActionParseError::UnexpectedKey {
                            verb,
                            key: "variable".to_string(),
                        })
                    }
                    (Some(_), _) => return Err(rec.invalid("items", "an array")),
                    (None, None) => return Err(ActionParseError::MissingKey { verb, key: "items" }),
                }
            }
            "validate" => Action::Validate {
                reference: rec.reference(primary_string(verb, primary)?, AssetKind::Screen)?,
            },
            "wait" => {
                rec.map.insert("wait".to_string(), primary);
                Action::Wait {
                    duration_ms: rec
                        .count::<u64>("wait")?
                        .ok_or(rec.invalid("wait", "a duration in milliseconds"))?,
                }
            }
            "waitFor" => Action::WaitFor {
                target: rec.target(primary_string(verb, primary)?)?,
                attempts: rec.count::<u32>("attempts")?,
            },
            "osexec" => Action::OsExec {
                program: primary_string(verb, primary)?,
                args: rec.string_list("args")?,
                name: rec.string("as")?,
            },
            "debug" => {
                let (message, tree) = match primary {
                    Value::Null => (None, false),
                    Value::Bool(tree) => (None, tree),
                    other => (Some(primary_string(verb, other)?), false),
                };
                let tree = rec.bool("tree")?.unwrap_or(tree);
                Action::Debug { message, tree }
            }
            "saveToFile" => Action::SaveToFile {
                path: primary_string(verb, primary)?,
                content: rec.require_string("content")?,
            },
            "launch" => Action::Launch {
                app_id: primary_string(verb, primary)?,
            },
            "terminate" => Action::Terminate {
                app_id: primary_string(verb, primary)?,
            },
            "home" => Action::Home,
            "lock" => Action::Lock,
            "screenshot" => {
                let path = match primary {
                    Value::Null | Value::Bool(_) => None,
                    other => Some(primary_string(verb, other)?),
                };
                Action::Screenshot {
                    path,
                    name: rec.string("as")?,
                }
            }
            other => return Err(ActionParseError::Unknown(other.to_string())),
        };

        rec.finish()?;
        Ok(action)
    }
}
