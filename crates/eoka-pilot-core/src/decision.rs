//! Decisions: the structured action the oracle picks for one step, and the
//! validation that turns a raw oracle reply into one.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::UseMode;
use crate::{Error, Result};

pub const DEFAULT_WAIT_MS: i64 = 3000;
pub const DEFAULT_SCROLL_PX: i64 = 300;
pub const DEFAULT_KEY: &str = "Enter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Press,
    Wait,
    Scroll,
    Complete,
    Hover,
    Clear,
    Search,
    Screenshot,
    GenerateTest,
    /// Unparseable command. Reported to the caller, never executed.
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Press => "press",
            ActionKind::Wait => "wait",
            ActionKind::Scroll => "scroll",
            ActionKind::Complete => "complete",
            ActionKind::Hover => "hover",
            ActionKind::Clear => "clear",
            ActionKind::Search => "search",
            ActionKind::Screenshot => "screenshot",
            ActionKind::GenerateTest => "generate_test",
            ActionKind::Unknown => "unknown",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "navigate" => ActionKind::Navigate,
            "click" => ActionKind::Click,
            "type" => ActionKind::Type,
            "press" => ActionKind::Press,
            "wait" => ActionKind::Wait,
            "scroll" => ActionKind::Scroll,
            "complete" => ActionKind::Complete,
            "hover" => ActionKind::Hover,
            "clear" => ActionKind::Clear,
            "search" => ActionKind::Search,
            "screenshot" => ActionKind::Screenshot,
            "generate_test" => ActionKind::GenerateTest,
            _ => return None,
        })
    }

    /// Kinds that act on a page element and go through selector resolution.
    pub fn targets_element(&self) -> bool {
        matches!(
            self,
            ActionKind::Click
                | ActionKind::Type
                | ActionKind::Hover
                | ActionKind::Clear
                | ActionKind::Search
        )
    }

    /// Kinds that may change the DOM and warrant a post-action settle.
    pub fn needs_settle(&self) -> bool {
        !matches!(
            self,
            ActionKind::Wait
                | ActionKind::Complete
                | ActionKind::GenerateTest
                | ActionKind::Screenshot
                | ActionKind::Unknown
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of action kinds allowed in one use-mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionVocabulary {
    mode: UseMode,
    kinds: Vec<ActionKind>,
}

const PLANNER_KINDS: &[ActionKind] = &[
    ActionKind::Navigate,
    ActionKind::Click,
    ActionKind::Type,
    ActionKind::Press,
    ActionKind::Wait,
    ActionKind::Scroll,
    ActionKind::Complete,
    ActionKind::Hover,
    ActionKind::Clear,
];

impl ActionVocabulary {
    pub fn planner() -> Self {
        Self {
            mode: UseMode::Planner,
            kinds: PLANNER_KINDS.to_vec(),
        }
    }

    /// Planner kinds plus search, screenshot and generate_test; accepts `press_key`.
    pub fn command() -> Self {
        let mut kinds = PLANNER_KINDS.to_vec();
        kinds.extend([
            ActionKind::Search,
            ActionKind::Screenshot,
            ActionKind::GenerateTest,
        ]);
        Self {
            mode: UseMode::Command,
            kinds,
        }
    }

    pub fn for_mode(mode: UseMode) -> Self {
        match mode {
            UseMode::Planner => Self::planner(),
            UseMode::Command => Self::command(),
        }
    }

    pub fn mode(&self) -> UseMode {
        self.mode
    }

    pub fn allows(&self, kind: ActionKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Names as the oracle should spell them.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.kinds.iter().map(|k| k.as_str()).collect();
        if self.mode == UseMode::Command {
            names.push("press_key");
        }
        names
    }

    /// Map an action name to a kind allowed here.
    pub fn resolve(&self, raw: &str) -> Result<ActionKind> {
        let name = raw.trim().to_ascii_lowercase();
        let kind = match name.as_str() {
            "press_key" if self.mode == UseMode::Command => Some(ActionKind::Press),
            other => ActionKind::from_name(other),
        };
        match kind {
            Some(k) if self.allows(k) => Ok(k),
            _ => Err(Error::UnknownAction(raw.trim().to_string())),
        }
    }
}

/// What a decision acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Element index in the latest snapshot.
    Index(usize),
    Url(String),
    Key(String),
    /// Caller-supplied selector, used when no index was given.
    Selector(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Index(i) => write!(f, "[{}]", i),
            Target::Url(u) => f.write_str(u),
            Target::Key(k) => f.write_str(k),
            Target::Selector(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionFlags {
    pub wait_before: bool,
    pub wait_after: bool,
    pub scroll_into_view: bool,
    pub verify_visible: bool,
}

impl Default for DecisionFlags {
    fn default() -> Self {
        Self {
            wait_before: false,
            wait_after: true,
            scroll_into_view: true,
            verify_visible: true,
        }
    }
}

/// One step's instruction.
///
/// `reasoning`, `description` and `confidence` are carried for logs and
/// history only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub action: ActionKind,
    pub target: Option<Target>,
    pub value: Option<String>,
    /// Wait duration in ms, or signed scroll distance in px (negative is up).
    pub amount: Option<i64>,
    pub selector: Option<String>,
    pub fallback_selectors: Vec<String>,
    pub flags: DecisionFlags,
    pub reasoning: String,
    pub description: String,
    pub confidence: f64,
}

impl Decision {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            target: None,
            value: None,
            amount: None,
            selector: None,
            fallback_selectors: Vec::new(),
            flags: DecisionFlags::default(),
            reasoning: String::new(),
            description: String::new(),
            confidence: 0.0,
        }
    }

    pub fn navigate(url: &str) -> Self {
        Self::new(ActionKind::Navigate).with_target(Target::Url(normalize_url(url)))
    }

    pub fn complete() -> Self {
        Self::new(ActionKind::Complete)
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_amount(mut self, amount: i64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallback_selectors = fallbacks;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn target_index(&self) -> Option<usize> {
        match self.target {
            Some(Target::Index(i)) => Some(i),
            _ => None,
        }
    }

    /// Short human summary, e.g. `click [3]` or `type "hello" into [1]`.
    pub fn summary(&self) -> String {
        if !self.description.is_empty() {
            return self.description.clone();
        }
        let target = self.target.as_ref().map(|t| t.to_string());
        match (self.action, target, &self.value) {
            (ActionKind::Type | ActionKind::Search, Some(t), Some(v)) => {
                format!("{} \"{}\" into {}", self.action, v, t)
            }
            (ActionKind::Type | ActionKind::Search, None, Some(v)) => {
                format!("{} \"{}\"", self.action, v)
            }
            (ActionKind::Wait, _, _) => format!("wait {}ms", self.amount.unwrap_or(DEFAULT_WAIT_MS)),
            (ActionKind::Scroll, _, _) => {
                let px = self.amount.unwrap_or(DEFAULT_SCROLL_PX);
                let dir = if px < 0 { "up" } else { "down" };
                format!("scroll {} {}px", dir, px.abs())
            }
            (ActionKind::Unknown, _, Some(v)) => format!("unknown command: {}", v),
            (kind, Some(t), _) => format!("{} {}", kind, t),
            (kind, None, _) => kind.to_string(),
        }
    }

    /// Validate a raw oracle reply against `vocab`.
    ///
    /// Tolerates code fences and prose around a single JSON object. Missing
    /// required fields are `Oracle` errors; a kind outside the vocabulary is
    /// `UnknownAction`. Optional fields that are absent or malformed get
    /// conservative defaults.
    pub fn parse_reply(text: &str, vocab: &ActionVocabulary) -> Result<Decision> {
        let json = extract_object(text)
            .ok_or_else(|| Error::Oracle(format!("no JSON object in reply: {}", preview(text))))?;
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::Oracle(format!("invalid JSON in reply: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Oracle("reply is not a JSON object".into()))?;
        Self::from_fields(obj, vocab)
    }

    fn from_fields(obj: &Map<String, Value>, vocab: &ActionVocabulary) -> Result<Decision> {
        let action = str_field(obj, "action")
            .ok_or_else(|| Error::Oracle("reply has no action".into()))?;
        let kind = vocab.resolve(&action)?;
        let mut d = Decision::new(kind);

        d.value = str_field(obj, "value");
        d.selector = str_field(obj, "selector");
        d.fallback_selectors = obj
            .get("fallbackSelectors")
            .or_else(|| obj.get("fallback_selectors"))
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let defaults = DecisionFlags::default();
        d.flags = DecisionFlags {
            wait_before: bool_field(obj, &["waitBefore", "wait_before"]).unwrap_or(defaults.wait_before),
            wait_after: bool_field(obj, &["waitAfter", "wait_after"]).unwrap_or(defaults.wait_after),
            scroll_into_view: bool_field(obj, &["scrollIntoView", "scroll_into_view"])
                .unwrap_or(defaults.scroll_into_view),
            verify_visible: bool_field(obj, &["verifyVisible", "verify_visible"])
                .unwrap_or(defaults.verify_visible),
        };
        d.reasoning = str_field(obj, "reasoning").unwrap_or_default();
        d.description = str_field(obj, "description").unwrap_or_default();
        d.confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        let target = obj.get("target");
        match kind {
            ActionKind::Navigate => {
                let url = target
                    .and_then(value_as_string)
                    .or_else(|| d.value.clone())
                    .ok_or_else(|| Error::Oracle("navigate requires a target URL".into()))?;
                d.target = Some(Target::Url(normalize_url(&url)));
            }
            ActionKind::Press => {
                let key = target
                    .and_then(value_as_string)
                    .or_else(|| d.value.clone())
                    .unwrap_or_else(|| DEFAULT_KEY.to_string());
                d.target = Some(Target::Key(key));
            }
            ActionKind::Wait => {
                let ms = target
                    .and_then(value_as_i64)
                    .or_else(|| obj.get("value").and_then(value_as_i64))
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_WAIT_MS);
                d.amount = Some(ms);
            }
            ActionKind::Scroll => {
                let px = obj
                    .get("value")
                    .and_then(value_as_i64)
                    .or_else(|| obj.get("amount").and_then(value_as_i64))
                    .and_then(i64::checked_abs)
                    .filter(|px| *px > 0)
                    .unwrap_or(DEFAULT_SCROLL_PX);
                let up = str_field(obj, "direction")
                    .or_else(|| target.and_then(value_as_string))
                    .is_some_and(|d| d.eq_ignore_ascii_case("up"));
                d.amount = Some(if up { -px } else { px });
            }
            k if k.targets_element() => {
                d.target = target.and_then(element_target);
                if d.target.is_none() && d.selector.is_none() && k != ActionKind::Search {
                    return Err(Error::Oracle(format!("{} requires a target element", k)));
                }
            }
            _ => {}
        }

        if matches!(kind, ActionKind::Type | ActionKind::Search)
            && d.value.as_deref().map_or(true, |v| v.is_empty())
        {
            return Err(Error::Oracle(format!("{} requires a value", kind)));
        }

        Ok(d)
    }
}

/// Prefix bare hosts with `https://`; leave explicit schemes alone.
pub fn normalize_url(raw: &str) -> String {
    let url = raw.trim();
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("about:")
        || lower.starts_with("data:")
        || lower.starts_with("file:")
    {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        format!("https://{}", url)
    }
}

fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn preview(text: &str) -> String {
    let t = text.trim();
    match t.char_indices().nth(80) {
        Some((i, _)) => format!("{}...", &t[..i]),
        None => t.to_string(),
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(value_as_string)
}

fn bool_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_bool))
}

fn value_as_string(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn element_target(v: &Value) -> Option<Target> {
    match v {
        Value::Number(n) => n.as_u64().map(|i| Target::Index(i as usize)),
        Value::String(s) => {
            let s = s.trim();
            let bare = s.trim_start_matches('[').trim_end_matches(']');
            if let Ok(i) = bare.parse::<usize>() {
                Some(Target::Index(i))
            } else if s.is_empty() {
                None
            } else {
                Some(Target::Selector(s.to_string()))
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner(text: &str) -> Result<Decision> {
        Decision::parse_reply(text, &ActionVocabulary::planner())
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url(" example.com/a?b=1 "), "https://example.com/a?b=1");
        assert_eq!(normalize_url("//cdn.example.com"), "https://cdn.example.com");
        assert_eq!(normalize_url("http://x.test"), "http://x.test");
        assert_eq!(normalize_url("HTTPS://X.test"), "HTTPS://X.test");
        assert_eq!(normalize_url("about:blank"), "about:blank");
        assert_eq!(normalize_url("data:text/html,<p>hi</p>"), "data:text/html,<p>hi</p>");
    }

    #[test]
    fn test_parse_navigate_bare_host() {
        let d = planner(r#"{"action":"navigate","target":"example.com"}"#).unwrap();
        assert_eq!(d.action, ActionKind::Navigate);
        assert_eq!(d.target, Some(Target::Url("https://example.com".into())));
    }

    #[test]
    fn test_parse_navigate_requires_url() {
        let err = planner(r#"{"action":"navigate"}"#).unwrap_err();
        assert!(matches!(err, Error::Oracle(_)));
    }

    #[test]
    fn test_parse_with_fences_and_prose() {
        let reply = "Sure, here you go:\n```json\n{\"action\": \"click\", \"target\": 3, \"reasoning\": \"the login button\"}\n```";
        let d = planner(reply).unwrap();
        assert_eq!(d.action, ActionKind::Click);
        assert_eq!(d.target_index(), Some(3));
        assert_eq!(d.reasoning, "the login button");
        assert_eq!(d.flags, DecisionFlags::default());
    }

    #[test]
    fn test_parse_index_as_string() {
        let d = planner(r#"{"action":"hover","target":"[12]"}"#).unwrap();
        assert_eq!(d.target_index(), Some(12));
    }

    #[test]
    fn test_parse_not_json() {
        assert!(matches!(planner("I think we should click login"), Err(Error::Oracle(_))));
        assert!(matches!(planner("{not json}"), Err(Error::Oracle(_))));
    }

    #[test]
    fn test_parse_missing_action() {
        assert!(matches!(planner(r#"{"target": 1}"#), Err(Error::Oracle(_))));
    }

    #[test]
    fn test_parse_unknown_action() {
        let err = planner(r#"{"action":"teleport"}"#).unwrap_err();
        assert!(matches!(err, Error::UnknownAction(ref a) if a == "teleport"));
    }

    #[test]
    fn test_vocabulary_per_mode() {
        let err = planner(r#"{"action":"screenshot"}"#).unwrap_err();
        assert!(matches!(err, Error::UnknownAction(_)));

        let d = Decision::parse_reply(r#"{"action":"screenshot"}"#, &ActionVocabulary::command()).unwrap();
        assert_eq!(d.action, ActionKind::Screenshot);

        let d = Decision::parse_reply(
            r#"{"action":"press_key","target":"Tab"}"#,
            &ActionVocabulary::command(),
        )
        .unwrap();
        assert_eq!(d.action, ActionKind::Press);
        assert_eq!(d.target, Some(Target::Key("Tab".into())));

        assert!(planner(r#"{"action":"press_key"}"#).is_err());
    }

    #[test]
    fn test_type_requires_value() {
        assert!(matches!(
            planner(r#"{"action":"type","target":1}"#),
            Err(Error::Oracle(_))
        ));
        assert!(matches!(
            planner(r#"{"action":"type","target":1,"value":""}"#),
            Err(Error::Oracle(_))
        ));
        let d = planner(r#"{"action":"type","target":1,"value":"hello"}"#).unwrap();
        assert_eq!(d.value.as_deref(), Some("hello"));
    }

    #[test]
    fn test_click_requires_target() {
        assert!(planner(r#"{"action":"click"}"#).is_err());
        let d = planner(r##"{"action":"click","selector":"#go"}"##).unwrap();
        assert_eq!(d.selector.as_deref(), Some("#go"));
        assert!(d.target.is_none());
    }

    #[test]
    fn test_defaults_for_optional_fields() {
        let d = planner(r#"{"action":"press"}"#).unwrap();
        assert_eq!(d.target, Some(Target::Key("Enter".into())));

        let d = planner(r#"{"action":"wait","value":"soon"}"#).unwrap();
        assert_eq!(d.amount, Some(3000));

        let d = planner(r#"{"action":"scroll"}"#).unwrap();
        assert_eq!(d.amount, Some(300));

        let d = planner(r#"{"action":"scroll","direction":"up","value":500}"#).unwrap();
        assert_eq!(d.amount, Some(-500));

        let d = planner(r#"{"action":"scroll","value":-9223372036854775808}"#).unwrap();
        assert_eq!(d.amount, Some(300));

        let d = planner(r#"{"action":"scroll","value":-120}"#).unwrap();
        assert_eq!(d.amount, Some(120));

        let d = planner(r#"{"action":"complete","confidence":7,"fallbackSelectors":"nope","waitAfter":"x"}"#)
            .unwrap();
        assert_eq!(d.confidence, 1.0);
        assert!(d.fallback_selectors.is_empty());
        assert!(d.flags.wait_after);
    }

    #[test]
    fn test_flags_and_fallbacks() {
        let d = planner(
            r#"{"action":"click","target":0,"waitAfter":false,"verifyVisible":false,"fallbackSelectors":["a.x", "", 4, "b"]}"#,
        )
        .unwrap();
        assert!(!d.flags.wait_after);
        assert!(!d.flags.verify_visible);
        assert_eq!(d.fallback_selectors, vec!["a.x".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_summary() {
        assert_eq!(Decision::navigate("example.com").summary(), "navigate https://example.com");
        assert_eq!(
            Decision::new(ActionKind::Type)
                .with_target(Target::Index(2))
                .with_value("hi")
                .summary(),
            "type \"hi\" into [2]"
        );
        assert_eq!(Decision::new(ActionKind::Scroll).with_amount(-200).summary(), "scroll up 200px");
        assert_eq!(Decision::complete().with_description("done").summary(), "done");
    }
}
