//! Rule-based translation of a free-text command into a [`Decision`].
//!
//! Used when no oracle is configured or the oracle's reply is unusable.
//! Never fails: anything unmatched becomes an `unknown` decision carrying the
//! original text.

use std::sync::LazyLock;

use regex::Regex;

use crate::decision::{normalize_url, ActionKind, Decision, Target, DEFAULT_SCROLL_PX, DEFAULT_WAIT_MS};
use crate::selector::quote_attr;

static NAVIGATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:navigate\s+to|go\s+to|visit|open)\s+(\S+)").unwrap());
static SEARCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^search\s+(?:for\s+)?(.+)$").unwrap());
static PRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:press|hit)\s+(?:the\s+)?(\w+)(?:\s+key)?$").unwrap());
static TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^(?:type|enter\s+text|enter|input|fill\s+in)\s+["']?(.+?)["']?(?:\s+(?:in|into)\s+(?:the\s+)?(.+))?$"#)
        .unwrap()
});
static CLICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)^click(?:\s+on)?(?:\s+the)?\s*["']?(.*?)["']?$"#).unwrap());
static SCROLL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^scroll(?:\s+(up|down))?(?:\s+(?:by\s+)?(\d+)(?:\s*px)?)?$").unwrap()
});
static SCREENSHOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:take\s+(?:a\s+)?)?screenshot$").unwrap());
static WAIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^wait(?:\s+(?:for\s+)?(\d+)\s*(ms|milliseconds?|s|sec|seconds?)?)?$").unwrap()
});
static GENERATE_TEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:generate|create|export)\s+(?:a\s+)?(?:playwright\s+)?test").unwrap());
static CSS_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[#.\[]|^[a-z][a-z0-9]*[#.\[]").unwrap());

/// Search inputs tried in order when a search command names no field.
pub const SEARCH_SELECTORS: &[&str] = &[
    "input[type=\"search\"]",
    "input[name=\"q\"]",
    "[role=\"searchbox\"]",
    "input[aria-label*=\"search\" i]",
    "input[placeholder*=\"search\" i]",
];

/// Translate `text` into a decision using layered pattern matches.
pub fn parse_command(text: &str) -> Decision {
    let cmd = text.trim();

    if let Some(c) = NAVIGATE.captures(cmd) {
        return Decision::new(ActionKind::Navigate)
            .with_target(Target::Url(normalize_url(&c[1])))
            .with_description(cmd);
    }
    if let Some(c) = SEARCH.captures(cmd) {
        let query = strip_quotes(&c[1]);
        let mut chain = SEARCH_SELECTORS.iter().map(|s| s.to_string());
        let primary = chain.next().unwrap_or_default();
        return Decision::new(ActionKind::Search)
            .with_value(query)
            .with_selector(primary)
            .with_fallbacks(chain.collect())
            .with_description(cmd);
    }
    if let Some(c) = PRESS.captures(cmd) {
        return Decision::new(ActionKind::Press)
            .with_target(Target::Key(key_name(&c[1])))
            .with_description(cmd);
    }
    if let Some(c) = TYPE.captures(cmd) {
        let value = c[1].to_string();
        let selector = c
            .get(2)
            .map(|m| field_selector(m.as_str()))
            .unwrap_or_else(|| "input".to_string());
        return Decision::new(ActionKind::Type)
            .with_value(value)
            .with_selector(selector)
            .with_description(cmd);
    }
    if let Some(c) = CLICK.captures(cmd) {
        let what = c[1].trim();
        let d = Decision::new(ActionKind::Click).with_description(cmd);
        if what.is_empty() {
            return d.with_selector("button");
        }
        if CSS_LIKE.is_match(what) && !what.contains(' ') {
            return d.with_selector(what);
        }
        let q = quote_attr(what);
        return d
            .with_selector(format!("button:has-text({})", q))
            .with_fallbacks(vec![
                format!("a:has-text({})", q),
                format!("[role=\"button\"]:has-text({})", q),
            ]);
    }
    if let Some(c) = SCROLL.captures(cmd) {
        let px: i64 = c
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .filter(|px| *px > 0)
            .unwrap_or(DEFAULT_SCROLL_PX);
        let up = c.get(1).is_some_and(|m| m.as_str().eq_ignore_ascii_case("up"));
        return Decision::new(ActionKind::Scroll)
            .with_amount(if up { -px } else { px })
            .with_description(cmd);
    }
    if SCREENSHOT.is_match(cmd) {
        return Decision::new(ActionKind::Screenshot).with_description(cmd);
    }
    if let Some(c) = WAIT.captures(cmd) {
        let n: Option<i64> = c.get(1).and_then(|m| m.as_str().parse().ok());
        let seconds = c
            .get(2)
            .is_some_and(|m| m.as_str().to_ascii_lowercase().starts_with('s'));
        let ms = match n {
            Some(n) if n > 0 && seconds => n * 1000,
            Some(n) if n > 0 => n,
            _ => DEFAULT_WAIT_MS,
        };
        return Decision::new(ActionKind::Wait)
            .with_amount(ms)
            .with_description(cmd);
    }
    if GENERATE_TEST.is_match(cmd) {
        return Decision::new(ActionKind::GenerateTest).with_description(cmd);
    }

    Decision::new(ActionKind::Unknown).with_value(cmd)
}

fn strip_quotes(s: &str) -> String {
    s.trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string()
}

fn key_name(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "enter" | "return" => "Enter".into(),
        "tab" => "Tab".into(),
        "escape" | "esc" => "Escape".into(),
        "space" => " ".into(),
        "backspace" => "Backspace".into(),
        "delete" => "Delete".into(),
        "up" => "ArrowUp".into(),
        "down" => "ArrowDown".into(),
        "left" => "ArrowLeft".into(),
        "right" => "ArrowRight".into(),
        _ => raw.to_string(),
    }
}

/// Selector for a field named in prose ("the email field", "#q").
fn field_selector(raw: &str) -> String {
    let name = raw
        .trim()
        .trim_end_matches(|c: char| c == '.' || c == '!')
        .trim_end_matches(" field")
        .trim_end_matches(" box")
        .trim_end_matches(" input")
        .trim();
    if CSS_LIKE.is_match(name) && !name.contains(' ') {
        return name.to_string();
    }
    let q = quote_attr(name);
    format!("input[name={q}], input[placeholder*={q} i], [aria-label*={q} i]")
}
