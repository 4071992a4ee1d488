//! Selector ranking: turn one element's attributes into up to three CSS
//! selectors ordered by how well they survive DOM churn.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static SAFE_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z][\w-]*$").unwrap());

/// Attributes the in-page scan reports for ranking.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorSource {
    pub tag: String,
    pub id: Option<String>,
    /// `data-testid`
    pub test_id: Option<String>,
    /// `data-test`
    pub test_attr: Option<String>,
    pub aria_label: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub text: String,
    pub classes: Vec<String>,
    pub placeholder: Option<String>,
    pub input_type: Option<String>,
    /// Parent-scoped `:nth-of-type` path, present only when same-tag siblings exist.
    pub nth_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredSelector {
    pub selector: String,
    pub score: u8,
}

/// Top three distinct selectors. An empty slot means nothing is available at that rank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorTriple {
    pub primary: String,
    pub fallback: String,
    pub tertiary: String,
}

impl SelectorTriple {
    /// Non-empty slots, best first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        [&self.primary, &self.fallback, &self.tertiary]
            .into_iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }
}

/// Identifier or class token that can be dropped into a selector unescaped.
pub fn is_safe_token(token: &str) -> bool {
    !token.contains(':') && SAFE_TOKEN.is_match(token)
}

/// Escape a value for use inside a double-quoted CSS attribute selector.
pub(crate) fn quote_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Every applicable candidate with its score, unsorted.
pub fn candidates(src: &SelectorSource) -> Vec<ScoredSelector> {
    let mut out = Vec::new();
    let mut push = |selector: String, score: u8| out.push(ScoredSelector { selector, score });
    let tag = src.tag.to_ascii_lowercase();
    let text = src.text.trim();
    let text_len = text.chars().count();

    if let Some(id) = non_empty(&src.id) {
        if is_safe_token(id) {
            push(format!("#{}", id), 100);
        }
    }
    if let Some(v) = non_empty(&src.test_id) {
        push(format!("[data-testid={}]", quote_attr(v)), 95);
    }
    if let Some(v) = non_empty(&src.test_attr) {
        push(format!("[data-test={}]", quote_attr(v)), 94);
    }
    if let Some(v) = non_empty(&src.aria_label) {
        push(format!("[aria-label={}]", quote_attr(v)), 90);
    }
    if tag == "input" {
        if let Some(v) = non_empty(&src.name) {
            push(format!("input[name={}]", quote_attr(v)), 85);
        }
    }
    if let Some(role) = non_empty(&src.role) {
        if text_len > 0 && text_len < 50 {
            push(
                format!("[role={}]:has-text({})", quote_attr(role), quote_attr(text)),
                80,
            );
        }
    }
    if (tag == "button" || tag == "a") && text_len > 2 && text_len < 50 && !text.contains('\n') {
        push(format!("{}:has-text({})", tag, quote_attr(text)), 75);
    }
    let safe: Vec<&str> = src
        .classes
        .iter()
        .map(String::as_str)
        .filter(|c| is_safe_token(c))
        .take(2)
        .collect();
    if !safe.is_empty() && !tag.is_empty() {
        push(format!("{}.{}", tag, safe.join(".")), 70);
    }
    if let Some(v) = non_empty(&src.placeholder) {
        push(format!("[placeholder={}]", quote_attr(v)), 65);
    }
    if let Some(path) = non_empty(&src.nth_path) {
        push(path.to_string(), 60);
    }
    if let Some(t) = non_empty(&src.input_type) {
        if t == "submit" || t == "button" {
            push(format!("{}[type=\"{}\"]", tag, t), 50);
        }
    }
    out
}

/// Rank candidates and keep the best three distinct selectors.
pub fn rank(src: &SelectorSource) -> SelectorTriple {
    let mut scored = candidates(src);
    // stable: equal scores keep insertion order
    scored.sort_by(|a, b| b.score.cmp(&a.score));

    let mut picked: Vec<String> = Vec::with_capacity(3);
    for c in scored {
        if !picked.contains(&c.selector) {
            picked.push(c.selector);
        }
        if picked.len() == 3 {
            break;
        }
    }
    let mut it = picked.into_iter();
    SelectorTriple {
        primary: it.next().unwrap_or_default(),
        fallback: it.next().unwrap_or_default(),
        tertiary: it.next().unwrap_or_default(),
    }
}
