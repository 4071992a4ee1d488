//! Resolve a decision's target into one live selector.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::browser::{BrowserSurface, ElementState};
use crate::decision::{Decision, Target};
use crate::selector::{is_safe_token, quote_attr};
use crate::{ElementDescriptor, Error, Result};

/// Candidate selectors for `decision`, best first, deduplicated.
///
/// Order: the oracle's selector, a selector target, the element's ranked
/// triple, the oracle's fallbacks. An element id or test-id then moves to the
/// very front, id first.
pub fn candidate_selectors(decision: &Decision, element: Option<&ElementDescriptor>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut add = |s: &str| {
        let s = s.trim();
        if !s.is_empty() && !out.iter().any(|o| o == s) {
            out.push(s.to_string());
        }
    };

    if let Some(ref s) = decision.selector {
        add(s);
    }
    if let Some(Target::Selector(ref s)) = decision.target {
        add(s);
    }
    if let Some(el) = element {
        for s in el.selectors.iter() {
            add(s);
        }
    }
    for s in &decision.fallback_selectors {
        add(s);
    }

    if let Some(el) = element {
        let mut trusted = Vec::new();
        if let Some(id) = el.id.as_deref().filter(|id| is_safe_token(id)) {
            trusted.push(format!("#{}", id));
        }
        if let Some(tid) = el.test_id.as_deref().filter(|t| !t.is_empty()) {
            trusted.push(format!("[data-testid={}]", quote_attr(tid)));
        } else if let Some(tid) = el.test_attr.as_deref().filter(|t| !t.is_empty()) {
            trusted.push(format!("[data-test={}]", quote_attr(tid)));
        }
        for t in trusted.into_iter().rev() {
            out.retain(|s| *s != t);
            out.insert(0, t);
        }
    }
    out
}

/// The selector that matched and its live state.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub selector: String,
    pub state: ElementState,
}

/// Poll the candidates in order until one is usable or `budget` runs out.
///
/// The budget is shared by all candidates. With `verify_visible` set an
/// element must be attached, visible and enabled; otherwise attached is enough.
pub async fn resolve_target(
    surface: &dyn BrowserSurface,
    candidates: &[String],
    budget: Duration,
    poll: Duration,
    verify_visible: bool,
) -> Result<Resolved> {
    if candidates.is_empty() {
        return Err(Error::ElementNotFound("no candidate selectors".into()));
    }
    let deadline = Instant::now() + budget;
    loop {
        for selector in candidates {
            let state = match surface.query(selector).await {
                Ok(s) => s,
                Err(e) => {
                    debug!("resolve: {} query failed: {}", selector, e);
                    continue;
                }
            };
            let usable = if verify_visible {
                state.is_actionable()
            } else {
                state.attached
            };
            if usable {
                debug!("resolve: matched {}", selector);
                return Ok(Resolved {
                    selector: selector.clone(),
                    state,
                });
            }
        }
        if Instant::now() + poll > deadline {
            return Err(Error::ElementNotFound(candidates.join(" | ")));
        }
        tokio::time::sleep(poll).await;
    }
}
