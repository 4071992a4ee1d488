//! Action executor: resolve a decision's target through the selector fallback
//! chain, perform the interaction, retry the whole action on failure.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::browser::BrowserSurface;
use crate::command::SEARCH_SELECTORS;
use crate::config::PilotConfig;
use crate::decision::{ActionKind, Decision, Target, DEFAULT_KEY, DEFAULT_SCROLL_PX, DEFAULT_WAIT_MS};
use crate::events::{EventSink, NullSink, PilotEvent};
use crate::replay::{self, ReplayScript};
use crate::resolve::{candidate_selectors, resolve_target};
use crate::stability::await_stability;
use crate::{Error, PageSnapshot, Result};

/// Pause between scrolling an element into view and measuring it.
const SCROLL_SETTLE: Duration = Duration::from_millis(150);

const SELECT_ALL_JS: &str = r#"
(() => {
    const el = document.activeElement;
    if (!el) return;
    if (typeof el.select === 'function') el.select();
    else document.execCommand('selectAll');
})()
"#;

/// Outcome of one decision. Failures live in `success`/`error`; `execute`
/// never returns `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub action: ActionKind,
    pub target: String,
    pub value: String,
    pub description: String,
    pub success: bool,
    /// Empty on success.
    pub error: String,
    pub error_kind: Option<String>,
    pub reasoning: String,
    pub confidence: f64,
    pub replay_line: String,
    /// Selector that matched.
    pub selector: Option<String>,
    pub attempts: u32,
    /// The page URL changed.
    pub navigated: bool,
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Performed {
    selector: Option<String>,
    screenshot: Option<Vec<u8>>,
}

pub struct ActionExecutor {
    surface: Arc<dyn BrowserSurface>,
    config: PilotConfig,
    events: Arc<dyn EventSink>,
    replay: ReplayScript,
}

impl ActionExecutor {
    pub fn new(surface: Arc<dyn BrowserSurface>, config: PilotConfig) -> Self {
        Self {
            surface,
            config,
            events: Arc::new(NullSink),
            replay: ReplayScript::new(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn set_events(&mut self, events: Arc<dyn EventSink>) {
        self.events = events;
    }

    pub fn replay(&self) -> &ReplayScript {
        &self.replay
    }

    pub fn replay_mut(&mut self) -> &mut ReplayScript {
        &mut self.replay
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }

    /// Run `decision`, resolving element indexes against `snapshot`.
    pub async fn execute(&mut self, decision: &Decision, snapshot: Option<&PageSnapshot>) -> ExecutionResult {
        let kind = decision.action;
        let description = decision.summary();
        self.events.publish(&PilotEvent::ActionStart {
            action: kind.to_string(),
            description: description.clone(),
        });
        info!("executing: {}", description);

        let (outcome, attempts, candidates) = self.run_with_retry(decision, snapshot).await;

        let mut navigated = kind == ActionKind::Navigate && outcome.is_ok();
        if outcome.is_ok() {
            if kind.needs_settle() && decision.flags.wait_after {
                tokio::time::sleep(self.config.settle()).await;
                await_stability(self.surface.as_ref(), &self.config.stability()).await;
            }
            if !navigated && kind.needs_settle() {
                if let (Some(snap), Ok(now)) = (snapshot, self.surface.url().await) {
                    navigated = !snap.url.is_empty() && now != snap.url;
                }
            }
        }

        let chosen = match outcome {
            Ok(ref p) => p.selector.clone(),
            Err(_) => None,
        };
        let shown = chosen.clone().or_else(|| candidates.first().cloned());
        let line = replay::line_for(decision, shown.as_deref());

        let result = match outcome {
            Ok(performed) => {
                self.replay.push(line.clone());
                ExecutionResult {
                    success: true,
                    error: String::new(),
                    error_kind: None,
                    replay_line: line,
                    selector: chosen,
                    screenshot: performed.screenshot,
                    ..self.base_result(decision, description, attempts, navigated)
                }
            }
            Err(e) => {
                let line = replay::failed_line(&line, &e);
                self.replay.push(line.clone());
                warn!("{} failed after {} attempt(s): {}", kind, attempts, e);
                self.events.publish(&PilotEvent::Error {
                    message: format!("{}: {}", description, e),
                });
                ExecutionResult {
                    success: false,
                    error: e.to_string(),
                    error_kind: Some(e.kind().to_string()),
                    replay_line: line,
                    selector: None,
                    screenshot: None,
                    ..self.base_result(decision, description, attempts, false)
                }
            }
        };

        self.events.publish(&PilotEvent::ActionComplete {
            action: kind.to_string(),
            success: result.success,
            attempts: result.attempts,
            error: (!result.success).then(|| result.error.clone()),
        });
        result
    }

    fn base_result(&self, decision: &Decision, description: String, attempts: u32, navigated: bool) -> ExecutionResult {
        ExecutionResult {
            action: decision.action,
            target: decision
                .target
                .as_ref()
                .map(|t| t.to_string())
                .or_else(|| decision.selector.clone())
                .unwrap_or_default(),
            value: decision.value.clone().unwrap_or_default(),
            description,
            success: false,
            error: String::new(),
            error_kind: None,
            reasoning: decision.reasoning.clone(),
            confidence: decision.confidence,
            replay_line: String::new(),
            selector: None,
            attempts,
            navigated,
            screenshot: None,
        }
    }

    async fn run_with_retry(
        &self,
        decision: &Decision,
        snapshot: Option<&PageSnapshot>,
    ) -> (Result<Performed>, u32, Vec<String>) {
        let kind = decision.action;

        if kind == ActionKind::Unknown {
            let text = decision.value.clone().unwrap_or_default();
            return (Err(Error::UnknownAction(text)), 0, Vec::new());
        }

        let mut candidates = Vec::new();
        if kind.targets_element() {
            let element = decision.target_index().and_then(|i| snapshot.and_then(|s| s.get(i)));
            candidates = candidate_selectors(decision, element);
            if candidates.is_empty() && kind == ActionKind::Search {
                candidates = SEARCH_SELECTORS.iter().map(|s| s.to_string()).collect();
            }
            if candidates.is_empty() {
                let msg = match decision.target_index() {
                    Some(i) => format!(
                        "index {} not in snapshot ({} elements)",
                        i,
                        snapshot.map_or(0, |s| s.len())
                    ),
                    None => "no target given".to_string(),
                };
                return (Err(Error::ElementNotFound(msg)), 1, candidates);
            }
        }

        if decision.flags.wait_before {
            tokio::time::sleep(self.config.settle()).await;
        }

        let max = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.perform(decision, &candidates).await {
                Ok(p) => return (Ok(p), attempt, candidates),
                Err(e) if attempt < max && e.is_retryable() => {
                    let delay = self.config.retry_backoff() * attempt;
                    debug!("{} attempt {} failed: {}", kind, attempt, e);
                    self.events.publish(&PilotEvent::Retry {
                        action: kind.to_string(),
                        attempt,
                        max_attempts: max,
                        delay_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt, candidates),
            }
        }
    }

    async fn resolve(&self, decision: &Decision, candidates: &[String]) -> Result<String> {
        let resolved = resolve_target(
            self.surface.as_ref(),
            candidates,
            self.config.resolve_budget(),
            self.config.resolve_poll(),
            decision.flags.verify_visible,
        )
        .await?;
        Ok(resolved.selector)
    }

    async fn reveal(&self, decision: &Decision, selector: &str) -> Result<()> {
        if decision.flags.scroll_into_view {
            self.surface.scroll_into_view(selector).await?;
            tokio::time::sleep(SCROLL_SETTLE).await;
        }
        Ok(())
    }

    async fn center_of(&self, selector: &str) -> Result<(f64, f64)> {
        let state = self.surface.query(selector).await?;
        match state.bbox {
            Some(b) if !b.is_empty() => Ok(b.center()),
            _ => Err(Error::ActionFailed(format!("{} has no bounding box", selector))),
        }
    }

    async fn replace_text(&self, selector: &str, text: &str) -> Result<()> {
        self.surface.focus(selector).await?;
        self.surface.execute(SELECT_ALL_JS).await?;
        self.surface.press_key("Backspace").await?;
        self.surface.type_text(text, self.config.typing_delay()).await
    }

    async fn perform(&self, decision: &Decision, candidates: &[String]) -> Result<Performed> {
        let s = &self.surface;
        let value = decision.value.as_deref().unwrap_or("");
        match decision.action {
            ActionKind::Navigate => {
                let url = match decision.target {
                    Some(Target::Url(ref u)) => u.clone(),
                    _ => return Err(Error::Navigation("no URL to navigate to".into())),
                };
                s.navigate(&url, self.config.navigation_timeout()).await?;
                Ok(Performed::default())
            }
            ActionKind::Click => {
                let sel = self.resolve(decision, candidates).await?;
                self.reveal(decision, &sel).await?;
                let center = self.center_of(&sel).await?;
                if let Err(e) = s.pointer_click(&sel, center, self.config.click_timeout()).await {
                    debug!("pointer click on {} failed ({}), clicking directly", sel, e);
                    s.click_direct(&sel).await?;
                }
                Ok(Performed {
                    selector: Some(sel),
                    ..Default::default()
                })
            }
            ActionKind::Type => {
                let sel = self.resolve(decision, candidates).await?;
                self.reveal(decision, &sel).await?;
                self.replace_text(&sel, value).await?;
                Ok(Performed {
                    selector: Some(sel),
                    ..Default::default()
                })
            }
            ActionKind::Search => {
                let sel = self.resolve(decision, candidates).await?;
                self.reveal(decision, &sel).await?;
                self.replace_text(&sel, value).await?;
                s.press_key(DEFAULT_KEY).await?;
                Ok(Performed {
                    selector: Some(sel),
                    ..Default::default()
                })
            }
            ActionKind::Clear => {
                let sel = self.resolve(decision, candidates).await?;
                s.set_value(&sel, "").await?;
                Ok(Performed {
                    selector: Some(sel),
                    ..Default::default()
                })
            }
            ActionKind::Hover => {
                let sel = self.resolve(decision, candidates).await?;
                self.reveal(decision, &sel).await?;
                let center = self.center_of(&sel).await?;
                s.hover_at(center).await?;
                Ok(Performed {
                    selector: Some(sel),
                    ..Default::default()
                })
            }
            ActionKind::Press => {
                let key = match decision.target {
                    Some(Target::Key(ref k)) => k.as_str(),
                    _ => DEFAULT_KEY,
                };
                s.press_key(key).await?;
                Ok(Performed::default())
            }
            ActionKind::Wait => {
                let ms = decision.amount.filter(|ms| *ms > 0).unwrap_or(DEFAULT_WAIT_MS);
                // capped so a runaway value cannot stall the session
                let pause = Duration::from_millis(ms as u64).min(self.config.navigation_timeout());
                tokio::time::sleep(pause).await;
                Ok(Performed::default())
            }
            ActionKind::Scroll => {
                s.scroll_by(0, decision.amount.unwrap_or(DEFAULT_SCROLL_PX)).await?;
                Ok(Performed::default())
            }
            ActionKind::Screenshot => {
                let png = s.screenshot().await?;
                debug!("screenshot: {} bytes", png.len());
                Ok(Performed {
                    screenshot: Some(png),
                    ..Default::default()
                })
            }
            ActionKind::Complete | ActionKind::GenerateTest => Ok(Performed::default()),
            ActionKind::Unknown => Err(Error::UnknownAction(value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::SelectorTriple;
    use crate::testing::{RecordingSink, StubSurface};
    use crate::ElementDescriptor;

    fn snapshot_with(n: usize) -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com/".into(),
            elements: (0..n)
                .map(|i| ElementDescriptor {
                    index: i,
                    tag: "button".into(),
                    selectors: SelectorTriple {
                        primary: format!("#b{}", i),
                        ..Default::default()
                    },
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn executor(surface: &Arc<StubSurface>, sink: &Arc<RecordingSink>) -> ActionExecutor {
        ActionExecutor::new(surface.clone(), PilotConfig::default()).with_events(sink.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_twice_then_succeed() {
        let surface = StubSurface::shared();
        surface.add_element("#b0", true);
        surface.fail_clicks(2);
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let d = Decision::new(ActionKind::Click).with_target(Target::Index(0));
        let r = ex.execute(&d, Some(&snapshot_with(1))).await;

        assert!(r.success, "{}", r.error);
        assert_eq!(r.attempts, 3);
        assert_eq!(sink.count(|e| matches!(e, PilotEvent::Retry { .. })), 2);
        assert_eq!(r.selector.as_deref(), Some("#b0"));
        assert_eq!(ex.replay().lines(), &["await page.click(\"#b0\");".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_reports_last_error() {
        let surface = StubSurface::shared();
        surface.add_element("#b0", true);
        surface.fail_clicks(10);
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let d = Decision::new(ActionKind::Click).with_target(Target::Index(0));
        let r = ex.execute(&d, Some(&snapshot_with(1))).await;

        assert!(!r.success);
        assert_eq!(r.attempts, 3);
        assert_eq!(sink.count(|e| matches!(e, PilotEvent::Retry { .. })), 2);
        assert!(ex.replay().lines()[0].starts_with("// FAILED ("));
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_out_of_range_fails_fast() {
        let surface = StubSurface::shared();
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let d = Decision::new(ActionKind::Click).with_target(Target::Index(7));
        let r = ex.execute(&d, Some(&snapshot_with(5))).await;

        assert!(!r.success);
        assert_eq!(r.error_kind.as_deref(), Some("element_not_found"));
        assert!(r.error.contains("index 7"));
        assert_eq!(sink.count(|e| matches!(e, PilotEvent::Retry { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_falls_back_to_direct() {
        let surface = StubSurface::shared();
        surface.add_element("#b0", true);
        surface.fail_pointer_clicks();
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let d = Decision::new(ActionKind::Click).with_target(Target::Index(0));
        let r = ex.execute(&d, Some(&snapshot_with(1))).await;
        assert!(r.success);
        assert_eq!(r.attempts, 1);
        assert!(surface.calls().iter().any(|c| c == "click_direct #b0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_type_clears_then_types() {
        let surface = StubSurface::shared();
        surface.add_element("#b1", true);
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let d = Decision::new(ActionKind::Type)
            .with_target(Target::Index(1))
            .with_value("hello");
        let r = ex.execute(&d, Some(&snapshot_with(2))).await;
        assert!(r.success);
        let calls = surface.calls();
        let focus = calls.iter().position(|c| c == "focus #b1").unwrap();
        let back = calls.iter().position(|c| c == "press Backspace").unwrap();
        let typed = calls.iter().position(|c| c == "type hello").unwrap();
        assert!(focus < back && back < typed);
        assert_eq!(r.replay_line, "await page.fill(\"#b1\", \"hello\");");
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_and_scroll() {
        let surface = StubSurface::shared();
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let r = ex.execute(&Decision::navigate("example.com"), None).await;
        assert!(r.success);
        assert!(r.navigated);
        assert_eq!(surface.current_url(), "https://example.com");

        let r = ex.execute(&Decision::new(ActionKind::Scroll).with_amount(-300), None).await;
        assert!(r.success);
        assert!(surface.calls().iter().any(|c| c == "scroll 0,-300"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_capped() {
        let surface = StubSurface::shared();
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let started = tokio::time::Instant::now();
        let r = ex
            .execute(&Decision::new(ActionKind::Wait).with_amount(1_000_000_000_000_000_000), None)
            .await;
        assert!(r.success);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_is_not_executed() {
        let surface = StubSurface::shared();
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);

        let d = Decision::new(ActionKind::Unknown).with_value("dance");
        let r = ex.execute(&d, None).await;
        assert!(!r.success);
        assert_eq!(r.error_kind.as_deref(), Some("unknown_action"));
        assert!(surface.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshot_bytes_returned() {
        let surface = StubSurface::shared();
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);
        let r = ex.execute(&Decision::new(ActionKind::Screenshot), None).await;
        assert!(r.success);
        assert_eq!(r.screenshot.as_deref(), Some(&b"\x89PNG"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_touches_nothing() {
        let surface = StubSurface::shared();
        let sink = RecordingSink::shared();
        let mut ex = executor(&surface, &sink);
        let r = ex.execute(&Decision::complete(), None).await;
        assert!(r.success);
        assert!(surface.calls().is_empty());
        assert_eq!(r.replay_line, "// goal complete");
    }
}
