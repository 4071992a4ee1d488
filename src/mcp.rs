use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use eoka_pilot_core::{
    ActionKind, ActionVocabulary, BroadcastSink, CommandTranslator, Decision, EventSink,
    ExecutionResult, LaunchOptions, PilotConfig, SessionStore, TracingSink,
};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct OpenSessionRequest {
    #[schemars(description = "URL to open once the browser is up")]
    pub url: Option<String>,
    #[schemars(description = "Run without a visible window (default from PILOT_HEADLESS, else true)")]
    pub headless: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionRequest {
    #[schemars(description = "Session id returned by open_session")]
    pub session: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteRequest {
    #[schemars(description = "Session id returned by open_session")]
    pub session: String,
    #[schemars(
        description = "Decision object, e.g. {\"action\":\"click\",\"target\":3} or {\"action\":\"type\",\"target\":1,\"value\":\"hello\"}"
    )]
    pub decision: Value,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CommandRequest {
    #[schemars(description = "Session id returned by open_session")]
    pub session: String,
    #[schemars(description = "Plain-language command, e.g. \"click Sign in\" or \"scroll down\"")]
    pub text: String,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn text_ok(s: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(s.into())]))
}

/// First navigation of a fresh session. A session that cannot reach its
/// start page is closed again.
async fn navigate_new_session(sessions: &SessionStore, id: &str, url: &str) -> Result<(), ErrorData> {
    let session = sessions.get(id).await.map_err(err)?;
    let result = session.lock().await.execute(&Decision::navigate(url)).await;
    if result.success {
        return Ok(());
    }
    if let Err(e) = sessions.close(id).await {
        warn!("session {}: close after failed navigation: {}", id, e);
    }
    Err(err(format!(
        "navigation to {} failed, session {} closed: {}",
        url, id, result.error
    )))
}

/// `PILOT_HEADLESS` value; anything but an explicit "off" means headless.
fn headless_from_env(value: Option<&str>) -> bool {
    !matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("0" | "false" | "no" | "off")
    )
}

/// Accept the decision as an object or as a JSON string.
fn parse_decision(raw: &Value) -> Result<Decision, ErrorData> {
    let text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Decision::parse_reply(&text, &ActionVocabulary::command()).map_err(err)
}

/// Tool response for one executed decision. Failures become tool errors.
fn respond(decision: &Decision, result: ExecutionResult) -> Result<CallToolResult, ErrorData> {
    if !result.success {
        return Err(err(format!(
            "{} failed after {} attempt(s): {}",
            decision.summary(),
            result.attempts,
            result.error
        )));
    }

    let mut lines = vec![format!("✓ {}", decision.summary())];
    if let Some(ref sel) = result.selector {
        lines.push(format!("  selector: {}", sel));
    }
    if result.attempts > 1 {
        lines.push(format!("  attempts: {}", result.attempts));
    }
    if result.navigated {
        lines.push("  page changed; take a new snapshot".into());
    }
    lines.push(format!("  replay: {}", result.replay_line));

    let mut content = Vec::new();
    if let Some(ref png) = result.screenshot {
        content.push(Content::image(BASE64.encode(png), "image/png"));
    }
    content.push(Content::text(lines.join("\n")));
    Ok(CallToolResult::success(content))
}

#[derive(Clone)]
pub struct PilotServer {
    sessions: SessionStore,
    events: BroadcastSink,
    headless: bool,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PilotServer {
    pub fn new(events: BroadcastSink) -> Self {
        Self {
            sessions: SessionStore::new(),
            events,
            headless: headless_from_env(std::env::var("PILOT_HEADLESS").ok().as_deref()),
            tool_router: Self::tool_router(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[tool(
        description = "Launch a browser session and optionally open a URL. Returns the session id used by every other tool."
    )]
    async fn open_session(
        &self,
        req: Parameters<OpenSessionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let opts = LaunchOptions {
            headless: req.0.headless.unwrap_or(self.headless),
            ..Default::default()
        };
        let id = self
            .sessions
            .open(&opts, PilotConfig::default())
            .await
            .map_err(err)?;
        self.sessions
            .get(&id)
            .await
            .map_err(err)?
            .lock()
            .await
            .set_events(Arc::new(self.events.clone()));

        if let Some(ref url) = req.0.url {
            navigate_new_session(&self.sessions, &id, url).await?;
        }
        info!("opened session {}", id);
        text_ok(format!("Session {} opened.", id))
    }

    #[tool(
        description = "Scan the page and list interactive elements as '[index] <tag> \"text\" sel=...'. Refresh after any action that changes the page."
    )]
    async fn snapshot(&self, req: Parameters<SessionRequest>) -> Result<CallToolResult, ErrorData> {
        let session = self.sessions.get(&req.0.session).await.map_err(err)?;
        let mut session = session.lock().await;
        let snap = session.snapshot().await.map_err(err)?;
        let mut out = format!(
            "URL: {}\nTitle: {}\n{} elements\n",
            snap.url,
            snap.title,
            snap.len()
        );
        if snap.is_empty() {
            out.push_str("No interactive elements found.");
        } else {
            out.push_str(&snap.element_list());
        }
        text_ok(out)
    }

    #[tool(
        description = "Execute one decision: {\"action\": navigate|click|type|press|wait|scroll|hover|clear|search|screenshot|complete|generate_test, \"target\": element index, URL or key, \"value\": text}. Element indices refer to the latest snapshot."
    )]
    async fn execute(&self, req: Parameters<ExecuteRequest>) -> Result<CallToolResult, ErrorData> {
        let decision = parse_decision(&req.0.decision)?;
        let session = self.sessions.get(&req.0.session).await.map_err(err)?;
        let mut session = session.lock().await;
        debug!("session {}: {}", req.0.session, decision.summary());
        let result = session.execute(&decision).await;
        if decision.action == ActionKind::GenerateTest && result.success {
            return text_ok(session.replay_script());
        }
        respond(&decision, result)
    }

    #[tool(
        description = "Run a plain-language command such as 'click Sign in', 'type hello into search', 'press Enter' or 'scroll down'. Commands that cannot be understood are reported, not executed."
    )]
    async fn command(&self, req: Parameters<CommandRequest>) -> Result<CallToolResult, ErrorData> {
        let session = self.sessions.get(&req.0.session).await.map_err(err)?;
        let mut session = session.lock().await;
        let translator = CommandTranslator::heuristic_only();
        let (translation, result) = session.command(&req.0.text, &translator).await;
        let Some(result) = result else {
            return Err(err(format!("command not understood: {}", req.0.text)));
        };
        if translation.decision.action == ActionKind::GenerateTest && result.success {
            return text_ok(session.replay_script());
        }
        respond(&translation.decision, result)
    }

    #[tool(description = "Return the replay script (Playwright-style test) of everything executed in a session.")]
    async fn replay_script(&self, req: Parameters<SessionRequest>) -> Result<CallToolResult, ErrorData> {
        let session = self.sessions.get(&req.0.session).await.map_err(err)?;
        let session = session.lock().await;
        text_ok(session.replay_script())
    }

    #[tool(description = "Close a session's browser and forget its id.")]
    async fn close_session(&self, req: Parameters<SessionRequest>) -> Result<CallToolResult, ErrorData> {
        self.sessions.close(&req.0.session).await.map_err(err)?;
        text_ok(format!("Session {} closed.", req.0.session))
    }
}

#[tool_handler]
impl ServerHandler for PilotServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "eoka-pilot".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Page understanding for browser agents. Call 'open_session' to get a session id, \
                 'snapshot' to list interactive elements by index, then 'execute' a decision object \
                 or run a plain-language 'command'. Actions resolve ranked selectors, retry with backoff \
                 and wait for the page to settle. 'replay_script' returns a test reproducing the session."
                    .into(),
            ),
        }
    }
}

/// Forward every engine event to the log.
fn spawn_event_logger(events: &BroadcastSink) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match rx.recv().await {
                Ok(event) => TracingSink.publish(&event),
                Err(RecvError::Lagged(n)) => debug!("event log skipped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

pub async fn run_server() -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let events = BroadcastSink::new(256);
    spawn_event_logger(&events);

    let server = PilotServer::new(events);
    let sessions = server.sessions().clone();
    let service = server.serve(rmcp::transport::stdio()).await?;
    let outcome = service.waiting().await;

    sessions.close_all().await;
    outcome?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eoka_pilot_core::{BrowserSurface, ElementState, Error as PilotError, Session};
    use serde_json::json;
    use std::time::Duration;

    /// Page that cannot load anything.
    struct Offline;

    #[async_trait]
    impl BrowserSurface for Offline {
        async fn navigate(&self, url: &str, _timeout: Duration) -> eoka_pilot_core::Result<()> {
            Err(PilotError::Navigation(format!("cannot reach {}", url)))
        }
        async fn evaluate(&self, _js: &str) -> eoka_pilot_core::Result<Value> {
            Ok(Value::Null)
        }
        async fn execute(&self, _js: &str) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn query(&self, _selector: &str) -> eoka_pilot_core::Result<ElementState> {
            Ok(ElementState::default())
        }
        async fn scroll_into_view(&self, _selector: &str) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn pointer_click(
            &self,
            _selector: &str,
            _point: (f64, f64),
            _timeout: Duration,
        ) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn click_direct(&self, _selector: &str) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn focus(&self, _selector: &str) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn type_text(&self, _text: &str, _per_char: Duration) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn press_key(&self, _key: &str) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn hover_at(&self, _point: (f64, f64)) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn set_value(&self, _selector: &str, _value: &str) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn scroll_by(&self, _dx: i64, _dy: i64) -> eoka_pilot_core::Result<()> {
            Ok(())
        }
        async fn screenshot(&self) -> eoka_pilot_core::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn url(&self) -> eoka_pilot_core::Result<String> {
            Ok("about:blank".into())
        }
    }

    fn result(success: bool) -> ExecutionResult {
        ExecutionResult {
            action: ActionKind::Click,
            target: "[2]".into(),
            value: String::new(),
            description: String::new(),
            success,
            error: if success { String::new() } else { "element not found: #go".into() },
            error_kind: (!success).then(|| "element_not_found".to_string()),
            reasoning: String::new(),
            confidence: 1.0,
            replay_line: "await page.click(\"#go\");".into(),
            selector: success.then(|| "#go".to_string()),
            attempts: if success { 2 } else { 3 },
            navigated: success,
            screenshot: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_navigation_closes_session() {
        let store = SessionStore::new();
        let id = store
            .insert(Session::from_surface(
                store.next_id(),
                Arc::new(Offline),
                PilotConfig::default(),
            ))
            .await;

        let e = navigate_new_session(&store, &id, "https://unreachable.test")
            .await
            .unwrap_err();
        assert!(e.message.contains("session s1 closed"));
        assert!(e.message.contains("cannot reach"));
        assert!(store.ids().await.is_empty());
    }

    #[test]
    fn test_headless_from_env() {
        assert!(headless_from_env(None));
        assert!(headless_from_env(Some("1")));
        assert!(headless_from_env(Some("yes")));
        assert!(!headless_from_env(Some("0")));
        assert!(!headless_from_env(Some(" False ")));
        assert!(!headless_from_env(Some("off")));
    }

    #[test]
    fn test_parse_decision_object_or_string() {
        let d = parse_decision(&json!({ "action": "click", "target": 3 })).unwrap();
        assert_eq!(d.action, ActionKind::Click);
        assert_eq!(d.target_index(), Some(3));

        let d = parse_decision(&json!("{\"action\":\"search\",\"value\":\"rust\"}")).unwrap();
        assert_eq!(d.action, ActionKind::Search);

        assert!(parse_decision(&json!({ "action": "teleport" })).is_err());
        assert!(parse_decision(&json!("not json")).is_err());
    }

    #[test]
    fn test_respond_success_lines() {
        let d = Decision::new(ActionKind::Click).with_description("press go");
        let out = respond(&d, result(true)).unwrap();
        let text = format!("{:?}", out.content);
        assert!(text.contains("press go"));
        assert!(text.contains("selector: #go"));
        assert!(text.contains("attempts: 2"));
        assert!(text.contains("new snapshot"));
    }

    #[test]
    fn test_respond_failure_is_error() {
        let d = Decision::new(ActionKind::Click).with_description("press go");
        let e = respond(&d, result(false)).unwrap_err();
        assert!(e.message.contains("after 3 attempt(s)"));
        assert!(e.message.contains("element not found"));
    }

    #[test]
    fn test_respond_attaches_screenshot() {
        let d = Decision::new(ActionKind::Screenshot);
        let mut r = result(true);
        r.action = ActionKind::Screenshot;
        r.screenshot = Some(b"\x89PNG".to_vec());
        let out = respond(&d, r).unwrap();
        assert_eq!(out.content.len(), 2);
    }
}
