//! Deterministic stand-ins for the browser, the oracle and event consumers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::browser::{BBox, BrowserSurface, ElementState};
use crate::events::{EventSink, PilotEvent};
use crate::oracle::{DecisionOracle, OracleRequest};
use crate::{Error, Result};

#[derive(Default)]
struct StubState {
    elements: HashMap<String, bool>,
    scan: Value,
    calls: Vec<String>,
    click_failures: u32,
    pointer_fails: bool,
    url: String,
    mutations: u64,
    mutations_per_poll: u64,
    loading_polls: u32,
}

/// Scripted page. Selectors registered with [`add_element`](Self::add_element)
/// exist; everything else is detached.
pub struct StubSurface {
    state: Mutex<StubState>,
}

impl StubSurface {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                scan: scan_json(vec![]),
                url: "https://example.com/".into(),
                ..Default::default()
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn with<R>(&self, f: impl FnOnce(&mut StubState) -> R) -> R {
        let mut s = self.state.lock().unwrap();
        f(&mut s)
    }

    pub fn set_scan(&self, scan: Value) {
        self.with(|s| s.scan = scan);
    }

    pub fn add_element(&self, selector: &str, visible: bool) {
        self.with(|s| s.elements.insert(selector.to_string(), visible));
    }

    /// The next `n` click attempts fail both pointer and direct clicks.
    pub fn fail_clicks(&self, n: u32) {
        self.with(|s| s.click_failures = n);
    }

    pub fn fail_pointer_clicks(&self) {
        self.with(|s| s.pointer_fails = true);
    }

    pub fn set_mutations_per_poll(&self, n: u64) {
        self.with(|s| s.mutations_per_poll = n);
    }

    pub fn set_loading_polls(&self, n: u32) {
        self.with(|s| s.loading_polls = n);
    }

    /// Interactions performed, in order.
    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn current_url(&self) -> String {
        self.with(|s| s.url.clone())
    }

    fn record(&self, call: String) {
        self.with(|s| s.calls.push(call));
    }

    fn require(&self, selector: &str) -> Result<()> {
        if self.with(|s| s.elements.contains_key(selector)) {
            Ok(())
        } else {
            Err(Error::ElementNotFound(selector.to_string()))
        }
    }
}

#[async_trait]
impl BrowserSurface for StubSurface {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.record(format!("navigate {}", url));
        self.with(|s| s.url = url.to_string());
        Ok(())
    }

    async fn evaluate(&self, js: &str) -> Result<Value> {
        Ok(self.with(|s| {
            if js.contains("INTERACTIVE_QUERY") {
                s.scan.clone()
            } else if js.contains("MutationObserver") {
                json!(s.mutations)
            } else if js.contains("__pilotMutations") {
                s.mutations += s.mutations_per_poll;
                json!(s.mutations)
            } else if js.contains("readyState") {
                if s.loading_polls > 0 {
                    s.loading_polls -= 1;
                    json!("loading")
                } else {
                    json!("complete")
                }
            } else {
                Value::Null
            }
        }))
    }

    async fn execute(&self, _js: &str) -> Result<()> {
        Ok(())
    }

    async fn query(&self, selector: &str) -> Result<ElementState> {
        Ok(self.with(|s| match s.elements.get(selector) {
            Some(&visible) => ElementState {
                attached: true,
                visible,
                enabled: true,
                bbox: visible.then(|| BBox::new(10.0, 10.0, 100.0, 30.0)),
            },
            None => ElementState::detached(),
        }))
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.require(selector)?;
        self.record(format!("scroll_into_view {}", selector));
        Ok(())
    }

    async fn pointer_click(&self, selector: &str, _point: (f64, f64), _timeout: Duration) -> Result<()> {
        if self.with(|s| s.pointer_fails || s.click_failures > 0) {
            return Err(Error::ActionFailed("pointer click intercepted".into()));
        }
        self.record(format!("click {}", selector));
        Ok(())
    }

    async fn click_direct(&self, selector: &str) -> Result<()> {
        let fail = self.with(|s| {
            if s.click_failures > 0 {
                s.click_failures -= 1;
                true
            } else {
                false
            }
        });
        if fail {
            return Err(Error::ActionFailed(format!("click on {} had no effect", selector)));
        }
        self.record(format!("click_direct {}", selector));
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        self.require(selector)?;
        self.record(format!("focus {}", selector));
        Ok(())
    }

    async fn type_text(&self, text: &str, _per_char: Duration) -> Result<()> {
        self.record(format!("type {}", text));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.record(format!("press {}", key));
        Ok(())
    }

    async fn hover_at(&self, point: (f64, f64)) -> Result<()> {
        self.record(format!("hover {},{}", point.0, point.1));
        Ok(())
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<()> {
        self.require(selector)?;
        self.record(format!("set_value {} {:?}", selector, value));
        Ok(())
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        self.record(format!("scroll {},{}", dx, dy));
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.record("screenshot".into());
        Ok(b"\x89PNG".to_vec())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.current_url())
    }
}

/// Scan payload shaped like the in-page script's output.
pub fn scan_json(elements: Vec<Value>) -> Value {
    json!({
        "url": "https://example.com/",
        "title": "Example Domain",
        "domain": "example.com",
        "readyState": "complete",
        "viewport": { "width": 1280, "height": 720 },
        "elements": elements,
        "meta": {
            "headings": ["Example Domain"],
            "forms": 0,
            "images": 0,
            "videos": 0,
            "bodySample": "This domain is for use in illustrative examples."
        }
    })
}

/// One visible scanned element at vertical offset `y`.
pub fn raw_element(tag: &str, text: &str, y: f64) -> Value {
    json!({
        "tag": tag,
        "text": text,
        "classes": ["item"],
        "bbox": { "x": 10, "y": y, "width": 120, "height": 24 },
        "style": { "cursor": "auto", "display": "block" }
    })
}

/// Oracle replaying canned replies and remembering every request.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String>>>,
    repeat: Option<String>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Same reply forever.
    pub fn repeating(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn consult(&self, request: &OracleRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }
        self.repeat
            .clone()
            .ok_or_else(|| Error::Oracle("script exhausted".into()))
    }
}

/// Keeps every published event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PilotEvent>>,
}

impl RecordingSink {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PilotEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&PilotEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &PilotEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
