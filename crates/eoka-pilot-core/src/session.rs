//! Browser sessions and the store that addresses them by id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eoka::{Browser, StealthConfig};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSurface, EokaSurface};
use crate::config::PilotConfig;
use crate::decision::{ActionVocabulary, Decision};
use crate::events::{EventSink, NullSink};
use crate::executor::{ActionExecutor, ExecutionResult};
use crate::goal::{GoalLoop, GoalReport};
use crate::oracle::{CommandTranslator, DecisionOracle, OracleAdapter, Translation};
use crate::snapshot::Snapshotter;
use crate::{Error, PageSnapshot, Result};

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            proxy: None,
            user_agent: None,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

/// One browser page plus everything the engine keeps about it.
pub struct Session {
    id: String,
    browser: Option<Browser>,
    surface: Arc<dyn BrowserSurface>,
    snapshotter: Snapshotter,
    executor: ActionExecutor,
    events: Arc<dyn EventSink>,
    config: PilotConfig,
}

impl Session {
    /// Launch Chrome and open a blank page. Any failure is `BrowserInit`.
    pub async fn launch(id: impl Into<String>, opts: &LaunchOptions, config: PilotConfig) -> Result<Self> {
        let stealth = StealthConfig {
            headless: opts.headless,
            proxy: opts.proxy.clone(),
            user_agent: opts.user_agent.clone(),
            viewport_width: opts.viewport_width,
            viewport_height: opts.viewport_height,
            ..Default::default()
        };
        debug!("launching browser (headless: {}, proxy: {:?})", opts.headless, opts.proxy);
        let browser = Browser::launch_with_config(stealth)
            .await
            .map_err(|e| Error::BrowserInit(e.to_string()))?;
        let page = match browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => {
                let _ = browser.close().await;
                return Err(Error::BrowserInit(e.to_string()));
            }
        };
        let mut session = Self::from_surface(id, Arc::new(EokaSurface::new(page)), config);
        session.browser = Some(browser);
        info!("session {} launched", session.id);
        Ok(session)
    }

    /// Session over an existing surface. Nothing to tear down on close.
    pub fn from_surface(id: impl Into<String>, surface: Arc<dyn BrowserSurface>, config: PilotConfig) -> Self {
        Self {
            id: id.into(),
            browser: None,
            snapshotter: Snapshotter::new(config.element_cap, config.text_limit, config.stability()),
            executor: ActionExecutor::new(surface.clone(), config.clone()),
            surface,
            events: Arc::new(NullSink),
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &PilotConfig {
        &self.config
    }

    pub fn surface(&self) -> &Arc<dyn BrowserSurface> {
        &self.surface
    }

    pub fn set_events(&mut self, events: Arc<dyn EventSink>) {
        self.executor.set_events(events.clone());
        self.events = events;
    }

    /// Scan the page now.
    pub async fn snapshot(&mut self) -> Result<Arc<PageSnapshot>> {
        self.snapshotter.capture(self.surface.as_ref()).await
    }

    /// Listing of the latest snapshot, if it is still current.
    pub fn element_list(&mut self) -> Option<String> {
        self.snapshotter.element_list().map(String::from)
    }

    /// Execute one decision against the latest snapshot.
    pub async fn execute(&mut self, decision: &Decision) -> ExecutionResult {
        let latest = self.snapshotter.latest();
        let result = self.executor.execute(decision, latest.as_deref()).await;
        if result.navigated {
            self.snapshotter.invalidate();
        }
        result
    }

    /// Translate a free-text command and execute it unless it came back `unknown`.
    pub async fn command(&mut self, text: &str, translator: &CommandTranslator) -> (Translation, Option<ExecutionResult>) {
        let latest = self.snapshotter.latest();
        let translation = translator.translate(text, latest.as_deref()).await;
        if !translation.is_executable() {
            return (translation, None);
        }
        let result = self.execute(&translation.decision).await;
        (translation, Some(result))
    }

    /// Drive the page toward `goal` with `oracle` choosing each step.
    pub async fn run_goal(&mut self, goal: &str, oracle: Arc<dyn DecisionOracle>) -> GoalReport {
        let adapter = OracleAdapter::new(
            oracle,
            ActionVocabulary::for_mode(self.config.mode),
            self.config.history_window,
        );
        GoalLoop::new(
            self.surface.clone(),
            adapter,
            &mut self.snapshotter,
            &mut self.executor,
            self.config.clone(),
        )
        .with_events(self.events.clone())
        .run(goal)
        .await
    }

    /// Rendered replay script of everything executed so far.
    pub fn replay_script(&self) -> String {
        self.executor.replay().render(&self.config.test_name)
    }

    /// Drop recorded replay lines so the next script starts from here.
    pub fn reset_replay(&mut self) {
        self.executor.replay_mut().clear();
    }

    pub fn save_replay(&self, dir: &Path) -> Result<PathBuf> {
        self.executor.replay().persist(dir, &self.config.test_name)
    }

    /// Best-effort teardown. Safe to call twice.
    pub async fn close(&mut self) {
        self.snapshotter.invalidate();
        if let Some(browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("session {}: browser close failed: {}", self.id, e);
            }
        }
    }
}

/// Sessions keyed by id (`s1`, `s2`, ...). Each session sits behind its own
/// lock so only one flow drives a page at a time.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Arc<Mutex<Session>>>>>,
    next: Arc<AtomicU64>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        format!("s{}", self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Launch a browser and register it under a fresh id.
    pub async fn open(&self, opts: &LaunchOptions, config: PilotConfig) -> Result<String> {
        let id = self.next_id();
        let session = Session::launch(id.clone(), opts, config).await?;
        self.insert(session).await;
        Ok(id)
    }

    pub async fn insert(&self, session: Session) -> String {
        let id = session.id().to_string();
        self.sessions
            .lock()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        id
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    /// Remove and tear down. Waits for any in-flight action on that session.
    pub async fn close(&self, id: &str) -> Result<()> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))?;
        session.lock().await.close().await;
        info!("session {} closed", id);
        Ok(())
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        for (id, session) in drained {
            session.lock().await.close().await;
            debug!("session {} closed", id);
        }
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
