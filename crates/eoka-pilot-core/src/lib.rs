//! # eoka-pilot-core
//!
//! Page understanding and selector resolution for goal-driven browser automation.
//!
//! A goal run repeats one step until the oracle says the goal is done:
//! snapshot the page → ask the decision oracle what to do → execute the decision
//! against ranked, fault-tolerant selectors → record the outcome.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eoka_pilot_core::{DecisionOracle, LaunchOptions, OracleRequest, PilotConfig, Session};
//!
//! struct Done;
//!
//! #[async_trait::async_trait]
//! impl DecisionOracle for Done {
//!     async fn consult(&self, _req: &OracleRequest) -> eoka_pilot_core::Result<String> {
//!         Ok(r#"{"action":"complete"}"#.into())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_pilot_core::Result<()> {
//! let mut session = Session::launch("s1", &LaunchOptions::default(), PilotConfig::default()).await?;
//! let report = session.run_goal("go to example.com", Arc::new(Done)).await;
//! println!("{}", report.test_code);
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod command;
pub mod config;
pub mod decision;
pub mod events;
pub mod executor;
pub mod goal;
pub mod history;
pub mod oracle;
pub mod replay;
pub mod resolve;
pub mod selector;
pub mod session;
pub mod snapshot;
pub mod stability;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use browser::{BBox, BrowserSurface, ElementState, EokaSurface};
pub use command::parse_command;
pub use config::{PilotConfig, UseMode};
pub use decision::{ActionKind, ActionVocabulary, Decision, DecisionFlags, Target};
pub use events::{BroadcastSink, EventSink, NullSink, PilotEvent, TracingSink};
pub use executor::{ActionExecutor, ExecutionResult};
pub use goal::{ExecutionSummary, GoalLoop, GoalOutcome, GoalReport};
pub use history::HistoryEntry;
pub use oracle::{CommandTranslator, DecisionOracle, OracleAdapter, OracleRequest, Translation};
pub use replay::ReplayScript;
pub use selector::{ScoredSelector, SelectorSource, SelectorTriple};
pub use session::{LaunchOptions, Session, SessionStore};
pub use snapshot::Snapshotter;
pub use stability::{await_stability, StabilityOptions, StabilityReport};

/// Result type for eoka-pilot-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("browser init failed: {0}")]
    BrowserInit(String),

    #[error("oracle error: {0}")]
    Oracle(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("snapshot failed: {0}")]
    Snapshot(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Everything but a failed browser launch leaves the session usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::BrowserInit(_))
    }

    /// Whether the executor should try the action again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ElementNotFound(_)
                | Error::Navigation(_)
                | Error::Timeout(_)
                | Error::ActionFailed(_)
                | Error::Browser(_)
        )
    }

    /// Short machine-readable name, used in replay annotations and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BrowserInit(_) => "browser_init",
            Error::Oracle(_) => "oracle",
            Error::ElementNotFound(_) => "element_not_found",
            Error::Navigation(_) => "navigation",
            Error::Timeout(_) => "timeout",
            Error::UnknownAction(_) => "unknown_action",
            Error::Snapshot(_) => "snapshot",
            Error::ActionFailed(_) => "action_failed",
            Error::UnknownSession(_) => "unknown_session",
            Error::Browser(_) => "browser",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
        }
    }
}

/// Computed style fields used by the interactivity heuristic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StyleSnapshot {
    pub cursor: String,
    pub display: String,
    pub background_color: String,
    pub color: String,
    pub z_index: String,
}

/// One visible, candidate-interactive element at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    /// Position in the owning snapshot. Meaningless in any other snapshot.
    pub index: usize,
    pub tag: String,
    /// Trimmed visible text, at most `PilotConfig::text_limit` chars
    pub text: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub name: Option<String>,
    pub input_type: Option<String>,
    pub placeholder: Option<String>,
    pub href: Option<String>,
    pub src: Option<String>,
    pub alt: Option<String>,
    pub title: Option<String>,
    pub role: Option<String>,
    pub aria_label: Option<String>,
    /// `data-testid`
    pub test_id: Option<String>,
    /// `data-test`
    pub test_attr: Option<String>,
    pub value: Option<String>,
    pub checked: bool,
    pub disabled: bool,
    pub read_only: bool,
    pub required: bool,
    pub bbox: browser::BBox,
    pub center: (f64, f64),
    pub in_viewport: bool,
    pub style: StyleSnapshot,
    pub is_interactable: bool,
    pub selectors: SelectorTriple,
}

impl fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] <{}", self.index, self.tag)?;
        if let Some(ref t) = self.input_type {
            if t != "text" {
                write!(f, " type=\"{}\"", t)?;
            }
        }
        f.write_str(">")?;
        if !self.text.is_empty() {
            write!(f, " \"{}\"", self.text)?;
        }
        if let Some(ref id) = self.id {
            write!(f, " id={}", id)?;
        }
        if let Some(c) = self.classes.first() {
            write!(f, " class={}", c)?;
        }
        if !self.selectors.primary.is_empty() {
            write!(f, " sel=\"{}\"", self.selectors.primary)?;
        }
        if !self.selectors.fallback.is_empty() {
            write!(f, " alt=\"{}\"", self.selectors.fallback)?;
        }
        if self.disabled {
            f.write_str(" [disabled]")?;
        }
        if self.read_only {
            f.write_str(" [readonly]")?;
        }
        if !self.in_viewport {
            f.write_str(" [offscreen]")?;
        }
        Ok(())
    }
}

/// Light page-level context attached to every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageMeta {
    pub headings: Vec<String>,
    pub forms: usize,
    pub images: usize,
    pub videos: usize,
    pub body_sample: String,
}

/// One full scan of a page. Never mutated after construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub domain: String,
    pub ready_state: String,
    pub viewport: (f64, f64),
    pub elements: Vec<ElementDescriptor>,
    pub meta: PageMeta,
    /// Monotonic counter from the snapshotter that produced this scan.
    pub generation: u64,
}

impl PageSnapshot {
    /// Look up an element by index.
    pub fn get(&self, index: usize) -> Option<&ElementDescriptor> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Compact one-line-per-element listing.
    pub fn element_list(&self) -> String {
        let mut out = String::new();
        for el in &self.elements {
            out.push_str(&el.to_string());
            out.push('\n');
        }
        out
    }
}
