//! Decision oracle seam: turn (goal, snapshot, history) into a request for an
//! external decision function and validate its reply.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::command::parse_command;
use crate::config::UseMode;
use crate::decision::{ActionKind, ActionVocabulary, Decision};
use crate::history::{self, HistoryEntry};
use crate::{Error, PageSnapshot, Result};

/// Everything an oracle gets to see for one decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub goal: String,
    pub mode: UseMode,
    /// Rendered snapshot, one line per element.
    pub page: String,
    /// Rendered recent history, one line per step.
    pub history: String,
    pub allowed_actions: Vec<String>,
    /// `page`, `history` and the reply contract assembled into one text.
    pub prompt: String,
}

/// External decision function. Returns the raw reply text, which the adapter
/// validates.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn consult(&self, request: &OracleRequest) -> Result<String>;
}

const REPLY_CONTRACT: &str = r#"Reply with exactly one JSON object:
{"action": "<one of the allowed actions>", "target": <element index | URL | key name>, "value": "<text to type, if any>", "selector": "<optional CSS selector>", "fallbackSelectors": ["<optional>"], "waitAfter": true, "reasoning": "<why>", "description": "<what this step does>", "confidence": <0..1>}
Use "complete" when the goal is achieved."#;

/// Builds oracle requests and parses replies for one vocabulary.
#[derive(Clone)]
pub struct OracleAdapter {
    oracle: Arc<dyn DecisionOracle>,
    vocabulary: ActionVocabulary,
    history_window: usize,
}

impl OracleAdapter {
    pub fn new(oracle: Arc<dyn DecisionOracle>, vocabulary: ActionVocabulary, history_window: usize) -> Self {
        Self {
            oracle,
            vocabulary,
            history_window,
        }
    }

    pub fn vocabulary(&self) -> &ActionVocabulary {
        &self.vocabulary
    }

    pub fn render_snapshot(snapshot: &PageSnapshot) -> String {
        let mut out = format!("URL: {}\nTitle: {}\n", snapshot.url, snapshot.title);
        if !snapshot.meta.headings.is_empty() {
            out.push_str(&format!("Headings: {}\n", snapshot.meta.headings.join(" | ")));
        }
        out.push_str(&format!("Elements ({}):\n", snapshot.len()));
        out.push_str(&snapshot.element_list());
        out
    }

    pub fn render_history(&self, history: &[HistoryEntry]) -> String {
        let recent = history::recent(history, self.history_window);
        if recent.is_empty() {
            return "(none)\n".to_string();
        }
        let mut out = String::new();
        for entry in recent {
            out.push_str(&entry.prompt_line());
            out.push('\n');
        }
        out
    }

    pub fn build_request(&self, goal: &str, snapshot: &PageSnapshot, history: &[HistoryEntry]) -> OracleRequest {
        let page = Self::render_snapshot(snapshot);
        let history = self.render_history(history);
        let allowed: Vec<String> = self.vocabulary.names().into_iter().map(String::from).collect();
        let prompt = format!(
            "GOAL: {}\n\nPAGE:\n{}\nHISTORY:\n{}\nALLOWED ACTIONS: {}\n\n{}",
            goal,
            page,
            history,
            allowed.join(", "),
            REPLY_CONTRACT
        );
        OracleRequest {
            goal: goal.to_string(),
            mode: self.vocabulary.mode(),
            page,
            history,
            allowed_actions: allowed,
            prompt,
        }
    }

    /// Ask the oracle for the next decision.
    ///
    /// Transport failures and malformed replies are `Oracle` errors; a kind
    /// outside the vocabulary is `UnknownAction`.
    pub async fn decide(&self, goal: &str, snapshot: &PageSnapshot, history: &[HistoryEntry]) -> Result<Decision> {
        let request = self.build_request(goal, snapshot, history);
        let reply = self.oracle.consult(&request).await.map_err(|e| match e {
            Error::Oracle(_) => e,
            other => Error::Oracle(other.to_string()),
        })?;
        debug!("oracle reply: {}", reply);
        Decision::parse_reply(&reply, &self.vocabulary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationSource {
    Oracle,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub decision: Decision,
    pub source: TranslationSource,
}

impl Translation {
    /// `unknown` results go back to the user, never to the executor.
    pub fn is_executable(&self) -> bool {
        self.decision.action != ActionKind::Unknown
    }
}

/// Single-command flow: oracle first, rule-based parsing when the oracle is
/// missing or its reply is unusable.
#[derive(Clone, Default)]
pub struct CommandTranslator {
    adapter: Option<OracleAdapter>,
}

impl CommandTranslator {
    pub fn heuristic_only() -> Self {
        Self { adapter: None }
    }

    pub fn with_oracle(oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            adapter: Some(OracleAdapter::new(oracle, ActionVocabulary::command(), 0)),
        }
    }

    pub async fn translate(&self, command: &str, snapshot: Option<&PageSnapshot>) -> Translation {
        if let Some(ref adapter) = self.adapter {
            let empty = PageSnapshot::default();
            match adapter.decide(command, snapshot.unwrap_or(&empty), &[]).await {
                Ok(decision) => {
                    return Translation {
                        decision,
                        source: TranslationSource::Oracle,
                    }
                }
                Err(e) => warn!("oracle translation failed, using rules: {}", e),
            }
        }
        Translation {
            decision: parse_command(command),
            source: TranslationSource::Heuristic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Target;
    use crate::testing::ScriptedOracle;
    use crate::ElementDescriptor;

    fn snapshot() -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com/".into(),
            title: "Example".into(),
            elements: vec![ElementDescriptor {
                index: 0,
                tag: "a".into(),
                text: "More information".into(),
                in_viewport: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_request_is_deterministic() {
        let adapter = OracleAdapter::new(ScriptedOracle::new(vec![]), ActionVocabulary::planner(), 10);
        let a = adapter.build_request("find info", &snapshot(), &[]);
        let b = adapter.build_request("find info", &snapshot(), &[]);
        assert_eq!(a, b);
        assert!(a.prompt.contains("GOAL: find info"));
        assert!(a.page.contains("[0] <a> \"More information\""));
        assert_eq!(a.history, "(none)\n");
        assert!(!a.allowed_actions.contains(&"search".to_string()));
    }

    #[tokio::test]
    async fn test_decide_parses_reply() {
        let oracle = ScriptedOracle::new(vec![Ok(r#"{"action":"click","target":0}"#.into())]);
        let adapter = OracleAdapter::new(oracle, ActionVocabulary::planner(), 10);
        let d = adapter.decide("g", &snapshot(), &[]).await.unwrap();
        assert_eq!(d.target, Some(Target::Index(0)));
    }

    #[tokio::test]
    async fn test_decide_maps_transport_error() {
        let oracle = ScriptedOracle::new(vec![Err(Error::Timeout("model".into()))]);
        let adapter = OracleAdapter::new(oracle, ActionVocabulary::planner(), 10);
        let err = adapter.decide("g", &snapshot(), &[]).await.unwrap_err();
        assert!(matches!(err, Error::Oracle(_)));
    }

    #[tokio::test]
    async fn test_decide_malformed_reply() {
        let oracle = ScriptedOracle::new(vec![Ok("sorry, I can't".into())]);
        let adapter = OracleAdapter::new(oracle, ActionVocabulary::planner(), 10);
        assert!(matches!(
            adapter.decide("g", &snapshot(), &[]).await,
            Err(Error::Oracle(_))
        ));
    }

    #[tokio::test]
    async fn test_translator_falls_back_to_rules() {
        let oracle = ScriptedOracle::new(vec![Ok("not json".into())]);
        let t = CommandTranslator::with_oracle(oracle).translate("go to example.com", None).await;
        assert_eq!(t.source, TranslationSource::Heuristic);
        assert_eq!(t.decision.target, Some(Target::Url("https://example.com".into())));
        assert!(t.is_executable());
    }

    #[tokio::test]
    async fn test_translator_prefers_oracle() {
        let oracle = ScriptedOracle::new(vec![Ok(r#"{"action":"screenshot"}"#.into())]);
        let t = CommandTranslator::with_oracle(oracle).translate("snap it", None).await;
        assert_eq!(t.source, TranslationSource::Oracle);
        assert_eq!(t.decision.action, ActionKind::Screenshot);
    }

    #[tokio::test]
    async fn test_translator_unknown_not_executable() {
        let t = CommandTranslator::heuristic_only().translate("dance", None).await;
        assert!(!t.is_executable());
        assert_eq!(t.decision.value.as_deref(), Some("dance"));
    }
}
