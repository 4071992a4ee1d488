//! Execution history for one goal run.

use serde::{Deserialize, Serialize};

use crate::decision::ActionKind;
use crate::executor::ExecutionResult;

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub step: usize,
    pub action: ActionKind,
    pub target: String,
    pub value: String,
    pub description: String,
    pub success: bool,
    /// Empty on success.
    pub error: String,
    pub reasoning: String,
    pub confidence: f64,
    pub replay_line: String,
    /// Selector that finally matched, if any.
    pub selector_used: Option<String>,
    pub attempts: u32,
}

impl HistoryEntry {
    pub fn from_result(step: usize, result: &ExecutionResult) -> Self {
        Self {
            step,
            action: result.action,
            target: result.target.clone(),
            value: result.value.clone(),
            description: result.description.clone(),
            success: result.success,
            error: result.error.clone(),
            reasoning: result.reasoning.clone(),
            confidence: result.confidence,
            replay_line: result.replay_line.clone(),
            selector_used: result.selector.clone(),
            attempts: result.attempts,
        }
    }

    /// One-line form shown to the oracle.
    pub fn prompt_line(&self) -> String {
        let status = if self.success {
            "ok".to_string()
        } else {
            format!("FAILED: {}", self.error)
        };
        format!("{}. {} -> {}", self.step, self.description, status)
    }
}

/// The last `n` entries, oldest first.
pub fn recent(history: &[HistoryEntry], n: usize) -> &[HistoryEntry] {
    &history[history.len().saturating_sub(n)..]
}
