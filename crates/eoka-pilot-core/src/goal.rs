//! Goal loop: snapshot → decide → execute → record, until the oracle says
//! `complete`, the step ceiling is hit, or a step-level error ends the run.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::browser::BrowserSurface;
use crate::config::PilotConfig;
use crate::decision::{ActionKind, Decision};
use crate::events::{EventSink, NullSink, PilotEvent};
use crate::executor::{ActionExecutor, ExecutionResult};
use crate::history::HistoryEntry;
use crate::oracle::OracleAdapter;
use crate::replay;
use crate::snapshot::Snapshotter;
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum GoalOutcome {
    GoalCompleted,
    MaxStepsReached,
    ErroredOut(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub total_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub goal_completed: bool,
}

impl ExecutionSummary {
    pub fn from_history(history: &[HistoryEntry], goal_completed: bool) -> Self {
        let ok = history.iter().filter(|h| h.success).count();
        Self {
            total_steps: history.len(),
            successful_steps: ok,
            failed_steps: history.len() - ok,
            goal_completed,
        }
    }
}

/// Final report of one run. Always produced, even when the run errored out.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalReport {
    pub success: bool,
    pub goal: String,
    pub steps: Vec<HistoryEntry>,
    pub test_code: String,
    pub execution_summary: ExecutionSummary,
    pub outcome: GoalOutcome,
}

/// Drives one page toward one goal. Borrows the session's snapshotter and
/// executor for the duration of the run.
pub struct GoalLoop<'a> {
    surface: Arc<dyn BrowserSurface>,
    adapter: OracleAdapter,
    snapshotter: &'a mut Snapshotter,
    executor: &'a mut ActionExecutor,
    events: Arc<dyn EventSink>,
    config: PilotConfig,
}

impl<'a> GoalLoop<'a> {
    pub fn new(
        surface: Arc<dyn BrowserSurface>,
        adapter: OracleAdapter,
        snapshotter: &'a mut Snapshotter,
        executor: &'a mut ActionExecutor,
        config: PilotConfig,
    ) -> Self {
        Self {
            surface,
            adapter,
            snapshotter,
            executor,
            events: Arc::new(NullSink),
            config,
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Run until completion, the step ceiling, or an unrecoverable step error.
    /// Replay lines are appended to whatever the executor already recorded.
    pub async fn run(mut self, goal: &str) -> GoalReport {
        let mut history: Vec<HistoryEntry> = Vec::new();
        let mut outcome = GoalOutcome::MaxStepsReached;

        self.events.publish(&PilotEvent::Status {
            message: format!("starting goal: {}", goal),
        });
        info!("goal: {} (max {} steps)", goal, self.config.max_steps);

        for step in 1..=self.config.max_steps {
            let snapshot = match self.snapshotter.capture(self.surface.as_ref()).await {
                Ok(s) => s,
                Err(e) => {
                    let d = Decision::new(ActionKind::Unknown).with_description("snapshot page");
                    outcome = self.abort(step, &mut history, d, e);
                    break;
                }
            };

            self.events.publish(&PilotEvent::AiThinking {
                step,
                goal: goal.to_string(),
            });
            let decision = match self.adapter.decide(goal, &snapshot, &history).await {
                Ok(d) => d,
                Err(Error::UnknownAction(name)) => {
                    // contract violation: record it and let the oracle try again
                    let e = Error::UnknownAction(name.clone());
                    let d = Decision::new(ActionKind::Unknown).with_value(name);
                    self.record_failure(step, &mut history, &d, &e);
                    continue;
                }
                Err(e) => {
                    let d = Decision::new(ActionKind::Unknown).with_description("decide next action");
                    outcome = self.abort(step, &mut history, d, e);
                    break;
                }
            };
            self.events.publish(&PilotEvent::AiDecision {
                step,
                decision: decision.clone(),
            });

            let result = self.executor.execute(&decision, Some(&snapshot)).await;
            if result.navigated {
                self.snapshotter.invalidate();
            }
            history.push(HistoryEntry::from_result(step, &result));

            if decision.action == ActionKind::Complete {
                outcome = GoalOutcome::GoalCompleted;
                break;
            }
        }

        let completed = outcome == GoalOutcome::GoalCompleted;
        if outcome == GoalOutcome::MaxStepsReached {
            self.events.publish(&PilotEvent::Warning {
                message: format!("step limit of {} reached", self.config.max_steps),
            });
        }
        let summary = ExecutionSummary::from_history(&history, completed);
        self.events.publish(&PilotEvent::ExecutionComplete {
            summary: summary.clone(),
        });

        GoalReport {
            success: completed,
            goal: goal.to_string(),
            test_code: self.executor.replay().render(&self.config.test_name),
            steps: history,
            execution_summary: summary,
            outcome,
        }
    }

    fn record_failure(&mut self, step: usize, history: &mut Vec<HistoryEntry>, decision: &Decision, error: &Error) {
        warn!("step {}: {}", step, error);
        self.events.publish(&PilotEvent::Error {
            message: format!("step {}: {}", step, error),
        });
        let line = replay::failed_line(&format!("// {}", decision.summary()), error);
        self.executor.replay_mut().push(line.clone());
        let result = ExecutionResult {
            action: decision.action,
            target: String::new(),
            value: decision.value.clone().unwrap_or_default(),
            description: decision.summary(),
            success: false,
            error: error.to_string(),
            error_kind: Some(error.kind().to_string()),
            reasoning: String::new(),
            confidence: 0.0,
            replay_line: line,
            selector: None,
            attempts: 0,
            navigated: false,
            screenshot: None,
        };
        history.push(HistoryEntry::from_result(step, &result));
    }

    fn abort(&mut self, step: usize, history: &mut Vec<HistoryEntry>, decision: Decision, error: Error) -> GoalOutcome {
        self.record_failure(step, history, &decision, &error);
        GoalOutcome::ErroredOut(error.to_string())
    }
}
