use crate::config::GoalConfig;
use crate::oracle::HttpOracle;
use crate::{Error, Result};
use eoka_pilot_core::{
    BrowserSurface, CommandTranslator, Decision, DecisionOracle, ExecutionResult, GoalReport,
    Session, TracingSink, Translation,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of one goal run.
#[derive(Debug)]
pub struct RunResult {
    pub report: GoalReport,
    /// Replay script written to disk, if artifacts are enabled.
    pub artifact: Option<PathBuf>,
    pub duration_ms: u64,
}

/// Drives one browser session through goal files and single commands.
pub struct Runner {
    session: Session,
    artifacts: bool,
}

impl Runner {
    /// Launch a browser configured by `config.browser`.
    pub async fn new(config: &GoalConfig) -> Result<Self> {
        let opts = config.browser.launch_options();
        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            opts.headless, opts.proxy
        );
        let session = Session::launch("runner", &opts, config.pilot_config()).await?;
        Ok(Self::from_session(session))
    }

    /// Wrap an existing session.
    pub fn from_session(mut session: Session) -> Self {
        session.set_events(Arc::new(TracingSink));
        Self {
            session,
            artifacts: true,
        }
    }

    /// Skip writing the replay script.
    pub fn without_artifacts(mut self) -> Self {
        self.artifacts = false;
        self
    }

    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Run the goal with the HTTP oracle described by `config.oracle`.
    pub async fn run(&mut self, config: &GoalConfig) -> Result<RunResult> {
        let oracle = HttpOracle::from_config(&config.oracle)?;
        self.run_with_oracle(config, Arc::new(oracle)).await
    }

    pub async fn run_with_oracle(
        &mut self,
        config: &GoalConfig,
        oracle: Arc<dyn DecisionOracle>,
    ) -> Result<RunResult> {
        let start = Instant::now();
        self.session.reset_replay();
        self.open_start_url(config).await?;

        info!("Goal: {}", config.goal);
        let report = self.session.run_goal(&config.goal, oracle).await;
        if !report.success {
            warn!("Goal not reached: {:?}", report.outcome);
            self.handle_failure(config).await;
        }

        let artifact = if self.artifacts {
            let path = self.session.save_replay(Path::new(&config.output.dir))?;
            info!("Replay script written to {}", path.display());
            Some(path)
        } else {
            None
        };

        Ok(RunResult {
            report,
            artifact,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Translate and execute one command. Uses the HTTP oracle when its key
    /// is available, the heuristic parser otherwise.
    pub async fn run_command(
        &mut self,
        config: &GoalConfig,
        command: &str,
    ) -> Result<(Translation, Option<ExecutionResult>)> {
        let translator = match HttpOracle::from_config(&config.oracle) {
            Ok(oracle) => CommandTranslator::with_oracle(Arc::new(oracle)),
            Err(e) => {
                warn!("{}; falling back to heuristic parsing", e);
                CommandTranslator::heuristic_only()
            }
        };
        self.run_command_with(config, command, &translator).await
    }

    pub async fn run_command_with(
        &mut self,
        config: &GoalConfig,
        command: &str,
        translator: &CommandTranslator,
    ) -> Result<(Translation, Option<ExecutionResult>)> {
        self.open_start_url(config).await?;
        // Index targets need a current listing.
        if let Err(e) = self.session.snapshot().await {
            warn!("Snapshot before command failed: {}", e);
        }
        Ok(self.session.command(command, translator).await)
    }

    async fn open_start_url(&mut self, config: &GoalConfig) -> Result<()> {
        let Some(ref url) = config.start_url else {
            return Ok(());
        };
        info!("Navigating to: {}", url);
        let result = self.session.execute(&Decision::navigate(url.as_str())).await;
        if !result.success {
            return Err(eoka_pilot_core::Error::Navigation(result.error).into());
        }
        Ok(())
    }

    async fn handle_failure(&self, config: &GoalConfig) {
        let Some(ref template) = config.output.failure_screenshot else {
            return;
        };
        let path = stamp(template, &chrono::Local::now());
        info!("Saving failure screenshot to: {}", path);
        match self.session.surface().screenshot().await {
            Ok(data) => {
                if let Err(e) = std::fs::write(&path, data) {
                    warn!("Failed to save screenshot: {}", e);
                }
            }
            Err(e) => warn!("Failed to capture screenshot: {}", e),
        }
    }

    /// Write screenshot bytes next to the replay scripts.
    pub fn save_screenshot(&self, config: &GoalConfig, png: &[u8]) -> Result<PathBuf> {
        let dir = Path::new(&config.output.dir);
        std::fs::create_dir_all(dir)?;
        let path = dir.join(stamp("screenshot_{timestamp}.png", &chrono::Local::now()));
        std::fs::write(&path, png).map_err(Error::Io)?;
        Ok(path)
    }

    pub fn replay_script(&self) -> String {
        self.session.replay_script()
    }

    pub async fn close(mut self) {
        self.session.close().await;
    }
}

fn stamp<Tz: chrono::TimeZone>(template: &str, now: &chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    template.replace("{timestamp}", &now.format("%Y%m%d_%H%M%S").to_string())
}
