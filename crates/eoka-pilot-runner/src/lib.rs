//! # eoka-pilot-runner
//!
//! Goal-driven browser automation. Describe the goal in YAML, let the oracle
//! pick each step, get a replay script back.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eoka_pilot_runner::{GoalConfig, Runner};
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_pilot_runner::Result<()> {
//! let config = GoalConfig::load("goal.yaml")?;
//! let mut runner = Runner::new(&config).await?;
//! let result = runner.run(&config).await?;
//! println!("Success: {}", result.report.success);
//! runner.close().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod oracle;
mod runner;

pub use config::{
    BrowserConfig, GoalConfig, OracleConfig, OutputConfig, ParamDef, Params, Viewport,
};
pub use oracle::HttpOracle;
pub use runner::{RunResult, Runner};

/// Result type for eoka-pilot-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during config loading or execution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pilot(#[from] eoka_pilot_core::Error),
}
