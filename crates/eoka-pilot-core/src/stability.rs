//! Bounded page-stability wait.
//!
//! Two phases: wait for `document.readyState` to leave `loading` (or a load
//! timeout), then watch an in-page mutation counter until it stays under a
//! threshold for a quiet window. The whole thing is capped by `max_wait`, so a
//! page that never stops mutating still lets the pipeline proceed.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::browser::BrowserSurface;

#[derive(Debug, Clone)]
pub struct StabilityOptions {
    /// Ceiling for the ready-state phase.
    pub load_timeout: Duration,
    /// Hard ceiling for both phases together.
    pub max_wait: Duration,
    /// Mutations must stay under the threshold for this long.
    pub quiet_window: Duration,
    pub mutation_threshold: u64,
    pub poll_interval: Duration,
}

impl Default for StabilityOptions {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(3),
            max_wait: Duration::from_secs(5),
            quiet_window: Duration::from_millis(500),
            mutation_threshold: 3,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityReport {
    /// False when the ceiling elapsed before the page went quiet.
    pub settled: bool,
    pub waited: Duration,
}

pub(crate) const READY_STATE_JS: &str = "document.readyState";

pub(crate) const INSTALL_OBSERVER_JS: &str = r#"
(() => {
    if (!window.__pilotMutations) {
        window.__pilotMutations = { count: 0 };
        const obs = new MutationObserver(records => { window.__pilotMutations.count += records.length; });
        obs.observe(document.documentElement || document, { childList: true, subtree: true, attributes: true, characterData: true });
    }
    return window.__pilotMutations.count;
})()
"#;

pub(crate) const MUTATION_COUNT_JS: &str =
    "(window.__pilotMutations ? window.__pilotMutations.count : 0)";

/// Wait until the page is loaded and quiet, or the ceiling elapses.
///
/// Never fails: evaluation errors end the wait early and count as unsettled.
pub async fn await_stability(surface: &dyn BrowserSurface, opts: &StabilityOptions) -> StabilityReport {
    let start = Instant::now();
    let deadline = start + opts.max_wait;
    let load_deadline = start + opts.load_timeout.min(opts.max_wait);

    loop {
        match surface.evaluate(READY_STATE_JS).await {
            Ok(v) if v.as_str().is_some_and(|s| s != "loading") => break,
            Ok(_) => {}
            Err(e) => {
                debug!("stability: readyState unavailable: {}", e);
                break;
            }
        }
        if Instant::now() >= load_deadline {
            debug!("stability: load timeout");
            break;
        }
        tokio::time::sleep(opts.poll_interval).await;
    }

    let mut last = match surface.evaluate(INSTALL_OBSERVER_JS).await {
        Ok(v) => v.as_u64().unwrap_or(0),
        Err(e) => {
            debug!("stability: observer install failed: {}", e);
            return StabilityReport {
                settled: false,
                waited: start.elapsed(),
            };
        }
    };
    let mut quiet_since = Instant::now();

    loop {
        let now = Instant::now();
        if now.duration_since(quiet_since) >= opts.quiet_window {
            return StabilityReport {
                settled: true,
                waited: start.elapsed(),
            };
        }
        if now >= deadline {
            debug!("stability: ceiling reached after {:?}", start.elapsed());
            return StabilityReport {
                settled: false,
                waited: start.elapsed(),
            };
        }
        tokio::time::sleep(opts.poll_interval).await;

        let count = match surface.evaluate(MUTATION_COUNT_JS).await {
            Ok(v) => v.as_u64().unwrap_or(last),
            Err(_) => {
                return StabilityReport {
                    settled: false,
                    waited: start.elapsed(),
                }
            }
        };
        if count.saturating_sub(last) >= opts.mutation_threshold {
            quiet_since = Instant::now();
        }
        last = count;
    }
}
