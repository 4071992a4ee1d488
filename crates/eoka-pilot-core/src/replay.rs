//! Replay script: one pseudocode line per executed action, wrapped in a
//! single Playwright-style test function.

use std::path::{Path, PathBuf};

use crate::decision::{ActionKind, Decision, Target, DEFAULT_KEY, DEFAULT_SCROLL_PX, DEFAULT_WAIT_MS};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayScript {
    lines: Vec<String>,
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s.replace('"', "\\\"")))
}

/// Line reproducing `decision` against `selector` (the one that matched, or
/// the best candidate when none did).
pub fn line_for(decision: &Decision, selector: Option<&str>) -> String {
    let sel = quote(selector.unwrap_or(""));
    let value = quote(decision.value.as_deref().unwrap_or(""));
    match decision.action {
        ActionKind::Navigate => {
            let url = match decision.target {
                Some(Target::Url(ref u)) => u.as_str(),
                _ => "",
            };
            format!("await page.goto({});", quote(url))
        }
        ActionKind::Click => format!("await page.click({});", sel),
        ActionKind::Type => format!("await page.fill({}, {});", sel, value),
        ActionKind::Clear => format!("await page.fill({}, \"\");", sel),
        ActionKind::Hover => format!("await page.hover({});", sel),
        ActionKind::Search => format!(
            "await page.fill({}, {});\n  await page.keyboard.press(\"Enter\");",
            sel, value
        ),
        ActionKind::Press => {
            let key = match decision.target {
                Some(Target::Key(ref k)) => k.as_str(),
                _ => DEFAULT_KEY,
            };
            format!("await page.keyboard.press({});", quote(key))
        }
        ActionKind::Wait => format!(
            "await page.waitForTimeout({});",
            decision.amount.unwrap_or(DEFAULT_WAIT_MS)
        ),
        ActionKind::Scroll => format!(
            "await page.mouse.wheel(0, {});",
            decision.amount.unwrap_or(DEFAULT_SCROLL_PX)
        ),
        ActionKind::Screenshot => "await page.screenshot();".to_string(),
        ActionKind::Complete => "// goal complete".to_string(),
        ActionKind::GenerateTest => "// test generated".to_string(),
        ActionKind::Unknown => format!(
            "// unknown command: {}",
            decision.value.as_deref().unwrap_or("").replace('\n', " ")
        ),
    }
}

/// Comment out a line that failed, keeping the error for the reader.
pub fn failed_line(line: &str, error: &crate::Error) -> String {
    let msg = error.to_string().replace('\n', " ");
    line.lines()
        .map(|l| format!("// FAILED ({}): {}", msg, l.trim()))
        .collect::<Vec<_>>()
        .join("\n  ")
}

impl ReplayScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Full test source. Pure: same lines and name give the same bytes.
    pub fn render(&self, test_name: &str) -> String {
        let mut out = String::from("import { test, expect } from '@playwright/test';\n\n");
        out.push_str(&format!("test({}, async ({{ page }}) => {{\n", quote(test_name)));
        for line in &self.lines {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("});\n");
        out
    }

    /// Write the rendered script to `<dir>/pilot_test_<YYYYMMDD_HHMMSS>.spec.ts`.
    pub fn persist(&self, dir: &Path, test_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("pilot_test_{}.spec.ts", stamp));
        std::fs::write(&path, self.render(test_name))?;
        tracing::info!("replay script saved: {}", path.display());
        Ok(path)
    }
}
