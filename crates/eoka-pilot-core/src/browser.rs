//! Browser automation surface: the narrow set of page capabilities the engine
//! needs, plus the CDP-backed implementation over an `eoka::Page`.

use std::time::Duration;

use async_trait::async_trait;
use eoka::Page;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Bounding box in viewport coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// True when the box has no rendered area.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// True when the box overlaps the `width` x `height` viewport rectangle.
    pub fn intersects(&self, width: f64, height: f64) -> bool {
        !self.is_empty()
            && self.x + self.width > 0.0
            && self.y + self.height > 0.0
            && self.x < width
            && self.y < height
    }

    /// True when the center point lies inside the viewport rectangle.
    pub fn center_within(&self, width: f64, height: f64) -> bool {
        let (cx, cy) = self.center();
        cx >= 0.0 && cy >= 0.0 && cx <= width && cy <= height
    }
}

/// Live state of whatever a selector currently matches.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ElementState {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
    #[serde(default)]
    pub bbox: Option<BBox>,
}

impl ElementState {
    pub fn detached() -> Self {
        Self::default()
    }

    /// Attached, visible and enabled.
    pub fn is_actionable(&self) -> bool {
        self.attached && self.visible && self.enabled
    }
}

/// Everything the engine asks of a browser page.
///
/// Selectors passed to these methods may carry a trailing `:has-text("...")`
/// filter in addition to plain CSS; implementations must honor it.
#[async_trait]
pub trait BrowserSurface: Send + Sync {
    /// Load `url`, failing with `Timeout` once `timeout` elapses.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Evaluate a JavaScript expression and return its JSON value.
    async fn evaluate(&self, js: &str) -> Result<Value>;

    /// Execute JavaScript for its side effects.
    async fn execute(&self, js: &str) -> Result<()>;

    /// Report what `selector` currently matches.
    async fn query(&self, selector: &str) -> Result<ElementState>;

    async fn scroll_into_view(&self, selector: &str) -> Result<()>;

    /// Real pointer click aimed at `point`, bounded by `timeout`.
    async fn pointer_click(&self, selector: &str, point: (f64, f64), timeout: Duration)
        -> Result<()>;

    /// Programmatic `element.click()`.
    async fn click_direct(&self, selector: &str) -> Result<()>;

    async fn focus(&self, selector: &str) -> Result<()>;

    /// Type into the focused element one character at a time.
    async fn type_text(&self, text: &str, per_char: Duration) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    async fn hover_at(&self, point: (f64, f64)) -> Result<()>;

    /// Assign `value` directly and fire `input`/`change`.
    async fn set_value(&self, selector: &str, value: &str) -> Result<()>;

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()>;

    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn url(&self) -> Result<String>;
}

/// Quote a string as a JavaScript literal.
pub(crate) fn js_str(s: &str) -> Result<String> {
    Ok(serde_json::to_string(s)?)
}

/// Selector lookup shared by every script below. Supports a trailing
/// `:has-text("...")` on top of `querySelector`.
const FIND_FN: &str = r#"
function __pilotFind(sel) {
    const m = sel.match(/^(.*):has-text\((.*)\)$/);
    try {
        if (!m) return document.querySelector(sel);
        let needle = m[2].trim();
        if ((needle.startsWith('"') && needle.endsWith('"')) || (needle.startsWith("'") && needle.endsWith("'"))) {
            needle = needle.slice(1, -1).replace(/\\"/g, '"').replace(/\\\\/g, '\\');
        }
        needle = needle.toLowerCase();
        const base = m[1] || '*';
        return Array.from(document.querySelectorAll(base))
            .find(e => (e.innerText || e.textContent || '').trim().toLowerCase().includes(needle)) || null;
    } catch (e) {
        return null;
    }
}
"#;

/// Wrap `body` in an IIFE that has `__pilotFind` and `el` bound for `selector`.
fn with_element(selector: &str, body: &str) -> Result<String> {
    Ok(format!(
        "(() => {{ {find} const el = __pilotFind({sel}); {body} }})()",
        find = FIND_FN,
        sel = js_str(selector)?,
        body = body
    ))
}

const QUERY_BODY: &str = r#"
    if (!el) return JSON.stringify({ attached: false, visible: false, enabled: false, bbox: null });
    const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    const visible = r.width > 0 && r.height > 0 && s.display !== 'none'
        && s.visibility !== 'hidden' && parseFloat(s.opacity || '1') > 0;
    const enabled = !el.disabled && el.getAttribute('aria-disabled') !== 'true';
    return JSON.stringify({
        attached: el.isConnected,
        visible,
        enabled,
        bbox: visible ? { x: r.x, y: r.y, width: r.width, height: r.height } : null,
    });
"#;

const SET_VALUE_BODY: &str = r#"
    if (!el) return false;
    const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (el.isContentEditable) el.textContent = __value;
    else if (desc && desc.set) desc.set.call(el, __value);
    else el.value = __value;
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
"#;

/// `BrowserSurface` over a CDP page.
pub struct EokaSurface {
    page: Page,
}

impl EokaSurface {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// The underlying page.
    pub fn page(&self) -> &Page {
        &self.page
    }

    async fn run_on_element(&self, selector: &str, body: &str) -> Result<()> {
        let js = with_element(
            selector,
            &format!("if (!el) return false; {} return true;", body),
        )?;
        let found: bool = self.page.evaluate(&js).await?;
        if !found {
            return Err(Error::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSurface for EokaSurface {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::Navigation(format!("{}: {}", url, e))),
            Err(_) => Err(Error::Timeout(format!(
                "navigation to {} exceeded {}ms",
                url,
                timeout.as_millis()
            ))),
        }
    }

    async fn evaluate(&self, js: &str) -> Result<Value> {
        let wrapped = format!("JSON.stringify(({}) ?? null)", js);
        let raw: String = self.page.evaluate(&wrapped).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn execute(&self, js: &str) -> Result<()> {
        self.page.execute(js).await?;
        Ok(())
    }

    async fn query(&self, selector: &str) -> Result<ElementState> {
        let js = with_element(selector, QUERY_BODY)?;
        let raw: String = self.page.evaluate(&js).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.run_on_element(
            selector,
            "el.scrollIntoView({ behavior: 'smooth', block: 'center' });",
        )
        .await
    }

    async fn pointer_click(
        &self,
        selector: &str,
        point: (f64, f64),
        timeout: Duration,
    ) -> Result<()> {
        use eoka::cdp::{MouseButton, MouseEventType};

        let (x, y) = point;
        let session = self.page.session();
        let click = async {
            session
                .dispatch_mouse_event(MouseEventType::MouseMoved, x, y, None, None)
                .await?;
            session
                .dispatch_mouse_event(MouseEventType::MousePressed, x, y, Some(MouseButton::Left), Some(1))
                .await?;
            session
                .dispatch_mouse_event(MouseEventType::MouseReleased, x, y, Some(MouseButton::Left), Some(1))
                .await
        };
        match tokio::time::timeout(timeout, click).await {
            Ok(r) => Ok(r?),
            Err(_) => Err(Error::Timeout(format!(
                "click on {} exceeded {}ms",
                selector,
                timeout.as_millis()
            ))),
        }
    }

    async fn click_direct(&self, selector: &str) -> Result<()> {
        self.run_on_element(selector, "el.click();").await
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        self.run_on_element(selector, "el.focus();").await
    }

    async fn type_text(&self, text: &str, per_char: Duration) -> Result<()> {
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.page.type_text(ch.encode_utf8(&mut buf)).await?;
            tokio::time::sleep(per_char).await;
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.page.human().press_key(key).await?;
        Ok(())
    }

    async fn hover_at(&self, point: (f64, f64)) -> Result<()> {
        self.page
            .session()
            .dispatch_mouse_event(
                eoka::cdp::MouseEventType::MouseMoved,
                point.0,
                point.1,
                None,
                None,
            )
            .await?;
        Ok(())
    }

    async fn set_value(&self, selector: &str, value: &str) -> Result<()> {
        let body = format!("const __value = {}; {}", js_str(value)?, SET_VALUE_BODY);
        let js = with_element(selector, &body)?;
        let found: bool = self.page.evaluate(&js).await?;
        if !found {
            return Err(Error::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        self.page
            .execute(&format!(
                "window.scrollBy({{ left: {}, top: {}, behavior: 'smooth' }})",
                dx, dy
            ))
            .await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(self.page.screenshot().await?)
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }
}
