//! Page snapshotter: scans the live DOM into a bounded, ordered list of
//! element descriptors with ranked selectors.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::browser::{BBox, BrowserSurface};
use crate::selector::{self, SelectorSource};
use crate::stability::{await_stability, StabilityOptions};
use crate::{ElementDescriptor, Error, PageMeta, PageSnapshot, Result, StyleSnapshot};

/// In-page scan. `__CAP__` and `__TEXT_LIMIT__` are substituted before use.
const SCAN_JS: &str = r#"
(() => {
    const INTERACTIVE_QUERY = 'a[href], button, input:not([type="hidden"]), select, textarea, summary, option, label[for], '
        + '[role="button"], [role="link"], [role="tab"], [role="menuitem"], [role="checkbox"], [role="radio"], '
        + '[role="switch"], [role="option"], [role="combobox"], [role="textbox"], [role="searchbox"], '
        + '[onclick], [tabindex]:not([tabindex="-1"]), [data-testid], [data-test], [contenteditable="true"]';
    const CAP = __CAP__;
    const TEXT_LIMIT = __TEXT_LIMIT__;
    const vw = window.innerWidth, vh = window.innerHeight;
    const seen = new Set();
    const out = [];

    function isVisible(el, rect, style) {
        if (rect.width <= 0 || rect.height <= 0) return false;
        if (rect.right <= 0 || rect.bottom <= 0 || rect.left >= vw || rect.top >= vh) return false;
        if (style.display === 'none' || style.visibility === 'hidden') return false;
        if (parseFloat(style.opacity || '1') === 0) return false;
        const tag = el.tagName;
        if (el.offsetParent === null && style.position !== 'fixed' && tag !== 'BODY' && tag !== 'HTML') {
            if (!(el instanceof SVGElement)) return false;
        }
        return true;
    }

    function classList(el) {
        const c = el.className;
        const raw = (c && typeof c === 'object' && 'baseVal' in c) ? c.baseVal : (c || '');
        return String(raw).split(/\s+/).filter(Boolean);
    }

    function nthPath(el) {
        const parent = el.parentElement;
        if (!parent) return null;
        const tag = el.tagName.toLowerCase();
        const same = Array.from(parent.children).filter(c => c.tagName === el.tagName);
        if (same.length < 2) return null;
        let scope = parent.tagName.toLowerCase();
        if (parent.id && /^[a-zA-Z][\w-]*$/.test(parent.id)) scope = '#' + parent.id;
        return scope + ' > ' + tag + ':nth-of-type(' + (same.indexOf(el) + 1) + ')';
    }

    function visibleText(el) {
        const t = (el.innerText || el.textContent || '').trim().replace(/\s+/g, ' ');
        return t.length > TEXT_LIMIT ? t.substring(0, TEXT_LIMIT) : t;
    }

    function ownText(el) {
        let t = '';
        for (const n of el.childNodes) {
            if (n.nodeType === 3) t += n.textContent;
        }
        return t.trim().replace(/\s+/g, ' ');
    }

    function attr(el, name) {
        const v = el.getAttribute(name);
        return v === null || v === '' ? null : v;
    }

    function describe(el, rect, style) {
        const tag = el.tagName.toLowerCase();
        const isField = tag === 'input' || tag === 'select' || tag === 'textarea';
        return {
            tag,
            text: visibleText(el),
            id: attr(el, 'id'),
            classes: classList(el),
            name: attr(el, 'name'),
            inputType: attr(el, 'type'),
            placeholder: attr(el, 'placeholder'),
            href: attr(el, 'href'),
            src: attr(el, 'src'),
            alt: attr(el, 'alt'),
            title: attr(el, 'title'),
            role: attr(el, 'role'),
            ariaLabel: attr(el, 'aria-label'),
            testId: attr(el, 'data-testid'),
            testAttr: attr(el, 'data-test'),
            value: isField && el.value ? String(el.value) : null,
            checked: !!el.checked,
            disabled: !!el.disabled || el.getAttribute('aria-disabled') === 'true',
            readOnly: !!el.readOnly,
            required: !!el.required,
            editable: !!el.isContentEditable,
            clickHandler: typeof el.onclick === 'function' || el.hasAttribute('onclick'),
            bbox: { x: rect.x, y: rect.y, width: rect.width, height: rect.height },
            style: {
                cursor: style.cursor,
                display: style.display,
                backgroundColor: style.backgroundColor,
                color: style.color,
                zIndex: style.zIndex,
            },
            nthPath: nthPath(el),
        };
    }

    function consider(el, needText) {
        if (seen.has(el)) return;
        const rect = el.getBoundingClientRect();
        const style = getComputedStyle(el);
        if (!isVisible(el, rect, style)) return;
        if (needText && !ownText(el)) return;
        seen.add(el);
        out.push(describe(el, rect, style));
    }

    function collect(root) {
        for (const node of root.querySelectorAll('*')) {
            if (node.matches(INTERACTIVE_QUERY)) consider(node, false);
            if (node.shadowRoot) collect(node.shadowRoot);
        }
    }

    collect(document);

    if (out.length < CAP) {
        for (const node of document.body ? document.body.querySelectorAll('*') : []) {
            if (out.length >= CAP) break;
            const tag = node.tagName;
            if (tag === 'SCRIPT' || tag === 'STYLE' || tag === 'NOSCRIPT' || tag === 'TEMPLATE') continue;
            consider(node, true);
        }
    }

    const headings = Array.from(document.querySelectorAll('h1, h2, h3'))
        .map(h => (h.innerText || h.textContent || '').trim())
        .filter(Boolean)
        .slice(0, 10);
    const body = document.body ? (document.body.innerText || '') : '';

    return {
        url: location.href,
        title: document.title,
        domain: location.hostname,
        readyState: document.readyState,
        viewport: { width: vw, height: vh },
        elements: out,
        meta: {
            headings,
            forms: document.forms.length,
            images: document.images.length,
            videos: document.querySelectorAll('video').length,
            bodySample: body.trim().replace(/\s+/g, ' ').substring(0, 500),
        },
    };
})()
"#;

const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "option", "summary", "label",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "tab", "menuitem", "checkbox", "radio", "switch", "option", "combobox",
    "textbox", "searchbox",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Viewport {
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScan {
    url: String,
    title: String,
    domain: String,
    ready_state: String,
    viewport: Viewport,
    elements: Vec<RawElement>,
    #[serde(default)]
    meta: PageMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawElement {
    tag: String,
    #[serde(default)]
    text: String,
    id: Option<String>,
    #[serde(default)]
    classes: Vec<String>,
    name: Option<String>,
    input_type: Option<String>,
    placeholder: Option<String>,
    href: Option<String>,
    src: Option<String>,
    alt: Option<String>,
    title: Option<String>,
    role: Option<String>,
    aria_label: Option<String>,
    test_id: Option<String>,
    test_attr: Option<String>,
    value: Option<String>,
    #[serde(default)]
    checked: bool,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    editable: bool,
    #[serde(default)]
    click_handler: bool,
    bbox: BBox,
    #[serde(default)]
    style: StyleSnapshot,
    nth_path: Option<String>,
}

impl RawElement {
    fn selector_source(&self) -> SelectorSource {
        SelectorSource {
            tag: self.tag.clone(),
            id: self.id.clone(),
            test_id: self.test_id.clone(),
            test_attr: self.test_attr.clone(),
            aria_label: self.aria_label.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            text: self.text.clone(),
            classes: self.classes.clone(),
            placeholder: self.placeholder.clone(),
            input_type: self.input_type.clone(),
            nth_path: self.nth_path.clone(),
        }
    }

    fn is_interactable(&self) -> bool {
        if self.disabled {
            return false;
        }
        INTERACTIVE_TAGS.contains(&self.tag.as_str())
            || self
                .role
                .as_deref()
                .is_some_and(|r| INTERACTIVE_ROLES.contains(&r))
            || self.editable
            || self.click_handler
            || self.style.cursor == "pointer"
            || self.test_id.is_some()
            || self.test_attr.is_some()
    }

    fn into_descriptor(self, viewport: (f64, f64), text_limit: usize) -> ElementDescriptor {
        let selectors = selector::rank(&self.selector_source());
        let is_interactable = self.is_interactable();
        let text = truncate_chars(self.text.trim(), text_limit);
        ElementDescriptor {
            index: 0,
            center: self.bbox.center(),
            in_viewport: self.bbox.center_within(viewport.0, viewport.1),
            tag: self.tag,
            text,
            id: self.id,
            classes: self.classes,
            name: self.name,
            input_type: self.input_type,
            placeholder: self.placeholder,
            href: self.href,
            src: self.src,
            alt: self.alt,
            title: self.title,
            role: self.role,
            aria_label: self.aria_label,
            test_id: self.test_id,
            test_attr: self.test_attr,
            value: self.value,
            checked: self.checked,
            disabled: self.disabled,
            read_only: self.read_only,
            required: self.required,
            bbox: self.bbox,
            style: self.style,
            is_interactable,
            selectors,
        }
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}

/// Interactable first, then in-viewport, then top to bottom.
fn display_order(a: &ElementDescriptor, b: &ElementDescriptor) -> Ordering {
    b.is_interactable
        .cmp(&a.is_interactable)
        .then(b.in_viewport.cmp(&a.in_viewport))
        .then(a.bbox.y.partial_cmp(&b.bbox.y).unwrap_or(Ordering::Equal))
}

/// Sort, truncate to `cap`, and assign dense indexes.
pub fn order_elements(mut elements: Vec<ElementDescriptor>, cap: usize) -> Vec<ElementDescriptor> {
    elements.sort_by(display_order);
    elements.truncate(cap);
    for (i, el) in elements.iter_mut().enumerate() {
        el.index = i;
    }
    elements
}

fn build_snapshot(raw: RawScan, cap: usize, text_limit: usize, generation: u64) -> PageSnapshot {
    let viewport = (raw.viewport.width, raw.viewport.height);
    let scanned = raw.elements.len();
    let elements: Vec<ElementDescriptor> = raw
        .elements
        .into_iter()
        .filter(|e| e.bbox.intersects(viewport.0, viewport.1))
        .map(|e| e.into_descriptor(viewport, text_limit))
        .collect();
    if elements.len() != scanned {
        debug!("snapshot: dropped {} invisible elements", scanned - elements.len());
    }
    PageSnapshot {
        url: raw.url,
        title: raw.title,
        domain: raw.domain,
        ready_state: raw.ready_state,
        viewport,
        elements: order_elements(elements, cap),
        meta: raw.meta,
        generation,
    }
}

/// Produces snapshots and keeps the most recent one for index lookups.
///
/// The cached snapshot and its rendered listing belong to one settled page
/// state. Call [`invalidate`](Self::invalidate) on every navigation.
pub struct Snapshotter {
    cap: usize,
    text_limit: usize,
    stability: Option<StabilityOptions>,
    latest: Option<Arc<PageSnapshot>>,
    rendered: Option<String>,
    generation: u64,
}

impl Snapshotter {
    pub fn new(cap: usize, text_limit: usize, stability: StabilityOptions) -> Self {
        Self {
            cap,
            text_limit,
            stability: Some(stability),
            latest: None,
            rendered: None,
            generation: 0,
        }
    }

    /// Skip the pre-scan stability wait.
    pub fn without_stability(mut self) -> Self {
        self.stability = None;
        self
    }

    fn scan_js(&self) -> String {
        SCAN_JS
            .replace("__CAP__", &self.cap.to_string())
            .replace("__TEXT_LIMIT__", &self.text_limit.to_string())
    }

    /// Wait for the page to settle, then scan it.
    pub async fn capture(&mut self, surface: &dyn BrowserSurface) -> Result<Arc<PageSnapshot>> {
        if let Some(ref opts) = self.stability {
            let report = await_stability(surface, opts).await;
            if !report.settled {
                debug!("snapshot: page not settled after {:?}", report.waited);
            }
        }

        let value = surface
            .evaluate(&self.scan_js())
            .await
            .map_err(|e| Error::Snapshot(e.to_string()))?;
        let raw: RawScan =
            serde_json::from_value(value).map_err(|e| Error::Snapshot(e.to_string()))?;

        self.generation += 1;
        let snap = Arc::new(build_snapshot(raw, self.cap, self.text_limit, self.generation));
        debug!(
            "snapshot #{}: {} elements on {}",
            snap.generation,
            snap.len(),
            snap.url
        );
        self.latest = Some(Arc::clone(&snap));
        self.rendered = None;
        Ok(snap)
    }

    /// Most recent snapshot, if the page hasn't navigated since.
    pub fn latest(&self) -> Option<Arc<PageSnapshot>> {
        self.latest.clone()
    }

    /// Rendered element list of the latest snapshot, computed once.
    pub fn element_list(&mut self) -> Option<&str> {
        let snap = self.latest.as_ref()?;
        Some(self.rendered.get_or_insert_with(|| snap.element_list()).as_str())
    }

    pub fn invalidate(&mut self) {
        self.latest = None;
        self.rendered = None;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
