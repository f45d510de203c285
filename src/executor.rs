//! Action execution against a page or frame context.
//!
//! Stateless relative to session bookkeeping: every operation takes the page
//! handle (plus the optional frame override) it should act on. When no frame
//! override is set, selector lookups go through the engine's element API;
//! frame-scoped work runs as script against the resolved frame document,
//! since the CDP wrapper exposes element handles only for the main document.

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Element, Page};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::BrowserError;
use crate::registry::FrameSelector;

/// Budget for a navigation to settle
pub const NAV_TIMEOUT: Duration = Duration::from_secs(15);
/// Budget for selector/text lookups before element-not-found
pub const ELEMENT_WAIT: Duration = Duration::from_secs(5);
const ELEMENT_POLL: Duration = Duration::from_millis(100);

// Visible-text heuristics. Behavior-compatible constants, not re-derived:
// an element "speaks for itself" when it has few enough descendants that its
// innerText is not just a concatenation of its children's.
pub const MAX_TEXT_CHILD_ELEMENTS: usize = 3;
pub const MAX_TEXT_FRAGMENT_LEN: usize = 1000;

/// Quote a Rust string as a JavaScript string literal.
fn js_str(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}

fn is_not_found(value: &Value) -> bool {
    value.get("__err").and_then(Value::as_str) == Some("not-found")
}

fn is_not_fillable(value: &Value) -> bool {
    value.get("__err").and_then(Value::as_str) == Some("not-fillable")
}

/// The document a DOM-touching action runs against: the active page's main
/// document, or the active frame's document when an override is set.
pub struct DomContext {
    page: Page,
    frame: Option<FrameSelector>,
}

impl DomContext {
    pub fn new(page: Page, frame: Option<FrameSelector>) -> Self {
        Self { page, frame }
    }

    /// Run `body` (statements ending in a `return`) with `doc` bound to the
    /// target document. A vanished frame override surfaces as `FrameNotFound`.
    async fn run(&self, body: &str) -> Result<Value, BrowserError> {
        let script = format!(
            "(() => {{ const doc = {}; if (!doc) {{ return {{ __err: 'frame' }}; }} {} }})()",
            doc_expr(self.frame.as_ref()),
            body
        );
        let result = self.page.evaluate(script).await?;
        let value = result.value().cloned().unwrap_or(Value::Null);

        if value.get("__err").and_then(Value::as_str) == Some("frame") {
            let what = self
                .frame
                .as_ref()
                .map(FrameSelector::describe)
                .unwrap_or_else(|| "override".to_string());
            return Err(BrowserError::FrameNotFound(what));
        }
        Ok(value)
    }

    /// Run `body`, retrying while it reports element-not-found, up to the
    /// bounded element wait.
    async fn run_with_element_wait(
        &self,
        body: &str,
        wanted: &str,
    ) -> Result<Value, BrowserError> {
        let deadline = Instant::now() + ELEMENT_WAIT;
        loop {
            let value = self.run(body).await?;
            if !is_not_found(&value) {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::ElementNotFound(wanted.to_string()));
            }
            tokio::time::sleep(ELEMENT_POLL).await;
        }
    }
}

/// JS expression evaluating to the target document, or null when the frame
/// override no longer resolves.
fn doc_expr(frame: Option<&FrameSelector>) -> String {
    match frame {
        None => "document".to_string(),
        Some(FrameSelector::ByName(name)) => {
            let name = js_str(name);
            format!("(window.frames[{name}] ? window.frames[{name}].document : null)")
        }
        Some(FrameSelector::BySelector(sel)) => {
            let sel = js_str(sel);
            format!(
                "((document.querySelector({sel}) && \
                  document.querySelector({sel}).contentDocument) ? \
                  document.querySelector({sel}).contentDocument : null)"
            )
        }
    }
}

/// Prepend a secure scheme to bare host/path URLs.
pub fn normalize_url(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    }
}

/// Navigate the page and wait for the load to settle. Returns the URL the
/// page actually ended up at (redirects included).
pub async fn navigate(page: &Page, raw_url: &str) -> Result<String, BrowserError> {
    let url = normalize_url(raw_url);
    match tokio::time::timeout(NAV_TIMEOUT, page.goto(url.clone())).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            return Err(BrowserError::NavigationFailed {
                url,
                reason: e.to_string(),
            })
        }
        Err(_) => return Err(BrowserError::Timeout(NAV_TIMEOUT, "page load")),
    }
    // goto resolves on the navigation response; give the load event its
    // chance too, but don't fail a page that never goes idle
    let _ = tokio::time::timeout(NAV_TIMEOUT, page.wait_for_navigation()).await;
    Ok(page.url().await.ok().flatten().unwrap_or(url))
}

/// Find an element in the main document, polling up to the bounded wait.
async fn wait_for_element(page: &Page, selector: &str) -> Result<Element, BrowserError> {
    let deadline = Instant::now() + ELEMENT_WAIT;
    loop {
        match page.find_element(selector).await {
            Ok(element) => return Ok(element),
            Err(_) if Instant::now() < deadline => tokio::time::sleep(ELEMENT_POLL).await,
            Err(_) => return Err(BrowserError::ElementNotFound(selector.to_string())),
        }
    }
}

/// Click the first element matching a CSS selector.
pub async fn click(
    page: Page,
    frame: Option<FrameSelector>,
    selector: &str,
) -> Result<(), BrowserError> {
    match frame {
        None => {
            let element = wait_for_element(&page, selector).await?;
            element.click().await?;
            Ok(())
        }
        Some(frame) => {
            let ctx = DomContext::new(page, Some(frame));
            let body = format!(
                "const el = doc.querySelector({sel}); \
                 if (!el) {{ return {{ __err: 'not-found' }}; }} \
                 el.click(); return true;",
                sel = js_str(selector)
            );
            ctx.run_with_element_wait(&body, selector).await?;
            Ok(())
        }
    }
}

/// Click the first visible element whose rendered text contains `text`,
/// preferring the most specific (shortest-text) match.
pub async fn click_by_text(
    page: Page,
    frame: Option<FrameSelector>,
    text: &str,
) -> Result<(), BrowserError> {
    let ctx = DomContext::new(page, frame);
    let body = format!(
        "const needle = {needle}; \
         let best = null, bestLen = Infinity; \
         for (const el of doc.querySelectorAll('*')) {{ \
             if (!(el.offsetWidth > 0 || el.offsetHeight > 0)) continue; \
             const t = el.innerText ? el.innerText.trim() : ''; \
             if (!t || !t.includes(needle)) continue; \
             if (t.length < bestLen) {{ best = el; bestLen = t.length; }} \
         }} \
         if (!best) {{ return {{ __err: 'not-found' }}; }} \
         best.click(); return true;",
        needle = js_str(text)
    );
    ctx.run_with_element_wait(&body, text).await?;
    Ok(())
}

/// Clear an input-like element and set its value, dispatching the
/// `input`/`change` events frameworks listen for. The native value setter is
/// looked up on the element's own prototype chain so this works across
/// frame realms.
pub async fn fill(
    page: Page,
    frame: Option<FrameSelector>,
    selector: &str,
    value: &str,
) -> Result<(), BrowserError> {
    let ctx = DomContext::new(page, frame);
    let body = format!(
        "const el = doc.querySelector({sel}); \
         if (!el) {{ return {{ __err: 'not-found' }}; }} \
         let proto = Object.getPrototypeOf(el), setter = null; \
         while (proto) {{ \
             const d = Object.getOwnPropertyDescriptor(proto, 'value'); \
             if (d && d.set) {{ setter = d.set; break; }} \
             proto = Object.getPrototypeOf(proto); \
         }} \
         if (!setter && !('value' in el)) {{ return {{ __err: 'not-fillable' }}; }} \
         el.focus(); \
         if (setter) {{ setter.call(el, {val}); }} else {{ el.value = {val}; }} \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
         return true;",
        sel = js_str(selector),
        val = js_str(value)
    );
    let result = ctx.run_with_element_wait(&body, selector).await?;
    if is_not_fillable(&result) {
        return Err(BrowserError::NotFillable(selector.to_string()));
    }
    Ok(())
}

/// Run caller-supplied script in the active context and serialize its
/// return value. A script throw is a reportable outcome, not an engine error.
pub async fn evaluate(
    page: Page,
    frame: Option<FrameSelector>,
    script: &str,
) -> Result<String, BrowserError> {
    match frame {
        None => match page.evaluate(script.to_string()).await {
            Ok(result) => Ok(format_eval_value(result.value())),
            Err(e) => Err(BrowserError::ScriptException(e.to_string())),
        },
        Some(frame) => {
            let ctx = DomContext::new(page, Some(frame));
            let body = format!(
                "const w = doc.defaultView; return w.eval({});",
                js_str(script)
            );
            match ctx.run(&body).await {
                Ok(value) => Ok(format_eval_value(Some(&value))),
                Err(BrowserError::Engine(e)) => Err(BrowserError::ScriptException(e.to_string())),
                Err(other) => Err(other),
            }
        }
    }
}

fn format_eval_value(value: Option<&Value>) -> String {
    match value {
        Some(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| "null".to_string()),
        None => "undefined".to_string(),
    }
}

/// Capture a PNG of either the full page or a specific element's region.
/// The engine hands bytes back directly; there is no capture file to clean up.
pub async fn screenshot(page: &Page, selector: Option<&str>) -> Result<Vec<u8>, BrowserError> {
    let capture = async {
        match selector {
            Some(sel) => {
                let element = wait_for_element(page, sel).await?;
                Ok(element.screenshot(CaptureScreenshotFormat::Png).await?)
            }
            None => {
                let params = ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build();
                Ok(page.screenshot(params).await?)
            }
        }
    };
    tokio::time::timeout(NAV_TIMEOUT, capture)
        .await
        .map_err(|_| BrowserError::Timeout(NAV_TIMEOUT, "screenshot capture"))?
}

/// Deduplicated visible text fragments plus form-control values — an
/// approximation of what a human sees, not a DOM dump.
pub async fn read_visible_text(
    page: Page,
    frame: Option<FrameSelector>,
) -> Result<Vec<String>, BrowserError> {
    let ctx = DomContext::new(page, frame);
    let body = format!(
        "const uniqueTexts = new Set(); \
         for (const el of doc.querySelectorAll('*')) {{ \
             if (!(el.offsetWidth > 0 || el.offsetHeight > 0)) continue; \
             if (el.querySelectorAll('*').length > {max_children}) continue; \
             const text = el.innerText ? el.innerText.trim() : ''; \
             if (text && text.length <= {max_len}) uniqueTexts.add(text); \
             const value = el.getAttribute('value'); \
             if (value) uniqueTexts.add(value); \
         }} \
         return Array.from(uniqueTexts);",
        max_children = MAX_TEXT_CHILD_ELEMENTS,
        max_len = MAX_TEXT_FRAGMENT_LEN
    );
    let value = ctx.run(&body).await?;
    let texts = value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    Ok(texts)
}

/// Inner markup of the first element matching `selector`.
pub async fn read_html(
    page: Page,
    frame: Option<FrameSelector>,
    selector: &str,
) -> Result<String, BrowserError> {
    let ctx = DomContext::new(page, frame);
    let body = format!(
        "const el = doc.querySelector({sel}); \
         if (!el) {{ return {{ __err: 'not-found' }}; }} \
         return {{ html: el.innerHTML }};",
        sel = js_str(selector)
    );
    let value = ctx.run_with_element_wait(&body, selector).await?;
    Ok(value
        .get("html")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// Check that a frame override currently resolves to a document.
pub async fn probe_frame(page: &Page, frame: &FrameSelector) -> Result<(), BrowserError> {
    let ctx = DomContext::new(page.clone(), Some(frame.clone()));
    ctx.run("return true;").await?;
    Ok(())
}
