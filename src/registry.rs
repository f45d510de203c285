//! Per-session page/frame bookkeeping.
//!
//! The browser owns the truth about which tabs are open, so snapshots are
//! taken live from the `Browser` handle. The registry itself holds only the
//! two pieces of context every DOM-touching tool call needs: the active page
//! and the optional frame override within it.

use chromiumoxide::browser::Browser;
use chromiumoxide::Page;

use crate::error::BrowserError;

/// How the active frame was selected within the active page.
///
/// Resolution happens at action time in the executor: a renamed or removed
/// frame shows up as `FrameNotFound` on the next call, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSelector {
    /// `window.frames[name]`
    ByName(String),
    /// The content document of the first element matching a CSS selector
    BySelector(String),
}

impl FrameSelector {
    pub fn describe(&self) -> String {
        match self {
            FrameSelector::ByName(name) => format!("with name '{name}'"),
            FrameSelector::BySelector(sel) => format!("with selector '{sel}'"),
        }
    }
}

/// One row of a `list_pages` snapshot.
#[derive(Debug, Clone)]
pub struct PageInfo {
    pub index: usize,
    pub url: String,
    pub title: String,
}

pub struct PageRegistry {
    active: Page,
    frame: Option<FrameSelector>,
}

impl PageRegistry {
    pub fn new(initial: Page) -> Self {
        Self {
            active: initial,
            frame: None,
        }
    }

    pub fn active_page(&self) -> &Page {
        &self.active
    }

    /// Make `page` the active page. Any frame override belonged to the old
    /// page, so it is always cleared here.
    pub fn set_active_page(&mut self, page: Page) {
        self.active = page;
        self.frame = None;
    }

    pub fn frame(&self) -> Option<&FrameSelector> {
        self.frame.as_ref()
    }

    pub fn set_frame(&mut self, frame: FrameSelector) {
        self.frame = Some(frame);
    }

    /// Reset to the active page's main document.
    pub fn clear_frame(&mut self) {
        self.frame = None;
    }

    /// Snapshot of currently open pages, in the browser's target order.
    pub async fn snapshot(
        &self,
        browser: &Browser,
    ) -> Result<Vec<(Page, PageInfo)>, BrowserError> {
        let pages = browser.pages().await?;
        let mut out = Vec::with_capacity(pages.len());
        for (index, page) in pages.into_iter().enumerate() {
            let url = page.url().await.ok().flatten().unwrap_or_default();
            let title = page.get_title().await.ok().flatten().unwrap_or_default();
            out.push((page, PageInfo { index, url, title }));
        }
        Ok(out)
    }

    /// Bring the page at `index` (within the current snapshot) to the front
    /// and make it active, clearing any frame override.
    pub async fn switch_to(
        &mut self,
        browser: &Browser,
        index: usize,
    ) -> Result<PageInfo, BrowserError> {
        let snapshot = self.snapshot(browser).await?;
        let count = snapshot.len();
        let (page, info) = snapshot
            .into_iter()
            .nth(index)
            .ok_or(BrowserError::IndexOutOfRange { index, count })?;

        if let Err(e) = page.bring_to_front().await {
            tracing::warn!(index, error = %e, "bring_to_front failed; page is active anyway");
        }
        self.set_active_page(page);
        Ok(info)
    }
}
