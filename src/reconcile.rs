//! Post-click page reconciliation.
//!
//! A click can do nothing page-level, navigate the current page in place, or
//! open a new tab — and the engine does not say which synchronously. Callers
//! issue one tool call at a time and cannot wait-and-see themselves, so the
//! active page must be re-resolved here, deterministically, before the next
//! call arrives.

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::Page;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::error::BrowserError;
use crate::session::Session;

/// How long a click gets to produce a "new page" before we fall back to
/// snapshot diffing.
pub const NEW_PAGE_WAIT: Duration = Duration::from_secs(3);
const PAGE_POLL: Duration = Duration::from_millis(100);
/// Budget for a reconciled page to finish loading
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

async fn open_targets(browser: &Browser) -> HashSet<TargetId> {
    browser
        .pages()
        .await
        .unwrap_or_default()
        .iter()
        .map(|p| p.target_id().clone())
        .collect()
}

/// Resolves to the first open page whose target id is not in `before`.
/// Never resolves on its own — the caller bounds it with a timeout.
async fn first_new_page(browser: &Browser, before: &HashSet<TargetId>) -> Page {
    loop {
        for page in browser.pages().await.unwrap_or_default() {
            if !before.contains(page.target_id()) {
                return page;
            }
        }
        tokio::time::sleep(PAGE_POLL).await;
    }
}

async fn settle(page: &Page) {
    let _ = tokio::time::timeout(SETTLE_TIMEOUT, page.wait_for_navigation()).await;
}

impl Session {
    /// Run a click-family action and then decide which page is active.
    ///
    /// The click and a bounded new-page watch run concurrently; once both
    /// are done (the watch is capped at [`NEW_PAGE_WAIT`]):
    /// 1. the watch saw a new page → it becomes active once loaded,
    /// 2. else a fresh snapshot shows pages the pre-click snapshot lacked
    ///    (the watch lost the race but the page is real) → the newest one
    ///    becomes active once loaded,
    /// 3. else the active page's URL changed → in-place navigation, wait for
    ///    it to load and keep it active,
    /// 4. else → active page unchanged.
    ///
    /// Reconciliation runs even when the click itself failed — an
    /// onmousedown handler may have navigated before the failure — and the
    /// click's own outcome is returned either way.
    pub async fn click_and_reconcile<F, T>(&mut self, click: F) -> Result<T, BrowserError>
    where
        F: Future<Output = Result<T, BrowserError>>,
    {
        let before = open_targets(&self.browser).await;
        let url_before = self.registry.active_page().url().await.ok().flatten();

        let (result, watched) = tokio::join!(
            click,
            tokio::time::timeout(NEW_PAGE_WAIT, first_new_page(&self.browser, &before))
        );

        if let Ok(new_page) = watched {
            settle(&new_page).await;
            tracing::debug!(target = ?new_page.target_id(), "Click opened a new page");
            self.registry.set_active_page(new_page);
            return result;
        }

        // The watch timed out. Diff a fresh snapshot in case the event was
        // simply slower than our budget.
        let after = self.browser.pages().await.unwrap_or_default();
        let appeared: Vec<Page> = after
            .into_iter()
            .filter(|p| !before.contains(p.target_id()))
            .collect();

        if let Some(new_page) = appeared.into_iter().last() {
            settle(&new_page).await;
            tracing::debug!(target = ?new_page.target_id(), "Click opened a page the watch missed");
            self.registry.set_active_page(new_page);
            return result;
        }

        let url_after = self.registry.active_page().url().await.ok().flatten();
        if url_after != url_before {
            tracing::debug!(from = ?url_before, to = ?url_after, "Click navigated in place");
            settle(self.registry.active_page()).await;
        }

        result
    }
}
