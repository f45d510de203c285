//! Browser session ownership.
//!
//! A session wraps one launched Chrome instance plus the page registry that
//! tracks which tab/frame subsequent tool calls operate on. The manager holds
//! every live session keyed by id; the most-recently-created session is the
//! active one (there is no session-switch tool).

use chromiumoxide::{
    browser::{Browser, BrowserConfig},
    fetcher::{BrowserFetcher, BrowserFetcherOptions},
};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::BrowserError;
use crate::registry::PageRegistry;

/// Default viewport dimensions
const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;

/// Launch-time knobs, read from the environment once per launch.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Run Chrome headless (default). `TABPILOT_HEADLESS=0` runs headful.
    pub headless: bool,
    /// Explicit Chrome binary, bypassing discovery. `TABPILOT_CHROME`.
    pub executable: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn from_env() -> Self {
        let headless = std::env::var("TABPILOT_HEADLESS")
            .map(|v| !matches!(v.as_str(), "0" | "false" | "no"))
            .unwrap_or(true);
        let executable = std::env::var("TABPILOT_CHROME").ok().map(PathBuf::from);
        Self {
            headless,
            executable,
        }
    }
}

/// One browser instance and the page-context state that goes with it.
pub struct Session {
    pub id: String,
    pub(crate) browser: Browser,
    #[allow(dead_code)] // Task must stay alive for CDP traffic to flow
    handler_task: JoinHandle<()>,
    pub registry: PageRegistry,
}

impl Session {
    /// Directory where the fetcher caches downloaded Chrome binaries
    fn fetcher_cache_dir() -> PathBuf {
        let base = std::env::var("HOME").map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from);
        base.join(".cache/tabpilot/chromium")
    }

    fn user_data_dir(session_id: &str) -> String {
        format!("/tmp/tabpilot-chrome-{session_id}")
    }

    /// Build a `BrowserConfig` with optional explicit Chrome executable path
    fn browser_config(
        session_id: &str,
        opts: &LaunchOptions,
        executable: Option<&Path>,
    ) -> Result<BrowserConfig, BrowserError> {
        let user_data_dir = Self::user_data_dir(session_id);

        // Remove stale user data directory to avoid Chrome SingletonLock
        // conflicts from a previous crash or test run
        let _ = std::fs::remove_dir_all(&user_data_dir);

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer")
            .user_data_dir(&user_data_dir)
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: DEFAULT_VIEWPORT_WIDTH,
                height: DEFAULT_VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            });

        builder = if opts.headless {
            builder.new_headless_mode()
        } else {
            builder.with_head()
        };

        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(BrowserError::LaunchFailed)
    }

    /// Launch browser, spawn its CDP handler loop, and open one blank page
    async fn launch_and_init(
        session_id: &str,
        opts: &LaunchOptions,
        executable: Option<&Path>,
    ) -> Result<Self, BrowserError> {
        let config = Self::browser_config(session_id, opts, executable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("CDP handler error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        Ok(Self {
            id: session_id.to_string(),
            browser,
            handler_task,
            registry: PageRegistry::new(page),
        })
    }

    /// Create a new browser session.
    ///
    /// Tries the configured or system Chrome first (zero download). On
    /// failure, downloads a compatible Chromium via `BrowserFetcher` and
    /// caches it for future runs.
    pub async fn new(session_id: &str) -> Result<Self, BrowserError> {
        let opts = LaunchOptions::from_env();

        // 1. Explicit or system Chrome (no executable — chromiumoxide finds it)
        match Self::launch_and_init(session_id, &opts, opts.executable.as_deref()).await {
            Ok(session) => return Ok(session),
            Err(e) => {
                tracing::info!("System Chrome not available ({e}), trying fetcher...");
            }
        }

        // 2. Download / use cached Chrome via fetcher
        let cache_dir = Self::fetcher_cache_dir();
        tracing::info!("Downloading Chrome to {cache_dir:?} (first run only)...");

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            BrowserError::LaunchFailed(format!(
                "Failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;

        let fetcher_opts = BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .map_err(|e| BrowserError::LaunchFailed(format!("Fetcher config error: {e}")))?;

        let fetcher = BrowserFetcher::new(fetcher_opts);
        let info = fetcher
            .fetch()
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("Chrome download failed: {e:#}")))?;

        tracing::info!("Using Chrome at {:?}", info.executable_path);

        Self::launch_and_init(session_id, &opts, Some(&info.executable_path)).await
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    /// Switch the registry's active page to the page at `index`.
    pub async fn switch_to_page(
        &mut self,
        index: usize,
    ) -> Result<crate::registry::PageInfo, BrowserError> {
        let Self {
            browser, registry, ..
        } = self;
        registry.switch_to(browser, index).await
    }
}

/// Owns every live session. The last-created session is the active one.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    active: RwLock<Option<String>>,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        })
    }

    /// The active session, or `NoActiveSession` if none has been created.
    pub async fn active_session(&self) -> Result<Arc<Mutex<Session>>, BrowserError> {
        let active = self.active.read().await;
        let id = active.as_deref().ok_or(BrowserError::NoActiveSession)?;
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or(BrowserError::NoActiveSession)
    }

    /// The active session, creating one first if none exists. Idempotent.
    pub async fn ensure_session(&self) -> Result<Arc<Mutex<Session>>, BrowserError> {
        if let Ok(session) = self.active_session().await {
            return Ok(session);
        }
        self.create_session().await
    }

    /// Launch a fresh browser and make its session the active one.
    pub async fn create_session(&self) -> Result<Arc<Mutex<Session>>, BrowserError> {
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session_id = %id, "Creating new browser session");
        let session = Arc::new(Mutex::new(Session::new(&id).await?));

        self.sessions
            .write()
            .await
            .insert(id.clone(), session.clone());
        *self.active.write().await = Some(id);

        Ok(session)
    }

    /// Shut every browser down. Failures are logged, never propagated:
    /// shutdown must not hang.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        *self.active.write().await = None;

        let count = sessions.len();
        if count > 0 {
            tracing::info!(count, "Shutting down all browser sessions");
        }

        for (id, session) in sessions.drain() {
            let mut guard = session.lock().await;
            if let Err(e) = guard.browser.close().await {
                tracing::warn!(session_id = %id, error = %e, "Browser close failed");
            }
            drop(guard);

            let user_data_dir = Session::user_data_dir(&id);
            if let Err(e) = tokio::fs::remove_dir_all(&user_data_dir).await {
                tracing::debug!(path = %user_data_dir, error = %e, "Failed to clean up browser data dir");
            }
        }
    }
}
