//! One headless Chromium over CDP, managed as a recyclable session.
//!
//! `SessionManager` owns at most one live browser per pipeline worker:
//! lazy launch on first acquire, best-effort teardown + relaunch on
//! `recycle()`, full teardown on `release()`. All DOM access goes through
//! `SessionHandle` / `DetailTab` in `session.rs`.

pub mod error;
pub mod locator;
pub mod session;

pub use error::{Result, SessionError};
pub use locator::Locator;
pub use session::{DetailTab, SessionHandle};

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use rand::seq::IndexedRandom;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Realistic desktop User-Agents, drawn at random per launch so consecutive
/// sessions do not share an automation fingerprint.
const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
];

fn random_user_agent() -> &'static str {
    let mut rng = rand::rng();
    DESKTOP_USER_AGENTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(DESKTOP_USER_AGENTS[0])
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Explicit browser binary; when `None`, PATH and well-known locations
    /// are scanned.
    pub executable: Option<String>,
    pub window: (u32, u32),
    /// Upper bound on navigation and script evaluation.
    pub nav_timeout: Duration,
    /// Poll cadence for bounded element waits.
    pub poll_interval: Duration,
    /// Skip image loading; listings are text-only and images triple the
    /// per-page transfer.
    pub block_images: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executable: None,
            window: (1920, 1080),
            nav_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            block_images: true,
        }
    }
}

/// Find a usable Chromium-family executable: explicit override, then PATH,
/// then well-known install paths.
pub fn find_chromium_executable(explicit: Option<&str>) -> Option<String> {
    if let Some(p) = explicit {
        if Path::new(p).exists() {
            return Some(p.to_string());
        }
    }

    let candidates = ["chromium", "chromium-browser", "google-chrome", "chrome"];
    if let Ok(path_var) = std::env::var("PATH") {
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    for c in [
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/usr/bin/google-chrome",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ] {
        if Path::new(c).exists() {
            return Some(c.to_string());
        }
    }

    None
}

pub(crate) struct LiveSession {
    pub(crate) browser: Browser,
    pub(crate) page: Page,
    handler: JoinHandle<()>,
}

/// Owns the single live browser session for one pipeline worker.
pub struct SessionManager {
    config: SessionConfig,
    live: Arc<Mutex<Option<LiveSession>>>,
    /// Open detail tabs across the session. Recycling resets it.
    tabs: Arc<AtomicUsize>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            live: Arc::new(Mutex::new(None)),
            tabs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ensure a live browser and hand out a handle to it. The handle stays
    /// valid across `recycle()` — it always operates on the current browser.
    pub async fn acquire(&self) -> Result<SessionHandle> {
        {
            let mut guard = self.live.lock().await;
            if guard.is_none() {
                *guard = Some(self.launch().await?);
            }
        }
        Ok(SessionHandle::new(
            Arc::clone(&self.live),
            Arc::clone(&self.tabs),
            self.config.nav_timeout,
            self.config.poll_interval,
        ))
    }

    /// Tear down and relaunch the browser. Teardown failures are swallowed —
    /// the session must keep making progress; only a failed relaunch surfaces.
    pub async fn recycle(&self) -> Result<()> {
        let mut guard = self.live.lock().await;
        if let Some(old) = guard.take() {
            teardown(old).await;
        }
        self.tabs.store(0, Ordering::SeqCst);
        *guard = Some(self.launch().await?);
        info!("Browser session recycled");
        Ok(())
    }

    /// Close the browser and leave the slot empty.
    pub async fn release(&self) {
        let mut guard = self.live.lock().await;
        if let Some(old) = guard.take() {
            teardown(old).await;
            info!("Browser session released");
        }
        self.tabs.store(0, Ordering::SeqCst);
    }

    async fn launch(&self) -> Result<LiveSession> {
        let exe = find_chromium_executable(self.config.executable.as_deref())
            .ok_or(SessionError::NoExecutable)?;
        let ua = random_user_agent();
        let (width, height) = self.config.window;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&exe)
            .window_size(width, height)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--incognito")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--ignore-certificate-errors")
            .arg("--no-first-run")
            .arg("--mute-audio")
            // Hide the navigator.webdriver automation flag.
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={ua}"));
        if self.config.block_images {
            builder = builder.arg("--blink-settings=imagesEnabled=false");
        }
        let browser_config = builder.build().map_err(SessionError::Launch)?;

        let (mut browser, mut cdp_handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SessionError::Launch(format!("{exe}: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = cdp_handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {e}");
                }
            }
        });

        let page = browser.new_page("about:blank").await?;

        info!(executable = %exe, user_agent = ua, "Browser launched");
        Ok(LiveSession {
            browser,
            page,
            handler,
        })
    }
}

async fn teardown(mut old: LiveSession) {
    if let Err(e) = old.browser.close().await {
        warn!("Browser close failed (ignored): {e}");
    }
    old.handler.abort();
}
