use std::ffi::OsStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetch::traits::PageFetcher;
use crate::fetch::types::{BrowserOptions, PageContent};

/// Markup that shows the listing table has been rendered
const CONTENT_READY_SELECTOR: &str = "tr[data-apartment], .apartment-row, tbody tr, table";

/// Fetcher that renders the page in headless Chrome.
///
/// The listing table is filled in client-side, so a plain GET only sees a
/// "Loading data..." placeholder. A fresh browser is launched per fetch and
/// torn down afterwards; a long-lived Chrome in a scale-to-zero container
/// tends to die between triggers.
pub struct BrowserFetcher {
    options: BrowserOptions,
    /// Held for as long as a Chrome process is alive
    chrome: Arc<Mutex<()>>,
}

impl BrowserFetcher {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            chrome: Arc::new(Mutex::new(())),
        }
    }

    fn render(options: &BrowserOptions, url: &str, timeout: Duration) -> anyhow::Result<String> {
        let started = Instant::now();
        info!(url, "launching headless Chrome");

        let launch = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .window_size(Some(options.window_size))
            .path(options.chrome_path.clone())
            .idle_browser_timeout(timeout)
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
            ])
            .build()
            .map_err(|e| anyhow::anyhow!("invalid launch options: {e}"))?;

        let browser = Browser::new(launch)?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(timeout);
        tab.set_user_agent(&options.user_agent, None, None)?;

        tab.navigate_to(url)?;
        tab.set_default_timeout(timeout.saturating_sub(started.elapsed()));
        tab.wait_until_navigated()?;

        // Best effort: an empty table is still worth handing to the extractor
        let remaining = timeout.saturating_sub(started.elapsed());
        match tab.wait_for_element_with_custom_timeout(CONTENT_READY_SELECTOR, remaining) {
            Ok(_) => debug!("listing markup detected"),
            Err(e) => warn!(error = %e, "timed out waiting for listing markup, continuing"),
        }

        let settle = options
            .settle_delay
            .min(timeout.saturating_sub(started.elapsed()));
        debug!(settle_ms = settle.as_millis() as u64, "waiting for rendering to settle");
        thread::sleep(settle);

        let html = tab.get_content()?;
        info!(
            url,
            bytes = html.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "captured rendered page"
        );
        Ok(html)
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageContent, FetchError> {
        let options = self.options.clone();
        let target = url.to_string();
        let html = run_exclusive(&self.chrome, url, timeout, move || {
            Self::render(&options, &target, timeout)
        })
        .await?;
        Ok(PageContent::new(url, html))
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

/// Run blocking browser work on the blocking pool, one job at a time.
///
/// The guard travels with the blocking closure, so a job abandoned by the
/// timeout keeps the lock until its thread returns and no second Chrome
/// starts alongside it. Waiting for that lock counts against `timeout`.
async fn run_exclusive<T, F>(
    lock: &Arc<Mutex<()>>,
    url: &str,
    timeout: Duration,
    work: F,
) -> Result<T, FetchError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let lock = Arc::clone(lock);
    let job = async move {
        let guard = lock.lock_owned().await;
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            work()
        })
        .await
    };

    match tokio::time::timeout(timeout, job).await {
        Err(_) => Err(FetchError::Timeout {
            url: url.to_string(),
            timeout,
        }),
        Ok(Err(join)) => Err(FetchError::Render {
            url: url.to_string(),
            reason: format!("browser task panicked: {join}"),
        }),
        Ok(Ok(Err(e))) => Err(FetchError::Render {
            url: url.to_string(),
            reason: format!("{e:#}"),
        }),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}
