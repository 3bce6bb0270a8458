use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Raw page content as returned by a fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub url: String,
    pub html: String,
}

impl PageContent {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// Headless Chrome launch settings
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub user_agent: String,
    /// Explicit Chrome binary; auto-detected when unset
    pub chrome_path: Option<PathBuf>,
    pub window_size: (u32, u32),
    /// Extra wait after navigation so client-side rendering can fill the table
    pub settle_delay: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chrome_path: None,
            window_size: (1920, 1080),
            settle_delay: Duration::from_secs(10),
        }
    }
}
