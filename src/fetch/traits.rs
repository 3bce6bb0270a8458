use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::fetch::types::PageContent;

/// Something that can retrieve the rendered listing page.
/// The browser and plain HTTP fetchers both implement it, and tests swap in fakes.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, giving up after `timeout`
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<PageContent, FetchError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}
