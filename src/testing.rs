//! In-memory stand-ins for the browser, the snapshot file and SMTP.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{FetchError, NotifyError, StoreError};
use crate::fetch::types::PageContent;
use crate::fetch::PageFetcher;
use crate::models::Snapshot;
use crate::notify::{MailTransport, NotificationMessage};
use crate::store::SnapshotStore;

/// Serves queued pages in order; repeats the last one when the queue runs dry.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: Mutex<VecDeque<Result<String, String>>>,
    last: Mutex<Option<Result<String, String>>>,
    calls: AtomicUsize,
    /// When set, each fetch waits for a permit before returning
    gate: Option<Arc<Notify>>,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn pages(pages: impl IntoIterator<Item = String>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            pages: Mutex::new(VecDeque::from([Err(reason.to_string())])),
            ..Default::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<PageContent, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut pages = self.pages.lock().expect("pages lock");
            let mut last = self.last.lock().expect("last lock");
            match pages.pop_front() {
                Some(page) => {
                    *last = Some(page.clone());
                    page
                }
                None => last.clone().unwrap_or_else(|| Err("no page scripted".to_string())),
            }
        };

        next.map(|html| PageContent::new(url, html))
            .map_err(|reason| FetchError::Render {
                url: url.to_string(),
                reason,
            })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Snapshot store backed by a mutex, with switchable failures
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<Snapshot>>,
    saves: AtomicUsize,
    fail_load: bool,
    fail_save: bool,
}

impl MemoryStore {
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Default::default()
        }
    }

    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn current(&self) -> Option<Snapshot> {
        self.snapshot.lock().expect("snapshot lock").clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn io_error(&self) -> StoreError {
        StoreError::Io {
            path: "memory".into(),
            source: std::io::Error::other("injected failure"),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        if self.fail_load {
            return Err(self.io_error());
        }
        Ok(self.current())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if self.fail_save {
            return Err(self.io_error());
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.lock().expect("snapshot lock") = Some(snapshot.clone());
        Ok(())
    }
}

/// Records every message; optionally fails the first `failures` sends.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<NotificationMessage>>,
    attempts: AtomicUsize,
    failures: usize,
}

impl RecordingTransport {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(NotifyError::Address {
                address: message.recipient.clone(),
                reason: "injected failure".to_string(),
            });
        }
        self.sent.lock().expect("sent lock").push(message.clone());
        Ok(())
    }
}

/// Listing page in the layout the extractor expects
pub fn listing_page(rows: &[(&str, &str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(unit, price, status)| {
            format!(
                "<tr><td>{unit}</td><td>Single, balcony</td><td>Inner courtyard</td>\
                 <td>27.17</td><td>{price}</td><td>{status}</td></tr>"
            )
        })
        .collect();
    format!("<html><body><table><tbody>{body}</tbody></table></body></html>")
}
