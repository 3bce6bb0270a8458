use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::differ::{diff, DiffResult, DiffSummary};
use crate::error::{NotifyError, PipelineError, RunError};
use crate::extractor::ListingExtractor;
use crate::fetch::PageFetcher;
use crate::models::Snapshot;
use crate::notify::{Notifier, NotifyOutcome};
use crate::store::SnapshotStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Fetching,
    Extracting,
    Diffing,
    Notifying,
    Persisting,
    Failed,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStage::Idle => "idle",
            RunStage::Fetching => "fetching",
            RunStage::Extracting => "extracting",
            RunStage::Diffing => "diffing",
            RunStage::Notifying => "notifying",
            RunStage::Persisting => "persisting",
            RunStage::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub target_url: String,
    pub recipient: String,
    pub fetch_timeout: Duration,
    /// Bound on fetching through notifying; persisting is never cut short
    pub run_timeout: Duration,
    pub notify_on_baseline: bool,
    pub notify_max_attempts: u32,
    pub notify_backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    NoChange,
    Notified,
    Baseline,
    AlreadyRunning,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::NoChange => "no_change",
            RunOutcome::Notified => "notified",
            RunOutcome::Baseline => "baseline",
            RunOutcome::AlreadyRunning => "already_running",
        }
    }
}

/// Result of a run that did not fail
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Option<Uuid>,
    pub outcome: RunOutcome,
    pub finished_at: DateTime<Utc>,
    pub listings: usize,
    pub summary: DiffSummary,
    pub snapshot_updated: bool,
}

/// What `/status` shows about the most recent finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub status: &'static str,
    pub stage: RunStage,
    pub finished_at: DateTime<Utc>,
    pub summary: DiffSummary,
    pub snapshot_updated: bool,
    pub error: Option<String>,
}

/// Everything computed before the snapshot is touched
struct CheckedRun {
    previous: Option<Snapshot>,
    current: Snapshot,
    diff: DiffResult,
    notified: Result<NotifyOutcome, NotifyError>,
}

/// Runs one end-to-end check at a time: fetch, extract, diff, notify, persist.
pub struct RunCoordinator {
    fetcher: Arc<dyn PageFetcher>,
    extractor: ListingExtractor,
    store: Arc<dyn SnapshotStore>,
    notifier: Notifier,
    settings: RunSettings,
    in_flight: Arc<Mutex<()>>,
    stage: watch::Sender<RunStage>,
    last_run: RwLock<Option<RunRecord>>,
}

impl RunCoordinator {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn SnapshotStore>,
        notifier: Notifier,
        settings: RunSettings,
    ) -> Self {
        let (stage, _) = watch::channel(RunStage::Idle);
        Self {
            fetcher,
            extractor: ListingExtractor::new(),
            store,
            notifier,
            settings,
            in_flight: Arc::new(Mutex::new(())),
            stage,
            last_run: RwLock::new(None),
        }
    }

    pub fn stage(&self) -> RunStage {
        *self.stage.borrow()
    }

    pub async fn last_run(&self) -> Option<RunRecord> {
        self.last_run.read().await.clone()
    }

    pub async fn snapshot(&self) -> Result<Option<Snapshot>, crate::error::StoreError> {
        self.store.load().await
    }

    pub async fn send_test_email(&self) -> Result<(), NotifyError> {
        self.notifier.send_test(&self.settings.recipient).await
    }

    /// Start a run unless one is already in progress.
    ///
    /// A concurrent trigger is not queued: it returns
    /// [`RunOutcome::AlreadyRunning`] straight away.
    ///
    /// The run itself is a spawned task holding the in-flight guard. If the
    /// caller goes away (an HTTP client disconnecting, say) the run still
    /// finishes, records itself and releases the gate.
    pub async fn trigger(self: &Arc<Self>) -> Result<RunReport, RunError> {
        let Ok(guard) = Arc::clone(&self.in_flight).try_lock_owned() else {
            info!(stage = %self.stage(), "check already in progress, ignoring trigger");
            return Ok(RunReport {
                run_id: None,
                outcome: RunOutcome::AlreadyRunning,
                finished_at: Utc::now(),
                listings: 0,
                summary: DiffSummary::default(),
                snapshot_updated: false,
            });
        };

        let run_id = Uuid::new_v4();
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let _guard = guard;
            coordinator.execute(run_id).await
        });

        match task.await {
            Ok(result) => result,
            Err(join) => {
                let stage = self.stage();
                self.set_stage(RunStage::Failed);
                error!(%run_id, %stage, error = %join, "check task did not finish");
                let err = fail(stage, PipelineError::Aborted(join.to_string()), false);
                *self.last_run.write().await = Some(RunRecord {
                    run_id,
                    status: "error",
                    stage,
                    finished_at: Utc::now(),
                    summary: DiffSummary::default(),
                    snapshot_updated: false,
                    error: Some(err.source.to_string()),
                });
                Err(err)
            }
        }
    }

    /// One run from start to recorded result
    async fn execute(&self, run_id: Uuid) -> Result<RunReport, RunError> {
        let result = self
            .run(run_id)
            .instrument(info_span!("run", %run_id))
            .await;

        let record = match &result {
            Ok(report) => {
                self.set_stage(RunStage::Idle);
                info!(
                    %run_id,
                    outcome = report.outcome.as_str(),
                    added = report.summary.added,
                    removed = report.summary.removed,
                    changed = report.summary.changed,
                    "✅ check finished"
                );
                RunRecord {
                    run_id,
                    status: report.outcome.as_str(),
                    stage: RunStage::Idle,
                    finished_at: report.finished_at,
                    summary: report.summary,
                    snapshot_updated: report.snapshot_updated,
                    error: None,
                }
            }
            Err(e) => {
                self.set_stage(RunStage::Failed);
                error!(%run_id, stage = %e.stage, error = %e.source, snapshot_updated = e.snapshot_updated, "check failed");
                RunRecord {
                    run_id,
                    status: "error",
                    stage: e.stage,
                    finished_at: Utc::now(),
                    summary: DiffSummary::default(),
                    snapshot_updated: e.snapshot_updated,
                    error: Some(e.source.to_string()),
                }
            }
        };
        *self.last_run.write().await = Some(record);

        result
    }

    async fn run(&self, run_id: Uuid) -> Result<RunReport, RunError> {
        info!(url = %self.settings.target_url, fetcher = self.fetcher.name(), "starting check");

        let checked = match tokio::time::timeout(self.settings.run_timeout, self.check()).await {
            Ok(checked) => checked?,
            Err(_) => {
                let stage = self.stage();
                warn!(%stage, timeout_secs = self.settings.run_timeout.as_secs(), "check timed out");
                return Err(fail(stage, PipelineError::Timeout(self.settings.run_timeout), false));
            }
        };

        let CheckedRun {
            previous,
            current,
            diff,
            notified,
        } = checked;

        let snapshot_updated = if previous.is_some() && diff.is_empty() {
            info!("listings unchanged, keeping stored snapshot");
            false
        } else {
            self.set_stage(RunStage::Persisting);
            self.store
                .save(&current)
                .await
                .map_err(|e| fail(RunStage::Persisting, e.into(), false))?;
            true
        };

        let outcome = match notified {
            Err(e) => return Err(fail(RunStage::Notifying, e.into(), snapshot_updated)),
            Ok(_) if diff.baseline => RunOutcome::Baseline,
            Ok(NotifyOutcome::Sent) => RunOutcome::Notified,
            Ok(NotifyOutcome::Skipped) => RunOutcome::NoChange,
        };

        Ok(RunReport {
            run_id: Some(run_id),
            outcome,
            finished_at: Utc::now(),
            listings: current.listings.len(),
            summary: diff.summary(),
            snapshot_updated,
        })
    }

    /// Fetch through notify. Nothing here writes the snapshot.
    async fn check(&self) -> Result<CheckedRun, RunError> {
        self.set_stage(RunStage::Fetching);
        let page = self
            .fetcher
            .fetch(&self.settings.target_url, self.settings.fetch_timeout)
            .await
            .map_err(|e| fail(RunStage::Fetching, e.into(), false))?;
        info!(url = %page.url, bytes = page.html.len(), "fetched listing page");

        self.set_stage(RunStage::Extracting);
        let observed_at = Utc::now();
        let listings = self
            .extractor
            .extract(&page.html, observed_at)
            .map_err(|e| fail(RunStage::Extracting, e.into(), false))?;

        self.set_stage(RunStage::Diffing);
        let previous = self
            .store
            .load()
            .await
            .map_err(|e| fail(RunStage::Diffing, e.into(), false))?;
        let diff = diff(previous.as_ref().map(|s| &s.listings), &listings);
        let summary = diff.summary();
        info!(
            listings = listings.len(),
            added = summary.added,
            removed = summary.removed,
            changed = summary.changed,
            baseline = diff.baseline,
            "computed diff"
        );

        self.set_stage(RunStage::Notifying);
        let notified = if diff.baseline && !self.settings.notify_on_baseline {
            info!(listings = listings.len(), "baseline run, notification suppressed");
            Ok(NotifyOutcome::Skipped)
        } else {
            self.notify_with_retry(&diff).await
        };

        Ok(CheckedRun {
            previous,
            current: Snapshot::new(listings, observed_at),
            diff,
            notified,
        })
    }

    async fn notify_with_retry(&self, diff: &DiffResult) -> Result<NotifyOutcome, NotifyError> {
        let attempts = self.settings.notify_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.notifier.notify(diff, &self.settings.recipient).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < attempts => {
                    warn!(attempt, max_attempts = attempts, error = %e, "notification failed, retrying");
                    tokio::time::sleep(self.settings.notify_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(attempts, error = %e, "giving up on notification");
                    return Err(e);
                }
            }
        }
    }

    fn set_stage(&self, stage: RunStage) {
        self.stage.send_replace(stage);
    }
}

fn fail(stage: RunStage, source: PipelineError, snapshot_updated: bool) -> RunError {
    RunError {
        stage,
        source,
        snapshot_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{listing, observed, set_of};
    use crate::testing::{listing_page, MemoryStore, RecordingTransport, ScriptedFetcher};
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;

    const URL: &str = "https://www.apartments-hn.de/en/book-apartment";

    fn settings() -> RunSettings {
        RunSettings {
            target_url: URL.to_string(),
            recipient: "me@example.test".to_string(),
            fetch_timeout: Duration::from_secs(5),
            run_timeout: Duration::from_secs(5),
            notify_on_baseline: false,
            notify_max_attempts: 3,
            notify_backoff: Duration::ZERO,
        }
    }

    struct Harness {
        coordinator: Arc<RunCoordinator>,
        fetcher: Arc<ScriptedFetcher>,
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
    }

    fn harness(
        fetcher: ScriptedFetcher,
        store: MemoryStore,
        transport: RecordingTransport,
        settings: RunSettings,
    ) -> Harness {
        let fetcher = Arc::new(fetcher);
        let store = Arc::new(store);
        let transport = Arc::new(transport);
        let notifier = Notifier::new(transport.clone(), URL);
        let coordinator = Arc::new(RunCoordinator::new(
            fetcher.clone(),
            store.clone(),
            notifier,
            settings,
        ));
        Harness {
            coordinator,
            fetcher,
            store,
            transport,
        }
    }

    /// Units "1/ 101" -> id "1-101" etc.
    fn page_ab() -> String {
        listing_page(&[
            ("1/ 101", "1000.00", "Already taken"),
            ("1/ 102", "1200.00", "Already taken"),
        ])
    }

    fn page_bc() -> String {
        listing_page(&[
            ("1/ 102", "1250.00", "Already taken"),
            ("1/ 103", "900.00", "Apply now"),
        ])
    }

    fn stored_ids(store: &MemoryStore) -> Vec<String> {
        store
            .current()
            .expect("snapshot stored")
            .listings
            .ids()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn first_run_persists_baseline_without_mail() {
        let h = harness(
            ScriptedFetcher::pages([page_ab()]),
            MemoryStore::default(),
            RecordingTransport::default(),
            settings(),
        );

        let report = h.coordinator.trigger().await.expect("run");

        assert_eq!(report.outcome, RunOutcome::Baseline);
        assert!(report.snapshot_updated);
        assert_eq!(report.summary.added, 2);
        assert!(h.transport.sent().is_empty());
        assert_eq!(stored_ids(&h.store), vec!["1-101", "1-102"]);
        assert_eq!(h.coordinator.stage(), RunStage::Idle);
    }

    #[tokio::test]
    async fn baseline_mail_can_be_enabled() {
        let h = harness(
            ScriptedFetcher::pages([page_ab()]),
            MemoryStore::default(),
            RecordingTransport::default(),
            RunSettings {
                notify_on_baseline: true,
                ..settings()
            },
        );

        let report = h.coordinator.trigger().await.expect("run");

        assert_eq!(report.outcome, RunOutcome::Baseline);
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn add_remove_change_notifies_once_and_persists_current() {
        let h = harness(
            ScriptedFetcher::pages([page_ab(), page_bc()]),
            MemoryStore::default(),
            RecordingTransport::default(),
            settings(),
        );
        h.coordinator.trigger().await.expect("baseline run");

        let report = h.coordinator.trigger().await.expect("second run");

        assert_eq!(report.outcome, RunOutcome::Notified);
        assert_eq!(
            report.summary,
            DiffSummary {
                added: 1,
                removed: 1,
                changed: 1
            }
        );
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("NEW (1)\n  - 1-103"));
        assert!(sent[0].body.contains("REMOVED (1)\n  - 1-101"));
        assert!(sent[0].body.contains("price: €1200.00 -> €1250.00"));

        let stored = h.store.current().expect("snapshot");
        assert_eq!(stored_ids(&h.store), vec!["1-102", "1-103"]);
        assert_eq!(stored.listings.get("1-102").and_then(|r| r.price), Some(dec!(1250.00)));
    }

    #[tokio::test]
    async fn repeated_runs_without_change_never_renotify_or_rewrite() {
        let h = harness(
            ScriptedFetcher::pages([page_ab(), page_bc()]),
            MemoryStore::default(),
            RecordingTransport::default(),
            settings(),
        );
        h.coordinator.trigger().await.expect("baseline");
        h.coordinator.trigger().await.expect("change");
        let after_change = h.store.current();
        let saves = h.store.saves();

        // The fetcher keeps serving the last page
        let first = h.coordinator.trigger().await.expect("repeat 1");
        let second = h.coordinator.trigger().await.expect("repeat 2");

        for report in [&first, &second] {
            assert_eq!(report.outcome, RunOutcome::NoChange);
            assert_eq!(report.summary, DiffSummary::default());
            assert!(!report.snapshot_updated);
        }
        assert_eq!(h.transport.sent().len(), 1);
        assert_eq!(h.store.saves(), saves);
        assert_eq!(h.store.current(), after_change);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_snapshot_untouched() {
        let previous = Snapshot::new(set_of(vec![listing("1-101", dec!(1000))]), observed());
        let h = harness(
            ScriptedFetcher::failing("chrome crashed"),
            MemoryStore::with_snapshot(previous.clone()),
            RecordingTransport::default(),
            settings(),
        );

        let err = h.coordinator.trigger().await.expect_err("run fails");

        assert_eq!(err.stage, RunStage::Fetching);
        assert!(matches!(err.source, PipelineError::Fetch(_)));
        assert!(!err.snapshot_updated);
        assert_eq!(h.store.current(), Some(previous));
        assert_eq!(h.store.saves(), 0);
        assert!(h.transport.sent().is_empty());
        assert_eq!(h.coordinator.stage(), RunStage::Failed);

        let record = h.coordinator.last_run().await.expect("record");
        assert_eq!(record.status, "error");
        assert_eq!(record.stage, RunStage::Fetching);
    }

    #[tokio::test]
    async fn parse_failure_aborts_before_diff() {
        let previous = Snapshot::new(set_of(vec![listing("1-101", dec!(1000))]), observed());
        let h = harness(
            ScriptedFetcher::pages(["<html><body>Loading data...</body></html>".to_string()]),
            MemoryStore::with_snapshot(previous.clone()),
            RecordingTransport::default(),
            settings(),
        );

        let err = h.coordinator.trigger().await.expect_err("run fails");

        assert_eq!(err.stage, RunStage::Extracting);
        assert!(matches!(err.source, PipelineError::Parse(_)));
        assert_eq!(h.store.current(), Some(previous));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn store_load_failure_aborts_run() {
        let h = harness(
            ScriptedFetcher::pages([page_ab()]),
            MemoryStore::default().failing_load(),
            RecordingTransport::default(),
            settings(),
        );

        let err = h.coordinator.trigger().await.expect_err("run fails");

        assert_eq!(err.stage, RunStage::Diffing);
        assert!(matches!(err.source, PipelineError::Store(_)));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn store_save_failure_reports_persisting() {
        let previous = Snapshot::new(set_of(vec![listing("1-101", dec!(1000))]), observed());
        let h = harness(
            ScriptedFetcher::pages([page_bc()]),
            MemoryStore::with_snapshot(previous.clone()).failing_save(),
            RecordingTransport::default(),
            settings(),
        );

        let err = h.coordinator.trigger().await.expect_err("run fails");

        assert_eq!(err.stage, RunStage::Persisting);
        assert!(!err.snapshot_updated);
        assert_eq!(h.store.current(), Some(previous));
        // Notify runs before persist
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn notify_is_retried_before_giving_up() {
        let h = harness(
            ScriptedFetcher::pages([page_ab(), page_bc()]),
            MemoryStore::default(),
            RecordingTransport::failing(2),
            settings(),
        );
        h.coordinator.trigger().await.expect("baseline");

        let report = h.coordinator.trigger().await.expect("run");

        assert_eq!(report.outcome, RunOutcome::Notified);
        assert_eq!(h.transport.attempts(), 3);
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn notify_failure_still_persists_and_reports_error() {
        let h = harness(
            ScriptedFetcher::pages([page_ab(), page_bc()]),
            MemoryStore::default(),
            RecordingTransport::failing(usize::MAX),
            settings(),
        );
        h.coordinator.trigger().await.expect("baseline");

        let err = h.coordinator.trigger().await.expect_err("notify fails");

        assert_eq!(err.stage, RunStage::Notifying);
        assert!(matches!(err.source, PipelineError::Notify(_)));
        assert!(err.snapshot_updated);
        assert_eq!(h.transport.attempts(), 3);
        assert_eq!(stored_ids(&h.store), vec!["1-102", "1-103"]);
    }

    #[tokio::test]
    async fn concurrent_trigger_is_rejected_while_running() {
        let gate = Arc::new(Notify::new());
        let h = harness(
            ScriptedFetcher::pages([page_ab()]).gated(gate.clone()),
            MemoryStore::default(),
            RecordingTransport::default(),
            settings(),
        );

        let running = {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move { coordinator.trigger().await })
        };
        while h.fetcher.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.coordinator.stage(), RunStage::Fetching);

        let rejected = h.coordinator.trigger().await.expect("rejection is not an error");
        assert_eq!(rejected.outcome, RunOutcome::AlreadyRunning);
        assert!(rejected.run_id.is_none());
        assert_eq!(h.fetcher.calls(), 1);

        gate.notify_one();
        let finished = running.await.expect("join").expect("run");
        assert_eq!(finished.outcome, RunOutcome::Baseline);
        assert_eq!(h.store.saves(), 1);
    }

    #[tokio::test]
    async fn dropped_trigger_still_finishes_run() {
        let h = harness(
            ScriptedFetcher::pages([page_ab()]).delayed(Duration::from_millis(100)),
            MemoryStore::default(),
            RecordingTransport::default(),
            settings(),
        );

        // Caller gives up while the page is still loading
        let abandoned = tokio::time::timeout(Duration::from_millis(20), h.coordinator.trigger()).await;
        assert!(abandoned.is_err());

        let record = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(record) = h.coordinator.last_run().await {
                    return record;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run recorded");

        assert_eq!(record.status, "baseline");
        assert_eq!(h.coordinator.stage(), RunStage::Idle);
        assert_eq!(h.store.saves(), 1);
        assert_eq!(stored_ids(&h.store), vec!["1-101", "1-102"]);

        // Gate released once the detached run is done
        let report = h.coordinator.trigger().await.expect("next run");
        assert_eq!(report.outcome, RunOutcome::NoChange);
    }

    #[tokio::test]
    async fn run_timeout_aborts_without_writing() {
        let h = harness(
            ScriptedFetcher::pages([page_ab()]).delayed(Duration::from_secs(2)),
            MemoryStore::default(),
            RecordingTransport::default(),
            RunSettings {
                run_timeout: Duration::from_millis(50),
                ..settings()
            },
        );

        let err = h.coordinator.trigger().await.expect_err("times out");

        assert_eq!(err.stage, RunStage::Fetching);
        assert!(matches!(err.source, PipelineError::Timeout(_)));
        assert!(h.store.current().is_none());
        assert_eq!(h.store.saves(), 0);

        // The gate is released, so a later trigger runs again
        assert_eq!(h.fetcher.calls(), 1);
        let _ = h.coordinator.trigger().await;
        assert_eq!(h.fetcher.calls(), 2);
    }
}
