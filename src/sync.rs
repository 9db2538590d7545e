//! Batch orchestration: full refresh of the local mirror and bulk
//! relation mutations.
//!
//! One batch runs at a time; a second caller gets [`FoloError::Busy`]
//! instead of queueing. Cancellation is polled between work units, so a
//! request in flight always completes and the report stays consistent
//! with what actually reached the remote.

use crate::api::{ApiClient, FollowingPage, RelationAct};
use crate::error::{FoloError, Result};
use crate::model::FollowedUser;
use crate::store::RelationStore;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// The remote operations a batch needs. [`ApiClient`] is the live
/// implementation; tests substitute their own.
pub trait RelationClient: Send + Sync {
    /// Fetch one page of the following list.
    fn following_page(
        &self,
        pn: u32,
        ps: u32,
    ) -> impl Future<Output = Result<FollowingPage>> + Send;

    /// Follow or unfollow one account.
    fn modify_relation(
        &self,
        fid: &str,
        act: RelationAct,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl RelationClient for ApiClient {
    async fn following_page(&self, pn: u32, ps: u32) -> Result<FollowingPage> {
        Self::following_page(self, pn, ps).await
    }

    async fn modify_relation(&self, fid: &str, act: RelationAct) -> Result<()> {
        Self::modify_relation(self, fid, act).await
    }
}

/// Outcome tally of one batch mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// True when the batch stopped early on a cancellation request.
    /// Unprocessed units count as neither success nor failure.
    pub cancelled: bool,
}

/// Progress of one batch, reported after each completed unit.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub done: usize,
    pub total: usize,
    pub current_id: String,
    pub succeeded: bool,
}

/// Progress of a full refresh, reported after each fetched page.
#[derive(Debug, Clone, Copy)]
pub struct FetchProgress {
    pub fetched: usize,
    pub reported_total: u64,
    pub page: u32,
}

/// Serializes batches over the store and enforces the one-at-a-time
/// guard.
pub struct SyncOrchestrator<C> {
    client: C,
    store: Arc<RelationStore>,
    busy: AtomicBool,
    cancel: AtomicBool,
    page_size: u32,
    test_mode: bool,
    max_test_operations: usize,
}

/// Releases the busy flag when the batch scope ends, error paths
/// included.
#[derive(Debug)]
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<C: RelationClient> SyncOrchestrator<C> {
    pub fn new(client: C, store: Arc<RelationStore>, page_size: u32) -> Self {
        Self {
            client,
            store,
            busy: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
            page_size: page_size.max(1),
            test_mode: false,
            max_test_operations: 5,
        }
    }

    /// Simulate mutations instead of sending them, capped at
    /// `max_operations` units per batch. Fetches still hit the remote.
    #[must_use]
    pub fn with_test_mode(mut self, enabled: bool, max_operations: usize) -> Self {
        self.test_mode = enabled;
        self.max_test_operations = max_operations;
        self
    }

    /// Whether a batch is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Ask the running batch to stop after its current unit.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn acquire(&self) -> Result<BusyGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(FoloError::Busy);
        }
        self.cancel.store(false, Ordering::SeqCst);
        Ok(BusyGuard(&self.busy))
    }

    /// Refresh the local mirror from the remote, page by page.
    ///
    /// A failed later page keeps what was gathered so far: the partial
    /// set still replaces the snapshot and is persisted, which beats
    /// losing the session's work to one bad page. An empty result never
    /// replaces the mirror: a first-page failure surfaces as the error,
    /// and a cancelled or empty fetch leaves the existing snapshot
    /// untouched. Returns the number of accounts now in the mirror.
    ///
    /// # Errors
    ///
    /// Credential and authentication failures abort before anything is
    /// replaced; a failure before the first entity arrives propagates;
    /// persistence failures surface after the swap.
    pub async fn fetch_all(&self, progress: impl Fn(FetchProgress)) -> Result<usize> {
        let _busy = self.acquire()?;

        let mut users: Vec<FollowedUser> = Vec::new();
        let mut pn: u32 = 1;

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!(pages = pn - 1, "Fetch cancelled");
                break;
            }

            match self.client.following_page(pn, self.page_size).await {
                Ok(page) => {
                    let got = page.list.len();
                    users.extend(page.list.into_iter().map(FollowedUser::from));
                    progress(FetchProgress {
                        fetched: users.len(),
                        reported_total: page.total,
                        page: pn,
                    });
                    debug!(page = pn, got, total = page.total, "Fetched page");
                    if got < self.page_size as usize {
                        break;
                    }
                    pn += 1;
                }
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) if users.is_empty() => return Err(e),
                Err(e) => {
                    warn!(page = pn, error = %e, "Page fetch failed, keeping pages gathered so far");
                    break;
                }
            }
        }

        if users.is_empty() {
            warn!("Fetch gathered no accounts, keeping the existing mirror");
            return Ok(self.store.snapshot().total_count);
        }

        let snapshot = self.store.replace_all(users);
        self.store.persist()?;
        info!(total = snapshot.total_count, "Mirror refreshed");
        Ok(snapshot.total_count)
    }

    /// Unfollow every id in `ids`, then drop the succeeded ones from the
    /// local mirror.
    ///
    /// Per-unit failures are tallied and the batch continues; only
    /// authentication and configuration failures abort early. Ids the
    /// remote reports as not-followed count as success.
    ///
    /// # Errors
    ///
    /// `Busy` when a batch is already running; batch-fatal errors as
    /// above; persistence failures after the store update.
    pub async fn batch_unfollow(
        &self,
        ids: &[String],
        progress: impl Fn(BatchProgress),
    ) -> Result<BatchReport> {
        let _busy = self.acquire()?;
        let ids = self.cap_for_test_mode(ids);

        let mut report = BatchReport {
            total: ids.len(),
            ..BatchReport::default()
        };
        let mut succeeded: HashSet<String> = HashSet::new();

        for (i, id) in ids.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                report.cancelled = true;
                info!(done = i, total = ids.len(), "Unfollow batch cancelled");
                break;
            }

            let result = self.perform(id, RelationAct::Unfollow).await;
            let ok = match result {
                Ok(()) => {
                    report.success += 1;
                    succeeded.insert(id.clone());
                    true
                }
                Err(e) if e.is_batch_fatal() => {
                    self.settle(&succeeded)?;
                    return Err(e);
                }
                Err(e) => {
                    warn!(id, error = %e, "Unfollow failed");
                    report.failed += 1;
                    false
                }
            };

            progress(BatchProgress {
                done: i + 1,
                total: ids.len(),
                current_id: id.clone(),
                succeeded: ok,
            });
        }

        self.settle(&succeeded)?;
        info!(
            total = report.total,
            success = report.success,
            failed = report.failed,
            cancelled = report.cancelled,
            "Unfollow batch finished"
        );
        Ok(report)
    }

    /// Follow every id in `ids`. The local mirror is not patched; run a
    /// fetch afterwards to pick up the remote's canonical entries.
    ///
    /// # Errors
    ///
    /// Same contract as [`Self::batch_unfollow`].
    pub async fn batch_follow(
        &self,
        ids: &[String],
        progress: impl Fn(BatchProgress),
    ) -> Result<BatchReport> {
        let _busy = self.acquire()?;
        let ids = self.cap_for_test_mode(ids);

        let mut report = BatchReport {
            total: ids.len(),
            ..BatchReport::default()
        };

        for (i, id) in ids.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                report.cancelled = true;
                info!(done = i, total = ids.len(), "Follow batch cancelled");
                break;
            }

            let ok = match self.perform(id, RelationAct::Follow).await {
                Ok(()) => {
                    report.success += 1;
                    true
                }
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    warn!(id, error = %e, "Follow failed");
                    report.failed += 1;
                    false
                }
            };

            progress(BatchProgress {
                done: i + 1,
                total: ids.len(),
                current_id: id.clone(),
                succeeded: ok,
            });
        }

        info!(
            total = report.total,
            success = report.success,
            failed = report.failed,
            cancelled = report.cancelled,
            "Follow batch finished"
        );
        Ok(report)
    }

    /// In test mode the batch is trimmed to the configured cap; the
    /// report's total reflects the trimmed size.
    fn cap_for_test_mode<'a>(&self, ids: &'a [String]) -> &'a [String] {
        if self.test_mode && ids.len() > self.max_test_operations {
            warn!(
                requested = ids.len(),
                cap = self.max_test_operations,
                "Test mode, trimming batch to cap"
            );
            &ids[..self.max_test_operations]
        } else {
            ids
        }
    }

    /// One mutation unit, honoring test mode.
    async fn perform(&self, id: &str, act: RelationAct) -> Result<()> {
        if self.test_mode {
            info!(id, ?act, "Test mode, simulating");
            return Ok(());
        }
        self.client.modify_relation(id, act).await
    }

    /// Drop succeeded removals from the mirror and persist.
    fn settle(&self, succeeded: &HashSet<String>) -> Result<()> {
        if succeeded.is_empty() {
            return Ok(());
        }
        self.store.remove(succeeded);
        self.store.persist()
    }
}
