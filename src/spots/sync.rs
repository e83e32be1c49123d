// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Background incremental sync of the spot mirror.
//!
//! A sync asks the remote for changes since the newest `updated_at` already
//! merged, merges them and persists the mirror. The repository lock is never
//! held across the network call.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{RemoteError, RepositoryError, SpotsRemote, SpotsRepository};

/// Errors from a single sync attempt
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("failed to persist spots: {0}")]
    Repository(#[from] RepositoryError),
}

/// Outcome of the most recent sync attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    /// When the last successful sync finished
    pub last_success: Option<DateTime<Utc>>,
    /// Error of the last attempt, cleared on success
    pub last_error: Option<String>,
    /// Spots changed by the last successful sync
    pub changed: usize,
}

/// Run one incremental sync, returning the number of changed spots
pub async fn sync_once(repo: &Mutex<SpotsRepository>, remote: &dyn SpotsRemote) -> Result<usize, SyncError> {
    let since = repo
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .last_synced_at();

    let spots = remote.fetch_since(since).await?;
    let received = spots.len();

    let mut repo = repo.lock().unwrap_or_else(PoisonError::into_inner);
    let changed = repo.merge_remote(spots);
    // Also retries a write that failed on an earlier sync
    if repo.is_dirty() {
        repo.save()?;
    }

    debug!("Sync received {} spots, {} changed", received, changed);
    Ok(changed)
}

/// Handle to the background sync task.
///
/// The task stops when [`shutdown`](Self::shutdown) is called or the handle
/// is dropped.
pub struct SpotSync {
    repo: Arc<Mutex<SpotsRepository>>,
    remote: Arc<dyn SpotsRemote>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for SpotSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpotSync")
            .field("status", &*self.status_tx.borrow())
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl SpotSync {
    /// Spawn the periodic sync loop. The first sync starts immediately.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(repo: Arc<Mutex<SpotsRepository>>, remote: Arc<dyn SpotsRemote>, interval: Duration) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        let status_tx = Arc::new(status_tx);
        let cancel_token = CancellationToken::new();

        tokio::spawn(sync_loop(
            Arc::clone(&repo),
            Arc::clone(&remote),
            Arc::clone(&status_tx),
            cancel_token.clone(),
            interval,
        ));

        Self {
            repo,
            remote,
            status_tx,
            cancel_token,
        }
    }

    /// Run a sync right away, outside the schedule
    #[allow(dead_code, reason = "manual refresh for embedders, the CLI relies on the schedule")]
    pub async fn sync_now(&self) -> Result<usize, SyncError> {
        let result = sync_once(&self.repo, self.remote.as_ref()).await;
        publish(&self.status_tx, &result);
        result
    }

    /// Current status snapshot
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Stop the background task
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for SpotSync {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn publish(status_tx: &watch::Sender<SyncStatus>, result: &Result<usize, SyncError>) {
    status_tx.send_modify(|status| match result {
        Ok(changed) => {
            status.last_success = Some(Utc::now());
            status.last_error = None;
            status.changed = *changed;
        }
        Err(e) => status.last_error = Some(e.to_string()),
    });
}

async fn sync_loop(
    repo: Arc<Mutex<SpotsRepository>>,
    remote: Arc<dyn SpotsRemote>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    cancel_token: CancellationToken,
    interval: Duration,
) {
    info!("Spot sync started, every {} seconds", interval.as_secs());

    loop {
        let result = tokio::select! {
            biased;
            () = cancel_token.cancelled() => {
                info!("Spot sync cancelled");
                return;
            }
            result = sync_once(&repo, remote.as_ref()) => result,
        };

        match &result {
            Ok(changed) if *changed > 0 => info!("Synced {} changed spots", changed),
            Ok(_) => debug!("Spots already up to date"),
            Err(e) => warn!("Spot sync failed: {}", e),
        }
        publish(&status_tx, &result);

        tokio::select! {
            biased;
            () = cancel_token.cancelled() => {
                info!("Spot sync cancelled");
                return;
            }
            () = sleep(interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spots::{Spot, SpotCategory};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockRemote {
        calls: AtomicUsize,
        since: Mutex<Vec<Option<DateTime<Utc>>>>,
        batch: Vec<Spot>,
        fail: bool,
    }

    impl MockRemote {
        fn new(batch: Vec<Spot>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                since: Mutex::new(Vec::new()),
                batch,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                since: Mutex::new(Vec::new()),
                batch: Vec::new(),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpotsRemote for MockRemote {
        async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Spot>, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.since.lock().unwrap().push(since);
            if self.fail {
                return Err(RemoteError::Status(503));
            }
            Ok(self
                .batch
                .iter()
                .filter(|s| since.is_none_or(|since| s.updated_at > since))
                .cloned()
                .collect())
        }
    }

    fn spot(id: &str, updated_secs: i64) -> Spot {
        let mut spot = Spot::new(id, 47.0, 8.0, SpotCategory::Racing);
        spot.id = id.to_string();
        spot.updated_at = Utc.timestamp_opt(updated_secs, 0).unwrap();
        spot
    }

    #[tokio::test]
    async fn test_sync_once_is_incremental() {
        let repo = Mutex::new(SpotsRepository::in_memory());
        let remote = MockRemote::new(vec![spot("a", 100), spot("b", 200)]);

        assert_eq!(sync_once(&repo, remote.as_ref()).await.unwrap(), 2);
        assert_eq!(sync_once(&repo, remote.as_ref()).await.unwrap(), 0);

        let since = remote.since.lock().unwrap().clone();
        assert_eq!(since, vec![None, Some(Utc.timestamp_opt(200, 0).unwrap())]);
        assert_eq!(repo.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sync_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spots.json");
        let repo = Mutex::new(SpotsRepository::load(&path).unwrap());
        let remote = MockRemote::new(vec![spot("a", 100)]);

        sync_once(&repo, remote.as_ref()).await.unwrap();
        let reloaded = SpotsRepository::load(&path).unwrap();
        assert!(reloaded.get("a").is_some());
    }

    #[tokio::test]
    async fn test_failed_save_is_retried_on_next_sync() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let path = blocker.join("spots.json");

        let repo = Mutex::new(SpotsRepository::load(&path).unwrap());
        let remote = MockRemote::new(vec![spot("a", 100)]);

        let first = sync_once(&repo, remote.as_ref()).await;
        assert!(matches!(first, Err(SyncError::Repository(_))));
        assert!(repo.lock().unwrap().is_dirty());

        std::fs::remove_file(&blocker).unwrap();
        assert_eq!(sync_once(&repo, remote.as_ref()).await.unwrap(), 0);
        assert!(!repo.lock().unwrap().is_dirty());

        let reloaded = SpotsRepository::load(&path).unwrap();
        assert!(reloaded.get("a").is_some());
        assert_eq!(reloaded.last_synced_at(), Some(Utc.timestamp_opt(100, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_failed_sync_leaves_repository_untouched() {
        let mut initial = SpotsRepository::in_memory();
        initial.upsert(spot("a", 100));
        let repo = Arc::new(Mutex::new(initial));
        let remote = MockRemote::failing();

        let sync = SpotSync::spawn(Arc::clone(&repo), remote.clone(), Duration::from_secs(3600));
        let result = sync.sync_now().await;
        assert!(matches!(result, Err(SyncError::Remote(RemoteError::Status(503)))));
        assert_eq!(repo.lock().unwrap().len(), 1);
        assert!(sync.status().last_error.is_some());
        assert!(sync.status().last_success.is_none());
    }

    #[tokio::test]
    async fn test_loop_keeps_going_after_failures() {
        let repo = Arc::new(Mutex::new(SpotsRepository::in_memory()));
        let remote = MockRemote::failing();

        let sync = SpotSync::spawn(repo, remote.clone(), Duration::from_millis(10));
        sleep(Duration::from_millis(100)).await;
        assert!(remote.calls() >= 2);
        sync.shutdown();
        let calls = remote.calls();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(remote.calls(), calls);
    }

    #[tokio::test]
    async fn test_drop_stops_loop() {
        let repo = Arc::new(Mutex::new(SpotsRepository::in_memory()));
        let remote = MockRemote::new(vec![spot("a", 100)]);

        let sync = SpotSync::spawn(Arc::clone(&repo), remote.clone(), Duration::from_millis(10));
        let mut status = sync.subscribe();
        status.changed().await.unwrap();
        assert_eq!(status.borrow().changed, 1);
        drop(sync);

        // Let the task observe the cancellation
        sleep(Duration::from_millis(30)).await;
        let calls = remote.calls();
        sleep(Duration::from_millis(60)).await;
        assert_eq!(remote.calls(), calls);
        assert_eq!(repo.lock().unwrap().len(), 1);
    }
}
