/// Poll-detect-terminate loop: periodically cull containers that have
/// outlived the staleness timeout and swing at the overdue batch.
///
/// The loop never exits on runtime failures; an unreachable Docker daemon
/// degrades to "log the error, sleep, retry next poll". The only way out is
/// cancellation of the shutdown token.
use crate::config::WatchdogConfig;
use crate::runtime::{ContainerRecord, ContainerRuntime};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of one swing over a batch of containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwingReport {
    /// Containers successfully killed.
    pub killed: usize,
    /// Containers attempted.
    pub total: usize,
}

impl SwingReport {
    pub fn is_full_success(&self) -> bool {
        self.killed == self.total
    }
}

/// Select the ids of records created strictly before the cutoff,
/// preserving the runtime-reported order.
fn overdue_ids(records: &[ContainerRecord], cutoff: DateTime<Utc>) -> Vec<String> {
    records
        .iter()
        .filter(|record| record.created_at < cutoff)
        .map(|record| record.id.clone())
        .collect()
}

/// The watchdog: owns the runtime handle, the poll interval, and the
/// staleness timeout. Stateless across polls; each cycle re-derives the
/// overdue set from the runtime's live container list.
pub struct Damocles<R> {
    runtime: R,
    poll_interval: Duration,
    staleness_timeout: Duration,
    cancel: CancellationToken,
}

impl<R: ContainerRuntime> Damocles<R> {
    pub fn new(runtime: R, config: &WatchdogConfig, cancel: CancellationToken) -> Self {
        Self {
            runtime,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            staleness_timeout: Duration::from_secs(config.staleness_timeout_secs),
            cancel,
        }
    }

    /// One cull pass: list running containers and return the ids of those
    /// older than the staleness timeout.
    ///
    /// An unavailable runtime yields an empty set for this cycle; the error
    /// is logged and the loop carries on.
    pub async fn cull(&self) -> Vec<String> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.staleness_timeout.as_secs() as i64);

        match self.runtime.list_containers().await {
            Ok(records) => overdue_ids(&records, cutoff),
            Err(e) => {
                tracing::error!(
                    runtime = self.runtime.name(),
                    error = %e,
                    "unable to list containers, skipping this cycle"
                );
                Vec::new()
            }
        }
    }

    /// Kill a batch of containers, each attempt independent of the others.
    ///
    /// A failed kill is logged and counted; it never aborts the remaining
    /// attempts. The batch tally is logged at info on full success and at
    /// error on any shortfall. Best-effort: this never fails.
    pub async fn swing(&self, ids: &[String]) -> SwingReport {
        let mut killed = 0usize;

        for id in ids {
            tracing::debug!(id = %id, "killing container");
            match self.runtime.kill(id).await {
                Ok(()) => {
                    tracing::debug!(id = %id, "killed container");
                    killed += 1;
                }
                Err(e) => {
                    tracing::error!(id = %id, error = %e, "failed to kill container");
                }
            }
        }

        let report = SwingReport {
            killed,
            total: ids.len(),
        };
        if report.is_full_success() {
            tracing::info!(
                killed = report.killed,
                total = report.total,
                "container kill batch complete"
            );
        } else {
            tracing::error!(
                killed = report.killed,
                total = report.total,
                "container kill batch completed with failures"
            );
        }
        report
    }

    /// The scheduling loop: cull, swing if anything is overdue, sleep,
    /// repeat. Runs until the shutdown token is cancelled; the sleep itself
    /// is cancellable so SIGTERM does not wait out a full poll interval.
    pub async fn run(&self) {
        tracing::info!(
            runtime = self.runtime.name(),
            poll_interval_secs = self.poll_interval.as_secs(),
            staleness_timeout_secs = self.staleness_timeout.as_secs(),
            "daemon started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let herd = self.cull().await;
            tracing::debug!(count = herd.len(), "wakeup: poll complete");

            if !herd.is_empty() {
                tracing::info!(
                    count = herd.len(),
                    ids = ?herd,
                    "found containers over time limit"
                );
                self.swing(&herd).await;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        tracing::info!("watchdog loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory runtime double: a fixed container list, an availability
    /// switch, a set of ids whose kills fail, and a log of kills issued.
    #[derive(Default)]
    struct FakeRuntime {
        containers: Mutex<Vec<ContainerRecord>>,
        unavailable: AtomicBool,
        fail_kill_ids: Mutex<HashSet<String>>,
        killed: Mutex<Vec<String>>,
    }

    impl FakeRuntime {
        fn with_containers(records: Vec<ContainerRecord>) -> Arc<Self> {
            let fake = Self::default();
            *fake.containers.lock().unwrap() = records;
            Arc::new(fake)
        }

        fn fail_kills_for(&self, ids: &[&str]) {
            let mut set = self.fail_kill_ids.lock().unwrap();
            for id in ids {
                set.insert(id.to_string());
            }
        }

        fn killed_ids(&self) -> Vec<String> {
            self.killed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        fn name(&self) -> &str {
            "fake"
        }

        async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(RuntimeError::Unavailable {
                    reason: "connection refused".to_string(),
                });
            }
            Ok(self.containers.lock().unwrap().clone())
        }

        async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
            if self.fail_kill_ids.lock().unwrap().contains(id) {
                return Err(RuntimeError::KillFailed {
                    id: id.to_string(),
                    reason: "no such container".to_string(),
                });
            }
            self.killed.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn record(id: &str, age_secs: i64) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    fn config(poll_interval_secs: u64, staleness_timeout_secs: u64) -> WatchdogConfig {
        WatchdogConfig {
            poll_interval_secs,
            staleness_timeout_secs,
        }
    }

    fn watchdog(
        runtime: Arc<FakeRuntime>,
        staleness_timeout_secs: u64,
    ) -> Damocles<Arc<FakeRuntime>> {
        Damocles::new(
            runtime,
            &config(60, staleness_timeout_secs),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_overdue_strict_cutoff() {
        let cutoff = Utc::now();
        let records = vec![
            ContainerRecord {
                id: "older".to_string(),
                created_at: cutoff - chrono::Duration::seconds(1),
            },
            ContainerRecord {
                id: "exact".to_string(),
                created_at: cutoff,
            },
            ContainerRecord {
                id: "newer".to_string(),
                created_at: cutoff + chrono::Duration::seconds(1),
            },
        ];
        // Only strictly-before-cutoff records qualify
        assert_eq!(overdue_ids(&records, cutoff), vec!["older"]);
    }

    #[test]
    fn test_overdue_preserves_runtime_order() {
        let cutoff = Utc::now();
        let records = vec![
            ContainerRecord {
                id: "b".to_string(),
                created_at: cutoff - chrono::Duration::seconds(10),
            },
            ContainerRecord {
                id: "a".to_string(),
                created_at: cutoff - chrono::Duration::seconds(20),
            },
            ContainerRecord {
                id: "c".to_string(),
                created_at: cutoff - chrono::Duration::seconds(5),
            },
        ];
        assert_eq!(overdue_ids(&records, cutoff), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_overdue_empty_records() {
        assert!(overdue_ids(&[], Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_cull_selects_only_overdue() {
        // A is 60s old, B is 10s old, timeout 30s: only A is overdue
        let fake = FakeRuntime::with_containers(vec![record("a", 60), record("b", 10)]);
        let damocles = watchdog(fake, 30);

        assert_eq!(damocles.cull().await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_cull_idempotent_re_poll() {
        let fake = FakeRuntime::with_containers(vec![record("a", 60), record("b", 10)]);
        let damocles = watchdog(fake, 30);

        let first = damocles.cull().await;
        let second = damocles.cull().await;
        assert_eq!(first, second);
        assert_eq!(first, vec!["a"]);
    }

    #[tokio::test]
    async fn test_cull_unavailable_runtime_yields_empty_then_recovers() {
        let fake = FakeRuntime::with_containers(vec![record("a", 60)]);
        fake.unavailable.store(true, Ordering::SeqCst);
        let damocles = watchdog(Arc::clone(&fake), 30);

        assert!(damocles.cull().await.is_empty());

        // Runtime comes back: the next poll sees the correct set again
        fake.unavailable.store(false, Ordering::SeqCst);
        assert_eq!(damocles.cull().await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_swing_empty_batch_is_no_op() {
        let fake = FakeRuntime::with_containers(vec![]);
        let damocles = watchdog(Arc::clone(&fake), 30);

        let report = damocles.swing(&[]).await;
        assert_eq!(report, SwingReport { killed: 0, total: 0 });
        assert!(report.is_full_success());
        assert!(fake.killed_ids().is_empty());
    }

    #[tokio::test]
    async fn test_swing_full_success() {
        let fake = FakeRuntime::with_containers(vec![]);
        let damocles = watchdog(Arc::clone(&fake), 30);

        let ids = vec!["c".to_string(), "d".to_string()];
        let report = damocles.swing(&ids).await;
        assert_eq!(report, SwingReport { killed: 2, total: 2 });
        assert!(report.is_full_success());
        assert_eq!(fake.killed_ids(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_swing_partial_failure_does_not_abort_batch() {
        // kill(c) succeeds, kill(d) fails: c must not be skipped or rolled back
        let fake = FakeRuntime::with_containers(vec![]);
        fake.fail_kills_for(&["d"]);
        let damocles = watchdog(Arc::clone(&fake), 30);

        let ids = vec!["c".to_string(), "d".to_string()];
        let report = damocles.swing(&ids).await;
        assert_eq!(report, SwingReport { killed: 1, total: 2 });
        assert!(!report.is_full_success());
        assert_eq!(fake.killed_ids(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_swing_failure_mid_batch_continues_to_later_ids() {
        let fake = FakeRuntime::with_containers(vec![]);
        fake.fail_kills_for(&["b"]);
        let damocles = watchdog(Arc::clone(&fake), 30);

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let report = damocles.swing(&ids).await;
        assert_eq!(report, SwingReport { killed: 2, total: 3 });
        assert_eq!(fake.killed_ids(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_run_kills_overdue_and_stops_on_cancel() {
        let fake = FakeRuntime::with_containers(vec![record("a", 60), record("b", 10)]);
        let cancel = CancellationToken::new();
        let damocles = Damocles::new(Arc::clone(&fake), &config(60, 30), cancel.clone());

        let handle = tokio::spawn(async move { damocles.run().await });

        // First cycle runs immediately; give it a moment, then shut down
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(fake.killed_ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_run_cancelled_before_start_does_nothing() {
        let fake = FakeRuntime::with_containers(vec![record("a", 60)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let damocles = Damocles::new(Arc::clone(&fake), &config(60, 30), cancel);

        damocles.run().await;
        assert!(fake.killed_ids().is_empty());
    }

    #[tokio::test]
    async fn test_run_survives_unavailable_runtime() {
        let fake = FakeRuntime::with_containers(vec![record("a", 60)]);
        fake.unavailable.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let damocles = Damocles::new(Arc::clone(&fake), &config(60, 30), cancel.clone());

        let handle = tokio::spawn(async move { damocles.run().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        // The loop must still be alive to observe the cancellation
        handle.await.unwrap();

        assert!(fake.killed_ids().is_empty());
    }
}
