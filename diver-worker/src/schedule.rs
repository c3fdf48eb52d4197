//! Periodic relay invocations.
//!
//! Runs [`Relay::process_within`] once per interval tick until the shutdown
//! signal flips to `true`. Ticks missed while an invocation is still running
//! are skipped rather than bunched up. A shutdown arriving mid-invocation
//! drops that invocation.

use crate::config::ScheduleSection;
use crate::handler::{ProcessOutcome, Relay, TriggerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Time between invocations
    pub interval: Duration,
    /// Fire immediately instead of waiting one interval first
    pub run_on_start: bool,
    /// Limit on a single invocation
    pub invocation_timeout: Duration,
}

impl From<ScheduleSection> for ScheduleConfig {
    fn from(section: ScheduleSection) -> Self {
        Self {
            interval: Duration::from_secs(section.interval_secs),
            run_on_start: section.run_on_start,
            invocation_timeout: Duration::from_secs(section.invocation_timeout_secs),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters kept across the lifetime of the schedule.
#[derive(Debug, Default)]
pub struct ScheduleMetrics {
    pub invocations: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    /// Sum of candidates returned by every search
    pub candidates_seen: AtomicU64,
}

impl ScheduleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &ProcessOutcome) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.candidates_seen
            .fetch_add(outcome.candidates as u64, Ordering::Relaxed);
        if outcome.success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        ScheduleSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            candidates_seen: self.candidates_seen.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSnapshot {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub candidates_seen: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Invoke the relay on a fixed schedule until shutdown.
///
/// Returns the metrics collected over the task's lifetime.
pub async fn relay_schedule_task(
    relay: Arc<Relay>,
    config: ScheduleConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ScheduleMetrics> {
    let metrics = Arc::new(ScheduleMetrics::new());

    let first_tick = if config.run_on_start {
        Instant::now()
    } else {
        Instant::now() + config.interval
    };
    let mut ticker = interval_at(first_tick, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        run_on_start = config.run_on_start,
        invocation_timeout_secs = config.invocation_timeout.as_secs(),
        query = %relay.query(),
        "Relay schedule started"
    );

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown_rx) => {
                tracing::info!("Relay schedule shutting down");
                break;
            }

            _ = ticker.tick() => {
                let trigger = TriggerEvent::scheduled();
                let outcome = tokio::select! {
                    outcome = relay.process_within(&trigger, config.invocation_timeout) => Some(outcome),
                    _ = shutdown_requested(&mut shutdown_rx) => None,
                };
                match outcome {
                    Some(outcome) => {
                        metrics.record(&outcome);
                        log_outcome(&outcome);
                    }
                    None => {
                        tracing::info!(trigger_id = %trigger.id, "Relay schedule shutting down, invocation abandoned");
                        break;
                    }
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        invocations = snapshot.invocations,
        successes = snapshot.successes,
        failures = snapshot.failures,
        candidates_seen = snapshot.candidates_seen,
        "Relay schedule completed"
    );

    metrics
}

/// Resolves once the flag is `true` or the sender is gone.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

fn log_outcome(outcome: &ProcessOutcome) {
    match serde_json::to_string(outcome) {
        Ok(json) => tracing::info!(outcome = %json, success = outcome.success, "Invocation finished"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize outcome"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use diver_core::{Candidate, RunOutput, RunResult};
    use diver_geometry::{ModelRunner, RunConfig};
    use diver_search::SearchProvider;
    use diver_test_utils::{StaticSearch, ScriptedBackend, StaticTransfer};
    use secrecy::SecretString;
    use std::sync::atomic::AtomicUsize;

    /// Search that never answers.
    #[derive(Default)]
    struct StalledSearch {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SearchProvider for StalledSearch {
        async fn search(&self, _query: &str) -> RunResult<Vec<Candidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn stalled_relay(search: StalledSearch) -> Arc<Relay> {
        let runner = ModelRunner::new(
            Arc::new(ScriptedBackend::new()),
            Arc::new(StaticTransfer::png(16)),
            SecretString::new("ticket".into()),
            RunConfig::default(),
        );
        Arc::new(Relay::new(Arc::new(search), runner, "#legodiver"))
    }

    fn idle_relay(search: StaticSearch) -> Arc<Relay> {
        let runner = ModelRunner::new(
            Arc::new(ScriptedBackend::new()),
            Arc::new(StaticTransfer::png(16)),
            SecretString::new("ticket".into()),
            RunConfig::default(),
        );
        Arc::new(Relay::new(Arc::new(search), runner, "#legodiver"))
    }

    #[test]
    fn test_metrics_record_outcomes() {
        let metrics = ScheduleMetrics::new();
        let trigger = TriggerEvent::scheduled();
        metrics.record(&ProcessOutcome {
            trigger_id: trigger.id,
            success: true,
            candidates: 2,
            output: Some(RunOutput {
                text: "t".to_string(),
                image_url: "u".to_string(),
            }),
            error: None,
        });
        metrics.record(&ProcessOutcome {
            trigger_id: trigger.id,
            success: false,
            candidates: 1,
            output: None,
            error: None,
        });

        assert_eq!(
            metrics.snapshot(),
            ScheduleSnapshot {
                invocations: 2,
                successes: 1,
                failures: 1,
                candidates_seen: 3,
            }
        );
    }

    #[test]
    fn test_schedule_config_from_section() {
        let config = ScheduleConfig::from(ScheduleSection {
            interval_secs: 90,
            run_on_start: false,
            invocation_timeout_secs: 45,
        });
        assert_eq!(config.interval, Duration::from_secs(90));
        assert!(!config.run_on_start);
        assert_eq!(config.invocation_timeout, Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_ticks_until_shutdown() {
        let search = StaticSearch::empty();
        let calls = search.call_counter();
        let relay = idle_relay(search);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = ScheduleConfig {
            interval: Duration::from_secs(60),
            run_on_start: true,
            invocation_timeout: Duration::from_secs(30),
        };

        let handle = tokio::spawn(relay_schedule_task(relay, config, shutdown_rx));

        // ticks at 0s, 60s and 120s
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.invocations, 3);
        assert_eq!(snapshot.successes, 3);
        assert_eq!(snapshot.candidates_seen, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_waits_one_interval_without_run_on_start() {
        let relay = idle_relay(StaticSearch::new(vec![Candidate {
            id: "1".to_string(),
            text: "hello".to_string(),
            image_url: "https://img.test/1.png".to_string(),
        }]));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = ScheduleConfig {
            interval: Duration::from_secs(60),
            run_on_start: false,
            invocation_timeout: Duration::from_secs(30),
        };

        let handle = tokio::spawn(relay_schedule_task(relay, config, shutdown_rx));

        tokio::time::sleep(Duration::from_secs(30)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        assert_eq!(metrics.snapshot().invocations, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_invocation_times_out() {
        let search = StalledSearch::default();
        let calls = search.calls.clone();
        let relay = stalled_relay(search);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = ScheduleConfig {
            interval: Duration::from_secs(600),
            run_on_start: true,
            invocation_timeout: Duration::from_secs(180),
        };

        let handle = tokio::spawn(relay_schedule_task(relay, config, shutdown_rx));

        tokio::time::sleep(Duration::from_secs(200)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.invocations, 1);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_running_invocation() {
        let relay = stalled_relay(StalledSearch::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = ScheduleConfig {
            interval: Duration::from_secs(60),
            run_on_start: true,
            invocation_timeout: Duration::from_secs(3600),
        };

        let handle = tokio::spawn(relay_schedule_task(relay, config, shutdown_rx));

        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("schedule task should stop promptly after shutdown")
            .unwrap();

        // the abandoned invocation is not counted
        assert_eq!(metrics.snapshot().invocations, 0);
    }
}
