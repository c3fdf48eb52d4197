//! diver-worker binary.
//!
//! `diver-worker --config <path>` runs the relay on its schedule until
//! Ctrl-C. With `--once` it runs a single invocation and exits non-zero if
//! that invocation failed.

use std::sync::Arc;

use diver_worker::{
    init_tracing, relay_schedule_task, Relay, ScheduleConfig, TriggerEvent, WorkerConfig,
    WorkerError, WorkerResult,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> WorkerResult<()> {
    let config = WorkerConfig::load()?;
    init_tracing(&config.telemetry)?;

    let schedule = ScheduleConfig::from(config.schedule);
    let relay = Relay::from_config(config)?;

    if once_requested() {
        let trigger = TriggerEvent::manual();
        let outcome = relay.process_within(&trigger, schedule.invocation_timeout).await;
        tracing::info!(success = outcome.success, candidates = outcome.candidates, "Single invocation finished");
        return match outcome.error {
            None => Ok(()),
            Some(failure) => Err(WorkerError::InvocationFailed {
                trigger_id: trigger.id,
                kind: failure.kind,
                message: failure.message,
            }),
        };
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(relay_schedule_task(Arc::new(relay), schedule, shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    let _ = shutdown_tx.send(true);

    if let Err(e) = task.await {
        tracing::error!(error = %e, "Relay schedule task panicked");
    }
    Ok(())
}

fn once_requested() -> bool {
    std::env::args().skip(1).any(|arg| arg == "--once")
}
