//! Poll loop engine.
//!
//! The backend answers a submission with a snapshot whose artifacts carry a
//! delay hint. Waiting means sleeping for that hint, asking the cache
//! endpoint whether anything changed from the versions captured when the
//! wait began, and repeating until every awaited artifact reports no delay.
//! A single [`DeadlineClock`] bounds the whole chain.

use crate::backend::{CustomizationRequest, ExportRequest, GeometryBackend};
use diver_core::constants::NO_DELAY;
use diver_core::{
    Artifact, Deadline, DeadlineClock, RunResult, SessionDocument, SessionId,
};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Wait until `extract_delay` reports no pending delay.
///
/// Returns `initial` untouched when it is already ready. Otherwise sleeps
/// for each reported delay, clamped to the clock's remaining budget, and
/// replaces the document with whatever `refetch` returns. Fails with
/// `DeadlineExceeded` when the budget runs out while still pending; errors
/// from `refetch` propagate unchanged.
pub async fn wait_until_ready<D, E, F, Fut>(
    initial: D,
    extract_delay: E,
    mut refetch: F,
    clock: &DeadlineClock,
) -> RunResult<D>
where
    E: Fn(&D) -> i64,
    F: FnMut() -> Fut,
    Fut: Future<Output = RunResult<D>>,
{
    let mut document = initial;
    let mut delay = extract_delay(&document);
    let mut attempt: u32 = 0;

    while delay > 0 {
        let sleep = clock.next_sleep(Duration::from_millis(delay as u64))?;
        attempt += 1;
        debug!(
            attempt,
            delay_ms = delay,
            sleep_ms = sleep.as_millis() as u64,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            budget_ms = clock.deadline().as_millis(),
            "artifacts pending"
        );
        tokio::time::sleep(sleep).await;
        document = refetch().await?;
        delay = extract_delay(&document);
    }

    Ok(document)
}

/// Largest delay across every output in the document, [`NO_DELAY`] if none.
pub fn max_output_delay(document: &SessionDocument) -> i64 {
    document
        .output_artifacts()
        .map(|a| a.delay_ms())
        .max()
        .unwrap_or(NO_DELAY)
}

/// Delay of one export, [`NO_DELAY`] when the document does not carry it.
pub fn export_delay(document: &SessionDocument, export_id: &str) -> i64 {
    document
        .export(export_id)
        .map(|e| Artifact::Export(e).delay_ms())
        .unwrap_or(NO_DELAY)
}

/// Wait for every output of a customization snapshot.
pub async fn wait_for_customization(
    backend: &dyn GeometryBackend,
    session: &SessionId,
    initial: SessionDocument,
    clock: &DeadlineClock,
) -> RunResult<SessionDocument> {
    let versions = initial.output_versions();
    let versions = &versions;
    wait_until_ready(
        initial,
        max_output_delay,
        move || backend.output_cache(session, versions),
        clock,
    )
    .await
}

/// Wait for a single export of an export snapshot.
pub async fn wait_for_export(
    backend: &dyn GeometryBackend,
    session: &SessionId,
    export_id: &str,
    initial: SessionDocument,
    clock: &DeadlineClock,
) -> RunResult<SessionDocument> {
    let versions = initial.export_version(export_id);
    let versions = &versions;
    wait_until_ready(
        initial,
        |doc: &SessionDocument| export_delay(doc, export_id),
        move || backend.export_cache(session, versions),
        clock,
    )
    .await
}

/// Submit a customization and wait for its outputs.
///
/// The clock starts before the submission, so its latency counts against
/// `deadline`.
pub async fn submit_customization_and_wait(
    backend: &dyn GeometryBackend,
    session: &SessionId,
    request: &CustomizationRequest,
    deadline: Deadline,
) -> RunResult<SessionDocument> {
    let clock = DeadlineClock::start(deadline);
    let initial = backend.customize(session, request).await?;
    wait_for_customization(backend, session, initial, &clock).await
}

/// Submit an export and wait for it.
pub async fn submit_export_and_wait(
    backend: &dyn GeometryBackend,
    session: &SessionId,
    request: &ExportRequest,
    deadline: Deadline,
) -> RunResult<SessionDocument> {
    let clock = DeadlineClock::start(deadline);
    let initial = backend.compute_export(session, request).await?;
    wait_for_export(backend, session, &request.exports.id, initial, &clock).await
}

// =============================================================================
// TESTS
// =============================================================================


// =============================================================================
// PROPERTY-BASED TESTS
// =============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::time::Instant;

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The wait never runs past a bounded deadline, and it succeeds
        /// exactly when every sleep before the last refetch starts in time.
        #[test]
        fn prop_wait_respects_deadline(
            delays in prop::collection::vec(1i64..500, 0..8),
            budget_ms in 0u64..3000,
        ) {
            let rt = paused_runtime();
            let (result, elapsed, refetches) = rt.block_on(async {
                let clock = DeadlineClock::start(Deadline::from_millis(budget_ms as i64));
                let started = Instant::now();
                let initial = delays.first().copied().unwrap_or(0);
                let mut rest = delays.iter().skip(1).copied().collect::<Vec<_>>().into_iter();
                let mut refetches = 0usize;
                let result = wait_until_ready(
                    initial,
                    |d| *d,
                    || {
                        refetches += 1;
                        std::future::ready(Ok(rest.next().unwrap_or(0)))
                    },
                    &clock,
                )
                .await;
                (result, started.elapsed(), refetches)
            });

            prop_assert!(elapsed.as_millis() as u64 <= budget_ms);

            let n = delays.len();
            let before_last: i64 = delays.iter().take(n.saturating_sub(1)).sum();
            let should_succeed = n == 0 || (before_last as u64) < budget_ms;
            prop_assert_eq!(result.is_ok(), should_succeed);
            if should_succeed {
                prop_assert_eq!(refetches, n);
            }
        }
    }
}
