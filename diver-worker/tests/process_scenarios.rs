//! Entry-point scenarios: search, run, and outcome reporting.

use diver_core::RunError;
use diver_geometry::{ModelRunner, RunConfig};
use diver_test_utils::{fixtures, ScriptedBackend, StaticSearch, StaticTransfer};
use diver_worker::{Relay, TriggerEvent};
use secrecy::SecretString;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const RENDER_HREF: &str = "https://cdn.test/exports/render.png";

fn relay(backend: &Arc<ScriptedBackend>, transfer: &Arc<StaticTransfer>, search: StaticSearch) -> Relay {
    let runner = ModelRunner::new(
        backend.clone(),
        transfer.clone(),
        SecretString::new("model-ticket".into()),
        RunConfig::default(),
    );
    Relay::new(Arc::new(search), runner, "#legodiver")
}

#[tokio::test]
async fn scenario_a_first_candidate_is_relayed() {
    let backend = Arc::new(ScriptedBackend::happy_path("a generated caption", RENDER_HREF));
    let transfer = Arc::new(StaticTransfer::png(1024 * 1024));
    let search = StaticSearch::new(vec![fixtures::candidate("hello"), fixtures::candidate("second")]);

    let trigger = TriggerEvent::scheduled();
    let outcome = relay(&backend, &transfer, search).process(&trigger).await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error);
    assert_eq!(outcome.trigger_id, trigger.id);
    assert_eq!(outcome.candidates, 2);
    let output = outcome.output.unwrap();
    assert_eq!(output.text, "a generated caption");
    assert_eq!(output.image_url, RENDER_HREF);

    // only the first candidate runs
    assert_eq!(backend.calls().init_session, 1);
    assert_eq!(backend.customizations()[0].get("p2"), Some("hello"));
}

#[tokio::test]
async fn scenario_b_export_failure_is_reported() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_init(fixtures::scenario_session())
            .with_upload_tickets(fixtures::upload_tickets("p1", "asset-1"))
            .with_customization(fixtures::outputs_ready("text"))
            .with_export(fixtures::export_with_statuses(
                diver_core::CompletionStatus::Failure,
                diver_core::CompletionStatus::Failure,
                RENDER_HREF,
            )),
    );
    let transfer = Arc::new(StaticTransfer::png(1024));
    let search = StaticSearch::new(vec![fixtures::candidate("hello")]);

    let outcome = relay(&backend, &transfer, search)
        .process(&TriggerEvent::scheduled())
        .await;

    assert!(!outcome.success);
    assert!(outcome.output.is_none());
    let failure = outcome.error.unwrap();
    assert_eq!(failure.kind, "remote_computation_failed");
    assert!(failure.message.contains("computation"));
}

#[tokio::test]
async fn scenario_c_mismatch_before_submission() {
    let backend = Arc::new(ScriptedBackend::new().with_init(fixtures::session_without_file_parameter()));
    let transfer = Arc::new(StaticTransfer::png(1024));
    let search = StaticSearch::new(vec![fixtures::candidate("hello")]);

    let outcome = relay(&backend, &transfer, search)
        .process(&TriggerEvent::scheduled())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, "configuration_mismatch");
    assert_eq!(backend.calls().customize, 0);
    assert_eq!(backend.calls().compute_export, 0);
    assert_eq!(transfer.uploads(), 0);
}

#[tokio::test]
async fn scenario_d_no_candidates_is_success() {
    let backend = Arc::new(ScriptedBackend::new());
    let transfer = Arc::new(StaticTransfer::png(1024));
    let search = StaticSearch::empty();
    let searches = search.call_counter();

    let outcome = relay(&backend, &transfer, search)
        .process(&TriggerEvent::scheduled())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.candidates, 0);
    assert!(outcome.output.is_none());
    assert!(outcome.error.is_none());
    assert_eq!(searches.load(Ordering::SeqCst), 1);
    assert_eq!(backend.calls().init_session, 0);
}

#[tokio::test]
async fn long_text_never_reaches_the_backend() {
    let backend = Arc::new(ScriptedBackend::happy_path("x", RENDER_HREF));
    let transfer = Arc::new(StaticTransfer::png(1024));
    let search = StaticSearch::new(vec![fixtures::candidate(&"x".repeat(300))]);

    let outcome = relay(&backend, &transfer, search)
        .process(&TriggerEvent::scheduled())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, "input_rejected");
    assert_eq!(backend.calls().mutating(), 0);
    assert_eq!(transfer.uploads(), 0);
}

#[tokio::test]
async fn search_failure_is_caught() {
    let backend = Arc::new(ScriptedBackend::new());
    let transfer = Arc::new(StaticTransfer::png(1024));
    let search = StaticSearch::failing(RunError::transport("search", "HTTP 429: Too Many Requests"));

    let outcome = relay(&backend, &transfer, search)
        .process(&TriggerEvent::scheduled())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.candidates, 0);
    let failure = outcome.error.unwrap();
    assert_eq!(failure.kind, "transport_failure");
    assert!(failure.message.contains("429"));
    assert_eq!(backend.calls().init_session, 0);
}

#[tokio::test]
async fn session_init_failure_is_caught() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_init_error(RunError::transport("session init", "HTTP 401: invalid ticket")),
    );
    let transfer = Arc::new(StaticTransfer::png(1024));
    let search = StaticSearch::new(vec![fixtures::candidate("hello")]);

    let outcome = relay(&backend, &transfer, search)
        .process(&TriggerEvent::scheduled())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.candidates, 1);
    assert_eq!(outcome.error.unwrap().kind, "transport_failure");
}

#[tokio::test(start_paused = true)]
async fn pending_customization_hits_invocation_limit() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_init(fixtures::scenario_session())
            .with_upload_tickets(fixtures::upload_tickets("p1", "asset-1"))
            .with_customization(fixtures::outputs_pending(1000))
            .with_output_cache((0..20).map(|_| fixtures::outputs_pending(1000)).collect()),
    );
    let transfer = Arc::new(StaticTransfer::png(1024));
    let search = StaticSearch::new(vec![fixtures::candidate("hello")]);

    let outcome = relay(&backend, &transfer, search)
        .process_within(&TriggerEvent::scheduled(), Duration::from_secs(5))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.unwrap().kind, "deadline_exceeded");
    assert_eq!(backend.calls().compute_export, 0);
    assert!(backend.calls().output_cache < 20);
}
