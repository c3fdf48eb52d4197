//! The scheduled entry point.
//!
//! [`Relay::process`] is the recovery boundary of the whole workflow: it
//! searches, hands the first candidate to the model runner, and folds every
//! failure into a [`ProcessOutcome`] instead of returning an error.

use crate::config::{required_secret, WorkerConfig};
use crate::error::WorkerResult;
use chrono::{DateTime, Utc};
use diver_core::{RunError, RunInput, RunOutput};
use diver_geometry::{HttpAssetTransfer, HttpGeometryBackend, ModelRunner};
use diver_search::{RecentSearchClient, SearchProvider};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

// ============================================================================
// TRIGGER / OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Schedule,
    Manual,
}

/// Opaque event that starts one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    pub id: Uuid,
    pub fired_at: DateTime<Utc>,
    pub source: TriggerSource,
}

impl TriggerEvent {
    pub fn new(source: TriggerSource) -> Self {
        Self {
            id: Uuid::now_v7(),
            fired_at: Utc::now(),
            source,
        }
    }

    pub fn scheduled() -> Self {
        Self::new(TriggerSource::Schedule)
    }

    pub fn manual() -> Self {
        Self::new(TriggerSource::Manual)
    }
}

/// Error details carried by a failed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessFailure {
    /// Stable error variant name
    pub kind: String,
    pub message: String,
}

impl From<&RunError> for ProcessFailure {
    fn from(err: &RunError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub trigger_id: Uuid,
    pub success: bool,
    /// Candidates returned by the search
    pub candidates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<RunOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ProcessFailure>,
}

impl ProcessOutcome {
    fn succeeded(trigger: &TriggerEvent, candidates: usize, output: Option<RunOutput>) -> Self {
        Self {
            trigger_id: trigger.id,
            success: true,
            candidates,
            output,
            error: None,
        }
    }

    fn timed_out(trigger: &TriggerEvent, limit: Duration) -> Self {
        let err = RunError::DeadlineExceeded {
            budget_ms: limit.as_millis() as u64,
        };
        Self::failed(trigger, 0, &err)
    }

    fn failed(trigger: &TriggerEvent, candidates: usize, err: &RunError) -> Self {
        Self {
            trigger_id: trigger.id,
            success: false,
            candidates,
            output: None,
            error: Some(err.into()),
        }
    }
}

// ============================================================================
// RELAY
// ============================================================================

/// Search collaborator plus model runner, bound to one query.
#[derive(Clone)]
pub struct Relay {
    search: Arc<dyn SearchProvider>,
    runner: ModelRunner,
    query: String,
}

impl Relay {
    pub fn new(search: Arc<dyn SearchProvider>, runner: ModelRunner, query: impl Into<String>) -> Self {
        Self {
            search,
            runner,
            query: query.into(),
        }
    }

    /// Build the HTTP-backed relay described by a validated configuration.
    pub fn from_config(config: WorkerConfig) -> WorkerResult<Self> {
        let timeout = config.request_timeout();
        let run_config = config.run_config();
        let WorkerConfig {
            search, geometry, ..
        } = config;

        let search_client = RecentSearchClient::new(
            &search.api_base_url,
            required_secret(search.bearer_token, "search.bearer_token")?,
            search.max_results,
            timeout,
        )?;
        let backend = HttpGeometryBackend::new(&geometry.model_view_url, timeout)?;
        let transfer = HttpAssetTransfer::new(timeout)?;
        let runner = ModelRunner::new(
            Arc::new(backend),
            Arc::new(transfer),
            required_secret(geometry.ticket, "geometry.ticket")?,
            run_config,
        );

        Ok(Self::new(Arc::new(search_client), runner, search.query))
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Run one invocation. Never fails; errors are reported in the outcome.
    pub async fn process(&self, trigger: &TriggerEvent) -> ProcessOutcome {
        debug!(trigger = ?trigger, "Trigger received");

        let candidates = match self.search.search(&self.query).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(trigger_id = %trigger.id, error = %e, kind = e.kind(), "Search failed");
                return ProcessOutcome::failed(trigger, 0, &e);
            }
        };
        info!(
            trigger_id = %trigger.id,
            query = %self.query,
            count = candidates.len(),
            "Fetched candidates"
        );

        let Some(candidate) = candidates.first() else {
            info!(trigger_id = %trigger.id, "No candidates");
            return ProcessOutcome::succeeded(trigger, 0, None);
        };
        debug!(trigger_id = %trigger.id, candidate_id = %candidate.id, "Processing first candidate");

        match self.runner.run_model(&RunInput::from(candidate)).await {
            Ok(output) => {
                debug!(trigger_id = %trigger.id, output = ?output, "Run complete");
                ProcessOutcome::succeeded(trigger, candidates.len(), Some(output))
            }
            Err(e) => {
                error!(
                    trigger_id = %trigger.id,
                    candidate_id = %candidate.id,
                    error = %e,
                    kind = e.kind(),
                    "Run failed"
                );
                ProcessOutcome::failed(trigger, candidates.len(), &e)
            }
        }
    }
}

impl Relay {
    /// [`Relay::process`] bounded by a wall-clock limit.
    ///
    /// An invocation still running when `limit` elapses is dropped and
    /// reported as `deadline_exceeded`.
    pub async fn process_within(&self, trigger: &TriggerEvent, limit: Duration) -> ProcessOutcome {
        match tokio::time::timeout(limit, self.process(trigger)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    trigger_id = %trigger.id,
                    limit_secs = limit.as_secs(),
                    "Invocation timed out"
                );
                ProcessOutcome::timed_out(trigger, limit)
            }
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("query", &self.query)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_ids_are_v7() {
        let first = TriggerEvent::scheduled();
        let second = TriggerEvent::manual();
        assert_eq!(first.id.get_version_num(), 7);
        assert_ne!(first.id, second.id);
        assert_eq!(second.source, TriggerSource::Manual);
    }

    #[test]
    fn test_failed_outcome_serializes_kind() {
        let trigger = TriggerEvent::scheduled();
        let err = RunError::DeadlineExceeded { budget_ms: 5000 };
        let outcome = ProcessOutcome::failed(&trigger, 3, &err);

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["candidates"], 3);
        assert_eq!(json["error"]["kind"], "deadline_exceeded");
        assert!(json.get("output").is_none());
    }

    #[test]
    fn test_timed_out_outcome() {
        let trigger = TriggerEvent::scheduled();
        let outcome = ProcessOutcome::timed_out(&trigger, Duration::from_secs(180));
        assert!(!outcome.success);
        assert_eq!(outcome.candidates, 0);
        let failure = outcome.error.unwrap();
        assert_eq!(failure.kind, "deadline_exceeded");
        assert!(failure.message.contains("180000"));
    }

    #[test]
    fn test_success_without_output_omits_fields() {
        let trigger = TriggerEvent::scheduled();
        let outcome = ProcessOutcome::succeeded(&trigger, 0, None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
        assert!(json.get("output").is_none());
    }
}
