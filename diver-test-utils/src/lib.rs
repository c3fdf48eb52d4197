//! DIVER Test Utilities
//!
//! Shared test infrastructure for the diver workspace:
//! - Scripted computation backend, asset transfer and search collaborators
//! - Session-document fixtures for the common relay scenarios
//! - A loopback HTTP stub for exercising the reqwest clients

use async_trait::async_trait;
use diver_core::{Candidate, ImageAsset, RunError, RunResult, SessionDocument, SessionId, VersionMap};
use diver_geometry::{
    AssetTransfer, CustomizationRequest, ExportRequest, GeometryBackend, UploadRequest,
    UploadTicket, UploadTickets,
};
use diver_search::SearchProvider;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod http_stub;

pub use http_stub::{RecordedRequest, StubResponse, StubServer};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_scripted(operation: &str) -> RunError {
    RunError::transport(operation, "no scripted response left")
}

// ============================================================================
// SCRIPTED BACKEND
// ============================================================================

/// Number of calls each backend operation received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub init_session: usize,
    pub customize: usize,
    pub output_cache: usize,
    pub compute_export: usize,
    pub export_cache: usize,
    pub request_upload: usize,
}

impl CallCounts {
    /// Calls that change remote state.
    pub fn mutating(&self) -> usize {
        self.customize + self.compute_export + self.request_upload
    }
}

/// Computation backend that replays scripted documents and records calls.
///
/// Each operation answers from its own queue; an exhausted queue yields a
/// transport failure so unexpected calls surface in tests.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    init: Mutex<VecDeque<RunResult<SessionDocument>>>,
    customize: Mutex<VecDeque<RunResult<SessionDocument>>>,
    output_cache: Mutex<VecDeque<RunResult<SessionDocument>>>,
    export: Mutex<VecDeque<RunResult<SessionDocument>>>,
    export_cache: Mutex<VecDeque<RunResult<SessionDocument>>>,
    upload: Mutex<VecDeque<RunResult<UploadTickets>>>,
    calls: Mutex<CallCounts>,
    customizations: Mutex<Vec<CustomizationRequest>>,
    exports: Mutex<Vec<ExportRequest>>,
    cache_versions: Mutex<Vec<VersionMap>>,
}

impl ScriptedBackend {
    /// Backend with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that completes the full relay scenario without polling.
    pub fn happy_path(text: &str, image_href: &str) -> Self {
        Self::new()
            .with_init(fixtures::scenario_session())
            .with_upload_tickets(fixtures::upload_tickets("p1", "asset-1"))
            .with_customization(fixtures::outputs_ready(text))
            .with_export(fixtures::export_finished(image_href))
    }

    pub fn with_init(self, document: SessionDocument) -> Self {
        lock(&self.init).push_back(Ok(document));
        self
    }

    pub fn with_init_error(self, err: RunError) -> Self {
        lock(&self.init).push_back(Err(err));
        self
    }

    pub fn with_customization(self, document: SessionDocument) -> Self {
        lock(&self.customize).push_back(Ok(document));
        self
    }

    /// Queue responses for successive output-cache calls.
    pub fn with_output_cache(self, documents: Vec<SessionDocument>) -> Self {
        lock(&self.output_cache).extend(documents.into_iter().map(Ok));
        self
    }

    pub fn with_export(self, document: SessionDocument) -> Self {
        lock(&self.export).push_back(Ok(document));
        self
    }

    /// Queue responses for successive export-cache calls.
    pub fn with_export_cache(self, documents: Vec<SessionDocument>) -> Self {
        lock(&self.export_cache).extend(documents.into_iter().map(Ok));
        self
    }

    pub fn with_upload_tickets(self, tickets: UploadTickets) -> Self {
        lock(&self.upload).push_back(Ok(tickets));
        self
    }

    pub fn calls(&self) -> CallCounts {
        *lock(&self.calls)
    }

    /// Customization requests received, in order.
    pub fn customizations(&self) -> Vec<CustomizationRequest> {
        lock(&self.customizations).clone()
    }

    /// Export requests received, in order.
    pub fn exports(&self) -> Vec<ExportRequest> {
        lock(&self.exports).clone()
    }

    /// Version maps sent to either cache endpoint, in order.
    pub fn cache_versions(&self) -> Vec<VersionMap> {
        lock(&self.cache_versions).clone()
    }

    fn next<T>(queue: &Mutex<VecDeque<RunResult<T>>>, operation: &str) -> RunResult<T> {
        lock(queue)
            .pop_front()
            .unwrap_or_else(|| Err(not_scripted(operation)))
    }

    fn count(&self, bump: impl FnOnce(&mut CallCounts)) {
        bump(&mut *lock(&self.calls));
    }
}

#[async_trait]
impl GeometryBackend for ScriptedBackend {
    async fn init_session(&self, _ticket: &str) -> RunResult<SessionDocument> {
        self.count(|c| c.init_session += 1);
        Self::next(&self.init, "session init")
    }

    async fn customize(
        &self,
        _session: &SessionId,
        request: &CustomizationRequest,
    ) -> RunResult<SessionDocument> {
        self.count(|c| c.customize += 1);
        lock(&self.customizations).push(request.clone());
        Self::next(&self.customize, "customization")
    }

    async fn output_cache(
        &self,
        _session: &SessionId,
        versions: &VersionMap,
    ) -> RunResult<SessionDocument> {
        self.count(|c| c.output_cache += 1);
        lock(&self.cache_versions).push(versions.clone());
        Self::next(&self.output_cache, "output cache")
    }

    async fn compute_export(
        &self,
        _session: &SessionId,
        request: &ExportRequest,
    ) -> RunResult<SessionDocument> {
        self.count(|c| c.compute_export += 1);
        lock(&self.exports).push(request.clone());
        Self::next(&self.export, "export")
    }

    async fn export_cache(
        &self,
        _session: &SessionId,
        versions: &VersionMap,
    ) -> RunResult<SessionDocument> {
        self.count(|c| c.export_cache += 1);
        lock(&self.cache_versions).push(versions.clone());
        Self::next(&self.export_cache, "export cache")
    }

    async fn request_upload(
        &self,
        _session: &SessionId,
        _request: &UploadRequest,
    ) -> RunResult<UploadTickets> {
        self.count(|c| c.request_upload += 1);
        Self::next(&self.upload, "upload request")
    }
}

// ============================================================================
// STATIC TRANSFER
// ============================================================================

/// Asset transfer serving one fixed image and accepting uploads.
#[derive(Debug)]
pub struct StaticTransfer {
    image: RunResult<ImageAsset>,
    upload_error: Option<RunError>,
    fetches: AtomicUsize,
    uploads: AtomicUsize,
}

impl StaticTransfer {
    pub fn new(image: ImageAsset) -> Self {
        Self {
            image: Ok(image),
            upload_error: None,
            fetches: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    /// A PNG of `size` zero bytes.
    pub fn png(size: usize) -> Self {
        Self::new(ImageAsset::new("image/png", vec![0u8; size]))
    }

    pub fn failing_fetch(err: RunError) -> Self {
        Self {
            image: Err(err),
            ..Self::png(0)
        }
    }

    pub fn with_upload_error(mut self, err: RunError) -> Self {
        self.upload_error = Some(err);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetTransfer for StaticTransfer {
    async fn fetch_image(&self, _url: &str) -> RunResult<ImageAsset> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.image.clone()
    }

    async fn upload(&self, _ticket: &UploadTicket, _asset: &ImageAsset) -> RunResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        match &self.upload_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// STATIC SEARCH
// ============================================================================

/// Search collaborator returning a fixed answer.
#[derive(Debug)]
pub struct StaticSearch {
    answer: RunResult<Vec<Candidate>>,
    calls: Arc<AtomicUsize>,
}

impl StaticSearch {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            answer: Ok(candidates),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn failing(err: RunError) -> Self {
        Self {
            answer: Err(err),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of search calls, usable after the search is moved.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, _query: &str) -> RunResult<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer.clone()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Session documents shaped like real backend responses.

    use super::*;
    use diver_core::CompletionStatus;
    use serde_json::{json, Value};

    pub const SESSION_ID: &str = "sess-1";
    pub const FIVE_MB: u64 = 5 * 1024 * 1024;

    fn document(value: Value) -> SessionDocument {
        serde_json::from_value(value).unwrap_or_else(|e| panic!("invalid fixture document: {e}"))
    }

    /// p1 File `["image/png"]` up to 5MB, p2 String up to 280, output p3
    /// "Generated Text", export p4 of type "download".
    pub fn scenario_session() -> SessionDocument {
        document(json!({
            "sessionId": SESSION_ID,
            "parameters": {
                "p1": {"id": "p1", "name": "Photo", "type": "File", "format": ["image/png"], "max": FIVE_MB},
                "p2": {"id": "p2", "name": "Caption", "type": "String", "max": 280}
            },
            "outputs": {
                "p3": {"id": "p3", "name": "Generated Text", "version": "o1", "content": []}
            },
            "exports": {
                "p4": {"id": "p4", "name": "Render", "type": "download", "version": "e1"}
            }
        }))
    }

    /// The scenario session with its File parameter replaced by a Float.
    pub fn session_without_file_parameter() -> SessionDocument {
        document(json!({
            "sessionId": SESSION_ID,
            "parameters": {
                "p1": {"id": "p1", "name": "Scale", "type": "Float", "max": 10},
                "p2": {"id": "p2", "name": "Caption", "type": "String", "max": 280}
            },
            "outputs": {
                "p3": {"id": "p3", "name": "Generated Text", "version": "o1"}
            },
            "exports": {
                "p4": {"id": "p4", "name": "Render", "type": "download", "version": "e1"}
            }
        }))
    }

    /// Output p3 still computing.
    pub fn outputs_pending(delay_ms: i64) -> SessionDocument {
        document(json!({
            "outputs": {
                "p3": {"id": "p3", "name": "Generated Text", "version": "o2", "delay": delay_ms, "content": null}
            }
        }))
    }

    /// Output p3 ready with inline `text`.
    pub fn outputs_ready(text: &str) -> SessionDocument {
        document(json!({
            "outputs": {
                "p3": {"id": "p3", "name": "Generated Text", "version": "o2", "delay": 0,
                       "content": [{"data": text}]}
            }
        }))
    }

    /// Output p3 reported ready but without content.
    pub fn outputs_empty() -> SessionDocument {
        document(json!({
            "outputs": {
                "p3": {"id": "p3", "name": "Generated Text", "version": "o2", "delay": 0, "content": []}
            }
        }))
    }

    /// Export p4 still computing.
    pub fn export_pending(delay_ms: i64) -> SessionDocument {
        document(json!({
            "exports": {
                "p4": {"id": "p4", "name": "Render", "type": "download", "version": "e2", "delay": delay_ms}
            }
        }))
    }

    /// Export p4 finished with the given statuses and one download link.
    pub fn export_with_statuses(
        computation: CompletionStatus,
        collect: CompletionStatus,
        href: &str,
    ) -> SessionDocument {
        document(json!({
            "exports": {
                "p4": {
                    "id": "p4", "name": "Render", "type": "download", "version": "e2", "delay": 0,
                    "status_computation": status_name(computation),
                    "status_collect": status_name(collect),
                    "content": [{"href": href, "format": "png", "size": 2048}]
                }
            }
        }))
    }

    /// Export p4 finished successfully with one download link.
    pub fn export_finished(href: &str) -> SessionDocument {
        export_with_statuses(CompletionStatus::Success, CompletionStatus::Success, href)
    }

    fn status_name(status: CompletionStatus) -> &'static str {
        match status {
            CompletionStatus::Pending => "pending",
            CompletionStatus::Success => "success",
            CompletionStatus::Failure => "failure",
            CompletionStatus::Unrecognized => "unknown",
        }
    }

    pub fn upload_tickets(parameter_id: &str, asset_id: &str) -> UploadTickets {
        let mut tickets = UploadTickets::new();
        tickets.insert(
            parameter_id.to_string(),
            UploadTicket {
                id: asset_id.to_string(),
                href: format!("https://upload.test/{asset_id}"),
                headers: Default::default(),
            },
        );
        tickets
    }

    pub fn candidate(text: &str) -> Candidate {
        Candidate {
            id: "1700000000000000001".to_string(),
            text: text.to_string(),
            image_url: "https://pbs.test/media/photo.png".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diver_core::RemoteSession;

    #[test]
    fn test_scenario_session_parses() {
        let session = RemoteSession::from_document(fixtures::scenario_session()).unwrap();
        assert_eq!(session.id().as_str(), fixtures::SESSION_ID);
        assert_eq!(session.parameters().count(), 2);
        assert_eq!(session.export("p4").unwrap().export_type, "download");
    }

    #[tokio::test]
    async fn test_scripted_backend_counts_and_exhausts() {
        let backend = ScriptedBackend::new().with_init(fixtures::scenario_session());
        assert!(backend.init_session("t").await.is_ok());
        assert_eq!(
            backend.init_session("t").await.unwrap_err().kind(),
            "transport_failure"
        );
        assert_eq!(backend.calls().init_session, 2);
        assert_eq!(backend.calls().mutating(), 0);
    }
}
