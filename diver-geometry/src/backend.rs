//! Computation backend contracts.
//!
//! [`GeometryBackend`] is the remote session API; [`AssetTransfer`] moves
//! raw image bytes. Both are traits so the orchestrator can run against
//! the HTTP implementations in [`crate::http`] or scripted fakes.

use async_trait::async_trait;
use diver_core::{ImageAsset, RunResult, SessionDocument, SessionId, VersionMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// REQUEST/RESPONSE TYPES
// ============================================================================

/// Parameter values for a customization, keyed by parameter id.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct CustomizationRequest(IndexMap<String, String>);

impl CustomizationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, parameter_id: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(parameter_id.into(), value.into());
        self
    }

    pub fn get(&self, parameter_id: &str) -> Option<&str> {
        self.0.get(parameter_id).map(String::as_str)
    }
}

/// Export selection inside an [`ExportRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSelector {
    pub id: String,
}

/// Body of an export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub exports: ExportSelector,
    pub parameters: CustomizationRequest,
    /// Server-side wait hint in milliseconds
    pub max_wait_time: u64,
}

/// Declared format and size of one file to upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSpec {
    pub format: String,
    pub size: u64,
}

/// Upload-ticket request, keyed by parameter id.
pub type UploadRequest = IndexMap<String, UploadSpec>;

/// Upload target for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadTicket {
    /// Server-assigned asset id, used as the parameter value
    pub id: String,
    /// Destination for the raw bytes
    pub href: String,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
}

/// Upload tickets keyed by parameter id.
pub type UploadTickets = IndexMap<String, UploadTicket>;

// ============================================================================
// TRAITS
// ============================================================================

/// Remote session API of the computation backend.
///
/// Every call is a single request/response; none are retried here.
#[async_trait]
pub trait GeometryBackend: Send + Sync {
    /// Open a session for the model the ticket grants access to.
    async fn init_session(&self, ticket: &str) -> RunResult<SessionDocument>;

    /// Submit new parameter values.
    async fn customize(
        &self,
        session: &SessionId,
        request: &CustomizationRequest,
    ) -> RunResult<SessionDocument>;

    /// Ask whether outputs changed from the given versions.
    async fn output_cache(
        &self,
        session: &SessionId,
        versions: &VersionMap,
    ) -> RunResult<SessionDocument>;

    /// Submit an export job.
    async fn compute_export(
        &self,
        session: &SessionId,
        request: &ExportRequest,
    ) -> RunResult<SessionDocument>;

    /// Ask whether exports changed from the given versions.
    async fn export_cache(
        &self,
        session: &SessionId,
        versions: &VersionMap,
    ) -> RunResult<SessionDocument>;

    /// Request upload targets for file parameters.
    async fn request_upload(
        &self,
        session: &SessionId,
        request: &UploadRequest,
    ) -> RunResult<UploadTickets>;
}

/// Raw byte transfer for images.
#[async_trait]
pub trait AssetTransfer: Send + Sync {
    /// Download an image and report its declared content type.
    async fn fetch_image(&self, url: &str) -> RunResult<ImageAsset>;

    /// Upload bytes to a ticket's destination.
    async fn upload(&self, ticket: &UploadTicket, asset: &ImageAsset) -> RunResult<()>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customization_request_serializes_as_flat_map() {
        let request = CustomizationRequest::new()
            .with("p1", "asset-7")
            .with("p2", "hello");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"p1": "asset-7", "p2": "hello"}));
    }

    #[test]
    fn test_export_request_shape() {
        let request = ExportRequest {
            exports: ExportSelector {
                id: "p4".to_string(),
            },
            parameters: CustomizationRequest::new().with("p2", "hello"),
            max_wait_time: 30_000,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "exports": {"id": "p4"},
                "parameters": {"p2": "hello"},
                "max_wait_time": 30000
            })
        );
    }

    #[test]
    fn test_upload_ticket_parses_without_headers() {
        let ticket: UploadTicket =
            serde_json::from_str(r#"{"id": "asset-7", "href": "https://upload.test/x"}"#).unwrap();
        assert_eq!(ticket.id, "asset-7");
        assert!(ticket.headers.is_empty());
    }
}
