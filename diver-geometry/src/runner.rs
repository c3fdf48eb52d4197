//! Orchestration of one model run.

use crate::backend::{AssetTransfer, GeometryBackend};
use crate::contract::ModelContract;
use crate::poll::{submit_customization_and_wait, submit_export_and_wait};
use diver_core::constants::DEFAULT_EXPORT_WAIT_HINT_MS;
use diver_core::{Deadline, RemoteSession, RunError, RunInput, RunOutput, RunResult};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info};

/// Time budgets for the two waits of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Budget for the customization submission plus its output polling
    pub customization_max_wait: Deadline,
    /// Budget for the export submission plus its polling
    pub export_max_wait: Deadline,
    /// Server-side wait hint sent with the export request
    pub export_wait_hint_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            customization_max_wait: Deadline::Unbounded,
            export_max_wait: Deadline::Unbounded,
            export_wait_hint_ms: DEFAULT_EXPORT_WAIT_HINT_MS,
        }
    }
}

/// Runs the relay workflow against one deployed model.
#[derive(Clone)]
pub struct ModelRunner {
    backend: Arc<dyn GeometryBackend>,
    transfer: Arc<dyn AssetTransfer>,
    ticket: Arc<SecretString>,
    config: RunConfig,
}

impl ModelRunner {
    pub fn new(
        backend: Arc<dyn GeometryBackend>,
        transfer: Arc<dyn AssetTransfer>,
        ticket: SecretString,
        config: RunConfig,
    ) -> Self {
        Self {
            backend,
            transfer,
            ticket: Arc::new(ticket),
            config,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Feed text and an image through the model and return what it produced.
    ///
    /// Nothing is uploaded or submitted until the session matches the
    /// expected contract and both inputs pass validation.
    pub async fn run_model(&self, input: &RunInput) -> RunResult<RunOutput> {
        let document = self.backend.init_session(self.ticket.expose_secret()).await?;
        let mut session = RemoteSession::from_document(document)?;
        let session_id = session.id().clone();
        info!(session_id = %session_id, "Session initialized");

        let contract = match ModelContract::locate(&session) {
            Ok(contract) => contract,
            Err(e) => {
                log_declarations(&session);
                return Err(e);
            }
        };
        debug!(session_id = %session_id, contract = ?contract, "Model contract located");

        contract.validate_text(&input.text)?;
        let asset = self.transfer.fetch_image(&input.image_url).await?;
        contract.validate_image(&asset)?;

        let tickets = self
            .backend
            .request_upload(&session_id, &contract.upload_request(&asset))
            .await?;
        let ticket = tickets.get(&contract.image.id).ok_or_else(|| {
            RunError::transport(
                "upload request",
                format!("no upload ticket for parameter {}", contract.image.id),
            )
        })?;
        self.transfer.upload(ticket, &asset).await?;
        debug!(session_id = %session_id, asset_id = %ticket.id, size = asset.size(), "Image uploaded");

        let parameters = contract.customization(&ticket.id, &input.text);
        let customized = submit_customization_and_wait(
            self.backend.as_ref(),
            &session_id,
            &parameters,
            self.config.customization_max_wait,
        )
        .await?;
        session.apply(customized);
        let text = contract.extract_text(&session)?;
        debug!(session_id = %session_id, text = %text, "Customization complete");

        let export_request = contract.export_request(parameters, self.config.export_wait_hint_ms);
        let exported = submit_export_and_wait(
            self.backend.as_ref(),
            &session_id,
            &export_request,
            self.config.export_max_wait,
        )
        .await?;
        session.apply(exported);
        let image_url = contract.extract_image_url(&session)?;
        info!(session_id = %session_id, image_url = %image_url, "Export complete");

        Ok(RunOutput { text, image_url })
    }
}

impl std::fmt::Debug for ModelRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn log_declarations(session: &RemoteSession) {
    for parameter in session.parameters() {
        debug!(id = %parameter.id, name = %parameter.name, kind = ?parameter.kind, "Declared parameter");
    }
    for output in session.outputs() {
        debug!(id = %output.id, name = %output.name, "Declared output");
    }
    for export in session.exports() {
        debug!(id = %export.id, name = %export.name, export_type = %export.export_type, "Declared export");
    }
}
