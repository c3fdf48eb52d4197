//! Structural lookup of the remote model contract.
//!
//! Parameter, output and export identifiers are assigned by the backend per
//! deployment, so the workflow finds the pieces it needs by shape. Every
//! lookup walks the session's declarations in insertion order and takes the
//! first match.

use crate::backend::{CustomizationRequest, ExportRequest, ExportSelector, UploadRequest, UploadSpec};
use diver_core::constants::{DOWNLOAD_EXPORT_TYPE, IMAGE_FORMAT_PREFIX, MIN_TEXT_PARAMETER_LENGTH, TEXT_OUTPUT_MARKER};
use diver_core::{
    Artifact, ArtifactKind, CompletionStage, CompletionStatus, ContractElement, ExportState, ImageAsset,
    InputViolation, OutputState, ParameterDefinition, ParameterKind, RemoteSession, RunError,
    RunResult,
};

/// The `File` parameter that receives the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageParameter {
    pub id: String,
    pub formats: Vec<String>,
    pub max_size: Option<u64>,
}

/// The `String` parameter that receives the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextParameter {
    pub id: String,
    pub max_length: u64,
}

/// Everything the workflow needs from one remote model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelContract {
    pub image: ImageParameter,
    pub text: TextParameter,
    pub text_output_id: String,
    pub export_id: String,
}

impl ModelContract {
    /// Locate the four contract elements in a freshly initialized session.
    pub fn locate(session: &RemoteSession) -> RunResult<Self> {
        let image = session
            .parameters()
            .find_map(as_image_parameter)
            .ok_or(RunError::ConfigurationMismatch(ContractElement::ImageParameter))?;
        let text = session
            .parameters()
            .find_map(as_text_parameter)
            .ok_or(RunError::ConfigurationMismatch(ContractElement::TextParameter))?;
        let text_output = session
            .outputs()
            .find(|o| is_text_output(o))
            .ok_or(RunError::ConfigurationMismatch(ContractElement::TextOutput))?;
        let export = session
            .exports()
            .find(|e| is_download_export(e))
            .ok_or(RunError::ConfigurationMismatch(ContractElement::DownloadExport))?;

        Ok(Self {
            image,
            text,
            text_output_id: text_output.id.clone(),
            export_id: export.id.clone(),
        })
    }

    /// Reject text longer than the text parameter allows.
    pub fn validate_text(&self, text: &str) -> RunResult<()> {
        let length = text.chars().count();
        if length as u64 > self.text.max_length {
            return Err(InputViolation::TextTooLong {
                length,
                max: self.text.max_length,
            }
            .into());
        }
        Ok(())
    }

    /// Reject an image whose type or size the image parameter does not accept.
    pub fn validate_image(&self, asset: &ImageAsset) -> RunResult<()> {
        if !self
            .image
            .formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(&asset.content_type))
        {
            return Err(InputViolation::UnsupportedImageType {
                content_type: asset.content_type.clone(),
                allowed: self.image.formats.clone(),
            }
            .into());
        }
        if let Some(max) = self.image.max_size {
            if asset.size() > max {
                return Err(InputViolation::ImageTooLarge {
                    size: asset.size(),
                    max,
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn upload_request(&self, asset: &ImageAsset) -> UploadRequest {
        let mut request = UploadRequest::new();
        request.insert(
            self.image.id.clone(),
            UploadSpec {
                format: asset.content_type.clone(),
                size: asset.size(),
            },
        );
        request
    }

    /// `{image parameter: uploaded asset id, text parameter: text}`
    pub fn customization(&self, asset_id: &str, text: &str) -> CustomizationRequest {
        CustomizationRequest::new()
            .with(self.image.id.as_str(), asset_id)
            .with(self.text.id.as_str(), text)
    }

    pub fn export_request(&self, parameters: CustomizationRequest, wait_hint_ms: u64) -> ExportRequest {
        ExportRequest {
            exports: ExportSelector {
                id: self.export_id.clone(),
            },
            parameters,
            max_wait_time: wait_hint_ms,
        }
    }

    /// Inline data of the text output's first result item.
    pub fn extract_text(&self, session: &RemoteSession) -> RunResult<String> {
        session
            .output(&self.text_output_id)
            .filter(|&o| Artifact::Output(o).is_ready())
            .and_then(|o| o.content.first())
            .and_then(|item| item.data_text())
            .ok_or_else(|| RunError::EmptyResult {
                kind: ArtifactKind::Output,
                id: self.text_output_id.clone(),
            })
    }

    /// Retrieval URL of the export's first result item.
    ///
    /// Both completion statuses must be `success`; computation is checked
    /// first.
    pub fn extract_image_url(&self, session: &RemoteSession) -> RunResult<String> {
        let export = session.export(&self.export_id).ok_or_else(|| RunError::EmptyResult {
            kind: ArtifactKind::Export,
            id: self.export_id.clone(),
        })?;

        for (stage, status) in [
            (CompletionStage::Computation, export.status_computation),
            (CompletionStage::Collection, export.status_collect),
        ] {
            if status != Some(CompletionStatus::Success) {
                return Err(RunError::RemoteComputationFailed {
                    export_id: self.export_id.clone(),
                    stage,
                });
            }
        }

        export
            .content
            .first()
            .and_then(|item| item.href.clone())
            .ok_or_else(|| RunError::EmptyResult {
                kind: ArtifactKind::Export,
                id: self.export_id.clone(),
            })
    }
}

fn as_image_parameter(parameter: &ParameterDefinition) -> Option<ImageParameter> {
    match &parameter.kind {
        ParameterKind::File { formats, max_size }
            if formats.iter().any(|f| f.starts_with(IMAGE_FORMAT_PREFIX)) =>
        {
            Some(ImageParameter {
                id: parameter.id.clone(),
                formats: formats.clone(),
                max_size: *max_size,
            })
        }
        _ => None,
    }
}

fn as_text_parameter(parameter: &ParameterDefinition) -> Option<TextParameter> {
    match parameter.kind {
        ParameterKind::String { max_length } if max_length >= MIN_TEXT_PARAMETER_LENGTH => {
            Some(TextParameter {
                id: parameter.id.clone(),
                max_length,
            })
        }
        _ => None,
    }
}

fn is_text_output(output: &OutputState) -> bool {
    output.name.to_lowercase().contains(TEXT_OUTPUT_MARKER)
}

fn is_download_export(export: &ExportState) -> bool {
    export.export_type == DOWNLOAD_EXPORT_TYPE
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
    use diver_core::SessionId;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Among several matching image parameters the first inserted wins,
        /// whatever order the non-matching ones are interleaved in.
        #[test]
        fn prop_first_inserted_match_wins(
            order in Just((0usize..6).collect::<Vec<_>>()).prop_shuffle(),
        ) {
            let declared = [
                ParameterDefinition::file("a", "A", vec!["image/png".to_string()], None),
                ParameterDefinition::file("b", "B", vec!["image/jpeg".to_string()], None),
                ParameterDefinition::file("c", "C", vec!["text/plain".to_string()], None),
                ParameterDefinition::string("d", "D", 500),
                ParameterDefinition::string("e", "E", 140),
                ParameterDefinition::string("f", "F", 20),
            ];
            let mut session = RemoteSession::new(SessionId::new("s"))
                .with_output(OutputState::new("o", "text", "1"))
                .with_export(ExportState::new("x", "X", "download", "1"));
            for i in &order {
                session = session.with_parameter(declared[*i].clone());
            }

            let contract = ModelContract::locate(&session).unwrap();
            let position = |id: &str| order.iter().position(|i| declared[*i].id == id).unwrap();

            let expected_image = if position("a") < position("b") { "a" } else { "b" };
            let expected_text = if position("d") < position("e") { "d" } else { "e" };
            prop_assert_eq!(contract.image.id.as_str(), expected_image);
            prop_assert_eq!(contract.text.id.as_str(), expected_text);
        }
    }
}
