//! Inputs and outputs of one relay run.

use serde::{Deserialize, Serialize};

/// A post returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub text: String,
    pub image_url: String,
}

/// What the orchestrator needs from a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInput {
    pub text: String,
    pub image_url: String,
}

impl From<&Candidate> for RunInput {
    fn from(candidate: &Candidate) -> Self {
        Self {
            text: candidate.text.clone(),
            image_url: candidate.image_url.clone(),
        }
    }
}

/// Generated text and the URL of the exported image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub text: String,
    pub image_url: String,
}

/// Image bytes fetched from a candidate's image URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageAsset {
    /// Declared content type, without parameters
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageAsset {
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl std::fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAsset")
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}
