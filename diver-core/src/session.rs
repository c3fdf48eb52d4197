//! Remote session model.
//!
//! The computation backend answers every call with a session-shaped
//! document whose sections (parameters, outputs, exports) are keyed maps.
//! Maps keep the backend's insertion order, which structural lookups rely
//! on for deterministic first-match selection.

use crate::constants::NO_DELAY;
use crate::error::{RunError, RunResult};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Version token per artifact id, as sent to the cache endpoints.
pub type VersionMap = IndexMap<String, String>;

// ============================================================================
// IDENTITY
// ============================================================================

/// Server-issued session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Accepted input slot declared by the remote model.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawParameter")]
pub struct ParameterDefinition {
    pub id: String,
    pub name: String,
    pub kind: ParameterKind,
}

/// Kind-specific constraints of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    File {
        /// Allowed MIME types
        formats: Vec<String>,
        /// Maximum size in bytes, `None` when undeclared
        max_size: Option<u64>,
    },
    String {
        /// Maximum length in characters
        max_length: u64,
    },
    /// Any kind this workflow does not use
    Other(String),
}

impl ParameterDefinition {
    pub fn file(
        id: impl Into<String>,
        name: impl Into<String>,
        formats: Vec<String>,
        max_size: Option<u64>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ParameterKind::File { formats, max_size },
        }
    }

    pub fn string(id: impl Into<String>, name: impl Into<String>, max_length: u64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ParameterKind::String { max_length },
        }
    }

    pub fn other(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ParameterKind::Other(kind.into()),
        }
    }
}

/// Wire shape of a parameter before kind-specific interpretation.
#[derive(Deserialize)]
struct RawParameter {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    format: Option<Vec<String>>,
    #[serde(default)]
    max: Option<serde_json::Value>,
}

impl From<RawParameter> for ParameterDefinition {
    fn from(raw: RawParameter) -> Self {
        let max = raw.max.as_ref().and_then(numeric_limit);
        let kind = match raw.kind.as_str() {
            "File" => ParameterKind::File {
                formats: raw.format.unwrap_or_default(),
                max_size: max,
            },
            "String" => ParameterKind::String {
                max_length: max.unwrap_or(0),
            },
            _ => ParameterKind::Other(raw.kind),
        };
        Self {
            id: raw.id,
            name: raw.name,
            kind,
        }
    }
}

/// Limits arrive as numbers or numeric strings.
fn numeric_limit(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| *f >= 0.0)
            .map(|f| f as u64),
        _ => None,
    }
}

// ============================================================================
// ARTIFACTS
// ============================================================================

/// One result item of a ready artifact.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ContentItem {
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl ContentItem {
    pub fn inline(data: impl Into<String>) -> Self {
        Self {
            data: Some(serde_json::Value::String(data.into())),
            ..Self::default()
        }
    }

    pub fn link(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            ..Self::default()
        }
    }

    /// Inline data rendered as text.
    pub fn data_text(&self) -> Option<String> {
        match self.data.as_ref()? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Completion status of one export stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Pending,
    Success,
    Failure,
    #[serde(other)]
    Unrecognized,
}

/// State of a computed (or computing) output.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct OutputState {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub delay: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: Vec<ContentItem>,
}

impl OutputState {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay_ms: i64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn with_content(mut self, content: Vec<ContentItem>) -> Self {
        self.content = content;
        self
    }
}

/// Declared export and, once requested, its computation state.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ExportState {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub export_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub delay: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub status_computation: Option<CompletionStatus>,
    #[serde(default)]
    pub status_collect: Option<CompletionStatus>,
}

impl ExportState {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        export_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            export_type: export_type.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay_ms: i64) -> Self {
        self.delay = Some(delay_ms);
        self
    }

    pub fn with_content(mut self, content: Vec<ContentItem>) -> Self {
        self.content = content;
        self
    }

    pub fn with_statuses(mut self, computation: CompletionStatus, collect: CompletionStatus) -> Self {
        self.status_computation = Some(computation);
        self.status_collect = Some(collect);
        self
    }
}

/// Borrowed view over either artifact kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Artifact<'a> {
    Output(&'a OutputState),
    Export(&'a ExportState),
}

impl<'a> Artifact<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            Self::Output(o) => &o.id,
            Self::Export(e) => &e.id,
        }
    }

    pub fn version(&self) -> &'a str {
        match self {
            Self::Output(o) => &o.version,
            Self::Export(e) => &e.version,
        }
    }

    /// Reported delay in milliseconds, [`NO_DELAY`] when absent.
    pub fn delay_ms(&self) -> i64 {
        let delay = match self {
            Self::Output(o) => o.delay,
            Self::Export(e) => e.delay,
        };
        delay.unwrap_or(NO_DELAY)
    }

    pub fn content(&self) -> &'a [ContentItem] {
        match self {
            Self::Output(o) => &o.content,
            Self::Export(e) => &e.content,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delay_ms() > 0
    }

    pub fn is_ready(&self) -> bool {
        !self.is_pending() && !self.content().is_empty()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// DOCUMENTS
// ============================================================================

/// Session-shaped response document.
///
/// Sections absent from a response are `None`; sections present are
/// authoritative for that response.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub parameters: Option<IndexMap<String, ParameterDefinition>>,
    #[serde(default)]
    pub outputs: Option<IndexMap<String, OutputState>>,
    #[serde(default)]
    pub exports: Option<IndexMap<String, ExportState>>,
}

impl SessionDocument {
    pub fn output(&self, id: &str) -> Option<&OutputState> {
        self.outputs.as_ref()?.get(id)
    }

    pub fn export(&self, id: &str) -> Option<&ExportState> {
        self.exports.as_ref()?.get(id)
    }

    /// All outputs as artifacts, in document order.
    pub fn output_artifacts(&self) -> impl Iterator<Item = Artifact<'_>> {
        self.outputs
            .iter()
            .flat_map(|outputs| outputs.values())
            .map(Artifact::Output)
    }

    /// Version tokens of every output in this document.
    pub fn output_versions(&self) -> VersionMap {
        self.output_artifacts()
            .map(|a| (a.id().to_string(), a.version().to_string()))
            .collect()
    }

    /// Version token of one export, keyed by its id.
    pub fn export_version(&self, export_id: &str) -> VersionMap {
        self.export(export_id)
            .map(|e| (e.id.clone(), e.version.clone()))
            .into_iter()
            .collect()
    }
}

/// State of one computation-backend session for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSession {
    id: SessionId,
    parameters: IndexMap<String, ParameterDefinition>,
    outputs: IndexMap<String, OutputState>,
    exports: IndexMap<String, ExportState>,
}

impl RemoteSession {
    /// Empty session with the given id.
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            parameters: IndexMap::new(),
            outputs: IndexMap::new(),
            exports: IndexMap::new(),
        }
    }

    /// Build a session from the session-initialization response.
    ///
    /// The id is taken from the document's explicit `sessionId` field.
    pub fn from_document(document: SessionDocument) -> RunResult<Self> {
        let id = document
            .session_id
            .clone()
            .ok_or_else(|| RunError::transport("session init", "response carries no sessionId"))?;
        let mut session = Self::new(id);
        session.apply(document);
        Ok(session)
    }

    pub fn with_parameter(mut self, parameter: ParameterDefinition) -> Self {
        self.parameters.insert(parameter.id.clone(), parameter);
        self
    }

    pub fn with_output(mut self, output: OutputState) -> Self {
        self.outputs.insert(output.id.clone(), output);
        self
    }

    pub fn with_export(mut self, export: ExportState) -> Self {
        self.exports.insert(export.id.clone(), export);
        self
    }

    /// Replace every section the document carries. The id never changes.
    pub fn apply(&mut self, document: SessionDocument) {
        if let Some(parameters) = document.parameters {
            self.parameters = parameters;
        }
        if let Some(outputs) = document.outputs {
            self.outputs = outputs;
        }
        if let Some(exports) = document.exports {
            self.exports = exports;
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Declared parameters in insertion order.
    pub fn parameters(&self) -> impl Iterator<Item = &ParameterDefinition> {
        self.parameters.values()
    }

    pub fn parameter(&self, id: &str) -> Option<&ParameterDefinition> {
        self.parameters.get(id)
    }

    /// Declared outputs in insertion order.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputState> {
        self.outputs.values()
    }

    pub fn output(&self, id: &str) -> Option<&OutputState> {
        self.outputs.get(id)
    }

    /// Declared exports in insertion order.
    pub fn exports(&self) -> impl Iterator<Item = &ExportState> {
        self.exports.values()
    }

    pub fn export(&self, id: &str) -> Option<&ExportState> {
        self.exports.get(id)
    }
}

// =============================================================================
// TESTS
// =============================================================================
