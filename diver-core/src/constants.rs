//! Constants shared across the diver workspace.

// ============================================================================
// MODEL CONTRACT
// ============================================================================

/// Format prefix a `File` parameter must accept to take images.
pub const IMAGE_FORMAT_PREFIX: &str = "image/";

/// Minimum declared length of the `String` parameter that receives post text.
pub const MIN_TEXT_PARAMETER_LENGTH: u64 = 140;

/// Substring (lowercase) identifying the text output by name.
pub const TEXT_OUTPUT_MARKER: &str = "text";

/// Export type that yields a downloadable artifact.
pub const DOWNLOAD_EXPORT_TYPE: &str = "download";

// ============================================================================
// POLLING
// ============================================================================

/// Delay reported for artifacts without a known delay.
pub const NO_DELAY: i64 = -1;

/// Default server-side wait hint sent with export requests (milliseconds).
pub const DEFAULT_EXPORT_WAIT_HINT_MS: u64 = 30_000;

// ============================================================================
// UPLOAD
// ============================================================================

/// Status codes accepted as a successful asset upload.
pub const UPLOAD_SUCCESS_STATUSES: [u16; 2] = [200, 201];
