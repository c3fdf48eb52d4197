//! DIVER Geometry - Computation Backend Relay
//!
//! Talks to the parametric-design backend: opens a session, locates the
//! model's image/text parameters, text output and download export by
//! shape, uploads the image, then submits and polls the customization and
//! the export until both are ready or their deadlines run out.

pub mod backend;
pub mod contract;
pub mod http;
pub mod poll;
pub mod runner;

pub use backend::{
    AssetTransfer, CustomizationRequest, ExportRequest, ExportSelector, GeometryBackend,
    UploadRequest, UploadSpec, UploadTicket, UploadTickets,
};
pub use contract::{ImageParameter, ModelContract, TextParameter};
pub use http::{HttpAssetTransfer, HttpGeometryBackend};
pub use poll::{
    export_delay, max_output_delay, submit_customization_and_wait, submit_export_and_wait,
    wait_for_customization, wait_for_export, wait_until_ready,
};
pub use runner::{ModelRunner, RunConfig};
