//! Download Registry (spec.md §4.7, component C7) and the receiver-facing
//! half of the Transfer Protocol (component C8).

pub mod model;
pub mod registry;
pub mod routes;
pub mod transfer;

pub use model::{Download, DownloadStatus};
pub use registry::{DownloadGuard, DownloadRegistry};
pub use routes::router;
