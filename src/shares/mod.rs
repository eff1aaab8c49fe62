//! Share Registry (spec.md §4.6, component C6) and the sender-facing half
//! of the Transfer Protocol (component C8).

pub mod model;
pub mod registry;
pub mod routes;

pub use model::{Share, ShareStatus};
pub use registry::{DownloadGuard, ShareRegistry};
pub use routes::router;
