//! `PackageReader`: the opaque handle over an open package (spec.md §3).
//!
//! The zip-archive reading itself is the external collaborator the spec
//! calls out, so this is a trait object — hosts may substitute their own
//! implementation. [`super::zip_reader::ZipPackageReader`] is the one
//! concrete implementation this crate ships.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::AppError;

/// Style-derived metadata computed once when a reader is opened (spec.md §3
/// `MapInfo`: `bounds`, `minzoom`, `maxzoom`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderMetadata {
    pub bounds: [f64; 4],
    pub minzoom: u32,
    pub maxzoom: u32,
}

impl Default for ReaderMetadata {
    /// Web-Mercator-safe world bounds, zoom 0–22, per spec.md §3 when the
    /// package's sources are silent about extent/zoom.
    fn default() -> Self {
        Self {
            bounds: [-180.0, -85.0511, 180.0, 85.0511],
            minzoom: 0,
            maxzoom: 22,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceResponse {
    pub content_type: String,
    pub content_length: u64,
    pub content_encoding: Option<String>,
    pub body: Bytes,
}

#[async_trait]
pub trait PackageReader: Send + Sync {
    fn metadata(&self) -> ReaderMetadata;

    /// `getStyle(baseURL) → StyleDoc` — style document with `local://`
    /// resource references rewritten against `base_url`.
    async fn get_style(&self, base_url: &str) -> Result<Value, AppError>;

    /// `serveResource(request) → Response` — handles content-type and
    /// content-length; range reads and content-encoding passthrough are the
    /// concrete implementation's concern.
    async fn serve_resource(&self, request_path: &str) -> Result<ResourceResponse, AppError>;

    /// Best-effort close; superseded readers are closed after a successful
    /// swap, never before in-flight reads against them finish.
    async fn close(&self);
}

/// Opens a `PackageReader` over a package file at `path`.
#[async_trait]
pub trait PackageReaderFactory: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PackageReader>, AppError>;
}
