//! Concrete `PackageReader` backed by the `zip` crate. Ships as the default
//! so the store is runnable end-to-end without a host-supplied reader.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use super::reader::{PackageReader, PackageReaderFactory, ReaderMetadata, ResourceResponse};
use crate::error::{self, AppError};

pub struct ZipPackageReader {
    #[allow(dead_code)]
    path: PathBuf,
    archive: Arc<Mutex<zip::ZipArchive<File>>>,
    metadata: ReaderMetadata,
}

impl ZipPackageReader {
    pub async fn open(path: &Path) -> Result<Arc<dyn PackageReader>, AppError> {
        let path = path.to_path_buf();
        let opened = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> Result<_, AppError> {
                let file = File::open(&path).map_err(|err| error::invalid_map_file(err.to_string()))?;
                let mut archive =
                    zip::ZipArchive::new(file).map_err(|err| error::invalid_map_file(err.to_string()))?;
                let metadata = read_metadata(&mut archive).unwrap_or_default();
                Ok((archive, metadata))
            }
        })
        .await
        .map_err(|err| error::invalid_map_file(err.to_string()))??;
        let (archive, metadata) = opened;

        Ok(Arc::new(Self {
            path,
            archive: Arc::new(Mutex::new(archive)),
            metadata,
        }))
    }
}

fn read_metadata(archive: &mut zip::ZipArchive<File>) -> Option<ReaderMetadata> {
    let mut entry = archive.by_name("style.json").ok()?;
    let mut buf = String::new();
    entry.read_to_string(&mut buf).ok()?;
    drop(entry);
    let style: Value = serde_json::from_str(&buf).ok()?;

    let defaults = ReaderMetadata::default();
    let bounds = style
        .get("bounds")
        .and_then(Value::as_array)
        .filter(|arr| arr.len() == 4)
        .and_then(|arr| {
            Some([
                arr[0].as_f64()?,
                arr[1].as_f64()?,
                arr[2].as_f64()?,
                arr[3].as_f64()?,
            ])
        })
        .unwrap_or(defaults.bounds);
    let minzoom = style.get("minzoom").and_then(Value::as_u64).unwrap_or(defaults.minzoom as u64) as u32;
    let maxzoom = style.get("maxzoom").and_then(Value::as_u64).unwrap_or(defaults.maxzoom as u64) as u32;

    Some(ReaderMetadata { bounds, minzoom, maxzoom })
}

fn rewrite_local_urls(style: &mut Value, base_url: &str) {
    let Some(sources) = style.get_mut("sources").and_then(Value::as_object_mut) else {
        return;
    };
    for source in sources.values_mut() {
        let Some(url) = source.get("url").and_then(Value::as_str) else {
            continue;
        };
        if let Some(rel) = url.strip_prefix("local://") {
            let rewritten = format!("{}{}", base_url.trim_end_matches('/'), rel);
            source["url"] = Value::String(rewritten);
        }
    }
}

fn guess_content_type(entry_name: &str) -> String {
    let mime = if entry_name.ends_with(".json") {
        mime::APPLICATION_JSON
    } else if entry_name.ends_with(".pbf") || entry_name.ends_with(".mvt") {
        "application/x-protobuf".parse().expect("valid mime")
    } else if entry_name.ends_with(".png") {
        mime::IMAGE_PNG
    } else if entry_name.ends_with(".jpg") || entry_name.ends_with(".jpeg") {
        mime::IMAGE_JPEG
    } else if entry_name.ends_with(".webp") {
        "image/webp".parse().expect("valid mime")
    } else {
        mime::APPLICATION_OCTET_STREAM
    };
    mime.to_string()
}

#[async_trait]
impl PackageReader for ZipPackageReader {
    fn metadata(&self) -> ReaderMetadata {
        self.metadata
    }

    async fn get_style(&self, base_url: &str) -> Result<Value, AppError> {
        let archive = self.archive.clone();
        let base_url = base_url.to_string();
        tokio::task::spawn_blocking(move || -> Result<Value, AppError> {
            let mut archive = archive.lock().expect("zip archive mutex poisoned");
            let mut entry = archive
                .by_name("style.json")
                .map_err(|_| error::resource_not_found("style.json missing from package"))?;
            let mut buf = String::new();
            entry
                .read_to_string(&mut buf)
                .map_err(|err| error::invalid_map_file(err.to_string()))?;
            drop(entry);
            let mut style: Value =
                serde_json::from_str(&buf).map_err(|err| error::invalid_map_file(err.to_string()))?;
            rewrite_local_urls(&mut style, &base_url);
            Ok(style)
        })
        .await
        .map_err(|err| error::invalid_map_file(err.to_string()))?
    }

    async fn serve_resource(&self, request_path: &str) -> Result<ResourceResponse, AppError> {
        let archive = self.archive.clone();
        let entry_name = request_path.trim_start_matches('/').to_string();
        tokio::task::spawn_blocking(move || -> Result<ResourceResponse, AppError> {
            let mut archive = archive.lock().expect("zip archive mutex poisoned");
            let mut entry = archive
                .by_name(&entry_name)
                .map_err(|_| error::resource_not_found(format!("no such resource: {entry_name}")))?;
            let content_length = entry.size();
            let content_type = guess_content_type(&entry_name);
            let mut body = Vec::with_capacity(content_length as usize);
            entry
                .read_to_end(&mut body)
                .map_err(|err| error::invalid_map_file(err.to_string()))?;
            Ok(ResourceResponse {
                content_type,
                content_length,
                content_encoding: None,
                body: Bytes::from(body),
            })
        })
        .await
        .map_err(|err| error::invalid_map_file(err.to_string()))?
    }

    async fn close(&self) {}
}

pub struct ZipReaderFactory;

#[async_trait]
impl PackageReaderFactory for ZipReaderFactory {
    async fn open(&self, path: &Path) -> Result<Arc<dyn PackageReader>, AppError> {
        ZipPackageReader::open(path).await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_test_package(dir: &std::path::Path, style: &str) -> PathBuf {
        let path = dir.join("test.smp");
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("style.json", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(style.as_bytes()).unwrap();
        zip.finish().unwrap();
        path
    }

    #[tokio::test]
    async fn reads_bounds_and_zoom_from_style() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_package(
            dir.path(),
            r#"{"bounds":[-10,-20,10,20],"minzoom":2,"maxzoom":14,"sources":{}}"#,
        );
        let reader = ZipPackageReader::open(&path).await.unwrap();
        let meta = reader.metadata();
        assert_eq!(meta.bounds, [-10.0, -20.0, 10.0, 20.0]);
        assert_eq!(meta.minzoom, 2);
        assert_eq!(meta.maxzoom, 14);
    }

    #[tokio::test]
    async fn missing_style_falls_back_to_world_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.smp");
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("tiles/0/0/0.pbf", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();

        let reader = ZipPackageReader::open(&path).await.unwrap();
        assert_eq!(reader.metadata(), ReaderMetadata::default());
    }

    #[tokio::test]
    async fn get_style_rewrites_local_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_package(
            dir.path(),
            r#"{"sources":{"a":{"url":"local://tiles.json"}}}"#,
        );
        let reader = ZipPackageReader::open(&path).await.unwrap();
        let style = reader.get_style("http://127.0.0.1:8080/maps/custom/").await.unwrap();
        assert_eq!(
            style["sources"]["a"]["url"],
            "http://127.0.0.1:8080/maps/custom/tiles.json"
        );
    }

    #[tokio::test]
    async fn serve_resource_errors_for_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_package(dir.path(), r#"{}"#);
        let reader = ZipPackageReader::open(&path).await.unwrap();
        let err = reader.serve_resource("/nope.png").await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ResourceNotFound);
    }
}
