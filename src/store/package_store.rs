//! Named-slot package files; atomic write-through; readers tracked for
//! graceful swap (spec.md §4.1).

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::reader::{PackageReader, PackageReaderFactory};
use super::slot::PackageSlot;
use crate::error::{self, AppError};

pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Projection extracted from a slot (spec.md §3 `MapInfo`).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MapInfo {
    pub slot_id: PackageSlot,
    pub name: String,
    pub estimated_size_bytes: u64,
    pub bounds: [f64; 4],
    pub minzoom: u32,
    pub maxzoom: u32,
    pub created_at_ms: u64,
}

struct SlotState {
    path: PathBuf,
    mutable: bool,
    write_lock: Arc<Mutex<()>>,
    reader: RwLock<Option<Arc<dyn PackageReader>>>,
    download_counter: AtomicU64,
}

impl SlotState {
    fn new(path: PathBuf, mutable: bool) -> Self {
        Self {
            path,
            mutable,
            write_lock: Arc::new(Mutex::new(())),
            reader: RwLock::new(None),
            download_counter: AtomicU64::new(0),
        }
    }
}

struct Inner {
    slots: HashMap<PackageSlot, SlotState>,
    factory: Arc<dyn PackageReaderFactory>,
}

#[derive(Clone)]
pub struct PackageStore {
    inner: Arc<Inner>,
}

impl PackageStore {
    pub fn new(custom_path: PathBuf, fallback_path: PathBuf, factory: Arc<dyn PackageReaderFactory>) -> Self {
        let mut slots = HashMap::new();
        slots.insert(PackageSlot::Custom, SlotState::new(custom_path, true));
        slots.insert(PackageSlot::Fallback, SlotState::new(fallback_path, false));
        Self {
            inner: Arc::new(Inner { slots, factory }),
        }
    }

    fn slot(&self, slot: PackageSlot) -> &SlotState {
        self.inner
            .slots
            .get(&slot)
            .expect("every PackageSlot variant is registered in PackageStore::new")
    }

    pub fn path_of(&self, slot: PackageSlot) -> PathBuf {
        self.slot(slot).path.clone()
    }

    /// `getInfo(slotId) → MapInfo`.
    pub async fn get_info(&self, slot: PackageSlot) -> Result<MapInfo, AppError> {
        let state = self.slot(slot);
        let fs_meta = tokio::fs::metadata(&state.path)
            .await
            .map_err(|_| error::map_not_found(format!("slot {slot} is empty")))?;
        let reader = self.get_reader(slot).await?;
        let meta = reader.metadata();
        let name = state
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| slot.to_string());
        let created_at_ms = fs_meta
            .created()
            .or_else(|_| fs_meta.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Ok(MapInfo {
            slot_id: slot,
            name,
            estimated_size_bytes: fs_meta.len(),
            bounds: meta.bounds,
            minzoom: meta.minzoom,
            maxzoom: meta.maxzoom,
            created_at_ms,
        })
    }

    /// `getReader(slotId) → PackageReader` — memoizes one reader per slot,
    /// opens lazily, never returns a closed reader.
    pub async fn get_reader(&self, slot: PackageSlot) -> Result<Arc<dyn PackageReader>, AppError> {
        let state = self.slot(slot);
        {
            let guard = state.reader.read().await;
            if let Some(reader) = guard.as_ref() {
                return Ok(reader.clone());
            }
        }
        let mut guard = state.reader.write().await;
        if let Some(reader) = guard.as_ref() {
            return Ok(reader.clone());
        }
        if !state.path.exists() {
            return Err(error::map_not_found(format!("slot {slot} is empty")));
        }
        let reader = self.inner.factory.open(&state.path).await?;
        *guard = Some(reader.clone());
        Ok(reader)
    }

    /// `openRead(slotId) → ByteStream` — the returned stream reads from an
    /// already-open file descriptor, so a later swap (which renames a new
    /// file over the path) cannot corrupt it: POSIX rename never touches
    /// inodes already held open elsewhere.
    pub async fn open_read(&self, slot: PackageSlot) -> Result<(ByteStream, u64), AppError> {
        let state = self.slot(slot);
        if !state.path.exists() {
            return Err(error::map_not_found(format!("slot {slot} is empty")));
        }
        let file = tokio::fs::File::open(&state.path).await.map_err(io_error)?;
        let len = file.metadata().await.map_err(io_error)?.len();
        let stream = tokio_util::io::ReaderStream::new(file);
        Ok((Box::pin(stream), len))
    }

    /// `openWrite(slotId) → ByteSink`.
    pub async fn open_write(&self, slot: PackageSlot) -> Result<WriteSink, AppError> {
        let state = self.slot(slot);
        if !state.mutable {
            return Err(error::forbidden(format!("slot {slot} is read-only")));
        }
        let permit = state.write_lock.clone().lock_owned().await;
        let counter = state.download_counter.fetch_add(1, Ordering::SeqCst);
        let temp_path = temp_path_for(&state.path, counter);
        let file = tokio::fs::File::create(&temp_path).await.map_err(io_error)?;
        Ok(WriteSink {
            temp_path,
            target_path: state.path.clone(),
            file: Some(file),
            slot,
            store: self.clone(),
            _permit: permit,
            closed: false,
        })
    }

    /// `delete(slotId)` — mutable slots only; waits on the slot mutex so
    /// delete serializes with a concluding atomic rename (spec.md §9 open
    /// question (c)).
    pub async fn delete(&self, slot: PackageSlot) -> Result<(), AppError> {
        let state = self.slot(slot);
        if !state.mutable {
            return Err(error::forbidden(format!("slot {slot} is read-only")));
        }
        let _permit = state.write_lock.lock().await;
        if !state.path.exists() {
            return Err(error::map_not_found(format!("slot {slot} is empty")));
        }
        tokio::fs::remove_file(&state.path).await.map_err(io_error)?;
        let old = state.reader.write().await.take();
        if let Some(old) = old {
            old.close().await;
        }
        Ok(())
    }
}

fn temp_path_for(target: &PathBuf, counter: u64) -> PathBuf {
    let mut os = target.clone().into_os_string();
    os.push(format!(".download-{counter}"));
    PathBuf::from(os)
}

fn io_error(err: io::Error) -> AppError {
    AppError::from(anyhow::Error::from(err))
}

/// `ByteSink`: writes to a temp file; on [`WriteSink::commit`], renames over
/// the target (POSIX-atomic) and installs a new reader; on
/// [`WriteSink::abort`] or an unfinished drop, unlinks the temp file.
pub struct WriteSink {
    temp_path: PathBuf,
    target_path: PathBuf,
    file: Option<tokio::fs::File>,
    slot: PackageSlot,
    store: PackageStore,
    _permit: OwnedMutexGuard<()>,
    closed: bool,
}

impl WriteSink {
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file
            .as_mut()
            .expect("WriteSink used after commit/abort")
            .write_all(buf)
            .await
    }

    pub async fn commit(mut self) -> Result<(), AppError> {
        let mut file = self.file.take().expect("WriteSink used after commit/abort");
        file.flush().await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        tokio::fs::rename(&self.temp_path, &self.target_path)
            .await
            .map_err(io_error)?;

        let new_reader = self.store.inner.factory.open(&self.target_path).await?;
        let old_reader = {
            let mut guard = self.store.slot(self.slot).reader.write().await;
            guard.replace(new_reader)
        };
        if let Some(old) = old_reader {
            old.close().await;
        }
        self.closed = true;
        Ok(())
    }

    pub async fn abort(mut self) {
        self.file.take();
        let _ = tokio::fs::remove_file(&self.temp_path).await;
        self.closed = true;
    }
}

impl Drop for WriteSink {
    fn drop(&mut self) {
        if !self.closed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use crate::store::zip_reader::ZipReaderFactory;

    fn make_package(path: &std::path::Path, style: &str) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("style.json", zip::write::FileOptions::default())
            .unwrap();
        zip.write_all(style.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    fn store_in(dir: &std::path::Path) -> PackageStore {
        PackageStore::new(
            dir.join("custom.smp"),
            dir.join("fallback.smp"),
            Arc::new(ZipReaderFactory),
        )
    }

    #[tokio::test]
    async fn get_info_fails_not_found_when_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let err = store.get_info(PackageSlot::Custom).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::MapNotFound);
    }

    #[tokio::test]
    async fn open_write_commit_swaps_atomically_and_no_temp_remains() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let mut package = Vec::new();
        {
            let file = tempfile::NamedTempFile::new().unwrap();
            make_package(file.path(), r#"{"minzoom":1,"maxzoom":5}"#);
            package = std::fs::read(file.path()).unwrap();
        }

        let mut sink = store.open_write(PackageSlot::Custom).await.unwrap();
        sink.write_all(&package).await.unwrap();
        sink.commit().await.unwrap();

        let info = store.get_info(PackageSlot::Custom).await.unwrap();
        assert_eq!(info.minzoom, 1);
        assert_eq!(info.maxzoom, 5);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".download-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn abort_leaves_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        make_package(&dir.path().join("custom.smp"), r#"{"minzoom":2}"#);

        let mut sink = store.open_write(PackageSlot::Custom).await.unwrap();
        sink.write_all(b"garbage").await.unwrap();
        sink.abort().await;

        let info = store.get_info(PackageSlot::Custom).await.unwrap();
        assert_eq!(info.minzoom, 2);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".download-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn delete_rejects_readonly_fallback_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let err = store.delete(PackageSlot::Fallback).await.unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Forbidden);
    }
}
