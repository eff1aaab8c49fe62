//! Package Store (spec.md §4.1, component C1): named-slot package files,
//! atomic write-through, readers tracked for graceful swap.

mod package_store;
mod reader;
mod slot;
pub mod zip_reader;

pub use package_store::{ByteStream, MapInfo, PackageStore, WriteSink};
pub use reader::{PackageReader, PackageReaderFactory, ReaderMetadata, ResourceResponse};
pub use slot::{PackageSlot, UnknownSlot};
