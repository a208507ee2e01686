//! Content-addressed object storage for Cairn.
//!
//! Every compiled asset is stored as an immutable blob identified by its
//! BLAKE3 hash. A [`ContentIndexMap`] maps asset URLs to those blobs, and
//! blobs that depend on other assets carry a chunk envelope listing the
//! URLs they reference.
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`FileObjectStore`] -- loose objects on disk

pub mod chunk;
pub mod database;
pub mod error;
pub mod file;
pub mod index;
pub mod memory;
pub mod traits;

pub use chunk::{encode_chunk, read_header, read_payload, read_references, ChunkHeader, ChunkReference};
pub use database::ObjectDatabase;
pub use error::{StoreError, StoreResult};
pub use file::FileObjectStore;
pub use index::ContentIndexMap;
pub use memory::InMemoryObjectStore;
pub use traits::{ContentIndex, ObjectStore};
