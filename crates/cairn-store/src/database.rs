use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::file::FileObjectStore;
use crate::index::ContentIndexMap;
use crate::memory::InMemoryObjectStore;
use crate::traits::ObjectStore;

/// Name of the database directory inside a build path.
pub const DATABASE_DIRECTORY: &str = "db";

/// An object store paired with the content index of the current build.
///
/// On disk the database lives at `<build_path>/db`, with loose objects under
/// `objects/` and named index files under `index/`.
#[derive(Clone)]
pub struct ObjectDatabase {
    root: Option<PathBuf>,
    store: Arc<dyn ObjectStore>,
    index: Arc<ContentIndexMap>,
    index_name: String,
}

impl ObjectDatabase {
    /// Open the database under `build_path`, loading `index_name` if it exists.
    pub fn open(build_path: &Path, index_name: &str) -> StoreResult<Self> {
        let root = build_path.join(DATABASE_DIRECTORY);
        let store = Self::open_store(build_path)?;
        let index_path = Self::index_path_in(&root, index_name);
        let index = if index_path.is_file() {
            ContentIndexMap::load(&index_path)?
        } else {
            ContentIndexMap::new()
        };
        info!(root = %root.display(), index = index_name, entries = index.len(), "object database opened");
        Ok(Self {
            root: Some(root),
            store: Arc::new(store),
            index: Arc::new(index),
            index_name: index_name.to_string(),
        })
    }

    /// Open only the object store under `build_path`, without an index.
    pub fn open_store(build_path: &Path) -> StoreResult<FileObjectStore> {
        FileObjectStore::open(build_path.join(DATABASE_DIRECTORY).join("objects"))
    }

    /// A database with no backing directory.
    pub fn in_memory(index_name: &str) -> Self {
        Self::from_parts(
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(ContentIndexMap::new()),
            index_name,
        )
    }

    pub fn from_parts(
        store: Arc<dyn ObjectStore>,
        index: Arc<ContentIndexMap>,
        index_name: &str,
    ) -> Self {
        Self {
            root: None,
            store,
            index,
            index_name: index_name.to_string(),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The index of the current build.
    pub fn index(&self) -> &Arc<ContentIndexMap> {
        &self.index
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Load a named index. The current index is returned as-is.
    pub fn content_index(&self, name: &str) -> StoreResult<Arc<ContentIndexMap>> {
        if name == self.index_name {
            return Ok(Arc::clone(&self.index));
        }
        let path = self
            .root
            .as_deref()
            .map(|root| Self::index_path_in(root, name))
            .filter(|path| path.is_file())
            .ok_or_else(|| StoreError::IndexNotFound(name.to_string()))?;
        Ok(Arc::new(ContentIndexMap::load(&path)?))
    }

    /// Persist the current index. A no-op for in-memory databases.
    pub fn write_index(&self) -> StoreResult<()> {
        if let Some(root) = &self.root {
            self.index
                .save(&Self::index_path_in(root, &self.index_name))?;
        }
        Ok(())
    }

    fn index_path_in(root: &Path, name: &str) -> PathBuf {
        root.join("index").join(name)
    }
}

impl std::fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDatabase")
            .field("root", &self.root)
            .field("index_name", &self.index_name)
            .field("entries", &self.index.len())
            .finish()
    }
}
