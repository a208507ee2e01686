//! URL to object id mapping shared by a build.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::RwLock;

use cairn_types::ObjectId;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::ContentIndex;

/// Thread-safe content index.
///
/// On disk the index is a text file with one `url hex-id` line per entry,
/// sorted by URL. The id is the last space-separated field, so URLs may
/// contain spaces.
#[derive(Debug, Default)]
pub struct ContentIndexMap {
    entries: RwLock<BTreeMap<String, ObjectId>>,
}

impl ContentIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, ObjectId)>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().collect()),
        }
    }

    /// Load an index file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)?;
        let mut entries = BTreeMap::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let invalid = |reason: String| StoreError::InvalidIndexLine {
                path: path.to_path_buf(),
                line: number + 1,
                reason,
            };
            let (url, hex) = line
                .rsplit_once(' ')
                .ok_or_else(|| invalid("missing object id".into()))?;
            let id = ObjectId::from_hex(hex).map_err(|e| invalid(e.to_string()))?;
            entries.insert(url.to_string(), id);
        }
        debug!(path = %path.display(), entries = entries.len(), "content index loaded");
        Ok(Self::from_entries(entries))
    }

    /// Write the index to `path`, replacing it atomically.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Io(io::Error::other("index path has no parent")))?;
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let entries = self.entries.read().expect("lock poisoned");
            for (url, id) in entries.iter() {
                writeln!(tmp, "{url} {id}")?;
            }
        }
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    pub fn insert(&self, url: impl Into<String>, id: ObjectId) -> Option<ObjectId> {
        self.entries
            .write()
            .expect("lock poisoned")
            .insert(url.into(), id)
    }

    pub fn remove(&self, url: &str) -> Option<ObjectId> {
        self.entries.write().expect("lock poisoned").remove(url)
    }

    /// Insert every entry, overwriting existing URLs.
    pub fn merge(&self, entries: impl IntoIterator<Item = (String, ObjectId)>) {
        self.entries.write().expect("lock poisoned").extend(entries);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }
}

impl ContentIndex for ContentIndexMap {
    fn try_get(&self, url: &str) -> Option<ObjectId> {
        self.entries.read().expect("lock poisoned").get(url).copied()
    }

    fn snapshot(&self) -> BTreeMap<String, ObjectId> {
        self.entries.read().expect("lock poisoned").clone()
    }
}
