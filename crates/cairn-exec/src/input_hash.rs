use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use cairn_types::ObjectId;
use tracing::trace;

use crate::error::ExecResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

/// Content hashes of input files, cached by path, length and mtime.
#[derive(Debug, Default)]
pub struct InputHashes {
    cache: Mutex<HashMap<PathBuf, (FileStamp, ObjectId)>>,
}

impl InputHashes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash of a file's content. Rehashes only when the file changed.
    pub async fn file_hash(&self, path: &Path) -> ExecResult<ObjectId> {
        let metadata = tokio::fs::metadata(path).await?;
        let stamp = FileStamp {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        };

        let cached = self.cache.lock().expect("lock poisoned").get(path).copied();
        if let Some((cached, id)) = cached {
            if cached == stamp {
                return Ok(id);
            }
        }

        let data = tokio::fs::read(path).await?;
        let id = ObjectId::from_bytes(&data);
        trace!(path = %path.display(), id = %id.short_hex(), "input hashed");
        self.cache
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf(), (stamp, id));
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
