use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::BundleResult;
use crate::format::{bundle_file_name, incremental_file_name, parse_file_name};
use cairn_types::ObjectId;

/// Directory that receives bundle files: `<root>/db/bundles`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleBackend {
    directory: PathBuf,
}

impl BundleBackend {
    /// Backend for an output root, creating its bundle directory.
    pub fn open(root: &Path) -> BundleResult<Self> {
        let directory = root.join("db").join("bundles");
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.directory.join(bundle_file_name(name))
    }

    pub fn incremental_path(&self, name: &str, id: &ObjectId) -> PathBuf {
        self.directory.join(incremental_file_name(name, id))
    }

    /// Every regular file in the bundle directory, sorted.
    pub fn list_bundle_files(&self) -> BundleResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Incremental patches of `name` with their ids.
    pub fn list_incremental_files(&self, name: &str) -> BundleResult<Vec<(ObjectId, PathBuf)>> {
        let mut patches = Vec::new();
        for path in self.list_bundle_files()? {
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name);
            if let Some((bundle, Some(id))) = parsed {
                if bundle == name {
                    patches.push((id, path));
                }
            }
        }
        Ok(patches)
    }

    /// Delete every file for which `predicate` returns `true`.
    pub fn delete_bundles(&self, mut predicate: impl FnMut(&Path) -> bool) -> BundleResult<Vec<PathBuf>> {
        let mut deleted = Vec::new();
        for path in self.list_bundle_files()? {
            if predicate(&path) {
                fs::remove_file(&path)?;
                debug!(path = %path.display(), "bundle file deleted");
                deleted.push(path);
            }
        }
        Ok(deleted)
    }
}
