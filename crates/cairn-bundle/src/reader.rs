use std::path::{Path, PathBuf};

use cairn_types::ObjectId;

use crate::error::{BundleError, BundleResult};
use crate::format::{decode_description, incremental_file_name, BundleDescription, ObjectInfo};

/// One loaded file: its bytes and where its data section starts.
#[derive(Debug)]
struct LoadedFile {
    bytes: Vec<u8>,
    data_start: usize,
}

/// Reads objects back from a bundle and its incremental patches.
#[derive(Debug)]
pub struct BundleReader {
    path: PathBuf,
    description: BundleDescription,
    main: LoadedFile,
    patches: Vec<LoadedFile>,
}

impl BundleReader {
    /// Open a bundle file, validating it and every patch it lists.
    pub fn open(path: &Path) -> BundleResult<Self> {
        let bytes = std::fs::read(path)?;
        let (description, data_start) = decode_description(&bytes, path)?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| BundleError::InvalidBundle {
                path: path.display().to_string(),
                reason: "file name is not valid UTF-8".into(),
            })?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut patches = Vec::with_capacity(description.incremental_bundles.len());
        for id in &description.incremental_bundles {
            let patch_path = dir.join(incremental_file_name(stem, id));
            let patch_bytes = std::fs::read(&patch_path)?;
            let (_, patch_start) = decode_description(&patch_bytes, &patch_path)?;
            patches.push(LoadedFile {
                bytes: patch_bytes,
                data_start: patch_start,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            description,
            main: LoadedFile { bytes, data_start },
            patches,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn description(&self) -> &BundleDescription {
        &self.description
    }

    pub fn dependencies(&self) -> &[String] {
        &self.description.dependencies
    }

    pub fn object_count(&self) -> usize {
        self.description.objects.len()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.info(id).is_some()
    }

    /// Read and decode an object. Returns `Ok(None)` if the bundle does not
    /// hold it.
    pub fn read_object(&self, id: &ObjectId) -> BundleResult<Option<Vec<u8>>> {
        let Some(info) = self.info(id) else {
            return Ok(None);
        };

        let file = match info.incremental_bundle_index {
            0 => &self.main,
            n => self
                .patches
                .get(n as usize - 1)
                .ok_or_else(|| self.corrupt(format!("object {id} points to missing patch {n}")))?,
        };

        let start = file.data_start + info.start_offset as usize;
        let end = file.data_start + info.end_offset as usize;
        if start > end || end > file.bytes.len() {
            return Err(self.corrupt(format!("object {id} extends beyond file")));
        }
        let stored = &file.bytes[start..end];
        if crc32fast::hash(stored) != info.crc32 {
            return Err(BundleError::CrcMismatch(*id));
        }

        let data = if info.is_compressed {
            zstd::decode_all(stored).map_err(|e| BundleError::Compression(e.to_string()))?
        } else {
            stored.to_vec()
        };
        if data.len() as u64 != info.size_not_compressed {
            return Err(self.corrupt(format!(
                "object {id} size mismatch: expected {}, got {}",
                info.size_not_compressed,
                data.len()
            )));
        }
        Ok(Some(data))
    }

    fn info(&self, id: &ObjectId) -> Option<&ObjectInfo> {
        self.description
            .objects
            .iter()
            .find(|(object_id, _)| object_id == id)
            .map(|(_, info)| info)
    }

    fn corrupt(&self, reason: String) -> BundleError {
        BundleError::InvalidBundle {
            path: self.path.display().to_string(),
            reason,
        }
    }
}
