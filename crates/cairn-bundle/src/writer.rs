use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use cairn_store::ObjectStore;
use cairn_types::ObjectId;
use tracing::{debug, info, warn};

use crate::backend::BundleBackend;
use crate::error::{BundleError, BundleResult};
use crate::format::{
    encode_bundle, read_description, validate_header, BundleDescription, ObjectInfo,
};

const ZSTD_LEVEL: i32 = 3;

/// Minimum share of a patch's stored bytes that must still be needed for the
/// patch to be reused.
const REUSE_RATIO: f64 = 0.5;

/// What to write for one bundle.
#[derive(Clone, Debug)]
pub struct BundleContent<'a> {
    pub name: &'a str,
    pub object_ids: &'a BTreeSet<ObjectId>,
    pub index_map: &'a BTreeMap<String, ObjectId>,
    pub dependencies: &'a [String],
}

/// Files a bundle write produced or kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub incremental_files: Vec<PathBuf>,
    /// `false` when the existing file was already up to date.
    pub written: bool,
}

impl WriteOutcome {
    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.path).chain(self.incremental_files.iter())
    }
}

/// Writes bundle files into a backend, reading object data from a store.
pub struct BundleWriter<'a> {
    backend: &'a BundleBackend,
    store: &'a dyn ObjectStore,
    disabled_compression_ids: &'a HashSet<ObjectId>,
}

impl<'a> BundleWriter<'a> {
    pub fn new(
        backend: &'a BundleBackend,
        store: &'a dyn ObjectStore,
        disabled_compression_ids: &'a HashSet<ObjectId>,
    ) -> Self {
        Self {
            backend,
            store,
            disabled_compression_ids,
        }
    }

    /// Write `content` as a bundle, either in full or as an incremental patch.
    pub fn write(&self, content: &BundleContent<'_>, incremental: bool) -> BundleResult<WriteOutcome> {
        let path = self.backend.bundle_path(content.name);

        if let Some(outcome) = self.unchanged(content, &path, incremental) {
            debug!(bundle = content.name, "bundle unchanged, skipping");
            return Ok(outcome);
        }

        let mut infos: BTreeMap<ObjectId, ObjectInfo> = content
            .object_ids
            .iter()
            .map(|id| (*id, ObjectInfo::default()))
            .collect();
        let mut incremental_bundles = Vec::new();
        let mut incremental_files = Vec::new();

        for (patch_id, patch_path) in self.backend.list_incremental_files(content.name)? {
            if !incremental {
                std::fs::remove_file(&patch_path)?;
                continue;
            }
            let description = match read_description(&patch_path) {
                Ok(description) => description,
                Err(e) => {
                    warn!(path = %patch_path.display(), error = %e, "unreadable incremental bundle, deleting");
                    std::fs::remove_file(&patch_path)?;
                    continue;
                }
            };

            let total: u64 = description.objects.iter().map(|(_, i)| i.stored_size()).sum();
            let needed: u64 = description
                .objects
                .iter()
                .filter(|(id, info)| infos.contains_key(id) && self.encoding_matches(id, info))
                .map(|(_, i)| i.stored_size())
                .sum();
            if total == 0 || (needed as f64 / total as f64) < REUSE_RATIO {
                debug!(path = %patch_path.display(), needed, total, "incremental bundle below reuse ratio, deleting");
                std::fs::remove_file(&patch_path)?;
                continue;
            }

            let patch_index = incremental_bundles.len() as u32 + 1;
            for (id, info) in &description.objects {
                if !self.encoding_matches(id, info) {
                    continue;
                }
                if let Some(slot) = infos.get_mut(id) {
                    if slot.incremental_bundle_index == 0 {
                        *slot = ObjectInfo {
                            incremental_bundle_index: patch_index,
                            ..*info
                        };
                    }
                }
            }
            incremental_bundles.push(patch_id);
            incremental_files.push(patch_path);
        }

        let pending: Vec<ObjectId> = infos
            .iter()
            .filter(|(_, info)| info.incremental_bundle_index == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut data = Vec::new();
        let mut pending_infos = Vec::with_capacity(pending.len());
        for id in &pending {
            let info = self.append_object(id, &mut data)?;
            pending_infos.push((*id, info));
        }

        let main_data = if incremental && !pending.is_empty() {
            let patch_id = ObjectId::combine(pending.iter());
            let patch_index = incremental_bundles.len() as u32 + 1;
            let patch_path = self.backend.incremental_path(content.name, &patch_id);
            let patch = BundleDescription {
                objects: pending_infos.clone(),
                ..BundleDescription::default()
            };
            write_atomic(&patch_path, &encode_bundle(&patch, &data)?)?;

            for (id, info) in pending_infos {
                infos.insert(
                    id,
                    ObjectInfo {
                        incremental_bundle_index: patch_index,
                        ..info
                    },
                );
            }
            incremental_bundles.push(patch_id);
            incremental_files.push(patch_path);
            Vec::new()
        } else {
            infos.extend(pending_infos);
            data
        };

        let description = BundleDescription {
            dependencies: content.dependencies.to_vec(),
            incremental_bundles,
            objects: infos.into_iter().collect(),
            assets: content
                .index_map
                .iter()
                .map(|(url, id)| (url.clone(), *id))
                .collect(),
        };
        write_atomic(&path, &encode_bundle(&description, &main_data)?)?;
        info!(
            bundle = content.name,
            objects = description.objects.len(),
            patches = description.incremental_bundles.len(),
            "bundle written"
        );

        Ok(WriteOutcome {
            path,
            incremental_files,
            written: true,
        })
    }

    fn unchanged(
        &self,
        content: &BundleContent<'_>,
        path: &Path,
        incremental: bool,
    ) -> Option<WriteOutcome> {
        if !path.is_file() {
            return None;
        }
        let existing = read_description(path).ok()?;

        let same_content = existing.dependencies == content.dependencies
            && existing.asset_map() == *content.index_map
            && existing.sorted_object_ids().iter().eq(content.object_ids.iter())
            && existing
                .objects
                .iter()
                .all(|(id, info)| self.encoding_matches(id, info));
        let same_mode = if incremental {
            !existing.incremental_bundles.is_empty() || existing.objects.is_empty()
        } else {
            existing.incremental_bundles.is_empty()
        };
        if !same_content || !same_mode {
            return None;
        }

        let mut incremental_files = Vec::with_capacity(existing.incremental_bundles.len());
        for id in &existing.incremental_bundles {
            let patch_path = self.backend.incremental_path(content.name, id);
            let bytes = std::fs::read(&patch_path).ok()?;
            validate_header(&bytes, &patch_path).ok()?;
            incremental_files.push(patch_path);
        }

        Some(WriteOutcome {
            path: path.to_path_buf(),
            incremental_files,
            written: false,
        })
    }

    /// An object is stored raw exactly when its id has compression disabled.
    fn encoding_matches(&self, id: &ObjectId, info: &ObjectInfo) -> bool {
        info.is_compressed != self.disabled_compression_ids.contains(id)
    }

    fn append_object(&self, id: &ObjectId, data: &mut Vec<u8>) -> BundleResult<ObjectInfo> {
        let raw = self.store.read_required(id)?;
        let size_not_compressed = raw.len() as u64;
        let is_compressed = !self.disabled_compression_ids.contains(id);
        let stored = if is_compressed {
            zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)
                .map_err(|e| BundleError::Compression(e.to_string()))?
        } else {
            raw
        };

        let start_offset = data.len() as u64;
        data.extend_from_slice(&stored);
        Ok(ObjectInfo {
            start_offset,
            end_offset: data.len() as u64,
            size_not_compressed,
            is_compressed,
            incremental_bundle_index: 0,
            crc32: crc32fast::hash(&stored),
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> BundleResult<()> {
    let dir = path.parent().ok_or_else(|| BundleError::InvalidBundle {
        path: path.display().to_string(),
        reason: "no parent directory".into(),
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| BundleError::Io(e.error))?;
    Ok(())
}
