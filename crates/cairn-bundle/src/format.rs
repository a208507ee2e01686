//! On-disk layout of a bundle file.
//!
//! ```text
//! [4 bytes magic "CBDL"][4 bytes BE version][8 bytes BE total size]
//! [4 bytes BE description length][bincode BundleDescription][data section]
//! ```
//!
//! Object offsets are relative to the start of the data section of the file
//! holding the object: the bundle itself, or one of its incremental patches.

use std::collections::BTreeMap;
use std::path::Path;

use cairn_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{BundleError, BundleResult};

pub const BUNDLE_MAGIC: &[u8; 4] = b"CBDL";
pub const BUNDLE_VERSION: u32 = 1;
pub const BUNDLE_EXTENSION: &str = "bundle";

/// Size of the fixed prefix before the description.
pub const PREFIX_LEN: usize = 20;

/// Location and encoding of one object inside a bundle or patch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub start_offset: u64,
    pub end_offset: u64,
    pub size_not_compressed: u64,
    pub is_compressed: bool,
    /// 0 when stored in the bundle itself, otherwise 1-based index into
    /// [`BundleDescription::incremental_bundles`].
    pub incremental_bundle_index: u32,
    /// CRC32 of the stored (possibly compressed) bytes.
    pub crc32: u32,
}

impl ObjectInfo {
    pub fn stored_size(&self) -> u64 {
        self.end_offset.saturating_sub(self.start_offset)
    }
}

/// Everything in a bundle file except the object data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDescription {
    pub dependencies: Vec<String>,
    pub incremental_bundles: Vec<ObjectId>,
    pub objects: Vec<(ObjectId, ObjectInfo)>,
    /// Asset URL to object id, sorted by URL.
    pub assets: Vec<(String, ObjectId)>,
}

impl BundleDescription {
    pub fn asset_map(&self) -> BTreeMap<String, ObjectId> {
        self.assets.iter().cloned().collect()
    }

    /// Object ids sorted ascending.
    pub fn sorted_object_ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.iter().map(|(id, _)| *id).collect();
        ids.sort();
        ids
    }
}

/// Serialize a bundle file from its description and data section.
pub fn encode_bundle(description: &BundleDescription, data: &[u8]) -> BundleResult<Vec<u8>> {
    let description_bytes =
        bincode::serialize(description).map_err(|e| BundleError::Serialization(e.to_string()))?;
    let description_len = u32::try_from(description_bytes.len()).map_err(|_| {
        BundleError::Serialization("bundle description exceeds 4 GiB".into())
    })?;
    let total = (PREFIX_LEN + description_bytes.len() + data.len()) as u64;

    let mut out = Vec::with_capacity(total as usize);
    out.extend_from_slice(BUNDLE_MAGIC);
    out.extend_from_slice(&BUNDLE_VERSION.to_be_bytes());
    out.extend_from_slice(&total.to_be_bytes());
    out.extend_from_slice(&description_len.to_be_bytes());
    out.extend_from_slice(&description_bytes);
    out.extend_from_slice(data);
    Ok(out)
}

/// Check magic, version and recorded size. Returns the data section offset.
pub fn validate_header(bytes: &[u8], path: &Path) -> BundleResult<usize> {
    let invalid = |reason: String| BundleError::InvalidBundle {
        path: path.display().to_string(),
        reason,
    };
    if bytes.len() < PREFIX_LEN {
        return Err(invalid("file too short".into()));
    }
    if &bytes[0..4] != BUNDLE_MAGIC {
        return Err(invalid(format!(
            "bad magic {}",
            String::from_utf8_lossy(&bytes[0..4])
        )));
    }
    let version = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != BUNDLE_VERSION {
        return Err(invalid(format!("unsupported version {version}")));
    }
    let mut size = [0u8; 8];
    size.copy_from_slice(&bytes[8..16]);
    let size = u64::from_be_bytes(size);
    if size != bytes.len() as u64 {
        return Err(invalid(format!(
            "recorded size {size} does not match file size {}",
            bytes.len()
        )));
    }
    let description_len = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;
    let data_start = PREFIX_LEN + description_len;
    if data_start > bytes.len() {
        return Err(invalid("description extends beyond file".into()));
    }
    Ok(data_start)
}

/// Decode the description of a bundle file held in memory.
pub fn decode_description(bytes: &[u8], path: &Path) -> BundleResult<(BundleDescription, usize)> {
    let data_start = validate_header(bytes, path)?;
    let description: BundleDescription = bincode::deserialize(&bytes[PREFIX_LEN..data_start])
        .map_err(|e| BundleError::InvalidBundle {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    Ok((description, data_start))
}

/// Read and decode the description of a bundle file on disk.
pub fn read_description(path: &Path) -> BundleResult<BundleDescription> {
    let bytes = std::fs::read(path)?;
    Ok(decode_description(&bytes, path)?.0)
}

/// File name of a bundle.
pub fn bundle_file_name(name: &str) -> String {
    format!("{name}.{BUNDLE_EXTENSION}")
}

/// File name of an incremental patch of a bundle.
pub fn incremental_file_name(name: &str, id: &ObjectId) -> String {
    format!("{name}.{}.{BUNDLE_EXTENSION}", id.to_hex())
}

/// Split a file name into bundle name and optional incremental id.
///
/// Returns `None` when the extension is not the bundle extension.
pub fn parse_file_name(file_name: &str) -> Option<(String, Option<ObjectId>)> {
    let stem = file_name.strip_suffix(BUNDLE_EXTENSION)?.strip_suffix('.')?;
    if let Some((name, suffix)) = stem.rsplit_once('.') {
        if let Ok(id) = ObjectId::from_hex(suffix) {
            return Some((name.to_string(), Some(id)));
        }
    }
    Some((stem.to_string(), None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BundleDescription {
        BundleDescription {
            dependencies: vec!["default".into()],
            incremental_bundles: vec![],
            objects: vec![(
                ObjectId::from_bytes(b"x"),
                ObjectInfo {
                    start_offset: 0,
                    end_offset: 3,
                    size_not_compressed: 3,
                    is_compressed: false,
                    incremental_bundle_index: 0,
                    crc32: crc32fast::hash(b"abc"),
                },
            )],
            assets: vec![("x".into(), ObjectId::from_bytes(b"x"))],
        }
    }

    #[test]
    fn encode_then_decode() {
        let bytes = encode_bundle(&sample(), b"abc").unwrap();
        let (description, data_start) = decode_description(&bytes, Path::new("x.bundle")).unwrap();
        assert_eq!(description, sample());
        assert_eq!(&bytes[data_start..], b"abc");
    }

    #[test]
    fn truncated_file_fails_size_check() {
        let bytes = encode_bundle(&sample(), b"abc").unwrap();
        let err = validate_header(&bytes[..bytes.len() - 1], Path::new("x.bundle")).unwrap_err();
        assert!(matches!(err, BundleError::InvalidBundle { .. }));
    }

    #[test]
    fn bad_magic() {
        let mut bytes = encode_bundle(&sample(), b"abc").unwrap();
        bytes[0] = b'X';
        assert!(validate_header(&bytes, Path::new("x.bundle")).is_err());
    }

    #[test]
    fn file_names() {
        let id = ObjectId::from_bytes(b"patch");
        assert_eq!(bundle_file_name("level1"), "level1.bundle");
        assert_eq!(
            parse_file_name(&incremental_file_name("level1", &id)),
            Some(("level1".to_string(), Some(id)))
        );
        assert_eq!(
            parse_file_name("my.level.bundle"),
            Some(("my.level".to_string(), None))
        );
        assert_eq!(parse_file_name("level1.tmp"), None);
        assert_eq!(parse_file_name("bundle"), None);
    }
}
