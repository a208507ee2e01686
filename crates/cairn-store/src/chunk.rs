//! Chunk envelope for stored objects.
//!
//! A chunk is laid out as:
//!
//! ```text
//! [4 bytes magic "CHNK"][4 bytes LE header length][bincode ChunkHeader][body]
//! ```
//!
//! Offsets in the header are relative to the start of the body. The body
//! holds the bincode reference list (when present) followed by the object
//! payload. A blob that does not start with the magic is a leaf with no
//! references.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Magic bytes at the start of every chunk.
pub const CHUNK_MAGIC: &[u8; 4] = b"CHNK";

/// Current chunk format version.
pub const CHUNK_VERSION: u32 = 1;

const PREFIX_LEN: usize = 8;

/// Envelope decoded from the start of a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    pub version: u32,
    /// Name of the object type stored in the payload.
    pub type_name: String,
    pub offset_to_object: u32,
    /// Offset of the reference list, if the object has references.
    pub offset_to_references: Option<u32>,
}

/// A dependency of a chunk on another content URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkReference {
    pub object_type: String,
    /// URL of the referenced content.
    pub location: String,
}

impl ChunkReference {
    pub fn new(object_type: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            location: location.into(),
        }
    }
}

/// Encode a payload and its references into a chunk.
pub fn encode_chunk(
    type_name: &str,
    payload: &[u8],
    references: &[ChunkReference],
) -> StoreResult<Vec<u8>> {
    let references_bytes = if references.is_empty() {
        Vec::new()
    } else {
        bincode::serialize(references).map_err(|e| StoreError::Serialization(e.to_string()))?
    };

    let header = ChunkHeader {
        version: CHUNK_VERSION,
        type_name: type_name.to_string(),
        offset_to_object: u32::try_from(references_bytes.len())
            .map_err(|_| StoreError::InvalidChunk("reference list too large".into()))?,
        offset_to_references: (!references.is_empty()).then_some(0),
    };
    let header_bytes =
        bincode::serialize(&header).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| StoreError::InvalidChunk("header too large".into()))?;

    let mut out =
        Vec::with_capacity(PREFIX_LEN + header_bytes.len() + references_bytes.len() + payload.len());
    out.extend_from_slice(CHUNK_MAGIC);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&references_bytes);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode the chunk header and the body offset, or `None` for a leaf blob.
pub fn read_header(data: &[u8]) -> StoreResult<Option<(ChunkHeader, usize)>> {
    if data.len() < PREFIX_LEN || &data[..4] != CHUNK_MAGIC {
        return Ok(None);
    }
    let header_len = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let body_start = PREFIX_LEN
        .checked_add(header_len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| StoreError::InvalidChunk("truncated header".into()))?;

    let header: ChunkHeader = bincode::deserialize(&data[PREFIX_LEN..body_start])
        .map_err(|e| StoreError::InvalidChunk(e.to_string()))?;
    if header.version != CHUNK_VERSION {
        return Err(StoreError::InvalidChunk(format!(
            "unsupported chunk version {}",
            header.version
        )));
    }
    if body_start + header.offset_to_object as usize > data.len() {
        return Err(StoreError::InvalidChunk("object offset out of range".into()));
    }
    Ok(Some((header, body_start)))
}

/// References listed in a chunk. Leaf blobs have none.
pub fn read_references(data: &[u8]) -> StoreResult<Vec<ChunkReference>> {
    let Some((header, body_start)) = read_header(data)? else {
        return Ok(Vec::new());
    };
    let Some(offset) = header.offset_to_references else {
        return Ok(Vec::new());
    };
    let start = body_start + offset as usize;
    let end = body_start + header.offset_to_object as usize;
    if start > end {
        return Err(StoreError::InvalidChunk("reference offset out of range".into()));
    }
    bincode::deserialize(&data[start..end]).map_err(|e| StoreError::InvalidChunk(e.to_string()))
}

/// Object payload of a chunk. A leaf blob is its own payload.
pub fn read_payload(data: &[u8]) -> StoreResult<&[u8]> {
    match read_header(data)? {
        Some((header, body_start)) => Ok(&data[body_start + header.offset_to_object as usize..]),
        None => Ok(data),
    }
}
