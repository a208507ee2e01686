use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::log::LogMessage;
use crate::object::ObjectId;

/// Tag marking an output object that must be stored uncompressed in bundles.
pub const DO_NOT_COMPRESS_TAG: &str = "DoNotCompress";

/// Everything one command execution produced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResultEntry {
    /// Output URL to stored object.
    pub output_objects: BTreeMap<String, ObjectId>,
    pub log_messages: Vec<LogMessage>,
    /// `(url, tag)` pairs attached to outputs.
    pub tag_symbols: Vec<(String, String)>,
}

impl CommandResultEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another entry into this one. Outputs from `other` win on conflict.
    pub fn merge(&mut self, other: CommandResultEntry) {
        self.output_objects.extend(other.output_objects);
        self.log_messages.extend(other.log_messages);
        for tag in other.tag_symbols {
            if !self.tag_symbols.contains(&tag) {
                self.tag_symbols.push(tag);
            }
        }
    }

    /// Object ids of outputs carrying `tag`.
    pub fn tagged_objects<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = ObjectId> + 'a {
        self.tag_symbols
            .iter()
            .filter(move |(_, t)| t == tag)
            .filter_map(|(url, _)| self.output_objects.get(url).copied())
    }
}

/// Serialized form of a command, sent to a worker process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Registry key used to rebuild the command.
    pub kind: String,
    pub version: u32,
    pub title: String,
    pub payload: Vec<u8>,
}
