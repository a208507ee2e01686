use std::collections::BTreeMap;

use cairn_types::{CommandEnvelope, CommandResultEntry, LogMessage, ObjectId, ResultStatus, UrlType};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Messages exchanged between a build host and a worker process.
///
/// The worker sends requests; the host answers each one with exactly one
/// response before the worker sends the next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteMessage {
    Hello { version: u32 },
    HelloAck { version: u32 },
    GetCommandToExecute,
    Command(CommandEnvelope),
    ForwardLog(LogMessage),
    RegisterResult { status: ResultStatus, result: CommandResultEntry },
    ComputeInputHash { url_type: UrlType, path: String },
    InputHash(ObjectId),
    GetOutputObjects,
    OutputObjects(BTreeMap<String, ObjectId>),
    GetLoadedExtensions,
    Extensions(Vec<String>),
    Ack,
    Error { code: u32, message: String },
}

impl RemoteMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::Hello { .. } => 1,
            Self::HelloAck { .. } => 2,
            Self::GetCommandToExecute => 3,
            Self::Command(_) => 4,
            Self::ForwardLog(_) => 5,
            Self::RegisterResult { .. } => 6,
            Self::ComputeInputHash { .. } => 7,
            Self::InputHash(_) => 8,
            Self::GetOutputObjects => 9,
            Self::OutputObjects(_) => 10,
            Self::GetLoadedExtensions => 11,
            Self::Extensions(_) => 12,
            Self::Ack => 13,
            Self::Error { .. } => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::HelloAck { .. } => "HelloAck",
            Self::GetCommandToExecute => "GetCommandToExecute",
            Self::Command(_) => "Command",
            Self::ForwardLog(_) => "ForwardLog",
            Self::RegisterResult { .. } => "RegisterResult",
            Self::ComputeInputHash { .. } => "ComputeInputHash",
            Self::InputHash(_) => "InputHash",
            Self::GetOutputObjects => "GetOutputObjects",
            Self::OutputObjects(_) => "OutputObjects",
            Self::GetLoadedExtensions => "GetLoadedExtensions",
            Self::Extensions(_) => "Extensions",
            Self::Ack => "Ack",
            Self::Error { .. } => "Error",
        }
    }

    /// Returns `true` for messages a worker sends.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::Hello { .. }
                | Self::GetCommandToExecute
                | Self::ForwardLog(_)
                | Self::RegisterResult { .. }
                | Self::ComputeInputHash { .. }
                | Self::GetOutputObjects
                | Self::GetLoadedExtensions
        )
    }
}

pub mod error_codes {
    pub const VERSION_MISMATCH: u32 = 1;
    pub const UNEXPECTED_MESSAGE: u32 = 2;
    pub const INPUT_HASH_FAILED: u32 = 3;
    pub const INTERNAL: u32 = 500;
}
