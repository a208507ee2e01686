//! Foundation types for Cairn.
//!
//! Every other Cairn crate depends on `cairn-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`]: content-addressed identifier (BLAKE3 hash)
//! - [`ResultStatus`]: outcome of one command or build step
//! - [`BuildResultCode`]: outcome of a build run and the process exit code
//! - [`LogMessage`] and [`Logger`]: build logs that can cross process boundaries
//! - [`CommandResultEntry`]: outputs, logs and tags of one command execution

pub mod error;
pub mod log;
pub mod object;
pub mod result;
pub mod status;
pub mod url;

pub use error::TypeError;
pub use log::{LogLevel, LogMessage, Logger, MemoryLogger, TracingLogger};
pub use object::ObjectId;
pub use result::{CommandEnvelope, CommandResultEntry, DO_NOT_COMPRESS_TAG};
pub use status::{BuildResultCode, ResultStatus};
pub use url::UrlType;
