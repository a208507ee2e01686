//! Command execution for Cairn.
//!
//! A [`Command`] runs either inline in the build process or in a worker
//! process spawned by a [`RemoteExecutor`]. The worker talks back to the
//! build process over a Unix socket using the `cairn-protocol` messages:
//! it fetches the command, forwards its logs live, asks the build for input
//! hashes, and finally registers its outputs and status.
//!
//! ```text
//!  build process                          worker process
//!  ─────────────                          ──────────────
//!  RemoteExecutor::execute
//!    bind <tmp>/cairn-<uuid>.sock
//!    spawn  --slave=<sock> ─────────────▶ run_worker
//!    serve_connection  ◀── Hello ───────    MicroThreadScheduler
//!                      ◀── GetCommand ──    execute_remote_command
//!                      ◀── ForwardLog ──      (pre, do, post)
//!                      ◀── RegisterResult
//!    wait for exit
//! ```
//!
//! [`Builder`] ties it together for a whole build: it runs command steps
//! concurrently and merges their outputs into the content index consumed by
//! the bundle packer.

pub mod builder;
pub mod client;
pub mod command;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod input_hash;
pub mod pool;
pub mod registry;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
mod testing;

pub use builder::{BuildOutcome, Builder, CommandStep, ExecutionMode};
pub use client::{RemoteCommandContext, WorkerClient};
pub use command::{execute_inline, json_payload, run_command, to_envelope, Command};
pub use commands::{WriteContentCommand, BUILTIN_MODULE};
pub use config::RemoteConfig;
pub use context::{CommandContext, LocalCommandContext};
pub use error::{ExecError, ExecResult};
pub use host::{serve_connection, RemoteExecutor};
pub use input_hash::InputHashes;
pub use pool::{PoolPermit, ProcessPool};
pub use registry::CommandRegistry;
pub use scheduler::MicroThreadScheduler;
pub use worker::{execute_remote_command, run_worker, WorkerOptions};
