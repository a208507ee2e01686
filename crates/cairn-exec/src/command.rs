use std::fmt::Debug;

use async_trait::async_trait;
use cairn_types::{CommandEnvelope, ResultStatus};

use crate::context::CommandContext;
use crate::error::{ExecError, ExecResult};

/// A unit of build work.
///
/// A command runs its three hooks in order: `pre_command`, `do_command`,
/// `post_command`. It can run inline in the build process or be shipped to a
/// worker process as a [`CommandEnvelope`], where a
/// [`CommandRegistry`](crate::CommandRegistry) rebuilds it from its kind.
#[async_trait]
pub trait Command: Send + Sync + Debug {
    /// Registry key identifying the concrete command type.
    fn kind(&self) -> &str;

    /// Human-readable title, used as the log module.
    fn title(&self) -> String;

    fn version(&self) -> u32 {
        1
    }

    /// Serialized command fields carried in the envelope.
    fn payload(&self) -> ExecResult<Vec<u8>>;

    async fn pre_command(&self, _context: &dyn CommandContext) -> ExecResult<()> {
        Ok(())
    }

    async fn do_command(&self, context: &dyn CommandContext) -> ExecResult<ResultStatus>;

    async fn post_command(
        &self,
        _context: &dyn CommandContext,
        _status: ResultStatus,
    ) -> ExecResult<()> {
        Ok(())
    }
}

/// Wrap a command for transport to a worker.
pub fn to_envelope(command: &dyn Command) -> ExecResult<CommandEnvelope> {
    Ok(CommandEnvelope {
        kind: command.kind().to_string(),
        version: command.version(),
        title: command.title(),
        payload: command.payload()?,
    })
}

/// Serialize a command's fields as JSON, for use in [`Command::payload`].
pub fn json_payload<T: serde::Serialize>(command: &T) -> ExecResult<Vec<u8>> {
    serde_json::to_vec(command).map_err(|e| ExecError::Serialization(e.to_string()))
}

/// Run the three hooks of a command against a context.
///
/// A token cancelled before the command starts yields `Cancelled` without
/// running any hook.
pub async fn run_command(
    command: &dyn Command,
    context: &dyn CommandContext,
) -> ExecResult<ResultStatus> {
    if context.cancellation().is_cancelled() {
        return Ok(ResultStatus::Cancelled);
    }
    command.pre_command(context).await?;
    let status = command.do_command(context).await?;
    command.post_command(context, status).await?;
    Ok(status)
}

/// Run a command, turning an error into a logged `Failed` status.
pub async fn execute_inline(command: &dyn Command, context: &dyn CommandContext) -> ResultStatus {
    match run_command(command, context).await {
        Ok(status) => status,
        Err(e) => {
            context.error(&format!("Command failed: {e}"));
            ResultStatus::Failed
        }
    }
}
