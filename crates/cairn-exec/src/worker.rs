use std::path::PathBuf;
use std::sync::Arc;

use cairn_protocol::{MessageChannel, RemoteMessage};
use cairn_store::{ObjectDatabase, ObjectStore};
use cairn_types::{BuildResultCode, ResultStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tracing::{debug, error, info};

use crate::client::{unexpected, RemoteCommandContext, WorkerClient};
use crate::command::execute_inline;
use crate::error::{ExecError, ExecResult};
use crate::registry::CommandRegistry;
use crate::scheduler::MicroThreadScheduler;

/// Arguments a worker process is started with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Rendezvous socket of the build process.
    pub address: PathBuf,
    /// Build directory whose object store outputs are written to.
    pub build_path: PathBuf,
    pub debugger_pid: Option<u32>,
}

/// Worker process entry point: run the one command the host hands out.
///
/// The command's own status travels back over the channel, so a command that
/// fails still ends in `Successful`. Only a failure of the worker itself
/// (connection, handshake, unknown command, missing extension, panic) maps
/// to `BuildError`.
pub fn run_worker(options: &WorkerOptions, registry: Arc<CommandRegistry>) -> BuildResultCode {
    match try_run_worker(options, registry) {
        Ok(()) => BuildResultCode::Successful,
        Err(e) => {
            error!(error = %e, "worker failed");
            BuildResultCode::BuildError
        }
    }
}

fn try_run_worker(options: &WorkerOptions, registry: Arc<CommandRegistry>) -> ExecResult<()> {
    if let Some(pid) = options.debugger_pid {
        info!(pid, "debugger reattach requested");
    }
    let store: Arc<dyn ObjectStore> = Arc::new(ObjectDatabase::open_store(&options.build_path)?);
    let address = options.address.clone();

    let mut scheduler = MicroThreadScheduler::new()?;
    scheduler.add("remote-command", async move {
        let stream = UnixStream::connect(&address).await?;
        let status = execute_remote_command(stream, &registry, store).await?;
        debug!(%status, "remote command finished");
        Ok(())
    });
    scheduler.run()
}

/// Worker side of one remote execution over an established stream.
pub async fn execute_remote_command<S>(
    stream: S,
    registry: &CommandRegistry,
    store: Arc<dyn ObjectStore>,
) -> ExecResult<ResultStatus>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut channel = MessageChannel::new(stream);
    channel.hello().await?;

    match channel.request(&RemoteMessage::GetLoadedExtensions).await? {
        RemoteMessage::Extensions(modules) => registry.ensure_loaded(&modules)?,
        other => return Err(unexpected("Extensions", &other)),
    }
    let envelope = match channel.request(&RemoteMessage::GetCommandToExecute).await? {
        RemoteMessage::Command(envelope) => envelope,
        other => return Err(unexpected("Command", &other)),
    };
    let command = registry.create(&envelope)?;
    debug!(command = %envelope.title, kind = %envelope.kind, "command received");

    let (client, task) = WorkerClient::spawn(channel);
    let context = RemoteCommandContext::new(envelope.title.clone(), client.clone(), store);
    let status = execute_inline(command.as_ref(), &context).await;
    let result = context.into_result();

    match client
        .request(RemoteMessage::RegisterResult { status, result })
        .await?
    {
        RemoteMessage::Ack => {}
        other => return Err(unexpected("Ack", &other)),
    }
    drop(client);
    task.await
        .map_err(|e| ExecError::MicroThreadPanicked(e.to_string()))?;
    Ok(status)
}
