use std::path::PathBuf;
use std::process::Stdio;

use cairn_protocol::{error_codes, MessageChannel, ProtocolError, RemoteMessage, PROTOCOL_VERSION};
use cairn_types::{CommandEnvelope, Logger, ResultStatus};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::UnixListener;
use tokio::process::Command as TokioCommand;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::command::{to_envelope, Command};
use crate::config::RemoteConfig;
use crate::context::{CommandContext, LocalCommandContext};
use crate::error::{ExecError, ExecResult};
use crate::pool::ProcessPool;
use crate::registry::CommandRegistry;

/// Runs commands in freshly spawned worker processes.
///
/// Each call binds a private Unix socket, spawns the worker with
/// `--slave=<socket> --build-path=<path>`, and serves the worker's requests
/// against the caller's context until the worker exits. At most
/// `max_concurrency` workers are alive at any time.
#[derive(Debug)]
pub struct RemoteExecutor {
    config: RemoteConfig,
    build_path: PathBuf,
    extensions: Vec<String>,
    pool: ProcessPool,
}

impl RemoteExecutor {
    pub fn new(config: RemoteConfig, build_path: impl Into<PathBuf>, registry: &CommandRegistry) -> Self {
        let pool = ProcessPool::new(config.max_concurrency);
        Self {
            config,
            build_path: build_path.into(),
            extensions: registry.modules(),
            pool,
        }
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Execute `command` in a worker process.
    ///
    /// A crash, a non-zero exit or a worker that never registers a result
    /// yields `Failed`, with the captured worker output logged as an error.
    /// A cancelled token yields `Cancelled`, without spawning when it fired
    /// before a slot was obtained.
    pub async fn execute(
        &self,
        command: &dyn Command,
        context: &LocalCommandContext,
    ) -> ExecResult<ResultStatus> {
        let cancellation = context.cancellation().clone();
        if cancellation.is_cancelled() {
            return Ok(ResultStatus::Cancelled);
        }
        let envelope = to_envelope(command)?;
        let Some(permit) = self.pool.acquire(&cancellation).await else {
            return Ok(ResultStatus::Cancelled);
        };

        let socket_directory = self
            .config
            .socket_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let address = socket_directory.join(format!("cairn-{}.sock", Uuid::new_v4()));
        let listener = UnixListener::bind(&address)?;

        let program = match &self.config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        let mut process = TokioCommand::new(&program);
        process
            .arg(format!("--slave={}", address.display()))
            .arg(format!("--build-path={}", self.build_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(pid) = self.config.debugger_pid {
            process.arg(format!("--reattach-debugger={pid}"));
        }

        let mut child = match process.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = std::fs::remove_file(&address);
                return Err(e.into());
            }
        };
        info!(
            command = %envelope.title,
            pid = child.id(),
            live = self.pool.live(),
            "remote worker spawned"
        );
        let stdout = collect_lines(child.stdout.take());
        let stderr = collect_lines(child.stderr.take());

        let exited = Notify::new();
        let serve = async {
            let stream = tokio::select! {
                accepted = listener.accept() => accepted?.0,
                _ = exited.notified() => return Err(ExecError::ChannelClosed),
            };
            serve_connection(stream, &envelope, &self.extensions, context).await
        };
        let wait = async {
            let status = child.wait().await;
            exited.notify_one();
            status
        };
        let (served, exit) = tokio::join!(serve, wait);

        drop(listener);
        let _ = std::fs::remove_file(&address);
        let mut output = stdout.await.unwrap_or_default();
        output.extend(stderr.await.unwrap_or_default());
        drop(permit);

        let exit = exit?;
        debug!(command = %envelope.title, status = %exit, "remote worker exited");
        if cancellation.is_cancelled() {
            return Ok(ResultStatus::Cancelled);
        }

        match (exit.code(), served) {
            (Some(0), Ok(Some(status))) => Ok(status),
            (Some(0), Ok(None)) => {
                context.error(&format!(
                    "Remote command exited without registering a result. Output:\n{}",
                    output.join("\n")
                ));
                Ok(ResultStatus::Failed)
            }
            (exit_code, served) => {
                if let Err(e) = served {
                    debug!(error = %e, "remote channel broken");
                }
                let output = output.join("\n");
                let error = ExecError::RemoteExecution {
                    exit_code,
                    output: output.clone(),
                };
                context.error(&format!("{error}. Remote command crashed with output:\n{output}"));
                Ok(ResultStatus::Failed)
            }
        }
    }
}

fn collect_lines<R>(reader: Option<R>) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(reader) = reader {
            let mut reader = BufReader::new(reader).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                trace!(line = %line, "worker output");
                lines.push(line);
            }
        }
        lines
    })
}

/// Answer a worker's requests until it disconnects.
///
/// Returns the status from the worker's `RegisterResult`, or `None` if it
/// disconnected without one.
pub async fn serve_connection<S>(
    stream: S,
    envelope: &CommandEnvelope,
    extensions: &[String],
    context: &LocalCommandContext,
) -> ExecResult<Option<ResultStatus>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut channel = MessageChannel::new(stream);
    let mut registered = None;
    loop {
        let message = match channel.recv().await {
            Ok(message) => message,
            Err(ProtocolError::ChannelClosed) => break,
            Err(e) => return Err(e.into()),
        };
        let response = match message {
            RemoteMessage::Hello { version } if version == PROTOCOL_VERSION => {
                RemoteMessage::HelloAck { version }
            }
            RemoteMessage::Hello { version } => RemoteMessage::Error {
                code: error_codes::VERSION_MISMATCH,
                message: format!("expected protocol version {PROTOCOL_VERSION}, got {version}"),
            },
            RemoteMessage::GetCommandToExecute => RemoteMessage::Command(envelope.clone()),
            RemoteMessage::GetLoadedExtensions => RemoteMessage::Extensions(extensions.to_vec()),
            RemoteMessage::ForwardLog(log) => {
                context.log(log);
                RemoteMessage::Ack
            }
            RemoteMessage::ComputeInputHash { url_type, path } => {
                match context.compute_input_hash(url_type, &path).await {
                    Ok(id) => RemoteMessage::InputHash(id),
                    Err(e) => RemoteMessage::Error {
                        code: error_codes::INPUT_HASH_FAILED,
                        message: e.to_string(),
                    },
                }
            }
            RemoteMessage::GetOutputObjects => match context.output_objects().await {
                Ok(objects) => RemoteMessage::OutputObjects(objects),
                Err(e) => RemoteMessage::Error {
                    code: error_codes::INTERNAL,
                    message: e.to_string(),
                },
            },
            RemoteMessage::RegisterResult { status, result } => {
                context.merge_result(result);
                registered = Some(status);
                RemoteMessage::Ack
            }
            other => RemoteMessage::Error {
                code: error_codes::UNEXPECTED_MESSAGE,
                message: format!("unexpected request {}", other.type_name()),
            },
        };
        channel.send(&response).await?;
    }
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_store::{ContentIndexMap, InMemoryObjectStore, ObjectStore};
    use cairn_types::{LogLevel, MemoryLogger, ObjectId};
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::command::execute_inline;
    use crate::input_hash::InputHashes;
    use crate::testing::{testing_registry, ScriptedCommand};
    use crate::worker::execute_remote_command;

    struct Harness {
        logger: Arc<MemoryLogger>,
        store: Arc<InMemoryObjectStore>,
        index: Arc<ContentIndexMap>,
    }

    impl Harness {
        fn new() -> Self {
            let id = ObjectId::from_bytes(b"source");
            Self {
                logger: Arc::new(MemoryLogger::new()),
                store: Arc::new(InMemoryObjectStore::new()),
                index: Arc::new(ContentIndexMap::from_entries([("source".to_string(), id)])),
            }
        }

        fn context(&self, token: CancellationToken) -> LocalCommandContext {
            LocalCommandContext::new(
                "scripted",
                self.logger.clone(),
                self.store.clone(),
                Arc::clone(&self.index),
                Arc::new(InputHashes::new()),
                token,
            )
        }
    }

    async fn run_over_channel(
        harness: &Harness,
        command: &ScriptedCommand,
    ) -> (Option<ResultStatus>, LocalCommandContext) {
        let registry = testing_registry();
        let envelope = to_envelope(command).unwrap();
        let context = harness.context(CancellationToken::new());
        let (worker_end, host_end) = tokio::io::duplex(64 * 1024);

        let store: Arc<dyn ObjectStore> = harness.store.clone();
        let worker = tokio::spawn(async move {
            execute_remote_command(worker_end, &registry, store).await
        });
        let registered = serve_connection(host_end, &envelope, &testing_registry().modules(), &context)
            .await
            .unwrap();
        worker.await.unwrap().unwrap();
        (registered, context)
    }

    #[tokio::test]
    async fn remote_run_matches_local_run() {
        let command = ScriptedCommand::new(["one", "two", "three"])
            .with_output("meshes/box")
            .with_hash_query("source");

        let local = Harness::new();
        let local_context = local.context(CancellationToken::new());
        let local_status = execute_inline(&command, &local_context).await;

        let remote = Harness::new();
        let (remote_status, remote_context) = run_over_channel(&remote, &command).await;

        assert_eq!(local_status, ResultStatus::Successful);
        assert_eq!(remote_status, Some(local_status));
        assert_eq!(local.logger.messages(), remote.logger.messages());

        let texts: Vec<_> = remote.logger.messages().into_iter().map(|m| m.text).collect();
        assert_eq!(texts[..3], ["one", "two", "three"]);

        let local_result = local_context.into_result();
        let remote_result = remote_context.into_result();
        assert_eq!(local_result.output_objects, remote_result.output_objects);
        assert_eq!(local_result.log_messages, remote_result.log_messages);
    }

    #[tokio::test]
    async fn failed_status_is_carried_back() {
        let command = ScriptedCommand::new(["about to fail"]).with_status(ResultStatus::Failed);
        let harness = Harness::new();
        let (status, _) = run_over_channel(&harness, &command).await;
        assert_eq!(status, Some(ResultStatus::Failed));
    }

    #[tokio::test]
    async fn command_error_is_logged_on_the_host() {
        let command = ScriptedCommand::new(Vec::<String>::new()).with_error("disk full");
        let harness = Harness::new();
        let (status, _) = run_over_channel(&harness, &command).await;
        assert_eq!(status, Some(ResultStatus::Failed));
        let errors = harness.logger.messages_at_least(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.contains("disk full"));
    }

    #[tokio::test]
    async fn missing_extension_fails_the_worker() {
        let command = ScriptedCommand::new(["unused"]);
        let envelope = to_envelope(&command).unwrap();
        let harness = Harness::new();
        let context = harness.context(CancellationToken::new());
        let (worker_end, host_end) = tokio::io::duplex(64 * 1024);

        let store: Arc<dyn ObjectStore> = harness.store.clone();
        let worker = tokio::spawn(async move {
            execute_remote_command(worker_end, &testing_registry(), store).await
        });
        let extensions = vec!["shaders".to_string()];
        let registered = serve_connection(host_end, &envelope, &extensions, &context)
            .await
            .unwrap();

        assert_eq!(registered, None);
        assert!(matches!(
            worker.await.unwrap(),
            Err(ExecError::MissingExtension(m)) if m == "shaders"
        ));
    }

    fn executor(program: &str, max: usize, dir: &std::path::Path) -> RemoteExecutor {
        let config = RemoteConfig {
            max_concurrency: max,
            worker_program: Some(PathBuf::from(program)),
            socket_directory: Some(dir.to_path_buf()),
            debugger_pid: None,
        };
        RemoteExecutor::new(config, dir, &testing_registry())
    }

    #[tokio::test]
    async fn cancelled_before_spawn_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("/nonexistent/cairn-worker", 1, dir.path());
        let harness = Harness::new();
        let token = CancellationToken::new();
        token.cancel();

        let status = executor
            .execute(&ScriptedCommand::new(["x"]), &harness.context(token))
            .await
            .unwrap();
        assert_eq!(status, ResultStatus::Cancelled);
        assert_eq!(executor.pool().peak(), 0);
    }

    #[tokio::test]
    async fn crashing_worker_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("false", 1, dir.path());
        let harness = Harness::new();

        let status = executor
            .execute(&ScriptedCommand::new(["x"]), &harness.context(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(status, ResultStatus::Failed);
        let errors = harness.logger.messages_at_least(LogLevel::Error);
        assert!(errors[0].text.contains("crashed"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn silent_worker_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor("true", 1, dir.path());
        let harness = Harness::new();

        let status = executor
            .execute(&ScriptedCommand::new(["x"]), &harness.context(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(status, ResultStatus::Failed);
        assert!(harness.logger.has_errors());
    }

    /// Worker script that records how many workers were running when it
    /// started, then sleeps and fails.
    fn overlapping_worker(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let live = dir.join("live");
        std::fs::create_dir(&live).unwrap();
        let script = dir.join("worker.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 touch {live}/$$\n\
                 ls {live} | wc -l >> {counts}\n\
                 sleep 0.2\n\
                 rm {live}/$$\n\
                 exit 1\n",
                live = live.display(),
                counts = dir.join("counts").display(),
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn live_workers_stay_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = tempfile::tempdir().unwrap();
        let program = overlapping_worker(scripts.path());
        let executor = Arc::new(executor(program.to_str().unwrap(), 2, dir.path()));
        let harness = Arc::new(Harness::new());
        let started = std::time::Instant::now();
        let mut tasks = JoinSet::new();
        for _ in 0..6 {
            let executor = Arc::clone(&executor);
            let harness = Arc::clone(&harness);
            tasks.spawn(async move {
                let context = harness.context(CancellationToken::new());
                executor.execute(&ScriptedCommand::new(["x"]), &context).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), ResultStatus::Failed);
        }

        // Six 200ms workers, two at a time.
        assert!(started.elapsed() >= std::time::Duration::from_millis(600));
        let counts: Vec<usize> = std::fs::read_to_string(scripts.path().join("counts"))
            .unwrap()
            .split_whitespace()
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(counts.len(), 6);
        assert!(counts.iter().all(|&n| (1..=2).contains(&n)), "{counts:?}");
        assert!(executor.pool().peak() <= 2);
        assert_eq!(executor.pool().live(), 0);
    }
}
