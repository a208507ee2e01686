use std::collections::HashSet;
use std::sync::Arc;

use cairn_store::ObjectDatabase;
use cairn_types::{BuildResultCode, Logger, ObjectId, ResultStatus, DO_NOT_COMPRESS_TAG};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command::{execute_inline, Command};
use crate::context::LocalCommandContext;
use crate::error::ExecResult;
use crate::host::RemoteExecutor;
use crate::input_hash::InputHashes;

/// Where a step's command runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Inline,
    Remote,
}

/// A command scheduled in a build.
#[derive(Clone, Debug)]
pub struct CommandStep {
    pub command: Arc<dyn Command>,
    pub mode: ExecutionMode,
}

impl CommandStep {
    pub fn new(command: impl Command + 'static, mode: ExecutionMode) -> Self {
        Self {
            command: Arc::new(command),
            mode,
        }
    }

    pub fn inline(command: impl Command + 'static) -> Self {
        Self::new(command, ExecutionMode::Inline)
    }

    pub fn remote(command: impl Command + 'static) -> Self {
        Self::new(command, ExecutionMode::Remote)
    }
}

/// Summary of a build run.
#[derive(Clone, Debug)]
pub struct BuildOutcome {
    pub code: BuildResultCode,
    /// Title and status of every step, in step order.
    pub statuses: Vec<(String, ResultStatus)>,
    /// Objects tagged `DoNotCompress` by a successful step.
    pub disabled_compression_ids: HashSet<ObjectId>,
}

impl BuildOutcome {
    pub fn count(&self, status: ResultStatus) -> usize {
        self.statuses.iter().filter(|(_, s)| *s == status).count()
    }
}

/// Runs command steps concurrently and collects their outputs into the
/// build's content index.
pub struct Builder {
    database: ObjectDatabase,
    logger: Arc<dyn Logger>,
    executor: Option<Arc<RemoteExecutor>>,
    input_hashes: Arc<InputHashes>,
    cancellation: CancellationToken,
}

impl Builder {
    pub fn new(database: ObjectDatabase, logger: Arc<dyn Logger>) -> Self {
        Self {
            database,
            logger,
            executor: None,
            input_hashes: Arc::new(InputHashes::new()),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_remote_executor(mut self, executor: Arc<RemoteExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn database(&self) -> &ObjectDatabase {
        &self.database
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Run every step and merge successful outputs into the index.
    pub async fn run(&self, steps: Vec<CommandStep>) -> BuildOutcome {
        let mut tasks = JoinSet::new();
        let mut statuses: Vec<(String, ResultStatus)> = steps
            .iter()
            .map(|step| (step.command.title(), ResultStatus::NotProcessed))
            .collect();

        for (position, step) in steps.into_iter().enumerate() {
            let context = LocalCommandContext::new(
                statuses[position].0.clone(),
                Arc::clone(&self.logger),
                Arc::clone(self.database.store()),
                Arc::clone(self.database.index()),
                Arc::clone(&self.input_hashes),
                self.cancellation.clone(),
            );
            let executor = self.executor.clone();
            tasks.spawn(async move {
                let status = run_step(&step, executor.as_deref(), &context).await;
                (position, status, context.into_result())
            });
        }

        let mut disabled_compression_ids = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let (position, status, result) = match joined {
                Ok(finished) => finished,
                Err(e) => {
                    warn!(error = %e, "build step panicked");
                    self.logger.error(&format!("Build step panicked: {e}"));
                    continue;
                }
            };
            statuses[position].1 = status;
            if status.is_successful() {
                disabled_compression_ids.extend(result.tagged_objects(DO_NOT_COMPRESS_TAG));
                self.database.index().merge(result.output_objects);
            }
        }
        for (_, status) in statuses.iter_mut() {
            if *status == ResultStatus::NotProcessed {
                *status = ResultStatus::Failed;
            }
        }

        let outcome = BuildOutcome {
            code: self.result_code(&statuses),
            statuses,
            disabled_compression_ids,
        };
        info!(
            successful = outcome.count(ResultStatus::Successful),
            failed = outcome.count(ResultStatus::Failed),
            cancelled = outcome.count(ResultStatus::Cancelled),
            "build finished"
        );
        outcome
    }

    fn result_code(&self, statuses: &[(String, ResultStatus)]) -> BuildResultCode {
        if self.cancellation.is_cancelled()
            || statuses.iter().any(|(_, s)| *s == ResultStatus::Cancelled)
        {
            BuildResultCode::Cancelled
        } else if statuses.iter().any(|(_, s)| s.is_failure()) {
            BuildResultCode::BuildError
        } else {
            BuildResultCode::Successful
        }
    }

    /// Persist the content index for the bundle packer.
    pub fn write_index_file(&self) -> ExecResult<()> {
        self.database.write_index()?;
        Ok(())
    }
}

async fn run_step(
    step: &CommandStep,
    executor: Option<&RemoteExecutor>,
    context: &LocalCommandContext,
) -> ResultStatus {
    match (step.mode, executor) {
        (ExecutionMode::Remote, Some(executor)) => {
            match executor.execute(step.command.as_ref(), context).await {
                Ok(status) => status,
                Err(e) => {
                    context.error(&format!("Remote execution failed: {e}"));
                    ResultStatus::Failed
                }
            }
        }
        (ExecutionMode::Remote, None) => {
            context.verbose("No remote executor configured, running inline");
            execute_inline(step.command.as_ref(), context).await
        }
        (ExecutionMode::Inline, _) => execute_inline(step.command.as_ref(), context).await,
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("database", &self.database)
            .field("remote", &self.executor.is_some())
            .finish()
    }
}
