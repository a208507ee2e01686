use std::any::Any;
use std::future::Future;

use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ExecError, ExecResult};

/// Single-threaded cooperative scheduler hosting a worker's tasks.
///
/// Micro-threads are spawned on a current-thread runtime and only make
/// progress inside [`run`](Self::run), which drives them until every one has
/// finished. The first error or panic is returned.
pub struct MicroThreadScheduler {
    runtime: Runtime,
    threads: Vec<(String, JoinHandle<ExecResult<()>>)>,
}

impl MicroThreadScheduler {
    pub fn new() -> ExecResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            threads: Vec::new(),
        })
    }

    /// Spawn a micro-thread. It starts running once [`run`](Self::run) is called.
    pub fn add<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = ExecResult<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(micro_thread = %name, "micro-thread added");
        let handle = self.runtime.spawn(future);
        self.threads.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Drive all micro-threads to completion.
    pub fn run(self) -> ExecResult<()> {
        let Self { runtime, threads } = self;
        runtime.block_on(async move {
            for (name, handle) in threads {
                match handle.await {
                    Ok(result) => result?,
                    Err(e) if e.is_panic() => {
                        return Err(ExecError::MicroThreadPanicked(format!(
                            "{name}: {}",
                            panic_message(e.into_panic())
                        )))
                    }
                    Err(e) => return Err(ExecError::MicroThreadPanicked(format!("{name}: {e}"))),
                }
                debug!(micro_thread = %name, "micro-thread finished");
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for MicroThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroThreadScheduler")
            .field("threads", &self.threads.len())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
