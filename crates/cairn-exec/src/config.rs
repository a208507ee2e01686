use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Settings for running commands in worker processes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Maximum number of live worker processes.
    pub max_concurrency: usize,
    /// Worker executable. Defaults to the current executable.
    pub worker_program: Option<PathBuf>,
    /// Directory for rendezvous sockets. Defaults to the system temp dir.
    pub socket_directory: Option<PathBuf>,
    /// Passed to workers as `--reattach-debugger`.
    pub debugger_pid: Option<u32>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            worker_program: None,
            socket_directory: None,
            debugger_pid: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = RemoteConfig::default();
        assert!(c.max_concurrency >= 1);
        assert!(c.worker_program.is_none());
        assert!(c.debugger_pid.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: RemoteConfig = serde_json::from_str(r#"{"max_concurrency":3}"#).unwrap();
        assert_eq!(c.max_concurrency, 3);
        assert!(c.socket_directory.is_none());
    }
}
