use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a single command or build step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    /// The command has not produced a status yet.
    #[default]
    NotProcessed,
    Successful,
    Failed,
    Cancelled,
    /// Up-to-date: a previous run produced the same outputs.
    NotTriggeredWasSuccessful,
    /// Skipped because a prerequisite step failed.
    NotTriggeredPrerequisiteFailed,
}

impl ResultStatus {
    /// Returns `true` for statuses that count as a successful step.
    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Successful | Self::NotTriggeredWasSuccessful)
    }

    /// Returns `true` for statuses that count as a failed step.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::NotTriggeredPrerequisiteFailed)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotProcessed => "not-processed",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::NotTriggeredWasSuccessful => "up-to-date",
            Self::NotTriggeredPrerequisiteFailed => "prerequisite-failed",
        };
        f.write_str(name)
    }
}

/// Result of a whole build run, doubling as the process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildResultCode {
    Successful,
    BuildError,
    CommandLineError,
    Cancelled,
}

impl BuildResultCode {
    /// Process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Successful => 0,
            Self::BuildError => 1,
            Self::CommandLineError => 2,
            Self::Cancelled => 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_classification() {
        assert!(ResultStatus::Successful.is_successful());
        assert!(ResultStatus::NotTriggeredWasSuccessful.is_successful());
        assert!(!ResultStatus::Cancelled.is_successful());
        assert!(!ResultStatus::NotProcessed.is_successful());
    }

    #[test]
    fn failure_classification() {
        assert!(ResultStatus::Failed.is_failure());
        assert!(ResultStatus::NotTriggeredPrerequisiteFailed.is_failure());
        assert!(!ResultStatus::Cancelled.is_failure());
    }

    #[test]
    fn exit_codes() {
        assert_eq!(BuildResultCode::Successful.exit_code(), 0);
        assert_eq!(BuildResultCode::BuildError.exit_code(), 1);
        assert_eq!(BuildResultCode::CommandLineError.exit_code(), 2);
        assert_eq!(BuildResultCode::Cancelled.exit_code(), 100);
    }

    #[test]
    fn default_is_not_processed() {
        assert_eq!(ResultStatus::default(), ResultStatus::NotProcessed);
    }
}
