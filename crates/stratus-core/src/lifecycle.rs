use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    Running,
    Complete,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildStatus::Complete | BuildStatus::Failed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStatus::Running => "RUNNING",
            BuildStatus::Complete => "COMPLETE",
            BuildStatus::Failed => "FAILED",
        })
    }
}

pub fn validate_transition(from: BuildStatus, to: BuildStatus) -> Result<(), CoreError> {
    let valid = from == to
        || matches!(
            (from, to),
            (
                BuildStatus::Running,
                BuildStatus::Complete | BuildStatus::Failed
            )
        );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
