use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 7] = [
        ActionStatus::Pending,
        ActionStatus::Processing,
        ActionStatus::Retrying,
        ActionStatus::Completed,
        ActionStatus::Failed,
        ActionStatus::Cancelled,
        ActionStatus::Timeout,
    ];

    pub const TERMINAL: [ActionStatus; 4] = [
        ActionStatus::Completed,
        ActionStatus::Failed,
        ActionStatus::Cancelled,
        ActionStatus::Timeout,
    ];

    pub const ACTIVE: [ActionStatus; 3] = [
        ActionStatus::Pending,
        ActionStatus::Processing,
        ActionStatus::Retrying,
    ];

    /// Statuses covered by the dead-letter retention window.
    pub const DEAD_LETTER: [ActionStatus; 3] = [
        ActionStatus::Failed,
        ActionStatus::Cancelled,
        ActionStatus::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Processing => "processing",
            ActionStatus::Retrying => "retrying",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Cancelled => "cancelled",
            ActionStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for ActionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "status",
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for ActionStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// How a dependency edge is satisfied by its prerequisite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    /// Prerequisite must reach `completed`.
    #[default]
    #[serde(alias = "success")]
    Completion,
    /// Prerequisite must end in `failed`, `timeout` or `cancelled`.
    Failure,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::Completion => "completion",
            DependencyType::Failure => "failure",
        }
    }

    pub fn is_met_by(&self, prerequisite: ActionStatus) -> bool {
        match self {
            DependencyType::Completion => prerequisite == ActionStatus::Completed,
            DependencyType::Failure => ActionStatus::DEAD_LETTER.contains(&prerequisite),
        }
    }
}

impl FromStr for DependencyType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completion" | "success" => Ok(DependencyType::Completion),
            "failure" => Ok(DependencyType::Failure),
            other => Err(UnknownVariant {
                kind: "dependency type",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for DependencyType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
