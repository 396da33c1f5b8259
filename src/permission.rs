//! Permission categories shared between the Tool Registry and the Policy
//! Engine. Kept as a standalone module (rather than nested in `policy`)
//! because `ToolDefinition` also needs the enum without depending on the
//! full policy engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed enumeration of permission categories. Specific categories
/// override their parent when a policy rule set declares both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionCategory {
    Filesystem,
    FilesystemRead,
    FilesystemWrite,
    Exec,
    Network,
    UiAutomation,
    Secrets,
}

impl PermissionCategory {
    /// The parent category this one overrides, if any. Used by the policy
    /// engine's most-specific-rule-wins resolution.
    pub fn parent(self) -> Option<PermissionCategory> {
        match self {
            PermissionCategory::FilesystemRead | PermissionCategory::FilesystemWrite => {
                Some(PermissionCategory::Filesystem)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionCategory::Filesystem => "filesystem",
            PermissionCategory::FilesystemRead => "filesystem.read",
            PermissionCategory::FilesystemWrite => "filesystem.write",
            PermissionCategory::Exec => "exec",
            PermissionCategory::Network => "network",
            PermissionCategory::UiAutomation => "ui_automation",
            PermissionCategory::Secrets => "secrets",
        }
    }

    pub fn parse(s: &str) -> Option<PermissionCategory> {
        match s {
            "filesystem" => Some(PermissionCategory::Filesystem),
            "filesystem.read" => Some(PermissionCategory::FilesystemRead),
            "filesystem.write" => Some(PermissionCategory::FilesystemWrite),
            "exec" => Some(PermissionCategory::Exec),
            "network" => Some(PermissionCategory::Network),
            "ui_automation" => Some(PermissionCategory::UiAutomation),
            "secrets" => Some(PermissionCategory::Secrets),
            _ => None,
        }
    }
}

impl fmt::Display for PermissionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Risk level attached to an action descriptor; drives the `autonomous`
/// auto-grant fast path in `PolicyEngine::request_approval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}
