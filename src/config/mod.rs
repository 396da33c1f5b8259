//! Layered configuration: built-in defaults, then a global user-scope file,
//! then the project file, then environment-variable overrides (spec §6).
//!
//! The language-model provider adapters themselves are an out-of-scope
//! external collaborator; `ModelsConfig` here only carries the shape the
//! core needs to route requests, not the adapters.

mod loader;

pub use loader::load_layered;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDefault {
    Allow,
    Confirm,
    Deny,
}

impl Default for ApprovalDefault {
    fn default() -> Self {
        ApprovalDefault::Confirm
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub permission: String,
    pub action: ApprovalDefault,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    #[serde(default)]
    pub default_approval: ApprovalDefault,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default)]
    pub filesystem_allowlist: Vec<String>,
    #[serde(default)]
    pub command_allowlist: Vec<String>,
    #[serde(default)]
    pub domain_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(default = "default_max_disk_write_mib")]
    pub max_disk_write_mib: u64,
    #[serde(default = "default_max_cpu_seconds")]
    pub max_cpu_seconds: u64,
    #[serde(default = "default_max_memory_mib")]
    pub max_memory_mib: u64,
}

fn default_max_disk_write_mib() -> u64 {
    256
}
fn default_max_cpu_seconds() -> u64 {
    60
}
fn default_max_memory_mib() -> u64 {
    1024
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_disk_write_mib: default_max_disk_write_mib(),
            max_cpu_seconds: default_max_cpu_seconds(),
            max_memory_mib: default_max_memory_mib(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfig {
    #[serde(default = "default_enabled_patterns")]
    pub enabled: Vec<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    /// Maximum subprocess output retained in memory (default 10 MiB, §5).
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_enabled_patterns() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    0
}
fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_patterns(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            resource_limits: ResourceLimits::default(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SkillsConfig {
    #[serde(default)]
    pub install_paths: Vec<PathBuf>,
    #[serde(default)]
    pub registry_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_watcher_debounce_ms")]
    pub watcher_debounce_ms: u64,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_watcher_debounce_ms() -> u64 {
    500
}
fn default_pid_file() -> PathBuf {
    PathBuf::from(".agent/daemon.pid")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            watcher_debounce_ms: default_watcher_debounce_ms(),
            pid_file: default_pid_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    pub default_provider: Option<String>,
    #[serde(default)]
    pub offline_first: bool,
    #[serde(default)]
    pub fallback_chain: Vec<String>,
    #[serde(default)]
    pub skill_overrides: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelsConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Immutable, fully-merged configuration for the lifetime of a run. Even
/// if the on-disk file changes mid-run, this snapshot remains authoritative
/// (§5 Shared resources).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_approval: ApprovalDefault::default(),
            rules: Vec::new(),
            filesystem_allowlist: Vec::new(),
            command_allowlist: Vec::new(),
            domain_allowlist: Vec::new(),
        }
    }
}
