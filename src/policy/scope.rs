//! `scope_check`: path-traversal rejection plus filesystem/command/domain
//! allow-list matching (spec §4.2). Prefix/glob matching style lifted from
//! the teacher's `CommandPolicyEvaluator::allows_text`.

use crate::execution::ActionDescriptor;
use glob::Pattern;
use path_clean::PathClean;
use std::path::{Path, PathBuf};

pub struct ScopeChecker {
    filesystem_allowlist: Vec<Pattern>,
    command_allowlist: Vec<String>,
    domain_allowlist: Vec<String>,
}

fn compile_globs(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect()
}

impl ScopeChecker {
    pub fn from_config(policy: &crate::config::PolicyConfig) -> Self {
        Self {
            filesystem_allowlist: compile_globs(&policy.filesystem_allowlist),
            command_allowlist: policy.command_allowlist.clone(),
            domain_allowlist: policy.domain_allowlist.clone(),
        }
    }

    pub fn check(&self, action: &ActionDescriptor, project_root: &Path) -> Result<(), String> {
        if action.tool_name.starts_with("fs.") {
            if let Some(path) = action.arguments.get("path").and_then(|v| v.as_str()) {
                return self.check_fs_path(path, project_root);
            }
        }
        if action.tool_name == "cmd.run" {
            if let Some(command) = action.arguments.get("command").and_then(|v| v.as_str()) {
                return self.check_command(command);
            }
        }
        if action.tool_name.starts_with("net.") || action.tool_name.starts_with("http.") {
            if let Some(domain) = action.arguments.get("domain").and_then(|v| v.as_str()) {
                return self.check_domain(domain);
            }
        }
        Ok(())
    }

    fn check_fs_path(&self, path: &str, project_root: &Path) -> Result<(), String> {
        let joined = project_root.join(path).clean();
        let root_clean = project_root.to_path_buf().clean();
        if !joined.starts_with(&root_clean) {
            return Err(format!(
                "path '{path}' resolves outside project root (traversal via '..')"
            ));
        }

        if self.filesystem_allowlist.is_empty() {
            return Ok(());
        }

        let relative: PathBuf = joined
            .strip_prefix(&root_clean)
            .map(|p| p.to_path_buf())
            .unwrap_or(joined.clone());
        let relative_str = relative.to_string_lossy().replace('\\', "/");

        if self
            .filesystem_allowlist
            .iter()
            .any(|pattern| pattern.matches(&relative_str))
        {
            Ok(())
        } else {
            Err(format!(
                "path '{relative_str}' does not match the filesystem allow-list"
            ))
        }
    }

    fn check_command(&self, command: &str) -> Result<(), String> {
        if self.command_allowlist.is_empty() {
            return Ok(());
        }
        let matches = self.command_allowlist.iter().any(|rule| {
            command.trim().starts_with(rule.as_str())
                || regex::Regex::new(rule)
                    .map(|re| re.is_match(command))
                    .unwrap_or(false)
        });
        if matches {
            Ok(())
        } else {
            Err(format!("command '{command}' does not match the command allow-list"))
        }
    }

    fn check_domain(&self, domain: &str) -> Result<(), String> {
        if self.domain_allowlist.is_empty() {
            return Ok(());
        }
        let matches = self.domain_allowlist.iter().any(|rule| {
            domain == rule || (rule.starts_with('.') && domain.ends_with(rule.as_str()))
        });
        if matches {
            Ok(())
        } else {
            Err(format!("domain '{domain}' does not match the domain allow-list"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use serde_json::json;

    fn action(tool: &str, args: serde_json::Value) -> ActionDescriptor {
        ActionDescriptor {
            tool_name: tool.to_string(),
            operation: "op".to_string(),
            description: "".to_string(),
            required_permissions: vec![],
            arguments: args,
            risk_level: crate::permission::RiskLevel::Low,
        }
    }

    #[test]
    fn traversal_outside_root_is_rejected_regardless_of_allowlist() {
        let mut policy = PolicyConfig::default();
        policy.filesystem_allowlist = vec!["**".to_string()];
        let checker = ScopeChecker::from_config(&policy);
        let root = PathBuf::from("/workspace/project");
        let result = checker.check(&action("fs.read", json!({"path": "../etc/passwd"})), &root);
        assert!(result.is_err());
    }

    #[test]
    fn path_inside_root_matching_allowlist_passes() {
        let mut policy = PolicyConfig::default();
        policy.filesystem_allowlist = vec!["src/**".to_string()];
        let checker = ScopeChecker::from_config(&policy);
        let root = PathBuf::from("/workspace/project");
        let result = checker.check(&action("fs.read", json!({"path": "src/main.rs"})), &root);
        assert!(result.is_ok());
    }

    #[test]
    fn command_allowlist_matches_by_prefix() {
        let mut policy = PolicyConfig::default();
        policy.command_allowlist = vec!["git status".to_string()];
        let checker = ScopeChecker::from_config(&policy);
        let root = PathBuf::from("/workspace");
        assert!(checker
            .check(&action("cmd.run", json!({"command": "git status --short"})), &root)
            .is_ok());
        assert!(checker
            .check(&action("cmd.run", json!({"command": "rm -rf /"})), &root)
            .is_err());
    }

    #[test]
    fn domain_allowlist_matches_suffix_on_leading_dot() {
        let mut policy = PolicyConfig::default();
        policy.domain_allowlist = vec![".example.com".to_string()];
        let checker = ScopeChecker::from_config(&policy);
        let root = PathBuf::from("/workspace");
        assert!(checker
            .check(&action("http.get", json!({"domain": "api.example.com"})), &root)
            .is_ok());
        assert!(checker
            .check(&action("http.get", json!({"domain": "evil.com"})), &root)
            .is_err());
    }
}
