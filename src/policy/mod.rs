//! Policy Engine: permission resolution, scope checks, approval caching
//! (spec §4.2). Grounded on the teacher's `tool_policy`/`command_policy`
//! pair — allow/prompt/deny enum plus prefix/regex/glob allow-deny lists —
//! generalized from "tool policy" to "permission policy".

mod scope;

pub use scope::ScopeChecker;

use crate::audit::AuditEventKind;
use crate::config::{ApprovalDefault, ConfigSnapshot};
use crate::execution::{ActionDescriptor, ExecutionContext};
use crate::permission::{PermissionCategory, RiskLevel};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(String),
    NeedsApproval(String),
}

pub struct PolicyEngine {
    config: Arc<ConfigSnapshot>,
    scope: ScopeChecker,
}

impl PolicyEngine {
    pub fn new(config: Arc<ConfigSnapshot>) -> Self {
        let scope = ScopeChecker::from_config(&config.policy);
        Self { config, scope }
    }

    /// Layer a plan's own scoped filesystem/command allow-lists (spec §3
    /// "Plan" policy block) on top of this engine's configured ones,
    /// producing a fresh engine restricted to their union... additively,
    /// matching the rest of the allow-list semantics (empty = unrestricted).
    pub fn with_additional_scope(&self, filesystem: &[String], command: &[String]) -> PolicyEngine {
        if filesystem.is_empty() && command.is_empty() {
            return PolicyEngine::new(self.config.clone());
        }
        let mut config = (*self.config).clone();
        config.policy.filesystem_allowlist.extend(filesystem.iter().cloned());
        config.policy.command_allowlist.extend(command.iter().cloned());
        PolicyEngine::new(Arc::new(config))
    }

    /// Most-specific-rule-wins resolution for a single permission:
    /// exact permission rule, else parent category rule, else the
    /// configured default. Unparseable rule patterns are treated as
    /// non-matching, never as implicit allow.
    fn resolve_rule(&self, permission: PermissionCategory) -> ApprovalDefault {
        let exact = self
            .config
            .policy
            .rules
            .iter()
            .find(|r| PermissionCategory::parse(&r.permission) == Some(permission));
        if let Some(rule) = exact {
            return rule.action.clone();
        }
        if let Some(parent) = permission.parent() {
            let parent_rule = self
                .config
                .policy
                .rules
                .iter()
                .find(|r| PermissionCategory::parse(&r.permission) == Some(parent));
            if let Some(rule) = parent_rule {
                return rule.action.clone();
            }
        }
        self.config.policy.default_approval.clone()
    }

    /// Gate an action descriptor. Returns `Allowed` only if every required
    /// permission clears allow or session approval.
    pub async fn check(&self, action: &ActionDescriptor, context: &ExecutionContext) -> Decision {
        if let Err(reason) = self.scope.check(action, &context.working_dir) {
            context.audit.emit(
                AuditEventKind::PermissionDenied,
                json!({"tool": action.tool_name, "reason": reason}),
            );
            return Decision::Denied(reason);
        }

        for permission in &action.required_permissions {
            if context.is_approved(&action.tool_name, *permission).await {
                continue;
            }

            context.audit.emit(
                AuditEventKind::PermissionCheck,
                json!({"tool": action.tool_name, "permission": permission.as_str()}),
            );

            match self.resolve_rule(*permission) {
                ApprovalDefault::Allow => continue,
                ApprovalDefault::Deny => {
                    let reason = format!(
                        "permission '{}' denied by policy for tool '{}'",
                        permission, action.tool_name
                    );
                    context
                        .audit
                        .emit(AuditEventKind::PermissionDenied, json!({"reason": reason}));
                    return Decision::Denied(reason);
                }
                ApprovalDefault::Confirm => {
                    return Decision::NeedsApproval(format!(
                        "permission '{}' requires approval for tool '{}'",
                        permission, action.tool_name
                    ));
                }
            }
        }

        Decision::Allowed
    }

    /// Resolve a `NeedsApproval` decision into a yes/no, caching a grant as
    /// a session approval for every permission the action requires.
    pub async fn request_approval(&self, action: &ActionDescriptor, context: &ExecutionContext) -> bool {
        if context.autonomous && action.risk_level == RiskLevel::Low {
            for permission in &action.required_permissions {
                context.cache_approval(&action.tool_name, *permission).await;
            }
            context.audit.emit(
                AuditEventKind::ApprovalGranted,
                json!({"tool": action.tool_name, "mode": "autonomous-low-risk"}),
            );
            return true;
        }

        let Some(prompter) = &context.approval_prompter else {
            context.audit.emit(
                AuditEventKind::ApprovalDenied,
                json!({"tool": action.tool_name, "reason": "no approval prompter configured"}),
            );
            return false;
        };

        if prompter.prompt(action).await {
            for permission in &action.required_permissions {
                context.cache_approval(&action.tool_name, *permission).await;
            }
            context
                .audit
                .emit(AuditEventKind::ApprovalGranted, json!({"tool": action.tool_name}));
            true
        } else {
            context
                .audit
                .emit(AuditEventKind::ApprovalDenied, json!({"tool": action.tool_name}));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::channel;
    use crate::config::{PolicyRule};
    use std::path::PathBuf;

    fn ctx(config: Arc<ConfigSnapshot>) -> ExecutionContext {
        let (sink, _rx) = channel();
        ExecutionContext::new("run-1", PathBuf::from("."), config, sink)
    }

    fn action(tool: &str, perms: Vec<PermissionCategory>) -> ActionDescriptor {
        ActionDescriptor {
            tool_name: tool.to_string(),
            operation: "op".to_string(),
            description: "desc".to_string(),
            required_permissions: perms,
            arguments: json!({}),
            risk_level: RiskLevel::Medium,
        }
    }

    #[tokio::test]
    async fn specific_rule_overrides_parent() {
        let mut config = ConfigSnapshot::default();
        config.policy.rules = vec![
            PolicyRule {
                permission: "filesystem".to_string(),
                action: ApprovalDefault::Deny,
            },
            PolicyRule {
                permission: "filesystem.read".to_string(),
                action: ApprovalDefault::Allow,
            },
        ];
        let config = Arc::new(config);
        let engine = PolicyEngine::new(config.clone());
        let context = ctx(config);

        let decision = engine
            .check(
                &action("fs.read", vec![PermissionCategory::FilesystemRead]),
                &context,
            )
            .await;
        assert_eq!(decision, Decision::Allowed);
    }

    #[tokio::test]
    async fn deny_rule_blocks_with_zero_side_effects() {
        let mut config = ConfigSnapshot::default();
        config.policy.rules = vec![PolicyRule {
            permission: "filesystem.write".to_string(),
            action: ApprovalDefault::Deny,
        }];
        let config = Arc::new(config);
        let engine = PolicyEngine::new(config.clone());
        let context = ctx(config);

        let decision = engine
            .check(
                &action("fs.write", vec![PermissionCategory::FilesystemWrite]),
                &context,
            )
            .await;
        matches!(decision, Decision::Denied(_));
    }

    #[tokio::test]
    async fn session_approval_is_reused_without_reprompting() {
        let config = Arc::new(ConfigSnapshot::default());
        let engine = PolicyEngine::new(config.clone());
        let context = ctx(config);
        context
            .cache_approval("fs.write", PermissionCategory::FilesystemWrite)
            .await;

        let decision = engine
            .check(
                &action("fs.write", vec![PermissionCategory::FilesystemWrite]),
                &context,
            )
            .await;
        assert_eq!(decision, Decision::Allowed);
    }

    #[tokio::test]
    async fn clearing_context_clears_approvals() {
        let config = Arc::new(ConfigSnapshot::default());
        let context = ctx(config);
        context
            .cache_approval("fs.write", PermissionCategory::FilesystemWrite)
            .await;
        context.clear_approvals().await;
        assert!(!context
            .is_approved("fs.write", PermissionCategory::FilesystemWrite)
            .await);
    }
}
