//! JSON-based Skill manifests, generalized from the teacher's YAML
//! SKILL.md frontmatter (`SkillYaml`) into the declarative JSON shape the
//! runtime's other manifests (Plan files, config layers) already use.

use crate::tools::schema::SchemaNode;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").unwrap_or_else(|_| Regex::new("$^").unwrap()));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLifecycle {
    Draft,
    Approved,
    Deprecated,
}

impl Default for SkillLifecycle {
    fn default() -> Self {
        SkillLifecycle::Draft
    }
}

impl SkillLifecycle {
    /// `draft -> approved`, `approved -> deprecated`, and `deprecated ->
    /// approved` (re-approval) are the only legal transitions; every other
    /// pair (including self-transitions) is rejected.
    pub fn can_transition_to(self, next: SkillLifecycle) -> bool {
        matches!(
            (self, next),
            (SkillLifecycle::Draft, SkillLifecycle::Approved)
                | (SkillLifecycle::Approved, SkillLifecycle::Deprecated)
                | (SkillLifecycle::Deprecated, SkillLifecycle::Approved)
        )
    }
}

/// A skill's static definition: identity, the sub-LLM prompt it seeds the
/// agentic loop with, and the subset of registered tools it may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub lifecycle: SkillLifecycle,
    /// Tool names this skill's sub-loop is allowed to call. An empty list
    /// means "no tools" (text-only skill), not "all tools" — there is no
    /// implicit wildcard here, unlike the Tool Registry's own enable-list.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Markdown/plain-text instructions used as the sub-loop's system
    /// prompt.
    pub instructions: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub author: Option<String>,
    /// Shell commands run once the agentic loop terminates naturally; the
    /// skill only counts as a success if every one of these exits zero
    /// (empty list means no post-run gate).
    #[serde(default)]
    pub validators: Vec<String>,
}

fn default_max_iterations() -> u32 {
    20
}

impl SkillManifest {
    pub fn validate(&self) -> Result<(), String> {
        if !NAME_PATTERN.is_match(&self.name) {
            return Err(format!(
                "skill name {:?} must match ^[a-z0-9][a-z0-9._-]*$",
                self.name
            ));
        }
        if self.description.trim().is_empty() {
            return Err("skill description must not be empty".to_string());
        }
        if let Some(version) = &self.version {
            if semver::Version::parse(version).is_err() {
                return Err(format!("skill version {version:?} is not valid semver"));
            }
        }
        if self.max_iterations == 0 {
            return Err("skill maxIterations must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Template-variable substitution schema for a skill's prompt, exposed so a
/// caller can validate its inputs before they are interpolated into the
/// instructions text. Not persisted on disk; kept purely as a helper for
/// callers that want to describe their own arguments as a `SchemaNode`.
pub fn skill_argument_schema(fields: impl IntoIterator<Item = (&'static str, SchemaNode)>) -> SchemaNode {
    crate::tools::schema::object(fields)
}

#[derive(Debug, Clone)]
pub struct LoadedSkill {
    pub manifest: SkillManifest,
    pub path: PathBuf,
}
