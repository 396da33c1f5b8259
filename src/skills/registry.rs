//! Discovers and loads skill manifests from one or more install paths
//! (spec §3, `skills.installPaths`), generalized from the teacher's
//! directory-scan-then-parse pattern in its skill loader.

use super::manifest::{LoadedSkill, SkillLifecycle, SkillManifest};
use crate::AgentError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct SkillRegistry {
    skills: HashMap<String, LoadedSkill>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self {
            skills: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&LoadedSkill> {
        self.skills.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(|s| s.as_str()).collect()
    }

    /// Move a loaded skill along its `draft -> approved -> deprecated ->
    /// approved` lifecycle (spec §3 "Lifecycles"). Any other transition,
    /// including re-requesting the current state, is rejected.
    pub fn set_lifecycle(&mut self, name: &str, next: SkillLifecycle) -> Result<(), AgentError> {
        let skill = self
            .skills
            .get_mut(name)
            .ok_or_else(|| AgentError::SkillNotFound(name.to_string()))?;
        if !skill.manifest.lifecycle.can_transition_to(next) {
            return Err(AgentError::SkillManifestInvalid(format!(
                "illegal lifecycle transition for {name}: {:?} -> {:?}",
                skill.manifest.lifecycle, next
            )));
        }
        skill.manifest.lifecycle = next;
        Ok(())
    }

    fn insert(&mut self, manifest: SkillManifest, path: PathBuf) -> Result<(), String> {
        manifest.validate()?;
        let name = manifest.name.clone();
        self.skills.insert(name, LoadedSkill { manifest, path });
        Ok(())
    }

    /// Load every `*.json` manifest found under `dir` (spec §6: `.agent/skills/`
    /// holds one subdirectory per skill, each containing a manifest), up to
    /// two levels deep so a flat `dir/<name>.json` layout keeps working too.
    /// A malformed file is skipped with its error collected rather than
    /// aborting the whole directory scan.
    pub async fn load_dir(&mut self, dir: &Path) -> Vec<String> {
        let mut errors = Vec::new();
        let walk_root = dir.to_path_buf();
        let candidates = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&walk_root)
                .min_depth(1)
                .max_depth(2)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| {
                    entry.file_type().is_file()
                        && entry.path().extension().and_then(|e| e.to_str()) == Some("json")
                })
                .map(|entry| entry.into_path())
                .collect::<Vec<PathBuf>>()
        })
        .await
        .unwrap_or_default();

        for path in candidates {
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<SkillManifest>(&contents) {
                    Ok(manifest) => {
                        if let Err(err) = self.insert(manifest, path.clone()) {
                            errors.push(format!("{}: {err}", path.display()));
                        }
                    }
                    Err(err) => errors.push(format!("{}: {err}", path.display())),
                },
                Err(err) => errors.push(format!("{}: {err}", path.display())),
            }
        }
        errors
    }

    pub async fn load_paths(&mut self, paths: &[PathBuf]) -> Vec<String> {
        let mut errors = Vec::new();
        for path in paths {
            errors.extend(self.load_dir(path).await);
        }
        errors
    }
}

impl Default for SkillRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn loads_valid_manifest_and_skips_invalid() {
        let dir = tempdir().expect("tempdir");
        tokio::fs::write(
            dir.path().join("good.json"),
            r#"{"name": "good", "description": "d", "instructions": "do it"}"#,
        )
        .await
        .expect("write");
        tokio::fs::write(dir.path().join("bad.json"), r#"{"name": ""}"#)
            .await
            .expect("write");

        let mut registry = SkillRegistry::new();
        let errors = registry.load_dir(dir.path()).await;

        assert!(registry.get("good").is_some());
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn loads_manifests_from_per_skill_subdirectories() {
        let dir = tempdir().expect("tempdir");
        let skill_dir = dir.path().join("refactor-helper");
        tokio::fs::create_dir_all(&skill_dir).await.expect("mkdir");
        tokio::fs::write(
            skill_dir.join("manifest.json"),
            r#"{"name": "refactor-helper", "description": "d", "instructions": "do it"}"#,
        )
        .await
        .expect("write");

        let mut registry = SkillRegistry::new();
        let errors = registry.load_dir(dir.path()).await;

        assert!(errors.is_empty());
        assert!(registry.get("refactor-helper").is_some());
    }

    #[tokio::test]
    async fn lifecycle_rejects_skipping_approved() {
        let dir = tempdir().expect("tempdir");
        tokio::fs::write(
            dir.path().join("good.json"),
            r#"{"name": "good", "description": "d", "instructions": "do it"}"#,
        )
        .await
        .expect("write");
        let mut registry = SkillRegistry::new();
        registry.load_dir(dir.path()).await;

        assert!(registry.set_lifecycle("good", super::SkillLifecycle::Deprecated).is_err());
        assert!(registry.set_lifecycle("good", super::SkillLifecycle::Approved).is_ok());
        assert!(registry.set_lifecycle("good", super::SkillLifecycle::Deprecated).is_ok());
        assert!(registry.set_lifecycle("good", super::SkillLifecycle::Approved).is_ok());
    }
}
