//! Layered JSON config loading, grounded on the teacher's
//! `config/loader` module (plain structs + serde defaults) but generalized
//! to the four-layer merge the spec calls for: built-in defaults, global
//! user-scope file, project file, environment overrides.

use super::ConfigSnapshot;
use serde_json::Value;
use std::path::Path;

/// Deep-merge `patch` into `base` (JSON-merge-patch semantics: objects
/// merge key by key, any other value type replaces wholesale). A `null`
/// patch is a no-op rather than an overwrite — `read_json_layer` returns
/// `Value::Null` for a missing or unparseable file, and that must leave
/// `base` untouched, not blow away everything merged into it so far.
fn merge(base: &mut Value, patch: Value) {
    if patch.is_null() {
        return;
    }
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value;
        }
    }
}

async fn read_json_layer(path: &Path) -> Value {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

/// Fixed environment-variable -> config-path mapping (spec §6). Boolean-
/// and numeric-looking values are coerced.
fn coerce_scalar(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = root;
    for segment in parents {
        if !cursor.is_object() {
            *cursor = Value::Object(Default::default());
        }
        cursor = cursor
            .as_object_mut()
            .expect("just coerced to object")
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Default::default());
    }
    cursor
        .as_object_mut()
        .expect("just coerced to object")
        .insert(last.to_string(), value);
}

const ENV_MAPPINGS: &[(&str, &[&str])] = &[
    ("AZURE_API_KEY", &["models", "providers", "azure", "apiKey"]),
    ("AZURE_API_BASE", &["models", "providers", "azure", "baseUrl"]),
    (
        "AZURE_DEPLOYMENT_NAME",
        &["models", "providers", "azure", "deployment"],
    ),
    (
        "AZURE_API_VERSION",
        &["models", "providers", "azure", "apiVersion"],
    ),
    (
        "AGENT_OPENAI_API_KEY",
        &["models", "providers", "openai", "apiKey"],
    ),
    (
        "AGENT_ANTHROPIC_API_KEY",
        &["models", "providers", "anthropic", "apiKey"],
    ),
    (
        "AGENT_DEFAULT_PROVIDER",
        &["models", "routing", "defaultProvider"],
    ),
    ("AGENT_OFFLINE_FIRST", &["models", "routing", "offlineFirst"]),
];

fn apply_env_overrides(root: &mut Value) {
    for (var, path) in ENV_MAPPINGS {
        if let Ok(raw) = std::env::var(var) {
            set_path(root, path, coerce_scalar(&raw));
        }
    }
}

/// Merge built-in defaults, a global user-scope file, the project file, and
/// environment overrides (in that order) into a final `ConfigSnapshot`.
pub async fn load_layered(global_path: Option<&Path>, project_path: &Path) -> ConfigSnapshot {
    let mut root = serde_json::to_value(ConfigSnapshot::default()).unwrap_or(Value::Null);

    if let Some(global) = global_path {
        merge(&mut root, read_json_layer(global).await);
    }
    merge(&mut root, read_json_layer(project_path).await);
    apply_env_overrides(&mut root);

    serde_json::from_value(root).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn project_layer_overrides_defaults() {
        let dir = tempdir().expect("tempdir");
        let project = dir.path().join("config.json");
        tokio::fs::write(&project, r#"{"policy": {"defaultApproval": "deny"}}"#)
            .await
            .expect("write");

        let snapshot = load_layered(None, &project).await;
        assert_eq!(snapshot.policy.default_approval, super::super::ApprovalDefault::Deny);
    }

    #[tokio::test]
    async fn missing_project_file_does_not_erase_the_global_layer() {
        let dir = tempdir().expect("tempdir");
        let global = dir.path().join("global.json");
        tokio::fs::write(&global, r#"{"policy": {"defaultApproval": "deny"}}"#)
            .await
            .expect("write");
        let project = dir.path().join("missing.json");

        let snapshot = load_layered(Some(&global), &project).await;
        assert_eq!(snapshot.policy.default_approval, super::super::ApprovalDefault::Deny);
    }

    #[tokio::test]
    async fn missing_files_fall_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        let project = dir.path().join("missing.json");
        let snapshot = load_layered(None, &project).await;
        assert_eq!(snapshot.tools.timeout_ms, 30_000);
    }

    #[test]
    fn env_var_coercion_handles_bools_and_numbers() {
        assert_eq!(coerce_scalar("true"), Value::Bool(true));
        assert_eq!(coerce_scalar("42"), Value::Number(42.into()));
        assert_eq!(coerce_scalar("hello"), Value::String("hello".into()));
    }

    // Mutates real process environment variables, which are shared process-wide
    // state; `#[serial]` keeps this from racing other tests in this module that
    // touch the same vars.
    #[tokio::test]
    #[serial_test::serial]
    async fn env_override_wins_over_project_file() {
        let dir = tempdir().expect("tempdir");
        let project = dir.path().join("config.json");
        tokio::fs::write(&project, r#"{"models": {"routing": {"defaultProvider": "openai"}}}"#)
            .await
            .expect("write");

        std::env::set_var("AGENT_DEFAULT_PROVIDER", "anthropic");
        let snapshot = load_layered(None, &project).await;
        std::env::remove_var("AGENT_DEFAULT_PROVIDER");

        assert_eq!(snapshot.models.routing.default_provider.as_deref(), Some("anthropic"));
    }
}
