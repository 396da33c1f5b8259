//! Thin daemon entrypoint: loads the layered config and every Plan file
//! under `.agent/plans/`, wires the core subsystems, and runs the
//! Scheduler until SIGTERM/Ctrl-C. Flag parsing, interactive approval
//! UIs, and MCP transport are out of scope for this binary; it exists to
//! exercise the library's wiring, not to be the product surface.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use taskagent::config::{self, ConfigSnapshot};
use taskagent::execution::ExecutionEngine;
use taskagent::plan::{Plan, PlanRunner};
use taskagent::policy::PolicyEngine;
use taskagent::rollback::RollbackTracker;
use taskagent::scheduler::{ScheduledPlan, Scheduler};
use taskagent::tools::builtin::{CommandRunTool, FsExistsTool, FsPatchTool, FsReadTool, FsWriteTool};
use taskagent::tools::registry::ToolRegistry;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

async fn load_plans(plans_dir: &std::path::Path) -> Vec<Plan> {
    let mut plans = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(plans_dir).await else {
        return plans;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
        if !is_yaml {
            continue;
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match Plan::parse(&contents) {
                Ok(plan) => plans.push(plan),
                Err(err) => warn!(path = %path.display(), %err, "failed to parse plan, skipping"),
            },
            Err(err) => warn!(path = %path.display(), %err, "failed to read plan file"),
        }
    }
    plans
}

fn build_registry(config: &ConfigSnapshot) -> ToolRegistry {
    let mut registry = ToolRegistry::new(
        config.tools.enabled.clone(),
        Duration::from_millis(config.tools.timeout_ms),
    );
    let _ = registry.register(Arc::new(FsReadTool));
    let _ = registry.register(Arc::new(FsWriteTool));
    let _ = registry.register(Arc::new(FsPatchTool));
    let _ = registry.register(Arc::new(FsExistsTool));
    let _ = registry.register(Arc::new(CommandRunTool));
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let working_dir = std::env::current_dir().context("failed to read current directory")?;
    let agent_dir = working_dir.join(".agent");
    tokio::fs::create_dir_all(&agent_dir)
        .await
        .context("failed to create .agent directory")?;

    let global_config_path = dirs::config_dir().map(|dir| dir.join("taskagent").join("config.json"));
    let config = Arc::new(config::load_layered(global_config_path.as_deref(), &agent_dir.join("config.json")).await);

    if let Some(parent) = config.daemon.pid_file.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    if let Err(err) = tokio::fs::write(&config.daemon.pid_file, std::process::id().to_string()).await {
        warn!(%err, "failed to write pid file");
    }

    let registry = build_registry(&config);
    let policy = Arc::new(PolicyEngine::new(config.clone()));
    let rollback = Arc::new(RollbackTracker::new());
    let engine = Arc::new(ExecutionEngine::new(Arc::new(registry), policy, rollback));
    let plan_runner = Arc::new(PlanRunner::new(engine));

    let runs_root = agent_dir.join("runs");
    let scheduler = Arc::new(Scheduler::new(plan_runner, config.clone(), runs_root));

    let plans_dir = agent_dir.join("plans");
    let plans = load_plans(&plans_dir).await;
    info!(count = plans.len(), "loaded plans");
    for plan in plans {
        scheduler.spawn(ScheduledPlan {
            plan,
            working_dir: working_dir.clone(),
        });
    }

    wait_for_shutdown().await;
    let _ = scheduler.shutdown_signal().send(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let _ = tokio::fs::remove_file(&config.daemon.pid_file).await;
    info!("daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!(%err, "failed to install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received ctrl-c");
}
