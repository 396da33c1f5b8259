//! Scheduler: cron-triggered and filesystem-change-triggered plan firing
//! (spec §4.7), generalized from the teacher's queue-backed orchestrator
//! (`orchestrator::Scheduler`/`DistributedOrchestrator`) into a
//! trigger-driven daemon loop. Each plan name is serialized behind its own
//! mutex so a slow run never overlaps a second firing of the same plan.

use crate::audit::{self, AuditLogger};
use crate::config::ConfigSnapshot;
use crate::execution::ExecutionContext;
use crate::plan::{Plan, PlanRunner, Trigger};
use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// A plan together with the working tree it runs against; the scheduler
/// owns this pair for the lifetime of the daemon process.
pub struct ScheduledPlan {
    pub plan: Plan,
    pub working_dir: PathBuf,
}

pub struct Scheduler {
    runner: Arc<PlanRunner>,
    config: Arc<ConfigSnapshot>,
    runs_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(runner: Arc<PlanRunner>, config: Arc<ConfigSnapshot>, runs_root: PathBuf) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            runner,
            config,
            runs_root,
            locks: Mutex::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn shutdown_signal(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    async fn lock_for(&self, plan_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(plan_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Spawn one background task per trigger declared on `scheduled.plan`.
    /// Returns immediately; tasks run until the shutdown signal fires.
    pub fn spawn(self: &Arc<Self>, scheduled: ScheduledPlan) {
        let plan = Arc::new(scheduled.plan);
        let working_dir = scheduled.working_dir;

        for trigger in plan.triggers.clone() {
            let scheduler = self.clone();
            let plan = plan.clone();
            let working_dir = working_dir.clone();
            match trigger {
                Trigger::Cron { expression, timezone } => {
                    tokio::spawn(async move {
                        scheduler.run_cron_loop(plan, working_dir, expression, timezone).await;
                    });
                }
                Trigger::FsChange { paths, debounce_ms } => {
                    tokio::spawn(async move {
                        scheduler.run_fs_watch_loop(plan, working_dir, paths, debounce_ms).await;
                    });
                }
            }
        }
    }

    async fn run_cron_loop(self: Arc<Self>, plan: Arc<Plan>, working_dir: PathBuf, expression: String, timezone: Option<String>) {
        let schedule = match Schedule::from_str(&expression) {
            Ok(schedule) => schedule,
            Err(err) => {
                warn!(plan = %plan.name, %expression, %err, "invalid cron expression, trigger disabled");
                return;
            }
        };
        let tz: Tz = timezone
            .as_deref()
            .unwrap_or(&self.config.daemon.timezone)
            .parse()
            .unwrap_or(chrono_tz::UTC);

        let mut shutdown = self.shutdown_rx.clone();
        loop {
            let now = Utc::now().with_timezone(&tz);
            let Some(next) = schedule.after(&now).next() else {
                warn!(plan = %plan.name, "cron schedule has no future firings, trigger disabled");
                return;
            };
            let delay = (next - now).to_std().unwrap_or(std::time::Duration::from_secs(0));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.fire(&plan, &working_dir).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(plan = %plan.name, "cron trigger shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn run_fs_watch_loop(self: Arc<Self>, plan: Arc<Plan>, working_dir: PathBuf, paths: Vec<String>, debounce_ms: Option<u64>) {
        let debounce = std::time::Duration::from_millis(debounce_ms.unwrap_or(self.config.daemon.watcher_debounce_ms));
        let patterns: Vec<glob::Pattern> = paths.iter().filter_map(|p| glob::Pattern::new(p).ok()).collect();

        let (raw_tx, raw_rx) = std::sync::mpsc::channel();
        let watcher_result: notify::Result<RecommendedWatcher> = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        });
        let mut watcher = match watcher_result {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(plan = %plan.name, %err, "failed to create filesystem watcher, trigger disabled");
                return;
            }
        };
        if let Err(err) = watcher.watch(&working_dir, RecursiveMode::Recursive) {
            warn!(plan = %plan.name, %err, "failed to watch working tree, trigger disabled");
            return;
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::task::spawn_blocking(move || {
            while let Ok(event) = raw_rx.recv() {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(Ok(event)) = event else { continue };
                    let matches = event.paths.iter().any(|path| {
                        let relative = path.strip_prefix(&working_dir).unwrap_or(path);
                        let relative_str = relative.to_string_lossy().replace('\\', "/");
                        patterns.iter().any(|pattern| pattern.matches(&relative_str))
                    });
                    if !matches {
                        continue;
                    }
                    tokio::time::sleep(debounce).await;
                    while rx.try_recv().is_ok() {}
                    self.fire(&plan, &working_dir).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(plan = %plan.name, "filesystem trigger shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn fire(&self, plan: &Plan, working_dir: &PathBuf) {
        let lock = self.lock_for(&plan.name).await;
        let _guard = lock.lock().await;

        // Timestamp prefix keeps run directories sorting chronologically on
        // disk; the UUID suffix is what actually prevents collisions when
        // two triggers fire within the same second.
        let run_id = format!("run-{}-{}", Utc::now().format("%Y%m%dT%H%M%S%3fZ"), uuid::Uuid::new_v4());
        let (sink, rx) = audit::channel();
        let context = ExecutionContext::new(run_id.clone(), working_dir.clone(), self.config.clone(), sink);
        let mut logger = AuditLogger::new(&self.runs_root, run_id, &plan.name, rx);

        info!(plan = %plan.name, "firing scheduled plan");
        let run = self.runner.run(plan, &context).await;
        let status = match run.status {
            crate::plan::PlanRunStatus::Proposed => "proposed",
            crate::plan::PlanRunStatus::Completed => "completed",
            crate::plan::PlanRunStatus::Failed => "failed",
            crate::plan::PlanRunStatus::Aborted => "aborted",
        };
        if let Err(err) = logger.complete(status).await {
            warn!(plan = %plan.name, %err, "failed to persist run log");
        }
    }
}
