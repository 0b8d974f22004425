//! User extension points: custom text rewriting and cron tasks.
//!
//! Hooks are registered once at startup; the core never resolves user code
//! by name at runtime beyond that single registration step.

use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::config::{CronConfig, MirrorConfig};

/// Synthetic mime handed to the custom rewriter for `Location` headers.
pub const LOCATION_MIME: &str = "mwm/headers-location";

/// Outcome of a custom text rewrite.
pub struct Rewritten {
    pub text: String,
    /// When set, the builtin URL rewriters are skipped for this body.
    pub skip_builtin: bool,
}

impl Rewritten {
    pub fn text(text: String) -> Self {
        Self {
            text,
            skip_builtin: false,
        }
    }
}

/// User-supplied response text rewriter.
///
/// Called with the decoded body, its mime and the origin URL, before the
/// builtin rewriters. `Location` header values come through with the
/// [`LOCATION_MIME`] marker mime.
pub trait TextRewriter: Send + Sync {
    fn rewrite(&self, text: String, mime: &str, url: &str) -> Rewritten;
}

/// A registered cron target.
pub trait CronTask: Send + Sync {
    fn run(&self);
}

impl<F: Fn() + Send + Sync> CronTask for F {
    fn run(&self) {
        self()
    }
}

/// Registry mapping `[cron] target` names to implementations.
#[derive(Default)]
pub struct CronRegistry {
    targets: HashMap<String, Arc<dyn CronTask>>,
}

impl CronRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, task: Arc<dyn CronTask>) {
        self.targets.insert(name.into(), task);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CronTask>> {
        self.targets.get(name).cloned()
    }

    /// Spawn one looping tokio task per configured entry.
    ///
    /// Tasks are started in priority order (lower first); unknown targets
    /// are logged and skipped. Intervals below the minimum are clamped.
    pub fn spawn_all(&self, conf: &MirrorConfig) {
        if !conf.cron.enable {
            return;
        }

        let mut tasks = conf.cron.tasks.clone();
        tasks.sort_by_key(|t| t.priority);

        for task_conf in tasks {
            let Some(task) = self.get(&task_conf.target) else {
                tracing::warn!(
                    name = %task_conf.name,
                    target = %task_conf.target,
                    "cron task references an unregistered target, skipped"
                );
                continue;
            };

            let interval = Duration::from_secs(CronConfig::effective_interval(&task_conf));
            let name = task_conf.name.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // the immediate first tick; work starts one interval in
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    tracing::debug!(name = %name, "running cron task");
                    task.run();
                }
            });
        }
    }
}
