use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt as _;
use tracing::Instrument as _;

use super::TaskContext;
use crate::TaskStartError;

/// Admission rules for [`TaskRegistry::start`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Refuse to start while any other task runs
    pub singleton: bool,
    /// Refuse to start when the previous task belonged to another scope
    pub scope_check: bool,
}

impl StartOptions {
    pub fn singleton() -> Self {
        Self {
            singleton: true,
            scope_check: false,
        }
    }

    #[must_use]
    pub fn with_scope_check(mut self) -> Self {
        self.scope_check = true;
        self
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    running: HashMap<String, Arc<TaskContext>>,
    last_task: Option<String>,
}

/// Keeps track of background tasks and decides whether a new one may start.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

/// The scope of a task name is everything before the first `-`, with `_` read as `-`.
///
/// `archdaily-fetch` and `archdaily_scan-missing` share the scope `archdaily`.
pub fn task_scope(name: &str) -> String {
    let normalized = name.replace('_', "-");
    normalized
        .split('-')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<TaskContext>> {
        self.lock().running.get(name).cloned()
    }

    pub fn running_tasks(&self) -> Vec<String> {
        self.lock().running.keys().cloned().collect()
    }

    pub fn last_task(&self) -> Option<String> {
        self.lock().last_task.clone()
    }

    /// Starts `work` as a background task named `name`.
    ///
    /// Errors and panics of the work function are logged and mark the run as failed, they never
    /// reach the caller. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Errors if the admission rules refuse the task.
    pub fn start<F, Fut>(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: StartOptions,
        work: F,
    ) -> Result<Arc<TaskContext>, TaskStartError>
    where
        F: FnOnce(Arc<TaskContext>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let ctx = {
            let mut state = self.lock();
            Self::admit(&state, &name, options)?;

            let ctx = Arc::new(TaskContext::new(&name));
            state.running.insert(name.clone(), Arc::clone(&ctx));
            ctx
        };

        let registry = Arc::clone(self);
        let task_ctx = Arc::clone(&ctx);
        let span = tracing::info_span!("task", name = %name);

        tokio::spawn(
            async move {
                task_ctx.mark_started();
                let started = std::time::Instant::now();
                tracing::info!("Starting task");

                // Panics raised while calling `work` are caught as well
                let run_ctx = Arc::clone(&task_ctx);
                let result = AssertUnwindSafe(async move { work(run_ctx).await })
                    .catch_unwind()
                    .await;

                let succeeded = match result {
                    Ok(Ok(())) => true,
                    Ok(Err(error)) => {
                        tracing::error!(error = ?error, "Task failed");
                        false
                    }
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(ToString::to_string)
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        tracing::error!(panic = %message, "Task panicked");
                        false
                    }
                };

                tracing::info!(
                    elapsed_in_seconds = started.elapsed().as_secs(),
                    succeeded,
                    "Task finished"
                );
                registry.finish(&task_ctx);
                task_ctx.mark_finished(succeeded);
            }
            .instrument(span),
        );

        Ok(ctx)
    }

    fn admit(state: &RegistryState, name: &str, options: StartOptions) -> Result<(), TaskStartError> {
        if state.running.contains_key(name) {
            return Err(TaskStartError::AlreadyRunning(name.to_string()));
        }

        if options.singleton {
            if let Some(running) = state.running.keys().next() {
                return Err(TaskStartError::AnotherTaskRunning {
                    requested: name.to_string(),
                    running: running.clone(),
                });
            }
        }

        if options.scope_check {
            if let Some(previous) = &state.last_task {
                if task_scope(previous) != task_scope(name) {
                    return Err(TaskStartError::ScopeMismatch {
                        requested: name.to_string(),
                        previous: previous.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn finish(&self, ctx: &TaskContext) {
        let mut state = self.lock();
        state.running.remove(ctx.name());
        state.last_task = Some(ctx.name().to_string());
    }

    /// Stops every running task and waits for all of them
    pub async fn stop_all(&self) {
        let running: Vec<_> = self.lock().running.values().cloned().collect();
        for ctx in &running {
            ctx.stop();
        }
        for ctx in running {
            ctx.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RunState;
    use std::time::Duration;

    async fn wait_until_cancelled(ctx: Arc<TaskContext>) -> anyhow::Result<()> {
        ctx.cancellation_token().cancelled().await;
        Ok(())
    }

    fn should_panic() -> bool {
        true
    }

    #[test]
    fn test_task_scope() {
        assert_eq!(task_scope("archdaily-fetch"), "archdaily");
        assert_eq!(task_scope("gooood_parse-all"), "gooood");
        assert_eq!(task_scope("scan"), "scan");
    }

    #[test_log::test(tokio::test)]
    async fn test_same_name_is_refused() {
        let registry = TaskRegistry::new();
        let ctx = registry
            .start("archdaily-fetch", StartOptions::default(), wait_until_cancelled)
            .unwrap();

        let err = registry
            .start("archdaily-fetch", StartOptions::default(), wait_until_cancelled)
            .unwrap_err();
        assert_eq!(err, TaskStartError::AlreadyRunning("archdaily-fetch".into()));

        ctx.stop_and_wait().await;
        assert!(!ctx.is_running());
        assert!(registry.running_tasks().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_singleton_refuses_while_anything_runs() {
        let registry = TaskRegistry::new();
        let other = registry
            .start("gooood-crawl", StartOptions::default(), wait_until_cancelled)
            .unwrap();

        let err = registry
            .start("archdaily-parse", StartOptions::singleton(), wait_until_cancelled)
            .unwrap_err();
        assert!(matches!(err, TaskStartError::AnotherTaskRunning { .. }));

        other.stop_and_wait().await;
        let ctx = registry
            .start("archdaily-parse", StartOptions::singleton(), |_| async { Ok(()) })
            .unwrap();
        ctx.wait().await;
        assert_eq!(ctx.status().run_state, RunState::Succeeded);
    }

    #[test_log::test(tokio::test)]
    async fn test_scope_check() {
        let registry = TaskRegistry::new();
        let options = StartOptions::singleton().with_scope_check();

        let first = registry
            .start("archdaily-scan", options, |_| async { Ok(()) })
            .unwrap();
        first.wait().await;
        assert_eq!(registry.last_task().as_deref(), Some("archdaily-scan"));

        let err = registry
            .start("gooood-parse", options, |_| async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, TaskStartError::ScopeMismatch { .. }));

        let same_scope = registry
            .start("archdaily_fetch", options, |_| async { Ok(()) })
            .unwrap();
        same_scope.wait().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_errors_and_panics_are_contained() {
        let registry = TaskRegistry::new();

        let failing = registry
            .start("archdaily-upload", StartOptions::default(), |_| async {
                Err::<(), _>(anyhow::anyhow!("database unreachable"))
            })
            .unwrap();
        failing.wait().await;
        assert_eq!(failing.status().run_state, RunState::Failed);

        let panicking = registry
            .start("archdaily-embed", StartOptions::default(), |_| async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                if should_panic() {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap();
        panicking.wait().await;
        assert_eq!(panicking.status().run_state, RunState::Failed);
        assert!(registry.running_tasks().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_panic_while_building_the_work_is_contained() {
        let registry = TaskRegistry::new();

        let ctx = registry
            .start("archdaily-repair", StartOptions::singleton(), |_| {
                if should_panic() {
                    panic!("boom");
                }
                async { Ok(()) }
            })
            .unwrap();
        ctx.wait().await;

        assert_eq!(ctx.status().run_state, RunState::Failed);
        assert!(registry.running_tasks().is_empty());
        registry
            .start("archdaily-scan", StartOptions::singleton(), |_| async { Ok(()) })
            .unwrap()
            .wait()
            .await;
    }
}
