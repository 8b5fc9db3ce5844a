use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{ProjectId, StageOutcome};

const RECENT_LIMIT: usize = 10;

/// How a task run ended, if it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug)]
struct ProgressState {
    run_state: RunState,
    curr: usize,
    total: usize,
    message: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    running: Vec<ProjectId>,
    project_started: HashMap<ProjectId, Instant>,
    sub_progress: HashMap<ProjectId, (usize, usize)>,
    succeeded: Vec<ProjectId>,
    failed: Vec<ProjectId>,
    completed: Vec<ProjectId>,
    custom: Map<String, Value>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            run_state: RunState::Pending,
            curr: 0,
            total: 0,
            message: String::new(),
            started_at: None,
            finished_at: None,
            running: Vec::new(),
            project_started: HashMap::new(),
            sub_progress: HashMap::new(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            completed: Vec::new(),
            custom: Map::new(),
        }
    }
}

/// Progress and cancellation handle of one background task.
///
/// The work function receives it and reports through it; a UI polls [`TaskContext::status`].
/// Cancellation is cooperative: work is expected to check [`TaskContext::should_stop`] or the
/// token between units.
#[derive(Debug)]
pub struct TaskContext {
    name: String,
    cancel: CancellationToken,
    running: watch::Sender<bool>,
    state: Mutex<ProgressState>,
}

impl TaskContext {
    pub fn new(name: impl Into<String>) -> Self {
        let (running, _) = watch::channel(true);
        Self {
            name: name.into(),
            cancel: CancellationToken::new(),
            running,
            state: Mutex::new(ProgressState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn should_stop(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Requests the task to stop without waiting for it
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Waits until the task has finished
    pub async fn wait(&self) {
        let mut receiver = self.running.subscribe();
        // Only errors when the sender is gone, and we hold the sender.
        let _ = receiver.wait_for(|running| !*running).await;
    }

    /// Requests a stop and waits until the task reports it is no longer running
    pub async fn stop_and_wait(&self) {
        self.stop();
        self.wait().await;
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ProgressState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub(crate) fn mark_started(&self) {
        self.with_state(|state| {
            state.run_state = RunState::Running;
            state.started_at = Some(Utc::now());
        });
    }

    pub(crate) fn mark_finished(&self, succeeded: bool) {
        self.with_state(|state| {
            state.run_state = if succeeded {
                RunState::Succeeded
            } else {
                RunState::Failed
            };
            state.finished_at = Some(Utc::now());
        });
        self.running.send_replace(false);
    }

    pub fn set_total(&self, total: usize) {
        self.with_state(|state| state.total = total);
    }

    pub fn set_curr(&self, curr: usize) {
        self.with_state(|state| state.curr = curr);
    }

    /// Advances the overall counter
    pub fn advance(&self, count: usize) {
        self.with_state(|state| state.curr += count);
    }

    pub fn report_message(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(task = %self.name, "{message}");
        self.with_state(|state| state.message = message);
    }

    pub fn report_project_start(&self, id: &ProjectId) {
        self.with_state(|state| {
            state.project_started.insert(id.clone(), Instant::now());
            if !state.running.contains(id) {
                state.running.push(id.clone());
            }
        });
    }

    pub fn report_project_sub_total(&self, id: &ProjectId, total: usize) {
        self.with_state(|state| {
            state.sub_progress.entry(id.clone()).or_insert((0, 0)).1 = total;
        });
    }

    pub fn report_project_sub_curr(&self, id: &ProjectId, curr: usize) {
        self.with_state(|state| {
            state.sub_progress.entry(id.clone()).or_insert((0, 0)).0 = curr;
        });
    }

    /// Moves a project out of the running set into its final bucket
    pub fn report_project_outcome(&self, id: &ProjectId, outcome: StageOutcome) {
        self.with_state(|state| {
            state.running.retain(|running| running != id);
            state.project_started.remove(id);
            state.sub_progress.remove(id);
            match outcome {
                StageOutcome::Success => state.succeeded.push(id.clone()),
                StageOutcome::Failure => state.failed.push(id.clone()),
                StageOutcome::Complete => state.completed.push(id.clone()),
            }
        });
    }

    pub fn report_project_success(&self, id: &ProjectId) {
        self.report_project_outcome(id, StageOutcome::Success);
    }

    pub fn report_project_failed(&self, id: &ProjectId) {
        self.report_project_outcome(id, StageOutcome::Failure);
    }

    pub fn report_project_complete(&self, id: &ProjectId) {
        self.report_project_outcome(id, StageOutcome::Complete);
    }

    /// Free-form diagnostics for the UI, such as how many projects lacked a record
    pub fn set_custom(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.with_state(|state| state.custom.insert(key, value));
    }

    pub fn success_projects(&self) -> Vec<ProjectId> {
        self.with_state(|state| state.succeeded.clone())
    }

    pub fn failed_projects(&self) -> Vec<ProjectId> {
        self.with_state(|state| state.failed.clone())
    }

    pub fn complete_projects(&self) -> Vec<ProjectId> {
        self.with_state(|state| state.completed.clone())
    }

    pub fn running_projects(&self) -> Vec<ProjectId> {
        self.with_state(|state| state.running.clone())
    }

    /// Snapshot for polling
    pub fn status(&self) -> TaskStatus {
        let is_running = self.is_running();
        let should_stop = self.should_stop();
        self.with_state(|state| {
            let running = state
                .running
                .iter()
                .map(|id| {
                    let elapsed = state
                        .project_started
                        .get(id)
                        .map_or(0.0, |started| started.elapsed().as_secs_f64());
                    let (sub_curr, sub_total) =
                        state.sub_progress.get(id).copied().unwrap_or_default();
                    RunningProject {
                        detail: format!("{id} [{sub_curr}/{sub_total}] {elapsed:.1}s"),
                        id: id.clone(),
                        elapsed_secs: elapsed,
                        sub_curr,
                        sub_total,
                    }
                })
                .collect();

            TaskStatus {
                name: self.name.clone(),
                is_running,
                should_stop,
                run_state: state.run_state,
                message: state.message.clone(),
                curr: state.curr,
                total: state.total,
                started_at: state.started_at,
                finished_at: state.finished_at,
                running,
                success_count: state.succeeded.len(),
                failed_count: state.failed.len(),
                complete_count: state.completed.len(),
                recent_success: recent(&state.succeeded),
                recent_failed: recent(&state.failed),
                custom: state.custom.clone(),
            }
        })
    }
}

fn recent(ids: &[ProjectId]) -> Vec<ProjectId> {
    ids.iter().rev().take(RECENT_LIMIT).cloned().collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct RunningProject {
    pub id: ProjectId,
    pub elapsed_secs: f64,
    pub sub_curr: usize,
    pub sub_total: usize,
    /// `{id} [{sub_curr}/{sub_total}] {elapsed}s`
    pub detail: String,
}

/// Point in time view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub is_running: bool,
    pub should_stop: bool,
    pub run_state: RunState,
    pub message: String,
    pub curr: usize,
    pub total: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub running: Vec<RunningProject>,
    pub success_count: usize,
    pub failed_count: usize,
    pub complete_count: usize,
    /// Newest first
    pub recent_success: Vec<ProjectId>,
    /// Newest first
    pub recent_failed: Vec<ProjectId>,
    pub custom: Map<String, Value>,
}
