//! Drives a stage over many projects with bounded concurrency.
use std::future::Future;

use archscout_core::progress::TaskContext;
use archscout_core::{ProjectId, StageOutcome};
use futures_util::StreamExt as _;
use serde::Serialize;
use tracing::Instrument as _;

/// Per-bucket counts of a finished batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub success: usize,
    pub failure: usize,
    pub complete: usize,
    /// Projects never scheduled because the run was cancelled
    pub not_started: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: StageOutcome) {
        match outcome {
            StageOutcome::Success => self.success += 1,
            StageOutcome::Failure => self.failure += 1,
            StageOutcome::Complete => self.complete += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.success + self.failure + self.complete
    }
}

/// Runs `unit` once per project, at most `concurrency` at a time.
///
/// Every unit runs in its own tokio task so a panic only fails that project. Once the
/// context is cancelled no new project is scheduled; units already in flight finish.
/// Progress and final buckets are reported to `ctx` as units complete, in completion order.
pub async fn for_each_project<F, Fut>(
    ctx: &TaskContext,
    ids: Vec<ProjectId>,
    concurrency: usize,
    unit: F,
) -> RunSummary
where
    F: Fn(ProjectId) -> Fut,
    Fut: Future<Output = StageOutcome> + Send + 'static,
{
    let total = ids.len();
    ctx.set_total(total);
    ctx.set_curr(0);

    let cancelled = ctx.cancellation_token().clone().cancelled_owned();
    let results = futures_util::stream::iter(ids)
        .take_until(cancelled)
        .map(|id| {
            ctx.report_project_start(&id);
            let span = tracing::trace_span!("project", project_id = %id);
            let handle = tokio::spawn(unit(id.clone()).instrument(span.or_current()));
            async move { (id, handle.await) }
        })
        .buffer_unordered(concurrency.max(1));
    let mut results = std::pin::pin!(results);

    let mut summary = RunSummary::default();
    while let Some((id, result)) = results.next().await {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(project_id = %id, error = %error, "Worker panicked");
                StageOutcome::Failure
            }
        };
        ctx.report_project_outcome(&id, outcome);
        ctx.advance(1);
        summary.record(outcome);
    }

    summary.not_started = total - summary.processed();
    if summary.not_started > 0 {
        tracing::warn!(not_started = summary.not_started, "Stopped before all projects were scheduled");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ids(n: u64) -> Vec<ProjectId> {
        (0..n).map(ProjectId::from).collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_reports_every_outcome() {
        let ctx = TaskContext::new("test-run");

        let summary = for_each_project(&ctx, ids(6), 4, |id| async move {
            match id.as_str().parse::<u64>().unwrap() % 3 {
                0 => StageOutcome::Success,
                1 => StageOutcome::Failure,
                _ => StageOutcome::Complete,
            }
        })
        .await;

        assert_eq!(summary.success, 2);
        assert_eq!(summary.failure, 2);
        assert_eq!(summary.complete, 2);
        let status = ctx.status();
        assert_eq!(status.curr, 6);
        assert_eq!(status.total, 6);
        assert!(status.running.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_panics_fail_only_their_project() {
        let ctx = TaskContext::new("test-run");

        let summary = for_each_project(&ctx, ids(3), 2, |id| async move {
            assert!(id.as_str() != "1", "bad record");
            StageOutcome::Success
        })
        .await;

        assert_eq!(summary.success, 2);
        assert_eq!(summary.failure, 1);
        assert_eq!(ctx.failed_projects(), vec![ProjectId::from("1")]);
    }

    #[test_log::test(tokio::test)]
    async fn test_respects_concurrency_limit() {
        let ctx = TaskContext::new("test-run");
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for_each_project(&ctx, ids(20), 3, |_| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                StageOutcome::Success
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test_log::test(tokio::test)]
    async fn test_stops_scheduling_after_cancel() {
        let ctx = TaskContext::new("test-run");
        let started = Arc::new(AtomicUsize::new(0));
        let token = ctx.cancellation_token().clone();

        let summary = for_each_project(&ctx, ids(50), 1, |_| {
            let started = Arc::clone(&started);
            let token = token.clone();
            async move {
                if started.fetch_add(1, Ordering::SeqCst) == 2 {
                    token.cancel();
                }
                StageOutcome::Success
            }
        })
        .await;

        assert!(summary.processed() < 50);
        assert_eq!(summary.processed() + summary.not_started, 50);
    }
}
