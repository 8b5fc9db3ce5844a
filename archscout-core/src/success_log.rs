use std::sync::Mutex;

use crate::ProjectId;

const DEFAULT_FLUSH_THRESHOLD: usize = 64;

/// Collects ids of recently succeeded projects and logs them in batches instead of one
/// line per project.
#[derive(Debug)]
pub struct SuccessLog {
    name: &'static str,
    threshold: usize,
    pending: Mutex<Vec<ProjectId>>,
}

impl SuccessLog {
    pub fn new(name: &'static str) -> Self {
        Self::with_threshold(name, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(name: &'static str, threshold: usize) -> Self {
        Self {
            name,
            threshold: threshold.max(1),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queues an id, flushing when the batch is full. Returns the flushed batch, if any.
    pub fn record(&self, id: &ProjectId) -> Option<Vec<ProjectId>> {
        let batch = {
            let Ok(mut pending) = self.pending.lock() else {
                return None;
            };
            pending.push(id.clone());
            if pending.len() < self.threshold {
                return None;
            }
            std::mem::take(&mut *pending)
        };

        self.emit(&batch);
        Some(batch)
    }

    /// Logs whatever is pending
    pub fn flush(&self) -> Vec<ProjectId> {
        let batch = self
            .pending
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default();

        if !batch.is_empty() {
            self.emit(&batch);
        }
        batch
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().map_or(0, |pending| pending.len())
    }

    fn emit(&self, batch: &[ProjectId]) {
        let ids = batch
            .iter()
            .map(ProjectId::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(log = self.name, count = batch.len(), "Succeeded: {ids}");
    }
}
