use std::sync::Arc;
use std::time::Duration;

use archscout_core::{EmbeddingModel, Embeddings, ModelError};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces consecutive requests to the wrapped model by at least `min_interval`.
///
/// Wrap one model per API key; the rate limit of the remote api is per key.
#[derive(Debug)]
pub struct Throttled {
    inner: Arc<dyn EmbeddingModel>,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Throttled {
    pub fn new(inner: Arc<dyn EmbeddingModel>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_request: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EmbeddingModel for Throttled {
    async fn embed(&self, input: Vec<String>) -> Result<Embeddings, ModelError> {
        {
            let mut last_request = self.last_request.lock().await;
            if let Some(last) = *last_request {
                tokio::time::sleep_until(last + self.min_interval).await;
            }
            *last_request = Some(Instant::now());
        }

        self.inner.embed(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archscout_core::MockEmbeddingModel;

    #[test_log::test(tokio::test)]
    async fn test_spaces_requests() {
        let mut model = MockEmbeddingModel::new();
        model
            .expect_embed()
            .times(3)
            .returning(|input| Ok(input.iter().map(|_| vec![0.0; 4]).collect()));

        let throttled = Throttled::new(Arc::new(model), Duration::from_millis(50));
        let started = Instant::now();
        for _ in 0..3 {
            throttled.embed(vec!["text".into()]).await.unwrap();
        }

        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
