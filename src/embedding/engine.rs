//! Batched embedding of file records with dimension checks.
//!
//! [`EmbeddingEngine`] wraps an [`EmbeddingProvider`] with the invariants
//! the index relies on: every vector has the configured dimensionality,
//! responses are matched to inputs by position, and a batch either fills
//! every missing vector or fails as a whole.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{PrepError, PrepResult};
use crate::models::FileRecord;
use crate::tokens::count_embedding_tokens;

#[derive(Clone)]
pub struct EmbeddingEngine {
    provider: Arc<dyn EmbeddingProvider>,
    dims: usize,
    batch_size: usize,
    max_batch_tokens: usize,
}

impl EmbeddingEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_batch_tokens: config.max_batch_tokens.max(1),
        }
    }

    /// Configured output dimensionality.
    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed a single text, typically a task description.
    pub async fn embed(&self, text: &str) -> PrepResult<Vec<f32>> {
        let vector = self
            .provider
            .embed_one(text)
            .await
            .map_err(PrepError::Embedding)?;
        self.check_dims(&vector)?;
        Ok(vector)
    }

    /// Fill the embedding of every record that lacks one.
    ///
    /// Records that already carry a vector pass through untouched. Returns
    /// the records in input order and the number of records embedded. On
    /// error no record is modified.
    pub async fn embed_missing(
        &self,
        mut files: Vec<FileRecord>,
    ) -> PrepResult<(Vec<FileRecord>, usize)> {
        let pending: Vec<usize> = files
            .iter()
            .enumerate()
            .filter_map(|(i, f)| if f.is_embedded() { None } else { Some(i) })
            .collect();

        if pending.is_empty() {
            debug!("embed_missing: nothing to embed");
            return Ok((files, 0));
        }

        let inputs: Vec<(usize, String)> = pending
            .iter()
            .map(|&i| (i, files[i].embedding_input()))
            .collect();
        let batches = self.plan_batches(&inputs);
        info!(
            "Embedding {} files in {} request(s) with {}",
            inputs.len(),
            batches.len(),
            self.provider.model_name()
        );

        let mut vectors: Vec<(usize, Vec<f32>)> = Vec::with_capacity(inputs.len());
        for batch in batches {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let result = self
                .provider
                .embed_batch(&texts)
                .await
                .map_err(PrepError::Embedding)?;

            if result.len() < texts.len() {
                return Err(PrepError::ShortEmbeddingResponse {
                    got: result.len(),
                    want: texts.len(),
                });
            }

            for ((index, _), vector) in batch.iter().zip(result) {
                self.check_dims(&vector)?;
                vectors.push((*index, vector));
            }
        }

        let embedded = vectors.len();
        for (index, vector) in vectors {
            files[index].embedding = vector;
        }

        Ok((files, embedded))
    }

    /// Split inputs into provider requests. A new request starts only when
    /// the current one would exceed the input count or token limit.
    fn plan_batches<'a>(&self, inputs: &'a [(usize, String)]) -> Vec<&'a [(usize, String)]> {
        let mut batches = Vec::new();
        let mut start = 0;
        let mut tokens = 0;

        for (pos, (_, text)) in inputs.iter().enumerate() {
            let t = count_embedding_tokens(text);
            let count = pos - start;
            if count > 0 && (count == self.batch_size || tokens + t > self.max_batch_tokens) {
                batches.push(&inputs[start..pos]);
                start = pos;
                tokens = 0;
            }
            tokens += t;
        }
        if start < inputs.len() {
            batches.push(&inputs[start..]);
        }
        batches
    }

    fn check_dims(&self, vector: &[f32]) -> PrepResult<()> {
        if vector.len() != self.dims {
            return Err(PrepError::DimensionMismatch {
                got: vector.len(),
                want: self.dims,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BranchKey;
    use crate::tokens::count_tokens;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns `[len(text), 1.0, ...]` vectors and records each batch size.
    struct RecordingProvider {
        dims: usize,
        batches: Mutex<Vec<usize>>,
        short_by: usize,
    }

    impl RecordingProvider {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                batches: Mutex::new(Vec::new()),
                short_by: 0,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            let n = texts.len().saturating_sub(self.short_by);
            Ok(texts
                .iter()
                .take(n)
                .map(|t| {
                    let mut v = vec![1.0; self.dims];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }
    }

    fn config(dims: usize, batch_size: usize, max_batch_tokens: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            dims,
            batch_size,
            max_batch_tokens,
            ..EmbeddingConfig::default()
        }
    }

    fn record(path: &str, content: &str) -> FileRecord {
        let branch = BranchKey::new("o", "r", "main");
        FileRecord::new(&branch, path, content.to_string(), count_tokens(content), "sha")
    }

    #[tokio::test]
    async fn test_embeds_only_missing_in_one_call() {
        let provider = Arc::new(RecordingProvider::new(3));
        let engine = EmbeddingEngine::new(provider.clone(), &config(3, 100, 8_000));

        let mut done = record("a.rs", "fn a() {}");
        done.embedding = vec![9.0, 9.0, 9.0];
        let files = vec![done, record("b.rs", "fn b() {}"), record("c.rs", "fn c() {}")];

        let (files, embedded) = engine.embed_missing(files).await.unwrap();
        assert_eq!(embedded, 2);
        assert_eq!(*provider.batches.lock().unwrap(), vec![2]);
        assert_eq!(files[0].embedding, vec![9.0, 9.0, 9.0]);
        // correlated by position: "b.rs\nfn b() {}" is 14 bytes
        assert_eq!(files[1].embedding[0], 14.0);
        assert!(files.iter().all(|f| f.embedding.len() == 3));
    }

    #[tokio::test]
    async fn test_nothing_missing_makes_no_call() {
        let provider = Arc::new(RecordingProvider::new(2));
        let engine = EmbeddingEngine::new(provider.clone(), &config(2, 100, 8_000));
        let mut f = record("a.rs", "x");
        f.embedding = vec![0.1, 0.2];

        let (_, embedded) = engine.embed_missing(vec![f]).await.unwrap();
        assert_eq!(embedded, 0);
        assert!(provider.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_splits_on_batch_size_and_tokens() {
        let provider = Arc::new(RecordingProvider::new(2));
        let engine = EmbeddingEngine::new(provider.clone(), &config(2, 2, 8_000));
        let files = (0..5).map(|i| record(&format!("f{}.rs", i), "x")).collect();
        engine.embed_missing(files).await.unwrap();
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 2, 1]);

        let provider = Arc::new(RecordingProvider::new(2));
        // each input is the path plus 30 " word" tokens; 75 fits two
        let engine = EmbeddingEngine::new(provider.clone(), &config(2, 100, 75));
        let body = " word".repeat(30);
        let files = (0..3).map(|i| record(&format!("f{}.rs", i), &body)).collect();
        engine.embed_missing(files).await.unwrap();
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_fatal() {
        let provider = Arc::new(RecordingProvider::new(4));
        let engine = EmbeddingEngine::new(provider, &config(3, 100, 8_000));
        let err = engine
            .embed_missing(vec![record("a.rs", "x")])
            .await
            .unwrap_err();
        assert!(matches!(err, PrepError::DimensionMismatch { got: 4, want: 3 }));

        assert!(matches!(
            engine.embed("task").await,
            Err(PrepError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_short_response_is_fatal() {
        let mut provider = RecordingProvider::new(2);
        provider.short_by = 1;
        let engine = EmbeddingEngine::new(Arc::new(provider), &config(2, 100, 8_000));
        let files = vec![record("a.rs", "x"), record("b.rs", "y")];
        let err = engine.embed_missing(files).await.unwrap_err();
        assert!(matches!(
            err,
            PrepError::ShortEmbeddingResponse { got: 1, want: 2 }
        ));
    }
}
