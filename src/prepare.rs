//! The single entry point: "given a task request, return the file set to
//! hand to the model".
//!
//! ```text
//! TaskRequest ─▶ validate (model, task) ─▶ IncrementalIndexer ─▶ RelevanceSelector
//!                                                                  │
//!                                                    fit_to_budget ◀┘ ─▶ PreparedContext
//! ```
//!
//! Validation runs before any source or store call, so a request naming
//! an unknown model fails without touching the network.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::catalog::ModelCatalog;
use crate::config::Config;
use crate::embedding::{EmbeddingEngine, EmbeddingProvider};
use crate::error::{PrepError, PrepResult};
use crate::indexer::{IncrementalIndexer, IndexStatus};
use crate::models::{FileRecord, PrepareOptions, TaskRequest};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::select::RelevanceSelector;
use crate::source::SourceGateway;
use crate::store::FileStore;
use crate::tokens::{estimate_cost, CallCost};

/// Files selected for a task, in prompt order.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedContext {
    pub task_id: String,
    pub model: String,
    pub files: Vec<FileRecord>,
    /// Base prompt tokens plus the tokens of every selected file.
    pub total_tokens: usize,
    /// Head SHA the files were read at.
    pub commit_hash: String,
    pub index_status: IndexStatus,
    /// Upper bound: `total_tokens` in plus the model's full output allowance.
    pub estimated_cost: CallCost,
}

pub struct CodebasePreparer {
    indexer: IncrementalIndexer,
    selector: RelevanceSelector,
    catalog: ModelCatalog,
}

impl CodebasePreparer {
    pub fn new(
        indexer: IncrementalIndexer,
        selector: RelevanceSelector,
        catalog: ModelCatalog,
    ) -> Self {
        Self {
            indexer,
            selector,
            catalog,
        }
    }

    /// Wire the pipeline from its three gateways and the configuration.
    pub fn from_config(
        config: &Config,
        source: Arc<dyn SourceGateway>,
        store: Arc<dyn FileStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let engine = EmbeddingEngine::new(provider, &config.embedding);
        let indexer = IncrementalIndexer::new(source, store, engine.clone(), config.indexer.clone())?;
        let selector = RelevanceSelector::new(engine, config.retrieval.dynamic_threshold);
        let catalog = ModelCatalog::with_overrides(&config.models);
        Ok(Self::new(indexer, selector, catalog))
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn indexer(&self) -> &IncrementalIndexer {
        &self.indexer
    }

    /// Index the request's branch if needed, rank its files, and pack them
    /// under the model's input ceiling.
    ///
    /// Two calls with no repository change return the same files; the
    /// second is served from the store without reading the repository.
    pub async fn prepare(
        &self,
        request: &TaskRequest,
        progress: &dyn ProgressSink,
    ) -> PrepResult<PreparedContext> {
        let model = self.catalog.resolve(&request.model)?.clone();
        validate_request(request)?;

        let branch = request.branch_key();
        let options = request.options;
        let outcome = self
            .indexer
            .ensure_indexed(&branch, options.force_full_sync, &request.task_id, progress)
            .await?;

        progress.emit(
            &request.task_id,
            ProgressEvent::Ranking {
                files: outcome.files.len(),
            },
        );
        let fit = self
            .selector
            .select(
                outcome.files,
                &request.task,
                request.base_prompt(),
                &model,
                options.maximize_token_usage,
            )
            .await?;

        if fit.is_degraded() {
            info!(
                "Base prompt for task {} leaves no room under {} tokens",
                request.task_id, model.max_input_tokens
            );
        }
        progress.emit(
            &request.task_id,
            ProgressEvent::Selected {
                files: fit.selected.len(),
                total_tokens: fit.total_tokens,
            },
        );
        info!(
            "Prepared task {} for {}: {} files, {} tokens",
            request.task_id,
            model.model,
            fit.selected.len(),
            fit.total_tokens
        );

        Ok(PreparedContext {
            task_id: request.task_id.clone(),
            model: model.model.clone(),
            estimated_cost: estimate_cost(&model, fit.total_tokens, model.max_output_tokens),
            files: fit.selected,
            total_tokens: fit.total_tokens,
            commit_hash: outcome.commit_hash,
            index_status: outcome.status,
        })
    }
}

fn validate_request(request: &TaskRequest) -> PrepResult<()> {
    for (field, value) in [
        ("owner", &request.owner),
        ("repo", &request.repo),
        ("branch", &request.branch),
    ] {
        if value.trim().is_empty() {
            return Err(PrepError::InvalidRequest(format!("{} must not be empty", field)));
        }
    }
    if !request.options.maximize_token_usage && request.task.trim().is_empty() {
        return Err(PrepError::InvalidRequest(
            "task description is empty; set maximizeTokenUsage or describe the task".to_string(),
        ));
    }
    Ok(())
}

/// Parse an untyped options bag, rejecting unrecognized keys.
pub fn parse_options(value: serde_json::Value) -> PrepResult<PrepareOptions> {
    if value.is_null() {
        return Ok(PrepareOptions::default());
    }
    serde_json::from_value(value).map_err(|e| PrepError::InvalidRequest(format!("options: {}", e)))
}

/// Render files as `File: {path}` blocks for prompt composition.
pub fn format_files(files: &[FileRecord]) -> String {
    files
        .iter()
        .map(|f| format!("File: {}\n{}", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BranchKey;

    #[test]
    fn test_format_files() {
        let branch = BranchKey::new("o", "r", "main");
        let files = vec![
            FileRecord::new(&branch, "a.rs", "fn a() {}".into(), 3, "sha"),
            FileRecord::new(&branch, "src/b.rs", "fn b() {}".into(), 3, "sha"),
        ];
        assert_eq!(
            format_files(&files),
            "File: a.rs\nfn a() {}\n\nFile: src/b.rs\nfn b() {}"
        );
        assert_eq!(format_files(&[]), "");
    }

    #[test]
    fn test_parse_options() {
        let opts = parse_options(serde_json::json!({"maximizeTokenUsage": true})).unwrap();
        assert!(opts.maximize_token_usage);
        assert_eq!(
            parse_options(serde_json::Value::Null).unwrap(),
            PrepareOptions::default()
        );
        assert!(matches!(
            parse_options(serde_json::json!({"fullSync": true})),
            Err(PrepError::InvalidRequest(_))
        ));
    }
}
