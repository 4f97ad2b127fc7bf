//! Core data models used throughout the preparation pipeline.
//!
//! These types represent the indexed files, branch markers, task requests,
//! and model profiles that flow between the indexer, the selector, and the
//! token accountant.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a branch within a repository: `(owner, repo, branch)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchKey {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl BranchKey {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

impl std::fmt::Display for BranchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

/// Persisted snapshot of one repository file.
///
/// Identity is `(owner, repo, reference, path)`. The `embedding` is either
/// empty or has exactly the configured number of dimensions and was computed
/// from the current `content`; the indexer never pairs a vector with
/// different content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub owner: String,
    pub repo: String,
    /// Branch name the record was captured under.
    pub reference: String,
    pub path: String,
    /// Last path segment.
    pub name: String,
    pub content: String,
    /// SHA-256 hex digest of `content`.
    pub content_hash: String,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Commit SHA of the index pass that last wrote this record.
    pub commit_hash: String,
    pub indexed_at: i64,
}

impl FileRecord {
    /// Build an unembedded record for `path` under `branch`.
    pub fn new(
        branch: &BranchKey,
        path: &str,
        content: String,
        token_count: usize,
        commit_hash: &str,
    ) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            owner: branch.owner.clone(),
            repo: branch.repo.clone(),
            reference: branch.branch.clone(),
            path: path.to_string(),
            name,
            content_hash: content_hash(&content),
            content,
            token_count,
            embedding: Vec::new(),
            commit_hash: commit_hash.to_string(),
            indexed_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_embedded(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// Text sent to the embedding capability for this file.
    pub fn embedding_input(&self) -> String {
        embedding_text(&self.path, &self.content)
    }
}

/// Embedding input for a file at `path`: the path line, then the content.
pub fn embedding_text(path: &str, content: &str) -> String {
    format!("{}\n{}", path, content)
}

/// Hash file content for byte-identity comparison.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Marker of the last commit SHA successfully indexed for a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCommitRecord {
    pub branch: BranchKey,
    pub commit_hash: String,
    pub updated_at: i64,
}

/// Recognized per-request options.
///
/// Deserialization rejects any key not listed here, so an options bag from
/// a transport layer is validated rather than passed through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct PrepareOptions {
    /// Reindex even when the stored commit matches the branch head.
    pub force_full_sync: bool,
    /// Skip similarity ranking and include files in natural order.
    pub maximize_token_usage: bool,
}

/// A request from a task workflow for codebase context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    /// Free-text task description.
    pub task: String,
    /// Target model identifier; must resolve in the model catalog.
    pub model: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub options: PrepareOptions,
    /// Prompt text the selected files will be appended to. Defaults to the
    /// task description when absent.
    #[serde(default)]
    pub base_prompt: Option<String>,
}

impl TaskRequest {
    pub fn branch_key(&self) -> BranchKey {
        BranchKey::new(&self.owner, &self.repo, &self.branch)
    }

    pub fn base_prompt(&self) -> &str {
        self.base_prompt.as_deref().unwrap_or(&self.task)
    }
}

/// Static limits and pricing for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model: String,
    pub max_input_tokens: usize,
    pub max_output_tokens: usize,
    /// Dollars per million input tokens.
    pub input_cost: f64,
    /// Dollars per million output tokens.
    pub output_cost: f64,
}
