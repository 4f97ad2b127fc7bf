//! Storage abstraction for indexed files.
//!
//! The [`FileStore`] trait defines every persistence operation the indexer
//! and selector need, enabling pluggable backends:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | the CLI and long-lived services |
//! | [`InMemoryStore`] | tests and one-shot embedding of the library |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::descending_score;
use crate::models::{BranchCommitRecord, BranchKey, FileRecord};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A stored file with its similarity to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredFile {
    pub record: FileRecord,
    pub score: f32,
}

/// Abstract storage backend for file records and branch markers.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_file_record`](FileStore::get_file_record) | Point lookup by `(owner, repo, ref, path)` |
/// | [`get_all_file_records`](FileStore::get_all_file_records) | Every record of a branch, in path order |
/// | [`save_file_record`](FileStore::save_file_record) | Upsert one record |
/// | [`delete_file_record`](FileStore::delete_file_record) | Remove one record |
/// | [`get_branch_commit`](FileStore::get_branch_commit) | Last successfully indexed commit |
/// | [`save_branch_commit`](FileStore::save_branch_commit) | Advance the commit marker |
/// | [`find_similar`](FileStore::find_similar) | Cosine similarity search within a branch |
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get_file_record(&self, branch: &BranchKey, path: &str) -> Result<Option<FileRecord>>;

    /// All records stored under `branch`, sorted by path.
    async fn get_all_file_records(&self, branch: &BranchKey) -> Result<Vec<FileRecord>>;

    /// Insert or replace the record with the same identity.
    async fn save_file_record(&self, record: &FileRecord) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete_file_record(&self, branch: &BranchKey, path: &str) -> Result<bool>;

    async fn get_branch_commit(&self, branch: &BranchKey) -> Result<Option<BranchCommitRecord>>;

    async fn save_branch_commit(&self, branch: &BranchKey, commit_hash: &str) -> Result<()>;

    /// Embedded records of `branch` sorted by descending similarity to
    /// `query`, at most `limit`. Equal scores keep path order.
    async fn find_similar(
        &self,
        query: &[f32],
        branch: &BranchKey,
        limit: usize,
    ) -> Result<Vec<ScoredFile>>;
}

/// Sort by descending score, stable over the incoming order, and truncate.
pub(crate) fn rank_scored(mut scored: Vec<ScoredFile>, limit: usize) -> Vec<ScoredFile> {
    scored.sort_by(|a, b| descending_score(a.score, b.score));
    scored.truncate(limit);
    scored
}
