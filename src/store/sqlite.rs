//! SQLite-backed [`FileStore`] implementation.
//!
//! Tables are created by [`run_migrations`](crate::migrate::run_migrations):
//! `file_records` keyed by `(owner, repo, reference, path)` and
//! `branch_commits` keyed by `(owner, repo, branch)`. Vectors are stored as
//! little-endian `f32` BLOBs; similarity search decodes and scores them in
//! process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{rank_scored, FileStore, ScoredFile};
use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{BranchCommitRecord, BranchKey, FileRecord};
use crate::{db, migrate};

const FILE_COLUMNS: &str = "owner, repo, reference, path, name, content, content_hash, \
                            token_count, embedding, commit_hash, indexed_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `config.db.path` and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_record(row: &SqliteRow) -> FileRecord {
    let blob: Option<Vec<u8>> = row.get("embedding");
    let token_count: i64 = row.get("token_count");
    FileRecord {
        owner: row.get("owner"),
        repo: row.get("repo"),
        reference: row.get("reference"),
        path: row.get("path"),
        name: row.get("name"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        token_count: token_count.max(0) as usize,
        embedding: blob.map(|b| blob_to_vec(&b)).unwrap_or_default(),
        commit_hash: row.get("commit_hash"),
        indexed_at: row.get("indexed_at"),
    }
}

#[async_trait]
impl FileStore for SqliteStore {
    async fn get_file_record(&self, branch: &BranchKey, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM file_records \
             WHERE owner = ? AND repo = ? AND reference = ? AND path = ?",
            FILE_COLUMNS
        ))
        .bind(&branch.owner)
        .bind(&branch.repo)
        .bind(&branch.branch)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn get_all_file_records(&self, branch: &BranchKey) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM file_records \
             WHERE owner = ? AND repo = ? AND reference = ? ORDER BY path",
            FILE_COLUMNS
        ))
        .bind(&branch.owner)
        .bind(&branch.repo)
        .bind(&branch.branch)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn save_file_record(&self, record: &FileRecord) -> Result<()> {
        let blob = if record.is_embedded() {
            Some(vec_to_blob(&record.embedding))
        } else {
            None
        };

        sqlx::query(
            r#"
            INSERT INTO file_records (owner, repo, reference, path, name, content,
                                      content_hash, token_count, embedding,
                                      commit_hash, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner, repo, reference, path) DO UPDATE SET
                name = excluded.name,
                content = excluded.content,
                content_hash = excluded.content_hash,
                token_count = excluded.token_count,
                embedding = excluded.embedding,
                commit_hash = excluded.commit_hash,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&record.owner)
        .bind(&record.repo)
        .bind(&record.reference)
        .bind(&record.path)
        .bind(&record.name)
        .bind(&record.content)
        .bind(&record.content_hash)
        .bind(record.token_count as i64)
        .bind(blob)
        .bind(&record.commit_hash)
        .bind(record.indexed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save {}", record.path))?;

        Ok(())
    }

    async fn delete_file_record(&self, branch: &BranchKey, path: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM file_records WHERE owner = ? AND repo = ? AND reference = ? AND path = ?",
        )
        .bind(&branch.owner)
        .bind(&branch.repo)
        .bind(&branch.branch)
        .bind(path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_branch_commit(&self, branch: &BranchKey) -> Result<Option<BranchCommitRecord>> {
        let row = sqlx::query(
            "SELECT commit_hash, updated_at FROM branch_commits \
             WHERE owner = ? AND repo = ? AND branch = ?",
        )
        .bind(&branch.owner)
        .bind(&branch.repo)
        .bind(&branch.branch)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| BranchCommitRecord {
            branch: branch.clone(),
            commit_hash: row.get("commit_hash"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn save_branch_commit(&self, branch: &BranchKey, commit_hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO branch_commits (owner, repo, branch, commit_hash, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(owner, repo, branch) DO UPDATE SET
                commit_hash = excluded.commit_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&branch.owner)
        .bind(&branch.repo)
        .bind(&branch.branch)
        .bind(commit_hash)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_similar(
        &self,
        query: &[f32],
        branch: &BranchKey,
        limit: usize,
    ) -> Result<Vec<ScoredFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM file_records \
             WHERE owner = ? AND repo = ? AND reference = ? AND embedding IS NOT NULL \
             ORDER BY path",
            FILE_COLUMNS
        ))
        .bind(&branch.owner)
        .bind(&branch.repo)
        .bind(&branch.branch)
        .fetch_all(&self.pool)
        .await?;

        let scored = rows
            .iter()
            .map(|row| {
                let record = row_to_record(row);
                ScoredFile {
                    score: cosine_similarity(query, &record.embedding),
                    record,
                }
            })
            .collect();

        Ok(rank_scored(scored, limit))
    }
}
