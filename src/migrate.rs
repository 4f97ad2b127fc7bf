use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema if it does not exist. Safe to run on every start.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per file per branch; embedding is little-endian f32, NULL until embedded
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_records (
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            reference TEXT NOT NULL,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            embedding BLOB,
            commit_hash TEXT NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (owner, repo, reference, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS branch_commits (
            owner TEXT NOT NULL,
            repo TEXT NOT NULL,
            branch TEXT NOT NULL,
            commit_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (owner, repo, branch)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
