//! # Codebase Prep CLI (`codeprep`)
//!
//! Operator interface to the preparation pipeline.
//!
//! ## Usage
//!
//! ```bash
//! codeprep --config ./config/codeprep.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codeprep init` | Create the SQLite database and run schema migrations |
//! | `codeprep index <owner> <repo> <branch>` | Bring the stored index up to the branch head |
//! | `codeprep prepare <owner> <repo> <branch>` | Select files for a task under a model's budget |
//! | `codeprep search <owner> <repo> <branch> "<query>"` | Similarity search over stored files |
//! | `codeprep show <owner> <repo> <branch> <path>` | Print one stored file record |
//! | `codeprep branches <owner> <repo>` | List branches on the source host |
//! | `codeprep repos` | List repositories visible to the source |
//! | `codeprep models` | List the model catalog |
//! | `codeprep check-path <path>...` | Test paths against the exclusion filter |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use codebase_prep::catalog::ModelCatalog;
use codebase_prep::config::{self, Config};
use codebase_prep::embedding::{create_provider, EmbeddingEngine};
use codebase_prep::filter::ExclusionFilter;
use codebase_prep::models::{BranchKey, PrepareOptions, TaskRequest};
use codebase_prep::prepare::{format_files, parse_options, CodebasePreparer};
use codebase_prep::progress::{ProgressMode, ProgressSink};
use codebase_prep::source::{create_source, SourceGateway};
use codebase_prep::store::{FileStore, SqliteStore};

/// Codebase Prep: pick and pack repository files for LLM tasks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `OPENAI_API_KEY` and `GITHUB_TOKEN` are read from the environment.
#[derive(Parser)]
#[command(name = "codeprep", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/codeprep.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Progress output on stderr: `off`, `human`, or `json`.
    /// Defaults to `human` when stderr is a terminal.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Index a branch if its head moved since the last pass.
    Index {
        owner: String,
        repo: String,
        branch: String,

        /// Reindex even when the stored commit matches the head.
        #[arg(long)]
        force: bool,
    },

    /// Select files for a task under a model's input ceiling.
    Prepare {
        owner: String,
        repo: String,
        branch: String,

        /// Target model identifier (see `codeprep models`).
        #[arg(long)]
        model: String,

        /// Task description used for relevance ranking.
        #[arg(long, default_value = "")]
        task: String,

        /// Prompt text the files will be appended to. Defaults to the task.
        #[arg(long)]
        base_prompt: Option<String>,

        #[arg(long)]
        task_id: Option<String>,

        /// Include files in path order instead of ranking them.
        #[arg(long)]
        maximize: bool,

        /// Reindex even when the stored commit matches the head.
        #[arg(long)]
        force: bool,

        /// Options bag as JSON, e.g. `{"forceFullSync": true}`. Unknown
        /// keys are rejected. Combined with the flags above.
        #[arg(long)]
        options: Option<String>,

        /// Print the result as JSON instead of `File:` blocks.
        #[arg(long)]
        json: bool,
    },

    /// Similarity search over a branch's stored files.
    Search {
        owner: String,
        repo: String,
        branch: String,
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print one stored file record.
    Show {
        owner: String,
        repo: String,
        branch: String,
        path: String,
    },

    /// List branches of a repository on the source host.
    Branches { owner: String, repo: String },

    /// List repositories visible to the configured source.
    Repos,

    /// List the model catalog (built-ins plus `[[models]]` entries).
    Models,

    /// Report whether each path would be excluded from indexing.
    CheckPath {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn progress_sink(flag: Option<&str>) -> Result<Box<dyn ProgressSink>> {
    let mode = match flag {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("Unknown progress mode '{}'. Use off, human, or json.", other),
    };
    Ok(mode.sink())
}

/// Config for commands that work without a config file.
fn load_or_default(path: &std::path::Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::with_db_path("./data/codeprep.sqlite"))
    }
}

async fn build_preparer(cfg: &Config) -> Result<CodebasePreparer> {
    let store: Arc<dyn FileStore> = Arc::new(SqliteStore::open(cfg).await?);
    let source = create_source(&cfg.source)?;
    let provider = create_provider(&cfg.embedding)?;
    CodebasePreparer::from_config(cfg, source, store, provider)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require a config file
    match &cli.command {
        Commands::Models => {
            let cfg = load_or_default(&cli.config)?;
            let catalog = ModelCatalog::with_overrides(&cfg.models);
            println!(
                "{:<32} {:>10} {:>10} {:>10} {:>10}",
                "MODEL", "MAX_IN", "MAX_OUT", "$IN/M", "$OUT/M"
            );
            for p in catalog.profiles() {
                println!(
                    "{:<32} {:>10} {:>10} {:>10.2} {:>10.2}",
                    p.model, p.max_input_tokens, p.max_output_tokens, p.input_cost, p.output_cost
                );
            }
            return Ok(());
        }
        Commands::CheckPath { paths } => {
            let cfg = load_or_default(&cli.config)?;
            let filter = ExclusionFilter::new(&cfg.indexer.exclude_globs)?;
            for path in paths {
                let verdict = if filter.is_excluded(path) {
                    "excluded"
                } else {
                    "included"
                };
                println!("{}\t{}", verdict, path);
            }
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    let progress = progress_sink(cli.progress.as_deref())?;

    match cli.command {
        Commands::Init => {
            SqliteStore::open(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Index {
            owner,
            repo,
            branch,
            force,
        } => {
            let preparer = build_preparer(&cfg).await?;
            let key = BranchKey::new(owner, repo, branch);
            let outcome = preparer
                .indexer()
                .ensure_indexed(&key, force, "cli-index", progress.as_ref())
                .await?;
            println!(
                "{} {:?} at {}: {} files ({} embedded, {} reused, {} skipped, {} pruned)",
                key,
                outcome.status,
                outcome.commit_hash,
                outcome.files.len(),
                outcome.embedded,
                outcome.reused,
                outcome.skipped,
                outcome.pruned
            );
        }
        Commands::Prepare {
            owner,
            repo,
            branch,
            model,
            task,
            base_prompt,
            task_id,
            maximize,
            force,
            options,
            json,
        } => {
            let mut opts = match options {
                Some(raw) => {
                    let value: serde_json::Value =
                        serde_json::from_str(&raw).context("--options is not valid JSON")?;
                    parse_options(value)?
                }
                None => PrepareOptions::default(),
            };
            opts.force_full_sync |= force;
            opts.maximize_token_usage |= maximize;

            let request = TaskRequest {
                task_id: task_id
                    .unwrap_or_else(|| format!("cli-{}", chrono::Utc::now().timestamp_millis())),
                task,
                model,
                owner,
                repo,
                branch,
                options: opts,
                base_prompt,
            };

            let preparer = build_preparer(&cfg).await?;
            let prepared = preparer.prepare(&request, progress.as_ref()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&prepared)?);
            } else {
                println!("{}", format_files(&prepared.files));
                eprintln!(
                    "{} files, {} tokens, commit {}, est. cost ${:.4}",
                    prepared.files.len(),
                    prepared.total_tokens,
                    prepared.commit_hash,
                    prepared.estimated_cost.total()
                );
            }
        }
        Commands::Search {
            owner,
            repo,
            branch,
            query,
            limit,
        } => {
            let store = SqliteStore::open(&cfg).await?;
            let engine = EmbeddingEngine::new(create_provider(&cfg.embedding)?, &cfg.embedding);
            let key = BranchKey::new(owner, repo, branch);
            let query_vec = engine.embed(&query).await?;
            let hits = store.find_similar(&query_vec, &key, limit).await?;

            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({} tokens)",
                    i + 1,
                    hit.score,
                    hit.record.path,
                    hit.record.token_count
                );
            }
        }
        Commands::Show {
            owner,
            repo,
            branch,
            path,
        } => {
            let store = SqliteStore::open(&cfg).await?;
            let key = BranchKey::new(owner, repo, branch);
            let Some(rec) = store.get_file_record(&key, &path).await? else {
                bail!("no stored record for {} in {}", path, key);
            };
            let indexed_at = chrono::DateTime::from_timestamp(rec.indexed_at, 0)
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                .unwrap_or_else(|| rec.indexed_at.to_string());

            println!("--- File ---");
            println!("path:         {}", rec.path);
            println!("branch:       {}", key);
            println!("commit:       {}", rec.commit_hash);
            println!("tokens:       {}", rec.token_count);
            println!("content_hash: {}", rec.content_hash);
            println!("embedding:    {} dims", rec.embedding.len());
            println!("indexed_at:   {}", indexed_at);
            println!();
            println!("--- Content ---");
            println!("{}", rec.content);
        }
        Commands::Branches { owner, repo } => {
            let source: Arc<dyn SourceGateway> = create_source(&cfg.source)?;
            for name in source.list_branches(&owner, &repo).await? {
                println!("{}", name);
            }
        }
        Commands::Repos => {
            let source = create_source(&cfg.source)?;
            for r in source.list_repositories().await? {
                println!(
                    "{}/{}\t{}",
                    r.owner,
                    r.name,
                    r.default_branch.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Models | Commands::CheckPath { .. } => unreachable!(),
    }

    Ok(())
}
