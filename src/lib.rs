//! # Codebase Prep
//!
//! Prepares repository context for LLM calls: decides which files of a
//! branch to pull, skips work already done for the current commit, ranks
//! files by semantic relevance to a task, and packs them under a model's
//! input token ceiling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌────────────┐
//! │ SourceGateway│──▶│  IncrementalIndexer  │──▶│ FileStore  │
//! │ GitHub / git │   │ filter·diff·embed    │   │ SQLite/mem │
//! └──────────────┘   └──────────┬───────────┘   └────────────┘
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │  RelevanceSelector   │──▶ fit_to_budget ──▶ PreparedContext
//!                    └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! codeprep init
//! codeprep index acme api main
//! codeprep prepare acme api main --model gpt-4o --task "add retry to the uploader"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`filter`] | Path exclusion rules |
//! | [`tokens`] | Token counting, budget packing, cost |
//! | [`catalog`] | Model profiles |
//! | [`embedding`] | Embedding providers and the batching engine |
//! | [`source`] | Source-control host gateways |
//! | [`store`] | File record persistence |
//! | [`indexer`] | Commit-gated incremental indexing |
//! | [`select`] | Relevance ranking |
//! | [`prepare`] | The preparation entry point |
//! | [`progress`] | Progress sinks |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod catalog;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod indexer;
pub mod migrate;
pub mod models;
pub mod prepare;
pub mod progress;
pub mod select;
pub mod source;
pub mod store;
pub mod tokens;

pub use error::{PrepError, PrepResult};
pub use prepare::{CodebasePreparer, PreparedContext};
