//! # Code Sage
//!
//! Index GitHub repositories with language-model summaries and answer
//! questions about them with retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │   Walker    │──▶│ Summarize → Embed →  │──▶│  SQLite  │
//! │ GitHub API  │   │ atomic row + vector  │   │ + vectors│
//! └─────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                   │
//!                    ┌──────────────────────────────┤
//!                    ▼                              ▼
//!             ┌──────────────┐               ┌────────────┐
//!             │  Retriever   │──matches────▶ │  Answer    │──▶ SSE / stdout
//!             │ cosine top-K │               │  Streamer  │
//!             └──────────────┘               └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sage init
//! sage project add my-app https://github.com/acme/my-app
//! sage index <project-id>
//! sage ask <project-id> "Where is authentication handled?"
//! sage serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Component wiring shared by the CLI and server |
//! | [`config`] | TOML configuration parsing |
//! | [`credentials`] | API key rotation |
//! | [`error`] | Error taxonomy |
//! | [`github`] | GitHub REST client |
//! | [`ignore`] | Name-based ignore rules |
//! | [`limiter`] | Bounded request concurrency |
//! | [`walker`] | Repository walker |
//! | [`llm`] | Generative model clients |
//! | [`embedding`] | Embedding providers |
//! | [`summarize`] | File and commit summaries |
//! | [`indexer`] | Indexing pipeline |
//! | [`progress`] | CLI progress reporting |
//! | [`retrieve`] | Query embedding and ranking |
//! | [`answer`] | Streamed grounded answers |
//! | [`commits`] | Commit polling |
//! | [`sqlite_store`] | SQLite `Store` backend |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Table creation |

pub mod answer;
pub mod app;
pub mod commits;
pub mod config;
pub mod credentials;
pub mod db;
pub mod embedding;
pub mod error;
pub mod github;
mod http;
pub mod ignore;
pub mod indexer;
pub mod limiter;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod retrieve;
pub mod server;
pub mod sqlite_store;
pub mod summarize;
pub mod walker;

pub use code_sage_core as core;
