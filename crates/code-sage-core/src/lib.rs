//! # Code Sage Core
//!
//! Runtime-agnostic logic for Code Sage: data models, the store
//! abstraction, similarity ranking, prompt templates, and the embedding
//! trait.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The `code-sage`
//! application crate supplies the SQLite store, the network clients, and the
//! async plumbing around these pieces.

pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod tree;

pub use error::DimensionMismatch;
