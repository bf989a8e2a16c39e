//! # Penelope Core
//!
//! Runtime-agnostic logic for the Penelope assistant: data models, the
//! intent router, the knowledge-store trait with an in-memory backend,
//! document ranking, and the per-turn error taxonomy.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Everything
//! that talks to the outside world lives in the `penelope` crate.

pub mod command;
pub mod error;
pub mod models;
pub mod rank;
pub mod store;
