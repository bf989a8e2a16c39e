//! # Penelope
//!
//! A chat assistant for research on AI, Bitcoin, and quantum computing.
//! Each chat line is routed to a tool (arXiv search and summarization, a
//! local knowledge base, a web-connected answer engine) or to a language
//! model, and papers worth keeping are stored in a SQLite knowledge base.
//!
//! ## Architecture
//!
//! ```text
//!  chat line ──▶ ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//!                │  Router  │──▶│ Orchestrator │──▶│  Retrieval   │──▶ arXiv / Claude /
//!                │ (parse)  │   │ (handle_turn)│   │  Pipeline    │    Perplexity
//!                └──────────┘   └──────┬───────┘   └──────┬───────┘
//!                                      │                  │
//!                                      ▼                  ▼
//!                                ┌─────────────────────────────┐
//!                                │  Knowledge Store (SQLite)   │
//!                                └─────────────────────────────┘
//! ```
//!
//! Routing, models, ranking, and the store trait live in `penelope-core`;
//! this crate adds the network adapters, SQLite persistence, the HTTP
//! server, and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! penelope init
//! penelope ask "search arxiv: lightning network"
//! penelope ask "summarize arxiv: 2106.12345"
//! penelope ask "search kb: lightning"
//! penelope serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`collaborators`] | arXiv, Anthropic, Perplexity, ElevenLabs adapters |
//! | [`pipeline`] | Collaborator calls with timeouts, paper cache |
//! | [`orchestrator`] | One turn: dispatch and response formatting |
//! | [`session`] | Per-session turn ordering |
//! | [`sqlite_store`] | Durable knowledge store |
//! | [`server`] | HTTP API |
//! | [`kb`] | Knowledge-base CLI commands |
//! | [`extract`] | Text extraction for uploaded files |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | `testing` | Offline collaborators for tests (`testing` feature) |

pub mod chat_cmd;
pub mod collaborators;
pub mod config;
pub mod db;
pub mod extract;
pub mod kb;
pub mod migrate;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod sqlite_store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use penelope_core::command::{parse, Command, CommandKind};
pub use penelope_core::error::TurnError;
pub use penelope_core::models::{Document, SearchResult, Source};
pub use penelope_core::store::Store;
