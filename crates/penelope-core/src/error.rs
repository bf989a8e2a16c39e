//! Per-turn error taxonomy.
//!
//! A [`TurnError`] ends the current turn with a user-visible message and
//! never outlives it. Ambiguous input is not an error at all: the router
//! falls back to chat.

use std::fmt;

use thiserror::Error;

use crate::command::CommandKind;

/// The external service a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    PaperSearch,
    ChatModel,
    AnswerEngine,
    Speech,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collaborator::PaperSearch => "paper search",
            Collaborator::ChatModel => "language model",
            Collaborator::AnswerEngine => "perplexity",
            Collaborator::Speech => "text-to-speech",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a collaborator call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceCause {
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("HTTP {0}")]
    Http(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not configured: {0}")]
    Unconfigured(String),
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("{collaborator} failed: {cause}")]
    ExternalService {
        collaborator: Collaborator,
        cause: ServiceCause,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("knowledge base write failed: {0}")]
    StoreWrite(String),
    #[error("knowledge base read failed: {0}")]
    StoreRead(String),
    #[error("missing argument, usage: {}", .0.usage())]
    MissingArgument(CommandKind),
}

impl TurnError {
    pub fn external(collaborator: Collaborator, cause: ServiceCause) -> Self {
        TurnError::ExternalService {
            collaborator,
            cause,
        }
    }

    /// Short machine-readable code, used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            TurnError::ExternalService {
                cause: ServiceCause::Timeout(_),
                ..
            } => "timeout",
            TurnError::ExternalService { .. } => "external_service",
            TurnError::NotFound(_) => "not_found",
            TurnError::StoreWrite(_) => "store_write",
            TurnError::StoreRead(_) => "store_read",
            TurnError::MissingArgument(_) => "bad_request",
        }
    }

    /// Message shown to the chat user.
    pub fn user_message(&self) -> String {
        match self {
            TurnError::ExternalService {
                collaborator,
                cause,
            } => format!(
                "Sorry, I couldn't reach the {} service ({}). Nothing was changed; please try again.",
                collaborator, cause
            ),
            TurnError::NotFound(id) => format!("I couldn't find anything for '{}'.", id),
            TurnError::StoreWrite(_) => {
                "Sorry, I couldn't save that to the knowledge base. It is unchanged.".to_string()
            }
            TurnError::StoreRead(_) => {
                "Sorry, I couldn't read the knowledge base right now.".to_string()
            }
            TurnError::MissingArgument(kind) => {
                format!("That command needs an argument. Usage: {}", kind.usage())
            }
        }
    }
}
