//! External collaborators: the services Penelope talks to but does not own.
//!
//! Each collaborator is a trait so the pipeline and orchestrator can be
//! driven by hand-written fakes in tests. One adapter per trait absorbs
//! the remote response shape and reports failures as [`ServiceCause`];
//! the retrieval pipeline adds the collaborator name and the timeout.
//!
//! | Trait | Adapter | Service |
//! |-------|---------|---------|
//! | [`PaperSearch`] | [`arxiv::ArxivClient`] | arXiv Atom API |
//! | [`ChatModel`] | [`anthropic::AnthropicChat`] | Anthropic Messages API |
//! | [`AnswerEngine`] | [`perplexity::PerplexityClient`] | Perplexity chat completions |
//! | [`SpeechSynth`] | [`speech::ElevenLabsSpeech`] | ElevenLabs text-to-speech |

pub mod anthropic;
pub mod arxiv;
pub mod perplexity;
pub mod speech;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use penelope_core::error::ServiceCause;
use penelope_core::models::{Answer, Paper};

use crate::config::Config;

#[async_trait]
pub trait PaperSearch: Send + Sync {
    /// Up to `max_results` papers, best match first.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, ServiceCause>;

    /// Look up a single paper by id. `Ok(None)` if the service has no such paper.
    async fn fetch(&self, id: &str) -> Result<Option<Paper>, ServiceCause>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceCause>;
}

#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn ask(&self, query: &str) -> Result<Answer, ServiceCause>;
}

#[async_trait]
pub trait SpeechSynth: Send + Sync {
    /// Encoded audio (MP3) for `text`.
    async fn speak(&self, text: &str) -> Result<Vec<u8>, ServiceCause>;
}

/// The full set of collaborators an assistant is wired with.
#[derive(Clone)]
pub struct Collaborators {
    pub papers: Arc<dyn PaperSearch>,
    pub chat: Arc<dyn ChatModel>,
    pub answers: Arc<dyn AnswerEngine>,
    pub speech: Arc<dyn SpeechSynth>,
}

impl Collaborators {
    /// Real network adapters built from configuration and environment.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let timeout = config.assistant.timeout();
        Ok(Self {
            papers: Arc::new(arxiv::ArxivClient::new(&config.arxiv, timeout)?),
            chat: Arc::new(anthropic::AnthropicChat::new(&config.models, timeout)?),
            answers: Arc::new(perplexity::PerplexityClient::new(&config.perplexity, timeout)?),
            speech: Arc::new(speech::ElevenLabsSpeech::new(&config.speech, timeout)?),
        })
    }
}

pub(crate) fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("penelope/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Map a reqwest failure onto the collaborator taxonomy.
pub(crate) fn transport_cause(err: reqwest::Error, timeout: Duration) -> ServiceCause {
    if err.is_timeout() {
        ServiceCause::Timeout(timeout.as_secs())
    } else if err.is_decode() {
        ServiceCause::Malformed(err.to_string())
    } else {
        ServiceCause::Transport(err.to_string())
    }
}

/// Pass 2xx responses through; anything else becomes [`ServiceCause::Http`].
pub(crate) fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ServiceCause> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ServiceCause::Http(status.as_u16()))
    }
}

/// Read an API key from the environment at call time, so a key exported
/// after startup is picked up and a missing one only fails that call.
pub(crate) fn api_key(var: &str) -> Result<String, ServiceCause> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ServiceCause::Unconfigured(format!("{} not set", var))),
    }
}
