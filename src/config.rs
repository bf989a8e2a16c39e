//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so the smallest valid file is:
//!
//! ```toml
//! [db]
//! path = "./data/penelope.sqlite"
//! ```
//!
//! API keys are never read from the file. Adapters take them from
//! `ANTHROPIC_API_KEY`, `PERPLEXITY_API_KEY`, and `ELEVENLABS_API_KEY`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub arxiv: ArxivConfig,
    #[serde(default)]
    pub perplexity: PerplexityConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Options the orchestrator and retrieval pipeline act on.
#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    /// Upper bound for every external call.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// How many papers `search arxiv:` asks for.
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    /// How many documents `search kb:` shows.
    #[serde(default = "default_kb_top_n")]
    pub kb_top_n: usize,
    /// Hand matching knowledge-base documents to the model on plain chat.
    #[serde(default = "default_true")]
    pub chat_with_kb_context: bool,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            max_search_results: default_max_search_results(),
            kb_top_n: default_kb_top_n(),
            chat_with_kb_context: true,
        }
    }
}

impl AssistantConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_timeout_seconds() -> u64 {
    30
}
fn default_max_search_results() -> usize {
    10
}
fn default_kb_top_n() -> usize {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7860".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelsConfig {
    #[serde(default = "default_chat_model")]
    pub chat: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_anthropic_url")]
    pub base_url: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            chat: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: default_anthropic_url(),
        }
    }
}

fn default_chat_model() -> String {
    "claude-3-7-sonnet-20250219".to_string()
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_url")]
    pub base_url: String,
    /// Restrict free-text searches to this topic unless the query already
    /// mentions one of `focus_terms`.
    #[serde(default)]
    pub focus_query: Option<String>,
    #[serde(default)]
    pub focus_terms: Vec<String>,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            base_url: default_arxiv_url(),
            focus_query: None,
            focus_terms: Vec::new(),
        }
    }
}

fn default_arxiv_url() -> String {
    "https://export.arxiv.org".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PerplexityConfig {
    #[serde(default = "default_perplexity_url")]
    pub base_url: String,
    #[serde(default = "default_perplexity_model")]
    pub model: String,
}

impl Default for PerplexityConfig {
    fn default() -> Self {
        Self {
            base_url: default_perplexity_url(),
            model: default_perplexity_model(),
        }
    }
}

fn default_perplexity_url() -> String {
    "https://api.perplexity.ai".to_string()
}
fn default_perplexity_model() -> String {
    "sonar".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_speech_url")]
    pub base_url: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_speech_model")]
    pub model_id: String,
    /// Text longer than this is cut before synthesis.
    #[serde(default = "default_speech_max_chars")]
    pub max_chars: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: default_speech_url(),
            voice_id: default_voice_id(),
            model_id: default_speech_model(),
            max_chars: default_speech_max_chars(),
        }
    }
}

fn default_speech_url() -> String {
    "https://api.elevenlabs.io".to_string()
}
fn default_voice_id() -> String {
    "ZF6FPAbjXT4488VcRRnw".to_string()
}
fn default_speech_model() -> String {
    "eleven_turbo_v2_5".to_string()
}
fn default_speech_max_chars() -> usize {
    4000
}

impl Config {
    /// A config with defaults everywhere and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            assistant: AssistantConfig::default(),
            server: ServerConfig::default(),
            models: ModelsConfig::default(),
            arxiv: ArxivConfig::default(),
            perplexity: PerplexityConfig::default(),
            speech: SpeechConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.assistant.timeout_seconds == 0 {
            anyhow::bail!("assistant.timeout_seconds must be > 0");
        }
        if !(1..=100).contains(&self.assistant.max_search_results) {
            anyhow::bail!("assistant.max_search_results must be in [1, 100]");
        }
        if self.assistant.kb_top_n == 0 {
            anyhow::bail!("assistant.kb_top_n must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.models.temperature) {
            anyhow::bail!("models.temperature must be in [0.0, 1.0]");
        }
        if self.speech.max_chars == 0 {
            anyhow::bail!("speech.max_chars must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg: Config = toml::from_str("[db]\npath = \"x.sqlite\"\n").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.assistant.timeout_seconds, 30);
        assert_eq!(cfg.assistant.max_search_results, 10);
        assert!(cfg.assistant.chat_with_kb_context);
        assert_eq!(cfg.server.bind, "127.0.0.1:7860");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg: Config =
            toml::from_str("[db]\npath = \"x\"\n[assistant]\ntimeout_seconds = 0\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn too_many_search_results_is_rejected() {
        let cfg: Config =
            toml::from_str("[db]\npath = \"x\"\n[assistant]\nmax_search_results = 500\n")
                .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_search_results"));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/penelope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
