//! Text-to-speech via ElevenLabs.
//!
//! Only the HTTP layer and the `speak` CLI command use this; chat turns
//! never synthesize audio. Text is cleaned with [`clean_text_for_speech`]
//! first so code, links, and markup are not read aloud.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::info;

use penelope_core::error::ServiceCause;

use super::{api_key, check_status, http_client, transport_cause, SpeechSynth};
use crate::config::SpeechConfig;

const API_KEY_VAR: &str = "ELEVENLABS_API_KEY";
const TRUNCATION_NOTICE: &str =
    "... The rest of the message has been truncated for speech synthesis.";

pub struct ElevenLabsSpeech {
    client: reqwest::Client,
    base_url: String,
    voice_id: String,
    model_id: String,
    max_chars: usize,
    timeout: Duration,
}

impl ElevenLabsSpeech {
    pub fn new(config: &SpeechConfig, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            max_chars: config.max_chars,
            timeout,
        })
    }
}

static CODE_BLOCK: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```").ok());
static INLINE_CODE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"`([^`]+)`").ok());
static URL: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"https?://\S+").ok());
static SYMBOLS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"[^\w\s.,;:!?'"\-()]"#).ok());
static SPACES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\s+").ok());

fn replace_all(re: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match re.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Strip markup that reads badly aloud and cap the length at `max_chars`
/// characters (plus a short notice when cut).
pub fn clean_text_for_speech(text: &str, max_chars: usize) -> String {
    let text = replace_all(&CODE_BLOCK, text, " code block omitted for speech ");
    let text = replace_all(&INLINE_CODE, &text, "$1");
    let text = replace_all(&URL, &text, " URL omitted for speech ");
    let text = replace_all(&SYMBOLS, &text, " ");
    let text = replace_all(&SPACES, &text, " ");
    let text = text.trim();

    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}{}", cut, TRUNCATION_NOTICE)
    } else {
        text.to_string()
    }
}

#[async_trait]
impl SpeechSynth for ElevenLabsSpeech {
    async fn speak(&self, text: &str) -> Result<Vec<u8>, ServiceCause> {
        let key = api_key(API_KEY_VAR)?;
        let cleaned = clean_text_for_speech(text, self.max_chars);
        info!(chars = cleaned.len(), voice = %self.voice_id, "synthesizing speech");

        let resp = self
            .client
            .post(format!(
                "{}/v1/text-to-speech/{}",
                self.base_url, self.voice_id
            ))
            .header("xi-api-key", key)
            .header("Accept", "audio/mpeg")
            .json(&json!({ "text": cleaned, "model_id": self.model_id }))
            .send()
            .await
            .map_err(|e| transport_cause(e, self.timeout))?;

        let bytes = check_status(resp)?
            .bytes()
            .await
            .map_err(|e| transport_cause(e, self.timeout))?;
        if bytes.is_empty() {
            return Err(ServiceCause::Malformed("empty audio body".to_string()));
        }
        Ok(bytes.to_vec())
    }
}
