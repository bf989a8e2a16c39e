//! Chat model backed by the Anthropic Messages API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use penelope_core::error::ServiceCause;

use super::{api_key, check_status, http_client, transport_cause, ChatModel};
use crate::config::ModelsConfig;

const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";

/// Persona and tool description sent as the system prompt on every call.
pub const SYSTEM_PROMPT: &str = "You are Penelope, a helpful and knowledgeable assistant \
who is passionate about AI, Bitcoin, cryptocurrency and quantum computing. You explain \
complex concepts in accessible terms, cite sources when answering from papers or the \
knowledge base, and are honest about limitations or uncertainties.

Users can drive your tools directly:
- \"search arxiv: <query>\" searches arXiv for papers
- \"summarize arxiv: <paper id>\" summarizes a paper and stores the summary
- \"add to kb: <paper id>\" stores a paper's abstract in the knowledge base
- \"search kb: <query>\" searches the knowledge base
- \"check kb\" reports knowledge base statistics
- \"perplexity: <question>\" asks a web-connected answer engine";

pub struct AnthropicChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicChat {
    pub fn new(config: &ModelsConfig, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.chat.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Concatenate the text blocks of a Messages API response.
fn extract_text(body: &str) -> Result<String, ServiceCause> {
    let resp: MessagesResponse =
        serde_json::from_str(body).map_err(|e| ServiceCause::Malformed(e.to_string()))?;
    let text: String = resp
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(ServiceCause::Malformed("no text content".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl ChatModel for AnthropicChat {
    async fn complete(&self, prompt: &str) -> Result<String, ServiceCause> {
        let key = api_key(API_KEY_VAR)?;
        info!(model = %self.model, prompt_chars = prompt.len(), "sending prompt to chat model");

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_cause(e, self.timeout))?;

        let text = check_status(resp)?
            .text()
            .await
            .map_err(|e| transport_cause(e, self.timeout))?;
        extract_text(&text)
    }
}
