//! General-Q&A collaborator backed by Perplexity's chat-completions API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use penelope_core::error::ServiceCause;
use penelope_core::models::{Answer, Reference};

use super::{api_key, check_status, http_client, transport_cause, AnswerEngine};
use crate::config::PerplexityConfig;

const API_KEY_VAR: &str = "PERPLEXITY_API_KEY";

pub struct PerplexityClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl PerplexityClient {
    pub fn new(config: &PerplexityConfig, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout,
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    search_results: Vec<SearchResultEntry>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: String,
}

#[derive(Deserialize)]
struct SearchResultEntry {
    #[serde(default)]
    title: Option<String>,
    url: String,
}

/// Normalize a completion into an [`Answer`]. Titled `search_results`
/// win over bare `citations` URLs when both are present.
fn parse_answer(body: &str) -> Result<Answer, ServiceCause> {
    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| ServiceCause::Malformed(e.to_string()))?;
    let text = resp
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ServiceCause::Malformed("no answer in response".to_string()))?;

    let references = if !resp.search_results.is_empty() {
        resp.search_results
            .into_iter()
            .map(|r| Reference {
                title: r.title.unwrap_or_else(|| "Untitled".to_string()),
                url: r.url,
            })
            .collect()
    } else {
        resp.citations
            .into_iter()
            .map(|url| Reference {
                title: "Untitled".to_string(),
                url,
            })
            .collect()
    };

    Ok(Answer { text, references })
}

#[async_trait]
impl AnswerEngine for PerplexityClient {
    async fn ask(&self, query: &str) -> Result<Answer, ServiceCause> {
        let key = api_key(API_KEY_VAR)?;
        info!(query, "querying perplexity");

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": query }],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_cause(e, self.timeout))?;

        let text = check_status(resp)?
            .text()
            .await
            .map_err(|e| transport_cause(e, self.timeout))?;
        parse_answer(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_titled_search_results() {
        let body = r#"{
            "choices":[{"message":{"role":"assistant","content":"About 21 million."}}],
            "citations":["https://a.example"],
            "search_results":[{"title":"Supply","url":"https://b.example"}]
        }"#;
        let answer = parse_answer(body).unwrap();
        assert_eq!(answer.text, "About 21 million.");
        assert_eq!(answer.references.len(), 1);
        assert_eq!(answer.references[0].title, "Supply");
    }

    #[test]
    fn falls_back_to_citations() {
        let body = r#"{"choices":[{"message":{"content":"Yes."}}],"citations":["https://a.example"]}"#;
        let answer = parse_answer(body).unwrap();
        assert_eq!(answer.references[0].url, "https://a.example");
        assert_eq!(answer.references[0].title, "Untitled");
    }

    #[test]
    fn empty_choices_is_malformed() {
        assert!(matches!(
            parse_answer(r#"{"choices":[]}"#),
            Err(ServiceCause::Malformed(_))
        ));
    }
}
