//! arXiv paper search over the public Atom API.
//!
//! `GET {base_url}/api/query?search_query=...&max_results=N` for searches,
//! `?id_list=<id>` for single lookups. The Atom feed is parsed with
//! `quick-xml`; version suffixes are stripped from ids (`2106.12345v2`
//! becomes `2106.12345`) so ids match what users type.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info};

use penelope_core::error::ServiceCause;
use penelope_core::models::Paper;

use super::{check_status, http_client, transport_cause, PaperSearch};
use crate::config::ArxivConfig;

pub struct ArxivClient {
    client: reqwest::Client,
    base_url: String,
    focus_query: Option<String>,
    focus_terms: Vec<String>,
    timeout: Duration,
}

impl ArxivClient {
    pub fn new(config: &ArxivConfig, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            focus_query: config.focus_query.clone(),
            focus_terms: config.focus_terms.iter().map(|t| t.to_lowercase()).collect(),
            timeout,
        })
    }

    /// Narrow a free-text query to the configured focus topic unless it
    /// already mentions one of the focus terms.
    fn effective_query(&self, query: &str) -> String {
        match &self.focus_query {
            Some(focus) => {
                let lower = query.to_lowercase();
                if self.focus_terms.iter().any(|t| lower.contains(t.as_str())) {
                    query.to_string()
                } else {
                    format!("({}) AND ({})", query, focus)
                }
            }
            None => query.to_string(),
        }
    }

    async fn get_feed(&self, params: &[(&str, String)]) -> Result<String, ServiceCause> {
        let url = format!("{}/api/query", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| transport_cause(e, self.timeout))?;
        check_status(resp)?
            .text()
            .await
            .map_err(|e| transport_cause(e, self.timeout))
    }
}

#[async_trait]
impl PaperSearch for ArxivClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>, ServiceCause> {
        let q = self.effective_query(query);
        info!(query = %q, max_results, "searching arXiv");
        let feed = self
            .get_feed(&[
                ("search_query", format!("all:{}", q)),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
                ("sortBy", "relevance".to_string()),
            ])
            .await?;
        let mut papers = parse_feed(&feed)?;
        papers.truncate(max_results);
        debug!(count = papers.len(), "arXiv results");
        Ok(papers)
    }

    async fn fetch(&self, id: &str) -> Result<Option<Paper>, ServiceCause> {
        info!(id, "fetching arXiv paper");
        let feed = self.get_feed(&[("id_list", id.to_string())]).await?;
        Ok(parse_feed(&feed)?.into_iter().next())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    pdf_url: Option<String>,
    abs_url: Option<String>,
    categories: Vec<String>,
}

impl EntryBuilder {
    fn finish(self) -> Option<Paper> {
        // the API reports query errors as a feed entry under /api/errors
        if self.id.is_empty() || self.id.contains("/api/errors") {
            return None;
        }
        Some(Paper {
            id: normalize_id(&self.id),
            title: collapse_whitespace(&self.title),
            abstract_text: collapse_whitespace(&self.summary),
            authors: self.authors,
            url: self.pdf_url.or(self.abs_url),
            categories: self.categories,
            published: self.published.get(..10).map(str::to_string),
        })
    }
}

/// `http://arxiv.org/abs/2106.12345v1` → `2106.12345`.
pub fn normalize_id(entry_id: &str) -> String {
    let last = entry_id
        .trim()
        .trim_end_matches('/')
        .rsplit("/abs/")
        .next()
        .unwrap_or(entry_id)
        .trim();
    match last.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < last.len()
                && last[pos + 1..].chars().all(|c| c.is_ascii_digit()) =>
        {
            last[..pos].to_string()
        }
        _ => last.to_string(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse an arXiv Atom feed into papers, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<Paper>, ServiceCause> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match (name.as_ref(), entry.is_some()) {
                    (b"entry", _) => entry = Some(EntryBuilder::default()),
                    (b"author", true) => in_author = true,
                    (b"id", true) => field = Some(Field::Id),
                    (b"title", true) => field = Some(Field::Title),
                    (b"summary", true) => field = Some(Field::Summary),
                    (b"published", true) => field = Some(Field::Published),
                    (b"name", true) if in_author => field = Some(Field::AuthorName),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(b) = entry.as_mut() {
                    let name = e.local_name();
                    match name.as_ref() {
                        b"link" => {
                            let mut href = None;
                            let mut title = None;
                            let mut rel = None;
                            for attr in e.attributes().flatten() {
                                let value = attr
                                    .unescape_value()
                                    .map_err(|err| ServiceCause::Malformed(err.to_string()))?
                                    .into_owned();
                                match attr.key.local_name().as_ref() {
                                    b"href" => href = Some(value),
                                    b"title" => title = Some(value),
                                    b"rel" => rel = Some(value),
                                    _ => {}
                                }
                            }
                            if title.as_deref() == Some("pdf") {
                                b.pdf_url = href;
                            } else if rel.as_deref() == Some("alternate") {
                                b.abs_url = href;
                            }
                        }
                        b"category" => {
                            for attr in e.attributes().flatten() {
                                if attr.key.local_name().as_ref() == b"term" {
                                    let term = attr
                                        .unescape_value()
                                        .map_err(|err| ServiceCause::Malformed(err.to_string()))?;
                                    b.categories.push(term.into_owned());
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(b), Some(f)) = (entry.as_mut(), field) {
                    let text = t
                        .unescape()
                        .map_err(|err| ServiceCause::Malformed(err.to_string()))?;
                    match f {
                        Field::Id => b.id.push_str(&text),
                        Field::Title => b.title.push_str(&text),
                        Field::Summary => b.summary.push_str(&text),
                        Field::Published => b.published.push_str(&text),
                        Field::AuthorName => b.authors.push(text.trim().to_string()),
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(paper) = entry.take().and_then(EntryBuilder::finish) {
                            papers.push(paper);
                        }
                        field = None;
                    }
                    b"author" => in_author = false,
                    _ => field = None,
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ServiceCause::Malformed(e.to_string())),
            _ => {}
        }
    }

    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: search_query=all:bitcoin</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2106.12345v2</id>
    <published>2021-06-23T17:59:59Z</published>
    <title>Bitcoin Paper:
      Fees &amp; Blocks</title>
    <summary>  We study fees
    in Bitcoin.  </summary>
    <author><name>Alice Nakamoto</name></author>
    <author><name>Bob Finney</name></author>
    <link href="http://arxiv.org/abs/2106.12345v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2106.12345v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.CR" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CR" scheme="http://arxiv.org/schemas/atom"/>
    <category term="q-fin.GN" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v1</id>
    <published>1999-01-01T00:00:00Z</published>
    <title>Old Style</title>
    <summary>Strings.</summary>
    <author><name>Carol</name></author>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_in_order() {
        let papers = parse_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);

        let p = &papers[0];
        assert_eq!(p.id, "2106.12345");
        assert_eq!(p.title, "Bitcoin Paper: Fees & Blocks");
        assert_eq!(p.abstract_text, "We study fees in Bitcoin.");
        assert_eq!(p.authors, vec!["Alice Nakamoto", "Bob Finney"]);
        assert_eq!(p.url.as_deref(), Some("http://arxiv.org/pdf/2106.12345v2"));
        assert_eq!(p.categories, vec!["cs.CR", "q-fin.GN"]);
        assert_eq!(p.published.as_deref(), Some("2021-06-23"));

        assert_eq!(papers[1].id, "hep-th/9901001");
        assert_eq!(papers[1].url, None);
    }

    #[test]
    fn error_entries_are_skipped() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom">
          <entry>
            <id>http://arxiv.org/api/errors#incorrect_id_format_for_xyz</id>
            <title>Error</title>
            <summary>incorrect id format for xyz</summary>
          </entry>
        </feed>"#;
        assert!(parse_feed(feed).unwrap().is_empty());
    }

    #[test]
    fn empty_feed_has_no_papers() {
        let feed = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>x</title></feed>"#;
        assert!(parse_feed(feed).unwrap().is_empty());
    }

    #[test]
    fn broken_xml_is_malformed() {
        let err = parse_feed("<feed><entry><id>x</wrong></feed>").unwrap_err();
        assert!(matches!(err, ServiceCause::Malformed(_)));
    }

    #[test]
    fn normalize_id_strips_version_only() {
        assert_eq!(normalize_id("http://arxiv.org/abs/2106.12345v12"), "2106.12345");
        assert_eq!(normalize_id("http://arxiv.org/abs/2106.12345"), "2106.12345");
        assert_eq!(normalize_id("2106.12345v1"), "2106.12345");
        assert_eq!(normalize_id("http://arxiv.org/abs/solv-int/9901001v1"), "solv-int/9901001");
    }

    #[test]
    fn focus_query_applies_unless_mentioned() {
        let config = ArxivConfig {
            base_url: "http://localhost".to_string(),
            focus_query: Some("bitcoin OR blockchain".to_string()),
            focus_terms: vec!["Bitcoin".to_string(), "blockchain".to_string()],
        };
        let client = ArxivClient::new(&config, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.effective_query("zero knowledge"),
            "(zero knowledge) AND (bitcoin OR blockchain)"
        );
        assert_eq!(client.effective_query("bitcoin fees"), "bitcoin fees");
    }
}
