//! Recent-search API client.

use crate::SearchProvider;
use async_trait::async_trait;
use diver_core::{Candidate, RunError, RunResult};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Bearer-authenticated client for `GET /2/tweets/search/recent`.
pub struct RecentSearchClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: SecretString,
    max_results: u32,
}

impl RecentSearchClient {
    pub fn new(
        base_url: &str,
        bearer_token: SecretString,
        max_results: u32,
        timeout: Duration,
    ) -> RunResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RunError::transport("client setup", e))?;
        Ok(Self::with_client(client, base_url, bearer_token, max_results))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        bearer_token: SecretString,
        max_results: u32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
            max_results,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        url: String,
        query: &[(&str, String)],
    ) -> RunResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(self.bearer_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(|e| RunError::transport(operation, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RunError::transport(operation, e))?;
        if !status.is_success() {
            return Err(RunError::transport(
                operation,
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }
        serde_json::from_str(&text)
            .map_err(|e| RunError::transport(operation, format!("invalid response body: {}", e)))
    }

    async fn lookup(&self, id: &str) -> RunResult<PostLookup> {
        self.get(
            "post lookup",
            format!("{}/2/tweets/{}", self.base_url, id),
            &[
                ("expansions", "attachments.media_keys".to_string()),
                ("media.fields", "url".to_string()),
            ],
        )
        .await
    }
}

impl std::fmt::Debug for RecentSearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecentSearchClient")
            .field("base_url", &self.base_url)
            .field("max_results", &self.max_results)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SearchProvider for RecentSearchClient {
    async fn search(&self, query: &str) -> RunResult<Vec<Candidate>> {
        let results: SearchResults = self
            .get(
                "search",
                format!("{}/2/tweets/search/recent", self.base_url),
                &[
                    ("query", query.to_string()),
                    ("max_results", self.max_results.to_string()),
                ],
            )
            .await?;

        if results.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for hit in results.data {
            let lookup = self.lookup(&hit.id).await?;
            match lookup.first_media_url() {
                Some(image_url) => candidates.push(Candidate {
                    id: hit.id,
                    text: lookup.data.text,
                    image_url,
                }),
                None => debug!(post_id = %hit.id, "Skipping post without image"),
            }
        }
        Ok(candidates)
    }
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    data: Vec<PostHit>,
    #[serde(default)]
    meta: Option<SearchMeta>,
}

impl SearchResults {
    fn is_empty(&self) -> bool {
        self.meta.as_ref().map(|m| m.result_count) == Some(0) || self.data.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct SearchMeta {
    #[serde(default)]
    result_count: u64,
}

#[derive(Debug, Deserialize)]
struct PostHit {
    id: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PostLookup {
    data: PostHit,
    #[serde(default)]
    includes: Option<Includes>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(default)]
    url: Option<String>,
}

impl PostLookup {
    /// URL of the first expanded media item that has one.
    fn first_media_url(&self) -> Option<String> {
        self.includes
            .as_ref()?
            .media
            .iter()
            .find_map(|m| m.url.clone())
    }
}
