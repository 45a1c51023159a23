//! OpenSearch index store
//!
//! Conditional writes go through `POST /{index}/_update/{id}` with the
//! bundled Painless script; the mutation itself travels as script params,
//! so the marker comparison runs inside the cluster against the current
//! document version. Root writes use `scripted_upsert` so a missing
//! document reaches the script as an empty `_source`.
//!
//! Request signing for managed domains is left to a proxy in front of the
//! cluster; an optional bearer token is sent as-is.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::OpenSearchConfig;
use crate::domain::{Attributes, IndexStore, Mutation, SearchHit, SearchPage, TermQuery, WriteOutcome};
use crate::error::{Result, SyncError};

/// Painless implementation of `Mutation::interpret`
pub const UPDATE_SCRIPT: &str = include_str!("update.painless");

/// Retries of the update on a concurrent version conflict; the script
/// re-evaluates against the newer version each time
const RETRY_ON_CONFLICT: u32 = 5;

pub struct OpenSearchStore {
    client: Client,
    base: Url,
    auth_token: Option<String>,
}

impl OpenSearchStore {
    /// Create a store from connection settings and the per-request timeout
    pub fn from_config(config: &OpenSearchConfig, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(&config.base_url())
            .map_err(|e| SyncError::config(format!("Invalid OpenSearch endpoint '{}': {}", config.endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(SyncError::config(format!(
                "OpenSearch endpoint '{}' cannot be used as a base URL",
                config.endpoint
            )));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base,
            auth_token: config.auth_token.clone(),
        })
    }

    /// `{base}/{segments...}` with each segment percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl fmt::Debug for OpenSearchStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenSearchStore")
            .field("base", &self.base.as_str())
            .field("has_auth_token", &self.auth_token.is_some())
            .finish()
    }
}

#[async_trait]
impl IndexStore for OpenSearchStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<Attributes>> {
        let url = self.url(&[index, "_doc", id]);
        let response = self.request(Method::GET, url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: GetResponse = success(response, "get").await?.json().await?;
        Ok(body.found.then_some(body.source).flatten())
    }

    async fn update(&self, index: &str, id: &str, mutation: &Mutation) -> Result<WriteOutcome> {
        let mut url = self.url(&[index, "_update", id]);
        url.query_pairs_mut()
            .append_pair("retry_on_conflict", &RETRY_ON_CONFLICT.to_string());

        let body = update_body(mutation)?;
        let response = self.request(Method::POST, url).json(&body).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(index, id, op = mutation.name(), "Update target missing");
            return Ok(WriteOutcome::NotFound);
        }
        let body: UpdateResponse = success(response, "update").await?.json().await?;
        Ok(update_outcome(mutation, &body.result))
    }

    async fn search(&self, query: &TermQuery) -> Result<SearchPage> {
        let url = self.url(&[query.index.as_str(), "_search"]);
        let body = search_body(query);
        let response = self.request(Method::POST, url).json(&body).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(SearchPage::default());
        }
        let body: SearchResponse = success(response, "search").await?.json().await?;
        Ok(body.into_page())
    }
}

/// Map non-success statuses to errors, keeping the response body for context
async fn success(response: Response, operation: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("OpenSearch {} returned {}: {}", operation, status, body);

    Err(if status == StatusCode::CONFLICT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SyncError::transport(message)
    } else {
        SyncError::store(message)
    })
}

/// Request body for `_update`
pub fn update_body(mutation: &Mutation) -> Result<Value> {
    let mut body = json!({
        "script": {
            "lang": "painless",
            "source": UPDATE_SCRIPT,
            "params": serde_json::to_value(mutation)?,
        }
    });
    if mutation.creates_documents() {
        body["scripted_upsert"] = json!(true);
        body["upsert"] = json!({});
    }
    Ok(body)
}

/// Outcome of an `_update` response `result`.
///
/// The script reports every untouched document as `noop`. For root writes
/// that can only mean the stored marker is newer.
pub fn update_outcome(mutation: &Mutation, result: &str) -> WriteOutcome {
    match result {
        "noop" => match mutation {
            Mutation::ReplaceRoot { .. } | Mutation::RemoveRoot { .. } => WriteOutcome::Stale,
            _ => WriteOutcome::Noop,
        },
        "not_found" => WriteOutcome::NotFound,
        _ => WriteOutcome::Applied,
    }
}

/// Request body for `_search`: live documents whose `field` equals `value`
pub fn search_body(query: &TermQuery) -> Value {
    let source = if query.source_fields.is_empty() {
        json!(false)
    } else {
        json!(query.source_fields)
    };

    json!({
        "from": query.from,
        "size": query.size,
        "track_total_hits": true,
        "_source": source,
        "sort": ["_doc"],
        "query": {
            "bool": {
                "filter": [{ "term": { query.field.as_str(): query.value } }],
                "must_not": [{ "term": { "_sync.eventKind": "remove" } }]
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Attributes>,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct TotalHits {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Option<Attributes>,
}

impl SearchResponse {
    fn into_page(self) -> SearchPage {
        SearchPage {
            total: self.hits.total.map(|t| t.value),
            hits: self
                .hits
                .hits
                .into_iter()
                .map(|hit| SearchHit {
                    id: hit.id,
                    source: hit.source.unwrap_or_default(),
                })
                .collect(),
        }
    }
}
