// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! GitHub API client for fetching repository activity.
//!
//! REST endpoints are walked by page number, GraphQL connections by cursor.
//! Both are exposed through [`Paginate`], which yields one page of raw JSON
//! records per call until the result set is exhausted. Nothing is retried:
//! the first failed request ends the traversal with a [`FetchError`].

use crate::config;
use crate::error::{ConfigError, FetchError};
use chrono::NaiveDate;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};

const GITHUB_API_BASE: &str = "https://api.github.com";
const CLIENT_USER_AGENT: &str = "repo-stats-collector";
// The star+json media type adds `starred_at` to stargazer records.
const ACCEPT_MEDIA_TYPE: &str = "application/vnd.github.v3.star+json";
// Largest page GitHub serves, REST and GraphQL alike.
const MAX_PAGE_SIZE: u32 = 100;

const DISCUSSIONS_QUERY: &str = r#"
query Discussions($owner: String!, $name: String!, $first: Int!, $after: String) {
  repository(owner: $owner, name: $name) {
    discussions(first: $first, after: $after) {
      totalCount
      pageInfo {
        endCursor
        hasNextPage
      }
      nodes {
        id
        number
        url
        title
        body
        createdAt
        updatedAt
      }
    }
  }
}
"#;

/// Authenticated session against the GitHub API.
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    per_page: u32,
}

impl GithubClient {
    /// Build a client using the token from `GITHUB_TOKEN`.
    pub fn from_env(per_page: u32, timeout: Duration) -> Result<Self, ConfigError> {
        let token = config::github_token()?;
        Self::new(&token, per_page, timeout)
    }

    /// Build a client that sends `token` with every request.
    pub fn new(token: &str, per_page: u32, timeout: Duration) -> Result<Self, ConfigError> {
        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken {
                var: config::GITHUB_TOKEN_ENV_VAR,
            });
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim())).map_err(|_| {
            ConfigError::MissingToken {
                var: config::GITHUB_TOKEN_ENV_VAR,
            }
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_MEDIA_TYPE));
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(ConfigError::HttpClient)?;

        // A larger request is served as 100 records, which would read as a
        // short final page.
        if per_page > MAX_PAGE_SIZE {
            warn!(per_page, max = MAX_PAGE_SIZE, "clamping page size");
        }

        Ok(Self {
            http,
            base_url: GITHUB_API_BASE.to_string(),
            per_page: per_page.clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// Point the client at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Walk a REST endpoint (a path such as `/repos/o/r/commits`) page by page.
    pub fn paginate(&self, endpoint: impl Into<String>, params: Vec<(String, String)>) -> RestPager<'_> {
        RestPager {
            client: self,
            endpoint: endpoint.into(),
            params,
            page: 1,
            done: false,
        }
    }

    pub fn commits(&self, owner: &str, repo: &str, since: Option<NaiveDate>) -> RestPager<'_> {
        self.paginate(
            format!("/repos/{}/{}/commits", owner, repo),
            since_param(since).into_iter().collect(),
        )
    }

    pub fn contributors(&self, owner: &str, repo: &str) -> RestPager<'_> {
        self.paginate(format!("/repos/{}/{}/contributors", owner, repo), Vec::new())
    }

    pub fn collaborators(&self, owner: &str, repo: &str) -> RestPager<'_> {
        self.paginate(format!("/repos/{}/{}/collaborators", owner, repo), Vec::new())
    }

    pub fn stargazers(&self, owner: &str, repo: &str) -> RestPager<'_> {
        self.paginate(format!("/repos/{}/{}/stargazers", owner, repo), Vec::new())
    }

    /// Issues and pull requests, open and closed.
    pub fn issues(&self, owner: &str, repo: &str, since: Option<NaiveDate>) -> RestPager<'_> {
        let mut params = vec![("state".to_string(), "all".to_string())];
        params.extend(since_param(since));
        self.paginate(format!("/repos/{}/{}/issues", owner, repo), params)
    }

    pub fn organization_members(&self, org: &str) -> RestPager<'_> {
        self.paginate(format!("/orgs/{}/members", org), Vec::new())
    }

    pub fn discussions(&self, owner: &str, repo: &str) -> GraphqlPager<'_> {
        let mut variables = serde_json::Map::new();
        variables.insert("owner".to_string(), json!(owner));
        variables.insert("name".to_string(), json!(repo));

        GraphqlPager {
            client: self,
            label: format!("graphql discussions {}/{}", owner, repo),
            query: DISCUSSIONS_QUERY,
            variables,
            connection: "/data/repository/discussions",
            after: None,
            page: 1,
            done: false,
        }
    }

    /// Current rate-limit state. Informational only; the client never paces
    /// itself against it.
    pub async fn rate_limit(&self) -> Result<RateLimit, FetchError> {
        let endpoint = "/rate_limit";
        let response = self.send(endpoint, self.http.get(self.url(endpoint))).await?;
        response.json().await.map_err(|source| FetchError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn get_json(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
        let request = self.http.get(self.url(endpoint)).query(query);
        let response = self.send(endpoint, request).await?;
        response.json().await.map_err(|source| FetchError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn post_graphql(&self, body: &Value) -> Result<Value, FetchError> {
        let endpoint = "/graphql";
        let request = self.http.post(self.url(endpoint)).json(body);
        let response = self.send(endpoint, request).await?;
        response.json().await.map_err(|source| FetchError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, FetchError> {
        let response = request.send().await.map_err(|source| FetchError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        Ok(response)
    }
}

fn since_param(since: Option<NaiveDate>) -> Option<(String, String)> {
    since.map(|date| ("since".to_string(), format!("{}T00:00:00Z", date)))
}

/// A finite sequence of pages of raw records.
///
/// Pagers start at the first page and can be rewound with [`restart`]; no
/// state survives beyond the pager itself.
///
/// [`restart`]: Paginate::restart
#[allow(async_fn_in_trait)]
pub trait Paginate {
    /// Human-readable endpoint used in logs.
    fn endpoint(&self) -> &str;

    /// Fetch the next page. Returns `None` once the result set is exhausted.
    async fn next_page(&mut self) -> Result<Option<Vec<Value>>, FetchError>;

    /// Rewind to the first page.
    fn restart(&mut self);

    /// Drain every remaining page into one vector.
    async fn collect_all(mut self) -> Result<Vec<Value>, FetchError>
    where
        Self: Sized,
    {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page);
        }
        Ok(records)
    }
}

/// Page-number pagination over a REST endpoint.
///
/// A page shorter than `per_page` is the last one. When the total is an exact
/// multiple of `per_page` this costs one extra request that comes back empty.
#[derive(Debug)]
pub struct RestPager<'a> {
    client: &'a GithubClient,
    endpoint: String,
    params: Vec<(String, String)>,
    page: u32,
    done: bool,
}

impl Paginate for RestPager<'_> {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn next_page(&mut self) -> Result<Option<Vec<Value>>, FetchError> {
        if self.done {
            return Ok(None);
        }

        info!(endpoint = %self.endpoint, page = self.page, "fetching page");

        let per_page = self.client.per_page;
        let mut query = self.params.clone();
        query.push(("page".to_string(), self.page.to_string()));
        query.push(("per_page".to_string(), per_page.to_string()));

        let records = match self.client.get_json(&self.endpoint, &query).await? {
            Value::Array(records) => records,
            other => {
                return Err(FetchError::Shape {
                    endpoint: self.endpoint.clone(),
                    reason: format!("expected an array, got {}", json_kind(&other)),
                });
            }
        };

        if records.len() < per_page as usize {
            self.done = true;
        } else {
            self.page += 1;
        }

        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(records))
    }

    fn restart(&mut self) {
        self.page = 1;
        self.done = false;
    }
}

/// Cursor pagination over a GraphQL connection.
///
/// The query must accept `$first` and `$after` variables and select
/// `pageInfo { endCursor hasNextPage }` and `nodes` on the connection found
/// at the `connection` JSON pointer.
#[derive(Debug)]
pub struct GraphqlPager<'a> {
    client: &'a GithubClient,
    label: String,
    query: &'static str,
    variables: serde_json::Map<String, Value>,
    connection: &'static str,
    after: Option<String>,
    page: u32,
    done: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    end_cursor: Option<String>,
    has_next_page: bool,
}

impl Paginate for GraphqlPager<'_> {
    fn endpoint(&self) -> &str {
        &self.label
    }

    async fn next_page(&mut self) -> Result<Option<Vec<Value>>, FetchError> {
        if self.done {
            return Ok(None);
        }

        info!(endpoint = %self.label, page = self.page, "fetching page");

        let mut variables = self.variables.clone();
        variables.insert(
            "first".to_string(),
            json!(self.client.per_page),
        );
        variables.insert("after".to_string(), json!(self.after));

        let response = self
            .client
            .post_graphql(&json!({ "query": self.query, "variables": variables }))
            .await?;

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .map(|e| e.get("message").and_then(Value::as_str).unwrap_or("unknown error"))
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(FetchError::Graphql { message });
            }
        }

        let connection = response
            .pointer(self.connection)
            .ok_or_else(|| self.shape_error(format!("missing {}", self.connection)))?;
        let page_info: PageInfo = connection
            .get("pageInfo")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| self.shape_error("missing or malformed pageInfo".to_string()))?;
        let nodes = match connection.get("nodes") {
            Some(Value::Array(nodes)) => nodes.clone(),
            _ => return Err(self.shape_error("missing nodes".to_string())),
        };

        if page_info.has_next_page {
            let cursor = page_info
                .end_cursor
                .ok_or_else(|| self.shape_error("hasNextPage without endCursor".to_string()))?;
            self.after = Some(cursor);
            self.page += 1;
        } else {
            self.done = true;
        }

        Ok(Some(nodes))
    }

    fn restart(&mut self) {
        self.after = None;
        self.page = 1;
        self.done = false;
    }
}

impl GraphqlPager<'_> {
    fn shape_error(&self, reason: String) -> FetchError {
        FetchError::Shape {
            endpoint: self.label.clone(),
            reason,
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RateLimit {
    pub resources: RateLimitResources,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RateLimitResources {
    pub core: RateLimitWindow,
    #[serde(default)]
    pub graphql: Option<RateLimitWindow>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RateLimitWindow {
    pub limit: u64,
    pub remaining: u64,
    #[serde(default)]
    pub used: u64,
    /// Unix timestamp at which the window resets.
    pub reset: i64,
}
