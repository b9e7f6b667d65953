use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::PrError;

const USER_AGENT: &str = concat!("wool/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: usize = 100;

/// A response whose status code the caller wants to judge itself.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl ApiResponse {
    /// `body[key]` as a string, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Authenticated access to the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("token {}", self.token))
    }

    /// GET a JSON object, failing on any non-success status.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PrError> {
        debug!(%url, "GET");
        let response = self.request(Method::GET, url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PrError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json::<T>().await?)
    }

    /// GET every page of a list endpoint. A body that is not a JSON array
    /// (GitHub answers bad auth and rate limiting with an error object) is
    /// reported as `PrError::UnexpectedShape`.
    pub async fn get_list<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, PrError> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            debug!(%url, page, "GET list");
            let body: serde_json::Value = self
                .request(Method::GET, url)
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .send()
                .await?
                .json()
                .await?;
            let entries = match body {
                serde_json::Value::Array(entries) => entries,
                other => {
                    return Err(PrError::UnexpectedShape {
                        url: url.to_string(),
                        body: other.to_string(),
                    })
                }
            };
            let count = entries.len();
            for entry in entries {
                items.push(serde_json::from_value(entry)?);
            }
            if count < PAGE_SIZE {
                return Ok(items);
            }
            page += 1;
        }
    }

    /// GET a body as text, returning the status alongside it.
    pub async fn get_text(&self, url: &str) -> Result<(StatusCode, String), PrError> {
        debug!(%url, "GET raw");
        let response = self.request(Method::GET, url).send().await?;
        let status = response.status();
        Ok((status, response.text().await?))
    }

    /// Send a JSON body. The status is not checked; callers compare it against
    /// the code the endpoint documents for success.
    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<ApiResponse, PrError> {
        debug!(%method, %url, "sending");
        let response = self.request(method, url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        Ok(ApiResponse { status, body })
    }
}
