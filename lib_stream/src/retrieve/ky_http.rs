//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest` with middleware-driven
//! retries and uniform response handling. A non-2xx status is not an error at
//! this layer: the caller gets the status and the raw error body.

use reqwest::{
    header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// Default number of retries for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Deserialized response plus transaction metadata.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body, present on success.
    pub data: Option<T>,
    /// The raw body returned with a non-success status.
    pub error_body: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// True for a 2xx status.
    pub success: bool,
    /// Response headers.
    pub headers: HeaderMap,
}

impl<T> ApiResponse<T> {
    /// Returns the data, or an error describing the failed status.
    pub fn into_data(self) -> anyhow::Result<T> {
        match self.data {
            Some(data) if self.success => Ok(data),
            _ => anyhow::bail!(
                "HTTP {}: {}",
                self.status,
                self.error_body.unwrap_or_default()
            ),
        }
    }
}

/// Asynchronous HTTP client joined to a base URL.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    /// Bearer token injected into every request when set.
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client with the default retry policy.
    ///
    /// # Errors
    /// Fails if `base_url` is not an absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> anyhow::Result<Self> {
        Self::with_max_retries(base_url, auth_token, DEFAULT_MAX_RETRIES)
    }

    /// Creates a client that retries transient failures up to `max_retries` times.
    pub fn with_max_retries(
        base_url: &str,
        auth_token: Option<String>,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let url = Url::parse(base_url)?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: url,
            auth_token,
        })
    }

    /// A copy of this client that authenticates with `token`.
    pub fn with_auth_token(&self, token: impl Into<String>) -> Self {
        Self {
            inner: self.inner.clone(),
            base_url: self.base_url.clone(),
            auth_token: Some(token.into()),
        }
    }

    /// Base URL paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn builder(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let full_url = self.base_url.join(path)?;
        let mut req = self.inner.request(method, full_url);
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(req)
    }

    /// Performs a request with optional extra headers and a JSON body.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<B>,
    ) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mut req = self.builder(method, path)?;

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(&b)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        Self::execute(req).await
    }

    /// GET with query parameters.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let req = self.builder(Method::GET, path)?.query(query);
        Self::execute(req).await
    }

    /// POST an `application/x-www-form-urlencoded` body.
    pub async fn post_form<T>(&self, path: &str, form: &[(&str, &str)]) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let req = self.builder(Method::POST, path)?.form(form);
        Self::execute(req).await
    }

    async fn execute<T>(req: RequestBuilder) -> anyhow::Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
    {
        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_text = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body: error_text,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_base_url_is_rejected() {
        assert!(ApiClient::new("api/v1/", None).is_err());
        assert!(ApiClient::new("https://api.refinitiv.com/", None).is_ok());
    }

    #[test]
    fn failed_response_keeps_the_error_body() {
        let response: ApiResponse<serde_json::Value> = ApiResponse {
            data: None,
            error_body: Some("invalid_grant".to_string()),
            status: 400,
            success: false,
            headers: HeaderMap::new(),
        };
        let err = response.into_data().unwrap_err();
        assert_eq!(err.to_string(), "HTTP 400: invalid_grant");
    }
}
