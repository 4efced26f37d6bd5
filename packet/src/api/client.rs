use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::common::ApiErrorResponse;
use super::error::ApiError;

pub const DEFAULT_BASE_URL: &str = "https://api.packet.net";
const AUTH_TOKEN_HEADER: &str = "x-auth-token";
const USER_AGENT: &str = concat!("packet-provider-rs/", env!("CARGO_PKG_VERSION"));

/// Packet API client
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            timeout_seconds: 30,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based), doubling each time
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Client {
    /// Create a new API client with default retry configuration
    pub fn new(base_url: &str, auth_token: &str) -> Result<Self, ApiError> {
        Self::with_config(base_url, auth_token, RetryConfig::default())
    }

    pub fn with_config(
        base_url: &str,
        auth_token: &str,
        retry_config: RetryConfig,
    ) -> Result<Self, ApiError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl(format!(
                "{}: scheme must be http or https",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut token = HeaderValue::from_str(auth_token).map_err(|_| ApiError::AuthError)?;
        token.set_sensitive(true);
        headers.insert(AUTH_TOKEN_HEADER, token);

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(retry_config.timeout_seconds))
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http_client,
                base_url: base_url.trim_end_matches('/').to_string(),
                retry_config,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// SSH key operations
    pub fn ssh_keys(&self) -> super::ssh_keys::SshKeysApi<'_> {
        super::ssh_keys::SshKeysApi::new(self)
    }

    /// Project operations
    pub fn projects(&self) -> super::projects::ProjectsApi<'_> {
        super::projects::ProjectsApi::new(self)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.inner.base_url, path);
        self.inner.http_client.request(method, url)
    }

    /// Execute a GET request with retry logic
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute_with_retry(|| self.request(Method::GET, path).send(), Method::GET, path)
            .await
    }

    /// Execute a POST request. Creates are only re-sent when the server
    /// cannot have acted on them: rate limiting and failed connections.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.execute_with_retry(
            || self.request(Method::POST, path).json(body).send(),
            Method::POST,
            path,
        )
        .await
    }

    /// Execute a PATCH request with retry logic
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + Sync + ?Sized,
    {
        self.execute_with_retry(
            || self.request(Method::PATCH, path).json(body).send(),
            Method::PATCH,
            path,
        )
        .await
    }

    /// Execute a DELETE request with retry logic; the API answers 204
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute_with_retry(
            || self.request(Method::DELETE, path).send(),
            Method::DELETE,
            path,
        )
        .await
    }

    async fn execute_with_retry<F, Fut, T>(
        &self,
        request_fn: F,
        method: Method,
        path: &str,
    ) -> Result<T, ApiError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
        T: DeserializeOwned,
    {
        let retry = &self.inner.retry_config;
        let idempotent = method != Method::POST;
        let method = method.as_str();
        let mut attempt = 0;
        let mut delay = None;
        let mut last_error = None;

        while attempt <= retry.max_retries {
            if attempt > 0 {
                let backoff = delay.take().unwrap_or_else(|| retry.backoff(attempt));
                tracing::debug!(
                    method,
                    path,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying request"
                );
                tokio::time::sleep(backoff).await;
            }

            tracing::debug!(method, path, "sending request");
            match request_fn().await {
                Ok(response) => {
                    let status = response.status();
                    tracing::debug!(method, path, status = status.as_u16(), "received response");

                    if status.is_success() {
                        return self.parse_success_response(response).await;
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        return Err(ApiError::AuthError);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        delay = retry_after(&response).map(|d| {
                            d.min(Duration::from_millis(retry.max_backoff_ms))
                        });
                        last_error = Some(ApiError::RateLimited);
                    } else if status.is_server_error() && idempotent {
                        last_error = Some(ApiError::ServiceUnavailable);
                    } else {
                        return Self::handle_error_response(response).await;
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        if !idempotent {
                            return Err(ApiError::Timeout(retry.timeout_seconds));
                        }
                        last_error = Some(ApiError::Timeout(retry.timeout_seconds));
                    } else if e.is_connect() {
                        last_error = Some(ApiError::ServiceUnavailable);
                    } else {
                        return Err(ApiError::RequestError(e));
                    }
                }
            }

            attempt += 1;
        }

        tracing::warn!(method, path, attempts = attempt, "giving up after retries");
        Err(last_error.unwrap_or(ApiError::ServiceUnavailable))
    }

    async fn parse_success_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let text = response.text().await?;
        tracing::trace!("API response body: {}", text);

        // Empty bodies (204) decode as unit
        let body = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str::<T>(body).map_err(|e| {
            tracing::error!("Failed to deserialize response: {}, body: {}", e, text);
            ApiError::ParseError(format!("Failed to parse response: {}", e))
        })
    }

    async fn handle_error_response<T>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let errors = serde_json::from_str::<ApiErrorResponse>(&text)
            .map(ApiErrorResponse::messages)
            .unwrap_or_default();
        let message = if errors.is_empty() {
            text
        } else {
            errors.join("; ")
        };

        Err(ApiError::ApiError {
            status,
            message,
            errors,
        })
    }
}

/// Seconds from a `Retry-After` header, if present and numeric
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_helpers::{create_test_client, fast_retries};
    use mockito::{Matcher, Server};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Thing {
        id: String,
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            timeout_seconds: 1,
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn client_rejects_invalid_base_url() {
        assert!(matches!(
            Client::new("not a url", "token"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(matches!(
            Client::new("ftp://api.packet.net", "token"),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn client_sends_auth_token_and_parses_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/things/1")
            .match_header("x-auth-token", "test-token")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"1"}"#)
            .create_async()
            .await;

        let client = create_test_client(&server.url());
        let thing: Thing = client.get("/things/1").await.unwrap();
        assert_eq!(thing.id, "1");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_strips_trailing_slash_from_base_url() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/things/1")
            .with_status(204)
            .create_async()
            .await;

        let client = create_test_client(&format!("{}/", server.url()));
        client.delete("/things/1").await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_posts_json_bodies() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/things")
            .match_body(Matcher::Json(serde_json::json!({"label": "a"})))
            .with_status(201)
            .with_body(r#"{"id":"2"}"#)
            .create_async()
            .await;

        let client = create_test_client(&server.url());
        let thing: Thing = client
            .post("/things", &serde_json::json!({"label": "a"}))
            .await
            .unwrap();
        assert_eq!(thing.id, "2");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_maps_error_bodies() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/things/missing")
            .with_status(404)
            .with_body(r#"{"errors":["Not found"]}"#)
            .create_async()
            .await;

        let client = create_test_client(&server.url());
        let err = client.get::<Thing>("/things/missing").await.unwrap_err();
        assert!(err.is_not_found());
        match err {
            ApiError::ApiError {
                status,
                message,
                errors,
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Not found");
                assert_eq!(errors, vec!["Not found"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn client_keeps_raw_text_of_unstructured_errors() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/things/1")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let client = create_test_client(&server.url());
        let err = client.get::<Thing>("/things/1").await.unwrap_err();
        assert!(err.to_string().contains("bad request"));
    }

    #[tokio::test]
    async fn client_fails_fast_on_authentication_errors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/things/1")
            .with_status(401)
            .with_body(r#"{"errors":["Invalid authentication token"]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = create_test_client(&server.url());
        let result = client.get::<Thing>("/things/1").await;
        assert!(matches!(result, Err(ApiError::AuthError)));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_retries_server_errors_until_exhausted() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/things/1")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = Client::with_config(&server.url(), "test-token", fast_retries(2)).unwrap();
        let result = client.get::<Thing>("/things/1").await;
        assert!(matches!(result, Err(ApiError::ServiceUnavailable)));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_recovers_after_rate_limiting() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/things/1"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/things/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":"1"}"#))
            .mount(&server)
            .await;

        let client = Client::with_config(&server.uri(), "test-token", fast_retries(3)).unwrap();
        let thing: Thing = client.get("/things/1").await.unwrap();
        assert_eq!(thing.id, "1");
    }

    #[tokio::test]
    async fn client_does_not_resend_creates_after_server_errors() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/things")
            .with_status(500)
            .with_body(r#"{"errors":["Internal error"]}"#)
            .expect(1)
            .create_async()
            .await;

        let client = Client::with_config(&server.url(), "test-token", fast_retries(3)).unwrap();
        let result = client
            .post::<Thing, _>("/things", &serde_json::json!({"label": "a"}))
            .await;
        match result {
            Err(ApiError::ApiError {
                status, message, ..
            }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "Internal error");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_resends_creates_after_rate_limiting() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/things"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/things"))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":"3"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::with_config(&server.uri(), "test-token", fast_retries(3)).unwrap();
        let thing: Thing = client
            .post("/things", &serde_json::json!({"label": "a"}))
            .await
            .unwrap();
        assert_eq!(thing.id, "3");
    }

    #[tokio::test]
    async fn client_gives_up_on_unreachable_hosts() {
        // Nothing listens on port 9 on a test machine
        let client = Client::with_config("http://127.0.0.1:9", "token", fast_retries(1)).unwrap();
        let result = client.get::<Thing>("/things/1").await;
        assert!(matches!(
            result,
            Err(ApiError::ServiceUnavailable) | Err(ApiError::RequestError(_))
        ));
    }
}
