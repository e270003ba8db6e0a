// Thin per-verb client for the portal backend. Every call is signed.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::signer::{HttpMethod, RequestSigner, SignedRequestHeaders};

/// Errors surfaced by [`ApiClient`].
#[derive(Debug)]
pub enum ApiError {
    /// The backend answered with a non-success status.
    Status { status: u16, message: String },
    /// The request never got a response.
    Transport(String),
    /// The endpoint does not form a valid URL with the base URL.
    InvalidUrl(String),
    /// Signed headers could not be converted for the transport.
    Headers(String),
    /// The response body was not the expected JSON.
    Decode(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status { message, .. } => f.write_str(message),
            Self::Transport(msg) => write!(f, "Request failed: {}", msg),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            Self::Headers(msg) => write!(f, "Invalid request headers: {}", msg),
            Self::Decode(msg) => write!(f, "Invalid response body: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// HTTP client that signs every request before sending it.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    signer: Arc<RequestSigner>,
    http: reqwest::Client,
}

impl ApiClient {
    /// Creates a client for `base_url`. Endpoints are appended verbatim.
    pub fn new(base_url: impl Into<String>, signer: Arc<RequestSigner>) -> Result<Self, ApiError> {
        let base_url = base_url.into();
        Url::parse(&base_url).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            http: reqwest::Client::builder().build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    /// Builds `base_url + endpoint`, adding non-empty query params.
    pub fn endpoint_url(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url, endpoint);
        let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;

        let present: Vec<_> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
        if !present.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in present {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// `GET` with `Authorization: Bearer <token>` (or the placeholder).
    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let headers = self.signer.sign(HttpMethod::Get, token);
        self.send_json(endpoint, params, headers, None).await
    }

    /// `GET` without any `Authorization` header.
    pub async fn get_unauthenticated(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, ApiError> {
        let headers = self.signer.sign_unauthenticated(HttpMethod::Get);
        self.send_json(endpoint, params, headers, None).await
    }

    pub async fn post_json(
        &self,
        endpoint: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let headers = self.signer.sign(HttpMethod::Post, token);
        self.send_json(endpoint, &[], headers, Some(body.to_string())).await
    }

    /// `POST` with query params; a missing body is sent as `{}`.
    pub async fn post_with_params(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let body = body.map(Value::to_string).unwrap_or_else(|| "{}".to_string());
        let headers = self.signer.sign(HttpMethod::Post, token);
        self.send_json(endpoint, params, headers, Some(body)).await
    }

    pub async fn put_json(
        &self,
        endpoint: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let headers = self.signer.sign(HttpMethod::Put, token);
        self.send_json(endpoint, &[], headers, Some(body.to_string())).await
    }

    pub async fn patch_json(
        &self,
        endpoint: &str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let headers = self.signer.sign(HttpMethod::Patch, token);
        self.send_json(endpoint, &[], headers, Some(body.to_string())).await
    }

    pub async fn delete(&self, endpoint: &str, token: Option<&str>) -> Result<Value, ApiError> {
        let headers = self.signer.sign(HttpMethod::Delete, token);
        self.send_json(endpoint, &[], headers, None).await
    }

    /// Sends a pre-encoded body with an explicit content type and returns the
    /// raw response without checking its status.
    pub async fn send_raw(
        &self,
        method: HttpMethod,
        endpoint: &str,
        content_type: &str,
        body: Vec<u8>,
        token: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let headers = self.signer.sign_with_content_type(method, token, content_type);
        let url = self.endpoint_url(endpoint, &[])?;
        let header_map = headers
            .to_header_map()
            .map_err(|e| ApiError::Headers(e.to_string()))?;

        debug!("{} {}", method, url);

        let response = self
            .http
            .request(method.into(), url)
            .headers(header_map)
            .body(body)
            .send()
            .await?;
        Ok(response)
    }

    async fn send_json(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        headers: SignedRequestHeaders,
        body: Option<String>,
    ) -> Result<Value, ApiError> {
        let url = self.endpoint_url(endpoint, params)?;
        let method = headers.method;
        let header_map = headers
            .to_header_map()
            .map_err(|e| ApiError::Headers(e.to_string()))?;

        debug!("{} {}", method, url);

        let mut request = self.http.request(method.into(), url).headers(header_map);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let mut message = format!("HTTP error! status: {}", status.as_u16());
            match response.json::<Value>().await {
                Ok(body) => {
                    if let Some(detail) = body.get("message").and_then(Value::as_str) {
                        message = format!("{} - {}", message, detail);
                    }
                }
                Err(_) => {
                    message = format!(
                        "{} - {}",
                        message,
                        status.canonical_reason().unwrap_or("Unknown")
                    );
                }
            }
            warn!("{} {} failed: {}", method, endpoint, message);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::signer::SigningCredentials;

    use axum::{
        Json, Router,
        body::Bytes,
        extract::RawQuery,
        http::{HeaderMap, Method, StatusCode},
        response::IntoResponse,
        routing::any,
    };
    use serde_json::json;

    fn signer() -> Arc<RequestSigner> {
        let credentials =
            SigningCredentials::new("acme-portal", "S", "key-123", "http://localhost:3000")
                .unwrap();
        Arc::new(RequestSigner::with_clock(
            credentials,
            Arc::new(FixedClock::from_unix(1_704_067_200)),
        ))
    }

    async fn echo(
        method: Method,
        headers: HeaderMap,
        RawQuery(query): RawQuery,
        body: Bytes,
    ) -> Json<Value> {
        let headers: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    Value::String(v.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();
        Json(json!({
            "method": method.as_str(),
            "headers": headers,
            "query": query,
            "body": String::from_utf8_lossy(&body),
        }))
    }

    async fn reject_with_message() -> impl IntoResponse {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "reportingYear is required" })),
        )
    }

    async fn reject_plain() -> impl IntoResponse {
        (StatusCode::FORBIDDEN, "forbidden")
    }

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route("/api/echo", any(echo))
            .route("/api/invalid", any(reject_with_message))
            .route("/api/forbidden", any(reject_plain));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_get_sends_signed_headers_and_params() {
        let client = ApiClient::new(spawn_backend().await, signer()).unwrap();

        let echoed = client
            .get("/echo", &[("year", "2024"), ("site", "")], Some("tok"))
            .await
            .unwrap();

        let headers = &echoed["headers"];
        assert_eq!(echoed["method"], "GET");
        assert_eq!(echoed["query"], "year=2024");
        assert_eq!(headers["authorization"], "Bearer tok");
        assert_eq!(headers["x-apikey"], "key-123");
        assert_eq!(headers["origin"], "http://localhost:3000");
        assert_eq!(headers["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(
            headers["requestid"],
            "iAt54k6zQJv3PVmiuFWlKEOaGJLIZ/zdgMFmHmMg54Y="
        );
        assert_eq!(headers["user-agent"], "CustomApp/1.0");
        assert_eq!(headers["sec-ch-ua-mobile"], "?0");
        assert!(headers.get("content-type").is_none());
    }

    #[tokio::test]
    async fn test_unauthenticated_get_omits_authorization() {
        let client = ApiClient::new(spawn_backend().await, signer()).unwrap();
        let echoed = client.get_unauthenticated("/echo", &[]).await.unwrap();

        assert!(echoed["headers"].get("authorization").is_none());
        assert_eq!(echoed["query"], Value::Null);
    }

    #[tokio::test]
    async fn test_body_verbs_send_json() {
        let client = ApiClient::new(spawn_backend().await, signer()).unwrap();
        let body = json!({ "name": "Ada" });

        let posted = client.post_json("/echo", &body, Some("tok")).await.unwrap();
        assert_eq!(posted["method"], "POST");
        assert_eq!(posted["headers"]["content-type"], "application/json");
        assert_eq!(posted["body"], body.to_string());
        assert_eq!(
            posted["headers"]["requestid"],
            "ABdI9OhS2J1Z1MynnvfBq02A+6hGmFLjsQbDJen1AZo="
        );

        let put = client.put_json("/echo", &body, None).await.unwrap();
        assert_eq!(put["headers"]["authorization"], "Bearer {{access_token}}");

        let patched = client.patch_json("/echo", &body, Some("tok")).await.unwrap();
        assert_eq!(patched["method"], "PATCH");

        let deleted = client.delete("/echo", Some("tok")).await.unwrap();
        assert_eq!(deleted["method"], "DELETE");
        assert!(deleted["headers"].get("content-type").is_none());
    }

    #[tokio::test]
    async fn test_post_with_params_defaults_body() {
        let client = ApiClient::new(spawn_backend().await, signer()).unwrap();
        let echoed = client
            .post_with_params("/echo", &[("page", "2")], None, Some("tok"))
            .await
            .unwrap();

        assert_eq!(echoed["query"], "page=2");
        assert_eq!(echoed["body"], "{}");
    }

    #[tokio::test]
    async fn test_send_raw_uses_explicit_content_type() {
        let client = ApiClient::new(spawn_backend().await, signer()).unwrap();
        let response = client
            .send_raw(
                HttpMethod::Post,
                "/echo",
                "multipart/form-data; boundary=xyz",
                b"--xyz--".to_vec(),
                Some("tok"),
            )
            .await
            .unwrap();

        assert!(response.status().is_success());
        let echoed: Value = response.json().await.unwrap();
        assert_eq!(
            echoed["headers"]["content-type"],
            "multipart/form-data; boundary=xyz"
        );
    }

    #[tokio::test]
    async fn test_error_messages() {
        let client = ApiClient::new(spawn_backend().await, signer()).unwrap();

        let err = client
            .post_json("/invalid", &json!({}), Some("tok"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "HTTP error! status: 400 - reportingYear is required"
        );

        let err = client.get("/forbidden", &[], Some("tok")).await.unwrap_err();
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "HTTP error! status: 403 - Forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ApiClient::new("not a url", signer()),
            Err(ApiError::InvalidUrl(_))
        ));
    }
}
