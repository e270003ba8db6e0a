//! HMAC request signing for outgoing portal API calls.
//!
//! Every call carries a `requestid` header holding
//! `base64(HMAC-SHA256(method + client_id + timestamp, shared_secret))` and the
//! `timestamp` it was computed over. There is no nonce: two calls with the same
//! verb in the same second carry the same signature, and replay protection is
//! left to the backend's timestamp tolerance.
//!
//! ## Usage
//!
//! ```ignore
//! let credentials = SigningCredentials::new("acme-portal", secret, api_key, origin)?;
//! let signer = RequestSigner::new(credentials);
//!
//! let headers = signer.sign(HttpMethod::Post, Some(&access_token));
//! let map = headers.to_header_map()?;
//! ```

mod headers;
mod method;

pub use headers::{
    AUTHORIZATION_PLACEHOLDER, DEFAULT_CONTENT_TYPE, FINGERPRINT_HEADERS, SignedRequestHeaders,
};
pub use method::{HttpMethod, UnsupportedMethod};

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::HeaderValue;
use sha2::Sha256;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

type HmacSha256 = Hmac<Sha256>;

/// `chrono` format of the `timestamp` header: second precision, always `Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Formats an instant the way the backend expects in the `timestamp` header.
pub fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Errors raised while building signing credentials or header maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The client identifier is empty.
    EmptyClientId,
    /// The shared secret is empty.
    EmptySecret,
    /// The secret was rejected by the HMAC implementation.
    InvalidSecret(String),
    /// A value cannot be sent as an HTTP header.
    InvalidHeaderValue { header: &'static str, reason: String },
}

impl fmt::Display for SignerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyClientId => write!(f, "Signing client id must not be empty"),
            Self::EmptySecret => write!(f, "Signing secret must not be empty"),
            Self::InvalidSecret(msg) => write!(f, "Invalid signing secret: {}", msg),
            Self::InvalidHeaderValue { header, reason } => {
                write!(f, "Invalid value for header {}: {}", header, reason)
            }
        }
    }
}

impl std::error::Error for SignerError {}

/// Constants the signer needs, validated once at startup.
#[derive(Clone)]
pub struct SigningCredentials {
    client_id: String,
    api_key: String,
    origin: String,
    /// HMAC keyed with the shared secret; cloned per signature.
    keyed_mac: HmacSha256,
}

impl SigningCredentials {
    /// Validates and builds the signing credentials.
    pub fn new(
        client_id: impl Into<String>,
        shared_secret: impl AsRef<[u8]>,
        api_key: impl Into<String>,
        origin: impl Into<String>,
    ) -> Result<Self, SignerError> {
        let client_id = client_id.into();
        let api_key = api_key.into();
        let origin = origin.into();
        let secret = shared_secret.as_ref();

        if client_id.is_empty() {
            return Err(SignerError::EmptyClientId);
        }
        if secret.is_empty() {
            return Err(SignerError::EmptySecret);
        }
        check_header_value("x-apikey", &api_key)?;
        check_header_value("Origin", &origin)?;

        let keyed_mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| SignerError::InvalidSecret(e.to_string()))?;

        Ok(Self {
            client_id,
            api_key,
            origin,
            keyed_mac,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("client_id", &self.client_id)
            .field("api_key", &self.api_key)
            .field("origin", &self.origin)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

fn check_header_value(header: &'static str, value: &str) -> Result<(), SignerError> {
    HeaderValue::from_str(value)
        .map(|_| ())
        .map_err(|e| SignerError::InvalidHeaderValue {
            header,
            reason: e.to_string(),
        })
}

/// Builds signed header sets for outgoing calls.
///
/// Pure apart from reading the clock.
#[derive(Clone)]
pub struct RequestSigner {
    credentials: SigningCredentials,
    clock: Arc<dyn Clock>,
}

impl RequestSigner {
    /// Creates a signer reading the system clock.
    pub fn new(credentials: SigningCredentials) -> Self {
        Self::with_clock(credentials, Arc::new(SystemClock))
    }

    /// Creates a signer with an injected clock.
    pub fn with_clock(credentials: SigningCredentials, clock: Arc<dyn Clock>) -> Self {
        Self { credentials, clock }
    }

    pub fn credentials(&self) -> &SigningCredentials {
        &self.credentials
    }

    /// Current timestamp in header format.
    pub fn timestamp(&self) -> String {
        format_timestamp(self.clock.now())
    }

    /// Base64 HMAC-SHA256 over `method + client_id + timestamp`.
    pub fn compute_signature(&self, method: HttpMethod, timestamp: &str) -> String {
        let mut mac = self.credentials.keyed_mac.clone();
        mac.update(method.as_str().as_bytes());
        mac.update(self.credentials.client_id.as_bytes());
        mac.update(timestamp.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Signs with `Authorization: Bearer <token>`, or the placeholder when
    /// no token is given.
    pub fn sign(&self, method: HttpMethod, token: Option<&str>) -> SignedRequestHeaders {
        self.build(method, Some(authorization_value(token)), None)
    }

    /// Like [`sign`](Self::sign) with an explicit content type for
    /// body-bearing verbs (e.g. `multipart/form-data`).
    pub fn sign_with_content_type(
        &self,
        method: HttpMethod,
        token: Option<&str>,
        content_type: &str,
    ) -> SignedRequestHeaders {
        self.build(method, Some(authorization_value(token)), Some(content_type))
    }

    /// Signs without any `Authorization` header, for endpoints that reject it.
    pub fn sign_unauthenticated(&self, method: HttpMethod) -> SignedRequestHeaders {
        self.build(method, None, None)
    }

    fn build(
        &self,
        method: HttpMethod,
        authorization: Option<String>,
        content_type: Option<&str>,
    ) -> SignedRequestHeaders {
        let timestamp = self.timestamp();
        let signature = self.compute_signature(method, &timestamp);

        let content_type = method
            .carries_body()
            .then(|| content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string());

        debug!(
            method = method.as_str(),
            timestamp = %timestamp,
            authenticated = authorization.is_some(),
            "Signed request"
        );

        SignedRequestHeaders {
            method,
            timestamp,
            signature,
            client_id: self.credentials.client_id.clone(),
            api_key: self.credentials.api_key.clone(),
            origin: self.credentials.origin.clone(),
            authorization,
            content_type,
        }
    }
}

fn authorization_value(token: Option<&str>) -> String {
    match token {
        Some(token) => format!("Bearer {}", token),
        None => AUTHORIZATION_PLACEHOLDER.to_string(),
    }
}
