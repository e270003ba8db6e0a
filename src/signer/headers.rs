//! The header set attached to every signed request.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use super::HttpMethod;
use super::SignerError;

/// `Authorization` value used when no identity token is supplied.
pub const AUTHORIZATION_PLACEHOLDER: &str = "Bearer {{access_token}}";

/// Content type for body-bearing verbs when the caller does not pick one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Client-hint and user-agent overrides sent with every request.
///
/// The backend matches these literally.
pub const FINGERPRINT_HEADERS: [(&str, &str); 4] = [
    ("sec-ch-ua", "\"\""),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"\""),
    ("User-Agent", "CustomApp/1.0"),
];

/// Headers computed for one outgoing call. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequestHeaders {
    /// Verb the signature was computed for.
    pub method: HttpMethod,
    /// UTC timestamp, `YYYY-MM-DDTHH:mm:ssZ`.
    pub timestamp: String,
    /// Base64 HMAC-SHA256 over `method + client_id + timestamp`.
    pub signature: String,
    /// Client identifier that entered the signature.
    pub client_id: String,
    /// Value of `x-apikey`.
    pub api_key: String,
    /// Value of `Origin`.
    pub origin: String,
    /// Full `Authorization` value; `None` for unauthenticated endpoints.
    pub authorization: Option<String>,
    /// `Content-Type`; only set for body-bearing verbs.
    pub content_type: Option<String>,
}

impl SignedRequestHeaders {
    /// The bearer token carried in `Authorization`, if a real one was supplied.
    pub fn bearer_token(&self) -> Option<&str> {
        match self.authorization.as_deref() {
            Some(AUTHORIZATION_PLACEHOLDER) | None => None,
            Some(value) => value.strip_prefix("Bearer "),
        }
    }

    /// The `requestid` header value (same as the signature).
    pub fn request_id(&self) -> &str {
        &self.signature
    }

    /// Headers in wire casing and order.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(10);

        if let Some(content_type) = &self.content_type {
            pairs.push(("Content-Type", content_type.clone()));
        }
        if let Some(authorization) = &self.authorization {
            pairs.push(("Authorization", authorization.clone()));
        }
        pairs.push(("x-apikey", self.api_key.clone()));
        pairs.push(("Origin", self.origin.clone()));
        pairs.push(("requestid", self.signature.clone()));
        pairs.push(("timestamp", self.timestamp.clone()));
        for (name, value) in FINGERPRINT_HEADERS {
            pairs.push((name, value.to_string()));
        }

        pairs
    }

    /// Looks up a header by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<String> {
        self.pairs()
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// Converts into an `http::HeaderMap` for the transport.
    ///
    /// Header names are lower-cased by `http`; values are kept verbatim.
    pub fn to_header_map(&self) -> Result<HeaderMap, SignerError> {
        let mut map = HeaderMap::with_capacity(10);

        for (name, value) in self.pairs() {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                SignerError::InvalidHeaderValue {
                    header: name,
                    reason: e.to_string(),
                }
            })?;
            let mut header_value =
                HeaderValue::from_str(&value).map_err(|e| SignerError::InvalidHeaderValue {
                    header: name,
                    reason: e.to_string(),
                })?;
            if name == "Authorization" {
                header_value.set_sensitive(true);
            }
            map.insert(header_name, header_value);
        }

        Ok(map)
    }
}
