//! The identity-provider session this crate renews tokens through.
//!
//! The provider owns the token state; the manager only asks it for a new
//! token and treats the answer as an immutable replacement.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signed-in account the provider renews tokens for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Provider-side account identifier.
    pub home_account_id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Account {
    pub fn new(home_account_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            home_account_id: home_account_id.into(),
            username: username.into(),
            name: None,
        }
    }
}

/// Scopes requested with every acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    pub scopes: Vec<String>,
}

impl TokenRequest {
    pub fn new(scopes: Vec<String>) -> Self {
        Self { scopes }
    }
}

/// Successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResult {
    /// Bearer token; empty when the provider answered without one.
    pub access_token: String,
    pub expires_on: Option<DateTime<Utc>>,
    pub account: Option<Account>,
}

impl AuthenticationResult {
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_on: None,
            account: None,
        }
    }
}

/// Provider error code, as reported on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    ConsentRequired,
    InteractionRequired,
    LoginRequired,
    /// The user closed or abandoned the interactive prompt.
    UserCancelled,
    Other(String),
}

impl ProviderErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "consent_required" => Self::ConsentRequired,
            "interaction_required" => Self::InteractionRequired,
            "login_required" => Self::LoginRequired,
            "user_cancelled" => Self::UserCancelled,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ConsentRequired => "consent_required",
            Self::InteractionRequired => "interaction_required",
            Self::LoginRequired => "login_required",
            Self::UserCancelled => "user_cancelled",
            Self::Other(code) => code,
        }
    }

    /// Whether an interactive login can resolve this failure.
    pub fn requires_interaction(&self) -> bool {
        matches!(
            self,
            Self::ConsentRequired | Self::InteractionRequired | Self::LoginRequired
        )
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failed acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Builds an error from a wire code such as `interaction_required`.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::from_code(code), message)
    }

    pub fn requires_interaction(&self) -> bool {
        self.code.requires_interaction()
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Boxed future returned by [`IdentityProvider`] methods.
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AuthenticationResult, ProviderError>> + Send + 'a>>;

/// Identity-provider session able to renew tokens.
///
/// Implementations must tolerate concurrent calls for the same account.
pub trait IdentityProvider: Send + Sync {
    /// Renews the token for `account` without prompting the user.
    fn acquire_token_silent<'a>(
        &'a self,
        request: &'a TokenRequest,
        account: &'a Account,
    ) -> ProviderFuture<'a>;

    /// Runs the user-facing login prompt.
    fn login_interactive<'a>(&'a self, request: &'a TokenRequest) -> ProviderFuture<'a>;
}
