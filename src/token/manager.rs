//! Token refresh with silent-to-interactive escalation.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::claims::{TokenStatus, inspect_token};
use super::provider::{
    Account, AuthenticationResult, IdentityProvider, ProviderError, ProviderErrorCode,
    TokenRequest,
};
use crate::clock::{Clock, SystemClock};
use crate::config::DEFAULT_VALIDATION_ENDPOINT;

/// Refresh failure. Every variant is terminal: the user must log in again,
/// and retrying the refresh will not help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Silent renewal failed for a reason user interaction cannot fix.
    SilentRefreshFailed(ProviderError),
    /// The interactive login failed or was abandoned.
    InteractiveRefreshFailed(ProviderError),
}

impl TokenError {
    /// The provider error that ended the refresh.
    pub fn cause(&self) -> &ProviderError {
        match self {
            Self::SilentRefreshFailed(e) | Self::InteractiveRefreshFailed(e) => e,
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SilentRefreshFailed(e) => write!(
                f,
                "Token refresh failed. Please login again. (silent refresh: {})",
                e
            ),
            Self::InteractiveRefreshFailed(e) => write!(
                f,
                "Token refresh failed. Please login again. (interactive login: {})",
                e
            ),
        }
    }
}

impl std::error::Error for TokenError {}

/// Decides when a token needs renewing and renews it through the provider.
///
/// One silent attempt, then at most one interactive attempt. No retries and
/// no de-duplication of concurrent refreshes.
pub struct TokenManager {
    provider: Arc<dyn IdentityProvider>,
    request: TokenRequest,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    validation_endpoint: String,
}

impl TokenManager {
    pub fn new(provider: Arc<dyn IdentityProvider>, request: TokenRequest) -> Self {
        Self {
            provider,
            request,
            clock: Arc::new(SystemClock),
            http: reqwest::Client::new(),
            validation_endpoint: DEFAULT_VALIDATION_ENDPOINT.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_validation_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.validation_endpoint = endpoint.into();
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn request(&self) -> &TokenRequest {
        &self.request
    }

    /// Classifies `token` against the manager's clock.
    pub fn inspect(&self, token: &str) -> TokenStatus {
        inspect_token(token, self.clock.now())
    }

    /// True when `token` is malformed or expires within five minutes.
    pub fn is_expiring(&self, token: &str) -> bool {
        self.inspect(token).needs_refresh()
    }

    /// Obtains a new bearer token for `account`.
    ///
    /// Falls back to an interactive login only when the silent failure is
    /// `consent_required`, `interaction_required` or `login_required`.
    pub async fn get_fresh_token(&self, account: &Account) -> Result<String, TokenError> {
        info!("Getting fresh token for {}", account.username);

        let silent = self
            .provider
            .acquire_token_silent(&self.request, account)
            .await
            .and_then(require_access_token);

        let failure = match silent {
            Ok(token) => {
                info!("Fresh token obtained");
                return Ok(token);
            }
            Err(e) => e,
        };

        warn!(code = %failure.code, "Silent token refresh failed: {}", failure.message);

        if !failure.requires_interaction() {
            error!("Token refresh failed, re-authentication required");
            return Err(TokenError::SilentRefreshFailed(failure));
        }

        info!("Silent refresh needs user interaction, trying interactive login");

        match self
            .provider
            .login_interactive(&self.request)
            .await
            .and_then(require_access_token)
        {
            Ok(token) => {
                info!("Interactive login successful");
                Ok(token)
            }
            Err(e) => {
                error!(code = %e.code, "Interactive login failed: {}", e.message);
                Err(TokenError::InteractiveRefreshFailed(e))
            }
        }
    }

    /// Returns `current` if it is still fresh, otherwise a refreshed token.
    pub async fn valid_token(
        &self,
        current: Option<&str>,
        account: &Account,
    ) -> Result<String, TokenError> {
        if let Some(token) = current {
            match self.inspect(token) {
                TokenStatus::Fresh { expires_at } => {
                    debug!("Held token is fresh until {}", expires_at);
                    return Ok(token.to_string());
                }
                status => debug!("Held token needs refresh: {:?}", status),
            }
        }

        self.get_fresh_token(account).await
    }

    /// Checks the token against the identity endpoint.
    ///
    /// Any failure, including a network error, counts as invalid.
    pub async fn validate_token_with_graph(&self, token: &str) -> bool {
        let result = self
            .http
            .get(&self.validation_endpoint)
            .bearer_auth(token)
            .header(http::header::CONTENT_TYPE, "application/json")
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Token rejected by identity endpoint: HTTP {}", response.status());
                false
            }
            Err(e) => {
                error!("Token validation failed: {}", e);
                false
            }
        }
    }
}

fn require_access_token(result: AuthenticationResult) -> Result<String, ProviderError> {
    if result.access_token.is_empty() {
        return Err(ProviderError::new(
            ProviderErrorCode::Other("no_access_token".to_string()),
            "No access token received",
        ));
    }
    Ok(result.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::token::claims::test_tokens::expiring_at;
    use crate::token::testing::ScriptedProvider;

    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::get};

    const NOW: i64 = 1_704_067_200;

    fn account() -> Account {
        Account::new("oid.tid", "ada@example.com")
    }

    fn manager(provider: Arc<ScriptedProvider>) -> TokenManager {
        TokenManager::new(provider, TokenRequest::new(vec!["User.Read".to_string()]))
            .with_clock(Arc::new(FixedClock::from_unix(NOW)))
    }

    #[tokio::test]
    async fn test_silent_success_skips_interactive() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(AuthenticationResult::with_token("silent-token")),
            Ok(AuthenticationResult::with_token("interactive-token")),
        ));
        let tokens = manager(provider.clone());

        assert_eq!(tokens.get_fresh_token(&account()).await.unwrap(), "silent-token");
        assert_eq!(provider.silent_calls(), 1);
        assert_eq!(provider.interactive_calls(), 0);
    }

    #[tokio::test]
    async fn test_interaction_required_escalates_once() {
        let provider = Arc::new(ScriptedProvider::new(
            Err(ProviderError::from_code("interaction_required", "AADSTS50058")),
            Ok(AuthenticationResult::with_token("interactive-token")),
        ));
        let tokens = manager(provider.clone());

        assert_eq!(
            tokens.get_fresh_token(&account()).await.unwrap(),
            "interactive-token"
        );
        assert_eq!(provider.silent_calls(), 1);
        assert_eq!(provider.interactive_calls(), 1);
    }

    #[tokio::test]
    async fn test_each_interaction_code_escalates() {
        for code in ["consent_required", "login_required"] {
            let provider = Arc::new(ScriptedProvider::new(
                Err(ProviderError::from_code(code, "needs user")),
                Ok(AuthenticationResult::with_token("interactive-token")),
            ));
            let tokens = manager(provider.clone());
            assert!(tokens.get_fresh_token(&account()).await.is_ok());
            assert_eq!(provider.interactive_calls(), 1, "{code}");
        }
    }

    #[tokio::test]
    async fn test_interactive_failure_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new(
            Err(ProviderError::from_code("interaction_required", "AADSTS50058")),
            Err(ProviderError::from_code("user_cancelled", "popup closed")),
        ));
        let tokens = manager(provider.clone());

        let err = tokens.get_fresh_token(&account()).await.unwrap_err();
        assert!(matches!(err, TokenError::InteractiveRefreshFailed(_)));
        assert_eq!(err.cause().code, ProviderErrorCode::UserCancelled);
        assert!(err.to_string().starts_with("Token refresh failed. Please login again."));
        assert_eq!(provider.interactive_calls(), 1);
    }

    #[tokio::test]
    async fn test_other_silent_failure_does_not_prompt() {
        let provider = Arc::new(ScriptedProvider::new(
            Err(ProviderError::from_code("invalid_grant", "refresh token revoked")),
            Ok(AuthenticationResult::with_token("interactive-token")),
        ));
        let tokens = manager(provider.clone());

        let err = tokens.get_fresh_token(&account()).await.unwrap_err();
        assert!(matches!(err, TokenError::SilentRefreshFailed(_)));
        assert_eq!(provider.interactive_calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_tokens_are_failures() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(AuthenticationResult::with_token("")),
            Ok(AuthenticationResult::with_token("unused")),
        ));
        let err = manager(provider.clone())
            .get_fresh_token(&account())
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::SilentRefreshFailed(_)));
        assert_eq!(provider.interactive_calls(), 0);

        let provider = Arc::new(ScriptedProvider::new(
            Err(ProviderError::from_code("login_required", "expired")),
            Ok(AuthenticationResult::with_token("")),
        ));
        let err = manager(provider).get_fresh_token(&account()).await.unwrap_err();
        assert!(matches!(err, TokenError::InteractiveRefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_valid_token_keeps_fresh_token() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(AuthenticationResult::with_token("renewed")),
            Ok(AuthenticationResult::with_token("interactive")),
        ));
        let tokens = manager(provider.clone());

        let fresh = expiring_at(NOW + 3600);
        assert_eq!(
            tokens.valid_token(Some(&fresh), &account()).await.unwrap(),
            fresh
        );
        assert_eq!(provider.silent_calls(), 0);

        let stale = expiring_at(NOW + 120);
        assert_eq!(
            tokens.valid_token(Some(&stale), &account()).await.unwrap(),
            "renewed"
        );
        assert_eq!(
            tokens.valid_token(None, &account()).await.unwrap(),
            "renewed"
        );
        assert_eq!(
            tokens.valid_token(Some("garbage"), &account()).await.unwrap(),
            "renewed"
        );
        assert_eq!(provider.silent_calls(), 3);
    }

    #[test]
    fn test_is_expiring_uses_clock() {
        let provider = Arc::new(ScriptedProvider::new(
            Ok(AuthenticationResult::with_token("x")),
            Ok(AuthenticationResult::with_token("y")),
        ));
        let tokens = manager(provider);
        assert!(!tokens.is_expiring(&expiring_at(NOW + 301)));
        assert!(tokens.is_expiring(&expiring_at(NOW + 300)));
        assert!(tokens.is_expiring("not-a-jwt"));
    }

    async fn spawn_identity_endpoint() -> String {
        let app = Router::new().route(
            "/v1.0/me",
            get(|headers: HeaderMap| async move {
                let bearer = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let json_content = headers
                    .get("content-type")
                    .map(|v| v == "application/json")
                    .unwrap_or(false);
                if bearer == "Bearer live-token" && json_content {
                    (StatusCode::OK, Json(serde_json::json!({ "id": "user-1" })))
                } else {
                    (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({ "error": "InvalidAuthenticationToken" })),
                    )
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1.0/me", addr)
    }

    #[tokio::test]
    async fn test_validate_token_with_graph() {
        let endpoint = spawn_identity_endpoint().await;
        let provider = Arc::new(ScriptedProvider::new(
            Ok(AuthenticationResult::with_token("x")),
            Ok(AuthenticationResult::with_token("y")),
        ));
        let tokens = manager(provider).with_validation_endpoint(endpoint);

        assert!(tokens.validate_token_with_graph("live-token").await);
        assert!(!tokens.validate_token_with_graph("revoked-token").await);
    }

    #[tokio::test]
    async fn test_validate_token_fails_closed_on_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let provider = Arc::new(ScriptedProvider::new(
            Ok(AuthenticationResult::with_token("x")),
            Ok(AuthenticationResult::with_token("y")),
        ));
        let tokens =
            manager(provider).with_validation_endpoint(format!("http://{}/v1.0/me", addr));

        assert!(!tokens.validate_token_with_graph("live-token").await);
    }
}
