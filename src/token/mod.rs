//! Token lifecycle: expiry inspection and refresh.
//!
//! A held token moves `Fresh -> Expiring -> {refreshed silently | refreshed
//! interactively | refresh failed}`. Refresh failure is terminal and means the
//! user has to log in again.
//!
//! ## Usage
//!
//! ```ignore
//! let tokens = TokenManager::new(provider, TokenRequest::new(scopes));
//! let token = tokens.valid_token(held.as_deref(), &account).await?;
//! ```

mod claims;
mod manager;
mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use claims::{REFRESH_WINDOW_SECONDS, TokenStatus, inspect_token, is_token_expiring, token_expiry};
pub use manager::{TokenError, TokenManager};
pub use provider::{
    Account, AuthenticationResult, IdentityProvider, ProviderError, ProviderErrorCode,
    ProviderFuture, TokenRequest,
};

#[cfg(test)]
pub(crate) use claims::test_tokens;
