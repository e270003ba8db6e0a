//! Scripted identity provider for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::provider::{
    Account, AuthenticationResult, IdentityProvider, ProviderError, ProviderFuture, TokenRequest,
};

/// Provider that replays fixed answers and counts calls.
pub struct ScriptedProvider {
    silent: Result<AuthenticationResult, ProviderError>,
    interactive: Result<AuthenticationResult, ProviderError>,
    silent_calls: AtomicUsize,
    interactive_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(
        silent: Result<AuthenticationResult, ProviderError>,
        interactive: Result<AuthenticationResult, ProviderError>,
    ) -> Self {
        Self {
            silent,
            interactive,
            silent_calls: AtomicUsize::new(0),
            interactive_calls: AtomicUsize::new(0),
        }
    }

    pub fn silent_calls(&self) -> usize {
        self.silent_calls.load(Ordering::SeqCst)
    }

    pub fn interactive_calls(&self) -> usize {
        self.interactive_calls.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for ScriptedProvider {
    fn acquire_token_silent<'a>(
        &'a self,
        _request: &'a TokenRequest,
        _account: &'a Account,
    ) -> ProviderFuture<'a> {
        self.silent_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.silent.clone();
        Box::pin(async move { answer })
    }

    fn login_interactive<'a>(&'a self, _request: &'a TokenRequest) -> ProviderFuture<'a> {
        self.interactive_calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.interactive.clone();
        Box::pin(async move { answer })
    }
}
