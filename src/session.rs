//! Explicit session context: created at login, disposed at logout.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::signer::{HttpMethod, RequestSigner, SignedRequestHeaders, SignerError};
use crate::store::{FileStorage, SessionStorages, SessionStore};
use crate::token::{Account, IdentityProvider, TokenError, TokenManager, TokenRequest};

/// Everything one signed-in user needs to talk to the backend.
///
/// Request preparation is strictly sequential: the token is resolved (and
/// refreshed if needed) before the headers are signed with it.
pub struct PortalSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    account: Account,
    store: SessionStore,
    signer: Arc<RequestSigner>,
    tokens: TokenManager,
    current_token: RwLock<Option<String>>,
}

/// Errors building a session from configuration.
#[derive(Debug)]
pub enum SessionSetupError {
    Signer(SignerError),
}

impl std::fmt::Display for SessionSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signer(e) => write!(f, "Invalid signing configuration: {}", e),
        }
    }
}

impl std::error::Error for SessionSetupError {}

impl PortalSession {
    /// Starts a session for `account` from already built parts.
    pub fn start(
        account: Account,
        store: SessionStore,
        signer: Arc<RequestSigner>,
        tokens: TokenManager,
    ) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            account,
            store,
            signer,
            tokens,
            current_token: RwLock::new(None),
        };
        info!(
            session_id = %session.id,
            tier = %session.store.tier(),
            "Portal session started for {}",
            session.account.username
        );
        session
    }

    /// Builds signer, store and token manager from `config`.
    ///
    /// The session file is only opened outside production. If it cannot be
    /// opened the persistent tier falls back to process memory.
    pub fn from_config(
        config: &PortalConfig,
        provider: Arc<dyn IdentityProvider>,
        account: Account,
    ) -> Result<Self, SessionSetupError> {
        let credentials = config
            .signing_credentials()
            .map_err(SessionSetupError::Signer)?;
        let signer = Arc::new(RequestSigner::new(credentials));

        let mut storages = SessionStorages::in_memory();
        if let Some(path) = &config.session_file
            && !config.environment.is_production()
        {
            match FileStorage::open(path) {
                Ok(storage) => storages.persistent = Arc::new(storage),
                Err(e) => error!(
                    "Session file {} unavailable, persistent tier kept in memory: {}",
                    path.display(),
                    e
                ),
            }
        }
        let store = SessionStore::with_storages(config.session_tier, config.environment, storages);

        let tokens = TokenManager::new(provider, TokenRequest::new(config.scopes.clone()))
            .with_validation_endpoint(config.validation_endpoint.clone());

        Ok(Self::start(account, store, signer, tokens))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn signer(&self) -> &Arc<RequestSigner> {
        &self.signer
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Seeds the held token, e.g. with the one returned by the login flow.
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.current_token.write().await = Some(token.into());
    }

    /// Returns a token that is not about to expire, refreshing if needed.
    ///
    /// A terminal refresh failure drops the held token.
    pub async fn access_token(&self) -> Result<String, TokenError> {
        let held = self.current_token.read().await.clone();

        match self.tokens.valid_token(held.as_deref(), &self.account).await {
            Ok(token) => {
                if held.as_deref() != Some(token.as_str()) {
                    *self.current_token.write().await = Some(token.clone());
                }
                Ok(token)
            }
            Err(e) => {
                warn!(session_id = %self.id, "Dropping held token: {}", e);
                *self.current_token.write().await = None;
                Err(e)
            }
        }
    }

    /// Resolves the token, then signs `method` with it.
    pub async fn signed_headers(
        &self,
        method: HttpMethod,
    ) -> Result<SignedRequestHeaders, TokenError> {
        let token = self.access_token().await?;
        Ok(self.signer.sign(method, Some(&token)))
    }

    /// Like [`signed_headers`](Self::signed_headers) with an explicit content type.
    pub async fn signed_headers_with_content_type(
        &self,
        method: HttpMethod,
        content_type: &str,
    ) -> Result<SignedRequestHeaders, TokenError> {
        let token = self.access_token().await?;
        Ok(self
            .signer
            .sign_with_content_type(method, Some(&token), content_type))
    }

    /// Ends the session: clears the active tier and forgets the token.
    pub async fn dispose(self) {
        let cleared = self.store.clear();
        *self.current_token.write().await = None;
        info!(
            session_id = %self.id,
            store_cleared = cleared,
            "Portal session disposed for {}",
            self.account.username
        );
    }
}
