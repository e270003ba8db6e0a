// Core modules
pub mod clock;
pub mod config;
pub mod signer;
pub mod store;
pub mod token;

// Collaborators built on the core
pub mod api;
pub mod session;

// Re-export key types
pub use api::{ApiClient, ApiError};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{Environment, PortalConfig, load_config};
pub use session::{PortalSession, SessionSetupError};
pub use signer::{HttpMethod, RequestSigner, SignedRequestHeaders, SignerError, SigningCredentials};
pub use store::{SecurityAssessment, SessionStore, SessionTier, StorageError};
pub use token::{
    Account, IdentityProvider, ProviderError, ProviderErrorCode, TokenError, TokenManager,
    TokenRequest, TokenStatus,
};
