use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::{env, fmt, fs, str::FromStr};

use crate::signer::{SignerError, SigningCredentials};
use crate::store::SessionTier;

/// Default identity endpoint used to check a bearer token is still live.
pub const DEFAULT_VALIDATION_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/me";

/// Runtime build flavor. Production pins the session store to memory-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(anyhow::anyhow!(
                "Unknown environment `{}` (expected development or production)",
                other
            )),
        }
    }
}

/// Portal client configuration as read from `portal.json`.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    /// Client identifier that enters every request signature.
    pub client_id: String,
    /// Shared HMAC secret.
    pub shared_secret: String,
    /// Value of the `x-apikey` header.
    pub api_key: String,
    /// Value of the `Origin` header.
    pub origin: String,
    /// Backend base URL; endpoints are appended verbatim.
    pub base_url: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub session_tier: SessionTier,
    /// Scopes requested from the identity provider.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_validation_endpoint")]
    pub validation_endpoint: String,
    /// Backing file for the persistent session tier.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

fn default_scopes() -> Vec<String> {
    vec!["User.Read".to_string()]
}

fn default_validation_endpoint() -> String {
    DEFAULT_VALIDATION_ENDPOINT.to_string()
}

impl fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalConfig")
            .field("client_id", &self.client_id)
            .field("shared_secret", &"<redacted>")
            .field("api_key", &self.api_key)
            .field("origin", &self.origin)
            .field("base_url", &self.base_url)
            .field("environment", &self.environment)
            .field("session_tier", &self.session_tier)
            .field("scopes", &self.scopes)
            .field("validation_endpoint", &self.validation_endpoint)
            .field("session_file", &self.session_file)
            .finish()
    }
}

impl PortalConfig {
    /// Parses a config document, expanding `${VAR}` references.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let cfg: PortalConfig = serde_json::from_str(raw)?;
        Ok(expand_config(cfg))
    }

    /// Rejects configurations that would only fail later, at sign time.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(anyhow::anyhow!("`clientId` must not be empty"));
        }
        if self.shared_secret.is_empty() {
            return Err(anyhow::anyhow!("`sharedSecret` must not be empty"));
        }
        if self.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!("`apiKey` must not be empty"));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| anyhow::anyhow!("`baseUrl` `{}` is not a valid URL: {}", self.base_url, e))?;
        url::Url::parse(&self.validation_endpoint).map_err(|e| {
            anyhow::anyhow!(
                "`validationEndpoint` `{}` is not a valid URL: {}",
                self.validation_endpoint,
                e
            )
        })?;
        self.signing_credentials()?;
        Ok(())
    }

    pub fn signing_credentials(&self) -> Result<SigningCredentials, SignerError> {
        SigningCredentials::new(
            self.client_id.clone(),
            self.shared_secret.as_bytes(),
            self.api_key.clone(),
            self.origin.clone(),
        )
    }
}

/// Finds the config file: `$PORTAL_CONFIG`, then
/// `$XDG_CONFIG_HOME/portal/portal.json`, then `./portal.json`.
pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    resolve_config_path_from(|name| env::var(name).ok(), Path::new("."))
}

fn resolve_config_path_from(
    var: impl Fn(&str) -> Option<String>,
    cwd: &Path,
) -> anyhow::Result<PathBuf> {
    if let Some(p) = var("PORTAL_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Some(xdg) = var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("portal").join("portal.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = cwd.join("portal.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find portal.json (set PORTAL_CONFIG or create ./portal.json)"
    ))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_config(cfg: PortalConfig) -> PortalConfig {
    let mut cfg = cfg;

    cfg.client_id = expand_env_vars(&cfg.client_id);
    cfg.shared_secret = expand_env_vars(&cfg.shared_secret);
    cfg.api_key = expand_env_vars(&cfg.api_key);
    cfg.origin = expand_env_vars(&cfg.origin);
    cfg.base_url = expand_env_vars(&cfg.base_url);
    cfg.validation_endpoint = expand_env_vars(&cfg.validation_endpoint);
    cfg.scopes = cfg.scopes.into_iter().map(|s| expand_env_vars(&s)).collect();
    if let Some(path) = cfg.session_file.as_mut() {
        *path = PathBuf::from(expand_env_vars(&path.to_string_lossy()));
    }

    cfg
}

/// Loads, expands and validates the portal configuration.
///
/// `PORTAL_ENV` overrides the `environment` field when set.
pub fn load_config() -> anyhow::Result<PortalConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path, env::var("PORTAL_ENV").ok().as_deref())
}

/// Loads `path`, applying an optional environment override.
pub fn load_config_from(
    path: &Path,
    environment_override: Option<&str>,
) -> anyhow::Result<PortalConfig> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let mut cfg = PortalConfig::from_json_str(&raw)?;

    if let Some(environment) = environment_override {
        cfg.environment = environment.parse()?;
    }

    cfg.validate()?;
    Ok(cfg)
}
