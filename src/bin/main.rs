use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use portal_auth::token::{ProviderFuture, inspect_token};
use portal_auth::{
    Account, ApiClient, Environment, HttpMethod, IdentityProvider, ProviderError, RequestSigner,
    SessionStore, SessionTier, TokenManager, TokenRequest, TokenStatus, load_config,
};

/// The CLI has no login UI; renewal always asks for an interactive login.
struct OfflineProvider;

impl IdentityProvider for OfflineProvider {
    fn acquire_token_silent<'a>(
        &'a self,
        _request: &'a TokenRequest,
        _account: &'a Account,
    ) -> ProviderFuture<'a> {
        Box::pin(async {
            Err(ProviderError::from_code(
                "interaction_required",
                "no cached session in the CLI",
            ))
        })
    }

    fn login_interactive<'a>(&'a self, _request: &'a TokenRequest) -> ProviderFuture<'a> {
        Box::pin(async {
            Err(ProviderError::from_code(
                "user_cancelled",
                "interactive login is not available in the CLI",
            ))
        })
    }
}

#[derive(Parser)]
#[command(name = "portal-auth")]
#[command(about = "Signed request and session diagnostics for the portal API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the signed header set for a request
    Sign {
        #[arg(short, long, default_value = "GET")]
        method: HttpMethod,
        /// Bearer token (placeholder is used when omitted)
        #[arg(long, env = "PORTAL_ACCESS_TOKEN")]
        token: Option<String>,
        /// Omit the Authorization header entirely
        #[arg(long, default_value_t = false)]
        no_auth: bool,
        /// Content type for body-bearing verbs
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Print the security assessment of a session tier
    Assess {
        #[arg(long, default_value = "tab")]
        tier: SessionTier,
        #[arg(long, default_value = "development")]
        environment: Environment,
    },
    /// Report whether a token is fresh, expiring or malformed
    InspectToken { token: String },
    /// Check a token against the configured identity endpoint
    ValidateToken { token: String },
    /// Print the resolved environment configuration
    Env,
    /// Send a signed GET request and print the JSON response
    Get {
        endpoint: String,
        #[arg(long, env = "PORTAL_ACCESS_TOKEN")]
        token: Option<String>,
        #[arg(long, default_value_t = false)]
        no_auth: bool,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{}`", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("portal_auth=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sign {
            method,
            token,
            no_auth,
            content_type,
        } => {
            let config = load_config()?;
            let signer = RequestSigner::new(config.signing_credentials()?);

            let headers = match (no_auth, content_type) {
                (true, _) => signer.sign_unauthenticated(method),
                (false, Some(ct)) => signer.sign_with_content_type(method, token.as_deref(), &ct),
                (false, None) => signer.sign(method, token.as_deref()),
            };

            println!("{} request", method);
            println!(
                "  Data string: {}{}{}",
                method,
                headers.client_id,
                headers.timestamp
            );
            for (name, value) in headers.pairs() {
                println!("  {}: {}", name, value);
            }
        }
        Commands::Assess { tier, environment } => {
            let store = SessionStore::new(tier, environment);
            let report = store.assess_security();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::InspectToken { token } => match inspect_token(&token, chrono::Utc::now()) {
            TokenStatus::Fresh { expires_at } => {
                println!("fresh (expires {})", expires_at.to_rfc3339())
            }
            TokenStatus::Expiring { expires_at } => {
                println!("expiring (expires {})", expires_at.to_rfc3339())
            }
            TokenStatus::Malformed(reason) => println!("malformed ({})", reason),
        },
        Commands::ValidateToken { token } => {
            let config = load_config()?;
            info!("Validating token against {}", config.validation_endpoint);

            let tokens = TokenManager::new(
                Arc::new(OfflineProvider),
                TokenRequest::new(config.scopes.clone()),
            )
            .with_validation_endpoint(config.validation_endpoint.clone());

            if tokens.validate_token_with_graph(&token).await {
                println!("valid");
            } else {
                println!("invalid");
                std::process::exit(1);
            }
        }
        Commands::Env => {
            let config = load_config()?;
            println!("Environment:         {}", config.environment);
            println!("Is production:       {}", config.environment.is_production());
            println!("API base URL:        {}", config.base_url);
            println!("Origin:              {}", config.origin);
            println!("Client id:           {}", config.client_id);
            println!("Requested tier:      {}", config.session_tier);
            let effective = SessionStore::new(config.session_tier, config.environment).tier();
            println!("Effective tier:      {}", effective);
            println!("Validation endpoint: {}", config.validation_endpoint);
            println!("Test API URL:        {}/test", config.base_url.trim_end_matches('/'));
        }
        Commands::Get {
            endpoint,
            token,
            no_auth,
            params,
        } => {
            let config = load_config()?;
            let signer = Arc::new(RequestSigner::new(config.signing_credentials()?));
            let client = ApiClient::new(config.base_url.clone(), signer)?;

            let params: Vec<(&str, &str)> = params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();

            info!("GET {}{}", client.base_url(), endpoint);

            let response = if no_auth {
                client.get_unauthenticated(&endpoint, &params).await?
            } else {
                client.get(&endpoint, &params, token.as_deref()).await?
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
