//! Command-line interface
//!
//! Every flag has an environment fallback so the server can be configured
//! entirely from the environment.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use dualauth::config::{DEFAULT_BACKEND_NAME, GOOGLE_TOKEN_URL};
use dualauth::{
    BackendConfig, BackendTokenManager, GoogleConfig, GoogleIdentityProvider, HttpBackendBridge,
    SessionTokenManager, SigningKey, TokenCodec, TokenPolicy,
};
use secrecy::SecretString;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::AppState;
use crate::error::{ServerError, ServerResult};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// dualauth-server - identity exchange and token refresh bridge
#[derive(Parser, Debug)]
#[command(
    name = "dualauth-server",
    version,
    about = "Dual-token authentication bridge server",
    author
)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "DUALAUTH_BIND", default_value = "127.0.0.1:8081")]
    pub bind: SocketAddr,

    /// Secret signing session tokens (HS256)
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Session access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_LIFETIME_SECS", default_value_t = 20)]
    pub access_lifetime_secs: u64,

    /// Session refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_LIFETIME_SECS", default_value_t = 30 * 24 * 60 * 60)]
    pub refresh_lifetime_secs: u64,

    /// Google OAuth client id
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: String,

    /// Google OAuth client secret
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: String,

    /// Redirect URI registered with Google
    #[arg(long, env = "GOOGLE_REDIRECT_URI")]
    pub google_redirect_uri: String,

    /// Google token endpoint
    #[arg(long, env = "GOOGLE_TOKEN_URL", default_value = GOOGLE_TOKEN_URL)]
    pub google_token_url: String,

    /// Resource-server endpoint converting identity tokens
    #[arg(long, env = "BACKEND_CONVERT_URL")]
    pub backend_convert_url: String,

    /// Resource-server token endpoint
    #[arg(long, env = "BACKEND_TOKEN_URL")]
    pub backend_token_url: String,

    /// Client id registered with the resource server
    #[arg(long, env = "BACKEND_CLIENT_ID")]
    pub backend_client_id: String,

    /// Client secret registered with the resource server
    #[arg(long, env = "BACKEND_CLIENT_SECRET", hide_env_values = true)]
    pub backend_client_secret: String,

    /// Social backend name sent to the resource server
    #[arg(long, env = "BACKEND_NAME", default_value = DEFAULT_BACKEND_NAME)]
    pub backend_name: String,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Session token lifetimes
    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            access_lifetime_secs: self.access_lifetime_secs,
            refresh_lifetime_secs: self.refresh_lifetime_secs,
            ..TokenPolicy::default()
        }
    }

    /// Google client settings
    pub fn google_config(&self) -> GoogleConfig {
        GoogleConfig::new(
            self.google_client_id.clone(),
            self.google_client_secret.clone(),
            self.google_redirect_uri.clone(),
        )
        .with_token_url(self.google_token_url.clone())
    }

    /// Resource-server client settings
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            convert_url: self.backend_convert_url.clone(),
            token_url: self.backend_token_url.clone(),
            client_id: self.backend_client_id.clone(),
            client_secret: SecretString::new(self.backend_client_secret.clone()),
            backend: self.backend_name.clone(),
        }
    }

    /// Build the handler state.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Auth` if the secret, the lifetimes or an HTTP
    /// client are invalid.
    pub fn app_state(&self) -> ServerResult<AppState> {
        let codec = TokenCodec::new(&SigningKey::new(self.jwt_secret.clone())?);
        let session = SessionTokenManager::new(codec, self.token_policy())?;
        let backend = BackendTokenManager::new(Arc::new(HttpBackendBridge::new(self.backend_config())?));
        let idp = GoogleIdentityProvider::new(self.google_config())?;
        Ok(AppState::new(session, backend, Arc::new(idp)))
    }

    /// Bind the listen address.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address is unavailable.
    pub async fn bind(&self) -> ServerResult<tokio::net::TcpListener> {
        tokio::net::TcpListener::bind(self.bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.bind.to_string(),
                source,
            })
    }

    /// Initialize the tracing subscriber. `RUST_LOG` overrides `-v`.
    pub fn init_tracing(&self) {
        let level = match self.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

        match self.log_format {
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init(),
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 17] = [
        "dualauth-server",
        "--jwt-secret",
        "cli-test-secret-at-least-32-bytes-long",
        "--google-client-id",
        "gid",
        "--google-client-secret",
        "gsecret",
        "--google-redirect-uri",
        "https://app.example.com/api/auth/callback",
        "--backend-convert-url",
        "https://api.example.com/auth/convert-token",
        "--backend-token-url",
        "https://api.example.com/auth/token",
        "--backend-client-id",
        "bid",
        "--backend-client-secret",
        "bsecret",
    ];

    #[test]
    fn test_cli_parsing_defaults() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();
        assert_eq!(cli.bind, "127.0.0.1:8081".parse::<SocketAddr>().unwrap());
        assert_eq!(cli.access_lifetime_secs, 20);
        assert_eq!(cli.refresh_lifetime_secs, 2_592_000);
        assert_eq!(cli.google_token_url, GOOGLE_TOKEN_URL);
        assert_eq!(cli.backend_name, DEFAULT_BACKEND_NAME);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_verbosity_and_format() {
        let mut args = REQUIRED.to_vec();
        args.extend(["-vv", "--log-format", "json"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_app_state_from_flags() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();
        let state = cli.app_state().unwrap();
        assert_eq!(state.session.policy().access_lifetime_secs, 20);
        assert_eq!(state.idp.name(), "google");
    }

    #[test]
    fn test_invalid_lifetimes_rejected() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--access-lifetime-secs", "0"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.app_state(), Err(ServerError::Auth(_))));
    }
}
