//! Credential provider for the Google Drive API.
//!
//! Two credential formats are understood:
//! - the authorized-user `token.json` written by Google's installed-app flow,
//!   refreshed with its refresh token;
//! - a service account key, exchanged for a token with a signed JWT.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::models::{AuthorizedUserCredentials, ServiceAccountCredentials, TokenResponse};

/// Google OAuth2 token endpoint.
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Read-only Google Drive API scope.
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// JWT claims for service account authentication.
#[derive(Debug, Serialize)]
struct Claims {
    iss: String,   // Issuer (service account email)
    scope: String, // OAuth scope
    aud: String,   // Audience (token endpoint)
    exp: u64,      // Expiration time
    iat: u64,      // Issued at
}

/// Only used to tell the credential formats apart.
#[derive(Deserialize)]
struct CredentialKind {
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

enum CredentialSource {
    AuthorizedUser(AuthorizedUserCredentials),
    ServiceAccount(ServiceAccountCredentials),
}

/// Cached access token with expiration. `None` never expires.
#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<SystemTime>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > SystemTime::now() + EXPIRY_MARGIN,
            None => true,
        }
    }
}

/// Authenticator for Google APIs.
#[derive(Clone)]
pub struct Authenticator {
    source: Arc<CredentialSource>,
    client: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create a new authenticator from a credential JSON file.
    ///
    /// A missing or malformed file is a setup error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RelayError::Setup(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Create a new authenticator from the contents of a credential file.
    pub fn from_json(content: &str) -> Result<Self> {
        let kind: CredentialKind = serde_json::from_str(content).map_err(invalid_credentials)?;
        if kind.kind.as_deref() == Some("service_account") {
            let credentials: ServiceAccountCredentials =
                serde_json::from_str(content).map_err(invalid_credentials)?;
            Ok(Self::service_account(credentials))
        } else {
            let credentials: AuthorizedUserCredentials =
                serde_json::from_str(content).map_err(invalid_credentials)?;
            Self::authorized_user(credentials)
        }
    }

    /// Create an authenticator for a signed-in user.
    ///
    /// A stored access token is used as-is until its expiry.
    pub fn authorized_user(credentials: AuthorizedUserCredentials) -> Result<Self> {
        let cached = match credentials.token.as_deref() {
            Some(token) if !token.is_empty() => Some(CachedToken {
                access_token: token.to_string(),
                expires_at: credentials.expiry.as_deref().map(parse_expiry).transpose()?,
            }),
            _ => None,
        };

        Ok(Self {
            source: Arc::new(CredentialSource::AuthorizedUser(credentials)),
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(cached)),
        })
    }

    /// Create an authenticator from service account credentials.
    pub fn service_account(credentials: ServiceAccountCredentials) -> Self {
        Self {
            source: Arc::new(CredentialSource::ServiceAccount(credentials)),
            client: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_valid()) {
                return Ok(token.access_token.clone());
            }
        }

        let new_token = match self.source.as_ref() {
            CredentialSource::AuthorizedUser(credentials) => {
                self.refresh_user_token(credentials).await?
            }
            CredentialSource::ServiceAccount(credentials) => {
                self.request_service_token(credentials).await?
            }
        };

        {
            let mut cached = self.cached_token.write().await;
            *cached = Some(new_token.clone());
        }

        Ok(new_token.access_token)
    }

    /// Exchange the stored refresh token for a new access token.
    async fn refresh_user_token(&self, credentials: &AuthorizedUserCredentials) -> Result<CachedToken> {
        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .ok_or_else(|| RelayError::Setup("no valid token and no refresh token".to_string()))?;
        let token_uri = credentials.token_uri.as_deref().unwrap_or(TOKEN_URI);

        debug!(token_uri, "Refreshing user access token");

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", credentials.client_id.as_deref().unwrap_or_default()),
            ("client_secret", credentials.client_secret.as_deref().unwrap_or_default()),
        ];

        let token = self.exchange(token_uri, &params).await?;
        info!("Refreshed Google Drive access token");
        Ok(token)
    }

    /// Request an access token using a JWT assertion.
    async fn request_service_token(&self, credentials: &ServiceAccountCredentials) -> Result<CachedToken> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| RelayError::TokenRefresh(e.to_string()))?
            .as_secs();
        let token_uri = credentials.token_uri.as_deref().unwrap_or(TOKEN_URI);

        let claims = Claims {
            iss: credentials.client_email.clone(),
            scope: DRIVE_SCOPE.to_string(),
            aud: token_uri.to_string(),
            iat: now,
            exp: now + 3600, // 1 hour
        };

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(credentials.private_key.as_bytes())?;
        let jwt = encode(&header, &claims, &key)?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", jwt.as_str()),
        ];

        self.exchange(token_uri, &params).await
    }

    async fn exchange(&self, token_uri: &str, params: &[(&str, &str)]) -> Result<CachedToken> {
        let response = self.client.post(token_uri).form(params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::TokenRefresh(format!(
                "Status {}: {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response.json().await?;

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at: Some(SystemTime::now() + Duration::from_secs(token_response.expires_in)),
        })
    }
}

fn invalid_credentials(e: serde_json::Error) -> RelayError {
    RelayError::Setup(format!("invalid credential file: {}", e))
}

fn parse_expiry(expiry: &str) -> Result<SystemTime> {
    OffsetDateTime::parse(expiry, &Rfc3339)
        .map(SystemTime::from)
        .map_err(|e| RelayError::Setup(format!("invalid token expiry {:?}: {}", expiry, e)))
}
