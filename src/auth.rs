//! Google Cloud credentials for the Vertex backends.
//!
//! Resolution order: an explicit access token in the environment, a service
//! account key file exchanged for a bearer token, then the GCE metadata
//! server. Minted tokens are cached until shortly before expiry.

use crate::error::{GatewayError, Result};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this many seconds before the token actually expires.
const EXPIRY_WINDOW_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Mints and caches OAuth2 bearer tokens for Vertex AI calls.
pub struct GcpTokenProvider {
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl GcpTokenProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cached: Mutex::new(None),
        }
    }

    /// Resolve a bearer token for the cloud-platform scope.
    pub async fn access_token(&self) -> Result<String> {
        if let Ok(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            if !token.is_empty() {
                return Ok(token);
            }
        }

        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at - EXPIRY_WINDOW_SECS > Utc::now().timestamp() {
                return Ok(entry.token.clone());
            }
        }

        let (token, expires_in) = match load_service_account()? {
            Some(key) => {
                debug!(client_email = %key.client_email, "minting token from service account key");
                self.token_from_key(&key).await?
            }
            None => {
                debug!("no service account key, trying metadata server");
                self.token_from_metadata().await?
            }
        };

        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Utc::now().timestamp() + expires_in,
        });
        Ok(token)
    }

    async fn token_from_key(&self, key: &ServiceAccountKey) -> Result<(String, i64)> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: &key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: TOKEN_URI,
            iat: now,
            exp: now + 3600,
        };

        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| GatewayError::auth(format!("invalid service account key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| GatewayError::auth(format!("failed to sign token request: {e}")))?;

        let resp = self
            .client
            .post(TOKEN_URI)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::auth(format!(
                "token exchange failed ({status}): {body}"
            )));
        }

        let token: TokenResponse = resp.json().await?;
        Ok((token.access_token, token.expires_in))
    }

    async fn token_from_metadata(&self) -> Result<(String, i64)> {
        let resp = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                GatewayError::auth(format!(
                    "no Google credentials available (metadata server unreachable: {e})"
                ))
            })?;

        if !resp.status().is_success() {
            return Err(GatewayError::auth(format!(
                "metadata server returned {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp.json().await?;
        Ok((token.access_token, token.expires_in))
    }
}

fn load_service_account() -> Result<Option<ServiceAccountKey>> {
    let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") else {
        return Ok(None);
    };
    if path.is_empty() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        GatewayError::auth(format!("cannot read credentials file {path}: {e}"))
    })?;
    let key: ServiceAccountKey = serde_json::from_str(&contents)
        .map_err(|e| GatewayError::auth(format!("malformed credentials file {path}: {e}")))?;
    Ok(Some(key))
}

/// Project id from the environment, falling back to the credentials file.
pub fn project_id() -> Result<String> {
    for var in ["GOOGLE_CLOUD_PROJECT", "VERTEX_PROJECT_ID"] {
        if let Ok(project) = std::env::var(var) {
            if !project.is_empty() {
                return Ok(project);
            }
        }
    }
    if let Some(key) = load_service_account()? {
        if let Some(project) = key.project_id {
            return Ok(project);
        }
    }
    Err(GatewayError::config(
        "no GCP project configured (set GOOGLE_CLOUD_PROJECT)",
    ))
}

/// Region from the environment, with a per-backend default.
pub fn location(default: &str) -> String {
    for var in ["GOOGLE_CLOUD_LOCATION", "VERTEX_LOCATION"] {
        if let Ok(location) = std::env::var(var) {
            if !location.is_empty() {
                return location;
            }
        }
    }
    default.to_string()
}
