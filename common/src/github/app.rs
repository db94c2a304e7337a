// GitHub App authentication: a short-lived RS256 app JWT is exchanged for
// an installation access token

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{GithubAppConfig, GithubConfig};
use crate::errors::GithubError;

/// GitHub caps app JWT lifetime at 10 minutes
const JWT_EXPIRATION_SECS: i64 = 10 * 60;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
}

/// A GitHub App identity backed by its RSA private key
pub struct GithubApp {
    app_id: String,
    key: EncodingKey,
}

impl std::fmt::Debug for GithubApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubApp")
            .field("app_id", &self.app_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl GithubApp {
    pub fn new(app_id: impl Into<String>, private_key_pem: &[u8]) -> Result<Self, GithubError> {
        let key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| GithubError::AppAuth(format!("Invalid RSA private key: {}", e)))?;

        Ok(Self {
            app_id: app_id.into(),
            key,
        })
    }

    pub async fn from_config(config: &GithubAppConfig) -> Result<Self, GithubError> {
        let pem = tokio::fs::read(&config.private_key_path).await.map_err(|e| {
            GithubError::AppAuth(format!(
                "Failed to read private key {}: {}",
                config.private_key_path, e
            ))
        })?;
        Self::new(&config.app_id, &pem)
    }

    /// Mint the app JWT (`iss` = app id, 10-minute expiry)
    pub fn generate_jwt(&self) -> Result<String, GithubError> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now,
            exp: now + JWT_EXPIRATION_SECS,
            iss: self.app_id.clone(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| GithubError::AppAuth(format!("Failed to sign app JWT: {}", e)))
    }

    /// Exchange the app JWT for an installation access token
    #[instrument(skip(self))]
    pub async fn installation_token(
        &self,
        api_url: &str,
        installation_id: &str,
    ) -> Result<String, GithubError> {
        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            api_url.trim_end_matches('/'),
            installation_id
        );

        let client = reqwest::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(jwt)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "release-bot")
            .send()
            .await
            .map_err(|e| GithubError::AppAuth(format!("Token exchange request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GithubError::AppAuth(format!(
                "Token exchange returned {}: {}",
                status, body
            )));
        }

        let token: InstallationToken = response
            .json()
            .await
            .map_err(|e| GithubError::AppAuth(format!("Invalid token response: {}", e)))?;

        debug!("github app installation token obtained");
        Ok(token.token)
    }
}

/// Resolve the effective API token: an installation token when App
/// credentials are configured, the static token otherwise
pub async fn resolve_token(github: &GithubConfig) -> Result<String, GithubError> {
    match &github.app {
        Some(app_config) => {
            let app = GithubApp::from_config(app_config).await?;
            app.installation_token(&github.api_url, &app_config.installation_id)
                .await
        }
        None => Ok(github.token.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_private_key_is_rejected() {
        let err = GithubApp::new("12345", b"not a pem").unwrap_err();
        assert!(matches!(err, GithubError::AppAuth(_)));
    }

    #[tokio::test]
    async fn test_missing_key_file_is_an_error() {
        let config = GithubAppConfig {
            app_id: "12345".to_string(),
            installation_id: "67890".to_string(),
            private_key_path: "/nonexistent/key.pem".to_string(),
        };
        let err = GithubApp::from_config(&config).await.unwrap_err();
        assert!(matches!(err, GithubError::AppAuth(_)));
    }

    #[tokio::test]
    async fn test_resolve_token_without_app_uses_static_token() {
        let github = GithubConfig {
            token: "sometoken".to_string(),
            api_url: "https://api.github.com".to_string(),
            username: None,
            webhook_secret: None,
            app: None,
        };
        let token = resolve_token(&github).await.unwrap();
        assert_eq!(token, "sometoken");
    }
}
