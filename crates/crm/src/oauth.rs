use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::error;

use crate::client::PortalError;

/// Seam over the vendor token endpoint so the token manager can be tested
/// against a scripted implementation.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, PortalError>;

    async fn exchange_client_credentials(&self) -> Result<TokenSet, PortalError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, PortalError>;
}

/// A complete token set as returned by the platform's token endpoint.
/// Persisted atomically on the Integration in one write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    // Rejection bodies carry only `error`/`error_description`.
    #[serde(default)]
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the platform vendor's OAuth token endpoint. Separate from
/// `PortalClient` because token traffic goes to the vendor host, not the
/// tenant's portal domain.
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl OAuthClient {
    pub fn new(token_url: String, client_id: String, client_secret: SecretString) -> Self {
        Self { http: reqwest::Client::new(), token_url, client_id, client_secret }
    }

    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<TokenSet, PortalError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "oauth token request failed");
                PortalError::Transport(e.to_string())
            })?;

        let status = response.status().as_u16();
        let token: OAuthTokenResponse =
            response.json().await.map_err(|e| PortalError::Decode(e.to_string()))?;

        if let Some(error) = token.error {
            let message = match token.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            return Err(PortalError::Api { status, message });
        }
        if !(200..300).contains(&status) {
            return Err(PortalError::Api {
                status,
                message: "token endpoint returned a non-success response".to_string(),
            });
        }
        if token.access_token.is_empty() {
            return Err(PortalError::Decode(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
        })
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, PortalError> {
        self.request_token(&[("grant_type", "authorization_code"), ("code", code)]).await
    }

    async fn exchange_client_credentials(&self) -> Result<TokenSet, PortalError> {
        self.request_token(&[("grant_type", "client_credentials")]).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, PortalError> {
        self.request_token(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::TokenSet;

    #[test]
    fn token_set_carries_absolute_expiry() {
        let expires_at = Utc::now() + chrono::Duration::seconds(3600);
        let set = TokenSet {
            access_token: "a".to_string(),
            refresh_token: Some("r".to_string()),
            expires_at: Some(expires_at),
        };
        assert_eq!(set.expires_at, Some(expires_at));
    }
}
