use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;

use chatlink_core::config::PortalConfig;
use chatlink_core::domain::integration::{Integration, IntegrationId};
use chatlink_crm::{OAuthClient, PortalClient, PortalCredentials};
use chatlink_db::repositories::{IntegrationRepository, SqlIntegrationRepository};
use chatlink_db::DbPool;

use crate::error::{bad_request, db_error, engine_error, ApiFailure};

#[derive(Clone)]
pub struct ApiState {
    pub db_pool: DbPool,
    pub portal: PortalSettings,
}

#[derive(Clone)]
pub struct PortalSettings {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub oauth_token_url: String,
    pub callback_base_url: Option<String>,
    pub linking_token_ttl_minutes: u64,
    pub http_timeout_secs: u64,
}

impl From<&PortalConfig> for PortalSettings {
    fn from(config: &PortalConfig) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            oauth_token_url: config.oauth_token_url.clone(),
            callback_base_url: config.callback_base_url.clone(),
            linking_token_ttl_minutes: config.linking_token_ttl_minutes,
            http_timeout_secs: config.http_timeout_secs,
        }
    }
}

impl ApiState {
    pub fn new(db_pool: DbPool, config: &PortalConfig) -> Self {
        Self { db_pool, portal: PortalSettings::from(config) }
    }

    pub fn oauth_client(&self) -> Result<OAuthClient, ApiFailure> {
        match (&self.portal.client_id, &self.portal.client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(OAuthClient::new(
                self.portal.oauth_token_url.clone(),
                client_id.clone(),
                client_secret.clone(),
            )),
            _ => Err(bad_request("portal oauth credentials are not configured")),
        }
    }

    pub fn callback_base_url(&self) -> Result<&str, ApiFailure> {
        self.portal
            .callback_base_url
            .as_deref()
            .ok_or_else(|| bad_request("portal.callback_base_url is not configured"))
    }

    pub fn portal_client(&self, integration: &Integration) -> Result<PortalClient, ApiFailure> {
        let credentials = if let Some(webhook_url) = &integration.webhook_url {
            PortalCredentials::Webhook { base_url: webhook_url.clone() }
        } else {
            match (&integration.domain, &integration.access_token) {
                (Some(domain), Some(access_token)) => PortalCredentials::OAuth {
                    domain: domain.clone(),
                    access_token: access_token.clone(),
                },
                _ => {
                    return Err(bad_request(
                        "integration has no usable portal credentials; authorize it first",
                    ))
                }
            }
        };

        PortalClient::new(credentials, Duration::from_secs(self.portal.http_timeout_secs))
            .map_err(|e| bad_request(e.to_string()))
    }

    pub async fn load_integration(&self, id: &str) -> Result<Integration, ApiFailure> {
        SqlIntegrationRepository::new(self.db_pool.clone())
            .find_by_id(&IntegrationId(id.to_string()))
            .await
            .map_err(db_error)?
            .ok_or_else(|| {
                engine_error(chatlink_core::EngineError::not_found(format!(
                    "integration `{id}`"
                )))
            })
    }
}

/// Client-boundary view of an Integration. Carries booleans derived from
/// the stored tokens, never the tokens themselves.
#[derive(Debug, Serialize)]
pub struct IntegrationView {
    pub id: String,
    pub workspace_id: String,
    pub platform: String,
    pub domain: Option<String>,
    pub member_id: Option<String>,
    pub connector_id: Option<String>,
    pub registered: bool,
    pub activated: bool,
    pub connection_verified_at: Option<String>,
    pub bot_id: Option<String>,
    pub bot_enabled: bool,
    pub robot_registered: bool,
    pub sms_provider_registered: bool,
    pub active: bool,
    pub has_tokens: bool,
    pub token_refresh_failed: bool,
    pub token_expires_at: Option<String>,
    pub webhook_configured: bool,
    pub last_synced_at: Option<String>,
}

impl From<&Integration> for IntegrationView {
    fn from(integration: &Integration) -> Self {
        let stamp = |value: &Option<DateTime<Utc>>| value.map(|dt| dt.to_rfc3339());
        Self {
            id: integration.id.0.clone(),
            workspace_id: integration.workspace_id.0.clone(),
            platform: integration.platform.as_str().to_string(),
            domain: integration.domain.clone(),
            member_id: integration.member_id.clone(),
            connector_id: integration.connector_id.clone(),
            registered: integration.registered,
            activated: integration.activated,
            connection_verified_at: stamp(&integration.connection_verified_at),
            bot_id: integration.bot_id.clone(),
            bot_enabled: integration.bot_enabled,
            robot_registered: integration.robot_registered,
            sms_provider_registered: integration.sms_provider_registered,
            active: integration.active,
            has_tokens: integration.access_token.is_some(),
            token_refresh_failed: integration.token_refresh_failed,
            token_expires_at: stamp(&integration.token_expires_at),
            webhook_configured: integration.webhook_url.is_some(),
            last_synced_at: stamp(&integration.last_synced_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};

    use super::IntegrationView;

    #[test]
    fn view_never_carries_token_values() {
        let mut integration =
            Integration::new(WorkspaceId("ws-1".to_string()), Platform::OpenChannels);
        integration.access_token = Some("super-secret".to_string());
        integration.refresh_token = Some("even-more-secret".to_string());

        let view = IntegrationView::from(&integration);
        let serialized = serde_json::to_string(&view).expect("serialize");

        assert!(!serialized.contains("super-secret"));
        assert!(!serialized.contains("even-more-secret"));
        assert!(view.has_tokens);
    }
}
