use chrono::Utc;
use tracing::{info, warn};

use chatlink_core::domain::integration::{Integration, IntegrationId};
use chatlink_core::EngineError;
use chatlink_crm::TokenEndpoint;
use chatlink_db::repositories::IntegrationRepository;

use crate::{map_portal_error, map_repo_error};

/// How the caller obtained authorization from the portal.
#[derive(Clone, Debug)]
pub enum TokenGrant {
    AuthorizationCode(String),
    ClientCredentials,
}

/// Exchanges and refreshes OAuth tokens for one Integration. Token state is
/// written in a single revision-guarded update so a racing refresh can never
/// half-apply (new access token, stale expiry) or clobber a newer token.
pub struct TokenManager<'a> {
    integrations: &'a dyn IntegrationRepository,
    endpoint: &'a dyn TokenEndpoint,
}

impl<'a> TokenManager<'a> {
    pub fn new(
        integrations: &'a dyn IntegrationRepository,
        endpoint: &'a dyn TokenEndpoint,
    ) -> Self {
        Self { integrations, endpoint }
    }

    pub async fn exchange(
        &self,
        integration_id: &IntegrationId,
        grant: TokenGrant,
    ) -> Result<Integration, EngineError> {
        let mut integration = self.load(integration_id).await?;

        let token_set = match grant {
            TokenGrant::AuthorizationCode(code) => {
                self.endpoint.exchange_code(&code).await.map_err(map_portal_error)?
            }
            TokenGrant::ClientCredentials => {
                self.endpoint.exchange_client_credentials().await.map_err(map_portal_error)?
            }
        };

        integration.apply_token_set(
            token_set.access_token,
            token_set.refresh_token,
            token_set.expires_at,
        );
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;

        info!(
            event_name = "tokens.exchanged",
            integration_id = %updated.id.0,
            "portal tokens stored"
        );
        Ok(updated)
    }

    /// Refreshes iff the stored token is expired right now. Fresh tokens and
    /// webhook-credential integrations pass through untouched.
    pub async fn ensure_fresh(&self, integration: Integration) -> Result<Integration, EngineError> {
        if integration.uses_webhook_credentials() {
            return Ok(integration);
        }
        if integration.access_token.is_none() {
            return Err(EngineError::Validation(
                "integration has no access token; authorize it first".to_string(),
            ));
        }
        if !integration.token_expired(Utc::now()) {
            return Ok(integration);
        }
        self.refresh(integration).await
    }

    /// Unconditional refresh. A portal rejection marks the Integration with
    /// the sticky `token_refresh_failed` flag; only a new authorization
    /// clears it.
    pub async fn refresh(&self, mut integration: Integration) -> Result<Integration, EngineError> {
        let Some(refresh_token) = integration.refresh_token.clone() else {
            return self.mark_refresh_failed(integration, "no refresh token stored").await;
        };

        match self.endpoint.refresh(&refresh_token).await {
            Ok(token_set) => {
                integration.apply_token_set(
                    token_set.access_token,
                    token_set.refresh_token.or(Some(refresh_token)),
                    token_set.expires_at,
                );
                let updated =
                    self.integrations.update(&integration).await.map_err(map_repo_error)?;
                info!(
                    event_name = "tokens.refreshed",
                    integration_id = %updated.id.0,
                    "portal access token refreshed"
                );
                Ok(updated)
            }
            Err(error) => self.mark_refresh_failed(integration, &error.to_string()).await,
        }
    }

    async fn mark_refresh_failed(
        &self,
        mut integration: Integration,
        reason: &str,
    ) -> Result<Integration, EngineError> {
        warn!(
            event_name = "tokens.refresh_failed",
            integration_id = %integration.id.0,
            reason,
            "token refresh rejected; re-authorization required"
        );
        integration.token_refresh_failed = true;
        self.integrations.update(&integration).await.map_err(map_repo_error)?;
        Err(EngineError::TokenRefreshFailed)
    }

    async fn load(&self, id: &IntegrationId) -> Result<Integration, EngineError> {
        self.integrations
            .find_by_id(id)
            .await
            .map_err(map_repo_error)?
            .ok_or_else(|| EngineError::not_found(format!("integration `{}`", id.0)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};
    use chatlink_core::EngineError;
    use chatlink_db::repositories::{InMemoryIntegrationRepository, IntegrationRepository};

    use super::{TokenGrant, TokenManager};
    use crate::testing::ScriptedTokenEndpoint;

    fn integration_with_tokens(expires_in_secs: i64) -> Integration {
        let mut integration =
            Integration::new(WorkspaceId("ws-1".to_string()), Platform::OpenChannels);
        integration.access_token = Some("old-access".to_string());
        integration.refresh_token = Some("old-refresh".to_string());
        integration.token_expires_at = Some(Utc::now() + Duration::seconds(expires_in_secs));
        integration
    }

    #[tokio::test]
    async fn exchange_persists_tokens_and_clears_failure_flag() {
        let mut integration = integration_with_tokens(-10);
        integration.token_refresh_failed = true;
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let endpoint = ScriptedTokenEndpoint::succeeding("new-access", 3600);
        let manager = TokenManager::new(&repo, &endpoint);

        let updated = manager
            .exchange(&integration.id, TokenGrant::AuthorizationCode("auth-code".to_string()))
            .await
            .expect("exchange should succeed");

        assert_eq!(updated.access_token.as_deref(), Some("new-access"));
        assert!(!updated.token_refresh_failed);

        let stored = repo.find_by_id(&integration.id).await.expect("find").expect("exists");
        assert_eq!(stored.access_token.as_deref(), Some("new-access"));
    }

    #[tokio::test]
    async fn ensure_fresh_does_not_refresh_a_token_expiring_in_one_second() {
        let integration = integration_with_tokens(1);
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let endpoint = ScriptedTokenEndpoint::rejecting("must not be called");
        let manager = TokenManager::new(&repo, &endpoint);

        let result =
            manager.ensure_fresh(integration).await.expect("fresh token passes through");
        assert_eq!(result.access_token.as_deref(), Some("old-access"));
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn ensure_fresh_refreshes_an_expired_token() {
        let integration = integration_with_tokens(-1);
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let endpoint = ScriptedTokenEndpoint::succeeding("refreshed-access", 3600);
        let manager = TokenManager::new(&repo, &endpoint);

        let updated = manager.ensure_fresh(integration).await.expect("refresh should succeed");
        assert_eq!(updated.access_token.as_deref(), Some("refreshed-access"));
        assert_eq!(endpoint.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_sets_the_sticky_flag() {
        let integration = integration_with_tokens(-1);
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let endpoint = ScriptedTokenEndpoint::rejecting("invalid_grant: refresh token revoked");
        let manager = TokenManager::new(&repo, &endpoint);

        let error = manager.ensure_fresh(integration.clone()).await.expect_err("must fail");
        assert_eq!(error, EngineError::TokenRefreshFailed);

        let stored = repo.find_by_id(&integration.id).await.expect("find").expect("exists");
        assert!(stored.token_refresh_failed, "failure flag must stick until re-authorization");
    }

    #[tokio::test]
    async fn missing_refresh_token_also_requires_reauthorization() {
        let mut integration = integration_with_tokens(-1);
        integration.refresh_token = None;
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let endpoint = ScriptedTokenEndpoint::rejecting("must not be called");
        let manager = TokenManager::new(&repo, &endpoint);

        let error = manager.ensure_fresh(integration).await.expect_err("must fail");
        assert_eq!(error, EngineError::TokenRefreshFailed);
        assert_eq!(endpoint.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn webhook_integrations_bypass_the_manager() {
        let mut integration =
            Integration::new(WorkspaceId("ws-1".to_string()), Platform::OpenChannels);
        integration.webhook_url = Some("https://portal.example/rest/1/secret/".to_string());
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let endpoint = ScriptedTokenEndpoint::rejecting("must not be called");
        let manager = TokenManager::new(&repo, &endpoint);

        manager.ensure_fresh(integration).await.expect("webhook credentials never refresh");
        assert_eq!(endpoint.refresh_calls(), 0);
    }
}
