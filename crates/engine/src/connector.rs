use tracing::{info, warn};

use chatlink_core::domain::integration::{Integration, IntegrationId};
use chatlink_core::{derive_connector_id, EngineError};
use chatlink_crm::{ConnectorRegistration, PortalApi};
use chatlink_db::repositories::IntegrationRepository;

use crate::{map_portal_error, map_repo_error};

/// Inbound-message event re-bound on every reconfiguration.
pub const CONNECTOR_MESSAGE_EVENT: &str = "ONIMCONNECTORMESSAGEADD";

/// Callback URLs the portal stores against the connector at registration
/// time. Derived from the configured base URL and the integration id, so
/// reconfiguration after a base-URL change produces current, non-stale
/// handlers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerUrls {
    pub message_handler: String,
    pub placement_handler: String,
}

pub fn handler_urls(callback_base_url: &str, integration_id: &IntegrationId) -> HandlerUrls {
    let base = callback_base_url.trim_end_matches('/');
    HandlerUrls {
        message_handler: format!("{base}/api/v1/events/message/{}", integration_id.0),
        placement_handler: format!("{base}/api/v1/events/placement/{}", integration_id.0),
    }
}

/// Creates, deduplicates, and rebuilds the connector object inside the
/// portal's contact-center registry.
pub struct ConnectorRegistrar<'a> {
    integrations: &'a dyn IntegrationRepository,
    portal: &'a dyn PortalApi,
    callback_base_url: String,
}

impl<'a> ConnectorRegistrar<'a> {
    pub fn new(
        integrations: &'a dyn IntegrationRepository,
        portal: &'a dyn PortalApi,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self { integrations, portal, callback_base_url: callback_base_url.into() }
    }

    /// Registers the connector under an identifier derived from the
    /// workspace/member identity. Because the derivation is deterministic,
    /// re-running after a partial failure converges on the same remote
    /// object instead of creating a duplicate.
    pub async fn register(
        &self,
        mut integration: Integration,
        display_name: &str,
    ) -> Result<Integration, EngineError> {
        let connector_id =
            derive_connector_id(&integration.workspace_id, integration.member_id.as_deref());
        let urls = handler_urls(&self.callback_base_url, &integration.id);

        self.portal
            .register_connector(&ConnectorRegistration {
                connector: connector_id.clone(),
                name: display_name.to_string(),
                handler: urls.message_handler,
                placement_handler: urls.placement_handler,
            })
            .await
            .map_err(map_portal_error)?;

        integration.connector_id = Some(connector_id.clone());
        integration.registered = true;
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;

        info!(
            event_name = "connector.registered",
            integration_id = %updated.id.0,
            connector_id = %connector_id,
            "connector registered in portal"
        );
        Ok(updated)
    }

    /// Deletes every connector owned by this app whose id differs from the
    /// stored one. Repairs drift left behind by earlier non-idempotent
    /// registrations. Returns the number of removed objects.
    pub async fn clean_duplicates(&self, integration: &Integration) -> Result<u32, EngineError> {
        let stored = integration.connector_id.as_deref().ok_or_else(|| {
            EngineError::validation("no connector is registered for this integration")
        })?;

        let owned = self.portal.list_connectors().await.map_err(map_portal_error)?;
        let mut removed = 0u32;
        for connector in owned {
            if connector.id == stored {
                continue;
            }
            self.portal
                .unregister_connector(&connector.id)
                .await
                .map_err(map_portal_error)?;
            removed += 1;
        }

        if removed > 0 {
            info!(
                event_name = "connector.duplicates_cleaned",
                integration_id = %integration.id.0,
                removed,
                "duplicate connectors removed from portal"
            );
        }
        Ok(removed)
    }

    /// Deletes and recreates the connector with freshly generated handler
    /// URLs, then re-binds the inbound-message event. The portal caches
    /// handler URLs at registration time and never picks up changes on its
    /// own.
    pub async fn reconfigure(
        &self,
        integration: Integration,
        display_name: &str,
    ) -> Result<Integration, EngineError> {
        if let Some(stored) = integration.connector_id.as_deref() {
            if let Err(error) = self.portal.unregister_connector(stored).await {
                // The object may already be gone; registration below settles it.
                warn!(
                    event_name = "connector.unregister_skipped",
                    integration_id = %integration.id.0,
                    error = %error,
                    "could not unregister connector before rebuild"
                );
            }
        }

        let updated = self.register(integration, display_name).await?;
        let urls = handler_urls(&self.callback_base_url, &updated.id);

        if let Err(error) = self
            .portal
            .unbind_event(CONNECTOR_MESSAGE_EVENT, &urls.message_handler)
            .await
        {
            warn!(
                event_name = "connector.event_unbind_skipped",
                integration_id = %updated.id.0,
                error = %error,
                "no previous event binding to remove"
            );
        }
        self.portal
            .bind_event(CONNECTOR_MESSAGE_EVENT, &urls.message_handler)
            .await
            .map_err(map_portal_error)?;

        info!(
            event_name = "connector.reconfigured",
            integration_id = %updated.id.0,
            "connector rebuilt with fresh handler urls"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};
    use chatlink_core::EngineError;
    use chatlink_db::repositories::{InMemoryIntegrationRepository, IntegrationRepository};

    use super::{handler_urls, ConnectorRegistrar};
    use crate::testing::ScriptedPortal;

    fn integration() -> Integration {
        let mut integration =
            Integration::new(WorkspaceId("ws-42".to_string()), Platform::OpenChannels);
        integration.member_id = Some("member-7".to_string());
        integration
    }

    #[tokio::test]
    async fn register_twice_produces_the_same_connector_id() {
        let subject = integration();
        let repo = InMemoryIntegrationRepository::with(subject.clone());
        let portal = ScriptedPortal::new();
        let registrar = ConnectorRegistrar::new(&repo, &portal, "https://hooks.chatlink.example");

        let first = registrar.register(subject, "WhatsApp +111").await.expect("first register");
        let second =
            registrar.register(first.clone(), "WhatsApp +111").await.expect("second register");

        assert_eq!(first.connector_id, second.connector_id);
        assert_eq!(second.connector_id.as_deref(), Some("wa_member7"));
        assert!(second.registered);
        assert_eq!(portal.connectors.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn clean_duplicates_reduces_to_exactly_one_matching_record() {
        let subject = integration();
        let repo = InMemoryIntegrationRepository::with(subject.clone());
        let portal = ScriptedPortal::new();
        let registrar = ConnectorRegistrar::new(&repo, &portal, "https://hooks.chatlink.example");

        let registered = registrar.register(subject, "WhatsApp +111").await.expect("register");

        // Drift from an earlier, non-idempotent registration scheme.
        portal.seed_connector("wa_member7_old1", "stale one");
        portal.seed_connector("wa_member7_old2", "stale two");

        let removed = registrar.clean_duplicates(&registered).await.expect("clean");
        assert_eq!(removed, 2);

        let remaining = portal.connectors.lock().expect("lock").clone();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "wa_member7");
    }

    #[tokio::test]
    async fn clean_duplicates_without_registration_is_a_validation_error() {
        let subject = integration();
        let repo = InMemoryIntegrationRepository::with(subject.clone());
        let portal = ScriptedPortal::new();
        let registrar = ConnectorRegistrar::new(&repo, &portal, "https://hooks.chatlink.example");

        let error = registrar.clean_duplicates(&subject).await.expect_err("must fail");
        assert!(matches!(error, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn reconfigure_rebuilds_and_rebinds_the_message_event() {
        let subject = integration();
        let repo = InMemoryIntegrationRepository::with(subject.clone());
        let portal = ScriptedPortal::new();
        let registrar = ConnectorRegistrar::new(&repo, &portal, "https://hooks.chatlink.example");

        let registered =
            registrar.register(subject, "WhatsApp +111").await.expect("register");
        let reconfigured =
            registrar.reconfigure(registered, "WhatsApp +111").await.expect("reconfigure");

        assert!(reconfigured.registered);
        let events = portal.bound_events.lock().expect("lock").clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "ONIMCONNECTORMESSAGEADD");
        assert!(events[0].1.ends_with(&format!("/events/message/{}", reconfigured.id.0)));
    }

    #[tokio::test]
    async fn remote_failure_leaves_local_flags_untouched() {
        let subject = integration();
        let repo = InMemoryIntegrationRepository::with(subject.clone());
        let portal = ScriptedPortal::new();
        portal.fail_operation("register_connector", "ACCESS_DENIED: scope missing");
        let registrar = ConnectorRegistrar::new(&repo, &portal, "https://hooks.chatlink.example");

        let error = registrar.register(subject.clone(), "WhatsApp +111").await.expect_err("fails");
        assert!(matches!(error, EngineError::RemoteApi(_)));

        let stored = repo.find_by_id(&subject.id).await.expect("find").expect("exists");
        assert!(!stored.registered);
        assert_eq!(stored.connector_id, None);
    }

    #[test]
    fn handler_urls_are_deterministic_per_integration() {
        let subject = integration();
        let first = handler_urls("https://hooks.chatlink.example/", &subject.id);
        let second = handler_urls("https://hooks.chatlink.example", &subject.id);
        assert_eq!(first, second);
        assert!(first.placement_handler.contains("/events/placement/"));
    }
}
