use serde::Serialize;
use tracing::{info, warn};

use chatlink_core::domain::integration::Integration;
use chatlink_core::EngineError;
use chatlink_crm::{OpenLine, PortalApi};
use chatlink_db::repositories::IntegrationRepository;

use crate::{map_portal_error, map_repo_error};

/// One remote line, optionally cross-referenced with the connector's
/// per-line activation state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelView {
    pub id: i64,
    pub name: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_active: Option<bool>,
}

/// Read-only composite status. Registration, activation, and connection
/// are independent facts; collapsing them produces misleading badges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectorStatusReport {
    pub registered: bool,
    pub connection: bool,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lists remote lines and flips the connector's per-line activation state.
pub struct ChannelActivator<'a> {
    integrations: &'a dyn IntegrationRepository,
    portal: &'a dyn PortalApi,
}

impl<'a> ChannelActivator<'a> {
    pub fn new(integrations: &'a dyn IntegrationRepository, portal: &'a dyn PortalApi) -> Self {
        Self { integrations, portal }
    }

    pub async fn list_channels(
        &self,
        integration: &Integration,
        include_status: bool,
    ) -> Result<Vec<ChannelView>, EngineError> {
        let lines = self.portal.list_lines().await.map_err(map_portal_error)?;

        let mut views = Vec::with_capacity(lines.len());
        for line in lines {
            let connector_active = if include_status {
                self.line_activation(integration, &line).await
            } else {
                None
            };
            views.push(ChannelView {
                id: line.id,
                name: line.name,
                active: line.active,
                connector_active,
            });
        }
        Ok(views)
    }

    async fn line_activation(&self, integration: &Integration, line: &OpenLine) -> Option<bool> {
        let connector_id = integration.connector_id.as_deref()?;
        match self.portal.connector_status(connector_id, line.id).await {
            Ok(status) => Some(status.active),
            Err(error) => {
                warn!(
                    event_name = "channels.status_unavailable",
                    integration_id = %integration.id.0,
                    line_id = line.id,
                    error = %error,
                    "could not read per-line connector status"
                );
                None
            }
        }
    }

    /// Flips the per-line activation toggle. The local flag is written only
    /// after the portal confirms; a remote failure leaves local state
    /// exactly as it was.
    pub async fn activate_for_line(
        &self,
        mut integration: Integration,
        line_id: i64,
        active: bool,
    ) -> Result<Integration, EngineError> {
        let connector_id = integration.connector_id.clone().ok_or_else(|| {
            EngineError::validation("connector must be registered before activation")
        })?;

        self.portal
            .activate_connector(&connector_id, line_id, active)
            .await
            .map_err(map_portal_error)?;

        integration.activated = active;
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;

        info!(
            event_name = "channels.activation_changed",
            integration_id = %updated.id.0,
            line_id,
            active,
            "connector activation state changed"
        );
        Ok(updated)
    }

    pub async fn create_channel(
        &self,
        integration: &Integration,
        name: &str,
    ) -> Result<OpenLine, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("channel name must not be empty"));
        }

        let line = self.portal.create_line(name).await.map_err(map_portal_error)?;
        info!(
            event_name = "channels.created",
            integration_id = %integration.id.0,
            line_id = line.id,
            "remote line created"
        );
        Ok(line)
    }

    /// Read-only diagnosis of one line. No state is written, even when the
    /// observed facts contradict the stored flags — repair is a separate,
    /// explicit action.
    pub async fn check_status(
        &self,
        integration: &Integration,
        line_id: i64,
    ) -> Result<ConnectorStatusReport, EngineError> {
        let Some(connector_id) = integration
            .connector_id
            .as_deref()
            .filter(|_| integration.registered)
        else {
            return Ok(ConnectorStatusReport {
                registered: false,
                connection: false,
                active: false,
                error: Some("connector is not registered in the portal".to_string()),
            });
        };

        match self.portal.connector_status(connector_id, line_id).await {
            Ok(status) => Ok(ConnectorStatusReport {
                registered: true,
                connection: status.connected,
                active: status.active,
                error: status.error,
            }),
            Err(error) => Ok(ConnectorStatusReport {
                registered: true,
                connection: false,
                active: false,
                error: Some(error.to_string()),
            }),
        }
    }
}
