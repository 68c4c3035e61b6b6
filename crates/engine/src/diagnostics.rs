use serde::Serialize;
use tracing::info;

use chatlink_core::domain::integration::Integration;
use chatlink_core::{ConnectorHealth, EngineError};
use chatlink_crm::{PlacementProbe, PortalApi};
use chatlink_db::repositories::ChannelMappingRepository;

use crate::connector::handler_urls;
use crate::{map_portal_error, map_repo_error};

/// Live-versus-stored comparison of the connector, with the two raw facts
/// that justify the diagnosis and the repair action most likely to help.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectorDiagnosis {
    pub registered: bool,
    pub activated: bool,
    pub diagnosis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// Read-only drift detection. Nothing here mutates state; every suggested
/// repair is a separate, explicit action.
pub struct Diagnostics<'a> {
    portal: &'a dyn PortalApi,
    mappings: &'a dyn ChannelMappingRepository,
    callback_base_url: String,
}

impl<'a> Diagnostics<'a> {
    pub fn new(
        portal: &'a dyn PortalApi,
        mappings: &'a dyn ChannelMappingRepository,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self { portal, mappings, callback_base_url: callback_base_url.into() }
    }

    /// Re-reads the portal registry and compares it with the stored flags.
    pub async fn check_connector(
        &self,
        integration: &Integration,
    ) -> Result<ConnectorDiagnosis, EngineError> {
        let Some(stored_id) = integration.connector_id.as_deref() else {
            return Ok(ConnectorDiagnosis {
                registered: false,
                activated: false,
                diagnosis: "no connector has ever been registered for this integration"
                    .to_string(),
                suggested_action: Some("auto_setup".to_string()),
            });
        };

        let owned = self.portal.list_connectors().await.map_err(map_portal_error)?;
        let present = owned.iter().any(|c| c.id == stored_id);
        let strays = owned.iter().filter(|c| c.id != stored_id).count();

        let diagnosis = match (integration.registered, present) {
            (true, false) => ConnectorDiagnosis {
                registered: false,
                activated: false,
                diagnosis: format!(
                    "connector `{stored_id}` is stored as registered but missing from the portal"
                ),
                suggested_action: Some("reconfigure_connector".to_string()),
            },
            (false, true) => ConnectorDiagnosis {
                registered: true,
                activated: integration.activated,
                diagnosis: format!(
                    "connector `{stored_id}` exists in the portal but is not recorded locally"
                ),
                suggested_action: Some("auto_setup".to_string()),
            },
            (false, false) => ConnectorDiagnosis {
                registered: false,
                activated: false,
                diagnosis: "connector is not registered".to_string(),
                suggested_action: Some("auto_setup".to_string()),
            },
            (true, true) if strays > 0 => ConnectorDiagnosis {
                registered: true,
                activated: integration.activated,
                diagnosis: format!(
                    "connector `{stored_id}` is healthy but {strays} stray connector object(s) remain"
                ),
                suggested_action: Some("clean_connectors".to_string()),
            },
            (true, true) => match integration.health() {
                ConnectorHealth::Activated => ConnectorDiagnosis {
                    registered: true,
                    activated: true,
                    diagnosis: "connector is registered and active on a line".to_string(),
                    suggested_action: None,
                },
                _ => ConnectorDiagnosis {
                    registered: true,
                    activated: false,
                    diagnosis: "connector is registered but not wired to any line".to_string(),
                    suggested_action: Some("complete_setup".to_string()),
                },
            },
        };

        info!(
            event_name = "diagnostics.connector_checked",
            integration_id = %integration.id.0,
            registered = diagnosis.registered,
            activated = diagnosis.activated,
            "connector diagnosis computed"
        );
        Ok(diagnosis)
    }

    /// Fires the placement-open payload at our own registered handler URL,
    /// exactly as the portal would when a user opens the connector inside a
    /// conversation. Distinguishes "not registered" from "registered but
    /// callback unreachable". Logs the observed response and changes
    /// nothing.
    pub async fn simulate_placement(
        &self,
        integration: &Integration,
    ) -> Result<PlacementProbe, EngineError> {
        let connector_id = integration.connector_id.as_deref().ok_or_else(|| {
            EngineError::validation("connector must be registered before simulating placement")
        })?;

        let line_id = self
            .mappings
            .list_for_integration(&integration.id)
            .await
            .map_err(map_repo_error)?
            .into_iter()
            .find(|mapping| mapping.active)
            .map(|mapping| mapping.line_id)
            .unwrap_or(0);

        let urls = handler_urls(&self.callback_base_url, &integration.id);
        let probe = self
            .portal
            .probe_placement(&urls.placement_handler, connector_id, line_id)
            .await
            .map_err(map_portal_error)?;

        info!(
            event_name = "diagnostics.placement_probed",
            integration_id = %integration.id.0,
            reachable = probe.reachable,
            status = ?probe.status,
            detail = %probe.detail,
            "placement probe completed"
        );
        Ok(probe)
    }
}
