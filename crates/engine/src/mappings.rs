use serde::Serialize;
use tracing::{info, warn};

use chatlink_core::domain::integration::Integration;
use chatlink_core::domain::mapping::{ChannelMapping, InstanceId, MappingId};
use chatlink_core::EngineError;
use chatlink_db::repositories::{ChannelMappingRepository, InstanceRepository, RepositoryError};

use crate::channels::ChannelActivator;
use crate::map_repo_error;

/// Result of the composite `complete_setup`: activation and mapping are
/// reported independently because either can fail while the other
/// succeeds, and the caller must be told which.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompleteSetupOutcome {
    pub activation_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_error: Option<String>,
    pub mapping_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<String>,
}

/// Maintains the instance ↔ line association and its uniqueness invariants.
pub struct MappingService<'a> {
    mappings: &'a dyn ChannelMappingRepository,
    instances: &'a dyn InstanceRepository,
}

impl<'a> MappingService<'a> {
    pub fn new(
        mappings: &'a dyn ChannelMappingRepository,
        instances: &'a dyn InstanceRepository,
    ) -> Self {
        Self { mappings, instances }
    }

    /// Inserts an active mapping. Both unique constraints are enforced by
    /// the store itself, so a conflicting call fails without writing a
    /// partial row.
    pub async fn add_mapping(
        &self,
        integration: &Integration,
        instance_id: &InstanceId,
        line_id: i64,
        line_name: &str,
    ) -> Result<ChannelMapping, EngineError> {
        let instance = self
            .instances
            .find_by_id(instance_id)
            .await
            .map_err(map_repo_error)?
            .ok_or_else(|| EngineError::not_found(format!("instance `{}`", instance_id.0)))?;
        if instance.workspace_id != integration.workspace_id {
            return Err(EngineError::validation(format!(
                "instance `{}` belongs to another workspace",
                instance_id.0
            )));
        }

        let mapping =
            ChannelMapping::new(integration.id.clone(), instance_id.clone(), line_id, line_name);
        match self.mappings.insert(&mapping).await {
            Ok(()) => {
                info!(
                    event_name = "mappings.added",
                    integration_id = %integration.id.0,
                    instance_id = %instance_id.0,
                    line_id,
                    "channel mapping created"
                );
                Ok(mapping)
            }
            Err(RepositoryError::UniqueViolation(what)) => Err(EngineError::Conflict(what)),
            Err(other) => Err(map_repo_error(other)),
        }
    }

    /// Hard delete, no cascade beyond the mapping row.
    pub async fn remove_mapping(&self, mapping_id: &MappingId) -> Result<(), EngineError> {
        let removed = self.mappings.delete(mapping_id).await.map_err(map_repo_error)?;
        if !removed {
            return Err(EngineError::not_found(format!("mapping `{}`", mapping_id.0)));
        }
        info!(event_name = "mappings.removed", mapping_id = %mapping_id.0, "channel mapping deleted");
        Ok(())
    }

    pub async fn list_for_integration(
        &self,
        integration: &Integration,
    ) -> Result<Vec<ChannelMapping>, EngineError> {
        self.mappings.list_for_integration(&integration.id).await.map_err(map_repo_error)
    }

    /// Activates the connector on the line AND maps the instance to it,
    /// reporting each outcome separately. Mapping proceeds even when
    /// activation fails: a mapped-but-inactive line is repairable with a
    /// plain re-activation, while a silently dropped mapping is not.
    pub async fn complete_setup(
        &self,
        activator: &ChannelActivator<'_>,
        integration: Integration,
        instance_id: &InstanceId,
        line_id: i64,
        line_name: &str,
    ) -> CompleteSetupOutcome {
        let (activation_ok, activation_error, integration) =
            match activator.activate_for_line(integration.clone(), line_id, true).await {
                Ok(updated) => (true, None, updated),
                Err(error) => {
                    warn!(
                        event_name = "mappings.setup_activation_failed",
                        integration_id = %integration.id.0,
                        line_id,
                        error = %error,
                        "activation step of complete_setup failed"
                    );
                    (false, Some(error.to_string()), integration)
                }
            };

        let (mapping_ok, mapping_error, mapping_id) =
            match self.add_mapping(&integration, instance_id, line_id, line_name).await {
                Ok(mapping) => (true, None, Some(mapping.id.0)),
                Err(error) => {
                    warn!(
                        event_name = "mappings.setup_mapping_failed",
                        integration_id = %integration.id.0,
                        instance_id = %instance_id.0,
                        line_id,
                        error = %error,
                        "mapping step of complete_setup failed"
                    );
                    (false, Some(error.to_string()), None)
                }
            };

        CompleteSetupOutcome {
            activation_ok,
            activation_error,
            mapping_ok,
            mapping_error,
            mapping_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};
    use chatlink_core::domain::mapping::{Instance, InstanceId, MappingId};
    use chatlink_core::EngineError;
    use chatlink_crm::OpenLine;
    use chatlink_db::repositories::{
        InMemoryChannelMappingRepository, InMemoryInstanceRepository,
        InMemoryIntegrationRepository,
    };

    use super::MappingService;
    use crate::channels::ChannelActivator;
    use crate::testing::ScriptedPortal;

    fn integration() -> Integration {
        let mut integration =
            Integration::new(WorkspaceId("ws-1".to_string()), Platform::OpenChannels);
        integration.connector_id = Some("wa_ws1".to_string());
        integration.registered = true;
        integration
    }

    fn instances() -> InMemoryInstanceRepository {
        InMemoryInstanceRepository::with(vec![
            Instance {
                id: InstanceId("X".to_string()),
                workspace_id: WorkspaceId("ws-1".to_string()),
                phone_number: "+111".to_string(),
                label: Some("Main".to_string()),
                connected: true,
            },
            Instance {
                id: InstanceId("Y".to_string()),
                workspace_id: WorkspaceId("ws-1".to_string()),
                phone_number: "+222".to_string(),
                label: None,
                connected: true,
            },
        ])
    }

    #[tokio::test]
    async fn mapping_an_already_mapped_line_conflicts_and_keeps_the_first() {
        let integration = integration();
        let mappings = InMemoryChannelMappingRepository::new();
        let instances = instances();
        let service = MappingService::new(&mappings, &instances);

        service
            .add_mapping(&integration, &InstanceId("X".to_string()), 2, "Support")
            .await
            .expect("first mapping");

        let error = service
            .add_mapping(&integration, &InstanceId("Y".to_string()), 2, "Support")
            .await
            .expect_err("line already mapped");
        assert!(matches!(error, EngineError::Conflict(_)));

        let listed = service.list_for_integration(&integration).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].instance_id.0, "X");
    }

    #[tokio::test]
    async fn unknown_instance_is_not_found() {
        let integration = integration();
        let mappings = InMemoryChannelMappingRepository::new();
        let instances = instances();
        let service = MappingService::new(&mappings, &instances);

        let error = service
            .add_mapping(&integration, &InstanceId("ghost".to_string()), 1, "Sales")
            .await
            .expect_err("must fail");
        assert!(matches!(error, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_mapping_is_hard_and_reports_missing_rows() {
        let integration = integration();
        let mappings = InMemoryChannelMappingRepository::new();
        let instances = instances();
        let service = MappingService::new(&mappings, &instances);

        let mapping = service
            .add_mapping(&integration, &InstanceId("X".to_string()), 1, "Sales")
            .await
            .expect("add");
        service.remove_mapping(&mapping.id).await.expect("remove");

        let error = service.remove_mapping(&mapping.id).await.expect_err("already gone");
        assert!(matches!(error, EngineError::NotFound(_)));

        let error = service
            .remove_mapping(&MappingId("MAP-unknown".to_string()))
            .await
            .expect_err("unknown id");
        assert!(matches!(error, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn complete_setup_reports_both_outcomes_independently() {
        let integration = integration();
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let mappings = InMemoryChannelMappingRepository::new();
        let instances = instances();
        let portal = ScriptedPortal::with_lines(vec![OpenLine {
            id: 3,
            name: "Sales".to_string(),
            active: true,
        }]);
        portal.fail_operation("activate_connector", "LINE_ACCESS_DENIED");

        let service = MappingService::new(&mappings, &instances);
        let activator = ChannelActivator::new(&repo, &portal);

        let outcome = service
            .complete_setup(&activator, integration.clone(), &InstanceId("X".to_string()), 3, "Sales")
            .await;

        assert!(!outcome.activation_ok, "activation failed");
        assert!(outcome.activation_error.is_some());
        assert!(outcome.mapping_ok, "mapping must still succeed");
        assert!(outcome.mapping_id.is_some());

        let listed = service.list_for_integration(&integration).await.expect("list");
        assert_eq!(listed.len(), 1, "mapping row was written despite activation failure");
    }

    #[tokio::test]
    async fn complete_setup_reports_full_success() {
        let integration = integration();
        let repo = InMemoryIntegrationRepository::with(integration.clone());
        let mappings = InMemoryChannelMappingRepository::new();
        let instances = instances();
        let portal = ScriptedPortal::with_lines(vec![OpenLine {
            id: 3,
            name: "Sales".to_string(),
            active: true,
        }]);

        let service = MappingService::new(&mappings, &instances);
        let activator = ChannelActivator::new(&repo, &portal);

        let outcome = service
            .complete_setup(&activator, integration, &InstanceId("X".to_string()), 3, "Sales")
            .await;

        assert!(outcome.activation_ok);
        assert!(outcome.mapping_ok);
        assert_eq!(outcome.activation_error, None);
        assert_eq!(outcome.mapping_error, None);
    }
}
