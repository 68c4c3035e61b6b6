use serde::Serialize;
use tracing::{info, warn};

use chatlink_core::domain::integration::{Integration, IntegrationId};
use chatlink_core::domain::mapping::InstanceId;
use chatlink_core::EngineError;
use chatlink_crm::PortalApi;
use chatlink_db::repositories::{InstanceRepository, IntegrationRepository};

use crate::bots::BotRegistrar;
use crate::channels::ChannelActivator;
use crate::connector::ConnectorRegistrar;
use crate::map_repo_error;

/// Per-step outcome of one provisioning run. Partial success is an
/// expected steady state, not an error: a portal without the automation
/// scope still gets a fully working connector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    pub connector_registered: bool,
    pub lines_activated: u32,
    pub lines_total: u32,
    pub sms_provider_registered: bool,
    pub robot_registered: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Composes registration, per-line activation, and the optional bot/robot/
/// SMS registrations into one user-triggered run. Sub-steps are
/// independent, so a failure is recorded and the run continues — it never
/// aborts.
pub struct SetupOrchestrator<'a> {
    integrations: &'a dyn IntegrationRepository,
    instances: &'a dyn InstanceRepository,
    registrar: ConnectorRegistrar<'a>,
    activator: ChannelActivator<'a>,
    bots: BotRegistrar<'a>,
}

impl<'a> SetupOrchestrator<'a> {
    pub fn new(
        integrations: &'a dyn IntegrationRepository,
        instances: &'a dyn InstanceRepository,
        portal: &'a dyn PortalApi,
        callback_base_url: &str,
    ) -> Self {
        Self {
            integrations,
            instances,
            registrar: ConnectorRegistrar::new(integrations, portal, callback_base_url),
            activator: ChannelActivator::new(integrations, portal),
            bots: BotRegistrar::new(integrations, portal, callback_base_url),
        }
    }

    pub async fn auto_setup(
        &self,
        integration_id: &IntegrationId,
        instance_id: &InstanceId,
    ) -> Result<SetupReport, EngineError> {
        let mut integration = self
            .integrations
            .find_by_id(integration_id)
            .await
            .map_err(map_repo_error)?
            .ok_or_else(|| {
                EngineError::not_found(format!("integration `{}`", integration_id.0))
            })?;

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

        let display_name = match &instance.label {
            Some(label) => format!("WhatsApp {label}"),
            None => format!("WhatsApp {}", instance.phone_number),
        };

        let mut report = SetupReport::default();
        info!(
            event_name = "setup.started",
            integration_id = %integration.id.0,
            instance_id = %instance_id.0,
            "auto setup run started"
        );

        // Step 1: connector registration.
        match self.registrar.register(integration.clone(), &display_name).await {
            Ok(updated) => {
                integration = updated;
                report.connector_registered = true;
            }
            Err(error) => report.errors.push(format!("connector registration failed: {error}")),
        }

        // Step 2: activate the connector on every existing line. Skipped
        // entirely when registration did not leave a connector behind.
        if integration.connector_id.is_some() {
            match self.activator.list_channels(&integration, false).await {
                Ok(lines) => {
                    report.lines_total = lines.len() as u32;
                    if lines.is_empty() {
                        report.warnings.push("portal has no open lines to activate".to_string());
                    }
                    for line in lines {
                        match self
                            .activator
                            .activate_for_line(integration.clone(), line.id, true)
                            .await
                        {
                            Ok(updated) => {
                                integration = updated;
                                report.lines_activated += 1;
                            }
                            Err(error) => report.errors.push(format!(
                                "activation failed for line {} ({}): {error}",
                                line.id, line.name
                            )),
                        }
                    }
                }
                Err(error) => report.errors.push(format!("listing lines failed: {error}")),
            }
        } else {
            report
                .warnings
                .push("line activation skipped, no connector registered".to_string());
        }

        // Step 3: optional SMS sender for workflow messages.
        match self.bots.register_sms_provider(integration.clone()).await {
            Ok(updated) => {
                integration = updated;
                report.sms_provider_registered = integration.sms_provider_registered;
            }
            Err(error) => {
                report.errors.push(format!("sms provider registration failed: {error}"))
            }
        }

        // Step 4: optional automation robot.
        match self.bots.register_robot(integration.clone()).await {
            Ok(updated) => {
                integration = updated;
                report.robot_registered = integration.robot_registered;
            }
            Err(error) => report.errors.push(format!("robot registration failed: {error}")),
        }

        integration.last_synced_at = Some(chrono::Utc::now());
        if let Err(error) = self.integrations.update(&integration).await {
            warn!(
                event_name = "setup.sync_stamp_failed",
                integration_id = %integration.id.0,
                error = %error,
                "could not stamp last_synced_at after setup"
            );
        }

        info!(
            event_name = "setup.finished",
            integration_id = %integration.id.0,
            connector_registered = report.connector_registered,
            lines_activated = report.lines_activated,
            lines_total = report.lines_total,
            robot_registered = report.robot_registered,
            errors = report.errors.len(),
            "auto setup run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};
    use chatlink_core::domain::mapping::{Instance, InstanceId};
    use chatlink_core::EngineError;
    use chatlink_crm::OpenLine;
    use chatlink_db::repositories::{
        InMemoryInstanceRepository, InMemoryIntegrationRepository, IntegrationRepository,
    };

    use super::SetupOrchestrator;
    use crate::testing::ScriptedPortal;

    fn fixture() -> (Integration, InMemoryIntegrationRepository, InMemoryInstanceRepository) {
        let mut integration =
            Integration::new(WorkspaceId("ws-1".to_string()), Platform::OpenChannels);
        integration.member_id = Some("member-1".to_string());
        let integrations = InMemoryIntegrationRepository::with(integration.clone());
        let instances = InMemoryInstanceRepository::with(vec![Instance {
            id: InstanceId("inst-1".to_string()),
            workspace_id: WorkspaceId("ws-1".to_string()),
            phone_number: "+111".to_string(),
            label: None,
            connected: true,
        }]);
        (integration, integrations, instances)
    }

    #[tokio::test]
    async fn full_run_registers_everything_and_activates_all_lines() {
        let (integration, integrations, instances) = fixture();
        let portal = ScriptedPortal::with_lines(vec![
            OpenLine { id: 1, name: "Sales".to_string(), active: true },
            OpenLine { id: 2, name: "Support".to_string(), active: true },
        ]);
        let orchestrator = SetupOrchestrator::new(
            &integrations,
            &instances,
            &portal,
            "https://hooks.chatlink.example",
        );

        let report = orchestrator
            .auto_setup(&integration.id, &InstanceId("inst-1".to_string()))
            .await
            .expect("setup runs");

        assert!(report.connector_registered);
        assert_eq!(report.lines_total, 2);
        assert_eq!(report.lines_activated, 2);
        assert!(report.sms_provider_registered);
        assert!(report.robot_registered);
        assert!(report.errors.is_empty());

        let stored =
            integrations.find_by_id(&integration.id).await.expect("find").expect("exists");
        assert!(stored.registered);
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn robot_failure_is_collected_and_everything_else_still_runs() {
        let (integration, integrations, instances) = fixture();
        let portal = ScriptedPortal::with_lines(vec![OpenLine {
            id: 1,
            name: "Sales".to_string(),
            active: true,
        }]);
        portal.fail_operation("register_robot", "robot scope unavailable");
        let orchestrator = SetupOrchestrator::new(
            &integrations,
            &instances,
            &portal,
            "https://hooks.chatlink.example",
        );

        let report = orchestrator
            .auto_setup(&integration.id, &InstanceId("inst-1".to_string()))
            .await
            .expect("setup runs to completion");

        assert!(report.connector_registered);
        assert_eq!(report.lines_activated, 1);
        assert_eq!(report.lines_total, 1);
        assert!(!report.robot_registered);
        assert!(report.sms_provider_registered, "sms step ran despite robot failure");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("robot scope unavailable"));
    }

    #[tokio::test]
    async fn registration_failure_skips_activation_but_not_the_rest() {
        let (integration, integrations, instances) = fixture();
        let portal = ScriptedPortal::with_lines(vec![OpenLine {
            id: 1,
            name: "Sales".to_string(),
            active: true,
        }]);
        portal.fail_operation("register_connector", "ACCESS_DENIED");
        let orchestrator = SetupOrchestrator::new(
            &integrations,
            &instances,
            &portal,
            "https://hooks.chatlink.example",
        );

        let report = orchestrator
            .auto_setup(&integration.id, &InstanceId("inst-1".to_string()))
            .await
            .expect("setup still completes");

        assert!(!report.connector_registered);
        assert_eq!(report.lines_activated, 0);
        assert!(report.robot_registered, "independent later steps still run");
        assert!(report.errors.iter().any(|e| e.contains("ACCESS_DENIED")));
        assert!(report.warnings.iter().any(|w| w.contains("activation skipped")));
    }

    #[tokio::test]
    async fn unknown_integration_aborts_before_any_remote_call() {
        let (_, integrations, instances) = fixture();
        let portal = ScriptedPortal::new();
        let orchestrator = SetupOrchestrator::new(
            &integrations,
            &instances,
            &portal,
            "https://hooks.chatlink.example",
        );

        let error = orchestrator
            .auto_setup(
                &chatlink_core::IntegrationId("INT-missing".to_string()),
                &InstanceId("inst-1".to_string()),
            )
            .await
            .expect_err("must fail");
        assert!(matches!(error, EngineError::NotFound(_)));
        assert!(portal.calls().is_empty());
    }
}
