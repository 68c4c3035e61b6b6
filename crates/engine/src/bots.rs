use tracing::{info, warn};

use chatlink_core::domain::integration::Integration;
use chatlink_core::{derive_connector_id, EngineError, CONNECTOR_ID_MAX_LEN};
use chatlink_crm::{BotRegistration, PortalApi, RobotRegistration, SmsProviderRegistration};
use chatlink_db::repositories::IntegrationRepository;

use crate::connector::handler_urls;
use crate::{map_portal_error, map_repo_error};

pub const ROBOT_CODE: &str = "wa_send_message";
pub const SMS_SENDER_CODE: &str = "wa_sms_sender";

/// Registers the three optional portal-side capabilities: the chat bot
/// users see in conversations, the workflow automation action, and the
/// workflow SMS sender. Each is guarded by its own stored identifier or
/// flag and none of them implies the connector, or each other.
pub struct BotRegistrar<'a> {
    integrations: &'a dyn IntegrationRepository,
    portal: &'a dyn PortalApi,
    callback_base_url: String,
}

impl<'a> BotRegistrar<'a> {
    pub fn new(
        integrations: &'a dyn IntegrationRepository,
        portal: &'a dyn PortalApi,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self { integrations, portal, callback_base_url: callback_base_url.into() }
    }

    pub async fn register_bot(
        &self,
        mut integration: Integration,
        name: &str,
        description: &str,
    ) -> Result<Integration, EngineError> {
        if integration.bot_id.is_some() {
            info!(
                event_name = "bots.already_registered",
                integration_id = %integration.id.0,
                "bot registration skipped, identifier already stored"
            );
            return Ok(integration);
        }

        let urls = handler_urls(&self.callback_base_url, &integration.id);
        let bot_id = self
            .portal
            .register_bot(&BotRegistration {
                code: bot_code(&integration),
                name: name.to_string(),
                description: description.to_string(),
                handler: urls.message_handler,
            })
            .await
            .map_err(map_portal_error)?;

        integration.bot_id = Some(bot_id.clone());
        integration.bot_enabled = true;
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;

        info!(
            event_name = "bots.registered",
            integration_id = %updated.id.0,
            bot_id = %bot_id,
            "chat bot registered in portal"
        );
        Ok(updated)
    }

    /// Removes the bot and clears every bot-related setting, including the
    /// persona link and welcome message.
    pub async fn unregister_bot(
        &self,
        mut integration: Integration,
    ) -> Result<Integration, EngineError> {
        let Some(bot_id) = integration.bot_id.clone() else {
            warn!(
                event_name = "bots.unregister_skipped",
                integration_id = %integration.id.0,
                "no bot registered, nothing to remove"
            );
            return Ok(integration);
        };

        self.portal.unregister_bot(&bot_id).await.map_err(map_portal_error)?;
        integration.clear_bot_config();
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;

        info!(
            event_name = "bots.unregistered",
            integration_id = %updated.id.0,
            "chat bot removed and bot config cleared"
        );
        Ok(updated)
    }

    pub async fn register_robot(
        &self,
        mut integration: Integration,
    ) -> Result<Integration, EngineError> {
        if integration.robot_registered {
            return Ok(integration);
        }

        let urls = handler_urls(&self.callback_base_url, &integration.id);
        self.portal
            .register_robot(&RobotRegistration {
                code: ROBOT_CODE.to_string(),
                name: "Send WhatsApp message".to_string(),
                handler: urls.message_handler,
            })
            .await
            .map_err(map_portal_error)?;

        integration.robot_registered = true;
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;
        info!(
            event_name = "bots.robot_registered",
            integration_id = %updated.id.0,
            "automation robot registered in portal"
        );
        Ok(updated)
    }

    pub async fn unregister_robot(
        &self,
        mut integration: Integration,
    ) -> Result<Integration, EngineError> {
        if !integration.robot_registered {
            return Ok(integration);
        }

        self.portal.unregister_robot(ROBOT_CODE).await.map_err(map_portal_error)?;
        integration.robot_registered = false;
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;
        info!(
            event_name = "bots.robot_unregistered",
            integration_id = %updated.id.0,
            "automation robot removed from portal"
        );
        Ok(updated)
    }

    pub async fn register_sms_provider(
        &self,
        mut integration: Integration,
    ) -> Result<Integration, EngineError> {
        if integration.sms_provider_registered {
            return Ok(integration);
        }

        let urls = handler_urls(&self.callback_base_url, &integration.id);
        self.portal
            .register_sms_provider(&SmsProviderRegistration {
                code: SMS_SENDER_CODE.to_string(),
                name: "WhatsApp sender".to_string(),
                handler: urls.message_handler,
            })
            .await
            .map_err(map_portal_error)?;

        integration.sms_provider_registered = true;
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;
        info!(
            event_name = "bots.sms_provider_registered",
            integration_id = %updated.id.0,
            "workflow sms sender registered in portal"
        );
        Ok(updated)
    }

    pub async fn unregister_sms_provider(
        &self,
        mut integration: Integration,
    ) -> Result<Integration, EngineError> {
        if !integration.sms_provider_registered {
            return Ok(integration);
        }

        self.portal.unregister_sms_provider(SMS_SENDER_CODE).await.map_err(map_portal_error)?;
        integration.sms_provider_registered = false;
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;
        info!(
            event_name = "bots.sms_provider_unregistered",
            integration_id = %updated.id.0,
            "workflow sms sender removed from portal"
        );
        Ok(updated)
    }
}

fn bot_code(integration: &Integration) -> String {
    let base = derive_connector_id(&integration.workspace_id, integration.member_id.as_deref());
    let mut code = format!("{base}_bot");
    code.truncate(CONNECTOR_ID_MAX_LEN);
    code
}
