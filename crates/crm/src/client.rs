use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{
    BotRegistration, ConnectorInfo, ConnectorLineStatus, ConnectorRegistration, OpenLine,
    PlacementProbe, RobotRegistration, SmsProviderRegistration,
};

const METHOD_CONNECTOR_REGISTER: &str = "imconnector.register";
const METHOD_CONNECTOR_UNREGISTER: &str = "imconnector.unregister";
const METHOD_CONNECTOR_LIST: &str = "imconnector.list";
const METHOD_CONNECTOR_ACTIVATE: &str = "imconnector.activate";
const METHOD_CONNECTOR_STATUS: &str = "imconnector.status";
const METHOD_LINES_LIST: &str = "imopenlines.config.list.get";
const METHOD_LINE_ADD: &str = "imopenlines.config.add";
const METHOD_BOT_REGISTER: &str = "imbot.register";
const METHOD_BOT_UNREGISTER: &str = "imbot.unregister";
const METHOD_ROBOT_ADD: &str = "bizproc.robot.add";
const METHOD_ROBOT_DELETE: &str = "bizproc.robot.delete";
const METHOD_SMS_SENDER_ADD: &str = "messageservice.sender.add";
const METHOD_SMS_SENDER_DELETE: &str = "messageservice.sender.delete";
const METHOD_EVENT_BIND: &str = "event.bind";
const METHOD_EVENT_UNBIND: &str = "event.unbind";

/// Read-only calls get a short bounded retry; mutating calls are single-shot
/// so a slow portal never produces duplicate registrations.
const READ_MAX_ATTEMPTS: u32 = 3;
const READ_RETRY_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("portal request failed: {0}")]
    Transport(String),
    #[error("portal returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("could not decode portal response: {0}")]
    Decode(String),
    #[error("integration has no usable portal credentials")]
    MissingCredentials,
}

impl PortalError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// How a request authenticates against the portal: an OAuth access token
/// appended to the tenant's REST endpoint, or a static inbound-webhook URL
/// that already embeds the credential.
#[derive(Clone, Debug)]
pub enum PortalCredentials {
    OAuth { domain: String, access_token: String },
    Webhook { base_url: String },
}

impl PortalCredentials {
    fn endpoint(&self, method: &str) -> String {
        match self {
            Self::OAuth { domain, .. } => format!("https://{domain}/rest/{method}"),
            Self::Webhook { base_url } => {
                format!("{}/{method}", base_url.trim_end_matches('/'))
            }
        }
    }

    fn auth_query(&self) -> Option<(&'static str, &str)> {
        match self {
            Self::OAuth { access_token, .. } => Some(("auth", access_token.as_str())),
            Self::Webhook { .. } => None,
        }
    }
}

/// Every remote operation the lifecycle engine performs. `PortalClient` is
/// the HTTP implementation; tests substitute a scripted one.
#[async_trait]
pub trait PortalApi: Send + Sync {
    async fn register_connector(
        &self,
        registration: &ConnectorRegistration,
    ) -> Result<(), PortalError>;

    async fn unregister_connector(&self, connector_id: &str) -> Result<(), PortalError>;

    async fn list_connectors(&self) -> Result<Vec<ConnectorInfo>, PortalError>;

    async fn activate_connector(
        &self,
        connector_id: &str,
        line_id: i64,
        active: bool,
    ) -> Result<(), PortalError>;

    async fn connector_status(
        &self,
        connector_id: &str,
        line_id: i64,
    ) -> Result<ConnectorLineStatus, PortalError>;

    async fn list_lines(&self) -> Result<Vec<OpenLine>, PortalError>;

    async fn create_line(&self, name: &str) -> Result<OpenLine, PortalError>;

    async fn register_bot(&self, registration: &BotRegistration) -> Result<String, PortalError>;

    async fn unregister_bot(&self, bot_id: &str) -> Result<(), PortalError>;

    async fn register_robot(&self, registration: &RobotRegistration) -> Result<(), PortalError>;

    async fn unregister_robot(&self, code: &str) -> Result<(), PortalError>;

    async fn register_sms_provider(
        &self,
        registration: &SmsProviderRegistration,
    ) -> Result<(), PortalError>;

    async fn unregister_sms_provider(&self, code: &str) -> Result<(), PortalError>;

    async fn bind_event(&self, event: &str, handler_url: &str) -> Result<(), PortalError>;

    async fn unbind_event(&self, event: &str, handler_url: &str) -> Result<(), PortalError>;

    /// Fires the placement-open payload the portal would send at the given
    /// handler URL and reports what came back. No remote state is touched.
    async fn probe_placement(
        &self,
        handler_url: &str,
        connector_id: &str,
        line_id: i64,
    ) -> Result<PlacementProbe, PortalError>;
}

#[derive(Debug, Deserialize)]
struct PortalEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

pub struct PortalClient {
    http: reqwest::Client,
    credentials: PortalCredentials,
}

impl PortalClient {
    pub fn new(credentials: PortalCredentials, timeout: Duration) -> Result<Self, PortalError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortalError::Transport(e.to_string()))?;
        Ok(Self { http, credentials })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, PortalError> {
        let url = self.credentials.endpoint(method);
        debug!(method, "portal rest call");

        let mut request = self.http.post(&url).json(&params);
        if let Some((key, value)) = self.credentials.auth_query() {
            request = request.query(&[(key, value)]);
        }

        let response =
            request.send().await.map_err(|e| PortalError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let envelope: PortalEnvelope =
            response.json().await.map_err(|e| PortalError::Decode(e.to_string()))?;

        if let Some(error) = envelope.error {
            let message = match envelope.error_description {
                Some(description) => format!("{error}: {description}"),
                None => error,
            };
            return Err(PortalError::Api { status, message });
        }
        if !(200..300).contains(&status) {
            return Err(PortalError::Api {
                status,
                message: "portal returned a non-success response".to_string(),
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }

    /// Retry wrapper for idempotent read methods. Mutations never go
    /// through here.
    async fn call_read(&self, method: &str, params: Value) -> Result<Value, PortalError> {
        let mut attempt = 1;
        let mut delay = Duration::from_millis(READ_RETRY_BASE_DELAY_MS);

        loop {
            match self.call(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_transient() && attempt < READ_MAX_ATTEMPTS => {
                    warn!(method, attempt, error = %error, "transient portal read failure, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, PortalError> {
        serde_json::from_value(value).map_err(|e| PortalError::Decode(e.to_string()))
    }
}

#[async_trait]
impl PortalApi for PortalClient {
    async fn register_connector(
        &self,
        registration: &ConnectorRegistration,
    ) -> Result<(), PortalError> {
        let params = serde_json::to_value(registration)
            .map_err(|e| PortalError::Decode(e.to_string()))?;
        self.call(METHOD_CONNECTOR_REGISTER, params).await?;
        Ok(())
    }

    async fn unregister_connector(&self, connector_id: &str) -> Result<(), PortalError> {
        self.call(METHOD_CONNECTOR_UNREGISTER, json!({ "CONNECTOR": connector_id })).await?;
        Ok(())
    }

    async fn list_connectors(&self) -> Result<Vec<ConnectorInfo>, PortalError> {
        let result = self.call_read(METHOD_CONNECTOR_LIST, json!({})).await?;
        Self::decode(result)
    }

    async fn activate_connector(
        &self,
        connector_id: &str,
        line_id: i64,
        active: bool,
    ) -> Result<(), PortalError> {
        self.call(
            METHOD_CONNECTOR_ACTIVATE,
            json!({
                "CONNECTOR": connector_id,
                "LINE": line_id,
                "ACTIVE": if active { 1 } else { 0 },
            }),
        )
        .await?;
        Ok(())
    }

    async fn connector_status(
        &self,
        connector_id: &str,
        line_id: i64,
    ) -> Result<ConnectorLineStatus, PortalError> {
        let result = self
            .call_read(
                METHOD_CONNECTOR_STATUS,
                json!({ "CONNECTOR": connector_id, "LINE": line_id }),
            )
            .await?;
        Self::decode(result)
    }

    async fn list_lines(&self) -> Result<Vec<OpenLine>, PortalError> {
        let result = self.call_read(METHOD_LINES_LIST, json!({})).await?;
        Self::decode(result)
    }

    async fn create_line(&self, name: &str) -> Result<OpenLine, PortalError> {
        let result = self.call(METHOD_LINE_ADD, json!({ "PARAMS": { "LINE_NAME": name } })).await?;
        Self::decode(result)
    }

    async fn register_bot(&self, registration: &BotRegistration) -> Result<String, PortalError> {
        let params = serde_json::to_value(registration)
            .map_err(|e| PortalError::Decode(e.to_string()))?;
        let result = self.call(METHOD_BOT_REGISTER, params).await?;
        match result {
            Value::String(id) => Ok(id),
            Value::Number(id) => Ok(id.to_string()),
            other => Err(PortalError::Decode(format!("unexpected bot id payload: {other}"))),
        }
    }

    async fn unregister_bot(&self, bot_id: &str) -> Result<(), PortalError> {
        self.call(METHOD_BOT_UNREGISTER, json!({ "BOT_ID": bot_id })).await?;
        Ok(())
    }

    async fn register_robot(&self, registration: &RobotRegistration) -> Result<(), PortalError> {
        let params = serde_json::to_value(registration)
            .map_err(|e| PortalError::Decode(e.to_string()))?;
        self.call(METHOD_ROBOT_ADD, params).await?;
        Ok(())
    }

    async fn unregister_robot(&self, code: &str) -> Result<(), PortalError> {
        self.call(METHOD_ROBOT_DELETE, json!({ "CODE": code })).await?;
        Ok(())
    }

    async fn register_sms_provider(
        &self,
        registration: &SmsProviderRegistration,
    ) -> Result<(), PortalError> {
        let params = serde_json::to_value(registration)
            .map_err(|e| PortalError::Decode(e.to_string()))?;
        self.call(METHOD_SMS_SENDER_ADD, params).await?;
        Ok(())
    }

    async fn unregister_sms_provider(&self, code: &str) -> Result<(), PortalError> {
        self.call(METHOD_SMS_SENDER_DELETE, json!({ "CODE": code })).await?;
        Ok(())
    }

    async fn bind_event(&self, event: &str, handler_url: &str) -> Result<(), PortalError> {
        self.call(METHOD_EVENT_BIND, json!({ "EVENT": event, "HANDLER": handler_url })).await?;
        Ok(())
    }

    async fn unbind_event(&self, event: &str, handler_url: &str) -> Result<(), PortalError> {
        self.call(METHOD_EVENT_UNBIND, json!({ "EVENT": event, "HANDLER": handler_url })).await?;
        Ok(())
    }

    async fn probe_placement(
        &self,
        handler_url: &str,
        connector_id: &str,
        line_id: i64,
    ) -> Result<PlacementProbe, PortalError> {
        // Same form shape the portal sends when a user opens the connector
        // widget inside a conversation.
        let payload = json!({
            "PLACEMENT": "SETTING_CONNECTOR",
            "PLACEMENT_OPTIONS": { "CONNECTOR": connector_id, "LINE": line_id },
        });

        match self.http.post(handler_url).json(&payload).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let detail = if (200..300).contains(&status) {
                    "handler accepted the placement event".to_string()
                } else {
                    format!("handler answered with status {status}")
                };
                Ok(PlacementProbe {
                    reachable: true,
                    status: Some(status),
                    detail,
                })
            }
            Err(error) => Ok(PlacementProbe {
                reachable: false,
                status: None,
                detail: format!("handler unreachable: {error}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PortalCredentials, PortalError};

    #[test]
    fn oauth_credentials_build_tenant_endpoints() {
        let credentials = PortalCredentials::OAuth {
            domain: "acme.portal.example".to_string(),
            access_token: "tok".to_string(),
        };

        assert_eq!(
            credentials.endpoint("imconnector.register"),
            "https://acme.portal.example/rest/imconnector.register"
        );
        assert_eq!(credentials.auth_query(), Some(("auth", "tok")));
    }

    #[test]
    fn webhook_credentials_embed_the_secret_in_the_base_url() {
        let credentials = PortalCredentials::Webhook {
            base_url: "https://acme.portal.example/rest/1/s3cr3t/".to_string(),
        };

        assert_eq!(
            credentials.endpoint("imopenlines.config.list.get"),
            "https://acme.portal.example/rest/1/s3cr3t/imopenlines.config.list.get"
        );
        assert_eq!(credentials.auth_query(), None);
    }

    #[test]
    fn transient_errors_are_retryable_and_api_rejections_are_not() {
        assert!(PortalError::Transport("timeout".to_string()).is_transient());
        assert!(PortalError::Api { status: 502, message: "bad gateway".to_string() }
            .is_transient());
        assert!(!PortalError::Api { status: 401, message: "expired".to_string() }.is_transient());
        assert!(!PortalError::Decode("bad json".to_string()).is_transient());
    }
}
