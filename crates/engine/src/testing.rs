//! Scripted portal and token-endpoint doubles for engine tests. Stateful
//! like the real portal (registrations accumulate, activations stick) so
//! tests can assert on drift and idempotency, with per-operation failure
//! injection for the non-aborting orchestrator paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use chatlink_crm::{
    BotRegistration, ConnectorInfo, ConnectorLineStatus, ConnectorRegistration, OpenLine,
    PlacementProbe, PortalApi, PortalError, RobotRegistration, SmsProviderRegistration,
    TokenEndpoint, TokenSet,
};

pub struct ScriptedTokenEndpoint {
    token: Option<(String, i64)>,
    rejection: Option<String>,
    exchange_calls: AtomicU32,
    refresh_calls: AtomicU32,
}

impl ScriptedTokenEndpoint {
    pub fn succeeding(access_token: &str, expires_in_secs: i64) -> Self {
        Self {
            token: Some((access_token.to_string(), expires_in_secs)),
            rejection: None,
            exchange_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
        }
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            token: None,
            rejection: Some(message.to_string()),
            exchange_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
        }
    }

    pub fn exchange_calls(&self) -> u32 {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn respond(&self) -> Result<TokenSet, PortalError> {
        if let Some(message) = &self.rejection {
            return Err(PortalError::Api { status: 400, message: message.clone() });
        }
        let (access_token, expires_in) = self.token.clone().expect("scripted token");
        Ok(TokenSet {
            access_token,
            refresh_token: Some("scripted-refresh".to_string()),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
        })
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedTokenEndpoint {
    async fn exchange_code(&self, _code: &str) -> Result<TokenSet, PortalError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.respond()
    }

    async fn exchange_client_credentials(&self) -> Result<TokenSet, PortalError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.respond()
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, PortalError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.respond()
    }
}

#[derive(Default)]
pub struct ScriptedPortal {
    pub lines: Mutex<Vec<OpenLine>>,
    pub connectors: Mutex<Vec<ConnectorInfo>>,
    pub activations: Mutex<HashMap<(String, i64), bool>>,
    pub bots: Mutex<Vec<String>>,
    pub robots: Mutex<Vec<String>>,
    pub sms_providers: Mutex<Vec<String>>,
    pub bound_events: Mutex<Vec<(String, String)>>,
    pub line_status_connected: Mutex<bool>,
    pub placement: Mutex<Option<PlacementProbe>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    next_bot_id: Mutex<i64>,
}

impl ScriptedPortal {
    pub fn new() -> Self {
        let portal = Self::default();
        *portal.line_status_connected.lock().expect("lock poisoned") = true;
        *portal.next_bot_id.lock().expect("lock poisoned") = 100;
        portal
    }

    pub fn with_lines(lines: Vec<OpenLine>) -> Self {
        let portal = Self::new();
        *portal.lines.lock().expect("lock poisoned") = lines;
        portal
    }

    /// Makes every subsequent call to `operation` fail with `message`.
    pub fn fail_operation(&self, operation: &str, message: &str) {
        self.failures
            .lock()
            .expect("lock poisoned")
            .insert(operation.to_string(), message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    pub fn seed_connector(&self, id: &str, name: &str) {
        self.connectors
            .lock()
            .expect("lock poisoned")
            .push(ConnectorInfo { id: id.to_string(), name: name.to_string() });
    }

    fn gate(&self, operation: &str) -> Result<(), PortalError> {
        self.calls.lock().expect("lock poisoned").push(operation.to_string());
        if let Some(message) = self.failures.lock().expect("lock poisoned").get(operation) {
            return Err(PortalError::Api { status: 401, message: message.clone() });
        }
        Ok(())
    }
}

#[async_trait]
impl PortalApi for ScriptedPortal {
    async fn register_connector(
        &self,
        registration: &ConnectorRegistration,
    ) -> Result<(), PortalError> {
        self.gate("register_connector")?;
        let mut connectors = self.connectors.lock().expect("lock poisoned");
        connectors.retain(|c| c.id != registration.connector);
        connectors.push(ConnectorInfo {
            id: registration.connector.clone(),
            name: registration.name.clone(),
        });
        Ok(())
    }

    async fn unregister_connector(&self, connector_id: &str) -> Result<(), PortalError> {
        self.gate("unregister_connector")?;
        self.connectors.lock().expect("lock poisoned").retain(|c| c.id != connector_id);
        self.activations.lock().expect("lock poisoned").retain(|(id, _), _| id != connector_id);
        Ok(())
    }

    async fn list_connectors(&self) -> Result<Vec<ConnectorInfo>, PortalError> {
        self.gate("list_connectors")?;
        Ok(self.connectors.lock().expect("lock poisoned").clone())
    }

    async fn activate_connector(
        &self,
        connector_id: &str,
        line_id: i64,
        active: bool,
    ) -> Result<(), PortalError> {
        self.gate("activate_connector")?;
        self.activations
            .lock()
            .expect("lock poisoned")
            .insert((connector_id.to_string(), line_id), active);
        Ok(())
    }

    async fn connector_status(
        &self,
        connector_id: &str,
        line_id: i64,
    ) -> Result<ConnectorLineStatus, PortalError> {
        self.gate("connector_status")?;
        let active = self
            .activations
            .lock()
            .expect("lock poisoned")
            .get(&(connector_id.to_string(), line_id))
            .copied()
            .unwrap_or(false);
        Ok(ConnectorLineStatus {
            active,
            connected: *self.line_status_connected.lock().expect("lock poisoned"),
            error: None,
        })
    }

    async fn list_lines(&self) -> Result<Vec<OpenLine>, PortalError> {
        self.gate("list_lines")?;
        Ok(self.lines.lock().expect("lock poisoned").clone())
    }

    async fn create_line(&self, name: &str) -> Result<OpenLine, PortalError> {
        self.gate("create_line")?;
        let mut lines = self.lines.lock().expect("lock poisoned");
        let id = lines.iter().map(|l| l.id).max().unwrap_or(0) + 1;
        let line = OpenLine { id, name: name.to_string(), active: true };
        lines.push(line.clone());
        Ok(line)
    }

    async fn register_bot(&self, registration: &BotRegistration) -> Result<String, PortalError> {
        self.gate("register_bot")?;
        let mut next = self.next_bot_id.lock().expect("lock poisoned");
        *next += 1;
        let id = next.to_string();
        drop(next);
        self.bots.lock().expect("lock poisoned").push(registration.code.clone());
        Ok(id)
    }

    async fn unregister_bot(&self, _bot_id: &str) -> Result<(), PortalError> {
        self.gate("unregister_bot")?;
        self.bots.lock().expect("lock poisoned").pop();
        Ok(())
    }

    async fn register_robot(&self, registration: &RobotRegistration) -> Result<(), PortalError> {
        self.gate("register_robot")?;
        self.robots.lock().expect("lock poisoned").push(registration.code.clone());
        Ok(())
    }

    async fn unregister_robot(&self, code: &str) -> Result<(), PortalError> {
        self.gate("unregister_robot")?;
        self.robots.lock().expect("lock poisoned").retain(|c| c != code);
        Ok(())
    }

    async fn register_sms_provider(
        &self,
        registration: &SmsProviderRegistration,
    ) -> Result<(), PortalError> {
        self.gate("register_sms_provider")?;
        self.sms_providers.lock().expect("lock poisoned").push(registration.code.clone());
        Ok(())
    }

    async fn unregister_sms_provider(&self, code: &str) -> Result<(), PortalError> {
        self.gate("unregister_sms_provider")?;
        self.sms_providers.lock().expect("lock poisoned").retain(|c| c != code);
        Ok(())
    }

    async fn bind_event(&self, event: &str, handler_url: &str) -> Result<(), PortalError> {
        self.gate("bind_event")?;
        self.bound_events
            .lock()
            .expect("lock poisoned")
            .push((event.to_string(), handler_url.to_string()));
        Ok(())
    }

    async fn unbind_event(&self, event: &str, handler_url: &str) -> Result<(), PortalError> {
        self.gate("unbind_event")?;
        self.bound_events
            .lock()
            .expect("lock poisoned")
            .retain(|(e, h)| !(e == event && h == handler_url));
        Ok(())
    }

    async fn probe_placement(
        &self,
        handler_url: &str,
        _connector_id: &str,
        _line_id: i64,
    ) -> Result<PlacementProbe, PortalError> {
        self.gate("probe_placement")?;
        if let Some(scripted) = self.placement.lock().expect("lock poisoned").clone() {
            return Ok(scripted);
        }
        Ok(PlacementProbe {
            reachable: true,
            status: Some(200),
            detail: format!("handler `{handler_url}` accepted the placement event"),
        })
    }
}
