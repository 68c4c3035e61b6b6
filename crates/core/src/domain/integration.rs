use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::connector::ConnectorHealth;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntegrationId(pub String);

impl IntegrationId {
    pub fn generate() -> Self {
        Self(format!("INT-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

/// Remote contact-center platform a workspace can be linked to. One
/// Integration row exists per (workspace, platform) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    OpenChannels,
}

impl Platform {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open_channels" | "openchannels" => Some(Self::OpenChannels),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenChannels => "open_channels",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The shared mutable record of one workspace↔portal link.
///
/// Every lifecycle component reads and writes this row; writes are guarded
/// by the `revision` counter so concurrent handlers against the same
/// Integration serialize instead of overwriting each other's tokens or
/// flags. Tokens never cross the client boundary; response DTOs carry
/// booleans derived from them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub id: IntegrationId,
    pub workspace_id: WorkspaceId,
    pub platform: Platform,
    pub domain: Option<String>,
    pub member_id: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub token_refresh_failed: bool,
    pub webhook_url: Option<String>,
    pub connector_id: Option<String>,
    pub registered: bool,
    pub activated: bool,
    pub connection_verified_at: Option<DateTime<Utc>>,
    pub bot_id: Option<String>,
    pub bot_enabled: bool,
    pub bot_persona_id: Option<String>,
    pub bot_welcome_message: Option<String>,
    pub robot_registered: bool,
    pub sms_provider_registered: bool,
    pub active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(workspace_id: WorkspaceId, platform: Platform) -> Self {
        let now = Utc::now();
        Self {
            id: IntegrationId::generate(),
            workspace_id,
            platform,
            domain: None,
            member_id: None,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            token_refresh_failed: false,
            webhook_url: None,
            connector_id: None,
            registered: false,
            activated: false,
            connection_verified_at: None,
            bot_id: None,
            bot_enabled: false,
            bot_persona_id: None,
            bot_welcome_message: None,
            robot_registered: false,
            sms_provider_registered: false,
            active: true,
            last_synced_at: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pure expiry predicate used as a precondition by every outbound call
    /// site. A token expiring one second from `now` is still fresh; a token
    /// with no recorded expiry is treated as expired and forces a refresh.
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.token_expires_at {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }

    /// Webhook-credential integrations bypass the OAuth token manager
    /// entirely; there is nothing to refresh.
    pub fn uses_webhook_credentials(&self) -> bool {
        self.webhook_url.is_some() && self.access_token.is_none()
    }

    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some() || self.webhook_url.is_some()
    }

    /// An integration that has a portal bound but no completed install yet;
    /// candidate for domain-based identity resolution.
    pub fn is_pending_install(&self) -> bool {
        self.domain.is_some() && !self.has_credentials()
    }

    pub fn health(&self) -> ConnectorHealth {
        ConnectorHealth::from_flags(self.registered, self.activated)
    }

    /// Stores a fresh token set in one step: partial token state (new access
    /// token with a stale expiry, or vice versa) must never be observable.
    pub fn apply_token_set(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        self.access_token = Some(access_token);
        self.refresh_token = refresh_token;
        self.token_expires_at = expires_at;
        self.token_refresh_failed = false;
    }

    pub fn clear_bot_config(&mut self) {
        self.bot_id = None;
        self.bot_enabled = false;
        self.bot_persona_id = None;
        self.bot_welcome_message = None;
    }
}
