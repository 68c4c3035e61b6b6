use serde::{Deserialize, Serialize};

use crate::domain::integration::WorkspaceId;

/// The remote registry rejects connector codes longer than this.
pub const CONNECTOR_ID_MAX_LEN: usize = 50;

/// Lifecycle of the connector object inside the portal registry.
///
/// Registration (the object exists), activation (the object is wired to a
/// line) and connection (the portal can reach our callback) are three
/// independent facts. The first two order into this small state machine;
/// connection is an orthogonal, re-checkable observation carried as
/// `connection_verified_at` on the Integration, deliberately not a state
/// here — a verified connection can go stale without any transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    Unregistered,
    Registered,
    Activated,
}

impl ConnectorHealth {
    pub fn from_flags(registered: bool, activated: bool) -> Self {
        match (registered, activated) {
            (false, _) => Self::Unregistered,
            (true, false) => Self::Registered,
            (true, true) => Self::Activated,
        }
    }

    pub fn is_registered(&self) -> bool {
        !matches!(self, Self::Unregistered)
    }

    /// Valid forward transitions; anything else is drift that diagnostics
    /// should report rather than silently apply.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unregistered, Self::Registered)
                | (Self::Registered, Self::Activated)
                | (Self::Activated, Self::Registered)
                | (Self::Registered, Self::Unregistered)
                | (Self::Activated, Self::Unregistered)
        )
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Unregistered => "connector is not registered in the portal",
            Self::Registered => "connector is registered but not wired to a line",
            Self::Activated => "connector is registered and active on a line",
        }
    }
}

/// Derives the connector code sent to the portal registry from the local
/// identity. Lowercased, non-alphanumeric characters stripped, truncated to
/// the registry limit. Deterministic, so repeated registrations converge on
/// the same remote object instead of piling up duplicates.
pub fn derive_connector_id(workspace_id: &WorkspaceId, member_id: Option<&str>) -> String {
    let identity = member_id.filter(|m| !m.trim().is_empty()).unwrap_or(workspace_id.0.as_str());
    let sanitized: String = identity
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let mut code = format!("wa_{sanitized}");
    code.truncate(CONNECTOR_ID_MAX_LEN);
    code
}

#[cfg(test)]
mod tests {
    use super::{derive_connector_id, ConnectorHealth, CONNECTOR_ID_MAX_LEN};
    use crate::domain::integration::WorkspaceId;

    #[test]
    fn derivation_is_deterministic_and_sanitized() {
        let workspace = WorkspaceId("ws-42".to_string());
        let first = derive_connector_id(&workspace, Some("Member.ID@Portal-7"));
        let second = derive_connector_id(&workspace, Some("Member.ID@Portal-7"));

        assert_eq!(first, second);
        assert_eq!(first, "wa_memberidportal7");
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn derivation_falls_back_to_workspace_identity() {
        let workspace = WorkspaceId("ws-42".to_string());
        assert_eq!(derive_connector_id(&workspace, None), "wa_ws42");
        assert_eq!(derive_connector_id(&workspace, Some("  ")), "wa_ws42");
    }

    #[test]
    fn derivation_respects_the_registry_length_limit() {
        let workspace = WorkspaceId("w".repeat(120));
        let code = derive_connector_id(&workspace, None);
        assert_eq!(code.len(), CONNECTOR_ID_MAX_LEN);
    }

    #[test]
    fn health_orders_registration_before_activation() {
        assert_eq!(ConnectorHealth::from_flags(false, false), ConnectorHealth::Unregistered);
        assert_eq!(ConnectorHealth::from_flags(true, false), ConnectorHealth::Registered);
        assert_eq!(ConnectorHealth::from_flags(true, true), ConnectorHealth::Activated);
        // An activated flag without registration is drift, not a state.
        assert_eq!(ConnectorHealth::from_flags(false, true), ConnectorHealth::Unregistered);
    }

    #[test]
    fn activation_requires_registration_first() {
        assert!(!ConnectorHealth::Unregistered.can_transition_to(ConnectorHealth::Activated));
        assert!(ConnectorHealth::Unregistered.can_transition_to(ConnectorHealth::Registered));
        assert!(ConnectorHealth::Registered.can_transition_to(ConnectorHealth::Activated));
    }
}
