use serde::{Deserialize, Serialize};

/// Payload for `imconnector.register`. The handler URLs are cached by the
/// portal at registration time, which is why reconfiguration recreates the
/// connector instead of patching it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ConnectorRegistration {
    pub connector: String,
    pub name: String,
    pub handler: String,
    pub placement_handler: String,
}

/// One connector object owned by this application in the portal registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ConnectorInfo {
    pub id: String,
    pub name: String,
}

/// Remote per-line view of a connector: wired to the line, reachable, and
/// currently switched on. Registration existence is the caller's knowledge,
/// not part of this payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ConnectorLineStatus {
    pub active: bool,
    pub connected: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// A remote conversation channel ("Open Line").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct OpenLine {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

/// Payload for `imbot.register`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct BotRegistration {
    pub code: String,
    pub name: String,
    pub description: String,
    pub handler: String,
}

/// Payload for `bizproc.robot.add`. Parameterization happens inside the
/// portal's own automation editor; registration only declares the action.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct RobotRegistration {
    pub code: String,
    pub name: String,
    pub handler: String,
}

/// Payload for `messageservice.sender.add`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct SmsProviderRegistration {
    pub code: String,
    pub name: String,
    pub handler: String,
}

/// Observed outcome of firing the placement-open payload at our own
/// registered handler URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementProbe {
    pub reachable: bool,
    pub status: Option<u16>,
    pub detail: String,
}
