use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::integration::{IntegrationId, WorkspaceId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingId(pub String);

impl MappingId {
    pub fn generate() -> Self {
        Self(format!("MAP-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

/// One local-instance ↔ remote-line association. An instance appears in at
/// most one active mapping, and so does a line; the store enforces both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapping {
    pub id: MappingId,
    pub integration_id: IntegrationId,
    pub instance_id: InstanceId,
    pub line_id: i64,
    pub line_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl ChannelMapping {
    pub fn new(
        integration_id: IntegrationId,
        instance_id: InstanceId,
        line_id: i64,
        line_name: impl Into<String>,
    ) -> Self {
        Self {
            id: MappingId::generate(),
            integration_id,
            instance_id,
            line_id,
            line_name: line_name.into(),
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// A connected WhatsApp number, owned by the host application. This
/// subsystem only ever reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub workspace_id: WorkspaceId,
    pub phone_number: String,
    pub label: Option<String>,
    pub connected: bool,
}
