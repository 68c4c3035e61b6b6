pub mod config;
pub mod domain;
pub mod errors;

pub use domain::connector::{derive_connector_id, ConnectorHealth, CONNECTOR_ID_MAX_LEN};
pub use domain::integration::{Integration, IntegrationId, Platform, WorkspaceId};
pub use domain::linking::{LinkingToken, LinkingTokenId};
pub use domain::mapping::{ChannelMapping, Instance, InstanceId, MappingId};
pub use errors::EngineError;
