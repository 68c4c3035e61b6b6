pub mod client;
pub mod oauth;
pub mod types;

pub use client::{PortalApi, PortalClient, PortalCredentials, PortalError};
pub use oauth::{OAuthClient, TokenEndpoint, TokenSet};
pub use types::{
    BotRegistration, ConnectorInfo, ConnectorLineStatus, ConnectorRegistration, OpenLine,
    PlacementProbe, RobotRegistration, SmsProviderRegistration,
};
