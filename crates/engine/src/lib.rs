pub mod bots;
pub mod channels;
pub mod connector;
pub mod diagnostics;
pub mod identity;
pub mod mappings;
pub mod setup;
pub mod testing;
pub mod tokens;

pub use bots::BotRegistrar;
pub use channels::{ChannelActivator, ChannelView, ConnectorStatusReport};
pub use connector::{handler_urls, ConnectorRegistrar, HandlerUrls};
pub use diagnostics::{ConnectorDiagnosis, Diagnostics};
pub use identity::{CallbackParams, IdentityResolver, ResolvedIdentity};
pub use mappings::{CompleteSetupOutcome, MappingService};
pub use setup::{SetupOrchestrator, SetupReport};
pub use tokens::{TokenGrant, TokenManager};

use chatlink_core::EngineError;
use chatlink_crm::PortalError;
use chatlink_db::repositories::RepositoryError;

pub(crate) fn map_repo_error(error: RepositoryError) -> EngineError {
    match error {
        RepositoryError::UniqueViolation(what) => EngineError::Conflict(what),
        RepositoryError::StaleRevision(id) => {
            EngineError::Conflict(format!("integration `{id}` was modified concurrently"))
        }
        RepositoryError::NotFound(what) => EngineError::NotFound(what),
        other => EngineError::Persistence(other.to_string()),
    }
}

pub(crate) fn map_portal_error(error: PortalError) -> EngineError {
    match error {
        PortalError::MissingCredentials => {
            EngineError::Validation("integration has no usable portal credentials".to_string())
        }
        other => EngineError::RemoteApi(other.to_string()),
    }
}
