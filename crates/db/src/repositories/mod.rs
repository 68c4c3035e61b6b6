use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use chatlink_core::domain::integration::{Integration, IntegrationId, Platform, WorkspaceId};
use chatlink_core::domain::linking::LinkingToken;
use chatlink_core::domain::mapping::{ChannelMapping, Instance, InstanceId, MappingId};

pub mod channel_mapping;
pub mod instance;
pub mod integration;
pub mod linking_token;
pub mod memory;

pub use channel_mapping::SqlChannelMappingRepository;
pub use instance::SqlInstanceRepository;
pub use integration::SqlIntegrationRepository;
pub use linking_token::SqlLinkingTokenRepository;
pub use memory::{
    InMemoryChannelMappingRepository, InMemoryInstanceRepository, InMemoryIntegrationRepository,
    InMemoryLinkingTokenRepository,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("stale revision for `{0}`")]
    StaleRevision(String),
    #[error("row not found: {0}")]
    NotFound(String),
}

impl RepositoryError {
    /// Folds sqlx unique-index failures into the typed variant so callers
    /// can distinguish a mapping conflict from an outage.
    pub fn from_write(error: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_error) = error {
            if db_error.is_unique_violation() {
                return Self::UniqueViolation(what.to_string());
            }
        }
        Self::Database(error)
    }
}

#[async_trait]
pub trait IntegrationRepository: Send + Sync {
    async fn find_by_id(&self, id: &IntegrationId) -> Result<Option<Integration>, RepositoryError>;

    async fn find_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        platform: Platform,
    ) -> Result<Option<Integration>, RepositoryError>;

    async fn find_by_domain(&self, domain: &str) -> Result<Vec<Integration>, RepositoryError>;

    async fn find_by_member_id(
        &self,
        member_id: &str,
    ) -> Result<Option<Integration>, RepositoryError>;

    async fn insert(&self, integration: &Integration) -> Result<(), RepositoryError>;

    /// Revision-guarded write: succeeds only if the stored row still carries
    /// `integration.revision`, and returns the row with the bumped revision.
    /// A concurrent writer that got there first surfaces as `StaleRevision`.
    async fn update(&self, integration: &Integration) -> Result<Integration, RepositoryError>;
}

#[async_trait]
pub trait LinkingTokenRepository: Send + Sync {
    /// Persists a new token and retires any unused predecessor for the same
    /// (workspace, platform) so at most one usable token exists at a time.
    async fn issue(&self, token: &LinkingToken) -> Result<(), RepositoryError>;

    /// Atomically marks an unused, unexpired token as used and returns it.
    /// `None` means absent, expired, or already consumed — indistinguishable
    /// on purpose.
    async fn consume(
        &self,
        token_value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LinkingToken>, RepositoryError>;
}

#[async_trait]
pub trait ChannelMappingRepository: Send + Sync {
    async fn insert(&self, mapping: &ChannelMapping) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &MappingId) -> Result<Option<ChannelMapping>, RepositoryError>;

    async fn find_active_by_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<ChannelMapping>, RepositoryError>;

    async fn list_for_integration(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<Vec<ChannelMapping>, RepositoryError>;

    async fn delete(&self, id: &MappingId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<Instance>, RepositoryError>;

    async fn list_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Instance>, RepositoryError>;
}
