//! In-memory repository implementations for engine unit tests. They enforce
//! the same invariants as the SQL implementations (uniqueness, revision
//! guard, single-use consumption) so tests exercise real failure paths.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use chatlink_core::domain::integration::{Integration, IntegrationId, Platform, WorkspaceId};
use chatlink_core::domain::linking::LinkingToken;
use chatlink_core::domain::mapping::{ChannelMapping, Instance, InstanceId, MappingId};

use super::{
    ChannelMappingRepository, InstanceRepository, IntegrationRepository, LinkingTokenRepository,
    RepositoryError,
};

#[derive(Default)]
pub struct InMemoryIntegrationRepository {
    rows: Mutex<HashMap<String, Integration>>,
}

impl InMemoryIntegrationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(integration: Integration) -> Self {
        let repo = Self::default();
        repo.rows
            .lock()
            .expect("lock poisoned")
            .insert(integration.id.0.clone(), integration);
        repo
    }
}

#[async_trait::async_trait]
impl IntegrationRepository for InMemoryIntegrationRepository {
    async fn find_by_id(&self, id: &IntegrationId) -> Result<Option<Integration>, RepositoryError> {
        Ok(self.rows.lock().expect("lock poisoned").get(&id.0).cloned())
    }

    async fn find_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        platform: Platform,
    ) -> Result<Option<Integration>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|row| row.workspace_id == *workspace_id && row.platform == platform)
            .cloned())
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Vec<Integration>, RepositoryError> {
        let mut matches: Vec<Integration> = self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|row| row.domain.as_deref() == Some(domain))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matches)
    }

    async fn find_by_member_id(
        &self,
        member_id: &str,
    ) -> Result<Option<Integration>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|row| row.member_id.as_deref() == Some(member_id))
            .cloned())
    }

    async fn insert(&self, integration: &Integration) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let duplicate = rows.values().any(|row| {
            row.workspace_id == integration.workspace_id && row.platform == integration.platform
        });
        if duplicate || rows.contains_key(&integration.id.0) {
            return Err(RepositoryError::UniqueViolation(format!(
                "integration for workspace `{}`",
                integration.workspace_id.0
            )));
        }
        rows.insert(integration.id.0.clone(), integration.clone());
        Ok(())
    }

    async fn update(&self, integration: &Integration) -> Result<Integration, RepositoryError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let stored = rows
            .get_mut(&integration.id.0)
            .ok_or_else(|| RepositoryError::NotFound(integration.id.0.clone()))?;
        if stored.revision != integration.revision {
            return Err(RepositoryError::StaleRevision(integration.id.0.clone()));
        }
        let mut updated = integration.clone();
        updated.revision += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }
}

#[derive(Default)]
pub struct InMemoryLinkingTokenRepository {
    rows: Mutex<Vec<LinkingToken>>,
}

impl InMemoryLinkingTokenRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LinkingTokenRepository for InMemoryLinkingTokenRepository {
    async fn issue(&self, token: &LinkingToken) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        if rows.iter().any(|row| row.token == token.token) {
            return Err(RepositoryError::UniqueViolation("linking token value".to_string()));
        }
        for row in rows.iter_mut() {
            if row.workspace_id == token.workspace_id && row.platform == token.platform {
                row.used = true;
            }
        }
        rows.push(token.clone());
        Ok(())
    }

    async fn consume(
        &self,
        token_value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LinkingToken>, RepositoryError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        for row in rows.iter_mut() {
            if row.token == token_value && row.is_usable(now) {
                row.used = true;
                return Ok(Some(row.clone()));
            }
        }
        Ok(None)
    }
}

#[derive(Default)]
pub struct InMemoryChannelMappingRepository {
    rows: Mutex<HashMap<String, ChannelMapping>>,
}

impl InMemoryChannelMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChannelMappingRepository for InMemoryChannelMappingRepository {
    async fn insert(&self, mapping: &ChannelMapping) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().expect("lock poisoned");
        let conflict = rows.values().any(|row| {
            row.active
                && (row.instance_id == mapping.instance_id
                    || (row.integration_id == mapping.integration_id
                        && row.line_id == mapping.line_id))
        });
        if conflict {
            return Err(RepositoryError::UniqueViolation(format!(
                "instance `{}` or line {} is already mapped",
                mapping.instance_id.0, mapping.line_id
            )));
        }
        rows.insert(mapping.id.0.clone(), mapping.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &MappingId) -> Result<Option<ChannelMapping>, RepositoryError> {
        Ok(self.rows.lock().expect("lock poisoned").get(&id.0).cloned())
    }

    async fn find_active_by_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<ChannelMapping>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .find(|row| row.active && row.instance_id == *instance_id)
            .cloned())
    }

    async fn list_for_integration(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<Vec<ChannelMapping>, RepositoryError> {
        let mut matches: Vec<ChannelMapping> = self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|row| row.integration_id == *integration_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matches)
    }

    async fn delete(&self, id: &MappingId) -> Result<bool, RepositoryError> {
        Ok(self.rows.lock().expect("lock poisoned").remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryInstanceRepository {
    rows: Mutex<HashMap<String, Instance>>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(instances: Vec<Instance>) -> Self {
        let repo = Self::default();
        {
            let mut rows = repo.rows.lock().expect("lock poisoned");
            for instance in instances {
                rows.insert(instance.id.0.clone(), instance);
            }
        }
        repo
    }
}

#[async_trait::async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<Instance>, RepositoryError> {
        Ok(self.rows.lock().expect("lock poisoned").get(&id.0).cloned())
    }

    async fn list_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Instance>, RepositoryError> {
        let mut matches: Vec<Instance> = self
            .rows
            .lock()
            .expect("lock poisoned")
            .values()
            .filter(|row| row.workspace_id == *workspace_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(matches)
    }
}
