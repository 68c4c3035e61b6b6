use chrono::{DateTime, Utc};
use sqlx::Row;

use chatlink_core::domain::integration::IntegrationId;
use chatlink_core::domain::mapping::{ChannelMapping, InstanceId, MappingId};

use super::{ChannelMappingRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChannelMappingRepository {
    pool: DbPool,
}

impl SqlChannelMappingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_mapping(row: &sqlx::sqlite::SqliteRow) -> Result<ChannelMapping, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let created_at_raw: String = row.try_get("created_at").map_err(decode)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid created_at: {e}")))?;

    Ok(ChannelMapping {
        id: MappingId(row.try_get("id").map_err(decode)?),
        integration_id: IntegrationId(row.try_get("integration_id").map_err(decode)?),
        instance_id: InstanceId(row.try_get("instance_id").map_err(decode)?),
        line_id: row.try_get("line_id").map_err(decode)?,
        line_name: row.try_get("line_name").map_err(decode)?,
        active: row.try_get::<i64, _>("active").map_err(decode)? != 0,
        created_at,
    })
}

#[async_trait::async_trait]
impl ChannelMappingRepository for SqlChannelMappingRepository {
    async fn insert(&self, mapping: &ChannelMapping) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO channel_mapping (id, integration_id, instance_id, line_id, line_name, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&mapping.id.0)
        .bind(&mapping.integration_id.0)
        .bind(&mapping.instance_id.0)
        .bind(mapping.line_id)
        .bind(&mapping.line_name)
        .bind(mapping.active as i64)
        .bind(mapping.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryError::from_write(
                e,
                &format!(
                    "instance `{}` or line {} is already mapped",
                    mapping.instance_id.0, mapping.line_id
                ),
            )
        })?;

        Ok(())
    }

    async fn find_by_id(&self, id: &MappingId) -> Result<Option<ChannelMapping>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, integration_id, instance_id, line_id, line_name, active, created_at
             FROM channel_mapping WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_mapping(r)?)),
            None => Ok(None),
        }
    }

    async fn find_active_by_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Option<ChannelMapping>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, integration_id, instance_id, line_id, line_name, active, created_at
             FROM channel_mapping WHERE instance_id = ? AND active = 1",
        )
        .bind(&instance_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_mapping(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_integration(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<Vec<ChannelMapping>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, integration_id, instance_id, line_id, line_name, active, created_at
             FROM channel_mapping WHERE integration_id = ? ORDER BY created_at",
        )
        .bind(&integration_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_mapping).collect()
    }

    async fn delete(&self, id: &MappingId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM channel_mapping WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
