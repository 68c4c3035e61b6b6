use sqlx::Row;

use chatlink_core::domain::integration::WorkspaceId;
use chatlink_core::domain::mapping::{Instance, InstanceId};

use super::{InstanceRepository, RepositoryError};
use crate::DbPool;

/// Read-only access to the host application's connected WhatsApp numbers.
pub struct SqlInstanceRepository {
    pool: DbPool,
}

impl SqlInstanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<Instance, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    Ok(Instance {
        id: InstanceId(row.try_get("id").map_err(decode)?),
        workspace_id: WorkspaceId(row.try_get("workspace_id").map_err(decode)?),
        phone_number: row.try_get("phone_number").map_err(decode)?,
        label: row.try_get("label").map_err(decode)?,
        connected: row.try_get::<i64, _>("connected").map_err(decode)? != 0,
    })
}

#[async_trait::async_trait]
impl InstanceRepository for SqlInstanceRepository {
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<Instance>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, workspace_id, phone_number, label, connected FROM instance WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_instance(r)?)),
            None => Ok(None),
        }
    }

    async fn list_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<Instance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, workspace_id, phone_number, label, connected
             FROM instance WHERE workspace_id = ? ORDER BY id",
        )
        .bind(&workspace_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_instance).collect()
    }
}
