use chrono::{DateTime, Utc};
use sqlx::Row;

use chatlink_core::domain::integration::{Integration, IntegrationId, Platform, WorkspaceId};

use super::{IntegrationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlIntegrationRepository {
    pool: DbPool,
}

impl SqlIntegrationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const INTEGRATION_COLUMNS: &str = "id, workspace_id, platform, domain, member_id, access_token, \
     refresh_token, token_expires_at, token_refresh_failed, webhook_url, connector_id, \
     registered, activated, connection_verified_at, bot_id, bot_enabled, bot_persona_id, \
     bot_welcome_message, robot_registered, sms_provider_registered, active, last_synced_at, \
     revision, created_at, updated_at";

fn decode<T>(result: Result<T, sqlx::Error>) -> Result<T, RepositoryError> {
    result.map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{raw}`: {e}")))
}

fn parse_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| parse_timestamp(&value)).transpose()
}

fn row_to_integration(row: &sqlx::sqlite::SqliteRow) -> Result<Integration, RepositoryError> {
    let id: String = decode(row.try_get("id"))?;
    let workspace_id: String = decode(row.try_get("workspace_id"))?;
    let platform_raw: String = decode(row.try_get("platform"))?;
    let platform = Platform::parse(&platform_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unsupported platform `{platform_raw}` for `{id}`"))
    })?;

    Ok(Integration {
        id: IntegrationId(id),
        workspace_id: WorkspaceId(workspace_id),
        platform,
        domain: decode(row.try_get("domain"))?,
        member_id: decode(row.try_get("member_id"))?,
        access_token: decode(row.try_get("access_token"))?,
        refresh_token: decode(row.try_get("refresh_token"))?,
        token_expires_at: parse_optional_timestamp(decode(row.try_get("token_expires_at"))?)?,
        token_refresh_failed: decode(row.try_get::<i64, _>("token_refresh_failed"))? != 0,
        webhook_url: decode(row.try_get("webhook_url"))?,
        connector_id: decode(row.try_get("connector_id"))?,
        registered: decode(row.try_get::<i64, _>("registered"))? != 0,
        activated: decode(row.try_get::<i64, _>("activated"))? != 0,
        connection_verified_at: parse_optional_timestamp(decode(
            row.try_get("connection_verified_at"),
        )?)?,
        bot_id: decode(row.try_get("bot_id"))?,
        bot_enabled: decode(row.try_get::<i64, _>("bot_enabled"))? != 0,
        bot_persona_id: decode(row.try_get("bot_persona_id"))?,
        bot_welcome_message: decode(row.try_get("bot_welcome_message"))?,
        robot_registered: decode(row.try_get::<i64, _>("robot_registered"))? != 0,
        sms_provider_registered: decode(row.try_get::<i64, _>("sms_provider_registered"))? != 0,
        active: decode(row.try_get::<i64, _>("active"))? != 0,
        last_synced_at: parse_optional_timestamp(decode(row.try_get("last_synced_at"))?)?,
        revision: decode(row.try_get("revision"))?,
        created_at: parse_timestamp(&decode(row.try_get::<String, _>("created_at"))?)?,
        updated_at: parse_timestamp(&decode(row.try_get::<String, _>("updated_at"))?)?,
    })
}

#[async_trait::async_trait]
impl IntegrationRepository for SqlIntegrationRepository {
    async fn find_by_id(&self, id: &IntegrationId) -> Result<Option<Integration>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {INTEGRATION_COLUMNS} FROM integration WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_integration(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        platform: Platform,
    ) -> Result<Option<Integration>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integration WHERE workspace_id = ? AND platform = ?"
        ))
        .bind(&workspace_id.0)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_integration(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Vec<Integration>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integration WHERE domain = ? ORDER BY created_at"
        ))
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_integration).collect()
    }

    async fn find_by_member_id(
        &self,
        member_id: &str,
    ) -> Result<Option<Integration>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INTEGRATION_COLUMNS} FROM integration WHERE member_id = ?"
        ))
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_integration(r)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, integration: &Integration) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO integration (
                id, workspace_id, platform, domain, member_id, access_token, refresh_token,
                token_expires_at, token_refresh_failed, webhook_url, connector_id, registered,
                activated, connection_verified_at, bot_id, bot_enabled, bot_persona_id,
                bot_welcome_message, robot_registered, sms_provider_registered, active,
                last_synced_at, revision, created_at, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&integration.id.0)
        .bind(&integration.workspace_id.0)
        .bind(integration.platform.as_str())
        .bind(&integration.domain)
        .bind(&integration.member_id)
        .bind(&integration.access_token)
        .bind(&integration.refresh_token)
        .bind(integration.token_expires_at.map(|dt| dt.to_rfc3339()))
        .bind(integration.token_refresh_failed as i64)
        .bind(&integration.webhook_url)
        .bind(&integration.connector_id)
        .bind(integration.registered as i64)
        .bind(integration.activated as i64)
        .bind(integration.connection_verified_at.map(|dt| dt.to_rfc3339()))
        .bind(&integration.bot_id)
        .bind(integration.bot_enabled as i64)
        .bind(&integration.bot_persona_id)
        .bind(&integration.bot_welcome_message)
        .bind(integration.robot_registered as i64)
        .bind(integration.sms_provider_registered as i64)
        .bind(integration.active as i64)
        .bind(integration.last_synced_at.map(|dt| dt.to_rfc3339()))
        .bind(integration.revision)
        .bind(integration.created_at.to_rfc3339())
        .bind(integration.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            RepositoryError::from_write(
                e,
                &format!(
                    "integration for workspace `{}` and platform `{}`",
                    integration.workspace_id.0, integration.platform
                ),
            )
        })?;

        Ok(())
    }

    async fn update(&self, integration: &Integration) -> Result<Integration, RepositoryError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE integration SET
                domain = ?, member_id = ?, access_token = ?, refresh_token = ?,
                token_expires_at = ?, token_refresh_failed = ?, webhook_url = ?,
                connector_id = ?, registered = ?, activated = ?, connection_verified_at = ?,
                bot_id = ?, bot_enabled = ?, bot_persona_id = ?, bot_welcome_message = ?,
                robot_registered = ?, sms_provider_registered = ?, active = ?,
                last_synced_at = ?, revision = revision + 1, updated_at = ?
             WHERE id = ? AND revision = ?",
        )
        .bind(&integration.domain)
        .bind(&integration.member_id)
        .bind(&integration.access_token)
        .bind(&integration.refresh_token)
        .bind(integration.token_expires_at.map(|dt| dt.to_rfc3339()))
        .bind(integration.token_refresh_failed as i64)
        .bind(&integration.webhook_url)
        .bind(&integration.connector_id)
        .bind(integration.registered as i64)
        .bind(integration.activated as i64)
        .bind(integration.connection_verified_at.map(|dt| dt.to_rfc3339()))
        .bind(&integration.bot_id)
        .bind(integration.bot_enabled as i64)
        .bind(&integration.bot_persona_id)
        .bind(&integration.bot_welcome_message)
        .bind(integration.robot_registered as i64)
        .bind(integration.sms_provider_registered as i64)
        .bind(integration.active as i64)
        .bind(integration.last_synced_at.map(|dt| dt.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(&integration.id.0)
        .bind(integration.revision)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::StaleRevision(integration.id.0.clone()));
        }

        let mut updated = integration.clone();
        updated.revision += 1;
        updated.updated_at = now;
        Ok(updated)
    }
}
