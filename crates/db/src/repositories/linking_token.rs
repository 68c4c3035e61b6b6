use chrono::{DateTime, Utc};
use sqlx::Row;

use chatlink_core::domain::integration::{Platform, WorkspaceId};
use chatlink_core::domain::linking::{LinkingToken, LinkingTokenId};

use super::{LinkingTokenRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLinkingTokenRepository {
    pool: DbPool,
}

impl SqlLinkingTokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_token(row: &sqlx::sqlite::SqliteRow) -> Result<LinkingToken, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Decode(e.to_string());

    let id: String = row.try_get("id").map_err(decode)?;
    let token: String = row.try_get("token").map_err(decode)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(decode)?;
    let platform_raw: String = row.try_get("platform").map_err(decode)?;
    let expires_at_raw: String = row.try_get("expires_at").map_err(decode)?;
    let used: i64 = row.try_get("used").map_err(decode)?;
    let created_at_raw: String = row.try_get("created_at").map_err(decode)?;

    let platform = Platform::parse(&platform_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unsupported platform `{platform_raw}` for `{id}`"))
    })?;
    let expires_at = DateTime::parse_from_rfc3339(&expires_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid expires_at: {e}")))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid created_at: {e}")))?;

    Ok(LinkingToken {
        id: LinkingTokenId(id),
        token,
        workspace_id: WorkspaceId(workspace_id),
        platform,
        expires_at,
        used: used != 0,
        created_at,
    })
}

#[async_trait::async_trait]
impl LinkingTokenRepository for SqlLinkingTokenRepository {
    async fn issue(&self, token: &LinkingToken) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // A replacement token retires its unused predecessors, keeping the
        // one-usable-token-per-workspace invariant.
        sqlx::query(
            "UPDATE linking_token SET used = 1
             WHERE workspace_id = ? AND platform = ? AND used = 0",
        )
        .bind(&token.workspace_id.0)
        .bind(token.platform.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO linking_token (id, token, workspace_id, platform, expires_at, used, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&token.id.0)
        .bind(&token.token)
        .bind(&token.workspace_id.0)
        .bind(token.platform.as_str())
        .bind(token.expires_at.to_rfc3339())
        .bind(token.used as i64)
        .bind(token.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_write(e, "linking token value"))?;

        tx.commit().await?;
        Ok(())
    }

    async fn consume(
        &self,
        token_value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LinkingToken>, RepositoryError> {
        // Single conditional UPDATE: under concurrent validation exactly one
        // caller flips `used` and wins; everyone else sees zero rows.
        let result = sqlx::query(
            "UPDATE linking_token SET used = 1
             WHERE token = ? AND used = 0 AND expires_at > ?",
        )
        .bind(token_value)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT id, token, workspace_id, platform, expires_at, used, created_at
             FROM linking_token WHERE token = ?",
        )
        .bind(token_value)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(row_to_token(&row)?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use chatlink_core::domain::integration::{Platform, WorkspaceId};
    use chatlink_core::domain::linking::LinkingToken;

    use super::SqlLinkingTokenRepository;
    use crate::repositories::LinkingTokenRepository;
    use crate::{connect_with_settings, migrations};

    async fn repository() -> SqlLinkingTokenRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlLinkingTokenRepository::new(pool)
    }

    fn token(workspace: &str) -> LinkingToken {
        LinkingToken::issue(
            WorkspaceId(workspace.to_string()),
            Platform::OpenChannels,
            Duration::minutes(30),
        )
    }

    #[tokio::test]
    async fn a_token_is_consumable_exactly_once() {
        let repo = repository().await;
        let issued = token("ws-1");
        repo.issue(&issued).await.expect("issue");

        let consumed = repo
            .consume(&issued.token, Utc::now())
            .await
            .expect("consume")
            .expect("token should be usable");
        assert_eq!(consumed.workspace_id.0, "ws-1");
        assert!(consumed.used);

        let second = repo.consume(&issued.token, Utc::now()).await.expect("second consume");
        assert!(second.is_none(), "second consumption must fail");
    }

    #[tokio::test]
    async fn expired_token_is_not_consumable() {
        let repo = repository().await;
        let issued = token("ws-1");
        repo.issue(&issued).await.expect("issue");

        let result = repo
            .consume(&issued.token, issued.expires_at + Duration::seconds(1))
            .await
            .expect("consume");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn issuing_a_replacement_retires_the_predecessor() {
        let repo = repository().await;
        let first = token("ws-1");
        repo.issue(&first).await.expect("issue first");

        let second = token("ws-1");
        repo.issue(&second).await.expect("issue second");

        assert!(repo.consume(&first.token, Utc::now()).await.expect("consume first").is_none());
        assert!(repo.consume(&second.token, Utc::now()).await.expect("consume second").is_some());
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let repo = repository().await;
        let result = repo.consume("NOPE1234", Utc::now()).await.expect("consume");
        assert!(result.is_none());
    }
}
