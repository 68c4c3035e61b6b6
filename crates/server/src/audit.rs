use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use chatlink_db::DbPool;

/// Best-effort audit trail. A failed write is logged and swallowed; audit
/// must never fail the action it records.
pub async fn record_audit(pool: &DbPool, workspace_id: &str, event_type: &str, detail: &str) {
    let audit_id = format!("AUD-{}", Uuid::new_v4().simple());
    let payload = serde_json::json!({ "detail": detail }).to_string();

    let result = sqlx::query(
        "INSERT INTO audit_event (id, timestamp, actor, workspace_id, event_type, detail_json)
         VALUES (?, ?, 'server', ?, ?, ?)",
    )
    .bind(&audit_id)
    .bind(Utc::now().to_rfc3339())
    .bind(workspace_id)
    .bind(event_type)
    .bind(&payload)
    .execute(pool)
    .await;

    if let Err(error) = result {
        warn!(
            event_name = "audit.write_failed",
            workspace_id = %workspace_id,
            event_type = %event_type,
            error = %error,
            "failed to write audit event"
        );
    }
}
