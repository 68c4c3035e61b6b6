//! Callback endpoints the portal reaches: the inbound-message handler and
//! the placement handler registered on the connector. Message relay itself
//! belongs to the host application's provider adapters; these endpoints
//! acknowledge, log, and stamp connection verification so diagnostics can
//! tell a reachable callback from a dead one.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use chatlink_db::repositories::{IntegrationRepository, SqlIntegrationRepository};

use crate::state::ApiState;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/events/message/{integration_id}", post(message_event))
        .route("/api/v1/events/placement/{integration_id}", post(placement_event))
        .with_state(state)
}

async fn message_event(
    State(state): State<ApiState>,
    Path(integration_id): Path<String>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    info!(
        event_name = "events.message_received",
        integration_id = %integration_id,
        payload_keys = payload.as_object().map(|o| o.len()).unwrap_or(0),
        "portal message event received"
    );
    mark_connection_verified(&state, &integration_id).await;
    Json(serde_json::json!({ "result": "ok" }))
}

async fn placement_event(
    State(state): State<ApiState>,
    Path(integration_id): Path<String>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let placement = payload.get("PLACEMENT").and_then(Value::as_str).unwrap_or("unknown");
    info!(
        event_name = "events.placement_received",
        integration_id = %integration_id,
        placement = %placement,
        "portal placement event received"
    );
    mark_connection_verified(&state, &integration_id).await;
    Json(serde_json::json!({ "result": "ok" }))
}

/// A callback the portal managed to reach is, by observation, connected.
/// Recorded as a timestamp precisely because it goes stale on its own.
async fn mark_connection_verified(state: &ApiState, integration_id: &str) {
    let repo = SqlIntegrationRepository::new(state.db_pool.clone());
    let integration = match repo
        .find_by_id(&chatlink_core::IntegrationId(integration_id.to_string()))
        .await
    {
        Ok(Some(integration)) => integration,
        Ok(None) => {
            warn!(
                event_name = "events.unknown_integration",
                integration_id = %integration_id,
                "portal event for an integration that does not exist"
            );
            return;
        }
        Err(error) => {
            warn!(
                event_name = "events.lookup_failed",
                integration_id = %integration_id,
                error = %error,
                "could not load integration for portal event"
            );
            return;
        }
    };

    let mut stamped = integration;
    stamped.connection_verified_at = Some(Utc::now());
    if let Err(error) = repo.update(&stamped).await {
        warn!(
            event_name = "events.verify_stamp_failed",
            integration_id = %integration_id,
            error = %error,
            "could not stamp connection verification"
        );
    }
}
