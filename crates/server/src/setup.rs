//! Provisioning and diagnostics surface: the orchestrated setup run, the
//! composite per-line setup, connector repair operations, channel listing
//! and creation, the optional bot/robot/SMS registrations, and explicit
//! mapping management.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use chatlink_core::domain::mapping::{InstanceId, MappingId};
use chatlink_core::EngineError;
use chatlink_db::repositories::{
    SqlChannelMappingRepository, SqlInstanceRepository, SqlIntegrationRepository,
};
use chatlink_engine::{
    BotRegistrar, ChannelActivator, ChannelView, CompleteSetupOutcome, ConnectorDiagnosis,
    ConnectorRegistrar, ConnectorStatusReport, Diagnostics, MappingService, SetupOrchestrator,
    SetupReport,
};

use crate::audit::record_audit;
use crate::error::{bad_request, engine_error, ApiFailure};
use crate::link::MappingView;
use crate::state::{ApiState, IntegrationView};

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/setup/auto", post(auto_setup))
        .route("/api/v1/setup/complete", post(complete_setup))
        .route("/api/v1/connector/clean", post(clean_connectors))
        .route("/api/v1/connector/reconfigure", post(reconfigure_connector))
        .route("/api/v1/connector/activate", post(activate_connector_for_line))
        .route("/api/v1/connector/status", get(check_connector_status))
        .route("/api/v1/connector/check", get(check_connector))
        .route("/api/v1/connector/simulate_placement", post(simulate_placement))
        .route("/api/v1/channels", get(list_channels).post(create_channel))
        .route("/api/v1/bot/register", post(register_bot))
        .route("/api/v1/bot/unregister", post(unregister_bot))
        .route("/api/v1/robot/register", post(register_robot))
        .route("/api/v1/robot/unregister", post(unregister_robot))
        .route("/api/v1/mappings", post(add_mapping))
        .route("/api/v1/mappings/{mapping_id}", delete(remove_mapping))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AutoSetupRequest {
    pub integration_id: String,
    pub instance_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteSetupRequest {
    pub integration_id: String,
    pub instance_id: String,
    pub line_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct IntegrationOnlyRequest {
    pub integration_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReconfigureRequest {
    pub integration_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub integration_id: String,
    pub line_id: i64,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub integration_id: String,
    pub line_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub integration_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelsQuery {
    pub integration_id: String,
    #[serde(default)]
    pub include_connector_status: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub integration_id: String,
    pub channel_name: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterBotRequest {
    pub integration_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddMappingRequest {
    pub integration_id: String,
    pub instance_id: String,
    pub line_id: i64,
    pub line_name: String,
}

#[derive(Debug, Serialize)]
pub struct CleanResponse {
    pub removed: u32,
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct PlacementProbeResponse {
    pub reachable: bool,
    pub status: Option<u16>,
    pub detail: String,
}

async fn auto_setup(
    State(state): State<ApiState>,
    Json(body): Json<AutoSetupRequest>,
) -> Result<Json<SetupReport>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let instances = SqlInstanceRepository::new(state.db_pool.clone());
    let orchestrator =
        SetupOrchestrator::new(&integrations, &instances, &portal, callback_base_url);

    let report = orchestrator
        .auto_setup(&integration.id, &InstanceId(body.instance_id.clone()))
        .await
        .map_err(engine_error)?;

    record_audit(
        &state.db_pool,
        &integration.workspace_id.0,
        "setup.auto_finished",
        &format!(
            "connector={} lines={}/{} robot={} errors={}",
            report.connector_registered,
            report.lines_activated,
            report.lines_total,
            report.robot_registered,
            report.errors.len()
        ),
    )
    .await;

    Ok(Json(report))
}

async fn complete_setup(
    State(state): State<ApiState>,
    Json(body): Json<CompleteSetupRequest>,
) -> Result<Json<CompleteSetupOutcome>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let instances = SqlInstanceRepository::new(state.db_pool.clone());
    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());

    let activator = ChannelActivator::new(&integrations, &portal);
    let service = MappingService::new(&mappings, &instances);

    // The mapping stores the line's display name; resolve it from the
    // portal so the stored name matches what agents see.
    let line_name = activator
        .list_channels(&integration, false)
        .await
        .map_err(engine_error)?
        .into_iter()
        .find(|line| line.id == body.line_id)
        .map(|line| line.name)
        .ok_or_else(|| {
            engine_error(EngineError::not_found(format!("line {}", body.line_id)))
        })?;

    let outcome = service
        .complete_setup(
            &activator,
            integration.clone(),
            &InstanceId(body.instance_id),
            body.line_id,
            &line_name,
        )
        .await;

    record_audit(
        &state.db_pool,
        &integration.workspace_id.0,
        "setup.complete_finished",
        &format!(
            "line={} activation_ok={} mapping_ok={}",
            body.line_id, outcome.activation_ok, outcome.mapping_ok
        ),
    )
    .await;

    Ok(Json(outcome))
}

async fn clean_connectors(
    State(state): State<ApiState>,
    Json(body): Json<IntegrationOnlyRequest>,
) -> Result<Json<CleanResponse>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let registrar = ConnectorRegistrar::new(&integrations, &portal, callback_base_url);

    let removed = registrar.clean_duplicates(&integration).await.map_err(engine_error)?;
    record_audit(
        &state.db_pool,
        &integration.workspace_id.0,
        "connector.duplicates_cleaned",
        &format!("removed={removed}"),
    )
    .await;

    Ok(Json(CleanResponse { removed }))
}

async fn reconfigure_connector(
    State(state): State<ApiState>,
    Json(body): Json<ReconfigureRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let registrar = ConnectorRegistrar::new(&integrations, &portal, callback_base_url);

    let display_name = body.display_name.as_deref().unwrap_or("WhatsApp");
    let updated =
        registrar.reconfigure(integration, display_name).await.map_err(engine_error)?;

    Ok(Json(IntegrationView::from(&updated)))
}

async fn activate_connector_for_line(
    State(state): State<ApiState>,
    Json(body): Json<ActivateRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let activator = ChannelActivator::new(&integrations, &portal);

    let updated = activator
        .activate_for_line(integration, body.line_id, body.active)
        .await
        .map_err(engine_error)?;

    Ok(Json(IntegrationView::from(&updated)))
}

async fn check_connector_status(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ConnectorStatusReport>, ApiFailure> {
    let integration = state.load_integration(&query.integration_id).await?;
    let portal = state.portal_client(&integration)?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let activator = ChannelActivator::new(&integrations, &portal);

    let report =
        activator.check_status(&integration, query.line_id).await.map_err(engine_error)?;
    Ok(Json(report))
}

async fn check_connector(
    State(state): State<ApiState>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<ConnectorDiagnosis>, ApiFailure> {
    let integration = state.load_integration(&query.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let diagnostics = Diagnostics::new(&portal, &mappings, callback_base_url);

    let diagnosis = diagnostics.check_connector(&integration).await.map_err(engine_error)?;
    Ok(Json(diagnosis))
}

async fn simulate_placement(
    State(state): State<ApiState>,
    Json(body): Json<IntegrationOnlyRequest>,
) -> Result<Json<PlacementProbeResponse>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let diagnostics = Diagnostics::new(&portal, &mappings, callback_base_url);

    let probe = diagnostics.simulate_placement(&integration).await.map_err(engine_error)?;
    Ok(Json(PlacementProbeResponse {
        reachable: probe.reachable,
        status: probe.status,
        detail: probe.detail,
    }))
}

async fn list_channels(
    State(state): State<ApiState>,
    Query(query): Query<ChannelsQuery>,
) -> Result<Json<Vec<ChannelView>>, ApiFailure> {
    let integration = state.load_integration(&query.integration_id).await?;
    let portal = state.portal_client(&integration)?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let activator = ChannelActivator::new(&integrations, &portal);

    let channels = activator
        .list_channels(&integration, query.include_connector_status)
        .await
        .map_err(engine_error)?;
    Ok(Json(channels))
}

async fn create_channel(
    State(state): State<ApiState>,
    Json(body): Json<CreateChannelRequest>,
) -> Result<Json<ChannelResponse>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let activator = ChannelActivator::new(&integrations, &portal);

    let line = activator
        .create_channel(&integration, &body.channel_name)
        .await
        .map_err(engine_error)?;

    record_audit(
        &state.db_pool,
        &integration.workspace_id.0,
        "channels.created",
        &format!("line={} name={}", line.id, line.name),
    )
    .await;

    Ok(Json(ChannelResponse { id: line.id, name: line.name, active: line.active }))
}

async fn register_bot(
    State(state): State<ApiState>,
    Json(body): Json<RegisterBotRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    if body.name.trim().is_empty() {
        return Err(bad_request("bot name is required"));
    }

    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let registrar = BotRegistrar::new(&integrations, &portal, callback_base_url);

    let description = body.description.as_deref().unwrap_or("WhatsApp conversation bot");
    let updated = registrar
        .register_bot(integration, body.name.trim(), description)
        .await
        .map_err(engine_error)?;

    Ok(Json(IntegrationView::from(&updated)))
}

async fn unregister_bot(
    State(state): State<ApiState>,
    Json(body): Json<IntegrationOnlyRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let registrar = BotRegistrar::new(&integrations, &portal, callback_base_url);

    let updated = registrar.unregister_bot(integration).await.map_err(engine_error)?;
    Ok(Json(IntegrationView::from(&updated)))
}

async fn register_robot(
    State(state): State<ApiState>,
    Json(body): Json<IntegrationOnlyRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let registrar = BotRegistrar::new(&integrations, &portal, callback_base_url);

    let updated = registrar.register_robot(integration).await.map_err(engine_error)?;
    Ok(Json(IntegrationView::from(&updated)))
}

async fn unregister_robot(
    State(state): State<ApiState>,
    Json(body): Json<IntegrationOnlyRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;
    let portal = state.portal_client(&integration)?;
    let callback_base_url = state.callback_base_url()?;

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let registrar = BotRegistrar::new(&integrations, &portal, callback_base_url);

    let updated = registrar.unregister_robot(integration).await.map_err(engine_error)?;
    Ok(Json(IntegrationView::from(&updated)))
}

async fn add_mapping(
    State(state): State<ApiState>,
    Json(body): Json<AddMappingRequest>,
) -> Result<Json<MappingView>, ApiFailure> {
    let integration = state.load_integration(&body.integration_id).await?;

    let instances = SqlInstanceRepository::new(state.db_pool.clone());
    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let service = MappingService::new(&mappings, &instances);

    let mapping = service
        .add_mapping(
            &integration,
            &InstanceId(body.instance_id),
            body.line_id,
            body.line_name.trim(),
        )
        .await
        .map_err(engine_error)?;

    record_audit(
        &state.db_pool,
        &integration.workspace_id.0,
        "mappings.added",
        &mapping.id.0,
    )
    .await;

    Ok(Json(MappingView::from(&mapping)))
}

async fn remove_mapping(
    State(state): State<ApiState>,
    Path(mapping_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let instances = SqlInstanceRepository::new(state.db_pool.clone());
    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let service = MappingService::new(&mappings, &instances);

    service.remove_mapping(&MappingId(mapping_id.clone())).await.map_err(engine_error)?;
    Ok(Json(serde_json::json!({ "removed": mapping_id })))
}

#[cfg(test)]
mod tests {
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::Json;
    use chrono::Utc;

    use chatlink_core::config::PortalConfig;
    use chatlink_db::{connect_with_settings, migrations};

    use super::*;
    use crate::state::ApiState;

    async fn api_state() -> ApiState {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let portal = PortalConfig {
            client_id: Some("app.test".to_string()),
            client_secret: Some("secret".to_string().into()),
            oauth_token_url: "https://oauth.bitrix.info/oauth/token/".to_string(),
            callback_base_url: Some("https://hooks.chatlink.example".to_string()),
            linking_token_ttl_minutes: 30,
            http_timeout_secs: 5,
        };
        ApiState::new(pool, &portal)
    }

    async fn seed_integration(state: &ApiState, workspace: &str) -> String {
        let now = Utc::now().to_rfc3339();
        let id = format!("INT-test-{workspace}");
        sqlx::query(
            "INSERT INTO integration (id, workspace_id, platform, created_at, updated_at)
             VALUES (?, ?, 'open_channels', ?, ?)",
        )
        .bind(&id)
        .bind(workspace)
        .bind(&now)
        .bind(&now)
        .execute(&state.db_pool)
        .await
        .expect("seed integration");
        id
    }

    async fn seed_instance(state: &ApiState, workspace: &str, instance: &str) {
        sqlx::query(
            "INSERT INTO instance (id, workspace_id, phone_number, label, connected)
             VALUES (?, ?, '+111', 'Main', 1)",
        )
        .bind(instance)
        .bind(workspace)
        .execute(&state.db_pool)
        .await
        .expect("seed instance");
    }

    #[tokio::test]
    async fn add_mapping_enforces_line_uniqueness_across_requests() {
        let state = api_state().await;
        let integration_id = seed_integration(&state, "W").await;
        seed_instance(&state, "W", "X").await;
        seed_instance(&state, "W", "Y").await;

        add_mapping(
            State(state.clone()),
            Json(AddMappingRequest {
                integration_id: integration_id.clone(),
                instance_id: "X".to_string(),
                line_id: 2,
                line_name: "Support".to_string(),
            }),
        )
        .await
        .expect("first mapping");

        let (status, body) = add_mapping(
            State(state),
            Json(AddMappingRequest {
                integration_id,
                instance_id: "Y".to_string(),
                line_id: 2,
                line_name: "Support".to_string(),
            }),
        )
        .await
        .expect_err("line already mapped");
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body.0.error.contains("already mapped"));
    }

    #[tokio::test]
    async fn remove_mapping_rejects_unknown_ids() {
        let state = api_state().await;

        let (status, _) =
            remove_mapping(State(state), Path("MAP-ghost".to_string()))
                .await
                .expect_err("unknown mapping");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn remote_actions_require_portal_credentials() {
        let state = api_state().await;
        let integration_id = seed_integration(&state, "W").await;
        seed_instance(&state, "W", "X").await;

        // Integration has neither tokens nor a webhook URL.
        let (status, body) = auto_setup(
            State(state),
            Json(AutoSetupRequest { integration_id, instance_id: "X".to_string() }),
        )
        .await
        .expect_err("no credentials");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.0.error.contains("credentials"));
    }

    #[tokio::test]
    async fn unknown_integration_is_not_found() {
        let state = api_state().await;

        let (status, _) = auto_setup(
            State(state),
            Json(AutoSetupRequest {
                integration_id: "INT-ghost".to_string(),
                instance_id: "X".to_string(),
            }),
        )
        .await
        .expect_err("unknown integration");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
