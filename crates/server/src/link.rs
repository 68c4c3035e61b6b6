//! Linking and authorization surface: linking-token issue/validate,
//! explicit domain binding, the portal install callback, OAuth exchange,
//! the static-webhook alternative, and token refresh.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};
use chatlink_core::domain::mapping::ChannelMapping;
use chatlink_engine::{CallbackParams, IdentityResolver, TokenGrant, TokenManager};
use chatlink_db::repositories::{
    IntegrationRepository, SqlChannelMappingRepository, SqlIntegrationRepository,
    SqlLinkingTokenRepository,
};
use chatlink_db::DbPool;

use crate::audit::record_audit;
use crate::error::{bad_request, db_error, engine_error, ApiFailure};
use crate::state::{ApiState, IntegrationView};

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/link/token", post(issue_token))
        .route("/api/v1/link/validate_token", post(validate_token))
        .route("/api/v1/link/domain", post(bind_domain))
        .route("/api/v1/link/install", get(install_callback))
        .route("/api/v1/link/oauth_exchange", post(oauth_exchange))
        .route("/api/v1/link/webhook", post(save_webhook))
        .route("/api/v1/token/refresh", post(refresh_token))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    pub workspace_id: String,
}

#[derive(Debug, Serialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MappingView {
    pub id: String,
    pub instance_id: String,
    pub line_id: i64,
    pub line_name: String,
    pub active: bool,
}

impl From<&ChannelMapping> for MappingView {
    fn from(mapping: &ChannelMapping) -> Self {
        Self {
            id: mapping.id.0.clone(),
            instance_id: mapping.instance_id.0.clone(),
            line_id: mapping.line_id,
            line_name: mapping.line_name.clone(),
            active: mapping.active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateTokenResponse {
    pub integration: IntegrationView,
    pub mappings: Vec<MappingView>,
}

#[derive(Debug, Deserialize)]
pub struct BindDomainRequest {
    pub workspace_id: String,
    pub domain: String,
}

#[derive(Debug, Deserialize)]
pub struct InstallCallbackQuery {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthExchangeRequest {
    pub workspace_id: String,
    #[serde(default)]
    pub domain: Option<String>,
    /// Authorization code from the portal consent redirect. Absent means
    /// client-credentials grant.
    #[serde(default)]
    pub authorization_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveWebhookRequest {
    pub workspace_id: String,
    pub webhook_url: String,
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub integration_id: String,
}

async fn issue_token(
    State(state): State<ApiState>,
    Json(body): Json<IssueTokenRequest>,
) -> Result<Json<IssueTokenResponse>, ApiFailure> {
    let workspace_id = body.workspace_id.trim();
    if workspace_id.is_empty() {
        return Err(bad_request("workspace_id is required"));
    }

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let tokens = SqlLinkingTokenRepository::new(state.db_pool.clone());
    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let resolver = IdentityResolver::new(&integrations, &tokens, &mappings);

    let token = resolver
        .issue_token(
            WorkspaceId(workspace_id.to_string()),
            Platform::OpenChannels,
            state.portal.linking_token_ttl_minutes,
        )
        .await
        .map_err(engine_error)?;

    record_audit(&state.db_pool, workspace_id, "link.token_issued", "linking token issued").await;

    Ok(Json(IssueTokenResponse {
        token: token.token,
        expires_at: token.expires_at.to_rfc3339(),
    }))
}

async fn validate_token(
    State(state): State<ApiState>,
    Json(body): Json<ValidateTokenRequest>,
) -> Result<Json<ValidateTokenResponse>, ApiFailure> {
    if body.token.trim().is_empty() {
        return Err(bad_request("token is required"));
    }

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let tokens = SqlLinkingTokenRepository::new(state.db_pool.clone());
    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let resolver = IdentityResolver::new(&integrations, &tokens, &mappings);

    let resolved = resolver
        .resolve_by_token(
            &body.token,
            CallbackParams { domain: body.domain, member_id: body.member_id },
        )
        .await
        .map_err(engine_error)?;

    record_audit(
        &state.db_pool,
        &resolved.integration.workspace_id.0,
        "link.token_validated",
        "workspace bound via linking token",
    )
    .await;

    Ok(Json(ValidateTokenResponse {
        integration: IntegrationView::from(&resolved.integration),
        mappings: resolved.mappings.iter().map(MappingView::from).collect(),
    }))
}

async fn bind_domain(
    State(state): State<ApiState>,
    Json(body): Json<BindDomainRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let tokens = SqlLinkingTokenRepository::new(state.db_pool.clone());
    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let resolver = IdentityResolver::new(&integrations, &tokens, &mappings);

    let integration = resolver
        .resolve_by_domain(
            &body.domain,
            &WorkspaceId(body.workspace_id.clone()),
            Platform::OpenChannels,
        )
        .await
        .map_err(engine_error)?;

    record_audit(&state.db_pool, &body.workspace_id, "link.domain_bound", &body.domain).await;

    Ok(Json(IntegrationView::from(&integration)))
}

async fn install_callback(
    State(state): State<ApiState>,
    Query(query): Query<InstallCallbackQuery>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let tokens = SqlLinkingTokenRepository::new(state.db_pool.clone());
    let mappings = SqlChannelMappingRepository::new(state.db_pool.clone());
    let resolver = IdentityResolver::new(&integrations, &tokens, &mappings);

    let integration = resolver
        .resolve_by_callback(&CallbackParams {
            domain: query.domain,
            member_id: query.member_id,
        })
        .await
        .map_err(engine_error)?;

    info!(
        event_name = "link.install_callback",
        integration_id = %integration.id.0,
        "portal install callback resolved"
    );
    Ok(Json(IntegrationView::from(&integration)))
}

async fn oauth_exchange(
    State(state): State<ApiState>,
    Json(body): Json<OAuthExchangeRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let oauth = state.oauth_client()?;
    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());

    let integration = find_or_create_integration(
        &integrations,
        &state.db_pool,
        &body.workspace_id,
        body.domain.as_deref(),
    )
    .await?;

    let manager = TokenManager::new(&integrations, &oauth);
    let grant = match body.authorization_code {
        Some(code) if !code.trim().is_empty() => TokenGrant::AuthorizationCode(code),
        _ => TokenGrant::ClientCredentials,
    };
    let updated = manager.exchange(&integration.id, grant).await.map_err(engine_error)?;

    record_audit(
        &state.db_pool,
        &updated.workspace_id.0,
        "link.oauth_exchanged",
        "portal tokens stored",
    )
    .await;

    Ok(Json(IntegrationView::from(&updated)))
}

async fn save_webhook(
    State(state): State<ApiState>,
    Json(body): Json<SaveWebhookRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let webhook_url = body.webhook_url.trim();
    if !webhook_url.starts_with("https://") && !webhook_url.starts_with("http://") {
        return Err(bad_request("webhook_url must be an http(s) URL"));
    }

    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let mut integration = find_or_create_integration(
        &integrations,
        &state.db_pool,
        &body.workspace_id,
        body.domain.as_deref(),
    )
    .await?;

    integration.webhook_url = Some(webhook_url.to_string());
    let updated = integrations.update(&integration).await.map_err(db_error)?;

    record_audit(
        &state.db_pool,
        &updated.workspace_id.0,
        "link.webhook_saved",
        "static webhook credential stored",
    )
    .await;

    Ok(Json(IntegrationView::from(&updated)))
}

async fn refresh_token(
    State(state): State<ApiState>,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<IntegrationView>, ApiFailure> {
    let oauth = state.oauth_client()?;
    let integrations = SqlIntegrationRepository::new(state.db_pool.clone());
    let integration = state.load_integration(&body.integration_id).await?;

    let manager = TokenManager::new(&integrations, &oauth);
    let updated = manager.refresh(integration).await.map_err(engine_error)?;

    Ok(Json(IntegrationView::from(&updated)))
}

async fn find_or_create_integration(
    integrations: &SqlIntegrationRepository,
    db_pool: &DbPool,
    workspace_id: &str,
    domain: Option<&str>,
) -> Result<Integration, ApiFailure> {
    let workspace_id = workspace_id.trim();
    if workspace_id.is_empty() {
        return Err(bad_request("workspace_id is required"));
    }
    let workspace = WorkspaceId(workspace_id.to_string());

    let mut integration = match integrations
        .find_by_workspace(&workspace, Platform::OpenChannels)
        .await
        .map_err(db_error)?
    {
        Some(existing) => existing,
        None => {
            let fresh = Integration::new(workspace, Platform::OpenChannels);
            integrations.insert(&fresh).await.map_err(db_error)?;
            record_audit(db_pool, workspace_id, "link.integration_created", &fresh.id.0).await;
            fresh
        }
    };

    if let Some(domain) = domain.map(str::trim).filter(|d| !d.is_empty()) {
        if integration.domain.as_deref() != Some(domain) {
            integration.domain = Some(domain.to_string());
            integration = integrations.update(&integration).await.map_err(db_error)?;
        }
    }

    Ok(integration)
}
