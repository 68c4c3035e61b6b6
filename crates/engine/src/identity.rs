use chrono::{Duration, Utc};
use tracing::info;

use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};
use chatlink_core::domain::linking::LinkingToken;
use chatlink_core::domain::mapping::ChannelMapping;
use chatlink_core::EngineError;
use chatlink_db::repositories::{
    ChannelMappingRepository, IntegrationRepository, LinkingTokenRepository,
};

use crate::map_repo_error;

/// Identity material supplied by the portal's installation callback.
#[derive(Clone, Debug, Default)]
pub struct CallbackParams {
    pub domain: Option<String>,
    pub member_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ResolvedIdentity {
    pub integration: Integration,
    pub mappings: Vec<ChannelMapping>,
}

/// Determines which portal and which workspace an inbound request refers
/// to: via a single-use linking token, an explicit domain chosen by the
/// user, or the install callback's member identity. A bare domain is never
/// silently promoted to a member identity — ambiguous resolution is
/// rejected instead.
pub struct IdentityResolver<'a> {
    integrations: &'a dyn IntegrationRepository,
    tokens: &'a dyn LinkingTokenRepository,
    mappings: &'a dyn ChannelMappingRepository,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(
        integrations: &'a dyn IntegrationRepository,
        tokens: &'a dyn LinkingTokenRepository,
        mappings: &'a dyn ChannelMappingRepository,
    ) -> Self {
        Self { integrations, tokens, mappings }
    }

    /// Creates a fresh linking token for the workspace, retiring any unused
    /// predecessor so only one usable token exists at a time.
    pub async fn issue_token(
        &self,
        workspace_id: WorkspaceId,
        platform: Platform,
        ttl_minutes: u64,
    ) -> Result<LinkingToken, EngineError> {
        let token =
            LinkingToken::issue(workspace_id, platform, Duration::minutes(ttl_minutes as i64));
        self.tokens.issue(&token).await.map_err(map_repo_error)?;
        info!(
            event_name = "identity.token_issued",
            workspace_id = %token.workspace_id.0,
            expires_at = %token.expires_at.to_rfc3339(),
            "linking token issued"
        );
        Ok(token)
    }

    /// Consumes a linking token and binds the workspace it was issued for.
    /// The token becomes unusable the instant this succeeds, including for
    /// concurrent callers racing on the same value.
    pub async fn resolve_by_token(
        &self,
        token_value: &str,
        params: CallbackParams,
    ) -> Result<ResolvedIdentity, EngineError> {
        let token = self
            .tokens
            .consume(token_value.trim(), Utc::now())
            .await
            .map_err(map_repo_error)?
            .ok_or(EngineError::TokenInvalid)?;

        let mut integration =
            self.find_or_create(&token.workspace_id, token.platform).await?;
        if params.domain.is_some() || params.member_id.is_some() {
            if let Some(domain) = params.domain {
                integration.domain = Some(domain);
            }
            if let Some(member_id) = params.member_id {
                integration.member_id = Some(member_id);
            }
            integration =
                self.integrations.update(&integration).await.map_err(map_repo_error)?;
        }

        let mappings = self
            .mappings
            .list_for_integration(&integration.id)
            .await
            .map_err(map_repo_error)?;

        info!(
            event_name = "identity.token_resolved",
            workspace_id = %integration.workspace_id.0,
            integration_id = %integration.id.0,
            mappings = mappings.len(),
            "workspace bound via linking token"
        );
        Ok(ResolvedIdentity { integration, mappings })
    }

    /// Binds an already-installed portal, identified by its domain, to a
    /// workspace the user chose explicitly. Overwrites the workspace's
    /// previous domain binding.
    pub async fn resolve_by_domain(
        &self,
        domain: &str,
        workspace_id: &WorkspaceId,
        platform: Platform,
    ) -> Result<Integration, EngineError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(EngineError::validation("portal domain must not be empty"));
        }

        let pending = self
            .integrations
            .find_by_domain(domain)
            .await
            .map_err(map_repo_error)?
            .into_iter()
            .filter(|candidate| {
                candidate.is_pending_install() && candidate.workspace_id != *workspace_id
            })
            .count();
        if pending > 1 {
            return Err(EngineError::AmbiguousIdentity(domain.to_string()));
        }

        let mut integration = self.find_or_create(workspace_id, platform).await?;
        integration.domain = Some(domain.to_string());
        let updated = self.integrations.update(&integration).await.map_err(map_repo_error)?;

        info!(
            event_name = "identity.domain_bound",
            workspace_id = %updated.workspace_id.0,
            domain,
            "portal domain bound to workspace"
        );
        Ok(updated)
    }

    /// Resolves the Integration an installation callback refers to. Member
    /// identity wins; a bare domain resolves only when it matches exactly
    /// one Integration.
    pub async fn resolve_by_callback(
        &self,
        params: &CallbackParams,
    ) -> Result<Integration, EngineError> {
        if let Some(member_id) = params.member_id.as_deref().filter(|m| !m.trim().is_empty()) {
            if let Some(mut integration) = self
                .integrations
                .find_by_member_id(member_id)
                .await
                .map_err(map_repo_error)?
            {
                if let Some(domain) = &params.domain {
                    if integration.domain.as_deref() != Some(domain.as_str()) {
                        integration.domain = Some(domain.clone());
                        integration = self
                            .integrations
                            .update(&integration)
                            .await
                            .map_err(map_repo_error)?;
                    }
                }
                return Ok(integration);
            }

            // Unknown member: the callback may predate the member id being
            // stored. Adopt it onto the single integration carrying the
            // callback's domain, if there is exactly one.
            if let Some(domain) = params.domain.as_deref() {
                let mut integration = self.single_by_domain(domain).await?;
                integration.member_id = Some(member_id.to_string());
                return self.integrations.update(&integration).await.map_err(map_repo_error);
            }

            return Err(EngineError::IdentityNotFound(format!("member `{member_id}`")));
        }

        match params.domain.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(domain) => self.single_by_domain(domain).await,
            None => Err(EngineError::IdentityNotFound(
                "callback carried neither member id nor domain".to_string(),
            )),
        }
    }

    async fn single_by_domain(&self, domain: &str) -> Result<Integration, EngineError> {
        let mut matches =
            self.integrations.find_by_domain(domain).await.map_err(map_repo_error)?;
        match matches.len() {
            0 => Err(EngineError::IdentityNotFound(format!("domain `{domain}`"))),
            1 => Ok(matches.remove(0)),
            _ => Err(EngineError::AmbiguousIdentity(domain.to_string())),
        }
    }

    async fn find_or_create(
        &self,
        workspace_id: &WorkspaceId,
        platform: Platform,
    ) -> Result<Integration, EngineError> {
        if let Some(existing) = self
            .integrations
            .find_by_workspace(workspace_id, platform)
            .await
            .map_err(map_repo_error)?
        {
            return Ok(existing);
        }

        let integration = Integration::new(workspace_id.clone(), platform);
        match self.integrations.insert(&integration).await {
            Ok(()) => Ok(integration),
            Err(error) => match map_repo_error(error) {
                // A concurrent request created the row first; use theirs.
                EngineError::Conflict(_) => self
                    .integrations
                    .find_by_workspace(workspace_id, platform)
                    .await
                    .map_err(map_repo_error)?
                    .ok_or_else(|| {
                        EngineError::persistence("integration vanished during creation race")
                    }),
                other => Err(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use chatlink_core::domain::integration::{Integration, Platform, WorkspaceId};
    use chatlink_core::domain::mapping::{ChannelMapping, InstanceId};
    use chatlink_core::EngineError;
    use chatlink_db::repositories::{
        ChannelMappingRepository, InMemoryChannelMappingRepository,
        InMemoryIntegrationRepository, InMemoryLinkingTokenRepository, IntegrationRepository,
    };

    use super::{CallbackParams, IdentityResolver};

    fn workspace(id: &str) -> WorkspaceId {
        WorkspaceId(id.to_string())
    }

    struct Fixture {
        integrations: InMemoryIntegrationRepository,
        tokens: InMemoryLinkingTokenRepository,
        mappings: InMemoryChannelMappingRepository,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                integrations: InMemoryIntegrationRepository::new(),
                tokens: InMemoryLinkingTokenRepository::new(),
                mappings: InMemoryChannelMappingRepository::new(),
            }
        }

        fn resolver(&self) -> IdentityResolver<'_> {
            IdentityResolver::new(&self.integrations, &self.tokens, &self.mappings)
        }
    }

    #[tokio::test]
    async fn token_binds_workspace_and_returns_existing_mappings() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver();

        let token = resolver
            .issue_token(workspace("W"), Platform::OpenChannels, 30)
            .await
            .expect("issue");

        // Pre-existing integration with a mapping, as after an earlier setup.
        let integration = resolver
            .resolve_by_domain("acme.portal.example", &workspace("W"), Platform::OpenChannels)
            .await
            .expect("bind domain");
        fixture
            .mappings
            .insert(&ChannelMapping::new(
                integration.id.clone(),
                InstanceId("inst-1".to_string()),
                4,
                "Line 4",
            ))
            .await
            .expect("seed mapping");

        let resolved = resolver
            .resolve_by_token(
                &token.token,
                CallbackParams {
                    domain: Some("acme.portal.example".to_string()),
                    member_id: Some("member-1".to_string()),
                },
            )
            .await
            .expect("resolve");

        assert_eq!(resolved.integration.workspace_id, workspace("W"));
        assert_eq!(resolved.integration.member_id.as_deref(), Some("member-1"));
        assert_eq!(resolved.mappings.len(), 1);
    }

    #[tokio::test]
    async fn a_token_validates_exactly_once() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver();
        let token = resolver
            .issue_token(workspace("W"), Platform::OpenChannels, 30)
            .await
            .expect("issue");

        resolver
            .resolve_by_token(&token.token, CallbackParams::default())
            .await
            .expect("first validation succeeds");

        let error = resolver
            .resolve_by_token(&token.token, CallbackParams::default())
            .await
            .expect_err("second validation must fail");
        assert_eq!(error, EngineError::TokenInvalid);
    }

    #[tokio::test]
    async fn unknown_token_is_invalid() {
        let fixture = Fixture::new();
        let error = fixture
            .resolver()
            .resolve_by_token("ABCD1234", CallbackParams::default())
            .await
            .expect_err("must fail");
        assert_eq!(error, EngineError::TokenInvalid);
    }

    #[tokio::test]
    async fn domain_binding_overwrites_the_previous_domain() {
        let fixture = Fixture::new();
        let resolver = fixture.resolver();

        let first = resolver
            .resolve_by_domain("old.portal.example", &workspace("W"), Platform::OpenChannels)
            .await
            .expect("first bind");
        let second = resolver
            .resolve_by_domain("new.portal.example", &workspace("W"), Platform::OpenChannels)
            .await
            .expect("second bind");

        assert_eq!(first.id, second.id, "same integration rebinds, no duplicate row");
        assert_eq!(second.domain.as_deref(), Some("new.portal.example"));
    }

    #[tokio::test]
    async fn callback_with_member_id_resolves_directly() {
        let fixture = Fixture::new();
        let mut integration = Integration::new(workspace("W"), Platform::OpenChannels);
        integration.member_id = Some("member-7".to_string());
        fixture.integrations.insert(&integration).await.expect("seed");

        let resolved = fixture
            .resolver()
            .resolve_by_callback(&CallbackParams {
                domain: None,
                member_id: Some("member-7".to_string()),
            })
            .await
            .expect("resolve");
        assert_eq!(resolved.id, integration.id);
    }

    #[tokio::test]
    async fn bare_domain_matching_several_integrations_is_ambiguous() {
        let fixture = Fixture::new();
        for ws in ["W1", "W2"] {
            let mut integration = Integration::new(workspace(ws), Platform::OpenChannels);
            integration.domain = Some("shared.portal.example".to_string());
            fixture.integrations.insert(&integration).await.expect("seed");
        }

        let error = fixture
            .resolver()
            .resolve_by_callback(&CallbackParams {
                domain: Some("shared.portal.example".to_string()),
                member_id: None,
            })
            .await
            .expect_err("must be ambiguous");
        assert!(matches!(error, EngineError::AmbiguousIdentity(_)));
    }

    #[tokio::test]
    async fn callback_with_nothing_resolvable_is_rejected() {
        let fixture = Fixture::new();
        let error = fixture
            .resolver()
            .resolve_by_callback(&CallbackParams::default())
            .await
            .expect_err("must fail");
        assert!(matches!(error, EngineError::IdentityNotFound(_)));
    }
}
