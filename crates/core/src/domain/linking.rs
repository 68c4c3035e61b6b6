use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::integration::{Platform, WorkspaceId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkingTokenId(pub String);

/// Short-lived, single-use credential binding a workspace to a future
/// portal installation. At most one unused, unexpired token exists per
/// (workspace, platform); issuing a replacement retires the predecessor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkingToken {
    pub id: LinkingTokenId,
    pub token: String,
    pub workspace_id: WorkspaceId,
    pub platform: Platform,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl LinkingToken {
    pub fn issue(workspace_id: WorkspaceId, platform: Platform, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: LinkingTokenId(format!("LNK-{}", Uuid::new_v4().simple())),
            token: generate_token_value(),
            workspace_id,
            platform,
            expires_at: now + ttl,
            used: false,
            created_at: now,
        }
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.used && now < self.expires_at
    }
}

/// Short uppercase value the user pastes into the portal-side install form.
fn generate_token_value() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::LinkingToken;
    use crate::domain::integration::{Platform, WorkspaceId};

    fn token() -> LinkingToken {
        LinkingToken::issue(
            WorkspaceId("ws-1".to_string()),
            Platform::OpenChannels,
            Duration::minutes(30),
        )
    }

    #[test]
    fn freshly_issued_token_is_usable() {
        let subject = token();
        assert!(subject.is_usable(Utc::now()));
        assert_eq!(subject.token.len(), 8);
        assert!(subject.token.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn used_or_expired_token_is_not_usable() {
        let mut used = token();
        used.used = true;
        assert!(!used.is_usable(Utc::now()));

        let expired = token();
        assert!(!expired.is_usable(expired.expires_at + Duration::seconds(1)));
        assert!(!expired.is_usable(expired.expires_at));
    }
}
