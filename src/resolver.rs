//! Resolve the roles a user holds in the configured community.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::directory::{DirectoryError, MembershipDirectory};
use crate::types::{CommunityId, RoleSet, UserId};

/// Why a resolution came back empty without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveNotice {
    /// The configured community could not be found
    CommunityUnavailable,
    /// The user is not (or no longer) a member
    MemberNotFound,
}

/// Roles held by one user, plus the reason when there are none by absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub roles: RoleSet,
    pub notice: Option<ResolveNotice>,
}

impl Resolution {
    fn absent(notice: ResolveNotice) -> Self {
        Self {
            roles: RoleSet::empty(),
            notice: Some(notice),
        }
    }
}

/// Looks up a user's roles in the single configured community.
///
/// Roles are returned exactly as the directory reports them; deciding which
/// ones matter is the encoder's job.
#[derive(Clone)]
pub struct MembershipResolver {
    directory: Arc<dyn MembershipDirectory>,
    community_id: CommunityId,
}

impl MembershipResolver {
    pub fn new(directory: Arc<dyn MembershipDirectory>, community_id: CommunityId) -> Self {
        Self {
            directory,
            community_id,
        }
    }

    /// Fetch the user's current role set. Nothing is cached.
    ///
    /// A missing community or member yields an empty set with a notice.
    /// Only a failed lookup is an error.
    pub async fn resolve(&self, user_id: &UserId) -> Result<Resolution, DirectoryError> {
        let Some(community) = self.directory.community(&self.community_id).await? else {
            warn!(
                community_id = %self.community_id,
                directory = self.directory.id(),
                "Community not found, treating user as having no roles"
            );
            return Ok(Resolution::absent(ResolveNotice::CommunityUnavailable));
        };

        let Some(member) = self.directory.member(&community, user_id).await? else {
            debug!(%user_id, community_id = %self.community_id, "User is not a member");
            return Ok(Resolution::absent(ResolveNotice::MemberNotFound));
        };

        debug!(%user_id, roles = member.role_ids.len(), "Resolved member roles");
        Ok(Resolution {
            roles: member.role_ids,
            notice: None,
        })
    }
}
