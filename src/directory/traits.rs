//! Core trait for membership directories.

use async_trait::async_trait;

use crate::types::{CommunityId, RoleSet, UserId};

/// Error types for directory lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// Network failure talking to the directory
    #[error("Transport error: {0}")]
    Transport(String),

    /// The lookup did not finish in time
    #[error("Directory lookup timed out")]
    Timeout,

    /// The directory answered with an unexpected status
    #[error("Directory returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A community as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Community {
    pub id: CommunityId,
    pub name: Option<String>,
}

/// A member of a community and the roles attached to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub role_ids: RoleSet,
}

/// Read access to community membership.
///
/// `None` means "not there" and is never an error; errors are reserved for
/// lookups that could not be answered.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Short identifier for logs.
    fn id(&self) -> &str;

    /// Look up a community.
    async fn community(&self, id: &CommunityId) -> Result<Option<Community>, DirectoryError>;

    /// Look up a user inside a community.
    async fn member(
        &self,
        community: &Community,
        user_id: &UserId,
    ) -> Result<Option<Member>, DirectoryError>;
}
