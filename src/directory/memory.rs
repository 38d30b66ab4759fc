//! In-memory directory for tests and dry runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::traits::*;
use crate::types::{CommunityId, RoleSet, UserId};

/// Directory backed by a fixed map of communities and members.
///
/// Can be told to fail or to stall, to exercise the error paths of callers.
#[derive(Default)]
pub struct MemoryDirectory {
    communities: HashMap<CommunityId, (Community, HashMap<UserId, RoleSet>)>,
    failure: Option<DirectoryError>,
    delay: Option<Duration>,
    lookup_count: AtomicU32,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty community.
    pub fn with_community(mut self, id: impl Into<CommunityId>) -> Self {
        let id = id.into();
        self.communities
            .entry(id.clone())
            .or_insert_with(|| (Community { id, name: None }, HashMap::new()));
        self
    }

    /// Add a member, creating the community if needed.
    pub fn with_member(
        mut self,
        community: impl Into<CommunityId>,
        user_id: impl Into<UserId>,
        roles: RoleSet,
    ) -> Self {
        let community = community.into();
        self = self.with_community(community.clone());
        if let Some((_, members)) = self.communities.get_mut(&community) {
            members.insert(user_id.into(), roles);
        }
        self
    }

    /// Fail every lookup with `error`.
    pub fn with_failure(mut self, error: DirectoryError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Sleep before answering each lookup.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of lookups served, community and member lookups both counted.
    pub fn lookup_count(&self) -> u32 {
        self.lookup_count.load(Ordering::SeqCst)
    }

    async fn begin_lookup(&self) -> Result<(), DirectoryError> {
        self.lookup_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MembershipDirectory for MemoryDirectory {
    fn id(&self) -> &str {
        "memory"
    }

    async fn community(&self, id: &CommunityId) -> Result<Option<Community>, DirectoryError> {
        self.begin_lookup().await?;
        Ok(self.communities.get(id).map(|(c, _)| c.clone()))
    }

    async fn member(
        &self,
        community: &Community,
        user_id: &UserId,
    ) -> Result<Option<Member>, DirectoryError> {
        self.begin_lookup().await?;
        Ok(self
            .communities
            .get(&community.id)
            .and_then(|(_, members)| members.get(user_id))
            .map(|roles| Member {
                user_id: user_id.clone(),
                role_ids: roles.clone(),
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_directory_lookups() {
        let roles: RoleSet = [1u64, 16].into_iter().collect();
        let directory = MemoryDirectory::new().with_member("guild", "alice", roles.clone());

        let community = directory
            .community(&CommunityId::from("guild"))
            .await
            .unwrap()
            .expect("community exists");

        let member = directory
            .member(&community, &UserId::from("alice"))
            .await
            .unwrap()
            .expect("member exists");
        assert_eq!(member.role_ids, roles);

        assert!(directory
            .member(&community, &UserId::from("bob"))
            .await
            .unwrap()
            .is_none());
        assert!(directory
            .community(&CommunityId::from("elsewhere"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(directory.lookup_count(), 4);
    }

    #[tokio::test]
    async fn test_memory_directory_failure() {
        let directory = MemoryDirectory::new()
            .with_community("guild")
            .with_failure(DirectoryError::Transport("connection reset".to_string()));

        let result = directory.community(&CommunityId::from("guild")).await;
        assert_eq!(
            result,
            Err(DirectoryError::Transport("connection reset".to_string()))
        );
    }
}
