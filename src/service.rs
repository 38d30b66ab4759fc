//! ReconciliationService - main entry point for syncing a user's badge.
//!
//! One reconciliation walks `Resolving -> Encoding -> Publishing` and ends in
//! `Done` or `Failed`. There are no retries: the caller decides whether to run
//! the whole reconciliation again.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::RoleCatalog;
use crate::directory::DirectoryError;
use crate::encoder::{encode, Encoded, MetadataPayload};
use crate::publisher::{MetadataPublisher, PublishError, RoleConnectionBody};
use crate::resolver::{MembershipResolver, ResolveNotice};
use crate::types::{AccessToken, UserId};

/// Steps of a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resolving,
    Encoding,
    Publishing,
}

/// Error types for a failed reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Membership lookup could not be answered
    #[error("Membership lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    /// Publish request never got a response
    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    /// A stage exceeded the call timeout
    #[error("{stage:?} exceeded {timeout_ms}ms")]
    Timeout { stage: Stage, timeout_ms: u64 },
}

/// Terminal state of one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// A publish attempt got an answer (which may still be a non-200)
    Done,
    /// The call stopped at `stage`
    Failed {
        stage: Stage,
        #[serde(serialize_with = "serialize_display")]
        error: ReconcileError,
    },
}

fn serialize_display<T: fmt::Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Everything one reconciliation decided and observed.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub reconciliation_id: Uuid,
    pub user_id: UserId,
    /// The encoded values; `None` when resolution failed before encoding
    pub payload: Option<MetadataPayload>,
    pub granted: bool,
    pub pushed: bool,
    pub notice: Option<ResolveNotice>,
    /// HTTP status of the publish attempt
    pub status: Option<u16>,
    /// Response body of a rejected publish
    pub response_body: Option<String>,
    pub outcome: ReconcileOutcome,
}

impl ReconciliationResult {
    fn started(user_id: &UserId) -> Self {
        Self {
            reconciliation_id: Uuid::new_v4(),
            user_id: user_id.clone(),
            payload: None,
            granted: false,
            pushed: false,
            notice: None,
            status: None,
            response_body: None,
            outcome: ReconcileOutcome::Done,
        }
    }

    fn failed(mut self, stage: Stage, error: ReconcileError) -> Self {
        self.outcome = ReconcileOutcome::Failed { stage, error };
        self
    }

    pub fn is_done(&self) -> bool {
        matches!(self.outcome, ReconcileOutcome::Done)
    }

    /// The clearing update was sent because the user holds no tracked role.
    pub fn cleared(&self) -> bool {
        self.is_done() && !self.granted
    }
}

/// One entry of a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileRequest {
    pub user_id: UserId,
    pub access_token: AccessToken,
}

/// Counts over a batch of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub granted: usize,
    pub cleared: usize,
    pub pushed: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ReconciliationResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            if !result.is_done() {
                summary.failed += 1;
                continue;
            }
            if result.granted {
                summary.granted += 1;
            } else {
                summary.cleared += 1;
            }
            if result.pushed {
                summary.pushed += 1;
            }
        }
        summary
    }
}

/// Results of a batch, in request order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub results: Vec<ReconciliationResult>,
    pub summary: BatchSummary,
}

/// Configuration for the ReconciliationService.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upper bound for each directory or publish call
    pub call_timeout: Duration,
    /// Reconciliations in flight at once during a batch
    pub max_concurrent: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_concurrent: 8,
        }
    }
}

/// Orchestrates resolver, encoder and publisher for one user at a time.
///
/// Holds no per-user state, so any number of reconciliations may run
/// concurrently on one instance.
pub struct ReconciliationService {
    config: ServiceConfig,
    catalog: Arc<RoleCatalog>,
    resolver: MembershipResolver,
    publisher: Arc<dyn MetadataPublisher>,
}

impl ReconciliationService {
    pub fn new(
        catalog: Arc<RoleCatalog>,
        resolver: MembershipResolver,
        publisher: Arc<dyn MetadataPublisher>,
    ) -> Self {
        Self {
            config: ServiceConfig::default(),
            catalog,
            resolver,
            publisher,
        }
    }

    /// Create with configuration.
    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Bring one user's role connection in line with their current roles.
    ///
    /// A user holding no tracked role gets the clearing update (`{}`), never
    /// a zeroed payload. Errors are reported in the result, never raised.
    pub async fn reconcile(
        &self,
        user_id: &UserId,
        access_token: &AccessToken,
    ) -> ReconciliationResult {
        let mut result = ReconciliationResult::started(user_id);
        let id = result.reconciliation_id;

        debug!(%id, %user_id, stage = ?Stage::Resolving, "Reconciling");
        let resolution = match self
            .bounded(Stage::Resolving, self.resolver.resolve(user_id))
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(%id, %user_id, error = %e, "Role resolution failed, nothing published");
                return result.failed(Stage::Resolving, e);
            }
        };
        result.notice = resolution.notice;

        debug!(%id, %user_id, stage = ?Stage::Encoding, roles = resolution.roles.len(), "Reconciling");
        let Encoded { payload, granted } = encode(&resolution.roles, &self.catalog);
        result.granted = granted;

        let platform_name = self.catalog.platform_name();
        let body = if granted {
            RoleConnectionBody::grant(payload.clone(), platform_name)
        } else {
            RoleConnectionBody::clear(platform_name)
        };
        result.payload = Some(payload);

        debug!(%id, %user_id, stage = ?Stage::Publishing, clear = body.is_clear(), "Reconciling");
        let receipt = match self
            .bounded(
                Stage::Publishing,
                self.publisher.publish(user_id, access_token, &body),
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                error!(%id, %user_id, granted, error = %e, "Metadata publish failed");
                return result.failed(Stage::Publishing, e);
            }
        };

        result.status = Some(receipt.status);
        result.pushed = receipt.is_success();
        if result.pushed {
            info!(
                %id,
                %user_id,
                granted,
                publisher = self.publisher.id(),
                "Role connection updated"
            );
        } else {
            warn!(
                %id,
                %user_id,
                granted,
                status = receipt.status,
                body = receipt.body.as_deref().unwrap_or(""),
                "Role connection update rejected"
            );
        }
        result.response_body = receipt.body;
        result
    }

    /// Reconcile many users concurrently, bounded by `max_concurrent`.
    ///
    /// Results come back in request order. One user's failure never affects
    /// another's reconciliation.
    pub async fn reconcile_batch(&self, requests: &[ReconcileRequest]) -> BatchReport {
        let results: Vec<ReconciliationResult> = stream::iter(requests)
            .map(|request| self.reconcile(&request.user_id, &request.access_token))
            .buffered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        let summary = BatchSummary::from_results(&results);
        info!(
            total = summary.total,
            granted = summary.granted,
            cleared = summary.cleared,
            pushed = summary.pushed,
            failed = summary.failed,
            "Batch reconciliation finished"
        );

        BatchReport { results, summary }
    }

    /// Run one stage under the call timeout.
    async fn bounded<T, E>(
        &self,
        stage: Stage,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, ReconcileError>
    where
        ReconcileError: From<E>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(ReconcileError::from),
            Err(_) => Err(ReconcileError::Timeout {
                stage,
                timeout_ms: self.config.call_timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RoleEntry;
    use crate::directory::MemoryDirectory;
    use crate::publisher::{MockPublisher, PublishReceipt};
    use crate::types::{CommunityId, RoleSet};
    use async_trait::async_trait;

    const GUILD: &str = "guild";

    fn bitfield_catalog() -> Arc<RoleCatalog> {
        Arc::new(
            RoleCatalog::new(vec![
                RoleEntry::bit_flag(1, "Owner", "role_flags", 1),
                RoleEntry::bit_flag(16, "Admin", "role_flags", 16),
            ])
            .unwrap(),
        )
    }

    fn boolean_catalog() -> Arc<RoleCatalog> {
        Arc::new(
            RoleCatalog::new(vec![
                RoleEntry::boolean("owner", "Owner", "has_owner"),
                RoleEntry::boolean("admin", "Admin", "has_admin"),
            ])
            .unwrap(),
        )
    }

    fn service(
        catalog: Arc<RoleCatalog>,
        directory: MemoryDirectory,
        publisher: Arc<dyn MetadataPublisher>,
    ) -> ReconciliationService {
        let resolver = MembershipResolver::new(Arc::new(directory), CommunityId::from(GUILD));
        ReconciliationService::new(catalog, resolver, publisher)
    }

    fn member_with(roles: &[u64]) -> MemoryDirectory {
        MemoryDirectory::new().with_member(GUILD, "alice", roles.iter().copied().collect())
    }

    fn token() -> AccessToken {
        AccessToken::new("user-token")
    }

    fn alice() -> UserId {
        UserId::from("alice")
    }

    #[tokio::test]
    async fn test_bitfield_scenarios() {
        let cases: [(&[u64], u64); 3] = [(&[1], 1), (&[16], 16), (&[1, 16], 17)];

        for (roles, expected) in cases {
            let publisher = Arc::new(MockPublisher::new());
            let service = service(bitfield_catalog(), member_with(roles), publisher.clone());

            let result = service.reconcile(&alice(), &token()).await;

            assert!(result.is_done());
            assert!(result.granted);
            assert!(result.pushed);
            assert_eq!(result.payload.as_ref().unwrap().get("role_flags"), Some(expected));

            let body = publisher.last_for(&alice()).unwrap();
            assert_eq!(
                serde_json::to_value(&body).unwrap(),
                serde_json::json!({"metadata": {"role_flags": expected}})
            );
        }
    }

    #[tokio::test]
    async fn test_no_tracked_roles_publishes_empty_object() {
        let publisher = Arc::new(MockPublisher::new());
        let service = service(bitfield_catalog(), member_with(&[]), publisher.clone());

        let result = service.reconcile(&alice(), &token()).await;

        assert!(!result.granted);
        assert!(result.pushed);
        assert!(result.cleared());
        assert_eq!(result.payload.as_ref().unwrap().get("role_flags"), Some(0));

        let body = publisher.last_for(&alice()).unwrap();
        assert!(body.is_clear());
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"metadata":{}}"#);
    }

    #[tokio::test]
    async fn test_boolean_grant_published_as_is() {
        let publisher = Arc::new(MockPublisher::new());
        let directory =
            MemoryDirectory::new().with_member(GUILD, "alice", ["owner"].into_iter().collect());
        let service = service(boolean_catalog(), directory, publisher.clone());

        let result = service.reconcile(&alice(), &token()).await;

        assert!(result.granted);
        assert!(result.pushed);
        let body = publisher.last_for(&alice()).unwrap();
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"metadata": {"has_owner": 1, "has_admin": 0}})
        );
    }

    #[tokio::test]
    async fn test_member_not_found_clears() {
        let publisher = Arc::new(MockPublisher::new());
        let service = service(
            boolean_catalog(),
            MemoryDirectory::new().with_community(GUILD),
            publisher.clone(),
        );

        let result = service.reconcile(&alice(), &token()).await;

        assert_eq!(result.notice, Some(ResolveNotice::MemberNotFound));
        assert!(!result.granted);
        assert!(result.payload.as_ref().unwrap().is_zeroed());
        assert!(publisher.last_for(&alice()).unwrap().is_clear());
    }

    #[tokio::test]
    async fn test_community_unavailable_clears() {
        let publisher = Arc::new(MockPublisher::new());
        let service = service(bitfield_catalog(), MemoryDirectory::new(), publisher.clone());

        let result = service.reconcile(&alice(), &token()).await;

        assert!(result.is_done());
        assert_eq!(result.notice, Some(ResolveNotice::CommunityUnavailable));
        assert!(publisher.last_for(&alice()).unwrap().is_clear());
    }

    #[tokio::test]
    async fn test_rejected_publish_keeps_granted() {
        let publisher =
            Arc::new(MockPublisher::new().with_status(403, r#"{"message":"Missing Access"}"#));
        let service = service(bitfield_catalog(), member_with(&[1]), publisher.clone());

        let result = service.reconcile(&alice(), &token()).await;

        assert!(result.is_done());
        assert!(result.granted);
        assert!(!result.pushed);
        assert_eq!(result.status, Some(403));
        assert_eq!(
            result.response_body.as_deref(),
            Some(r#"{"message":"Missing Access"}"#)
        );
    }

    #[tokio::test]
    async fn test_resolution_failure_publishes_nothing() {
        let publisher = Arc::new(MockPublisher::new());
        let directory = member_with(&[1])
            .with_failure(DirectoryError::Transport("connection refused".to_string()));
        let service = service(bitfield_catalog(), directory, publisher.clone());

        let result = service.reconcile(&alice(), &token()).await;

        assert!(!result.is_done());
        assert!(!result.pushed);
        assert!(result.payload.is_none());
        assert_eq!(publisher.call_count(), 0);
        assert!(matches!(
            result.outcome,
            ReconcileOutcome::Failed {
                stage: Stage::Resolving,
                error: ReconcileError::Directory(DirectoryError::Transport(_)),
            }
        ));
    }

    #[tokio::test]
    async fn test_publish_transport_failure() {
        let publisher = Arc::new(
            MockPublisher::new().with_failure(PublishError::Transport("reset".to_string())),
        );
        let service = service(bitfield_catalog(), member_with(&[16]), publisher.clone());

        let result = service.reconcile(&alice(), &token()).await;

        assert!(result.granted);
        assert!(!result.pushed);
        assert_eq!(result.status, None);
        assert!(matches!(
            result.outcome,
            ReconcileOutcome::Failed {
                stage: Stage::Publishing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_slow_directory_times_out() {
        let publisher = Arc::new(MockPublisher::new());
        let directory = member_with(&[1]).with_delay(Duration::from_millis(500));
        let service = service(bitfield_catalog(), directory, publisher.clone()).with_config(
            ServiceConfig {
                call_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let result = service.reconcile(&alice(), &token()).await;

        assert_eq!(
            result.outcome,
            ReconcileOutcome::Failed {
                stage: Stage::Resolving,
                error: ReconcileError::Timeout {
                    stage: Stage::Resolving,
                    timeout_ms: 20,
                },
            }
        );
        assert_eq!(publisher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_publisher_times_out() {
        let publisher = Arc::new(MockPublisher::new().with_delay(Duration::from_millis(500)));
        let service = service(bitfield_catalog(), member_with(&[16]), publisher.clone())
            .with_config(ServiceConfig {
                call_timeout: Duration::from_millis(20),
                ..Default::default()
            });

        let result = service.reconcile(&alice(), &token()).await;

        assert_eq!(
            result.outcome,
            ReconcileOutcome::Failed {
                stage: Stage::Publishing,
                error: ReconcileError::Timeout {
                    stage: Stage::Publishing,
                    timeout_ms: 20,
                },
            }
        );
        assert!(result.granted);
        assert!(!result.pushed);
        assert_eq!(result.payload.as_ref().unwrap().get("role_flags"), Some(16));
        assert_eq!(publisher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_result_serializes_failure_as_text() {
        let publisher = Arc::new(MockPublisher::new().with_failure(PublishError::Timeout));
        let service = service(bitfield_catalog(), member_with(&[1]), publisher);

        let result = service.reconcile(&alice(), &token()).await;
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["outcome"]["state"], "failed");
        assert_eq!(json["outcome"]["stage"], "publishing");
        assert_eq!(json["outcome"]["error"], "Publish failed: Publish timed out");
        assert_eq!(json["payload"]["role_flags"], 1);
    }

    /// Rejects one specific token at the transport level.
    struct ExpiredTokenPublisher;

    #[async_trait]
    impl MetadataPublisher for ExpiredTokenPublisher {
        fn id(&self) -> &str {
            "expired-token"
        }

        async fn publish(
            &self,
            _user_id: &UserId,
            access_token: &AccessToken,
            _body: &RoleConnectionBody,
        ) -> Result<PublishReceipt, PublishError> {
            if access_token.expose() == "expired" {
                Err(PublishError::Transport("token revoked mid-flight".to_string()))
            } else {
                Ok(PublishReceipt {
                    status: 200,
                    body: None,
                })
            }
        }
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let directory = MemoryDirectory::new()
            .with_member(GUILD, "alice", [1u64].into_iter().collect())
            .with_member(GUILD, "bob", [16u64].into_iter().collect())
            .with_member(GUILD, "carol", RoleSet::empty());
        let service = service(bitfield_catalog(), directory, Arc::new(ExpiredTokenPublisher))
            .with_config(ServiceConfig {
                max_concurrent: 2,
                ..Default::default()
            });

        let requests = vec![
            ReconcileRequest {
                user_id: UserId::from("alice"),
                access_token: AccessToken::new("ok"),
            },
            ReconcileRequest {
                user_id: UserId::from("bob"),
                access_token: AccessToken::new("expired"),
            },
            ReconcileRequest {
                user_id: UserId::from("carol"),
                access_token: AccessToken::new("ok"),
            },
            ReconcileRequest {
                user_id: UserId::from("dave"),
                access_token: AccessToken::new("ok"),
            },
        ];

        let report = service.reconcile_batch(&requests).await;

        let users: Vec<&str> = report.results.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(users, ["alice", "bob", "carol", "dave"]);
        assert!(report.results[0].pushed);
        assert!(!report.results[1].is_done());
        assert!(report.results[2].cleared());
        assert_eq!(report.results[3].notice, Some(ResolveNotice::MemberNotFound));

        assert_eq!(
            report.summary,
            BatchSummary {
                total: 4,
                granted: 1,
                cleared: 2,
                pushed: 3,
                failed: 1,
            }
        );
    }
}
