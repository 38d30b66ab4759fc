//! Mock publisher for testing and dry runs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::traits::*;
use crate::types::{AccessToken, UserId};

/// Publisher that records every body instead of sending it.
///
/// Answers with a configurable status, or fails with a configured error.
pub struct MockPublisher {
    status: u16,
    response_body: String,
    failure: Option<PublishError>,
    delay: Option<Duration>,
    sent: Mutex<Vec<(UserId, RoleConnectionBody)>>,
    call_count: AtomicU32,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self {
            status: 200,
            response_body: String::new(),
            failure: None,
            delay: None,
            sent: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Answer with `status` and `body`.
    pub fn with_status(mut self, status: u16, body: impl Into<String>) -> Self {
        self.status = status;
        self.response_body = body.into();
        self
    }

    /// Fail every publish with `error`.
    pub fn with_failure(mut self, error: PublishError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of publish attempts, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Bodies recorded so far, in arrival order.
    pub fn sent(&self) -> Vec<(UserId, RoleConnectionBody)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The last body recorded for `user_id`.
    pub fn last_for(&self, user_id: &UserId) -> Option<RoleConnectionBody> {
        self.sent()
            .into_iter()
            .rev()
            .find(|(user, _)| user == user_id)
            .map(|(_, body)| body)
    }
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataPublisher for MockPublisher {
    fn id(&self) -> &str {
        "mock"
    }

    async fn publish(
        &self,
        user_id: &UserId,
        _access_token: &AccessToken,
        body: &RoleConnectionBody,
    ) -> Result<PublishReceipt, PublishError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((user_id.clone(), body.clone()));

        let receipt = PublishReceipt {
            status: self.status,
            body: None,
        };
        Ok(if receipt.is_success() {
            receipt
        } else {
            PublishReceipt {
                body: Some(self.response_body.clone()),
                ..receipt
            }
        })
    }
}
