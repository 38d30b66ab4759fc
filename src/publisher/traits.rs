//! Core trait for metadata publishers and the request body they send.

use async_trait::async_trait;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::encoder::MetadataPayload;
use crate::types::{AccessToken, UserId};

/// Error types for publish attempts.
///
/// A non-200 answer is not an error: it comes back as a [`PublishReceipt`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Network failure before a response arrived
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request did not finish in time
    #[error("Publish timed out")]
    Timeout,
}

/// What the platform answered to a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub status: u16,
    /// Response body, captured for diagnostics when the publish failed
    pub body: Option<String>,
}

impl PublishReceipt {
    /// Only HTTP 200 counts as applied.
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// The metadata half of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataUpdate {
    /// Write the encoded values
    Grant(MetadataPayload),
    /// Send `{}`, which removes the connection's metadata and the badge with it
    Clear,
}

impl Serialize for MetadataUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetadataUpdate::Grant(payload) => payload.serialize(serializer),
            MetadataUpdate::Clear => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

/// JSON body of a role connection update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleConnectionBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_name: Option<String>,
    pub metadata: MetadataUpdate,
}

impl RoleConnectionBody {
    pub fn grant(payload: MetadataPayload, platform_name: Option<&str>) -> Self {
        Self {
            platform_name: platform_name.map(str::to_string),
            metadata: MetadataUpdate::Grant(payload),
        }
    }

    pub fn clear(platform_name: Option<&str>) -> Self {
        Self {
            platform_name: platform_name.map(str::to_string),
            metadata: MetadataUpdate::Clear,
        }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self.metadata, MetadataUpdate::Clear)
    }
}

/// Authenticated write of role connection metadata on behalf of one user.
#[async_trait]
pub trait MetadataPublisher: Send + Sync {
    /// Short identifier for logs.
    fn id(&self) -> &str;

    /// Send `body` in a single request using the user's access token.
    async fn publish(
        &self,
        user_id: &UserId,
        access_token: &AccessToken,
        body: &RoleConnectionBody,
    ) -> Result<PublishReceipt, PublishError>;
}
