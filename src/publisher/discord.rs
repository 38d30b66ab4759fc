//! Role connection writes over the platform REST API.

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use super::traits::*;
use crate::http::endpoint;
use crate::types::{AccessToken, ApplicationId, UserId};

/// Publisher that PUTs the current user's role connection.
///
/// The user is identified by the bearer token; `user_id` is only used in
/// logs.
pub struct DiscordPublisher {
    client: Client,
    api_base: String,
    application_id: ApplicationId,
}

impl DiscordPublisher {
    pub fn new(client: Client, api_base: impl Into<String>, application_id: ApplicationId) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            application_id,
        }
    }

    fn role_connection_url(&self) -> String {
        endpoint(
            &self.api_base,
            &format!("users/@me/applications/{}/role-connection", self.application_id),
        )
    }
}

#[async_trait]
impl MetadataPublisher for DiscordPublisher {
    fn id(&self) -> &str {
        "discord"
    }

    async fn publish(
        &self,
        user_id: &UserId,
        access_token: &AccessToken,
        body: &RoleConnectionBody,
    ) -> Result<PublishReceipt, PublishError> {
        let response = self
            .client
            .put(self.role_connection_url())
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", access_token.expose()),
            )
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout
                } else {
                    PublishError::Transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        debug!(%user_id, status, "Role connection update answered");

        let receipt = PublishReceipt { status, body: None };
        if receipt.is_success() {
            return Ok(receipt);
        }

        let body = response.text().await.unwrap_or_default();
        Ok(PublishReceipt {
            body: Some(body),
            ..receipt
        })
    }
}
