//! Schema Registration
//!
//! Registers the catalog's metadata schema with the platform. This is a
//! one-time setup step: the platform keeps the schema until it is replaced,
//! and linked roles in the guild are configured against these keys.
//!
//! The whole schema is replaced in one `PUT`, so registering is idempotent.

use reqwest::{header, Client};
use tracing::{info, warn};

use crate::catalog::MetadataField;
use crate::http::endpoint;
use crate::types::{ApplicationId, BotToken};

/// Error types for schema registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Registration rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Pushes a metadata schema with the bot credential.
pub struct SchemaRegistrar {
    client: Client,
    api_base: String,
    application_id: ApplicationId,
    bot_token: BotToken,
}

impl SchemaRegistrar {
    pub fn new(
        client: Client,
        api_base: impl Into<String>,
        application_id: ApplicationId,
        bot_token: BotToken,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            application_id,
            bot_token,
        }
    }

    fn metadata_url(&self) -> String {
        endpoint(
            &self.api_base,
            &format!("applications/{}/role-connections/metadata", self.application_id),
        )
    }

    /// Replace the application's metadata schema.
    ///
    /// Returns the schema as the platform echoes it back.
    pub async fn register(
        &self,
        schema: &[MetadataField],
    ) -> Result<Vec<MetadataField>, RegistrationError> {
        info!(
            application_id = %self.application_id,
            fields = schema.len(),
            "Registering role connection metadata schema"
        );

        let response = self
            .client
            .put(self.metadata_url())
            .header(
                header::AUTHORIZATION,
                format!("Bot {}", self.bot_token.expose()),
            )
            .json(schema)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Schema registration rejected");
            return Err(RegistrationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let registered: Vec<MetadataField> = response.json().await?;
        info!(fields = registered.len(), "Metadata schema registered");
        Ok(registered)
    }
}
