//! Guild membership lookups over the platform REST API.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::traits::*;
use crate::http::endpoint;
use crate::types::{BotToken, CommunityId, RoleId, UserId};

/// Directory that reads guilds and members with a bot credential.
pub struct DiscordDirectory {
    client: Client,
    api_base: String,
    bot_token: BotToken,
}

impl DiscordDirectory {
    pub fn new(client: Client, api_base: impl Into<String>, bot_token: BotToken) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            bot_token,
        }
    }

    fn guild_url(&self, guild: &CommunityId) -> String {
        endpoint(&self.api_base, &format!("guilds/{}", guild))
    }

    fn member_url(&self, guild: &CommunityId, user: &UserId) -> String {
        endpoint(&self.api_base, &format!("guilds/{}/members/{}", guild, user))
    }

    /// GET a resource, mapping 404 to `None`.
    async fn fetch<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<Option<T>, DirectoryError> {
        let response = self
            .client
            .get(url)
            .header(
                header::AUTHORIZATION,
                format!("Bot {}", self.bot_token.expose()),
            )
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(url, "Directory lookup returned 404");
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| DirectoryError::Parse(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> DirectoryError {
    if e.is_timeout() {
        DirectoryError::Timeout
    } else {
        DirectoryError::Transport(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GuildResponse {
    id: CommunityId,
    name: Option<String>,
}

/// JSON error code for a guild the bot cannot see.
const MISSING_ACCESS: u64 = 50001;

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: u64,
}

/// Error code carried in a REST error body, if it has one.
fn error_code(body: &str) -> Option<u64> {
    serde_json::from_str::<ApiErrorResponse>(body)
        .ok()
        .map(|e| e.code)
}

#[derive(Debug, Deserialize)]
struct GuildMemberResponse {
    #[serde(default)]
    roles: Vec<RoleId>,
}

#[async_trait]
impl MembershipDirectory for DiscordDirectory {
    fn id(&self) -> &str {
        "discord"
    }

    async fn community(&self, id: &CommunityId) -> Result<Option<Community>, DirectoryError> {
        // A guild the bot was removed from answers 403 rather than 404.
        let guild: Option<GuildResponse> = match self.fetch(&self.guild_url(id)).await {
            Err(DirectoryError::Status { status: 403, body })
                if error_code(&body) == Some(MISSING_ACCESS) =>
            {
                warn!(guild_id = %id, "Bot has no access to the guild");
                None
            }
            other => other?,
        };
        Ok(guild.map(|g| Community {
            id: g.id,
            name: g.name,
        }))
    }

    async fn member(
        &self,
        community: &Community,
        user_id: &UserId,
    ) -> Result<Option<Member>, DirectoryError> {
        let member: Option<GuildMemberResponse> =
            self.fetch(&self.member_url(&community.id, user_id)).await?;
        Ok(member.map(|m| Member {
            user_id: user_id.clone(),
            role_ids: m.roles.into_iter().collect(),
        }))
    }
}
