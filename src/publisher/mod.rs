//! Role connection metadata publishers.
//!
//! - Discord REST (`PUT /users/@me/applications/{id}/role-connection`)
//! - Mock publisher for testing and `--dry-run`

pub mod discord;
pub mod mock;
pub mod traits;

pub use discord::DiscordPublisher;
pub use mock::MockPublisher;
pub use traits::{
    MetadataPublisher, MetadataUpdate, PublishError, PublishReceipt, RoleConnectionBody,
};
