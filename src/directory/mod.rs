//! Community membership directories.
//!
//! - Discord REST (guild and member lookups with a bot token)
//! - In-memory directory for testing and dry runs

pub mod discord;
pub mod memory;
pub mod traits;

pub use discord::DiscordDirectory;
pub use memory::MemoryDirectory;
pub use traits::{Community, DirectoryError, Member, MembershipDirectory};
