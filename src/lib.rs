//! role-connection - Linked-role metadata sync
//!
//! Reads a user's roles in one guild, maps them onto the application's role
//! connection metadata and writes the result on the user's behalf. A user who
//! holds none of the tracked roles gets their metadata cleared.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        ReconciliationService            │
//! │  (resolve -> encode -> publish)         │
//! └───────┬──────────────┬──────────────┬───┘
//!         ▼              ▼              ▼
//! ┌──────────────┐ ┌───────────┐ ┌─────────────────┐
//! │ Membership   │ │ encode()  │ │ MetadataPublisher│
//! │ Resolver     │ │ + Role    │ │ (Discord/Mock)   │
//! │ (Directory)  │ │  Catalog  │ │                  │
//! └──────────────┘ └───────────┘ └─────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod directory;
pub mod encoder;
pub mod http;
pub mod publisher;
pub mod registration;
pub mod resolver;
pub mod service;
pub mod types;

// Re-export main types for convenience
pub use catalog::{CatalogError, Encoding, MetadataField, MetadataType, RoleCatalog, RoleEntry};
pub use config::{Args, SyncConfig};
pub use directory::{DirectoryError, MembershipDirectory};
pub use encoder::{encode, Encoded, MetadataPayload};
pub use publisher::{MetadataPublisher, PublishError, PublishReceipt, RoleConnectionBody};
pub use registration::{RegistrationError, SchemaRegistrar};
pub use resolver::{MembershipResolver, Resolution, ResolveNotice};
pub use service::{
    BatchReport, BatchSummary, ReconcileError, ReconcileOutcome, ReconcileRequest,
    ReconciliationResult, ReconciliationService, ServiceConfig,
};
pub use types::*;
