//! Database Layer
//!
//! This module holds everything that touches a storage engine:
//!
//! - The `DataStore` service contract shared by all providers
//! - Provider configuration and connection-string detection
//! - The document (MongoDB), relational (PostgreSQL) and REST
//!   (PostgREST/Supabase) implementations
//! - `DatabaseManager`, which owns the active store and its lifecycle
//!
//! # Architecture
//!
//! Application code depends only on `Arc<dyn DataStore>`. The provider is
//! chosen once, from configuration, by [`create_store`]; switching engines
//! never changes calling code. Driver-specific errors are translated into
//! [`DatabaseError`] at each provider boundary.

mod config;
mod document;
mod error;
mod manager;
mod relational;
mod rest;
mod store;

pub use config::{
    redact, DocumentConfig, ProviderConfig, ProviderKind, RelationalConfig, RestConfig,
};
pub use document::DocumentStore;
pub use error::{DatabaseError, ServiceResult};
pub use manager::{create_store, DatabaseManager, ManagerState};
pub use relational::RelationalStore;
pub use rest::RestStore;
pub use store::{DataStore, DataStoreExt, HealthState, HealthStatus};
