//! OmniStore Core - Provider-Agnostic Persistence
//!
//! This crate provides one data-access contract over three storage engines:
//! a MongoDB document store, a PostgreSQL relational store and a
//! PostgREST/Supabase REST gateway.
//!
//! # Architecture
//!
//! - **Single contract**: every provider implements [`db::DataStore`]; calling
//!   code never branches on the active engine
//! - **Filter algebra**: [`models::QueryFilter`] expresses the 13 operators each
//!   provider compiles into its native query language
//! - **Two error channels**: expected outcomes come back as a failed
//!   [`models::DatabaseResult`], infrastructure failures as [`db::DatabaseError`]
//! - **Declarative schemas**: [`models::SchemaRegistry`] drives validation, DDL
//!   and index provisioning
//!
//! # Modules
//!
//! - [`models`] - Filters, results, records, schemas and transaction types
//! - [`db`] - The `DataStore` contract, providers, configuration and lifecycle
//! - [`services`] - Schema provisioning and idempotent seeding

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use db::{
    create_store, DataStore, DataStoreExt, DatabaseError, DatabaseManager, ProviderConfig,
    ProviderKind, ServiceResult,
};
pub use models::*;
pub use services::{SchemaManager, SeedDataset, SeedManager};
