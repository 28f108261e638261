//! Bootstrap Services
//!
//! Services written purely against the `DataStore` contract:
//!
//! - `SchemaManager` - Creates registered tables and indexes in dependency order
//! - `SeedManager` - Idempotent loading of templates, tenants, users and demo data
//!
//! Neither service knows which provider is active.

pub mod schema_manager;
pub mod seed_manager;

pub use schema_manager::{
    creation_order, default_dependencies, dependency_map, DependencyMap, SchemaFailure,
    SchemaManager, SchemaReport,
};
pub use seed_manager::{
    default_permission_templates, CompanySeed, ContentSeed, DeviceSeed, PermissionTemplate,
    RoleAssignmentSeed, SeedDataset, SeedManager, SeedOutcome, SeedReport, UserSeed,
};
