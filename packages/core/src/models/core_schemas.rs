//! Core Schema Definitions
//!
//! Canonical definitions for the tables that ship with OmniStore. Every
//! provider provisions these (relational DDL, document indexes) and the seed
//! manager populates them.
//!
//! ## Core Tables
//!
//! - **permission_templates** - Role permission bundles for RBAC bootstrap
//! - **companies** - Tenant organizations, keyed by `organization_code`
//! - **users** - Accounts belonging to a company, keyed by `email`
//! - **user_roles** - Role assignments per (user, company)
//! - **devices** - Registered hardware per company
//! - **content_items** - User-submitted content awaiting moderation
//!
//! ## Usage
//!
//! Call `SchemaRegistry::core()` to get the catalog.

use crate::models::schema::{
    FieldDefinition, FieldType, IndexDefinition, SchemaRegistry, TableSchema,
};
use serde_json::json;

pub const PERMISSION_TEMPLATES: &str = "permission_templates";
pub const COMPANIES: &str = "companies";
pub const USERS: &str = "users";
pub const USER_ROLES: &str = "user_roles";
pub const DEVICES: &str = "devices";
pub const CONTENT_ITEMS: &str = "content_items";

impl SchemaRegistry {
    /// Registry pre-populated with every core table.
    pub fn core() -> Self {
        let mut registry = SchemaRegistry::new();
        for schema in get_core_schemas() {
            registry.register(schema);
        }
        registry
    }
}

/// All core table schemas, in registration order.
pub fn get_core_schemas() -> Vec<TableSchema> {
    vec![
        permission_templates_schema(),
        companies_schema(),
        users_schema(),
        user_roles_schema(),
        devices_schema(),
        content_items_schema(),
    ]
}

fn permission_templates_schema() -> TableSchema {
    TableSchema::new(PERMISSION_TEMPLATES, "Permission bundles granted by each role")
        .field(
            FieldDefinition::new("role", FieldType::String)
                .required()
                .unique()
                .max_length(50)
                .describe("Role key, e.g. company_admin"),
        )
        .field(FieldDefinition::new("name", FieldType::String).required().max_length(100))
        .field(FieldDefinition::new("description", FieldType::Text))
        .field(
            FieldDefinition::new("permissions", FieldType::Json)
                .required()
                .default_value(json!([]))
                .describe("List of permission strings"),
        )
        .field(FieldDefinition::new("is_system", FieldType::Boolean).default_value(true))
        .index(IndexDefinition::unique(["role"]))
}

fn companies_schema() -> TableSchema {
    TableSchema::new(COMPANIES, "Tenant organizations")
        .field(FieldDefinition::new("name", FieldType::String).required().max_length(200))
        .field(
            FieldDefinition::new("organization_code", FieldType::String)
                .required()
                .unique()
                .max_length(50)
                .describe("Stable natural key"),
        )
        .field(FieldDefinition::new("industry", FieldType::String).max_length(100))
        .field(FieldDefinition::new("contact_email", FieldType::Email).max_length(255))
        .field(FieldDefinition::new("website", FieldType::Url).max_length(2048))
        .field(
            FieldDefinition::new("subscription_tier", FieldType::Enum)
                .enum_values(["free", "standard", "enterprise"])
                .default_value("free"),
        )
        .field(FieldDefinition::new("settings", FieldType::Json).default_value(json!({})))
        .field(
            FieldDefinition::new("is_active", FieldType::Boolean)
                .default_value(true)
                .indexed(),
        )
        .index(IndexDefinition::unique(["organization_code"]))
        .with_soft_delete()
}

fn users_schema() -> TableSchema {
    TableSchema::new(USERS, "User accounts")
        .field(
            FieldDefinition::new("email", FieldType::Email)
                .required()
                .unique()
                .max_length(255),
        )
        .field(FieldDefinition::new("full_name", FieldType::String).required().max_length(200))
        .field(
            FieldDefinition::new("company_id", FieldType::String)
                .max_length(64)
                .references("companies.id")
                .indexed(),
        )
        .field(
            FieldDefinition::new("status", FieldType::Enum)
                .enum_values(["active", "invited", "suspended"])
                .default_value("active"),
        )
        .field(FieldDefinition::new("last_login_at", FieldType::Datetime))
        .field(FieldDefinition::new("preferences", FieldType::Json).default_value(json!({})))
        .index(IndexDefinition::unique(["email"]))
        .with_soft_delete()
}

fn user_roles_schema() -> TableSchema {
    TableSchema::new(USER_ROLES, "Role assignments per user and company")
        .field(
            FieldDefinition::new("user_id", FieldType::String)
                .required()
                .max_length(64)
                .references("users.id"),
        )
        .field(
            FieldDefinition::new("company_id", FieldType::String)
                .required()
                .max_length(64)
                .references("companies.id"),
        )
        .field(FieldDefinition::new("role", FieldType::String).required().max_length(50))
        .field(FieldDefinition::new("granted_by", FieldType::String).max_length(64))
        .field(FieldDefinition::new("expires_at", FieldType::Datetime))
        .index(IndexDefinition::unique(["user_id", "company_id", "role"]))
        .index(IndexDefinition::new(["company_id", "role"]))
        .with_soft_delete()
}

fn devices_schema() -> TableSchema {
    TableSchema::new(DEVICES, "Registered devices")
        .field(
            FieldDefinition::new("company_id", FieldType::String)
                .required()
                .max_length(64)
                .references("companies.id"),
        )
        .field(
            FieldDefinition::new("serial_number", FieldType::String)
                .required()
                .unique()
                .max_length(100),
        )
        .field(FieldDefinition::new("name", FieldType::String).required().max_length(200))
        .field(
            FieldDefinition::new("device_type", FieldType::Enum)
                .enum_values(["sensor", "camera", "kiosk", "gateway"])
                .required(),
        )
        .field(
            FieldDefinition::new("status", FieldType::Enum)
                .enum_values(["online", "offline", "maintenance"])
                .default_value("offline"),
        )
        .field(FieldDefinition::new("last_seen_at", FieldType::Datetime))
        .field(FieldDefinition::new("metadata", FieldType::Json).default_value(json!({})))
        .index(IndexDefinition::unique(["serial_number"]))
        .index(IndexDefinition::new(["company_id", "status"]))
        .with_soft_delete()
}

fn content_items_schema() -> TableSchema {
    TableSchema::new(CONTENT_ITEMS, "User-submitted content subject to moderation")
        .field(
            FieldDefinition::new("company_id", FieldType::String)
                .required()
                .max_length(64)
                .references("companies.id"),
        )
        .field(
            FieldDefinition::new("author_id", FieldType::String)
                .max_length(64)
                .references("users.id")
                .indexed(),
        )
        .field(FieldDefinition::new("title", FieldType::String).required().max_length(300))
        .field(FieldDefinition::new("body", FieldType::Text))
        .field(
            FieldDefinition::new("content_type", FieldType::Enum)
                .enum_values(["article", "image", "video", "comment"])
                .default_value("article"),
        )
        .field(
            FieldDefinition::new("moderation_status", FieldType::Enum)
                .enum_values(["pending", "approved", "rejected", "flagged"])
                .default_value("pending"),
        )
        .field(FieldDefinition::new("tags", FieldType::Json).default_value(json!([])))
        .field(FieldDefinition::new("published_at", FieldType::Datetime))
        .index(IndexDefinition::new(["company_id", "moderation_status"]))
        .with_soft_delete()
}
