//! Seed Manager
//!
//! Populates a fresh database with bootstrap data: permission templates,
//! companies, users, role assignments and, optionally, demo devices and
//! content. Every insert is guarded by a lookup on the record's natural key,
//! so seeding is safe to repeat.
//!
//! # Order
//!
//! 1. Permission templates (keyed by `role`)
//! 2. Companies (keyed by `organization_code`)
//! 3. Users (keyed by `email`)
//! 4. Role assignments (keyed by user, company and role)
//! 5. Devices (keyed by `serial_number`) and content items (keyed by
//!    company and title), only when the dataset carries them
//!
//! Ids of seeded companies and users are remembered by organization code and
//! email so later steps can resolve references.

use crate::db::{DataStore, DatabaseError};
use crate::models::core_schemas::{
    COMPANIES, CONTENT_ITEMS, DEVICES, PERMISSION_TEMPLATES, USERS, USER_ROLES,
};
use crate::models::record::{self, Record};
use crate::models::{DatabaseResult, QueryFilter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Result of [`SeedManager::ensure_record`].
#[derive(Debug, Clone, PartialEq)]
pub enum SeedOutcome {
    Created(Record),
    Existing(Record),
}

impl SeedOutcome {
    pub fn record(&self) -> &Record {
        match self {
            SeedOutcome::Created(record) | SeedOutcome::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> Record {
        match self {
            SeedOutcome::Created(record) | SeedOutcome::Existing(record) => record,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SeedOutcome::Created(_))
    }

    pub fn id(&self) -> Option<String> {
        record::record_id(self.record())
    }
}

/// Per-table counts of created and already present records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedReport {
    pub created: BTreeMap<String, u64>,
    pub existing: BTreeMap<String, u64>,
}

impl SeedReport {
    fn record(&mut self, table: &str, outcome: &SeedOutcome) {
        let counts = if outcome.is_created() {
            &mut self.created
        } else {
            &mut self.existing
        };
        *counts.entry(table.to_string()).or_default() += 1;
    }

    pub fn created_in(&self, table: &str) -> u64 {
        self.created.get(table).copied().unwrap_or(0)
    }

    pub fn existing_in(&self, table: &str) -> u64 {
        self.existing.get(table).copied().unwrap_or(0)
    }

    pub fn total_created(&self) -> u64 {
        self.created.values().sum()
    }

    pub fn total_existing(&self) -> u64 {
        self.existing.values().sum()
    }

    fn merge(&mut self, other: SeedReport) {
        for (table, n) in other.created {
            *self.created.entry(table).or_default() += n;
        }
        for (table, n) in other.existing {
            *self.existing.entry(table).or_default() += n;
        }
    }
}

// ============================================================================
// Seed datasets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionTemplate {
    pub role: String,
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
}

impl PermissionTemplate {
    fn new(role: &str, name: &str, description: &str, permissions: &[&str]) -> Self {
        Self {
            role: role.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// System roles available to every company.
pub fn default_permission_templates() -> Vec<PermissionTemplate> {
    vec![
        PermissionTemplate::new(
            "super_admin",
            "Super Administrator",
            "Unrestricted access across all companies",
            &["*"],
        ),
        PermissionTemplate::new(
            "company_admin",
            "Company Administrator",
            "Manages a single company and its members",
            &[
                "company:read",
                "company:update",
                "users:manage",
                "roles:assign",
                "devices:manage",
                "content:manage",
                "content:moderate",
            ],
        ),
        PermissionTemplate::new(
            "moderator",
            "Content Moderator",
            "Reviews and moderates submitted content",
            &["content:read", "content:moderate", "users:read"],
        ),
        PermissionTemplate::new(
            "editor",
            "Editor",
            "Creates and edits content",
            &["content:read", "content:create", "content:update"],
        ),
        PermissionTemplate::new(
            "viewer",
            "Viewer",
            "Read-only access",
            &["content:read", "devices:read"],
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySeed {
    pub organization_code: String,
    pub name: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub subscription_tier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSeed {
    pub email: String,
    pub full_name: String,
    pub company_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignmentSeed {
    pub email: String,
    pub company_code: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSeed {
    pub serial_number: String,
    pub name: String,
    pub device_type: String,
    pub company_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSeed {
    pub title: String,
    pub body: String,
    pub company_code: String,
    pub author_email: String,
}

/// Everything [`SeedManager::seed`] inserts after the permission templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedDataset {
    #[serde(default)]
    pub companies: Vec<CompanySeed>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub roles: Vec<RoleAssignmentSeed>,
    #[serde(default)]
    pub devices: Vec<DeviceSeed>,
    #[serde(default)]
    pub content: Vec<ContentSeed>,
}

impl SeedDataset {
    /// The platform company and its administrator.
    pub fn baseline() -> Self {
        Self {
            companies: vec![CompanySeed {
                organization_code: "OMNI".to_string(),
                name: "OmniStore Platform".to_string(),
                industry: Some("Software".to_string()),
                subscription_tier: Some("enterprise".to_string()),
            }],
            users: vec![UserSeed {
                email: "admin@omnistore.local".to_string(),
                full_name: "Platform Administrator".to_string(),
                company_code: "OMNI".to_string(),
            }],
            roles: vec![RoleAssignmentSeed {
                email: "admin@omnistore.local".to_string(),
                company_code: "OMNI".to_string(),
                role: "super_admin".to_string(),
            }],
            devices: Vec::new(),
            content: Vec::new(),
        }
    }

    /// Baseline plus a demo tenant with devices and content.
    pub fn demo() -> Self {
        let mut dataset = Self::baseline();
        dataset.companies.push(CompanySeed {
            organization_code: "ACME".to_string(),
            name: "Acme Retail".to_string(),
            industry: Some("Retail".to_string()),
            subscription_tier: Some("standard".to_string()),
        });
        dataset.users.extend([
            UserSeed {
                email: "owner@acme.example".to_string(),
                full_name: "Avery Owner".to_string(),
                company_code: "ACME".to_string(),
            },
            UserSeed {
                email: "mod@acme.example".to_string(),
                full_name: "Morgan Moderator".to_string(),
                company_code: "ACME".to_string(),
            },
        ]);
        dataset.roles.extend([
            RoleAssignmentSeed {
                email: "owner@acme.example".to_string(),
                company_code: "ACME".to_string(),
                role: "company_admin".to_string(),
            },
            RoleAssignmentSeed {
                email: "mod@acme.example".to_string(),
                company_code: "ACME".to_string(),
                role: "moderator".to_string(),
            },
        ]);
        dataset.devices.extend([
            DeviceSeed {
                serial_number: "ACME-KIOSK-001".to_string(),
                name: "Front entrance kiosk".to_string(),
                device_type: "kiosk".to_string(),
                company_code: "ACME".to_string(),
            },
            DeviceSeed {
                serial_number: "ACME-CAM-001".to_string(),
                name: "Loading dock camera".to_string(),
                device_type: "camera".to_string(),
                company_code: "ACME".to_string(),
            },
        ]);
        dataset.content.push(ContentSeed {
            title: "Welcome to Acme".to_string(),
            body: "Store hours and contact details for new staff.".to_string(),
            company_code: "ACME".to_string(),
            author_email: "owner@acme.example".to_string(),
        });
        dataset
    }
}

// ============================================================================
// SeedManager
// ============================================================================

fn record_of(value: Value) -> Record {
    record::record_from_value(value).unwrap_or_default()
}

/// Turn a failed result into an error that keeps its kind.
fn result_error<T>(table: &str, result: &DatabaseResult<T>) -> DatabaseError {
    let message = result.error_message().to_string();
    match result.metadata.get("error_kind").and_then(Value::as_str) {
        Some("duplicate") => DatabaseError::duplicate(table, message),
        Some("not_found") => DatabaseError::not_found(table, message),
        _ => DatabaseError::validation(table, message),
    }
}

/// Idempotent bootstrap-data loader over any [`DataStore`].
pub struct SeedManager {
    store: Arc<dyn DataStore>,
    company_ids: HashMap<String, String>,
    user_ids: HashMap<String, String>,
}

impl SeedManager {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            company_ids: HashMap::new(),
            user_ids: HashMap::new(),
        }
    }

    /// Id of a company seeded (or found) by this manager.
    pub fn company_id(&self, organization_code: &str) -> Option<&str> {
        self.company_ids.get(organization_code).map(String::as_str)
    }

    /// Id of a user seeded (or found) by this manager.
    pub fn user_id(&self, email: &str) -> Option<&str> {
        self.user_ids.get(email).map(String::as_str)
    }

    /// Return the record matching `data` on `key_fields`, creating it from
    /// `data` when none exists. An existing record is returned unchanged.
    pub async fn ensure_record(
        &self,
        table: &str,
        key_fields: &[&str],
        data: Record,
    ) -> Result<SeedOutcome, DatabaseError> {
        let mut filters = Vec::with_capacity(key_fields.len());
        for field in key_fields {
            match data.get(*field) {
                Some(value) if !value.is_null() => filters.push(QueryFilter::eq(*field, value.clone())),
                _ => {
                    return Err(DatabaseError::validation(
                        table,
                        format!("seed record lacks natural key field '{field}'"),
                    ))
                }
            }
        }

        if let Some(existing) = self.find(table, &filters).await? {
            tracing::debug!("Seed {} {:?} already present", table, key_fields);
            return Ok(SeedOutcome::Existing(existing));
        }

        let created = self.store.create_record(table, data).await?;
        if created.success {
            if let Some(record) = created.data {
                return Ok(SeedOutcome::Created(record));
            }
        }

        // Someone else may have inserted the same key since the lookup.
        if created.metadata.get("error_kind").and_then(Value::as_str) == Some("duplicate") {
            if let Some(existing) = self.find(table, &filters).await? {
                return Ok(SeedOutcome::Existing(existing));
            }
        }
        Err(result_error(table, &created))
    }

    async fn find(&self, table: &str, filters: &[QueryFilter]) -> Result<Option<Record>, DatabaseError> {
        let found = self.store.find_one_record(table, filters).await?;
        if !found.success {
            return Err(result_error(table, &found));
        }
        Ok(found.data)
    }

    /// Insert the default permission templates that are missing.
    pub async fn seed_permission_templates(&mut self) -> Result<SeedReport, DatabaseError> {
        self.seed_templates(&default_permission_templates()).await
    }

    pub async fn seed_templates(
        &mut self,
        templates: &[PermissionTemplate],
    ) -> Result<SeedReport, DatabaseError> {
        let mut report = SeedReport::default();
        for template in templates {
            let data = record_of(json!({
                "role": template.role,
                "name": template.name,
                "description": template.description,
                "permissions": template.permissions,
                "is_system": true,
            }));
            let outcome = self.ensure_record(PERMISSION_TEMPLATES, &["role"], data).await?;
            report.record(PERMISSION_TEMPLATES, &outcome);
        }
        Ok(report)
    }

    /// Seed templates and then `dataset`, in dependency order.
    pub async fn seed(&mut self, dataset: &SeedDataset) -> Result<SeedReport, DatabaseError> {
        let mut report = self.seed_permission_templates().await?;
        report.merge(self.seed_dataset(dataset).await?);

        tracing::info!(
            "Seeding finished: {} created, {} already present",
            report.total_created(),
            report.total_existing()
        );
        Ok(report)
    }

    async fn seed_dataset(&mut self, dataset: &SeedDataset) -> Result<SeedReport, DatabaseError> {
        let mut report = SeedReport::default();

        for company in &dataset.companies {
            let mut data = record_of(json!({
                "organization_code": company.organization_code,
                "name": company.name,
            }));
            if let Some(industry) = &company.industry {
                data.insert("industry".to_string(), json!(industry));
            }
            if let Some(tier) = &company.subscription_tier {
                data.insert("subscription_tier".to_string(), json!(tier));
            }
            let outcome = self.ensure_record(COMPANIES, &["organization_code"], data).await?;
            if let Some(id) = outcome.id() {
                self.company_ids.insert(company.organization_code.clone(), id);
            }
            report.record(COMPANIES, &outcome);
        }

        for user in &dataset.users {
            let company_id = self.require_company(USERS, &user.company_code)?;
            let data = record_of(json!({
                "email": user.email,
                "full_name": user.full_name,
                "company_id": company_id,
            }));
            let outcome = self.ensure_record(USERS, &["email"], data).await?;
            if let Some(id) = outcome.id() {
                self.user_ids.insert(user.email.clone(), id);
            }
            report.record(USERS, &outcome);
        }

        for assignment in &dataset.roles {
            let company_id = self.require_company(USER_ROLES, &assignment.company_code)?;
            let user_id = self.require_user(USER_ROLES, &assignment.email)?;
            let data = record_of(json!({
                "user_id": user_id,
                "company_id": company_id,
                "role": assignment.role,
                "granted_by": "system",
            }));
            let outcome = self
                .ensure_record(USER_ROLES, &["user_id", "company_id", "role"], data)
                .await?;
            report.record(USER_ROLES, &outcome);
        }

        for device in &dataset.devices {
            let company_id = self.require_company(DEVICES, &device.company_code)?;
            let data = record_of(json!({
                "serial_number": device.serial_number,
                "name": device.name,
                "device_type": device.device_type,
                "company_id": company_id,
            }));
            let outcome = self.ensure_record(DEVICES, &["serial_number"], data).await?;
            report.record(DEVICES, &outcome);
        }

        for item in &dataset.content {
            let company_id = self.require_company(CONTENT_ITEMS, &item.company_code)?;
            let author_id = self.require_user(CONTENT_ITEMS, &item.author_email)?;
            let data = record_of(json!({
                "title": item.title,
                "body": item.body,
                "company_id": company_id,
                "author_id": author_id,
                "moderation_status": "approved",
            }));
            let outcome = self
                .ensure_record(CONTENT_ITEMS, &["company_id", "title"], data)
                .await?;
            report.record(CONTENT_ITEMS, &outcome);
        }

        Ok(report)
    }

    fn require_company(&self, table: &str, code: &str) -> Result<String, DatabaseError> {
        self.company_ids.get(code).cloned().ok_or_else(|| {
            DatabaseError::validation(table, format!("unknown company code '{code}'"))
        })
    }

    fn require_user(&self, table: &str, email: &str) -> Result<String, DatabaseError> {
        self.user_ids
            .get(email)
            .cloned()
            .ok_or_else(|| DatabaseError::validation(table, format!("unknown user '{email}'")))
    }
}
