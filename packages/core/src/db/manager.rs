//! Store factory and lifecycle manager
//!
//! [`create_store`] turns a [`ProviderConfig`] into the matching
//! [`DataStore`]. [`DatabaseManager`] owns the one active store of an
//! application and tracks its lifecycle:
//!
//! ```text
//! Uninitialized --initialize--> Initializing --ok--> Ready --close--> Closed
//!                                    |                               |
//!                                    +--error--> Uninitialized <-----+ (re-initialize)
//! ```
//!
//! Re-initializing a ready manager closes the previous store first. The
//! manager is an ordinary value; share it with `Arc<DatabaseManager>`.

use crate::db::config::{ProviderConfig, ProviderKind};
use crate::db::document::DocumentStore;
use crate::db::error::DatabaseError;
use crate::db::relational::RelationalStore;
use crate::db::rest::RestStore;
use crate::db::store::{DataStore, HealthStatus};
use crate::models::SchemaRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Lifecycle state of a [`DatabaseManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Build the store for `config`, after validating it. The store is not
/// connected yet; call [`DataStore::initialize`].
pub fn create_store(
    config: &ProviderConfig,
    registry: Arc<SchemaRegistry>,
) -> Result<Arc<dyn DataStore>, DatabaseError> {
    config.validate()?;
    let store: Arc<dyn DataStore> = match config {
        ProviderConfig::Document(c) => Arc::new(DocumentStore::new(c.clone(), registry)),
        ProviderConfig::Relational(c) => Arc::new(RelationalStore::new(c.clone(), registry)),
        ProviderConfig::Rest(c) => Arc::new(RestStore::new(c.clone(), registry)),
    };
    Ok(store)
}

struct Active {
    state: ManagerState,
    store: Option<Arc<dyn DataStore>>,
}

/// Owner of the application's active store.
pub struct DatabaseManager {
    registry: Arc<SchemaRegistry>,
    active: RwLock<Active>,
    init_lock: Mutex<()>,
}

impl DatabaseManager {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            active: RwLock::new(Active {
                state: ManagerState::Uninitialized,
                store: None,
            }),
            init_lock: Mutex::new(()),
        }
    }

    /// Manager over the built-in multi-tenant schemas.
    pub fn with_core_schemas() -> Self {
        Self::new(Arc::new(SchemaRegistry::core()))
    }

    pub fn registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn state(&self) -> ManagerState {
        self.active.read().await.state
    }

    /// Provider of the active store, if any.
    pub async fn provider(&self) -> Option<ProviderKind> {
        self.active
            .read()
            .await
            .store
            .as_ref()
            .map(|store| store.provider())
    }

    /// Create and connect the store described by `config`.
    pub async fn initialize(&self, config: ProviderConfig) -> Result<Arc<dyn DataStore>, DatabaseError> {
        let _guard = self.init_lock.lock().await;
        self.begin_initializing().await;

        let store = match create_store(&config, self.registry()) {
            Ok(store) => store,
            Err(e) => {
                self.fail_initializing(&e).await;
                return Err(e);
            }
        };
        self.connect(store).await
    }

    /// Initialize from a connection string; the provider is inferred from
    /// its scheme.
    pub async fn initialize_from_url(
        &self,
        url: &str,
        service_key: Option<String>,
    ) -> Result<Arc<dyn DataStore>, DatabaseError> {
        let config = ProviderConfig::from_url(url, service_key)?;
        self.initialize(config).await
    }

    /// Initialize from `DATABASE_*` / `SUPABASE_*` environment variables.
    pub async fn initialize_from_env(&self) -> Result<Arc<dyn DataStore>, DatabaseError> {
        let config = ProviderConfig::from_env()?;
        self.initialize(config).await
    }

    /// Adopt an already constructed store and connect it.
    pub async fn initialize_with(
        &self,
        store: Arc<dyn DataStore>,
    ) -> Result<Arc<dyn DataStore>, DatabaseError> {
        let _guard = self.init_lock.lock().await;
        self.begin_initializing().await;
        self.connect(store).await
    }

    /// The active store; fails unless the manager is ready.
    pub async fn store(&self) -> Result<Arc<dyn DataStore>, DatabaseError> {
        let active = self.active.read().await;
        match (&active.state, &active.store) {
            (ManagerState::Ready, Some(store)) => Ok(Arc::clone(store)),
            (state, _) => Err(DatabaseError::connection(
                "manager",
                format!("database manager is not ready (state {state:?})"),
            )),
        }
    }

    pub async fn health_check(&self) -> Result<HealthStatus, DatabaseError> {
        let store = self.store().await?;
        Ok(store.health_check().await)
    }

    /// Close the active store. Closing an idle manager is a no-op.
    pub async fn close(&self) -> Result<(), DatabaseError> {
        let _guard = self.init_lock.lock().await;
        let store = {
            let mut active = self.active.write().await;
            if active.state == ManagerState::Uninitialized {
                return Ok(());
            }
            active.state = ManagerState::Closed;
            active.store.take()
        };
        if let Some(store) = store {
            store.close().await?;
            tracing::info!("Database manager closed {} store", store.provider());
        }
        Ok(())
    }

    async fn begin_initializing(&self) {
        let previous = {
            let mut active = self.active.write().await;
            active.state = ManagerState::Initializing;
            active.store.take()
        };
        if let Some(previous) = previous {
            tracing::info!("Closing previous {} store before re-initializing", previous.provider());
            if let Err(e) = previous.close().await {
                tracing::warn!("Closing previous store failed: {}", e);
            }
        }
    }

    async fn fail_initializing(&self, error: &DatabaseError) {
        tracing::warn!("Database initialization failed: {}", error);
        let mut active = self.active.write().await;
        active.state = ManagerState::Uninitialized;
        active.store = None;
    }

    async fn connect(&self, store: Arc<dyn DataStore>) -> Result<Arc<dyn DataStore>, DatabaseError> {
        let connected = match store.initialize().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DatabaseError::connection(
                store.provider().as_str(),
                "store reported an unsuccessful initialization",
            )),
            Err(e) => Err(e),
        };
        if let Err(e) = connected {
            self.fail_initializing(&e).await;
            return Err(e);
        }

        let mut active = self.active.write().await;
        active.state = ManagerState::Ready;
        active.store = Some(Arc::clone(&store));
        tracing::info!("Database manager ready ({} provider)", store.provider());
        Ok(store)
    }
}
