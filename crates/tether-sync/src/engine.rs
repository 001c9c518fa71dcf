//! # Sync Engine
//!
//! Wires configuration, storage, the remote client and the services built on
//! them into one handle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             SyncEngine                                  │
//! │                                                                         │
//! │   SyncConfig ──► Database ──┬──► TokenRepository ──► AuthService ──┐    │
//! │                             │                                       │    │
//! │                             └──► RecordRepository ─┬────────────────┤    │
//! │                                                    │                ▼    │
//! │   HttpRemoteClient ─────────────────────────────────┼──► SyncOrchestrator│
//! │                                                    │                ▲    │
//! │   SyncRegistry (shared) ───────────────────────────┼────────────────┘    │
//! │                                                    ▼                     │
//! │                                              ReorderService              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::info;

use crate::analytics::{ReorderParams, ReorderService};
use crate::auth::AuthService;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{OrchestratorSettings, SyncOrchestrator, SyncOptions};
use crate::registry::SyncRegistry;
use crate::remote::{HttpRemoteClient, RemoteApi};
use tether_db::{Database, DbConfig, RecordStore};

/// Long-lived engine handle. One per process.
pub struct SyncEngine {
    config: SyncConfig,
    db: Database,
    auth: Arc<AuthService>,
    orchestrator: Arc<SyncOrchestrator>,
    reorder: ReorderService,
}

impl SyncEngine {
    /// Opens the configured database and builds every service on it.
    pub async fn connect(config: SyncConfig) -> SyncResult<Self> {
        let path = config.database_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::DatabaseError(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }
        let db = Database::new(DbConfig::new(path)).await?;
        let remote: Arc<dyn RemoteApi> = Arc::new(HttpRemoteClient::new(&config)?);
        Ok(Self::with_parts(config, db, remote))
    }

    /// Builds the engine over an existing database and remote.
    pub fn with_parts(config: SyncConfig, db: Database, remote: Arc<dyn RemoteApi>) -> Self {
        let auth = Arc::new(AuthService::from_config(db.tokens(), Arc::clone(&remote), &config));
        let store: Arc<dyn RecordStore> = Arc::new(db.records());

        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::clone(&auth),
            Arc::new(SyncRegistry::new()),
            remote,
            Arc::clone(&store),
            OrchestratorSettings::from(&config),
        ));

        info!(
            database = %config.database_path().display(),
            max_pages = config.sync.max_pages,
            "Sync engine ready"
        );

        SyncEngine {
            reorder: ReorderService::new(store),
            config,
            db,
            auth,
            orchestrator,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn reorder(&self) -> &ReorderService {
        &self.reorder
    }

    /// Options for a full sync with the configured default page size.
    pub fn default_options(&self) -> SyncOptions {
        SyncOptions {
            page_size: self.config.sync.default_page_size,
            ..SyncOptions::default()
        }
    }

    /// Reorder parameters from the `[analytics]` section.
    pub fn default_reorder_params(&self) -> ReorderParams {
        ReorderParams::from(&self.config.analytics)
    }
}
