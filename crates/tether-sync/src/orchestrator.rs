//! # Sync Orchestrator
//!
//! Runs one paginated sync of a mapped remote resource into the local store.
//!
//! ## Page Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  validate params ──► register owner ──► valid access token              │
//! │                                               │                         │
//! │        ┌──────────────────────────────────────┘                         │
//! │        ▼                                                                │
//! │  ┌─► fetch page N ──401──► refresh once ──► retry page N ──401──► fail  │
//! │  │     │                                                                │
//! │  │     ▼  for each record                                               │
//! │  │   transform ──► validate ──► upsert ──► children (same steps)        │
//! │  │     │   (rejections collected, never fatal)                          │
//! │  │     ▼                                                                │
//! │  │   page committed ──► stop requested? ──yes──► Stopped                │
//! │  │     │                                                                │
//! │  │     ├── no more pages / page limit ──► Completed                     │
//! │  └─────┘                                                                │
//! │                                                                         │
//! │  transport or storage failure ──► Failed (earlier pages stay written)  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Upserts are idempotent, so a failed run is recovered by re-running from
//! the report's `last_page + 1`.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::auth::AuthService;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::registry::{SyncHandle, SyncRegistry};
use crate::remote::{RemoteApi, RemoteError, RemotePage};
use tether_core::mapping::RemoteResource;
use tether_core::validation::{validate_owner_id, validate_page, validate_page_size};
use tether_core::{
    EntityMapping, OAuthToken, RecordError, StorageRecord, SyncCounts, SyncEnd, SyncReport, SyncRunSnapshot,
    DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE,
};
use tether_db::RecordStore;

/// Rejections kept verbatim in a report; later ones are only counted.
pub const MAX_REPORTED_ERRORS: usize = 1000;

const UNKNOWN_REMOTE_ID: &str = "<unknown>";

// =============================================================================
// Options & Settings
// =============================================================================

/// Per-call sync parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// First page to fetch (1-based).
    pub page: u32,
    pub page_size: u32,
    /// Pages to process at most. Capped by the engine-wide ceiling.
    pub max_pages: Option<u32>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: None,
        }
    }
}

/// Engine-wide limits.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub max_page_size: u32,
    pub max_pages: u32,
    pub request_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        OrchestratorSettings {
            max_page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&SyncConfig> for OrchestratorSettings {
    fn from(config: &SyncConfig) -> Self {
        OrchestratorSettings {
            max_page_size: config.sync.max_page_size,
            max_pages: config.sync.max_pages,
            request_timeout: config.request_timeout(),
        }
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives syncs for any number of owners; one at a time per owner.
pub struct SyncOrchestrator {
    auth: Arc<AuthService>,
    registry: Arc<SyncRegistry>,
    remote: Arc<dyn RemoteApi>,
    store: Arc<dyn RecordStore>,
    settings: OrchestratorSettings,
}

/// Mutable state of one run.
#[derive(Default)]
struct RunState {
    counts: SyncCounts,
    errors: Vec<RecordError>,
    pages_processed: u32,
    last_page: Option<u32>,
}

impl RunState {
    fn reject(&mut self, remote_id: impl Into<String>, message: impl Into<String>) {
        self.counts.errors += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(RecordError::new(remote_id, message));
        }
    }
}

impl SyncOrchestrator {
    pub fn new(
        auth: Arc<AuthService>,
        registry: Arc<SyncRegistry>,
        remote: Arc<dyn RemoteApi>,
        store: Arc<dyn RecordStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        SyncOrchestrator {
            auth,
            registry,
            remote,
            store,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    /// Asks the owner's running sync to stop after its current page.
    pub fn request_stop(&self, owner_id: &str) -> bool {
        self.registry.request_stop(owner_id)
    }

    pub fn sync_status(&self, owner_id: &str) -> Option<SyncRunSnapshot> {
        self.registry.get_sync_status(owner_id)
    }

    /// Syncs `mapping` for `owner_id`, starting at `options.page`.
    ///
    /// ## Returns
    /// - `Ok(report)` for every run that got past registration, including
    ///   stopped and failed ones (`report.success == false`)
    /// - `Err(InvalidParameters | InvalidMapping)` before any work
    /// - `Err(SyncAlreadyActive)` when the owner is already syncing
    pub async fn sync(&self, mapping: &EntityMapping, options: SyncOptions, owner_id: &str) -> SyncResult<SyncReport> {
        validate_owner_id(owner_id)?;
        validate_page(options.page)?;
        validate_page_size(options.page_size, self.settings.max_page_size)?;
        if options.max_pages == Some(0) {
            return Err(SyncError::InvalidParameters("max_pages must be positive".into()));
        }
        let resource = mapping.resource().ok_or_else(|| {
            SyncError::InvalidMapping(format!("mapping '{}' has no remote resource", mapping.table()))
        })?;

        let handle = self.registry.register_sync(owner_id)?;
        handle.set_table(mapping.table());

        let span = info_span!(
            "sync",
            owner_id,
            table = mapping.table(),
            run_id = %handle.run_id()
        );

        let report = self
            .run(mapping, resource, options, &handle)
            .instrument(span)
            .await;

        drop(handle);
        Ok(report)
    }

    async fn run(
        &self,
        mapping: &EntityMapping,
        resource: &RemoteResource,
        options: SyncOptions,
        handle: &SyncHandle,
    ) -> SyncReport {
        let owner_id = handle.owner_id();
        let limit = options
            .max_pages
            .map_or(self.settings.max_pages, |m| m.min(self.settings.max_pages));
        let mut state = RunState::default();

        info!(
            service = %resource.service,
            start_page = options.page,
            page_size = options.page_size,
            page_limit = limit,
            "Sync started"
        );

        let end = match self.auth.valid_access_token(resource.service, Some(owner_id)).await {
            Ok(mut token) => {
                self.page_loop(mapping, resource, options, limit, handle, &mut token, &mut state)
                    .await
            }
            Err(e) => {
                warn!(error = %e, "No usable access token");
                SyncEnd::Failed(e.to_string())
            }
        };

        handle.record_counts(&state.counts);
        let report = SyncReport::finish(
            mapping.table(),
            state.counts,
            state.errors,
            state.pages_processed,
            state.last_page,
            end,
        );

        if report.success {
            info!(summary = %report.summary, "Sync finished");
        } else {
            warn!(summary = %report.summary, "Sync aborted");
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn page_loop(
        &self,
        mapping: &EntityMapping,
        resource: &RemoteResource,
        options: SyncOptions,
        limit: u32,
        handle: &SyncHandle,
        token: &mut OAuthToken,
        state: &mut RunState,
    ) -> SyncEnd {
        let mut page = options.page;

        loop {
            if state.pages_processed >= limit {
                info!(page_limit = limit, "Page limit reached");
                return SyncEnd::Completed;
            }

            handle.record_page(page);
            if let Err(e) = self.auth.ensure_fresh(token).await {
                warn!(page, error = %e, "Token refresh before page failed");
                return SyncEnd::Failed(e.to_string());
            }
            let fetched = match self.fetch_page(resource, page, options.page_size, handle.owner_id(), token).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(page, error = %e, "Page fetch failed");
                    return SyncEnd::Failed(e.to_string());
                }
            };

            for raw in &fetched.records {
                if let Err(e) = self.sync_record(mapping, raw, state).await {
                    warn!(page, error = %e, "Storage failure mid-page");
                    return SyncEnd::Failed(e.to_string());
                }
            }

            state.pages_processed += 1;
            state.last_page = Some(page);
            handle.record_counts(&state.counts);
            debug!(
                page,
                records = fetched.records.len(),
                upserted = state.counts.upserted,
                "Page committed"
            );

            if self.registry.should_stop(handle) {
                info!(page, "Stopping on request");
                return SyncEnd::Stopped;
            }
            if !fetched.has_more {
                return SyncEnd::Completed;
            }
            page += 1;
        }
    }

    // =========================================================================
    // Remote
    // =========================================================================

    async fn list_with_deadline(
        &self,
        resource: &RemoteResource,
        page: u32,
        page_size: u32,
        token: &OAuthToken,
    ) -> Result<RemotePage, RemoteError> {
        tokio::time::timeout(
            self.settings.request_timeout,
            self.remote.list_page(resource, page, page_size, token),
        )
        .await
        .map_err(|_| RemoteError::Timeout(self.settings.request_timeout.as_secs()))?
    }

    /// Fetches a page, refreshing the token and retrying once on 401.
    async fn fetch_page(
        &self,
        resource: &RemoteResource,
        page: u32,
        page_size: u32,
        owner_id: &str,
        token: &mut OAuthToken,
    ) -> SyncResult<RemotePage> {
        let service = resource.service;

        match self.list_with_deadline(resource, page, page_size, token).await {
            Err(RemoteError::AuthenticationExpired) => {
                info!(page, "Access token rejected, refreshing once");
                *token = self.auth.refresh_access_token(service, Some(owner_id)).await?;

                match self.list_with_deadline(resource, page, page_size, token).await {
                    Err(RemoteError::AuthenticationExpired) => Err(SyncError::NotAuthorized { service }),
                    other => other.map_err(|e| e.into_sync_error(service)),
                }
            }
            other => other.map_err(|e| e.into_sync_error(service)),
        }
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Transforms, validates and stores one top-level record and its
    /// children.
    ///
    /// Only storage failures unrelated to the record itself are returned;
    /// everything else is collected on `state`.
    async fn sync_record(&self, mapping: &EntityMapping, raw: &Value, state: &mut RunState) -> SyncResult<()> {
        let remote_id = mapping.remote_id_of(raw);
        let label = remote_id.as_deref().unwrap_or(UNKNOWN_REMOTE_ID);

        let Some(stored) = self.store_one(mapping, raw, None, label, state).await? else {
            return Ok(());
        };

        for child in mapping.children() {
            let items = match raw.get(&child.field) {
                None | Some(Value::Null) => continue,
                Some(Value::Array(items)) => items,
                Some(_) => {
                    state.reject(label, format!("field '{}' is not an array", child.field));
                    continue;
                }
            };

            let keys = child.parent_record(&stored);
            for item in items {
                let child_label = format!(
                    "{}/{}",
                    label,
                    child.mapping.remote_id_of(item).as_deref().unwrap_or(UNKNOWN_REMOTE_ID)
                );
                self.store_one(&child.mapping, item, Some(&keys), &child_label, state)
                    .await?;
            }
        }

        Ok(())
    }

    async fn store_one(
        &self,
        mapping: &EntityMapping,
        raw: &Value,
        parent_keys: Option<&StorageRecord>,
        label: &str,
        state: &mut RunState,
    ) -> SyncResult<Option<StorageRecord>> {
        state.counts.seen += 1;

        let record = match mapping.transform_to_db_record(raw, parent_keys) {
            Ok(record) => record,
            Err(e) => {
                debug!(remote_id = label, error = %e, "Record rejected by transform");
                state.reject(label, e.to_string());
                return Ok(None);
            }
        };

        let validation = mapping.validate_record(&record);
        if !validation.valid {
            debug!(remote_id = label, missing = ?validation.missing_fields, "Record rejected by validation");
            state.reject(
                label,
                format!("missing required fields: {}", validation.missing_fields.join(", ")),
            );
            return Ok(None);
        }
        state.counts.transformed += 1;

        match self
            .store
            .upsert(mapping.table(), &record, mapping.conflict_column())
            .await
        {
            Ok(stored) => {
                state.counts.upserted += 1;
                Ok(Some(stored))
            }
            Err(e) if e.is_record_level() => {
                state.reject(label, e.to_string());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{grant, MockRemote};
    use serde_json::{json, Map};
    use std::sync::atomic::Ordering;
    use tether_core::{catalog, FieldRule, RemoteService, Transform};
    use tether_db::{Database, DbConfig, RecordQuery, RecordRepository};

    const OWNER: &str = "owner-1";

    struct Harness {
        orchestrator: Arc<SyncOrchestrator>,
        remote: Arc<MockRemote>,
        records: RecordRepository,
        db: Database,
    }

    async fn harness(remote: MockRemote) -> Harness {
        harness_with(remote, OrchestratorSettings::default()).await
    }

    async fn harness_with(remote: MockRemote, settings: OrchestratorSettings) -> Harness {
        let margin = chrono::Duration::seconds(tether_core::DEFAULT_REFRESH_MARGIN_SECS);
        harness_with_margin(remote, settings, margin).await
    }

    async fn harness_with_margin(
        remote: MockRemote,
        settings: OrchestratorSettings,
        refresh_margin: chrono::Duration,
    ) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(remote);
        let auth = Arc::new(AuthService::new(db.tokens(), remote.clone()).with_refresh_margin(refresh_margin));

        for service in RemoteService::ALL {
            let mut g = grant("access-0");
            g.refresh_token = Some("refresh-0".to_string());
            auth.store_authorization(service, Some(OWNER), g, Map::new())
                .await
                .unwrap();
        }

        let orchestrator = SyncOrchestrator::new(
            auth,
            Arc::new(SyncRegistry::new()),
            remote.clone(),
            Arc::new(db.records()),
            settings,
        );

        Harness {
            orchestrator: Arc::new(orchestrator),
            remote,
            records: db.records(),
            db,
        }
    }

    fn item(id: u32) -> Value {
        json!({
            "item_id": id.to_string(),
            "name": format!("Item {}", id),
            "sku": format!("SKU-{}", id),
            "rate": 10.5,
            "stock_on_hand": 3,
            "status": "active",
        })
    }

    fn items(n: u32) -> Vec<Value> {
        (1..=n).map(item).collect()
    }

    fn options(page_size: u32) -> SyncOptions {
        SyncOptions {
            page_size,
            ..SyncOptions::default()
        }
    }

    #[tokio::test]
    async fn test_full_sync_all_pages() {
        let h = harness(MockRemote::with_records(items(5))).await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap();

        assert!(report.success);
        assert!(report.is_complete());
        assert_eq!(report.synced_count, 5);
        assert_eq!(report.total_count, 5);
        assert_eq!(report.pages_processed, 3);
        assert_eq!(report.last_page, Some(3));
        assert_eq!(h.records.count("items").await.unwrap(), 5);
        assert!(!h.orchestrator.registry().is_active(OWNER));
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let h = harness(MockRemote::with_records(items(4))).await;
        let mapping = catalog::items().unwrap();

        h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap();
        let first = h.records.select("items", &RecordQuery::new().order_by("item_id", false)).await.unwrap();

        let report = h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap();
        let second = h.records.select("items", &RecordQuery::new().order_by("item_id", false)).await.unwrap();

        assert_eq!(report.synced_count, 4);
        assert_eq!(h.records.count("items").await.unwrap(), 4);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_invalid_records_collected_not_fatal() {
        let mut records = items(3);
        records[1] = json!({"item_id": "2", "sku": "no-name"});
        records.push(json!({"name": "no id"}));
        let h = harness(MockRemote::with_records(records)).await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(10), OWNER).await.unwrap();

        assert!(report.success);
        assert!(!report.is_complete());
        assert_eq!(report.total_count, 4);
        assert_eq!(report.synced_count, 2);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].remote_id, "2");
        assert!(report.errors[0].message.contains("name"));
        assert_eq!(report.errors[1].remote_id, UNKNOWN_REMOTE_ID);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_earlier_pages() {
        let remote = MockRemote::with_records(items(10));
        remote.fail_page(3, RemoteError::Transport("connection reset".into()));
        let h = harness(remote).await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.last_page, Some(2));
        assert_eq!(report.pages_processed, 2);
        assert_eq!(report.synced_count, 4);
        assert!(report.fatal_error.unwrap().contains("connection reset"));
        assert_eq!(h.records.count("items").await.unwrap(), 4);
        assert!(!h.orchestrator.registry().is_active(OWNER));
    }

    #[tokio::test]
    async fn test_resume_from_page() {
        let h = harness(MockRemote::with_records(items(6))).await;
        let mapping = catalog::items().unwrap();

        let report = h
            .orchestrator
            .sync(
                &mapping,
                SyncOptions {
                    page: 2,
                    page_size: 2,
                    max_pages: None,
                },
                OWNER,
            )
            .await
            .unwrap();

        assert_eq!(report.synced_count, 4);
        assert_eq!(report.last_page, Some(3));
        let first = h
            .records
            .get_single("items", &[tether_db::FieldFilter::eq("item_id", "1")])
            .await
            .unwrap();
        assert!(first.is_none());
    }

    #[tokio::test]
    async fn test_stop_honored_at_page_boundary() {
        let remote = MockRemote::with_records(items(10));
        let h = harness(remote).await;
        let registry = Arc::clone(h.orchestrator.registry());
        h.remote.on_page(move |page| {
            if page == 2 {
                registry.request_stop(OWNER);
            }
        });
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap();

        assert!(report.success);
        assert!(report.stopped);
        assert_eq!(report.last_page, Some(2));
        assert_eq!(report.synced_count, 4);
        assert!(report.summary.contains("stopped on request after page 2"));
        assert!(!h.orchestrator.registry().is_active(OWNER));
    }

    #[tokio::test]
    async fn test_concurrent_sync_same_owner_rejected() {
        let remote = MockRemote::with_records(items(4));
        remote.set_list_delay(std::time::Duration::from_millis(100));
        let h = harness(remote).await;
        let mapping = Arc::new(catalog::items().unwrap());

        let first = {
            let orchestrator = Arc::clone(&h.orchestrator);
            let mapping = Arc::clone(&mapping);
            tokio::spawn(async move { orchestrator.sync(&mapping, options(2), OWNER).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let status = h.orchestrator.sync_status(OWNER).unwrap();
        assert_eq!(status.table.as_deref(), Some("items"));

        let err = h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap_err();
        assert!(matches!(err, SyncError::SyncAlreadyActive(_)));

        assert!(first.await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_once_and_page_retried() {
        let remote = MockRemote::with_records(items(3));
        remote.reject_token("access-0");
        let h = harness(remote).await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(10), OWNER).await.unwrap();

        assert!(report.success);
        assert_eq!(report.synced_count, 3);
        assert_eq!(h.remote.refresh_calls.load(Ordering::SeqCst), 1);
        let tokens = h.remote.seen_tokens.lock().unwrap().clone();
        assert_eq!(tokens, vec!["access-0".to_string(), "refreshed-1".to_string()]);

        let stored = h.db.tokens().get(RemoteService::Inventory, Some(OWNER)).await.unwrap().unwrap();
        assert_eq!(stored.access_token, "refreshed-1");
    }

    #[tokio::test]
    async fn test_second_auth_failure_is_fatal() {
        let remote = MockRemote::with_records(items(3));
        remote.reject_token("access-0");
        remote.reject_token("refreshed-1");
        let h = harness(remote).await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(10), OWNER).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.synced_count, 0);
        assert_eq!(h.remote.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.remote.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_refreshed_when_margin_crossed_mid_run() {
        // Stored grants last 3600s. With this margin the token turns stale
        // 200ms in, while page 1 is still being served.
        let remote = MockRemote::with_records(items(3));
        remote.set_list_delay(std::time::Duration::from_millis(300));
        let mut long_lived = grant("access-1");
        long_lived.expires_in = 7200;
        remote.push_refresh(Ok(long_lived));
        let margin = chrono::Duration::seconds(3600) - chrono::Duration::milliseconds(200);
        let h = harness_with_margin(remote, OrchestratorSettings::default(), margin).await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(1), OWNER).await.unwrap();

        assert!(report.success);
        assert_eq!(report.synced_count, 3);
        assert_eq!(h.remote.refresh_calls.load(Ordering::SeqCst), 1);
        let tokens = h.remote.seen_tokens.lock().unwrap().clone();
        assert_eq!(tokens, vec!["access-0", "access-1", "access-1"]);
    }

    #[tokio::test]
    async fn test_page_ceiling() {
        let h = harness_with(
            MockRemote::with_records(items(20)),
            OrchestratorSettings {
                max_pages: 3,
                ..OrchestratorSettings::default()
            },
        )
        .await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap();
        assert!(report.success);
        assert_eq!(report.pages_processed, 3);
        assert_eq!(report.synced_count, 6);

        let capped = SyncOptions {
            max_pages: Some(1),
            ..options(2)
        };
        let report = h.orchestrator.sync(&mapping, capped, OWNER).await.unwrap();
        assert_eq!(report.pages_processed, 1);
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected_before_work() {
        let h = harness(MockRemote::with_records(items(2))).await;
        let mapping = catalog::items().unwrap();

        for bad in [
            SyncOptions { page: 0, ..options(2) },
            options(0),
            options(100_000),
            SyncOptions {
                max_pages: Some(0),
                ..options(2)
            },
        ] {
            let err = h.orchestrator.sync(&mapping, bad, OWNER).await.unwrap_err();
            assert!(matches!(err, SyncError::InvalidParameters(_)), "{:?}", bad);
        }

        let err = h.orchestrator.sync(&mapping, options(2), "").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidParameters(_)));
        assert_eq!(h.remote.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mapping_without_resource_rejected() {
        let h = harness(MockRemote::default()).await;
        let mapping = EntityMapping::builder("notes", "note_id")
            .field("note_id", FieldRule::new("note_id").with(Transform::Text))
            .build()
            .unwrap();

        let err = h.orchestrator.sync(&mapping, options(2), OWNER).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidMapping(_)));
    }

    #[tokio::test]
    async fn test_sales_orders_sync_line_items() {
        let orders = vec![json!({
            "salesorder_id": "SO-1",
            "salesorder_number": "SO-00001",
            "date": "2026-09-01",
            "customer_id": "C-9",
            "status": "confirmed",
            "total": 30.0,
            "line_items": [
                {"line_item_id": "L-1", "item_id": "1", "quantity": 2},
                {"line_item_id": "L-2", "item_id": "2", "quantity": "1.5"},
                {"line_item_id": "L-3", "quantity": 1},
            ],
        })];
        let h = harness(MockRemote::with_records(orders)).await;
        let mapping = catalog::sales_orders().unwrap();

        let report = h.orchestrator.sync(&mapping, options(10), OWNER).await.unwrap();

        assert!(report.success);
        assert_eq!(report.total_count, 4);
        assert_eq!(report.synced_count, 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].remote_id, "SO-1/L-3");

        let line = h
            .records
            .get_single(catalog::LINE_ITEMS_TABLE, &[tether_db::FieldFilter::eq("line_item_id", "L-2")])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line["salesorder_id"], json!("SO-1"));
        assert_eq!(line["date"], json!("2026-09-01"));
        assert_eq!(line["quantity"], json!(1.5));
    }

    #[tokio::test]
    async fn test_missing_token_fails_run() {
        let h = harness(MockRemote::with_records(items(2))).await;
        let mapping = catalog::items().unwrap();

        let report = h.orchestrator.sync(&mapping, options(2), "owner-without-grant").await.unwrap();

        assert!(!report.success);
        assert!(report.fatal_error.unwrap().contains("No refresh token"));
        assert_eq!(h.remote.list_calls.load(Ordering::SeqCst), 0);
    }
}
