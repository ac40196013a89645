//! Single-collection sync engine.

use crate::changes::{DeleteSet, ModifiedSet};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, MOBILE_BATCH_SIZE};
use crate::crypto::{Crypto, CryptoError, CryptoResult, KeyRecovery};
use crate::error::{SyncError, SyncResult};
use crate::reconciler::{
    CorruptRecord, ReconcileContext, Reconciler, Reconciliation, StandardReconciler,
};
use crate::resource::{fetch_meta_global, put_meta_global, CollectionResource};
use crate::state::EngineState;
use crate::store::Store;
use crate::tracker::Tracker;
use recsync_protocol::{
    CollectionQuery, CryptoRecord, DeleteFilter, EngineMeta, GetItems, GetResponse, Record,
    ServerTime, SortOrder,
};
use recsync_storage::Prefs;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Counts for one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Incoming records written to the store.
    pub applied: usize,
    /// Incoming records skipped by reconciliation.
    pub reconciled: usize,
    /// Incoming records that could not be decrypted.
    pub failed: usize,
    /// Outgoing records the server stored.
    pub uploaded: usize,
    /// Outgoing records the server rejected; retried next sync.
    pub upload_failed: usize,
    /// Remote records deleted at finish.
    pub deleted: usize,
}

/// The public life cycle every engine exposes.
///
/// A sync runs `startup → process_incoming → upload_outgoing → finish`;
/// `cleanup` runs afterwards whether or not a phase failed.
pub trait Engine {
    /// Engine and collection name.
    fn name(&self) -> &str;

    /// Returns whether [`Engine::sync`] does anything.
    fn enabled(&self) -> SyncResult<bool>;

    /// Negotiates versions with the server and snapshots pending local changes.
    fn startup(&mut self) -> SyncResult<()>;

    /// Downloads and reconciles records changed since the last sync.
    fn process_incoming(&mut self) -> SyncResult<()>;

    /// Uploads pending local changes.
    fn upload_outgoing(&mut self) -> SyncResult<()>;

    /// Flushes remote deletions.
    fn finish(&mut self) -> SyncResult<()>;

    /// Returns unconfirmed local changes to the tracker.
    fn cleanup(&mut self);

    /// Counts for the current or most recent run.
    fn outcome(&self) -> SyncOutcome;

    /// Runs one full sync.
    fn sync(&mut self) -> SyncResult<SyncOutcome> {
        drive(self)
    }

    /// Returns true if the newest remote record decrypts with current keys.
    fn can_decrypt(&self) -> bool;

    /// Drops local sync metadata so the next sync starts over.
    fn reset_client(&mut self) -> SyncResult<()>;

    /// Resets, then deletes all local records.
    fn wipe_client(&mut self) -> SyncResult<()>;

    /// Deletes the remote collection, then resets.
    fn wipe_server(&mut self) -> SyncResult<()>;
}

/// Runs the phases of `engine` in order, then cleanup.
pub(crate) fn drive<E: Engine + ?Sized>(engine: &mut E) -> SyncResult<SyncOutcome> {
    if !engine.enabled()? {
        debug!(engine = %engine.name(), "Engine disabled, skipping sync");
        return Ok(SyncOutcome::default());
    }
    let result = run_phases(engine);
    engine.cleanup();
    result?;
    Ok(engine.outcome())
}

fn run_phases<E: Engine + ?Sized>(engine: &mut E) -> SyncResult<()> {
    engine.startup()?;
    debug!(engine = %engine.name(), "process-incoming");
    engine.process_incoming()?;
    debug!(engine = %engine.name(), "upload-outgoing");
    engine.upload_outgoing()?;
    engine.finish()
}

/// Shared collaborators an engine is built from.
#[derive(Clone)]
pub struct Collaborators {
    /// Change tracker.
    pub tracker: Arc<dyn Tracker>,
    /// Payload encryption.
    pub crypto: Arc<dyn Crypto>,
    /// Remote storage.
    pub resource: Arc<dyn CollectionResource>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Bundles collaborators using the system clock.
    pub fn new(
        tracker: Arc<dyn Tracker>,
        crypto: Arc<dyn Crypto>,
        resource: Arc<dyn CollectionResource>,
    ) -> Self {
        Self {
            tracker,
            crypto,
            resource,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Syncs one collection between a local [`Store`] and the server.
pub struct SyncEngine {
    config: EngineConfig,
    state: EngineState,
    store: Arc<dyn Store>,
    parts: Collaborators,
    reconciler: Box<dyn Reconciler>,
    key_recovery: Option<Arc<dyn KeyRecovery>>,
    last_modified: Option<ServerTime>,
    modified: Option<ModifiedSet>,
    deletes: DeleteSet,
    outcome: SyncOutcome,
}

impl SyncEngine {
    /// Creates an engine using [`StandardReconciler`].
    pub fn new(
        config: EngineConfig,
        prefs: Prefs,
        store: Arc<dyn Store>,
        parts: Collaborators,
    ) -> Self {
        let state = EngineState::new(config.name.clone(), prefs);
        Self {
            config,
            state,
            store,
            parts,
            reconciler: Box::new(StandardReconciler),
            key_recovery: None,
            last_modified: None,
            modified: None,
            deletes: DeleteSet::new(),
            outcome: SyncOutcome::default(),
        }
    }

    /// Replaces the reconciliation strategy.
    pub fn with_reconciler(mut self, reconciler: Box<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Installs the hook called on integrity failures.
    pub fn with_key_recovery(mut self, recovery: Arc<dyn KeyRecovery>) -> Self {
        self.key_recovery = Some(recovery);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the persisted state.
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Returns the change tracker.
    pub fn tracker(&self) -> &Arc<dyn Tracker> {
        &self.parts.tracker
    }

    /// Returns the payload crypto.
    pub fn crypto(&self) -> &Arc<dyn Crypto> {
        &self.parts.crypto
    }

    /// Returns the remote storage.
    pub fn resource(&self) -> &Arc<dyn CollectionResource> {
        &self.parts.resource
    }

    /// Returns the clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.parts.clock
    }

    /// Returns the pending local changes of the sync in progress.
    pub fn modified(&self) -> Option<&ModifiedSet> {
        self.modified.as_ref()
    }

    /// Returns the remote deletions scheduled by the sync in progress.
    pub fn pending_deletes(&self) -> &DeleteSet {
        &self.deletes
    }

    /// Enables or disables the engine.
    pub fn set_enabled(&self, enabled: bool) -> SyncResult<()> {
        self.state.set_enabled(enabled)
    }

    /// Hints the collection's last server modification time.
    ///
    /// When the hint is not newer than `lastSync`, the next download is
    /// skipped. The hint is consumed by the next sync.
    pub fn set_last_modified(&mut self, last_modified: Option<ServerTime>) {
        self.last_modified = last_modified;
    }

    /// Returns the server-clock watermark.
    pub fn last_sync(&self) -> SyncResult<ServerTime> {
        self.state.last_sync()
    }

    fn batch_size(&self) -> SyncResult<Option<usize>> {
        if self.config.batch_size.is_some() {
            return Ok(self.config.batch_size);
        }
        let client_type = self.state.prefs().get_string("client.type", "desktop")?;
        Ok((client_type == "mobile").then_some(MOBILE_BATCH_SIZE))
    }

    fn maybe_yield(&self, count: usize) {
        let interval = self.config.yield_interval;
        if interval > 0 && count % interval == 0 {
            std::thread::yield_now();
        }
    }

    fn download(&self, query: &CollectionQuery) -> SyncResult<GetResponse> {
        let name = &self.config.name;
        self.parts
            .resource
            .get(name, query)
            .map_err(|e| e.into_download(name))
    }

    fn download_records(&self, query: &CollectionQuery) -> SyncResult<(ServerTime, Vec<Record>)> {
        let response = self.download(query)?;
        match response.items {
            GetItems::Full(records) => Ok((response.timestamp, records)),
            GetItems::Ids(_) => Err(SyncError::transport_fatal("expected full records")
                .into_download(&self.config.name)),
        }
    }

    fn decrypt(&self, record: &Record) -> CryptoResult<CryptoRecord> {
        match self.parts.crypto.decrypt(record) {
            Err(CryptoError::IntegrityMismatch { .. })
                if self
                    .key_recovery
                    .as_ref()
                    .is_some_and(|r| r.recover_keys(&record.collection)) =>
            {
                info!(id = %record.id, "Trying decrypt again...");
                self.parts.crypto.decrypt(record)
            }
            other => other,
        }
    }

    fn apply_records(
        &mut self,
        server_now: ServerTime,
        records: Vec<Record>,
        handled: &mut Vec<String>,
        max_modified: &mut Option<ServerTime>,
    ) -> SyncResult<()> {
        for (index, mut wire) in records.into_iter().enumerate() {
            if max_modified.map_or(true, |m| wire.modified > m) {
                *max_modified = Some(wire.modified);
            }
            wire.collection = self.config.name.clone();
            handled.push(wire.id.clone());

            let decrypted = self.decrypt(&wire);
            self.apply_one(server_now, &wire.id, decrypted)?;
            self.maybe_yield(index + 1);
        }
        Ok(())
    }

    fn apply_one(
        &mut self,
        server_now: ServerTime,
        id: &str,
        decrypted: CryptoResult<CryptoRecord>,
    ) -> SyncResult<()> {
        let wall_now = self.parts.clock.now();
        let SyncEngine {
            config,
            store,
            parts,
            reconciler,
            modified,
            deletes,
            outcome,
            ..
        } = self;
        let mut ctx = ReconcileContext {
            collection: &config.name,
            store: &**store,
            tracker: &*parts.tracker,
            modified: modified.get_or_insert_with(ModifiedSet::new),
            deletes,
            server_now,
            wall_now,
        };

        let mut record = match decrypted {
            Ok(record) => record,
            Err(CryptoError::IntegrityMismatch { .. }) => {
                warn!(engine = %config.name, id, "Integrity check failed for incoming record");
                if reconciler.on_integrity_failure(&mut ctx, id)? == CorruptRecord::Failed {
                    outcome.failed += 1;
                }
                return Ok(());
            }
            Err(e) => {
                warn!(engine = %config.name, id, error = %e, "Error processing record");
                outcome.failed += 1;
                return Ok(());
            }
        };
        trace!(engine = %config.name, id, "Incoming record");

        match reconciler.reconcile(&mut ctx, &mut record)? {
            Reconciliation::Apply => {
                parts.tracker.set_ignore_all(true);
                let applied = store.apply_incoming(&record);
                parts.tracker.set_ignore_all(false);
                match applied {
                    Ok(()) => outcome.applied += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(engine = %config.name, id = %record.id, error = %e, "Could not apply incoming record");
                        if reconciler.on_malformed_record(&mut ctx, &record.id)? == CorruptRecord::Failed {
                            outcome.failed += 1;
                        }
                    }
                }
            }
            Reconciliation::Skip => {
                trace!(engine = %config.name, id, "Skipping reconciled incoming item");
                outcome.reconciled += 1;
            }
        }
        Ok(())
    }

    fn create_outgoing(&self, id: &str) -> SyncResult<Record> {
        let name = &self.config.name;
        let mut record = self.store.create_record(id, name)?;
        record.id = id.to_string();
        record.collection = name.clone();
        trace!(engine = %name, id, "Outgoing record");
        Ok(self.parts.crypto.encrypt(&record)?)
    }

    fn post_batch(&mut self, batch: &mut Vec<Record>, total: usize) -> SyncResult<()> {
        let name = self.config.name.clone();
        info!(engine = %name, batch = batch.len(), total, "Uploading records");
        let response = self
            .parts
            .resource
            .post(&name, batch)
            .map_err(|e| {
                debug!(engine = %name, error = %e, "Uploading records failed");
                e.into_upload(&name)
            })?;
        batch.clear();

        if response.timestamp > self.state.last_sync()? {
            self.state.set_last_sync(response.timestamp)?;
        }

        let failed = &response.result.failed;
        if !failed.is_empty() {
            let ids: Vec<&str> = failed.keys().map(String::as_str).collect();
            debug!(
                engine = %name,
                ids = %ids.join(", "),
                "Records that will be uploaded again because the server couldn't store them"
            );
            self.outcome.upload_failed += failed.len();
        }

        let modified = self.modified.get_or_insert_with(ModifiedSet::new);
        for id in &response.result.success {
            modified.remove(id);
        }
        self.outcome.uploaded += response.result.success.len();
        Ok(())
    }
}

impl Engine for SyncEngine {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn enabled(&self) -> SyncResult<bool> {
        self.state.enabled()
    }

    fn startup(&mut self) -> SyncResult<()> {
        self.outcome = SyncOutcome::default();
        let name = self.config.name.clone();
        let version = self.config.version;

        let mut meta = fetch_meta_global(self.parts.resource.as_ref())?;
        let remote = meta.engine(&name);

        if remote.version < version {
            debug!(engine = %name, remote = remote.version, local = version, "Old engine data");
            let sync_id = self.state.regenerate_sync_id()?;
            self.wipe_server()?;
            meta.set_engine(name.clone(), EngineMeta { version, sync_id });
            put_meta_global(self.parts.resource.as_ref(), &meta)?;
        } else if remote.version > version {
            return Err(SyncError::ServerAhead {
                collection: name,
                local: version,
                remote: remote.version,
            });
        } else {
            let local_sync_id = self.state.sync_id()?;
            if remote.sync_id != local_sync_id {
                debug!(engine = %name, remote = %remote.sync_id, local = %local_sync_id, "Engine syncIDs differ");
                self.state.set_sync_id(&remote.sync_id)?;
                self.reset_client()?;
            }
        }

        self.state.set_last_sync_local(self.parts.clock.now_millis())?;
        let modified: ModifiedSet = if self.state.last_sync()? > 0.0 {
            self.parts.tracker.changed_ids()
        } else {
            debug!(engine = %name, "First sync, uploading all items");
            self.store
                .all_ids()?
                .into_iter()
                .map(|id| (id, 0.0))
                .collect()
        };
        self.parts.tracker.clear_changed_ids();

        info!(engine = %name, count = modified.len(), "Outgoing items pre-reconciliation");
        self.modified = Some(modified);
        self.deletes = DeleteSet::new();
        Ok(())
    }

    fn process_incoming(&mut self) -> SyncResult<()> {
        let name = self.config.name.clone();
        trace!(engine = %name, "Downloading & applying server changes");

        let last_sync = self.state.last_sync()?;
        let batch_size = self.batch_size()?;
        let mut handled: Vec<String> = Vec::new();
        let hint = self.last_modified.take();
        let mut max_modified = hint;

        if hint.map_or(true, |m| m > last_sync) {
            let mut query = CollectionQuery::full().newer(last_sync);
            if let Some(limit) = batch_size {
                query = query.limit(limit);
            }
            let (server_now, records) = self.download_records(&query)?;
            self.apply_records(server_now, records, &mut handled, &mut max_modified)?;
        }

        if let Some(limit) = batch_size.filter(|limit| handled.len() == *limit) {
            let mut ids_query = CollectionQuery::ids_only()
                .newer(last_sync)
                .sort(SortOrder::Index);
            if let Some(download_limit) = self.config.download_limit {
                ids_query = ids_query.limit(download_limit);
            }
            let response = self.download(&ids_query)?;
            let seen: HashSet<&String> = handled.iter().collect();
            let to_fetch: Vec<String> = match response.items {
                GetItems::Ids(ids) => ids.into_iter().filter(|id| !seen.contains(id)).collect(),
                GetItems::Full(records) => records
                    .into_iter()
                    .map(|r| r.id)
                    .filter(|id| !seen.contains(id))
                    .collect(),
            };
            debug!(engine = %name, count = to_fetch.len(), "Fetching backlog of ids");

            for chunk in to_fetch.chunks(limit) {
                let query = CollectionQuery::full().with_ids(chunk.to_vec());
                let (server_now, records) = self.download_records(&query)?;
                self.apply_records(server_now, records, &mut handled, &mut max_modified)?;
            }
        }

        if let Some(max_modified) = max_modified {
            if max_modified > last_sync {
                self.state.set_last_sync(max_modified)?;
            }
        }

        let SyncOutcome {
            applied,
            reconciled,
            failed,
            ..
        } = self.outcome;
        info!(engine = %name, applied, reconciled, failed, "Records: {} applied, {} reconciled", applied, reconciled);
        Ok(())
    }

    fn upload_outgoing(&mut self) -> SyncResult<()> {
        let ids: Vec<String> = match &self.modified {
            Some(modified) if !modified.is_empty() => modified.keys().cloned().collect(),
            _ => return Ok(()),
        };
        let name = self.config.name.clone();
        let chunk = self.config.max_upload_records;
        trace!(engine = %name, count = ids.len(), "Preparing outgoing records");

        let mut batch: Vec<Record> = Vec::with_capacity(chunk.min(ids.len()));
        for (index, id) in ids.iter().enumerate() {
            match self.create_outgoing(id) {
                Ok(record) => batch.push(record),
                Err(e) => warn!(engine = %name, id = %id, error = %e, "Error creating record"),
            }
            let count = index + 1;
            if count % chunk == 0 && !batch.is_empty() {
                self.post_batch(&mut batch, ids.len())?;
            }
            self.maybe_yield(count);
        }
        if !batch.is_empty() {
            self.post_batch(&mut batch, ids.len())?;
        }
        Ok(())
    }

    fn finish(&mut self) -> SyncResult<()> {
        let name = self.config.name.clone();
        trace!(engine = %name, "Finishing up sync");
        self.parts.tracker.reset_score();

        for filter in self.deletes.take_filters(self.config.delete_chunk_size) {
            debug!(engine = %name, ?filter, "Deleting remote records");
            self.parts
                .resource
                .delete(&name, &filter)
                .map_err(|e| e.into_upload(&name))?;
            if let DeleteFilter::Ids(ids) = &filter {
                self.outcome.deleted += ids.len();
            }
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        self.deletes = DeleteSet::new();
        let Some(modified) = self.modified.take() else {
            return;
        };
        if !modified.is_empty() {
            debug!(engine = %self.config.name, count = modified.len(), "Re-queuing unconfirmed changes");
        }
        for (id, when) in modified {
            self.parts.tracker.add_changed_id(&id, when);
        }
    }

    fn outcome(&self) -> SyncOutcome {
        self.outcome
    }

    fn can_decrypt(&self) -> bool {
        let query = CollectionQuery::full().limit(1).sort(SortOrder::Newest);
        trace!(engine = %self.config.name, "Trying to decrypt a record from the server");
        match self.download_records(&query) {
            Ok((_, records)) => records.into_iter().next().is_some_and(|mut record| {
                record.collection = self.config.name.clone();
                match self.parts.crypto.decrypt(&record) {
                    Ok(_) => true,
                    Err(e) => {
                        debug!(engine = %self.config.name, error = %e, "Failed test decrypt");
                        false
                    }
                }
            }),
            Err(e) => {
                debug!(engine = %self.config.name, error = %e, "Failed test decrypt");
                false
            }
        }
    }

    fn reset_client(&mut self) -> SyncResult<()> {
        self.state.reset_last_sync()?;
        self.store.reset()
    }

    fn wipe_client(&mut self) -> SyncResult<()> {
        self.reset_client()?;
        debug!(engine = %self.config.name, "Deleting all local data");
        self.parts.tracker.set_ignore_all(true);
        let wiped = self.store.wipe();
        self.parts.tracker.set_ignore_all(false);
        wiped?;
        self.parts.tracker.clear_changed_ids();
        Ok(())
    }

    fn wipe_server(&mut self) -> SyncResult<()> {
        self.parts.resource.wipe(&self.config.name)?;
        self.reset_client()
    }
}
