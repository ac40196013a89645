//! Reconciliation strategies for incoming records.

use crate::changes::{DeleteSet, ModifiedSet};
use crate::error::SyncResult;
use crate::store::Store;
use crate::tracker::Tracker;
use recsync_protocol::{CryptoRecord, ServerTime};
use tracing::{debug, trace};

/// What to do with an incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Write the record to the local store.
    Apply,
    /// Leave the local store untouched.
    Skip,
}

/// How a record that failed integrity verification was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptRecord {
    /// Counted as a failed record.
    Failed,
    /// Scheduled for removal and not counted.
    Dropped,
}

/// Engine state a reconciler may read and adjust for one incoming record.
pub struct ReconcileContext<'a> {
    /// Collection name.
    pub collection: &'a str,
    /// Local store.
    pub store: &'a dyn Store,
    /// Change tracker.
    pub tracker: &'a dyn Tracker,
    /// Pending local changes.
    pub modified: &'a mut ModifiedSet,
    /// Pending remote deletions.
    pub deletes: &'a mut DeleteSet,
    /// Server time of the response carrying the record.
    pub server_now: ServerTime,
    /// Local wall-clock time, in seconds.
    pub wall_now: f64,
}

impl ReconcileContext<'_> {
    /// Returns true if the local form of `record.id` has the same cleartext.
    pub fn is_equal(&self, record: &CryptoRecord) -> SyncResult<bool> {
        let local = self.store.create_record(&record.id, self.collection)?;
        let equal = local.cleartext == record.cleartext;
        trace!(id = %record.id, equal, "Compared with local record");
        Ok(equal)
    }

    /// Schedules `id` for remote deletion and forgets local changes to it.
    pub fn delete_id(&mut self, id: &str) {
        self.tracker.remove_changed_id(id);
        self.modified.remove(id);
        self.deletes.delete_id(id);
    }
}

/// Decides whether incoming records are applied.
pub trait Reconciler: Send + Sync {
    /// Decides the fate of `record`. May rename it while resolving duplicates.
    fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        record: &mut CryptoRecord,
    ) -> SyncResult<Reconciliation>;

    /// Handles a record whose integrity check still fails after key recovery.
    ///
    /// By default, a record that exists locally is queued for upload so the
    /// good local copy replaces the corrupt remote one.
    fn on_integrity_failure(
        &self,
        ctx: &mut ReconcileContext<'_>,
        id: &str,
    ) -> SyncResult<CorruptRecord> {
        if ctx.store.item_exists(id)? {
            debug!(id, "Scheduling local copy to replace corrupt record");
            ctx.modified.entry(id.to_string()).or_insert(0.0);
        }
        Ok(CorruptRecord::Failed)
    }

    /// Handles a decrypted record the store could not apply.
    fn on_malformed_record(
        &self,
        _ctx: &mut ReconcileContext<'_>,
        _id: &str,
    ) -> SyncResult<CorruptRecord> {
        Ok(CorruptRecord::Failed)
    }
}

/// Returns true if an incoming record should overwrite a pending local edit.
///
/// Ages are measured on each side's own clock: the record's age against the
/// server time, the edit's age against local time. The younger side wins;
/// ties keep the local edit.
pub fn remote_wins(
    record_modified: ServerTime,
    server_now: ServerTime,
    local_changed: f64,
    wall_now: f64,
) -> bool {
    let record_age = server_now - record_modified;
    let local_age = wall_now - local_changed;
    trace!(record_age, local_age, "Record age vs local age");
    record_age < local_age
}

/// Returns true if the local duplicate id should replace the incoming id.
///
/// Shorter ids win; equal lengths fall back to byte order. The rule only
/// needs to be the same on every client.
pub fn prefer_local_dupe_id(local_id: &str, incoming_id: &str) -> bool {
    local_id.len() < incoming_id.len()
        || (local_id.len() == incoming_id.len() && local_id < incoming_id)
}

/// Conflict-aware reconciliation for content-versioned collections.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardReconciler;

impl StandardReconciler {
    /// Folds a local duplicate into one id.
    ///
    /// A pending local edit moves with the surviving id and still competes
    /// with the incoming record on age.
    fn handle_dupe(
        ctx: &mut ReconcileContext<'_>,
        record: &mut CryptoRecord,
        dupe_id: String,
    ) -> SyncResult<Reconciliation> {
        let pending = ctx.modified.get(&dupe_id).copied();
        if prefer_local_dupe_id(&dupe_id, &record.id) {
            trace!(local = %dupe_id, incoming = %record.id, "Preferring local id");
            let incoming_id = std::mem::replace(&mut record.id, dupe_id.clone());
            ctx.delete_id(&incoming_id);
            ctx.modified.entry(dupe_id).or_insert(0.0);
        } else {
            trace!(local = %dupe_id, incoming = %record.id, "Switching local id to incoming");
            ctx.store.change_item_id(&dupe_id, &record.id)?;
            ctx.delete_id(&dupe_id);
            if let Some(local_changed) = pending {
                ctx.modified.insert(record.id.clone(), local_changed);
            }
        }

        match pending {
            Some(local_changed)
                if !remote_wins(record.modified, ctx.server_now, local_changed, ctx.wall_now) =>
            {
                Ok(Reconciliation::Skip)
            }
            _ => Ok(Reconciliation::Apply),
        }
    }
}

impl Reconciler for StandardReconciler {
    fn reconcile(
        &self,
        ctx: &mut ReconcileContext<'_>,
        record: &mut CryptoRecord,
    ) -> SyncResult<Reconciliation> {
        trace!(id = %record.id, "Reconcile step 1: Check for conflicts");
        if let Some(&local_changed) = ctx.modified.get(&record.id) {
            if ctx.is_equal(record)? {
                ctx.modified.remove(&record.id);
                return Ok(Reconciliation::Skip);
            }
            let apply = remote_wins(record.modified, ctx.server_now, local_changed, ctx.wall_now);
            return Ok(if apply {
                Reconciliation::Apply
            } else {
                Reconciliation::Skip
            });
        }

        trace!(id = %record.id, "Reconcile step 2: Check for updates");
        if ctx.store.item_exists(&record.id)? {
            return Ok(if ctx.is_equal(record)? {
                Reconciliation::Skip
            } else {
                Reconciliation::Apply
            });
        }

        if record.is_deleted() {
            return Ok(Reconciliation::Apply);
        }

        trace!(id = %record.id, "Reconcile step 3: Find dupes");
        match ctx.store.find_dupe(record)? {
            Some(dupe_id) => Self::handle_dupe(ctx, record, dupe_id),
            None => Ok(Reconciliation::Apply),
        }
    }
}

/// Applies every incoming record and deletes corrupt ones from the server.
///
/// Used for registries keyed by device rather than versioned by content.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysApply;

impl Reconciler for AlwaysApply {
    fn reconcile(
        &self,
        _ctx: &mut ReconcileContext<'_>,
        _record: &mut CryptoRecord,
    ) -> SyncResult<Reconciliation> {
        Ok(Reconciliation::Apply)
    }

    fn on_integrity_failure(
        &self,
        ctx: &mut ReconcileContext<'_>,
        id: &str,
    ) -> SyncResult<CorruptRecord> {
        debug!(id, "Bad record detected. Scheduling for deletion.");
        ctx.delete_id(id);
        Ok(CorruptRecord::Dropped)
    }
    fn on_malformed_record(
        &self,
        ctx: &mut ReconcileContext<'_>,
        id: &str,
    ) -> SyncResult<CorruptRecord> {
        self.on_integrity_failure(ctx, id)
    }
}
