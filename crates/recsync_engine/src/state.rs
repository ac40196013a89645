//! Durable per-collection engine state.

use crate::error::SyncResult;
use recsync_protocol::ServerTime;
use recsync_storage::Prefs;
use tracing::debug;
use uuid::Uuid;

/// Generates a fresh random identifier for sync IDs and record ids.
pub fn make_guid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Persisted state of one engine, stored as `<name>.*` preferences.
///
/// `lastSync` is kept string-encoded so fractional server time survives
/// backends that only store integers.
#[derive(Clone)]
pub struct EngineState {
    name: String,
    prefs: Prefs,
}

impl EngineState {
    /// Creates a view over the preferences of the named engine.
    pub fn new(name: impl Into<String>, prefs: Prefs) -> Self {
        Self {
            name: name.into(),
            prefs,
        }
    }

    /// Returns the engine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying preferences.
    pub fn prefs(&self) -> &Prefs {
        &self.prefs
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}.{}", self.name, suffix)
    }

    /// Returns the local generation marker, generating one if unset.
    pub fn sync_id(&self) -> SyncResult<String> {
        let sync_id = self.prefs.get_string(&self.key("syncID"), "")?;
        if !sync_id.is_empty() {
            return Ok(sync_id);
        }
        let sync_id = make_guid();
        self.set_sync_id(&sync_id)?;
        Ok(sync_id)
    }

    /// Stores the local generation marker.
    pub fn set_sync_id(&self, sync_id: &str) -> SyncResult<()> {
        Ok(self.prefs.set_string(&self.key("syncID"), sync_id)?)
    }

    /// Replaces the generation marker with a fresh one and returns it.
    pub fn regenerate_sync_id(&self) -> SyncResult<String> {
        let sync_id = make_guid();
        self.set_sync_id(&sync_id)?;
        Ok(sync_id)
    }

    /// Returns the server-clock watermark. Unset reads as 0.
    pub fn last_sync(&self) -> SyncResult<ServerTime> {
        Ok(self.prefs.get_f64(&self.key("lastSync"), 0.0)?)
    }

    /// Stores the server-clock watermark.
    pub fn set_last_sync(&self, value: ServerTime) -> SyncResult<()> {
        let key = self.key("lastSync");
        // Older writers may have stored a number; replace the entry outright.
        self.prefs.reset(&key)?;
        Ok(self.prefs.set_string(&key, value.to_string())?)
    }

    /// Returns the local wall-clock snapshot of the last sync, in milliseconds.
    pub fn last_sync_local(&self) -> SyncResult<i64> {
        Ok(self.prefs.get_i64(&self.key("lastSyncLocal"), 0)?)
    }

    /// Stores the local wall-clock snapshot, in milliseconds.
    pub fn set_last_sync_local(&self, value: i64) -> SyncResult<()> {
        Ok(self
            .prefs
            .set_string(&self.key("lastSyncLocal"), value.to_string())?)
    }

    /// Clears both watermarks.
    pub fn reset_last_sync(&self) -> SyncResult<()> {
        debug!(engine = %self.name, "Resetting last sync time");
        self.prefs.reset(&self.key("lastSync"))?;
        self.prefs.set_string(&self.key("lastSync"), "0")?;
        self.set_last_sync_local(0)
    }

    /// Returns whether the engine is enabled. Unset reads as enabled.
    pub fn enabled(&self) -> SyncResult<bool> {
        Ok(self.prefs.get_bool(&format!("engine.{}", self.name), true)?)
    }

    /// Enables or disables the engine.
    pub fn set_enabled(&self, enabled: bool) -> SyncResult<()> {
        Ok(self
            .prefs
            .set_bool(&format!("engine.{}", self.name), enabled)?)
    }
}
