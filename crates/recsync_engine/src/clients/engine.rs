//! The clients engine.

use super::commands::{validate, CommandHandler, DisplayTab};
use super::store::{ClientIdentity, ClientStore};
use crate::config::ClientsConfig;
use crate::crypto::{CryptoResult, KeyRecovery};
use crate::engine::{Collaborators, Engine, SyncEngine, SyncOutcome};
use crate::error::SyncResult;
use crate::reconciler::AlwaysApply;
use crate::state::make_guid;
use crate::store::Store;
use recsync_protocol::{
    ClientRecord, ClientType, Command, CryptoRecord, DisplayTabArgs, Record, SendTabRecord,
    TAB_STATE_COLLECTION,
};
use recsync_storage::Prefs;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Options for [`ClientsEngine::send_uri_to_client`].
#[derive(Debug, Clone, Default)]
pub struct SendTabOptions {
    /// Tab state to attach. Stored in its own record when present.
    pub tab_state: Option<Value>,
    /// Lifetime of the tab state record. Defaults to the configured TTL.
    pub ttl: Option<u64>,
}

/// Composition of the clients on the account, including this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStats {
    /// Whether any client is a mobile device.
    pub has_mobile: bool,
    /// Client names, local first.
    pub names: Vec<String>,
    /// Number of clients.
    pub num_clients: usize,
}

/// Keeps the registry of devices on the account and carries commands
/// between them.
///
/// Every incoming client record is applied. Records that fail integrity
/// checks are deleted from the server at the end of the sync.
pub struct ClientsEngine {
    inner: SyncEngine,
    store: Arc<ClientStore>,
    config: ClientsConfig,
}

impl ClientsEngine {
    /// Creates the engine and resets it, so the first sync fetches every
    /// client record.
    pub fn new(config: ClientsConfig, prefs: Prefs, parts: Collaborators) -> SyncResult<Self> {
        let identity = ClientIdentity::new(prefs.clone(), config.app_name.clone());
        let store = Arc::new(ClientStore::new(identity, config.record_ttl));
        let inner = SyncEngine::new(config.engine.clone(), prefs, store.clone(), parts)
            .with_reconciler(Box::new(AlwaysApply));
        let mut engine = Self {
            inner,
            store,
            config,
        };
        engine.reset_client()?;
        Ok(engine)
    }

    /// Installs the hook called on integrity failures.
    pub fn with_key_recovery(self, recovery: Arc<dyn KeyRecovery>) -> Self {
        let Self {
            inner,
            store,
            config,
        } = self;
        Self {
            inner: inner.with_key_recovery(recovery),
            store,
            config,
        }
    }

    /// Returns the underlying collection engine.
    pub fn inner(&self) -> &SyncEngine {
        &self.inner
    }

    /// Returns the underlying collection engine mutably.
    pub fn inner_mut(&mut self) -> &mut SyncEngine {
        &mut self.inner
    }

    /// Returns the client store.
    pub fn store(&self) -> &Arc<ClientStore> {
        &self.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientsConfig {
        &self.config
    }

    fn identity(&self) -> &ClientIdentity {
        self.store.identity()
    }

    /// Returns this client's ID.
    pub fn local_id(&self) -> SyncResult<String> {
        self.identity().local_id()
    }

    /// Returns this client's name.
    pub fn local_name(&self) -> SyncResult<String> {
        self.identity().local_name()
    }

    /// Renames this client and schedules its record for upload.
    pub fn set_local_name(&self, name: &str) -> SyncResult<()> {
        self.identity().set_local_name(name)?;
        debug!(name, "Local client name changed");
        self.mark_changed(&self.local_id()?);
        self.inner.tracker().add_score(self.config.send_score);
        Ok(())
    }

    /// Returns this client's device kind.
    pub fn local_type(&self) -> SyncResult<ClientType> {
        self.identity().local_type()
    }

    /// Sets this client's device kind.
    pub fn set_local_type(&self, client_type: ClientType) -> SyncResult<()> {
        self.identity().set_local_type(client_type)
    }

    /// Returns commands waiting for this client.
    pub fn local_commands(&self) -> Vec<Command> {
        self.store.local_commands()
    }

    /// Returns cached remote clients keyed by ID.
    pub fn remote_clients(&self) -> BTreeMap<String, ClientRecord> {
        self.store.remote_clients()
    }

    /// Returns true if `id` is a known mobile client.
    pub fn is_mobile(&self, id: &str) -> bool {
        self.store
            .remote_client(id)
            .is_some_and(|client| client.client_type == ClientType::Mobile)
    }

    /// Summarizes the clients on the account.
    pub fn stats(&self) -> SyncResult<ClientStats> {
        let mut stats = ClientStats {
            has_mobile: self.local_type()? == ClientType::Mobile,
            names: vec![self.local_name()?],
            num_clients: 1,
        };
        for client in self.store.remote_clients().into_values() {
            stats.has_mobile |= client.client_type == ClientType::Mobile;
            stats.names.push(client.name);
            stats.num_clients += 1;
        }
        Ok(stats)
    }

    /// Seconds-since-epoch of the last forced upload of the local record.
    pub fn last_record_upload(&self) -> SyncResult<i64> {
        Ok(self
            .inner
            .state()
            .prefs()
            .get_i64(&self.last_record_upload_key(), 0)?)
    }

    fn last_record_upload_key(&self) -> String {
        format!("{}.lastRecordUpload", self.inner.name())
    }

    /// Deletes this client's record from the server.
    pub fn remove_client_data(&self) -> SyncResult<()> {
        let local_id = self.local_id()?;
        info!(id = %local_id, "Removing local client record from server");
        self.inner
            .resource()
            .delete_record(self.inner.name(), &local_id)?;
        Ok(())
    }

    fn mark_changed(&self, id: &str) {
        self.inner
            .tracker()
            .add_changed_id(id, self.inner.clock().now());
    }

    /// Drops commands waiting for this client and schedules its record for upload.
    pub fn clear_commands(&self) -> SyncResult<()> {
        self.store.take_local_commands();
        self.mark_changed(&self.local_id()?);
        Ok(())
    }

    /// Queues a command for `client_id`, or for every remote client when `None`.
    ///
    /// A client that already has an identical command queued is left alone.
    pub fn send_command(
        &self,
        command: &str,
        args: Vec<Value>,
        client_id: Option<&str>,
    ) -> SyncResult<()> {
        validate(command, &args)?;
        match client_id {
            Some(id) => self.send_command_to_client(command, &args, id),
            None => {
                for id in self.store.remote_ids() {
                    self.send_command_to_client(command, &args, &id)?;
                }
                Ok(())
            }
        }
    }

    fn send_command_to_client(&self, command: &str, args: &[Value], client_id: &str) -> SyncResult<()> {
        trace!(command, client = client_id, "Sending command");
        let queued = self
            .store
            .queue_remote_command(client_id, Command::new(command, args.to_vec()))?;
        if queued {
            trace!(command, client = client_id, "Client got a new action");
            self.mark_changed(client_id);
        }
        Ok(())
    }

    /// Runs and clears the commands waiting for this client.
    ///
    /// Returns false if a command asked to stop syncing.
    pub fn process_incoming_commands(&self, handler: &dyn CommandHandler) -> SyncResult<bool> {
        let commands = self.store.take_local_commands();
        self.mark_changed(&self.local_id()?);

        for Command { command, args } in commands {
            debug!(command = %command, args = args.len(), "Processing command");
            match (command.as_str(), args.as_slice()) {
                ("resetAll", []) => handler.reset_client(None)?,
                ("resetEngine", [Value::String(engine)]) => {
                    handler.reset_client(Some(vec![engine.clone()]))?
                }
                ("wipeAll", []) => handler.wipe_client(None)?,
                ("wipeEngine", [Value::String(engine)]) => {
                    handler.wipe_client(Some(vec![engine.clone()]))?
                }
                ("logout", []) => {
                    handler.logout()?;
                    return Ok(false);
                }
                ("displayURI", [Value::String(uri), Value::String(sender)]) => {
                    info!(uri = %uri, sender = %sender, "Received a URI for display");
                    handler.display_uri(uri, sender)?
                }
                ("displayTab", [tab]) => self.handle_display_tab(tab, handler)?,
                _ => debug!(command = %command, "Received an unknown command"),
            }
        }
        Ok(true)
    }

    fn handle_display_tab(&self, value: &Value, handler: &dyn CommandHandler) -> SyncResult<()> {
        let args = match DisplayTabArgs::from_value(value) {
            Ok(args) => args,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed displayTab command");
                return Ok(());
            }
        };
        info!(uri = %args.uri, "Received a tab for display");

        let tab_state = match &args.state_id {
            Some(state_id) => self.fetch_tab_state(state_id)?,
            None => None,
        };
        handler.display_tab(DisplayTab {
            uri: args.uri,
            tab_state,
            sender_id: args.sender_id,
        })
    }

    fn fetch_tab_state(&self, state_id: &str) -> SyncResult<Option<Value>> {
        debug!(id = state_id, "Fetching tab state record");
        let Some(record) = self.inner.resource().fetch(TAB_STATE_COLLECTION, state_id)? else {
            debug!(id = state_id, "Tab state record is gone");
            return Ok(None);
        };
        match self.inner.crypto().decrypt(&record) {
            Ok(decrypted) => Ok(SendTabRecord::tab_state_from_cleartext(&decrypted.cleartext)),
            Err(e) => {
                warn!(id = state_id, error = %e, "Could not decrypt tab state record");
                Ok(None)
            }
        }
    }

    /// Asks `client_id`, or every remote client, to display `uri`.
    pub fn send_uri_to_client_for_display(&self, uri: &str, client_id: Option<&str>) -> SyncResult<()> {
        info!(uri, client = ?client_id, "Sending URI to client");
        let args = vec![Value::from(uri), Value::from(self.local_id()?)];
        self.send_command("displayURI", args, client_id)?;
        self.inner.tracker().add_score(self.config.send_score);
        Ok(())
    }

    /// Sends a tab to `client_id`, optionally with its state.
    ///
    /// State travels in a separate `sendtab` record uploaded with the next
    /// sync. Returns that record's ID.
    pub fn send_uri_to_client(
        &self,
        uri: &str,
        client_id: &str,
        options: SendTabOptions,
    ) -> SyncResult<Option<String>> {
        info!(uri, client = client_id, "Sending tab to client");
        let mut args = DisplayTabArgs {
            uri: uri.to_string(),
            sender_id: self.local_id()?,
            state_id: None,
        };
        let outgoing = options.tab_state.map(|tab_state| {
            let id = make_guid();
            args.state_id = Some(id.clone());
            debug!(id = %id, "Prepared tab state record");
            SendTabRecord {
                id,
                tab_state,
                ttl: options.ttl.unwrap_or(self.config.tab_state_ttl),
            }
        });

        self.send_command("displayTab", vec![args.to_value()?], Some(client_id))?;

        let state_id = outgoing.as_ref().map(|record| record.id.clone());
        if let Some(record) = outgoing {
            self.store.push_outgoing_tab(record);
        }
        self.inner.tracker().add_score(self.config.send_score);
        Ok(state_id)
    }

    fn upload_tab_states(&self) -> SyncResult<()> {
        let tabs = self.store.outgoing_tabs();
        if tabs.is_empty() {
            return Ok(());
        }
        let crypto = self.inner.crypto();
        let records = tabs
            .iter()
            .map(|tab| {
                let record = CryptoRecord::new(TAB_STATE_COLLECTION, tab.id.clone(), tab.to_cleartext())
                    .with_ttl(tab.ttl);
                crypto.encrypt(&record)
            })
            .collect::<CryptoResult<Vec<Record>>>()?;

        debug!(count = records.len(), "Uploading tab state records");
        let response = self
            .inner
            .resource()
            .post(TAB_STATE_COLLECTION, &records)
            .map_err(|e| e.into_upload(TAB_STATE_COLLECTION))?;
        if !response.result.failed.is_empty() {
            warn!(count = response.result.failed.len(), "Server rejected tab state records");
        }
        self.store.clear_outgoing_tabs();
        Ok(())
    }
}

impl Engine for ClientsEngine {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn enabled(&self) -> SyncResult<bool> {
        Ok(true)
    }

    fn startup(&mut self) -> SyncResult<()> {
        let now = self.inner.clock().now();
        let last_upload = self.last_record_upload()?;
        if now - last_upload as f64 > self.config.refresh_interval as f64 {
            debug!(last_upload, "Refreshing local client record");
            self.mark_changed(&self.local_id()?);
            self.inner
                .state()
                .prefs()
                .set_i64(&self.last_record_upload_key(), now.floor() as i64)?;
        }
        self.inner.startup()
    }

    fn process_incoming(&mut self) -> SyncResult<()> {
        self.inner.process_incoming()
    }

    fn upload_outgoing(&mut self) -> SyncResult<()> {
        self.inner.upload_outgoing()?;
        self.upload_tab_states()
    }

    fn finish(&mut self) -> SyncResult<()> {
        self.inner.finish()
    }

    fn cleanup(&mut self) {
        self.inner.cleanup()
    }

    fn outcome(&self) -> SyncOutcome {
        self.inner.outcome()
    }

    fn can_decrypt(&self) -> bool {
        self.inner.can_decrypt()
    }

    fn reset_client(&mut self) -> SyncResult<()> {
        self.inner.reset_client()?;
        self.store.wipe()
    }

    fn wipe_client(&mut self) -> SyncResult<()> {
        self.inner.wipe_client()
    }

    fn wipe_server(&mut self) -> SyncResult<()> {
        self.inner.wipe_server()
    }
}
