//! Local client identity and the cache of remote client records.

use crate::error::{SyncError, SyncResult};
use crate::state::make_guid;
use crate::store::Store;
use parking_lot::RwLock;
use recsync_protocol::{ClientRecord, ClientType, Command, CryptoRecord, SendTabRecord};
use recsync_storage::Prefs;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, trace};

const GUID_PREF: &str = "client.GUID";
const NAME_PREF: &str = "client.name";
const TYPE_PREF: &str = "client.type";

/// Identity of this install, persisted in prefs.
#[derive(Clone)]
pub struct ClientIdentity {
    prefs: Prefs,
    app_name: String,
}

impl ClientIdentity {
    /// Creates an identity backed by `prefs`.
    pub fn new(prefs: Prefs, app_name: impl Into<String>) -> Self {
        Self {
            prefs,
            app_name: app_name.into(),
        }
    }

    /// Returns the local client ID, generating one on first use.
    pub fn local_id(&self) -> SyncResult<String> {
        let id = self.prefs.get_string(GUID_PREF, "")?;
        if !id.is_empty() {
            return Ok(id);
        }
        let id = make_guid();
        self.prefs.set_string(GUID_PREF, id.clone())?;
        Ok(id)
    }

    /// Returns the local client name, synthesizing one on first use.
    pub fn local_name(&self) -> SyncResult<String> {
        let name = self.prefs.get_string(NAME_PREF, "")?;
        if !name.is_empty() {
            return Ok(name);
        }
        let name = self.default_name()?;
        self.prefs.set_string(NAME_PREF, name.clone())?;
        Ok(name)
    }

    /// Stores the local client name.
    pub fn set_local_name(&self, name: &str) -> SyncResult<()> {
        Ok(self.prefs.set_string(NAME_PREF, name)?)
    }

    /// Returns the local device kind.
    pub fn local_type(&self) -> SyncResult<ClientType> {
        let value = self.prefs.get_string(TYPE_PREF, ClientType::Desktop.as_str())?;
        Ok(ClientType::parse(&value))
    }

    /// Stores the local device kind.
    pub fn set_local_type(&self, client_type: ClientType) -> SyncResult<()> {
        Ok(self.prefs.set_string(TYPE_PREF, client_type.as_str())?)
    }

    fn default_name(&self) -> SyncResult<String> {
        let from_env = ["USER", "USERNAME"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find(|value| !value.is_empty());
        let user = match from_env {
            Some(user) => Some(user),
            None => self.pref_user()?,
        };
        let system = std::env::consts::OS;
        Ok(match user {
            Some(user) => format!("{}'s {} on {}", user, self.app_name, system),
            None => format!("{} on {}", self.app_name, system),
        })
    }

    fn pref_user(&self) -> SyncResult<Option<String>> {
        for key in ["account", "username"] {
            let value = self.prefs.get_string(key, "")?;
            if !value.is_empty() {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

/// [`Store`] for the `clients` collection.
///
/// The local record is synthesized from [`ClientIdentity`] on upload; only
/// its command list is taken from the server. Remote records are cached
/// verbatim.
pub struct ClientStore {
    identity: ClientIdentity,
    record_ttl: u64,
    remote: RwLock<BTreeMap<String, ClientRecord>>,
    local_commands: RwLock<Vec<Command>>,
    outgoing_tabs: RwLock<Vec<SendTabRecord>>,
}

impl ClientStore {
    /// Creates an empty store. Uploaded records expire after `record_ttl`.
    pub fn new(identity: ClientIdentity, record_ttl: u64) -> Self {
        Self {
            identity,
            record_ttl,
            remote: RwLock::new(BTreeMap::new()),
            local_commands: RwLock::new(Vec::new()),
            outgoing_tabs: RwLock::new(Vec::new()),
        }
    }

    /// Returns the local identity.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Returns a cached remote client.
    pub fn remote_client(&self, id: &str) -> Option<ClientRecord> {
        self.remote.read().get(id).cloned()
    }

    /// Returns all cached remote clients keyed by ID.
    pub fn remote_clients(&self) -> BTreeMap<String, ClientRecord> {
        self.remote.read().clone()
    }

    /// Returns the IDs of all cached remote clients.
    pub fn remote_ids(&self) -> Vec<String> {
        self.remote.read().keys().cloned().collect()
    }

    /// Returns commands addressed to this client.
    pub fn local_commands(&self) -> Vec<Command> {
        self.local_commands.read().clone()
    }

    /// Removes and returns commands addressed to this client.
    pub fn take_local_commands(&self) -> Vec<Command> {
        std::mem::take(&mut *self.local_commands.write())
    }

    /// Appends `command` to a remote client's queue unless already queued.
    ///
    /// Returns true if the command was added.
    pub fn queue_remote_command(&self, client_id: &str, command: Command) -> SyncResult<bool> {
        let mut remote = self.remote.write();
        let client = remote
            .get_mut(client_id)
            .ok_or_else(|| SyncError::UnknownClient(client_id.to_string()))?;
        Ok(client.queue_command(command))
    }

    /// Holds a send-tab record until the next upload.
    pub fn push_outgoing_tab(&self, record: SendTabRecord) {
        self.outgoing_tabs.write().push(record);
    }

    /// Returns send-tab records awaiting upload.
    pub fn outgoing_tabs(&self) -> Vec<SendTabRecord> {
        self.outgoing_tabs.read().clone()
    }

    /// Drops send-tab records after upload.
    pub fn clear_outgoing_tabs(&self) {
        self.outgoing_tabs.write().clear();
    }

    fn parse(record: &CryptoRecord) -> SyncResult<ClientRecord> {
        let mut cleartext = record.cleartext.clone();
        if let Some(body) = cleartext.as_object_mut() {
            body.entry("id")
                .or_insert_with(|| Value::String(record.id.clone()));
        }
        Ok(ClientRecord::from_cleartext(&cleartext)?)
    }
}

impl Store for ClientStore {
    fn item_exists(&self, id: &str) -> SyncResult<bool> {
        Ok(id == self.identity.local_id()? || self.remote.read().contains_key(id))
    }

    fn all_ids(&self) -> SyncResult<Vec<String>> {
        let mut ids = vec![self.identity.local_id()?];
        ids.extend(self.remote_ids());
        Ok(ids)
    }

    fn create_record(&self, id: &str, collection: &str) -> SyncResult<CryptoRecord> {
        let client = if id == self.identity.local_id()? {
            let mut local = ClientRecord::new(
                id,
                self.identity.local_name()?,
                self.identity.local_type()?,
            );
            local.commands = self.local_commands();
            local
        } else {
            match self.remote_client(id) {
                Some(remote) => remote,
                None => return Ok(CryptoRecord::tombstone(collection, id)),
            }
        };
        Ok(CryptoRecord::new(collection, id, client.to_cleartext()?).with_ttl(self.record_ttl))
    }

    fn apply_incoming(&self, record: &CryptoRecord) -> SyncResult<()> {
        let local_id = self.identity.local_id()?;
        if record.is_deleted() {
            if record.id != local_id {
                debug!(id = %record.id, "Remote client deleted");
                self.remote.write().remove(&record.id);
            }
            return Ok(());
        }

        let client = Self::parse(record)?;
        if record.id == local_id {
            trace!(count = client.commands.len(), "Received commands for local client");
            *self.local_commands.write() = client.commands;
        } else {
            self.remote.write().insert(record.id.clone(), client);
        }
        Ok(())
    }

    fn change_item_id(&self, old_id: &str, new_id: &str) -> SyncResult<()> {
        let mut remote = self.remote.write();
        if let Some(mut client) = remote.remove(old_id) {
            client.id = new_id.to_string();
            remote.insert(new_id.to_string(), client);
        }
        Ok(())
    }

    fn wipe(&self) -> SyncResult<()> {
        self.remote.write().clear();
        self.outgoing_tabs.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsync_protocol::CLIENTS_COLLECTION;
    use serde_json::json;

    fn store() -> ClientStore {
        ClientStore::new(ClientIdentity::new(Prefs::in_memory(), "Firefox"), 100)
    }

    fn incoming(id: &str, cleartext: Value) -> CryptoRecord {
        CryptoRecord::new(CLIENTS_COLLECTION, id, cleartext)
    }

    #[test]
    fn local_id_is_stable() {
        let store = store();
        let id = store.identity().local_id().unwrap();
        assert_eq!(id.len(), 32);
        assert_eq!(store.identity().local_id().unwrap(), id);
    }

    #[test]
    fn synthesized_name_mentions_app_and_system() {
        let identity = ClientIdentity::new(Prefs::in_memory(), "Firefox");
        let name = identity.local_name().unwrap();
        assert!(name.contains("Firefox"));
        assert!(name.ends_with(std::env::consts::OS));

        identity.set_local_name("Laptop").unwrap();
        assert_eq!(identity.local_name().unwrap(), "Laptop");
    }

    #[test]
    fn local_type_defaults_to_desktop() {
        let identity = ClientIdentity::new(Prefs::in_memory(), "app");
        assert_eq!(identity.local_type().unwrap(), ClientType::Desktop);
        identity.set_local_type(ClientType::Mobile).unwrap();
        assert_eq!(identity.local_type().unwrap(), ClientType::Mobile);
    }

    #[test]
    fn local_record_only_takes_commands() {
        let store = store();
        let local_id = store.identity().local_id().unwrap();
        store.identity().set_local_name("Mine").unwrap();

        store
            .apply_incoming(&incoming(
                &local_id,
                json!({
                    "id": local_id,
                    "name": "Theirs",
                    "type": "mobile",
                    "commands": [{ "command": "logout", "args": [] }]
                }),
            ))
            .unwrap();

        assert_eq!(store.local_commands().len(), 1);
        let record = store.create_record(&local_id, CLIENTS_COLLECTION).unwrap();
        assert_eq!(record.cleartext["name"], "Mine");
        assert_eq!(record.cleartext["type"], "desktop");
        assert_eq!(record.ttl, Some(100));
    }

    #[test]
    fn remote_records_are_cached_verbatim() {
        let store = store();
        store
            .apply_incoming(&incoming(
                "remote",
                json!({ "name": "Phone", "type": "mobile", "version": "4.0" }),
            ))
            .unwrap();

        let record = store.create_record("remote", CLIENTS_COLLECTION).unwrap();
        assert_eq!(record.cleartext["name"], "Phone");
        assert_eq!(record.cleartext["version"], "4.0");
        assert!(store.item_exists("remote").unwrap());
        assert_eq!(store.all_ids().unwrap().len(), 2);
    }

    #[test]
    fn commands_to_unknown_clients_fail() {
        let store = store();
        let err = store
            .queue_remote_command("nobody", Command::new("logout", vec![]))
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownClient(_)));
    }

    #[test]
    fn wipe_forgets_remote_clients_and_outgoing_tabs() {
        let store = store();
        store
            .apply_incoming(&incoming("remote", json!({ "name": "Phone" })))
            .unwrap();
        store.push_outgoing_tab(SendTabRecord {
            id: "tab".into(),
            tab_state: json!({}),
            ttl: 10,
        });

        store.wipe().unwrap();
        assert!(store.remote_clients().is_empty());
        assert!(store.outgoing_tabs().is_empty());
        assert_eq!(store.all_ids().unwrap().len(), 1);
    }

    #[test]
    fn remote_tombstone_removes_client() {
        let store = store();
        store
            .apply_incoming(&incoming("remote", json!({ "name": "Phone" })))
            .unwrap();
        store
            .apply_incoming(&CryptoRecord::tombstone(CLIENTS_COLLECTION, "remote"))
            .unwrap();
        assert!(store.remote_client("remote").is_none());
    }
}
