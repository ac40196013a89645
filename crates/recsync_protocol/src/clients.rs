//! Client registry records, commands and the send-tab side channel.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Collection holding one record per registered client.
pub const CLIENTS_COLLECTION: &str = "clients";
/// Collection holding tab state referenced by `displayTab` commands.
pub const TAB_STATE_COLLECTION: &str = "sendtab";

/// Kind of device a client runs on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Desktop application.
    #[default]
    Desktop,
    /// Mobile application.
    Mobile,
}

impl ClientType {
    /// Returns the wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Desktop => "desktop",
            ClientType::Mobile => "mobile",
        }
    }

    /// Parses the wire form. Unknown values read as desktop.
    pub fn parse(s: &str) -> Self {
        match s {
            "mobile" => ClientType::Mobile,
            _ => ClientType::Desktop,
        }
    }
}

/// A command queued for a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name.
    pub command: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Command {
    /// Creates a command.
    pub fn new(command: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Returns true if both name and arguments are deep-equal.
    pub fn is_duplicate_of(&self, other: &Command) -> bool {
        self.command == other.command && self.args == other.args
    }
}

/// The cleartext of a client registry record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Per-install GUID.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Device kind.
    #[serde(default, rename = "type")]
    pub client_type: ClientType,
    /// Pending commands, in order.
    #[serde(default)]
    pub commands: Vec<Command>,
    /// Fields written by other clients that this version does not know about.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientRecord {
    /// Creates a record with no commands.
    pub fn new(id: impl Into<String>, name: impl Into<String>, client_type: ClientType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            client_type,
            commands: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Converts to a cleartext value.
    pub fn to_cleartext(&self) -> ProtocolResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses a cleartext value.
    pub fn from_cleartext(cleartext: &Value) -> ProtocolResult<Self> {
        let record: Self = serde_json::from_value(cleartext.clone())?;
        if record.id.is_empty() {
            return Err(ProtocolError::invalid_record("", "client record without id"));
        }
        Ok(record)
    }

    /// Queues `command` unless an identical one is already queued.
    ///
    /// Returns true if the command was added.
    pub fn queue_command(&mut self, command: Command) -> bool {
        if self.commands.iter().any(|c| c.is_duplicate_of(&command)) {
            return false;
        }
        self.commands.push(command);
        true
    }
}

/// Arguments of a `displayTab` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayTabArgs {
    /// URI to display.
    pub uri: String,
    /// Client that sent the tab.
    #[serde(rename = "senderID")]
    pub sender_id: String,
    /// ID of the [`SendTabRecord`] holding tab state, if any.
    #[serde(rename = "stateID", default, skip_serializing_if = "Option::is_none")]
    pub state_id: Option<String>,
}

impl DisplayTabArgs {
    /// Converts to a command argument.
    pub fn to_value(&self) -> ProtocolResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses a command argument.
    pub fn from_value(value: &Value) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Tab state stored outside the client record.
///
/// Tab state can be large; keeping it in its own collection keeps the
/// client record small. The record expires server-side after `ttl`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendTabRecord {
    /// Record ID, referenced by [`DisplayTabArgs::state_id`].
    pub id: String,
    /// Opaque tab state.
    pub tab_state: Value,
    /// Seconds until server-side expiry.
    pub ttl: u64,
}

impl SendTabRecord {
    /// Converts to a cleartext value.
    pub fn to_cleartext(&self) -> Value {
        let mut body = Map::new();
        body.insert("id".into(), Value::String(self.id.clone()));
        body.insert("tabState".into(), self.tab_state.clone());
        Value::Object(body)
    }

    /// Extracts tab state from a decrypted cleartext.
    pub fn tab_state_from_cleartext(cleartext: &Value) -> Option<Value> {
        cleartext.get("tabState").cloned()
    }
}
