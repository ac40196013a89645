//! Commands exchanged between clients.

use crate::error::{SyncError, SyncResult};
use serde_json::Value;

/// A command the clients engine knows how to send and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command name.
    pub name: &'static str,
    /// Required number of arguments.
    pub args: usize,
    /// Human-readable description.
    pub description: &'static str,
}

/// All known commands.
pub const COMMANDS: [CommandSpec; 7] = [
    CommandSpec {
        name: "resetAll",
        args: 0,
        description: "Clear temporary local data for all engines",
    },
    CommandSpec {
        name: "resetEngine",
        args: 1,
        description: "Clear temporary local data for engine",
    },
    CommandSpec {
        name: "wipeAll",
        args: 0,
        description: "Delete all client data for all engines",
    },
    CommandSpec {
        name: "wipeEngine",
        args: 1,
        description: "Delete all client data for engine",
    },
    CommandSpec {
        name: "logout",
        args: 0,
        description: "Log out client",
    },
    CommandSpec {
        name: "displayURI",
        args: 2,
        description: "Instruct a client to display a URI",
    },
    CommandSpec {
        name: "displayTab",
        args: 1,
        description: "Instruct a client to display a tab",
    },
];

/// Looks up a command by name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Checks that `command` exists and receives the right number of arguments.
pub fn validate(command: &str, args: &[Value]) -> SyncResult<&'static CommandSpec> {
    let spec = lookup(command).ok_or_else(|| SyncError::UnknownCommand(command.to_string()))?;
    if args.len() != spec.args {
        return Err(SyncError::InvalidArguments {
            command: command.to_string(),
            expected: spec.args,
            got: args.len(),
        });
    }
    Ok(spec)
}

/// A tab received through `displayTab`.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayTab {
    /// URI to open.
    pub uri: String,
    /// Opaque tab state, when the sender attached one and it could be read.
    pub tab_state: Option<Value>,
    /// Client that sent the tab.
    pub sender_id: String,
}

/// Host actions triggered by incoming commands.
///
/// `engines` of `None` means every engine.
pub trait CommandHandler: Send + Sync {
    /// Drops local sync metadata for `engines`.
    fn reset_client(&self, engines: Option<Vec<String>>) -> SyncResult<()>;

    /// Deletes local data for `engines`.
    fn wipe_client(&self, engines: Option<Vec<String>>) -> SyncResult<()>;

    /// Signs the user out. Remaining commands are dropped.
    fn logout(&self) -> SyncResult<()>;

    /// Displays a URI sent by `sender_id`.
    fn display_uri(&self, uri: &str, sender_id: &str) -> SyncResult<()>;

    /// Opens a tab sent by another client.
    fn display_tab(&self, tab: DisplayTab) -> SyncResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_has_expected_arities() {
        let arities: Vec<(&str, usize)> = COMMANDS.iter().map(|c| (c.name, c.args)).collect();
        assert_eq!(
            arities,
            vec![
                ("resetAll", 0),
                ("resetEngine", 1),
                ("wipeAll", 0),
                ("wipeEngine", 1),
                ("logout", 0),
                ("displayURI", 2),
                ("displayTab", 1),
            ]
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!(
            validate("reboot", &[]),
            Err(SyncError::UnknownCommand(name)) if name == "reboot"
        ));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let err = validate("displayURI", &[json!("http://example.com")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected 2 args for 'displayURI', but got 1"
        );
        assert!(validate("wipeEngine", &[json!("tabs")]).is_ok());
    }
}
