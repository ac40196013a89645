//! Client registry and cross-device commands.
//!
//! Each install keeps one record in the `clients` collection describing
//! itself and carrying the commands other clients have queued for it.
//! Tab state sent along with a `displayTab` command lives in the separate
//! `sendtab` collection and expires on the server.

mod commands;
mod engine;
mod store;

pub use commands::{lookup, validate, CommandHandler, CommandSpec, DisplayTab, COMMANDS};
pub use engine::{ClientStats, ClientsEngine, SendTabOptions};
pub use store::{ClientIdentity, ClientStore};
