//! Integration tests for the clients engine: registry, commands and send-tab.

mod common;

use common::*;
use parking_lot::Mutex;
use recsync_engine::clients::{ClientsEngine, CommandHandler, DisplayTab, SendTabOptions};
use recsync_engine::{
    ClientsConfig, Collaborators, Engine, KeyBundle, ManualClock, MemoryTracker, SyncError,
    SyncKey, SyncResult, Tracker, CLIENTS_TTL, CLIENTS_TTL_REFRESH, DEFAULT_TAB_STATE_TTL,
    SCORE_INCREMENT_XLARGE,
};
use recsync_protocol::{ClientRecord, ClientType, Method, CLIENTS_COLLECTION, TAB_STATE_COLLECTION};
use recsync_server::StorageServer;
use recsync_storage::Prefs;
use serde_json::json;
use std::sync::Arc;

struct Client {
    engine: ClientsEngine,
    tracker: Arc<MemoryTracker>,
    clock: Arc<ManualClock>,
}

impl Client {
    fn id(&self) -> String {
        self.engine.local_id().unwrap()
    }
}

fn client(server: &Arc<StorageServer>, name: &str) -> Client {
    let prefs = Prefs::in_memory();
    prefs.set_string("client.name", name).unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let tracker = Arc::new(MemoryTracker::with_clock(clock.clone()));
    let parts = Collaborators::new(tracker.clone(), account_crypto(), resource(server))
        .with_clock(clock.clone());
    let engine = ClientsEngine::new(ClientsConfig::new("Firefox"), prefs, parts).unwrap();
    Client {
        engine,
        tracker,
        clock,
    }
}

/// Two clients that have seen each other.
fn pair(server: &Arc<StorageServer>) -> (Client, Client) {
    let mut laptop = client(server, "Laptop");
    let mut phone = client(server, "Phone");
    laptop.engine.sync().unwrap();
    phone.engine.sync().unwrap();
    laptop.engine.sync().unwrap();
    (laptop, phone)
}

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<String>>,
    tabs: Mutex<Vec<DisplayTab>>,
}

impl RecordingHandler {
    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl CommandHandler for RecordingHandler {
    fn reset_client(&self, engines: Option<Vec<String>>) -> SyncResult<()> {
        self.events.lock().push(format!("reset {:?}", engines));
        Ok(())
    }

    fn wipe_client(&self, engines: Option<Vec<String>>) -> SyncResult<()> {
        self.events.lock().push(format!("wipe {:?}", engines));
        Ok(())
    }

    fn logout(&self) -> SyncResult<()> {
        self.events.lock().push("logout".to_string());
        Ok(())
    }

    fn display_uri(&self, uri: &str, sender_id: &str) -> SyncResult<()> {
        self.events
            .lock()
            .push(format!("display {} from {}", uri, sender_id));
        Ok(())
    }

    fn display_tab(&self, tab: DisplayTab) -> SyncResult<()> {
        self.events.lock().push(format!("tab {}", tab.uri));
        self.tabs.lock().push(tab);
        Ok(())
    }
}

#[test]
fn clients_discover_each_other() {
    let server = server();
    let (laptop, phone) = pair(&server);

    assert!(laptop.engine.remote_clients().contains_key(&phone.id()));
    assert!(phone.engine.remote_clients().contains_key(&laptop.id()));
    assert_eq!(server.record_count(USER, CLIENTS_COLLECTION), 2);

    let stored = server.record(USER, CLIENTS_COLLECTION, &laptop.id()).unwrap();
    assert_eq!(stored.ttl, Some(CLIENTS_TTL));

    let stats = laptop.engine.stats().unwrap();
    assert_eq!(stats.num_clients, 2);
    assert_eq!(stats.names, vec!["Laptop".to_string(), "Phone".to_string()]);
    assert!(!stats.has_mobile);
}

#[test]
fn mobile_clients_are_reported() {
    let server = server();
    let mut phone = client(&server, "Phone");
    phone.engine.set_local_type(ClientType::Mobile).unwrap();
    phone.engine.sync().unwrap();

    let mut laptop = client(&server, "Laptop");
    laptop.engine.sync().unwrap();

    assert!(laptop.engine.is_mobile(&phone.id()));
    assert!(laptop.engine.stats().unwrap().has_mobile);
}

#[test]
fn commands_travel_between_clients() {
    let server = server();
    let (mut laptop, mut phone) = pair(&server);

    phone
        .engine
        .send_command("wipeEngine", vec![json!("history")], Some(&laptop.id()))
        .unwrap();
    phone
        .engine
        .send_uri_to_client_for_display("https://www.rust-lang.org/", Some(&laptop.id()))
        .unwrap();
    assert_eq!(phone.tracker.score(), SCORE_INCREMENT_XLARGE);
    phone.engine.sync().unwrap();
    assert_eq!(phone.tracker.score(), 0);

    laptop.engine.sync().unwrap();
    assert_eq!(laptop.engine.local_commands().len(), 2);

    let handler = RecordingHandler::default();
    assert!(laptop.engine.process_incoming_commands(&handler).unwrap());
    assert_eq!(
        handler.events(),
        vec![
            "wipe Some([\"history\"])".to_string(),
            format!("display https://www.rust-lang.org/ from {}", phone.id()),
        ]
    );
    assert!(laptop.engine.local_commands().is_empty());

    // Clearing the queue uploads the local record without its commands.
    laptop.engine.sync().unwrap();
    let cleartext = read_remote(&server, CLIENTS_COLLECTION, &laptop.id()).unwrap();
    let stored = ClientRecord::from_cleartext(&cleartext).unwrap();
    assert!(stored.commands.is_empty());
    assert_eq!(stored.name, "Laptop");
}

#[test]
fn duplicate_commands_are_queued_once() {
    let server = server();
    let (laptop, phone) = pair(&server);

    let args = vec![json!("http://x"), json!("sid")];
    for _ in 0..2 {
        phone
            .engine
            .send_command("displayURI", args.clone(), Some(&laptop.id()))
            .unwrap();
    }
    let queued = phone.engine.remote_clients()[&laptop.id()].commands.clone();
    assert_eq!(queued.len(), 1);
}

#[test]
fn broadcast_reaches_every_remote_client() {
    let server = server();
    let mut laptop = client(&server, "Laptop");
    let mut phone = client(&server, "Phone");
    let mut tablet = client(&server, "Tablet");
    laptop.engine.sync().unwrap();
    phone.engine.sync().unwrap();
    tablet.engine.sync().unwrap();

    tablet.engine.send_command("resetAll", vec![], None).unwrap();
    tablet.engine.sync().unwrap();

    for device in [&mut laptop, &mut phone] {
        device.engine.sync().unwrap();
        let handler = RecordingHandler::default();
        device.engine.process_incoming_commands(&handler).unwrap();
        assert_eq!(handler.events(), vec!["reset None".to_string()]);
    }
}

#[test]
fn invalid_commands_are_refused() {
    let server = server();
    let (laptop, phone) = pair(&server);

    let err = phone
        .engine
        .send_command("reboot", vec![], Some(&laptop.id()))
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownCommand(_)));

    let err = phone
        .engine
        .send_command("displayURI", vec![json!("http://x")], Some(&laptop.id()))
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidArguments { expected: 2, got: 1, .. }));

    let err = phone
        .engine
        .send_command("logout", vec![], Some("nobody"))
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownClient(id) if id == "nobody"));
}

#[test]
fn logout_stops_command_processing() {
    let server = server();
    let (mut laptop, mut phone) = pair(&server);
    let target = laptop.id();

    phone.engine.send_command("logout", vec![], Some(&target)).unwrap();
    phone
        .engine
        .send_command("resetEngine", vec![json!("tabs")], Some(&target))
        .unwrap();
    phone.engine.sync().unwrap();
    laptop.engine.sync().unwrap();

    let handler = RecordingHandler::default();
    assert!(!laptop.engine.process_incoming_commands(&handler).unwrap());
    assert_eq!(handler.events(), vec!["logout".to_string()]);
    assert!(laptop.engine.local_commands().is_empty());
}

#[test]
fn tabs_are_sent_with_their_state() {
    let server = server();
    let (mut laptop, mut phone) = pair(&server);

    let state = json!({"scroll": 120, "form": {"q": "sync"}});
    let state_id = phone
        .engine
        .send_uri_to_client(
            "https://docs.rs/",
            &laptop.id(),
            SendTabOptions {
                tab_state: Some(state.clone()),
                ttl: None,
            },
        )
        .unwrap()
        .unwrap();
    assert_eq!(phone.engine.store().outgoing_tabs().len(), 1);

    phone.engine.sync().unwrap();
    assert!(phone.engine.store().outgoing_tabs().is_empty());
    assert_eq!(server.request_count(Method::Post, TAB_STATE_COLLECTION), 1);
    let stored = server.record(USER, TAB_STATE_COLLECTION, &state_id).unwrap();
    assert_eq!(stored.ttl, Some(DEFAULT_TAB_STATE_TTL));

    laptop.engine.sync().unwrap();
    let handler = RecordingHandler::default();
    laptop.engine.process_incoming_commands(&handler).unwrap();

    let tabs = handler.tabs.lock().clone();
    assert_eq!(
        tabs,
        vec![DisplayTab {
            uri: "https://docs.rs/".to_string(),
            tab_state: Some(state),
            sender_id: phone.id(),
        }]
    );
}

#[test]
fn missing_tab_state_is_delivered_without_state() {
    let server = server();
    let (mut laptop, mut phone) = pair(&server);

    let state_id = phone
        .engine
        .send_uri_to_client(
            "https://crates.io/",
            &laptop.id(),
            SendTabOptions {
                tab_state: Some(json!({"scroll": 1})),
                ttl: Some(60),
            },
        )
        .unwrap()
        .unwrap();
    phone.engine.sync().unwrap();
    server.handle(
        Method::Delete,
        &format!("/1.1/{}/storage/{}/{}", USER, TAB_STATE_COLLECTION, state_id),
        &[],
    );

    laptop.engine.sync().unwrap();
    let handler = RecordingHandler::default();
    laptop.engine.process_incoming_commands(&handler).unwrap();
    let tabs = handler.tabs.lock().clone();
    assert_eq!(tabs.len(), 1);
    assert_eq!(tabs[0].tab_state, None);
}

#[test]
fn sending_a_tab_to_an_unknown_client_queues_nothing() {
    let server = server();
    let phone = client(&server, "Phone");

    let result = phone.engine.send_uri_to_client(
        "https://docs.rs/",
        "nobody",
        SendTabOptions {
            tab_state: Some(json!({})),
            ttl: None,
        },
    );
    assert!(matches!(result, Err(SyncError::UnknownClient(_))));
    assert!(phone.engine.store().outgoing_tabs().is_empty());
}

#[test]
fn tab_state_upload_failure_is_fatal() {
    let server = server();
    let (laptop, mut phone) = pair(&server);
    phone
        .engine
        .send_uri_to_client(
            "https://docs.rs/",
            &laptop.id(),
            SendTabOptions {
                tab_state: Some(json!({"scroll": 3})),
                ttl: None,
            },
        )
        .unwrap();

    server.fail_next_for(Method::Post, TAB_STATE_COLLECTION, 503);
    let err = phone.engine.sync().unwrap_err();
    assert_eq!(err.failure_code(), Some(recsync_engine::FailureCode::EngineUploadFail));
    assert_eq!(phone.engine.store().outgoing_tabs().len(), 1);
}

#[test]
fn corrupt_client_records_are_deleted() {
    let server = server();
    let mut laptop = client(&server, "Laptop");
    laptop.engine.sync().unwrap();

    let foreign = KeyBundle::new(SyncKey::generate());
    let ghost = ClientRecord::new("ghost", "Old phone", ClientType::Mobile);
    seed(
        &server,
        &foreign,
        CLIENTS_COLLECTION,
        "ghost",
        ghost.to_cleartext().unwrap(),
        0,
    );

    let outcome = laptop.engine.sync().unwrap();
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.deleted, 1);
    assert!(server.record(USER, CLIENTS_COLLECTION, "ghost").is_none());
    assert!(laptop.engine.remote_clients().is_empty());
}

#[test]
fn malformed_client_records_are_deleted() {
    let server = server();
    let mut laptop = client(&server, "Laptop");
    laptop.engine.sync().unwrap();

    let crypto = account_crypto();
    let bad = json!({"id": "bad", "commands": "oops"});
    seed(&server, &*crypto, CLIENTS_COLLECTION, "bad", bad, 0);
    let good = json!({"id": "good", "name": "Phone"});
    seed(&server, &*crypto, CLIENTS_COLLECTION, "good", good, 0);

    let outcome = laptop.engine.sync().unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.deleted, 1);
    assert!(server.record(USER, CLIENTS_COLLECTION, "bad").is_none());

    let remote = laptop.engine.remote_clients();
    assert_eq!(remote.keys().cloned().collect::<Vec<_>>(), vec!["good".to_string()]);
    assert_eq!(remote["good"].name, "Phone");

    // Nothing is left to trip over on the next sync.
    let outcome = laptop.engine.sync().unwrap();
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.deleted, 0);
}

#[test]
fn local_record_is_refreshed_periodically() {
    let server = server();
    let mut laptop = client(&server, "Laptop");
    laptop.engine.sync().unwrap();
    assert_eq!(laptop.engine.last_record_upload().unwrap(), START as i64);

    laptop.clock.advance(3600.0);
    let outcome = laptop.engine.sync().unwrap();
    assert_eq!(outcome.uploaded, 0);

    laptop.clock.advance(CLIENTS_TTL_REFRESH as f64);
    let outcome = laptop.engine.sync().unwrap();
    assert_eq!(outcome.uploaded, 1);
    assert_eq!(
        laptop.engine.last_record_upload().unwrap(),
        (START + 3600.0 + CLIENTS_TTL_REFRESH as f64) as i64
    );
}

#[test]
fn renaming_uploads_the_new_name() {
    let server = server();
    let (mut laptop, mut phone) = pair(&server);

    laptop.engine.set_local_name("Work laptop").unwrap();
    assert!(laptop.tracker.score() > 0);
    laptop.engine.sync().unwrap();
    phone.engine.sync().unwrap();

    assert_eq!(phone.engine.remote_clients()[&laptop.id()].name, "Work laptop");
}

#[test]
fn incoming_local_record_keeps_local_identity() {
    let server = server();
    let mut laptop = client(&server, "Laptop");
    laptop.engine.sync().unwrap();

    // Another install overwrote this client's record with stale details.
    let mut stale = ClientRecord::new(laptop.id(), "Someone else", ClientType::Mobile);
    stale.commands.push(recsync_protocol::Command::new("wipeAll", vec![]));
    seed(
        &server,
        &*account_crypto(),
        CLIENTS_COLLECTION,
        &laptop.id(),
        stale.to_cleartext().unwrap(),
        0,
    );

    laptop.engine.sync().unwrap();
    assert_eq!(laptop.engine.local_name().unwrap(), "Laptop");
    assert_eq!(laptop.engine.local_type().unwrap(), ClientType::Desktop);
    assert_eq!(laptop.engine.local_commands().len(), 1);
    assert!(laptop.engine.remote_clients().is_empty());
}

#[test]
fn removing_client_data_deletes_the_local_record() {
    let server = server();
    let (laptop, _phone) = pair(&server);

    laptop.engine.remove_client_data().unwrap();
    assert!(server.record(USER, CLIENTS_COLLECTION, &laptop.id()).is_none());
    assert_eq!(server.record_count(USER, CLIENTS_COLLECTION), 1);
}

#[test]
fn new_engine_refetches_every_client() {
    let server = server();
    let (laptop, _phone) = pair(&server);
    assert_eq!(laptop.engine.remote_clients().len(), 1);

    let prefs = laptop.engine.inner().state().prefs().clone();
    let parts = Collaborators::new(
        laptop.tracker.clone(),
        account_crypto(),
        resource(&server),
    )
    .with_clock(laptop.clock.clone());
    let mut restarted = ClientsEngine::new(ClientsConfig::new("Firefox"), prefs, parts).unwrap();
    assert!(restarted.remote_clients().is_empty());
    assert_eq!(restarted.inner().last_sync().unwrap(), 0.0);

    restarted.sync().unwrap();
    assert_eq!(restarted.remote_clients().len(), 1);
    assert_eq!(restarted.local_id().unwrap(), laptop.id());
}
