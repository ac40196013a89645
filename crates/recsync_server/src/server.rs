//! Main storage server.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::{HandlerContext, RequestHandler, Route, API_VERSION};
use parking_lot::Mutex;
use recsync_protocol::{HttpResponse, Method, Record, ServerTime};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// A request as seen by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedRequest {
    /// Method.
    pub method: Method,
    /// Path and query.
    pub path: String,
    /// Collection, when the path was a storage path.
    pub collection: Option<String>,
}

#[derive(Debug, Clone)]
struct Fault {
    method: Method,
    collection: Option<String>,
    status: u16,
}

impl Fault {
    fn matches(&self, method: Method, collection: Option<&str>) -> bool {
        self.method == method
            && self
                .collection
                .as_deref()
                .map_or(true, |wanted| collection == Some(wanted))
    }
}

/// The storage server.
///
/// Serves `/1.1/{user}/storage/{collection}[/{id}]` in process. Responses
/// carry the server clock in the `X-Weave-Timestamp` header. Failures can
/// be queued per method and collection to exercise client error paths.
///
/// # Example
///
/// ```
/// use recsync_protocol::Method;
/// use recsync_server::{ServerConfig, StorageServer};
///
/// let server = StorageServer::new(ServerConfig::default());
/// let response = server.handle(Method::Get, "/1.1/alice/storage/tabs?full=1", &[]);
/// assert_eq!(response.status, 200);
/// assert_eq!(response.body, b"[]");
/// ```
pub struct StorageServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    faults: Mutex<VecDeque<Fault>>,
    requests: Mutex<Vec<LoggedRequest>>,
}

impl StorageServer {
    /// Creates a new storage server.
    pub fn new(config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config));
        let handler = RequestHandler::new(Arc::clone(&context));
        Self {
            handler,
            context,
            faults: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns the storage URL for `user` under `base`, with a trailing slash.
    pub fn storage_url(base: &str, user: &str) -> String {
        format!("{}/{}/{}/storage/", base.trim_end_matches('/'), API_VERSION, user)
    }

    /// Handles one request.
    pub fn handle(&self, method: Method, path_and_query: &str, body: &[u8]) -> HttpResponse {
        let collection = Route::parse(path_and_query).ok().map(|r| r.collection);
        self.requests.lock().push(LoggedRequest {
            method,
            path: path_and_query.to_string(),
            collection: collection.clone(),
        });

        let result = match self.take_fault(method, collection.as_deref()) {
            Some(status) => Err(ServerError::Injected(status)),
            None => self.handler.handle(method, path_and_query, body),
        };
        match result {
            Ok((timestamp, body)) => HttpResponse::new(200, body).with_timestamp(timestamp),
            Err(e) => {
                if e.is_server_error() {
                    warn!(%method, path = path_and_query, error = %e, "Request failed");
                } else {
                    debug!(%method, path = path_and_query, error = %e, "Request refused");
                }
                let body = serde_json::to_vec(&e.to_string()).unwrap_or_default();
                HttpResponse::new(e.status(), body).with_timestamp(self.context.clock.now())
            }
        }
    }

    fn take_fault(&self, method: Method, collection: Option<&str>) -> Option<u16> {
        let mut faults = self.faults.lock();
        let index = faults.iter().position(|f| f.matches(method, collection))?;
        faults.remove(index).map(|f| f.status)
    }

    /// Fails the next request with `method` using `status`.
    pub fn fail_next(&self, method: Method, status: u16) {
        self.faults.lock().push_back(Fault {
            method,
            collection: None,
            status,
        });
    }

    /// Fails the next request with `method` on `collection` using `status`.
    pub fn fail_next_for(&self, method: Method, collection: &str, status: u16) {
        self.faults.lock().push_back(Fault {
            method,
            collection: Some(collection.to_string()),
            status,
        });
    }

    /// Drops queued failures.
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Makes POSTs report these ids as failed until cleared.
    pub fn reject_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.reject_ids(ids);
    }

    /// Accepts every id again.
    pub fn clear_rejected(&self) {
        self.context.clear_rejected();
    }

    /// Moves the server clock forward.
    pub fn advance_clock(&self, seconds: f64) {
        self.context.clock.advance(seconds);
    }

    /// Returns the server clock.
    pub fn now(&self) -> ServerTime {
        self.context.clock.now()
    }

    /// Returns every request handled so far.
    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.requests.lock().clone()
    }

    /// Counts requests with `method` on `collection`.
    pub fn request_count(&self, method: Method, collection: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && r.collection.as_deref() == Some(collection))
            .count()
    }

    /// Forgets logged requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Returns a stored, unexpired record.
    pub fn record(&self, user: &str, collection: &str, id: &str) -> Option<Record> {
        self.context
            .storage
            .fetch(user, collection, id, self.context.clock.now())
    }

    /// Returns the number of stored records in a collection.
    pub fn record_count(&self, user: &str, collection: &str) -> usize {
        self.context.storage.count(user, collection)
    }

    /// Stores a record directly, as another client's upload would.
    pub fn insert_record(&self, user: &str, collection: &str, record: Record) -> ServerTime {
        let timestamp = self.context.clock.tick();
        self.context.storage.put(user, collection, record, timestamp);
        timestamp
    }
}
