//! HTTP collection resource.
//!
//! The actual HTTP client is abstracted via a trait so hosts can plug in
//! whichever library they already use. [`LoopbackClient`] routes requests
//! straight into an in-process server for tests.

use crate::error::{SyncError, SyncResult};
use crate::resource::CollectionResource;
use parking_lot::RwLock;
use recsync_protocol::{
    CollectionQuery, DeleteFilter, GetItems, GetResponse, HttpRequest, HttpResponse, Method,
    PostResponse, PostResult, Record, ServerTime,
};
use tracing::{debug, trace};
use url::Url;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Executes a request. `Err` means no response was received.
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// [`CollectionResource`] speaking the storage protocol over HTTP.
///
/// Collections live under `<storage_url>/<collection>`, records under
/// `<storage_url>/<collection>/<id>`.
pub struct HttpCollection<C: HttpClient> {
    storage_url: Url,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpCollection<C> {
    /// Creates a resource rooted at `storage_url`.
    pub fn new(storage_url: &str, client: C) -> SyncResult<Self> {
        let storage_url = Url::parse(storage_url)
            .map_err(|e| SyncError::transport_fatal(format!("invalid storage URL: {}", e)))?;
        if storage_url.cannot_be_a_base() {
            return Err(SyncError::transport_fatal("storage URL cannot be a base"));
        }
        Ok(Self {
            storage_url,
            client,
            last_error: RwLock::new(None),
        })
    }

    /// Returns the storage URL.
    pub fn storage_url(&self) -> &str {
        self.storage_url.as_str()
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn url(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.storage_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::transport_fatal("storage URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        if !self.client.is_healthy() {
            return Err(SyncError::NotConnected);
        }
        trace!(method = %request.method, url = %request.url, "Sending request");
        let url = request.url.clone();
        let response = self.client.execute(request).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        if !response.is_success() {
            debug!(status = response.status, %url, "Request failed");
            return Err(SyncError::Http {
                status: response.status,
                url,
            });
        }
        Ok(response)
    }

    fn timestamp(response: &HttpResponse) -> SyncResult<ServerTime> {
        response
            .timestamp()
            .ok_or_else(|| SyncError::transport_fatal("response without server timestamp"))
    }
}

impl<C: HttpClient> CollectionResource for HttpCollection<C> {
    fn get(&self, collection: &str, query: &CollectionQuery) -> SyncResult<GetResponse> {
        let mut url = self.url(&[collection])?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.to_pairs() {
                pairs.append_pair(key, &value);
            }
        }
        let response = self.send(HttpRequest::new(Method::Get, url.as_str()))?;
        let timestamp = Self::timestamp(&response)?;

        let items = if query.full {
            let mut records: Vec<Record> = serde_json::from_slice(&response.body)?;
            for record in &mut records {
                record.collection = collection.to_string();
            }
            GetItems::Full(records)
        } else {
            GetItems::Ids(serde_json::from_slice(&response.body)?)
        };
        Ok(GetResponse { timestamp, items })
    }

    fn post(&self, collection: &str, records: &[Record]) -> SyncResult<PostResponse> {
        let url = self.url(&[collection])?;
        let body = serde_json::to_vec(records)?;
        let response =
            self.send(HttpRequest::new(Method::Post, url.as_str()).with_body(body))?;
        let timestamp = Self::timestamp(&response)?;
        let result: PostResult = serde_json::from_slice(&response.body)?;
        Ok(PostResponse { timestamp, result })
    }

    fn delete(&self, collection: &str, filter: &DeleteFilter) -> SyncResult<ServerTime> {
        let mut url = self.url(&[collection])?;
        let (key, value) = filter.to_pair();
        url.query_pairs_mut().append_pair(&key, &value);
        let response = self.send(HttpRequest::new(Method::Delete, url.as_str()))?;
        Self::timestamp(&response)
    }

    fn wipe(&self, collection: &str) -> SyncResult<ServerTime> {
        let url = self.url(&[collection])?;
        let response = self.send(HttpRequest::new(Method::Delete, url.as_str()))?;
        Self::timestamp(&response)
    }

    fn fetch(&self, collection: &str, id: &str) -> SyncResult<Option<Record>> {
        let url = self.url(&[collection, id])?;
        match self.send(HttpRequest::new(Method::Get, url.as_str())) {
            Ok(response) => {
                let mut record: Record = serde_json::from_slice(&response.body)?;
                record.collection = collection.to_string();
                Ok(Some(record))
            }
            Err(SyncError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put(&self, collection: &str, record: &Record) -> SyncResult<ServerTime> {
        let url = self.url(&[collection, &record.id])?;
        let body = serde_json::to_vec(record)?;
        let response = self.send(HttpRequest::new(Method::Put, url.as_str()).with_body(body))?;
        Self::timestamp(&response)
    }

    fn delete_record(&self, collection: &str, id: &str) -> SyncResult<ServerTime> {
        let url = self.url(&[collection, id])?;
        let response = self.send(HttpRequest::new(Method::Delete, url.as_str()))?;
        Self::timestamp(&response)
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a request for `path_and_query` (e.g. `/1.1/u/storage/tabs?full=1`).
    fn handle(&self, method: Method, path_and_query: &str, body: &[u8]) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let url = Url::parse(&request.url).map_err(|e| e.to_string())?;
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let body = request.body.unwrap_or_default();
        Ok(self.server.handle(request.method, &path, &body))
    }
}
