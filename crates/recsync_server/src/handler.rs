//! Request handlers for storage endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::storage::{RecordStorage, ServerClock};
use parking_lot::RwLock;
use recsync_protocol::{CollectionQuery, Method, Record, ServerTime};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Protocol version prefix of every storage path.
pub const API_VERSION: &str = "1.1";

/// Shared state behind every request.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Stored records.
    pub storage: RecordStorage,
    /// Timestamp source.
    pub clock: ServerClock,
    rejected: RwLock<HashSet<String>>,
}

impl HandlerContext {
    /// Creates a context with empty storage.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            storage: RecordStorage::new(),
            clock: ServerClock::new(),
            rejected: RwLock::new(HashSet::new()),
        }
    }

    /// Makes POSTs report these ids as failed.
    pub fn reject_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected.write().extend(ids.into_iter().map(Into::into));
    }

    /// Accepts every id again.
    pub fn clear_rejected(&self) {
        self.rejected.write().clear();
    }
}

/// A parsed storage path.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Account name.
    pub user: String,
    /// Collection name.
    pub collection: String,
    /// Record ID, for single-record routes.
    pub id: Option<String>,
    /// Decoded query pairs.
    pub query: Vec<(String, String)>,
}

impl Route {
    /// Parses `/1.1/{user}/storage/{collection}[/{id}][?query]`.
    pub fn parse(path_and_query: &str) -> ServerResult<Self> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, query),
            None => (path_and_query, ""),
        };
        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                url::form_urlencoded::parse(format!("s={}", s).as_bytes())
                    .next()
                    .map(|(_, value)| value.into_owned())
                    .unwrap_or_default()
            })
            .collect();

        let (user, collection, id) = match segments.as_slice() {
            [version, user, storage, collection] if version == API_VERSION && storage == "storage" => {
                (user.clone(), collection.clone(), None)
            }
            [version, user, storage, collection, id]
                if version == API_VERSION && storage == "storage" =>
            {
                (user.clone(), collection.clone(), Some(id.clone()))
            }
            _ => return Err(ServerError::NotFound(path.to_string())),
        };

        let query = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Ok(Self {
            user,
            collection,
            id,
            query,
        })
    }

    fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn collection_query(&self) -> CollectionQuery {
        CollectionQuery::from_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Handler for storage requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a request. Returns the server timestamp and the JSON body.
    pub fn handle(
        &self,
        method: Method,
        path_and_query: &str,
        body: &[u8],
    ) -> ServerResult<(ServerTime, Vec<u8>)> {
        let route = Route::parse(path_and_query)?;
        if let Some(user) = &self.context.config.user {
            if *user != route.user {
                return Err(ServerError::NotAuthorized(route.user));
            }
        }
        trace!(%method, collection = %route.collection, id = ?route.id, "Handling request");

        match (method, route.id.clone()) {
            (Method::Get, None) => self.handle_get(&route),
            (Method::Get, Some(id)) => self.handle_fetch(&route, &id),
            (Method::Post, None) => self.handle_post(&route, body),
            (Method::Put, Some(id)) => self.handle_put(&route, &id, body),
            (Method::Delete, None) => self.handle_delete(&route),
            (Method::Delete, Some(id)) => self.handle_delete_record(&route, &id),
            (method, _) => Err(ServerError::MethodNotAllowed(format!(
                "{} {}",
                method, path_and_query
            ))),
        }
    }

    fn handle_get(&self, route: &Route) -> ServerResult<(ServerTime, Vec<u8>)> {
        let mut query = route.collection_query();
        if let Some(max) = self.context.config.max_get_limit {
            query.limit = Some(query.limit.map_or(max, |limit| limit.min(max)));
        }
        let now = self.context.clock.now();
        let records = self
            .context
            .storage
            .query(&route.user, &route.collection, &query, now);
        debug!(collection = %route.collection, count = records.len(), full = query.full, "GET");

        let body = if query.full {
            serde_json::to_vec(&records)?
        } else {
            let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
            serde_json::to_vec(&ids)?
        };
        Ok((now, body))
    }

    fn handle_fetch(&self, route: &Route, id: &str) -> ServerResult<(ServerTime, Vec<u8>)> {
        let now = self.context.clock.now();
        let record = self
            .context
            .storage
            .fetch(&route.user, &route.collection, id, now)
            .ok_or_else(|| ServerError::NotFound(format!("{}/{}", route.collection, id)))?;
        Ok((now, serde_json::to_vec(&record)?))
    }

    fn handle_post(&self, route: &Route, body: &[u8]) -> ServerResult<(ServerTime, Vec<u8>)> {
        let records: Vec<Record> = serde_json::from_slice(body)?;
        let max = self.context.config.max_post_records;
        if records.len() > max {
            return Err(ServerError::TooManyRecords {
                got: records.len(),
                max,
            });
        }
        let timestamp = self.context.clock.tick();
        let rejected = self.context.rejected.read().clone();
        let result = self.context.storage.post(
            &route.user,
            &route.collection,
            records,
            timestamp,
            &rejected,
        );
        debug!(
            collection = %route.collection,
            success = result.success.len(),
            failed = result.failed.len(),
            "POST"
        );
        Ok((timestamp, serde_json::to_vec(&result)?))
    }

    fn handle_put(&self, route: &Route, id: &str, body: &[u8]) -> ServerResult<(ServerTime, Vec<u8>)> {
        let mut record: Record = serde_json::from_slice(body)?;
        if record.id != id {
            if !record.id.is_empty() {
                return Err(ServerError::InvalidRequest(format!(
                    "record id {} does not match path {}",
                    record.id, id
                )));
            }
            record.id = id.to_string();
        }
        let timestamp = self.context.clock.tick();
        self.context
            .storage
            .put(&route.user, &route.collection, record, timestamp);
        Ok((timestamp, serde_json::to_vec(&timestamp)?))
    }

    fn handle_delete(&self, route: &Route) -> ServerResult<(ServerTime, Vec<u8>)> {
        let storage = &self.context.storage;
        let timestamp = self.context.clock.tick();
        let deleted = if let Some(ids) = route.query_value("ids") {
            let ids: Vec<String> = ids
                .split(',')
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            storage.delete_ids(&route.user, &route.collection, &ids)
        } else if let Some(older) = route.query_value("older") {
            let older: ServerTime = older
                .parse()
                .map_err(|_| ServerError::InvalidRequest(format!("bad older value: {}", older)))?;
            storage.delete_older(&route.user, &route.collection, older)
        } else {
            let count = storage.count(&route.user, &route.collection);
            storage.wipe(&route.user, &route.collection);
            count
        };
        debug!(collection = %route.collection, deleted, "DELETE");
        Ok((timestamp, serde_json::to_vec(&timestamp)?))
    }

    fn handle_delete_record(&self, route: &Route, id: &str) -> ServerResult<(ServerTime, Vec<u8>)> {
        let timestamp = self.context.clock.tick();
        self.context
            .storage
            .delete_ids(&route.user, &route.collection, &[id.to_string()]);
        Ok((timestamp, serde_json::to_vec(&timestamp)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsync_protocol::PostResult;

    fn handler() -> RequestHandler {
        RequestHandler::new(Arc::new(HandlerContext::new(ServerConfig::default())))
    }

    #[test]
    fn routes_parse() {
        let route = Route::parse("/1.1/alice/storage/tabs/abc?ids=a%2Cb&full=1").unwrap();
        assert_eq!(route.user, "alice");
        assert_eq!(route.collection, "tabs");
        assert_eq!(route.id.as_deref(), Some("abc"));
        assert_eq!(route.query_value("ids"), Some("a,b"));

        assert!(Route::parse("/1.0/alice/storage/tabs").is_err());
        assert!(Route::parse("/1.1/alice/info/collections").is_err());
    }

    #[test]
    fn post_then_get() {
        let handler = handler();
        let records = vec![Record::new("", "a", "x"), Record::new("", "b", "y")];
        let (posted_at, body) = handler
            .handle(
                Method::Post,
                "/1.1/alice/storage/tabs",
                &serde_json::to_vec(&records).unwrap(),
            )
            .unwrap();
        let result: PostResult = serde_json::from_slice(&body).unwrap();
        assert_eq!(result.success.len(), 2);

        let (_, body) = handler
            .handle(Method::Get, "/1.1/alice/storage/tabs?full=1", &[])
            .unwrap();
        let fetched: Vec<Record> = serde_json::from_slice(&body).unwrap();
        assert_eq!(fetched.len(), 2);
        assert!(fetched.iter().all(|r| r.modified == posted_at));

        let newer = format!("/1.1/alice/storage/tabs?newer={}", posted_at);
        let (_, body) = handler.handle(Method::Get, &newer, &[]).unwrap();
        let ids: Vec<String> = serde_json::from_slice(&body).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn fetch_missing_is_not_found() {
        let err = handler()
            .handle(Method::Get, "/1.1/alice/storage/meta/global", &[])
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[test]
    fn oversized_post_is_rejected() {
        let context = Arc::new(HandlerContext::new(
            ServerConfig::default().with_max_post_records(1),
        ));
        let handler = RequestHandler::new(context);
        let records = vec![Record::new("", "a", "x"), Record::new("", "b", "y")];
        let err = handler
            .handle(
                Method::Post,
                "/1.1/alice/storage/tabs",
                &serde_json::to_vec(&records).unwrap(),
            )
            .unwrap_err();
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn wrong_user_is_refused() {
        let context = Arc::new(HandlerContext::new(ServerConfig::default().with_user("alice")));
        let handler = RequestHandler::new(context);
        let err = handler
            .handle(Method::Get, "/1.1/bob/storage/tabs", &[])
            .unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn delete_by_ids() {
        let handler = handler();
        let records = vec![Record::new("", "a", "x"), Record::new("", "b", "y")];
        handler
            .handle(
                Method::Post,
                "/1.1/alice/storage/tabs",
                &serde_json::to_vec(&records).unwrap(),
            )
            .unwrap();
        handler
            .handle(Method::Delete, "/1.1/alice/storage/tabs?ids=a", &[])
            .unwrap();
        assert_eq!(handler.context.storage.count("alice", "tabs"), 1);

        handler
            .handle(Method::Delete, "/1.1/alice/storage/tabs", &[])
            .unwrap();
        assert_eq!(handler.context.storage.count("alice", "tabs"), 0);
    }
}
