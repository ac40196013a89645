//! Collection-level request and response messages.

use crate::record::Record;
use crate::ServerTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server-defined ordering for collection GETs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Highest sort index (weight) first.
    Index,
    /// Most recently modified first.
    Newest,
    /// Least recently modified first.
    Oldest,
}

impl SortOrder {
    /// Returns the query-string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Index => "index",
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
        }
    }

    /// Parses the query-string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "index" => Some(SortOrder::Index),
            "newest" => Some(SortOrder::Newest),
            "oldest" => Some(SortOrder::Oldest),
            _ => None,
        }
    }
}

/// Filters for a collection GET.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionQuery {
    /// Only records modified strictly after this server time.
    pub newer: Option<ServerTime>,
    /// Return full records instead of ids only.
    pub full: bool,
    /// Maximum number of rows.
    pub limit: Option<usize>,
    /// Only these ids.
    pub ids: Vec<String>,
    /// Ordering.
    pub sort: Option<SortOrder>,
}

impl CollectionQuery {
    /// A query returning full records.
    pub fn full() -> Self {
        Self {
            full: true,
            ..Self::default()
        }
    }

    /// A query returning ids only.
    pub fn ids_only() -> Self {
        Self::default()
    }

    /// Sets the `newer` lower bound.
    pub fn newer(mut self, newer: ServerTime) -> Self {
        self.newer = Some(newer);
        self
    }

    /// Sets the row limit.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restricts to explicit ids.
    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = ids;
        self
    }

    /// Sets the ordering.
    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Renders the query as `key=value` pairs, in a stable order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(newer) = self.newer {
            pairs.push(("newer", newer.to_string()));
        }
        if self.full {
            pairs.push(("full", "1".to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if !self.ids.is_empty() {
            pairs.push(("ids", self.ids.join(",")));
        }
        if let Some(sort) = self.sort {
            pairs.push(("sort", sort.as_str().to_string()));
        }
        pairs
    }

    /// Parses `key=value` pairs. Unknown keys and malformed values are ignored.
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            match key {
                "newer" => query.newer = value.parse().ok(),
                "full" => query.full = !value.is_empty() && value != "0",
                "limit" => query.limit = value.parse::<usize>().ok().filter(|l| *l > 0),
                "ids" => {
                    query.ids = value
                        .split(',')
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                "sort" => query.sort = SortOrder::parse(value),
                _ => {}
            }
        }
        query
    }
}

/// Rows returned by a collection GET.
#[derive(Debug, Clone, PartialEq)]
pub enum GetItems {
    /// Full records (`full=1`).
    Full(Vec<Record>),
    /// Ids only.
    Ids(Vec<String>),
}

impl GetItems {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            GetItems::Full(records) => records.len(),
            GetItems::Ids(ids) => ids.len(),
        }
    }

    /// Returns true if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Response to a collection GET.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResponse {
    /// Server time when the response was produced.
    pub timestamp: ServerTime,
    /// Returned rows.
    pub items: GetItems,
}

/// Body of a batched POST response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostResult {
    /// Ids the server stored.
    #[serde(default)]
    pub success: Vec<String>,
    /// Ids the server rejected, with a reason.
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

/// Response to a batched POST.
#[derive(Debug, Clone, PartialEq)]
pub struct PostResponse {
    /// Server time of the write.
    pub timestamp: ServerTime,
    /// Per-id outcome.
    pub result: PostResult,
}

/// Selection for a collection DELETE.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteFilter {
    /// Delete these ids.
    Ids(Vec<String>),
    /// Delete by a query property, e.g. `older=<time>`.
    Property {
        /// Query key.
        key: String,
        /// Query value.
        value: String,
    },
}

impl DeleteFilter {
    /// Renders the filter as a single `key=value` pair.
    pub fn to_pair(&self) -> (String, String) {
        match self {
            DeleteFilter::Ids(ids) => ("ids".to_string(), ids.join(",")),
            DeleteFilter::Property { key, value } => (key.clone(), value.clone()),
        }
    }
}
