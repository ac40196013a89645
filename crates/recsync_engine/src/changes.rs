//! Per-sync working sets.

use recsync_protocol::DeleteFilter;
use std::collections::BTreeMap;

/// Ids with pending local changes, mapped to the local change time in seconds.
///
/// Built at startup; ids leave it as uploads are confirmed. Whatever remains
/// at cleanup goes back to the tracker.
pub type ModifiedSet = BTreeMap<String, f64>;

/// Remote deletions accumulated during a sync and flushed at finish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSet {
    ids: Vec<String>,
    properties: BTreeMap<String, String>,
}

impl DeleteSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules deletion of `id`.
    pub fn delete_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    /// Schedules a delete by query property, e.g. `older=<time>`.
    pub fn delete_where(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Returns the scheduled ids.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Returns true if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.properties.is_empty()
    }

    /// Drains the set into DELETE filters, at most `chunk_size` ids per filter.
    pub fn take_filters(&mut self, chunk_size: usize) -> Vec<DeleteFilter> {
        let mut filters: Vec<DeleteFilter> = std::mem::take(&mut self.properties)
            .into_iter()
            .map(|(key, value)| DeleteFilter::Property { key, value })
            .collect();
        let ids = std::mem::take(&mut self.ids);
        filters.extend(
            ids.chunks(chunk_size.max(1))
                .map(|chunk| DeleteFilter::Ids(chunk.to_vec())),
        );
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_chunked() {
        let mut deletes = DeleteSet::new();
        for i in 0..250 {
            deletes.delete_id(format!("id{}", i));
        }
        let filters = deletes.take_filters(100);
        let sizes: Vec<usize> = filters
            .iter()
            .map(|f| match f {
                DeleteFilter::Ids(ids) => ids.len(),
                DeleteFilter::Property { .. } => 0,
            })
            .collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert!(deletes.is_empty());
    }

    #[test]
    fn duplicate_ids_are_scheduled_once() {
        let mut deletes = DeleteSet::new();
        deletes.delete_id("a");
        deletes.delete_id("a");
        assert_eq!(deletes.ids(), ["a".to_string()]);
    }

    #[test]
    fn properties_come_first() {
        let mut deletes = DeleteSet::new();
        deletes.delete_id("a");
        deletes.delete_where("older", "100");
        let filters = deletes.take_filters(100);
        assert!(matches!(filters[0], DeleteFilter::Property { .. }));
        assert_eq!(filters[1], DeleteFilter::Ids(vec!["a".into()]));
    }
}
