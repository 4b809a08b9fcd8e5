//! In-memory holder of the current catalog snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::error::CatalogError;
use crate::types::{CatalogItem, CatalogSnapshot, ItemKind};

/// A snapshot together with the lookup indices derived from it.
#[derive(Debug)]
pub struct IndexedSnapshot {
    snapshot: CatalogSnapshot,
    by_name: HashMap<String, usize>,
    by_lowercase_name: HashMap<String, usize>,
    by_kind: BTreeMap<ItemKind, Vec<usize>>,
}

impl IndexedSnapshot {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        let mut by_name = HashMap::with_capacity(snapshot.len());
        let mut by_lowercase_name = HashMap::with_capacity(snapshot.len());
        let mut by_kind: BTreeMap<ItemKind, Vec<usize>> = BTreeMap::new();

        for (index, item) in snapshot.items().iter().enumerate() {
            by_name.entry(item.name.clone()).or_insert(index);
            by_lowercase_name
                .entry(item.name.to_lowercase())
                .or_insert(index);
            by_kind.entry(item.kind.clone()).or_default().push(index);
        }

        Self {
            snapshot,
            by_name,
            by_lowercase_name,
            by_kind,
        }
    }

    pub fn items(&self) -> &[CatalogItem] {
        self.snapshot.items()
    }

    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.snapshot.fetched_at()
    }

    /// Case-insensitive exact lookup; a case-sensitive match wins if the
    /// catalog holds names differing only in case.
    pub fn find(&self, name: &str) -> Option<&CatalogItem> {
        let name = name.trim();
        self.by_name
            .get(name)
            .or_else(|| self.by_lowercase_name.get(&name.to_lowercase()))
            .map(|&index| &self.snapshot.items()[index])
    }

    pub fn kinds(&self) -> impl Iterator<Item = (&ItemKind, usize)> {
        self.by_kind
            .iter()
            .map(|(kind, indices)| (kind, indices.len()))
    }

    /// The indexed kind an upstream type name refers to, ignoring case.
    pub fn kind_named(&self, name: &str) -> Option<&ItemKind> {
        let wanted = ItemKind::from_upstream(name);
        match self.by_kind.get_key_value(&wanted) {
            Some((kind, _)) => Some(kind),
            None => self.by_kind.keys().find(|kind| kind.matches(name)),
        }
    }

    pub fn of_kind<'a>(&'a self, kind: &'a ItemKind) -> impl Iterator<Item = &'a CatalogItem> {
        self.by_kind
            .get(kind)
            .into_iter()
            .flatten()
            .map(|&index| &self.snapshot.items()[index])
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        Utc::now().signed_duration_since(self.fetched_at()) > max_age
    }
}

/// Holds the most recently installed snapshot.
///
/// Readers clone an [`Arc`] to the current snapshot and keep using it even if
/// a newer one is installed meanwhile.
#[derive(Debug, Default)]
pub struct CatalogStore {
    current: RwLock<Option<Arc<IndexedSnapshot>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot, returning the installed one.
    pub fn install(&self, snapshot: CatalogSnapshot) -> Arc<IndexedSnapshot> {
        let indexed = Arc::new(IndexedSnapshot::new(snapshot));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&indexed));
        debug!(
            items = indexed.len(),
            fetched_at = %indexed.fetched_at(),
            "installed catalog snapshot"
        );
        indexed
    }

    pub fn current(&self) -> Result<Arc<IndexedSnapshot>, CatalogError> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CatalogError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.current().is_ok()
    }

    /// Whether the catalog should be refetched: nothing is installed yet, or
    /// the installed snapshot is older than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.current() {
            Ok(snapshot) => snapshot.is_older_than(max_age),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TagRecord;

    fn snapshot(names: &[(&str, ItemKind)]) -> CatalogSnapshot {
        CatalogSnapshot::new(
            names
                .iter()
                .map(|(name, kind)| CatalogItem::new(*name, kind.clone(), vec![TagRecord::new("1")]))
                .collect(),
        )
    }

    #[test]
    fn empty_store_is_not_ready() {
        let store = CatalogStore::new();
        assert!(matches!(store.current(), Err(CatalogError::NotReady)));
        assert!(store.is_stale(Duration::from_secs(3600)));
    }

    #[test]
    fn install_replaces_snapshot() {
        let store = CatalogStore::new();
        let first = store.install(snapshot(&[("nginx", ItemKind::Image)]));
        let second = store.install(snapshot(&[
            ("nginx", ItemKind::Image),
            ("redis", ItemKind::Image),
        ]));

        let current = store.current().unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        // readers holding the old snapshot are unaffected
        assert_eq!(first.len(), 1);
        assert_eq!(current.len(), 2);
    }

    #[test]
    fn find_is_case_insensitive() {
        let indexed = IndexedSnapshot::new(snapshot(&[
            ("PostgreSQL", ItemKind::Image),
            ("postgresql", ItemKind::HelmChart),
        ]));

        assert_eq!(indexed.find("postgresql").unwrap().kind, ItemKind::HelmChart);
        assert_eq!(indexed.find("PostgreSQL").unwrap().kind, ItemKind::Image);
        assert_eq!(indexed.find(" POSTGRESQL ").unwrap().kind, ItemKind::Image);
        assert!(indexed.find("postgres").is_none());
    }

    #[test]
    fn kind_index() {
        let indexed = IndexedSnapshot::new(snapshot(&[
            ("nginx", ItemKind::Image),
            ("helm-grafana", ItemKind::HelmChart),
            ("redis", ItemKind::Image),
        ]));

        let images = indexed
            .of_kind(&ItemKind::Image)
            .map(|item| item.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(images, vec!["nginx", "redis"]);
        assert_eq!(
            indexed.kinds().collect::<Vec<_>>(),
            vec![(&ItemKind::Image, 2), (&ItemKind::HelmChart, 1)]
        );
        assert_eq!(indexed.of_kind(&ItemKind::Other("X".into())).count(), 0);
    }

    #[test]
    fn kind_named_resolves_upstream_names() {
        let indexed = IndexedSnapshot::new(snapshot(&[
            ("nginx", ItemKind::Image),
            ("redis", ItemKind::Other("WASM".to_string())),
        ]));

        assert_eq!(indexed.kind_named("image"), Some(&ItemKind::Image));
        assert_eq!(
            indexed.kind_named("Wasm"),
            Some(&ItemKind::Other("WASM".to_string()))
        );
        assert_eq!(indexed.kind_named("HELM_CHART"), None);
    }

    #[test]
    fn staleness_follows_snapshot_age() {
        let store = CatalogStore::new();
        let old = Utc::now() - TimeDelta::hours(2);
        store.install(CatalogSnapshot::with_timestamp(vec![], old));

        assert!(store.is_stale(Duration::from_secs(3600)));
        assert!(!store.is_stale(Duration::from_secs(3 * 3600)));
        assert!(!store.is_stale(Duration::MAX));
    }
}
