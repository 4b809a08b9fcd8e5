//! The catalog service: fetching, caching and querying wired together.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::CatalogConfig;
use crate::error::{CatalogError, format_error_chain};
use crate::fetcher::{CatalogFetcher, CatalogSource};
use crate::query::{
    BatchSearch,
    ComplianceReport,
    QueryEngine,
    SearchHit,
    Statistics,
    SupportInfo,
};
use crate::store::{CatalogStore, IndexedSnapshot};

/// Outcome of probing a single repository during [`DhiCatalog::self_test`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleCheck {
    pub repository: String,
    pub tag_count: usize,
    pub fips: bool,
    pub stig: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub support: Option<SupportInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfTestReport {
    pub success: bool,
    pub total_items: usize,
    pub by_type: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleCheck>,
}

impl SelfTestReport {
    fn failed(err: &CatalogError) -> Self {
        Self {
            success: false,
            total_items: 0,
            by_type: BTreeMap::new(),
            error: Some(format_error_chain(err)),
            sample: None,
        }
    }
}

/// Access to the hardened image catalog.
///
/// The catalog is fetched before the first query and again once it is older
/// than the configured maximum age. Concurrent callers that find the catalog
/// missing or stale share a single fetch.
#[derive(Debug)]
pub struct DhiCatalog<S = CatalogFetcher> {
    source: S,
    store: Arc<CatalogStore>,
    engine: QueryEngine,
    max_age: Option<Duration>,
    loading: Mutex<()>,
}

impl DhiCatalog<CatalogFetcher> {
    pub fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let fetcher = CatalogFetcher::new(config)?;
        Ok(Self::with_source(fetcher, config))
    }
}

impl<S: CatalogSource> DhiCatalog<S> {
    pub fn with_source(source: S, config: &CatalogConfig) -> Self {
        let store = Arc::new(CatalogStore::new());
        Self {
            source,
            engine: QueryEngine::new(Arc::clone(&store), config.search_cutoff),
            store,
            max_age: config.max_age(),
            loading: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    fn needs_load(&self) -> bool {
        match self.max_age {
            Some(max_age) => self.store.is_stale(max_age),
            None => !self.store.is_ready(),
        }
    }

    /// Make sure a sufficiently recent catalog is installed.
    ///
    /// If refetching a stale catalog fails, the stale one keeps being served.
    async fn ensure_fresh(&self) -> Result<(), CatalogError> {
        if !self.needs_load() {
            return Ok(());
        }

        let _loading = self.loading.lock().await;
        if !self.needs_load() {
            debug!("catalog loaded by a concurrent caller");
            return Ok(());
        }

        match self.source.fetch_all().await {
            Ok(snapshot) => {
                self.store.install(snapshot);
                Ok(())
            },
            Err(err) => match self.store.current() {
                Ok(stale) => {
                    warn!(
                        error = %format_error_chain(&err),
                        fetched_at = %stale.fetched_at(),
                        "failed to refresh catalog, serving cached catalog"
                    );
                    Ok(())
                },
                Err(_) => Err(err.into()),
            },
        }
    }

    /// Refetch the catalog regardless of its age.
    ///
    /// Callers arriving while a fetch is in flight receive the snapshot that
    /// fetch installs instead of starting another one.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Arc<IndexedSnapshot>, CatalogError> {
        let before = self.store.current().ok();

        let _loading = self.loading.lock().await;
        if let Ok(current) = self.store.current() {
            let replaced_meanwhile = before
                .as_ref()
                .is_none_or(|before| !Arc::ptr_eq(before, &current));
            if replaced_meanwhile {
                debug!("catalog refreshed by a concurrent caller");
                return Ok(current);
            }
        }

        let snapshot = self.source.fetch_all().await?;
        let installed = self.store.install(snapshot);
        info!(items = installed.len(), "refreshed catalog");
        Ok(installed)
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, CatalogError> {
        self.ensure_fresh().await?;
        self.engine.search(query, limit)
    }

    pub async fn search_many<Q: AsRef<str>>(
        &self,
        queries: &[Q],
    ) -> Result<BatchSearch, CatalogError> {
        self.ensure_fresh().await?;
        self.engine.search_many(queries)
    }

    pub async fn statistics(&self) -> Result<Statistics, CatalogError> {
        self.ensure_fresh().await?;
        self.engine.statistics()
    }

    pub async fn list_images(&self, type_filter: Option<&str>) -> Result<Vec<String>, CatalogError> {
        self.ensure_fresh().await?;
        self.engine.list_images(type_filter)
    }

    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>, CatalogError> {
        self.ensure_fresh().await?;
        self.engine.list_tags(repository)
    }

    pub async fn compliance_info(&self, repository: &str) -> Result<ComplianceReport, CatalogError> {
        self.ensure_fresh().await?;
        self.engine.compliance_info(repository)
    }

    pub async fn support_info(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<SupportInfo, CatalogError> {
        self.ensure_fresh().await?;
        self.engine.support_info(repository, tag)
    }

    /// Check credentials and catalog reachability by fetching the catalog and
    /// probing the first repository.
    ///
    /// Failures are reported in the returned report, never as an error.
    pub async fn self_test(&self) -> SelfTestReport {
        if let Err(err) = self.refresh().await {
            warn!(error = %format_error_chain(&err), "catalog self-test failed");
            return SelfTestReport::failed(&err);
        }

        let stats = match self.engine.statistics() {
            Ok(stats) => stats,
            Err(err) => return SelfTestReport::failed(&err),
        };

        SelfTestReport {
            success: true,
            total_items: stats.total,
            by_type: stats.by_type,
            error: None,
            sample: self.sample_check(),
        }
    }

    fn sample_check(&self) -> Option<SampleCheck> {
        let repository = self.engine.list_images(None).ok()?.into_iter().next()?;
        let tags = self.engine.list_tags(&repository).ok()?;
        let compliance = self.engine.compliance_info(&repository).ok()?;
        let support = tags
            .first()
            .and_then(|tag| self.engine.support_info(&repository, tag).ok());

        Some(SampleCheck {
            tag_count: tags.len(),
            fips: compliance.summary.fips_available,
            stig: compliance.summary.stig_available,
            support,
            repository,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;

    use super::*;
    use crate::error::{AuthError, FetchError};
    use crate::mock::MockSource;
    use crate::query::tests::{item, sample_catalog};
    use crate::types::{CatalogSnapshot, ItemKind};

    fn catalog(source: MockSource) -> DhiCatalog<MockSource> {
        DhiCatalog::with_source(source, &CatalogConfig::default())
    }

    #[tokio::test]
    async fn first_query_loads_catalog() {
        let catalog = catalog(MockSource::always(sample_catalog().items().to_vec()));
        assert!(!catalog.store().is_ready());

        let hits = catalog.search("kubectl", 5).await.unwrap();
        assert_eq!(hits[0].name, "kubectl");
        catalog.statistics().await.unwrap();
        assert_eq!(catalog.source().fetch_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_queries_share_one_fetch() {
        let source = MockSource::always(sample_catalog().items().to_vec())
            .with_delay(Duration::from_millis(50));
        let catalog = catalog(source);

        let (stats, images, tags) = tokio::join!(
            catalog.statistics(),
            catalog.list_images(None),
            catalog.list_tags("postgres"),
        );
        assert_eq!(stats.unwrap().total, 6);
        assert_eq!(images.unwrap().len(), 6);
        assert_eq!(tags.unwrap(), vec!["16", "15", "14-fips"]);
        assert_eq!(catalog.source().fetch_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_fetch() {
        let source = MockSource::always(sample_catalog().items().to_vec())
            .with_delay(Duration::from_millis(50));
        let catalog = catalog(source);

        let (a, b) = tokio::join!(catalog.refresh(), catalog.refresh());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(catalog.source().fetch_count(), 1);
    }

    #[tokio::test]
    async fn refresh_is_idempotent_without_upstream_change() {
        let catalog = catalog(MockSource::always(sample_catalog().items().to_vec()));

        let before = catalog.statistics().await.unwrap();
        catalog.refresh().await.unwrap();
        let after = catalog.statistics().await.unwrap();

        assert_eq!(before, after);
        assert_eq!(catalog.source().fetch_count(), 2);
    }

    #[tokio::test]
    async fn stale_catalog_is_refetched() {
        let source = MockSource::new();
        source.push_snapshot(CatalogSnapshot::with_timestamp(
            vec![item("nginx", ItemKind::Image, &["1.27"])],
            Utc::now() - TimeDelta::hours(2),
        ));
        source.push_snapshot(CatalogSnapshot::new(vec![
            item("nginx", ItemKind::Image, &["1.27"]),
            item("redis", ItemKind::Image, &["7"]),
        ]));
        let catalog = catalog(source);

        assert_eq!(catalog.statistics().await.unwrap().total, 1);
        assert_eq!(catalog.statistics().await.unwrap().total, 2);
        assert_eq!(catalog.source().fetch_count(), 2);
    }

    #[tokio::test]
    async fn failed_refetch_serves_stale_catalog() {
        let source = MockSource::new();
        source.push_snapshot(CatalogSnapshot::with_timestamp(
            vec![item("nginx", ItemKind::Image, &["1.27"])],
            Utc::now() - TimeDelta::hours(2),
        ));
        source.push_error(FetchError::Status(StatusCode::BAD_GATEWAY));
        let catalog = catalog(source);

        catalog.list_images(None).await.unwrap();
        let images = catalog.list_images(None).await.unwrap();
        assert_eq!(images, vec!["nginx"]);
        assert_eq!(catalog.source().fetch_count(), 2);
    }

    #[tokio::test]
    async fn failed_initial_fetch_is_reported() {
        let source = MockSource::new();
        source.push_error(FetchError::Auth(AuthError::MissingCredentials));
        let catalog = catalog(source);

        let result = catalog.search("nginx", 5).await;
        assert!(matches!(result, Err(CatalogError::Auth(AuthError::MissingCredentials))));
        assert!(!catalog.store().is_ready());
    }

    #[tokio::test]
    async fn zero_max_age_keeps_catalog() {
        let source = MockSource::always(vec![item("nginx", ItemKind::Image, &[])]);
        let config = CatalogConfig {
            max_age_secs: 0,
            ..Default::default()
        };
        let catalog = DhiCatalog::with_source(source, &config);

        catalog.statistics().await.unwrap();
        catalog.statistics().await.unwrap();
        assert_eq!(catalog.source().fetch_count(), 1);
    }

    #[tokio::test]
    async fn queries_read_a_consistent_snapshot_during_refresh() {
        let old = (0..50)
            .map(|i| item(&format!("old-{i}"), ItemKind::Image, &[]))
            .collect::<Vec<_>>();
        let new = (0..80)
            .map(|i| item(&format!("new-{i}"), ItemKind::HelmChart, &[]))
            .collect::<Vec<_>>();

        let source = MockSource::new().with_delay(Duration::from_millis(20));
        source.push_snapshot(CatalogSnapshot::new(old));
        source.push_snapshot(CatalogSnapshot::new(new));
        let catalog = catalog(source);
        catalog.statistics().await.unwrap();

        let reads = async {
            let mut seen = Vec::new();
            for _ in 0..20 {
                let stats = catalog.statistics().await.unwrap();
                seen.push(stats);
                tokio::task::yield_now().await;
            }
            seen
        };
        let (refreshed, seen) = tokio::join!(catalog.refresh(), reads);

        assert_eq!(refreshed.unwrap().len(), 80);
        for stats in seen {
            let consistent = stats.by_type == BTreeMap::from([("IMAGE".to_string(), 50)])
                || stats.by_type == BTreeMap::from([("HELM_CHART".to_string(), 80)]);
            assert!(consistent, "mixed snapshot: {stats:?}");
        }
    }

    #[tokio::test]
    async fn self_test_reports_catalog_contents() {
        let catalog = catalog(MockSource::always(sample_catalog().items().to_vec()));
        let report = catalog.self_test().await;

        assert!(report.success);
        assert_eq!(report.total_items, 6);
        assert_eq!(report.by_type["IMAGE"], 4);
        assert_eq!(report.error, None);

        let sample = report.sample.unwrap();
        assert_eq!(sample.repository, "azure-cli");
        assert_eq!(sample.tag_count, 1);
        assert_eq!(sample.support.unwrap().tag, "2.67");
    }

    #[tokio::test]
    async fn self_test_reports_failure() {
        let source = MockSource::new();
        source.push_error(FetchError::Auth(AuthError::Rejected(StatusCode::UNAUTHORIZED)));
        let catalog = catalog(source);

        let report = catalog.self_test().await;
        assert!(!report.success);
        assert_eq!(report.total_items, 0);
        assert_eq!(
            report.error.as_deref(),
            Some("authentication failed: credentials rejected by the registry (401 Unauthorized)")
        );
    }
}
