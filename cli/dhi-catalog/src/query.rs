//! Read-only queries over the installed catalog snapshot.
//!
//! Every query takes the snapshot current at the time of the call and works
//! on it alone, so results never mix items from two snapshots.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::Serialize;
use serde_with::SerializeDisplay;

use crate::error::CatalogError;
use crate::similarity::QueryMatcher;
use crate::store::{CatalogStore, IndexedSnapshot};
use crate::types::{CatalogItem, ComplianceFlags, ItemKind};
use crate::version::sort_tags;

/// Number of names reported per query by [`QueryEngine::search_many`].
pub const BATCH_MATCHES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_searched: usize,
    pub matched_count: usize,
    pub unmatched_count: usize,
}

/// Results of resolving several queries at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSearch {
    /// Best matching names per query that found anything.
    pub matched: BTreeMap<String, Vec<String>>,
    /// Queries without any match, in the order given.
    pub unmatched: Vec<String>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceSummary {
    pub total_tags: usize,
    pub fips_available: bool,
    pub stig_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub repository: String,
    pub tags: BTreeMap<String, ComplianceFlags>,
    pub summary: ComplianceSummary,
    pub fips_tags: Vec<String>,
    pub stig_tags: Vec<String>,
}

/// A lifecycle date, or an explicit marker that none was published.
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay)]
pub enum LifecycleDate {
    Date(String),
    NotSpecified,
}

impl LifecycleDate {
    pub const NOT_SPECIFIED: &'static str = "not specified";
}

impl From<Option<String>> for LifecycleDate {
    fn from(date: Option<String>) -> Self {
        match date {
            Some(date) if !date.trim().is_empty() => LifecycleDate::Date(date),
            _ => LifecycleDate::NotSpecified,
        }
    }
}

impl Display for LifecycleDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleDate::Date(date) => write!(f, "{date}"),
            LifecycleDate::NotSpecified => write!(f, "{}", Self::NOT_SPECIFIED),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportInfo {
    pub repository: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub end_of_life: LifecycleDate,
    pub end_of_support: LifecycleDate,
}

/// Answers catalog queries from the snapshot held by a [`CatalogStore`].
///
/// The engine never fetches; a store without a snapshot yields
/// [`CatalogError::NotReady`].
#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<CatalogStore>,
    cutoff: f64,
}

impl QueryEngine {
    pub fn new(store: Arc<CatalogStore>, cutoff: f64) -> Self {
        Self { store, cutoff }
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn snapshot(&self) -> Result<Arc<IndexedSnapshot>, CatalogError> {
        self.store.current()
    }

    /// Fuzzy search over repository names.
    ///
    /// Returns at most `limit` hits scoring at least the cutoff, best first
    /// and alphabetically among equal scores.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, CatalogError> {
        let snapshot = self.snapshot()?;
        Ok(self.rank(&snapshot, query, limit))
    }

    fn rank(&self, snapshot: &IndexedSnapshot, query: &str, limit: usize) -> Vec<SearchHit> {
        let matcher = QueryMatcher::new(query);
        if matcher.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut hits = snapshot
            .items()
            .iter()
            .filter(|item| matcher.satisfies_keywords(&item.name, item.tag_names()))
            .filter_map(|item| {
                let score = matcher.score(&item.name);
                (score >= self.cutoff).then(|| SearchHit {
                    name: item.name.clone(),
                    kind: item.kind.clone(),
                    score,
                })
            })
            .collect::<Vec<_>>();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        hits.truncate(limit);
        hits
    }

    /// Resolve several queries against the same snapshot.
    pub fn search_many<S: AsRef<str>>(&self, queries: &[S]) -> Result<BatchSearch, CatalogError> {
        let snapshot = self.snapshot()?;
        let mut batch = BatchSearch::default();

        for query in queries {
            let query = query.as_ref();
            let hits = self.rank(&snapshot, query, BATCH_MATCHES);
            if hits.is_empty() {
                batch.unmatched.push(query.to_string());
            } else {
                batch.matched.insert(
                    query.to_string(),
                    hits.into_iter().map(|hit| hit.name).collect(),
                );
            }
        }

        batch.summary = BatchSummary {
            total_searched: queries.len(),
            matched_count: batch.matched.len(),
            unmatched_count: batch.unmatched.len(),
        };
        Ok(batch)
    }

    pub fn statistics(&self) -> Result<Statistics, CatalogError> {
        let snapshot = self.snapshot()?;
        let mut by_type = BTreeMap::new();
        for (kind, count) in snapshot.kinds() {
            *by_type.entry(kind.to_string()).or_default() += count;
        }
        Ok(Statistics {
            total: snapshot.len(),
            by_type,
        })
    }

    /// All repository names, optionally only those of one type.
    pub fn list_images(&self, type_filter: Option<&str>) -> Result<Vec<String>, CatalogError> {
        let snapshot = self.snapshot()?;
        let type_filter = type_filter.map(str::trim).filter(|kind| !kind.is_empty());

        let mut names = match type_filter {
            None => snapshot
                .items()
                .iter()
                .map(|item| item.name.clone())
                .collect::<Vec<_>>(),
            Some(filter) => match snapshot.kind_named(filter) {
                Some(kind) => snapshot
                    .of_kind(kind)
                    .map(|item| item.name.clone())
                    .collect(),
                None => Vec::new(),
            },
        };
        names.sort();
        Ok(names)
    }

    pub fn list_tags(&self, repository: &str) -> Result<Vec<String>, CatalogError> {
        let snapshot = self.snapshot()?;
        let item = find(&snapshot, repository)?;
        let mut tags = item.tag_names().map(str::to_string).collect::<Vec<_>>();
        sort_tags(&mut tags);
        Ok(tags)
    }

    /// FIPS and STIG compliance of every tag of a repository.
    pub fn compliance_info(&self, repository: &str) -> Result<ComplianceReport, CatalogError> {
        let snapshot = self.snapshot()?;
        let item = find(&snapshot, repository)?;

        let tags = item
            .tags
            .iter()
            .map(|tag| (tag.name.clone(), tag.compliance))
            .collect::<BTreeMap<_, _>>();
        let flagged = |wanted: fn(&ComplianceFlags) -> bool| {
            let mut names = tags
                .iter()
                .filter(|(_, flags)| wanted(flags))
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>();
            sort_tags(&mut names);
            names
        };
        let fips_tags = flagged(|flags| flags.fips);
        let stig_tags = flagged(|flags| flags.stig);

        Ok(ComplianceReport {
            repository: item.name.clone(),
            summary: ComplianceSummary {
                total_tags: tags.len(),
                fips_available: !fips_tags.is_empty(),
                stig_available: !stig_tags.is_empty(),
            },
            tags,
            fips_tags,
            stig_tags,
        })
    }

    /// Lifecycle dates of one tag. The tag name must match exactly.
    pub fn support_info(&self, repository: &str, tag: &str) -> Result<SupportInfo, CatalogError> {
        let snapshot = self.snapshot()?;
        let item = find(&snapshot, repository)?;
        let record = item.tag(tag).ok_or_else(|| CatalogError::TagNotFound {
            repository: item.name.clone(),
            tag: tag.to_string(),
        })?;

        let lifecycle = record.lifecycle.clone();
        Ok(SupportInfo {
            repository: item.name.clone(),
            tag: record.name.clone(),
            display_name: lifecycle.display_name,
            end_of_life: lifecycle.end_of_life.into(),
            end_of_support: lifecycle.end_of_support.into(),
        })
    }
}

fn find<'a>(snapshot: &'a IndexedSnapshot, repository: &str) -> Result<&'a CatalogItem, CatalogError> {
    snapshot
        .find(repository)
        .ok_or_else(|| CatalogError::RepositoryNotFound(repository.trim().to_string()))
}
