//! Catalog domain model.
//!
//! These are the normalized records produced by the fetcher. Everything in a
//! [`CatalogSnapshot`] is immutable once built.

use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::{DeserializeFromStr, SerializeDisplay};

/// The kind of a catalog repository.
///
/// Upstream kinds that are not known here are kept verbatim rather than
/// rejected.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub enum ItemKind {
    Image,
    HelmChart,
    Other(String),
}

impl ItemKind {
    pub fn as_str(&self) -> &str {
        match self {
            ItemKind::Image => "IMAGE",
            ItemKind::HelmChart => "HELM_CHART",
            ItemKind::Other(kind) => kind,
        }
    }

    /// Interpret an upstream type name, keeping unknown names verbatim.
    pub fn from_upstream(name: &str) -> Self {
        let trimmed = name.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "IMAGE" => ItemKind::Image,
            "HELM_CHART" => ItemKind::HelmChart,
            _ => ItemKind::Other(trimmed.to_string()),
        }
    }

    /// Case-insensitive comparison against an upstream type name.
    pub fn matches(&self, name: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(name.trim())
    }
}

impl FromStr for ItemKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_upstream(s))
    }
}

impl Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// FIPS and STIG compliance of a single tag.
///
/// A missing signal means `false`; there is no "unknown".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceFlags {
    pub fips: bool,
    pub stig: bool,
}

impl ComplianceFlags {
    /// Infer compliance from the naming convention of hardened image tags,
    /// e.g. `3.12-fips` or `16-stig`.
    pub fn from_tag_name(tag: &str) -> Self {
        let tag = tag.to_lowercase();
        Self {
            fips: tag.contains("fips"),
            stig: tag.contains("stig"),
        }
    }
}

/// Support dates published for a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lifecycle {
    pub display_name: Option<String>,
    pub end_of_life: Option<String>,
    pub end_of_support: Option<String>,
}

impl Lifecycle {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.end_of_life.is_none() && self.end_of_support.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub name: String,
    pub compliance: ComplianceFlags,
    pub lifecycle: Lifecycle,
}

impl TagRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            compliance: ComplianceFlags::from_tag_name(&name),
            name,
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }
}

/// A repository in the hardened image catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub name: String,
    pub kind: ItemKind,
    pub tags: Vec<TagRecord>,
}

impl CatalogItem {
    pub fn new(name: impl Into<String>, kind: ItemKind, tags: Vec<TagRecord>) -> Self {
        Self {
            name: name.into(),
            kind,
            tags,
        }
    }

    /// Exact, case-sensitive tag lookup.
    pub fn tag(&self, name: &str) -> Option<&TagRecord> {
        self.tags.iter().find(|tag| tag.name == name)
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|tag| tag.name.as_str())
    }
}

/// The complete catalog as fetched at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    items: Vec<CatalogItem>,
    fetched_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self::with_timestamp(items, Utc::now())
    }

    pub fn with_timestamp(items: Vec<CatalogItem>, fetched_at: DateTime<Utc>) -> Self {
        Self { items, fetched_at }
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
