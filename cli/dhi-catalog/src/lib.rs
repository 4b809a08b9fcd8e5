//! Query access to the Docker Hardened Images (DHI) catalog.
//!
//! This crate provides:
//! - Registry authentication with cached, single-flight bearer renewal
//! - Paginated retrieval of the catalog from the GraphQL API
//! - An in-memory snapshot store with lazy, single-flight refresh
//! - Fuzzy repository search, statistics, tag listings, compliance flags
//!   and lifecycle lookups
//!
//! ## Usage
//!
//! ```ignore
//! use dhi_catalog::{CatalogConfig, DhiCatalog};
//!
//! let config = CatalogConfig::load()?;
//! let catalog = DhiCatalog::from_config(&config)?;
//! let hits = catalog.search("postgres", 5).await?;
//! ```

mod auth;
mod config;
mod error;
mod fetcher;
mod query;
mod service;
mod similarity;
mod store;
mod types;
mod version;

#[cfg(any(test, feature = "tests"))]
pub mod mock;

pub use auth::{AuthProvider, Credential};
pub use config::{
    CONFIG_FILE_VAR,
    CatalogConfig,
    DEFAULT_AUTH_URL,
    DEFAULT_CONFIG_FILE,
    DEFAULT_GRAPHQL_URL,
    DEFAULT_SEARCH_CUTOFF,
    PAT_VAR,
    USERNAME_VAR,
};
pub use error::{AuthError, CatalogError, FetchError, format_error_chain};
pub use fetcher::{CatalogFetcher, CatalogSource, LIST_REPOSITORIES_QUERY, build_http_client};
pub use query::{
    BatchSearch,
    BatchSummary,
    ComplianceReport,
    ComplianceSummary,
    LifecycleDate,
    QueryEngine,
    SearchHit,
    Statistics,
    SupportInfo,
};
pub use service::{DhiCatalog, SampleCheck, SelfTestReport};
pub use similarity::{QueryMatcher, normalize, similarity};
pub use store::{CatalogStore, IndexedSnapshot};
pub use types::{CatalogItem, CatalogSnapshot, ComplianceFlags, ItemKind, Lifecycle, TagRecord};
pub use version::{compare_versions, looks_like_version, sort_tags};
