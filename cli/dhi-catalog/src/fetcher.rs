//! Retrieval of the hardened image catalog from the GraphQL API.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use async_stream::try_stream;
use futures::{Stream, TryStreamExt, pin_mut};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::auth::AuthProvider;
use crate::config::CatalogConfig;
use crate::error::{AuthError, FetchError};
use crate::types::{CatalogItem, CatalogSnapshot, ItemKind, Lifecycle, TagRecord};

pub const LIST_REPOSITORIES_QUERY: &str = "query ListRepositories($after: String) { \
     dhiListRepositories(after: $after) { \
     items { name type tagNames tagDefinitions { displayName tagNames endOfLife endOfSupport } } \
     nextCursor } }";

/// Kind assigned to records that do not state one.
const UNKNOWN_KIND: &str = "Unknown";

/// Something that can produce a complete catalog snapshot.
///
/// This trait enables alternate implementations:
/// - **HTTP**: the GraphQL API via [`CatalogFetcher`]
/// - **Mock** (tests): canned snapshots via [`crate::mock::MockSource`]
#[allow(async_fn_in_trait)]
pub trait CatalogSource {
    async fn fetch_all(&self) -> Result<CatalogSnapshot, FetchError>;
}

#[derive(Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: ListVariables<'a>,
}

#[derive(Serialize)]
struct ListVariables<'a> {
    after: Option<&'a str>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<ListData>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ListData {
    #[serde(rename = "dhiListRepositories")]
    repositories: Option<RepositoryPage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryPage {
    #[serde(default)]
    items: Option<Vec<Value>>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// One page of raw repository records and the cursor of the next page.
type Page = (Vec<Value>, Option<String>);

impl GraphQlResponse {
    fn into_page(self) -> Result<Page, FetchError> {
        let messages = self
            .errors
            .unwrap_or_default()
            .into_iter()
            .map(|error| error.message.unwrap_or_else(|| "unknown error".to_string()))
            .collect::<Vec<_>>();

        match self.data.and_then(|data| data.repositories) {
            Some(page) => {
                if !messages.is_empty() {
                    warn!(errors = %messages.join("; "), "catalog API reported partial errors");
                }
                Ok((page.items.unwrap_or_default(), page.next_cursor))
            },
            None if !messages.is_empty() => Err(FetchError::GraphQl(messages.join("; "))),
            None => Err(FetchError::MissingData),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepository {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    tag_names: Option<Vec<String>>,
    tag_definitions: Option<Vec<RawTagDefinition>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTagDefinition {
    display_name: Option<String>,
    tag_names: Option<Vec<String>>,
    end_of_life: Option<String>,
    end_of_support: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Turn a raw record into a [`CatalogItem`], or `None` if it is unusable.
fn normalize_record(raw: Value) -> Option<CatalogItem> {
    let raw: RawRepository = serde_json::from_value(raw).ok()?;
    let name = raw.name.as_deref().map(str::trim).filter(|name| !name.is_empty())?;
    let kind = ItemKind::from_upstream(raw.kind.as_deref().unwrap_or(UNKNOWN_KIND));
    let kind = match kind {
        ItemKind::Other(other) if other.is_empty() => ItemKind::Other(UNKNOWN_KIND.to_string()),
        kind => kind,
    };

    let mut lifecycles: HashMap<String, Lifecycle> = HashMap::new();
    let mut defined_tags = Vec::new();
    for definition in raw.tag_definitions.unwrap_or_default() {
        let lifecycle = Lifecycle {
            display_name: non_empty(definition.display_name),
            end_of_life: non_empty(definition.end_of_life),
            end_of_support: non_empty(definition.end_of_support),
        };
        for tag in definition.tag_names.unwrap_or_default() {
            if let Entry::Vacant(entry) = lifecycles.entry(tag.clone()) {
                entry.insert(lifecycle.clone());
                defined_tags.push(tag);
            }
        }
    }

    let mut seen = HashSet::new();
    let tags = raw
        .tag_names
        .unwrap_or_default()
        .into_iter()
        .chain(defined_tags)
        .filter(|tag| !tag.trim().is_empty() && seen.insert(tag.clone()))
        .map(|tag| {
            let lifecycle = lifecycles.remove(&tag).unwrap_or_default();
            TagRecord::new(tag).with_lifecycle(lifecycle)
        })
        .collect();

    Some(CatalogItem::new(name, kind, tags))
}

/// Accumulates normalized records across pages.
#[derive(Debug, Default)]
struct SnapshotBuilder {
    items: Vec<CatalogItem>,
    names: HashSet<String>,
    malformed: usize,
    duplicates: usize,
}

impl SnapshotBuilder {
    fn push(&mut self, raw: Value) {
        match normalize_record(raw) {
            Some(item) if self.names.insert(item.name.clone()) => self.items.push(item),
            Some(item) => {
                debug!(name = %item.name, "ignoring duplicate repository");
                self.duplicates += 1;
            },
            None => self.malformed += 1,
        }
    }

    fn finish(self) -> CatalogSnapshot {
        if self.malformed > 0 {
            warn!(skipped = self.malformed, "skipped malformed catalog records");
        }
        if self.duplicates > 0 {
            debug!(duplicates = self.duplicates, "dropped duplicate catalog records");
        }
        CatalogSnapshot::new(self.items)
    }
}

/// Fetch pages by cursor until the API runs out of pages.
///
/// Pagination ends on an empty page, a missing or empty cursor, or a cursor
/// that was already visited.
fn make_cursor_stream<T, E, Fut>(
    generator: impl Fn(Option<String>) -> Fut,
) -> impl Stream<Item = Result<Vec<T>, E>>
where
    Fut: Future<Output = Result<(Vec<T>, Option<String>), E>>,
{
    try_stream! {
        let mut cursor: Option<String> = None;
        let mut visited = HashSet::new();

        loop {
            let (items, next_cursor) = generator(cursor.take()).await?;
            if items.is_empty() {
                break;
            }
            yield items;

            match next_cursor.filter(|next| !next.is_empty()) {
                Some(next) if visited.insert(next.clone()) => cursor = Some(next),
                Some(next) => {
                    warn!(cursor = %next, "catalog API repeated a page cursor, stopping");
                    break;
                },
                None => break,
            }
        }
    }
}

/// Build the HTTP client shared by authentication and catalog requests.
pub fn build_http_client(config: &CatalogConfig) -> Result<reqwest::Client, FetchError> {
    debug!(
        graphql_url = %config.graphql_url,
        user_agent = %config.user_agent,
        "building catalog HTTP client"
    );

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(60))
        .user_agent(&config.user_agent)
        .build()
        .map_err(FetchError::Request)
}

/// Fetches the catalog page by page, authenticating as needed.
#[derive(Debug)]
pub struct CatalogFetcher {
    http: reqwest::Client,
    graphql_url: String,
    auth: AuthProvider,
    max_attempts: u32,
    backoff: Duration,
}

impl CatalogFetcher {
    pub fn new(config: &CatalogConfig) -> Result<Self, FetchError> {
        let http = build_http_client(config)?;
        let auth = AuthProvider::new(http.clone(), config);
        Ok(Self {
            http,
            graphql_url: config.graphql_url.clone(),
            auth,
            max_attempts: config.page_attempts.max(1),
            backoff: config.retry_backoff(),
        })
    }

    pub fn auth(&self) -> &AuthProvider {
        &self.auth
    }

    /// Fetch one page, retrying transient failures with exponential backoff.
    ///
    /// A rejected bearer is replaced once; a second rejection is final.
    async fn fetch_page(&self, after: Option<String>) -> Result<Page, FetchError> {
        let mut failures = 0;
        let mut reauthenticated = false;

        loop {
            let bearer = self.auth.bearer().await?;
            let err = match self.request_page(&bearer, after.as_deref()).await {
                Ok(page) => return Ok(page),
                Err(err) => err,
            };

            match err {
                FetchError::Status(StatusCode::UNAUTHORIZED) if !reauthenticated => {
                    debug!("catalog API rejected bearer, reauthenticating");
                    self.auth.invalidate(&bearer).await;
                    reauthenticated = true;
                },
                FetchError::Status(
                    status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN),
                ) => return Err(AuthError::Rejected(status).into()),
                err if err.is_retryable() => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        return Err(FetchError::RetriesExhausted {
                            attempts: failures,
                            last: Box::new(err),
                        });
                    }
                    let delay = self.backoff.saturating_mul(2u32.saturating_pow(failures - 1));
                    warn!(attempt = failures, ?delay, error = %err, "catalog request failed, retrying");
                    tokio::time::sleep(delay).await;
                },
                err => return Err(err),
            }
        }
    }

    #[instrument(skip_all, fields(after = after.unwrap_or("<first>")))]
    async fn request_page(&self, bearer: &str, after: Option<&str>) -> Result<Page, FetchError> {
        let response = self
            .http
            .post(&self.graphql_url)
            .bearer_auth(bearer)
            .json(&GraphQlRequest {
                query: LIST_REPOSITORIES_QUERY,
                variables: ListVariables { after },
            })
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await.map_err(FetchError::Request)?;
        let body: GraphQlResponse = serde_json::from_slice(&body).map_err(FetchError::Malformed)?;
        let (items, next_cursor) = body.into_page()?;
        debug!(items = items.len(), ?next_cursor, "received catalog page");
        Ok((items, next_cursor))
    }
}

impl CatalogSource for CatalogFetcher {
    #[instrument(skip(self), fields(graphql_url = %self.graphql_url))]
    async fn fetch_all(&self) -> Result<CatalogSnapshot, FetchError> {
        let pages = make_cursor_stream(|cursor| self.fetch_page(cursor));
        pin_mut!(pages);

        let mut builder = SnapshotBuilder::default();
        while let Some(page) = pages.try_next().await? {
            for raw in page {
                builder.push(raw);
            }
        }

        let snapshot = builder.finish();
        debug!(items = snapshot.len(), "fetched catalog");
        Ok(snapshot)
    }
}
