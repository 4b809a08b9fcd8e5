//! Error types for catalog operations.
//!
//! Each component reports its own error type; [`CatalogError`] is what the
//! public operations of [`crate::DhiCatalog`] return.

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to obtain or keep a bearer credential.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("DOCKER_USERNAME and DOCKER_PAT environment variables must be set")]
    MissingCredentials,
    #[error("credentials rejected by the registry ({0})")]
    Rejected(StatusCode),
    #[error("no token received from authentication endpoint")]
    MissingToken,
    #[error("unexpected response from authentication endpoint ({0})")]
    UnexpectedStatus(StatusCode),
    #[error("authentication request failed")]
    Request(#[source] reqwest::Error),
}

/// Failure to retrieve the catalog from the upstream API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("catalog request failed")]
    Request(#[source] reqwest::Error),
    #[error("catalog API responded with {0}")]
    Status(StatusCode),
    #[error("malformed catalog response")]
    Malformed(#[source] serde_json::Error),
    #[error("catalog query failed: {0}")]
    GraphQl(String),
    #[error("catalog response contained no repository listing")]
    MissingData,
    #[error("catalog request failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Whether another attempt at the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::Status(status) => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            },
            _ => false,
        }
    }
}

/// Errors returned by catalog queries.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("authentication failed")]
    Auth(#[source] AuthError),
    #[error("failed to fetch catalog")]
    Fetch(#[source] FetchError),
    #[error("catalog unavailable, try again")]
    NotReady,
    #[error("repository '{0}' not found in catalog")]
    RepositoryNotFound(String),
    #[error("tag '{tag}' not found in repository '{repository}'")]
    TagNotFound { repository: String, tag: String },
}

impl CatalogError {
    /// Whether this is the result of an exact lookup that missed.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::RepositoryNotFound(_) | CatalogError::TagNotFound { .. }
        )
    }
}

impl From<AuthError> for CatalogError {
    fn from(err: AuthError) -> Self {
        CatalogError::Auth(err)
    }
}

impl From<FetchError> for CatalogError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(auth) => CatalogError::Auth(auth),
            other => CatalogError::Fetch(other),
        }
    }
}

/// Render an error together with its chain of sources on a single line.
pub fn format_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
