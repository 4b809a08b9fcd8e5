//! Configuration for catalog access.
//!
//! Values are layered with the `config` crate: an optional TOML file, then
//! `DHI_*` environment variables, falling back to [`CatalogConfig::default`].
//! Registry credentials always come from [`USERNAME_VAR`] and [`PAT_VAR`].

use std::collections::HashMap;
use std::env;
use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config as HierarchicalConfig, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const USERNAME_VAR: &str = "DOCKER_USERNAME";
pub const PAT_VAR: &str = "DOCKER_PAT";
pub const CONFIG_FILE_VAR: &str = "DHI_CONFIG_FILE";
pub const DEFAULT_CONFIG_FILE: &str = "dhi-search.toml";
const ENV_PREFIX: &str = "DHI";

pub const DEFAULT_AUTH_URL: &str = "https://hub.docker.com/v2/auth/token";
pub const DEFAULT_GRAPHQL_URL: &str = "https://api.scout.docker.com/v1/graphql";
pub const DEFAULT_SEARCH_CUTOFF: f64 = 75.0;

/// Settings for authenticating against the registry and fetching the catalog.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CatalogConfig {
    /// Endpoint exchanging username and access token for a bearer token.
    pub auth_url: String,
    /// GraphQL endpoint serving the hardened image catalog.
    pub graphql_url: String,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// Age after which the cached catalog is refetched before a query.
    /// `0` keeps the catalog until an explicit refresh.
    pub max_age_secs: u64,
    /// Assumed bearer lifetime when the token carries no `exp` claim.
    pub token_lifetime_secs: u64,
    /// Attempts per catalog page before giving up on retryable errors.
    pub page_attempts: u32,
    /// Base delay of the exponential backoff between attempts.
    pub retry_backoff_ms: u64,
    /// Minimum similarity (0-100) a repository must reach to be a search hit.
    pub search_cutoff: f64,
    /// Registry account name.
    #[serde(skip_serializing)]
    pub username: Option<String>,
    /// Registry personal access token.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            user_agent: format!("dhi-search-mcp/{}", env!("CARGO_PKG_VERSION")),
            max_age_secs: 3600,
            token_lifetime_secs: 300,
            page_attempts: 3,
            retry_backoff_ms: 250,
            search_cutoff: DEFAULT_SEARCH_CUTOFF,
            username: None,
            token: None,
        }
    }
}

impl Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("auth_url", &self.auth_url)
            .field("graphql_url", &self.graphql_url)
            .field("user_agent", &self.user_agent)
            .field("max_age_secs", &self.max_age_secs)
            .field("token_lifetime_secs", &self.token_lifetime_secs)
            .field("page_attempts", &self.page_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("search_cutoff", &self.search_cutoff)
            .field("username", &self.username)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl CatalogConfig {
    /// Load configuration from the process environment.
    ///
    /// The config file is `$DHI_CONFIG_FILE` if set, else `./dhi-search.toml`
    /// if it exists.
    pub fn load() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = env::vars().collect();
        let file = vars
            .get(CONFIG_FILE_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::from_sources(Some(file), vars)
    }

    /// Build configuration from an optional file and an explicit set of
    /// environment variables.
    pub fn from_sources(
        file: Option<PathBuf>,
        vars: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut builder = HierarchicalConfig::builder();

        if let Some(file) = file {
            debug!(path = %file.display(), "reading catalog config file");
            builder = builder.add_source(
                config::File::from(file)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let username = non_empty(vars.get(USERNAME_VAR));
        let token = non_empty(vars.get(PAT_VAR));
        let dhi_vars = vars
            .into_iter()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX) && key != CONFIG_FILE_VAR)
            .collect::<HashMap<_, _>>();

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .source(Some(dhi_vars))
                    .try_parsing(true),
            )
            .set_override_option("username", username)?
            .set_override_option("token", token)?
            .build()?;

        config.try_deserialize()
    }

    /// See [`CatalogConfig::max_age_secs`].
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs))
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_any_source() {
        let config = CatalogConfig::from_sources(None, HashMap::new()).unwrap();
        assert_eq!(config, CatalogConfig::default());
        assert_eq!(config.username, None);
        assert_eq!(config.max_age(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn credentials_from_docker_variables() {
        let config = CatalogConfig::from_sources(
            None,
            vars(&[(USERNAME_VAR, "octo"), (PAT_VAR, " dckr_pat_123 ")]),
        )
        .unwrap();
        assert_eq!(config.username.as_deref(), Some("octo"));
        assert_eq!(config.token.as_deref(), Some("dckr_pat_123"));
    }

    #[test]
    fn blank_credentials_are_unset() {
        let config =
            CatalogConfig::from_sources(None, vars(&[(USERNAME_VAR, ""), (PAT_VAR, "  ")]))
                .unwrap();
        assert_eq!(config.username, None);
        assert_eq!(config.token, None);
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("dhi-search.toml");
        fs::write(&file, indoc! {r#"
            graphql_url = "http://localhost:9000/graphql"
            max_age_secs = 60
            search_cutoff = 80.0
        "#})
        .unwrap();

        let config = CatalogConfig::from_sources(
            Some(file),
            vars(&[("DHI_MAX_AGE_SECS", "0"), ("DHI_PAGE_ATTEMPTS", "5")]),
        )
        .unwrap();

        assert_eq!(config.graphql_url, "http://localhost:9000/graphql");
        assert_eq!(config.max_age(), None);
        assert_eq!(config.page_attempts, 5);
        assert_eq!(config.search_cutoff, 80.0);
    }

    #[test]
    fn debug_hides_token() {
        let config = CatalogConfig {
            token: Some("secret-token".to_string()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("has_token: true"));
    }
}
