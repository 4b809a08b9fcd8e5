//! Registry authentication.
//!
//! The registry exchanges an account name and personal access token for a
//! short-lived bearer token, which authorizes catalog queries.

use std::fmt::Debug;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::config::CatalogConfig;
use crate::error::AuthError;

/// Bearers are renewed this long before they actually expire.
const EXPIRY_SKEW: TimeDelta = TimeDelta::seconds(30);

#[derive(Serialize)]
struct TokenRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// A bearer token issued for a registry account.
#[derive(Clone)]
pub struct Credential {
    username: String,
    bearer: String,
    expires_at: DateTime<Utc>,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Wrap a bearer, reading its expiry from the JWT `exp` claim when
    /// present and assuming `fallback_lifetime` otherwise.
    pub fn new(
        username: impl Into<String>,
        bearer: impl Into<String>,
        fallback_lifetime: Duration,
    ) -> Self {
        let bearer = bearer.into();
        let expires_at = jwt_expiry(&bearer).unwrap_or_else(|| {
            let lifetime = TimeDelta::from_std(fallback_lifetime).unwrap_or(TimeDelta::MAX);
            Utc::now()
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        Self {
            username: username.into(),
            bearer,
            expires_at,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() + EXPIRY_SKEW >= self.expires_at
    }
}

/// Read the `exp` claim of a JWT without verifying its signature.
///
/// The expiry only schedules renewal; the issuer verifies the token itself.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let claim = jsonwebtoken::dangerous::insecure_decode::<ExpiryClaim>(token).ok()?;
    DateTime::from_timestamp(claim.claims.exp?, 0)
}

/// Issues and caches bearer credentials.
///
/// Concurrent callers needing a fresh credential wait for a single exchange
/// rather than each authenticating on their own.
pub struct AuthProvider {
    http: reqwest::Client,
    auth_url: String,
    username: Option<String>,
    token: Option<String>,
    fallback_lifetime: Duration,
    cached: Mutex<Option<Credential>>,
}

impl Debug for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthProvider")
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl AuthProvider {
    pub fn new(http: reqwest::Client, config: &CatalogConfig) -> Self {
        Self {
            http,
            auth_url: config.auth_url.clone(),
            username: config.username.clone(),
            token: config.token.clone(),
            fallback_lifetime: config.token_lifetime(),
            cached: Mutex::new(None),
        }
    }

    /// Exchange the configured account name and access token for a new
    /// credential. Does not touch the cache.
    #[instrument(skip_all, fields(auth_url = %self.auth_url))]
    pub async fn authenticate(&self) -> Result<Credential, AuthError> {
        let (Some(username), Some(secret)) = (&self.username, &self.token) else {
            return Err(AuthError::MissingCredentials);
        };

        debug!(%username, "requesting bearer token");
        let response = self
            .http
            .post(&self.auth_url)
            .json(&TokenRequest {
                identifier: username,
                secret,
            })
            .send()
            .await
            .map_err(AuthError::Request)?;

        match response.status() {
            status if status.is_success() => {},
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                return Err(AuthError::Rejected(status));
            },
            status => return Err(AuthError::UnexpectedStatus(status)),
        }

        let body: TokenResponse = response.json().await.map_err(AuthError::Request)?;
        let bearer = body
            .token
            .or(body.access_token)
            .filter(|bearer| !bearer.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let credential = Credential::new(username, bearer, self.fallback_lifetime);
        debug!(expires_at = %credential.expires_at(), "received bearer token");
        Ok(credential)
    }

    /// A bearer that has not expired, authenticating if necessary.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(credential) = cached.as_ref().filter(|credential| !credential.is_expired()) {
            return Ok(credential.bearer().to_string());
        }

        let credential = self.authenticate().await?;
        let bearer = credential.bearer().to_string();
        *cached = Some(credential);
        Ok(bearer)
    }

    /// Forget `bearer` after the API rejected it, so the next call to
    /// [`AuthProvider::bearer`] authenticates again.
    ///
    /// A bearer that was already replaced by another caller is left alone.
    pub async fn invalidate(&self, bearer: &str) {
        let mut cached = self.cached.lock().await;
        if cached
            .as_ref()
            .is_some_and(|credential| credential.bearer() == bearer)
        {
            debug!("discarding rejected bearer token");
            *cached = None;
        }
    }
}
