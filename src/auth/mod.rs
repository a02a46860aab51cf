//! OAuth2 credential lifecycle for the Airtable API.
//!
//! A stored credential is used as-is while its access token is valid,
//! refreshed while only the refresh token is valid, and replaced through the
//! browser-based PKCE flow otherwise.

mod browser;
mod callback;
mod pkce;
mod token;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use pkce::PkceChallenge;
pub use token::TokenResponse;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::cache::{keys, CacheStore};
use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use callback::{CallbackServer, REFRESH_PATH};

/// Tokens are treated as expired this long before their actual expiry
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Error, Debug)]
pub enum AuthError {
  #[error("Authorization server error: {0}")]
  Api(String),
  #[error("Malformed token response: {0}")]
  MalformedResponse(String),
  #[error("Authorization callback carried an unknown state")]
  StateMismatch,
  #[error("No authorization result within {0:?}")]
  TimedOut(std::time::Duration),
  #[error("Authorization listener closed before delivering a result")]
  CallbackClosed,
  #[error("Could not open a browser: {0}")]
  Browser(String),
  #[error("Authorization listener error: {0}")]
  Listener(String),
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),
}

/// Bearer credential for the Airtable API
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
  pub access_token: String,
  pub access_expiry: DateTime<Utc>,
  pub refresh_token: String,
  pub refresh_expiry: DateTime<Utc>,
}

impl fmt::Debug for Credential {
  fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
    formatter
      .debug_struct("Credential")
      .field("access_token", &"[REDACTED]")
      .field("access_expiry", &self.access_expiry)
      .field("refresh_token", &"[REDACTED]")
      .field("refresh_expiry", &self.refresh_expiry)
      .finish()
  }
}

impl Credential {
  pub fn state_at(&self, now: DateTime<Utc>) -> CredentialState {
    let now = now + Duration::seconds(EXPIRY_SKEW_SECS);
    if now < self.access_expiry {
      CredentialState::AccessValid
    } else if now < self.refresh_expiry {
      CredentialState::AccessExpiredRefreshValid
    } else {
      CredentialState::BothExpired
    }
  }

  /// Short stable identifier of the access token, safe to log
  pub fn fingerprint(&self) -> String {
    let digest = Sha256::digest(self.access_token.as_bytes());
    hex::encode(&digest[..6])
  }

  /// Read the persisted credential. Missing or unreadable fields mean there
  /// is no credential.
  pub fn load(cache: &CacheStore) -> Result<Option<Self>> {
    let (Some(access_token), Some(expiry), Some(refresh_token), Some(refresh_expiry)) = (
      cache.find_data(keys::ACCESS_TOKEN)?,
      cache.find_data(keys::ACCESS_EXPIRY)?,
      cache.find_data(keys::REFRESH_TOKEN)?,
      cache.find_data(keys::REFRESH_EXPIRY)?,
    ) else {
      return Ok(None);
    };

    match (parse_unix(&expiry), parse_unix(&refresh_expiry)) {
      (Some(access_expiry), Some(refresh_expiry)) => Ok(Some(Self {
        access_token,
        access_expiry,
        refresh_token,
        refresh_expiry,
      })),
      _ => {
        tracing::warn!("Stored credential has unreadable expiry, ignoring it");
        Ok(None)
      }
    }
  }

  pub fn persist(&self, cache: &CacheStore) -> Result<()> {
    cache.set_data(keys::ACCESS_TOKEN, &self.access_token)?;
    cache.set_data(keys::ACCESS_EXPIRY, &self.access_expiry.timestamp().to_string())?;
    cache.set_data(keys::REFRESH_TOKEN, &self.refresh_token)?;
    cache.set_data(
      keys::REFRESH_EXPIRY,
      &self.refresh_expiry.timestamp().to_string(),
    )?;
    Ok(())
  }
}

fn parse_unix(raw: &str) -> Option<DateTime<Utc>> {
  raw
    .trim()
    .parse::<i64>()
    .ok()
    .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
  NoCredential,
  AccessValid,
  AccessExpiredRefreshValid,
  BothExpired,
}

impl CredentialState {
  pub fn of(credential: Option<&Credential>, now: DateTime<Utc>) -> Self {
    credential.map_or(CredentialState::NoCredential, |c| c.state_at(now))
  }
}

/// Produces a usable credential, refreshing or re-authorizing as needed
pub struct CredentialManager<B = SystemBrowser> {
  oauth: Arc<OAuthConfig>,
  authorize_url: Url,
  http: reqwest::Client,
  browser: B,
}

impl CredentialManager<SystemBrowser> {
  pub fn new(oauth: OAuthConfig) -> Result<Self> {
    Self::with_browser(oauth, SystemBrowser)
  }
}

impl<B: BrowserLauncher> CredentialManager<B> {
  pub fn with_browser(oauth: OAuthConfig, browser: B) -> Result<Self> {
    let authorize_url = Url::parse(&oauth.authorize_url)
      .map_err(|e| Error::Config(format!("oauth.authorize_url is not a URL: {}", e)))?;
    let http = reqwest::Client::builder()
      .user_agent(concat!("linkmirror/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self {
      oauth: Arc::new(oauth),
      authorize_url,
      http,
      browser,
    })
  }

  /// State of the persisted credential, without touching the network
  pub fn status(&self, cache: &CacheStore) -> Result<CredentialState> {
    let stored = Credential::load(cache)?;
    Ok(CredentialState::of(stored.as_ref(), Utc::now()))
  }

  /// Return a credential whose access token is valid, persisting any new one.
  pub async fn acquire(&self, cache: &CacheStore) -> Result<Credential> {
    let stored = Credential::load(cache)?;
    let state = CredentialState::of(stored.as_ref(), Utc::now());
    tracing::info!(?state, "Acquiring credential");

    let credential = match (state, stored) {
      (CredentialState::AccessValid, Some(credential)) => {
        tracing::debug!(fingerprint = %credential.fingerprint(), "Using stored access token");
        return Ok(credential);
      }
      (CredentialState::AccessExpiredRefreshValid, Some(stored)) => {
        match self.refresh(&stored.refresh_token).await {
          Ok(credential) => credential,
          Err(e) => {
            tracing::warn!(error = %e, "Refresh failed, falling back to browser authorization");
            self.authorize().await?
          }
        }
      }
      _ => self.authorize().await?,
    };

    credential.persist(cache)?;
    tracing::info!(
      fingerprint = %credential.fingerprint(),
      expires = %credential.access_expiry,
      "Stored new credential"
    );
    Ok(credential)
  }

  /// Refresh through the loopback listener, which performs the token request
  /// and delivers the result like an authorization redirect.
  async fn refresh(&self, refresh_token: &str) -> std::result::Result<Credential, AuthError> {
    let server = CallbackServer::start(self.oauth.clone(), self.http.clone()).await?;
    let url = format!("http://{}{}", server.addr(), REFRESH_PATH);

    let handoff = self
      .http
      .post(url)
      .form(&[("refresh_token", refresh_token)])
      .send()
      .await;
    if let Err(e) = handoff {
      server.stop().await;
      return Err(e.into());
    }

    server.wait(self.oauth.timeout()).await
  }

  /// Interactive authorization-code flow with PKCE
  async fn authorize(&self) -> std::result::Result<Credential, AuthError> {
    let pkce = PkceChallenge::generate();
    let server = CallbackServer::start(self.oauth.clone(), self.http.clone()).await?;
    server.register(&pkce.state, &pkce.code_verifier)?;

    let url = self.authorization_url(&pkce);
    tracing::info!("Opening browser for authorization");
    if let Err(e) = self.browser.open(&url) {
      tracing::warn!(error = %e, %url, "Open this URL to authorize linkmirror");
    }

    server.wait(self.oauth.timeout()).await
  }

  pub fn authorization_url(&self, pkce: &PkceChallenge) -> Url {
    let mut url = self.authorize_url.clone();
    url
      .query_pairs_mut()
      .append_pair("client_id", &self.oauth.client_id)
      .append_pair("redirect_uri", &self.oauth.redirect_uri)
      .append_pair("response_type", "code")
      .append_pair("scope", &self.oauth.scopes.join(" "))
      .append_pair("state", &pkce.state)
      .append_pair("code_challenge", &pkce.code_challenge)
      .append_pair("code_challenge_method", "S256");
    url
  }
}
