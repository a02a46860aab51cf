use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub airtable: AirtableConfig,
  pub oauth: OAuthConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirtableConfig {
  pub base_id: String,
  #[serde(default = "default_api_url")]
  pub api_url: String,
  #[serde(default = "default_meta_url")]
  pub meta_url: String,
  #[serde(default = "default_links_table")]
  pub links_table: String,
  #[serde(default = "default_lists_table")]
  pub lists_table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
  pub client_id: String,
  /// Loopback redirect registered with Airtable, e.g. http://localhost:8787/airtable-oauth
  pub redirect_uri: String,
  #[serde(default = "default_authorize_url")]
  pub authorize_url: String,
  #[serde(default = "default_token_url")]
  pub token_url: String,
  #[serde(default = "default_scopes")]
  pub scopes: Vec<String>,
  /// How long to wait for the browser flow before giving up
  #[serde(default = "default_auth_timeout_secs")]
  pub timeout_secs: u64,
  /// Loaded from LINKMIRROR_CLIENT_SECRET, never from the config file
  #[serde(skip)]
  pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Database file (default: $XDG_DATA_HOME/linkmirror/cache.db)
  pub path: Option<PathBuf>,
  /// A non-forced sync is skipped when the last one is younger than this
  #[serde(default = "default_max_staleness_minutes")]
  pub max_staleness_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      max_staleness_minutes: default_max_staleness_minutes(),
    }
  }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
  #[serde(default = "default_requests_per_second")]
  pub requests_per_second: u32,
  #[serde(default = "default_burst")]
  pub burst: u32,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      requests_per_second: default_requests_per_second(),
      burst: default_burst(),
    }
  }
}

fn default_api_url() -> String {
  "https://api.airtable.com/v0".to_string()
}

fn default_meta_url() -> String {
  "https://api.airtable.com/v0/meta".to_string()
}

fn default_links_table() -> String {
  "Links".to_string()
}

fn default_lists_table() -> String {
  "Lists".to_string()
}

fn default_authorize_url() -> String {
  "https://airtable.com/oauth2/v1/authorize".to_string()
}

fn default_token_url() -> String {
  "https://airtable.com/oauth2/v1/token".to_string()
}

fn default_scopes() -> Vec<String> {
  ["data.records:read", "data.records:write", "schema.bases:read"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_auth_timeout_secs() -> u64 {
  120
}

fn default_max_staleness_minutes() -> i64 {
  60
}

fn default_requests_per_second() -> u32 {
  5
}

fn default_burst() -> u32 {
  1
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./linkmirror.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/linkmirror/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!(
          "Config file not found: {}",
          p.display()
        )));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(Error::Config(
        "No configuration file found. Create one at ~/.config/linkmirror/config.yaml".to_string(),
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("linkmirror.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("linkmirror").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!(
        "Failed to read config file {}: {}",
        path.display(),
        e
      ))
    })?;

    let mut config = Self::parse(&contents).map_err(|e| match e {
      Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
      other => other,
    })?;
    config.oauth.client_secret = Self::get_client_secret();

    Ok(config)
  }

  /// Parse and validate a YAML document.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.airtable.base_id.trim().is_empty() {
      return Err(Error::Config("airtable.base_id must not be empty".into()));
    }
    if self.oauth.client_id.trim().is_empty() {
      return Err(Error::Config("oauth.client_id must not be empty".into()));
    }
    if self.rate_limit.requests_per_second == 0 || self.rate_limit.burst == 0 {
      return Err(Error::Config(
        "rate_limit.requests_per_second and rate_limit.burst must be positive".into(),
      ));
    }
    self.oauth.loopback_port()?;
    self.oauth.callback_path()?;
    Ok(())
  }

  /// Get the OAuth client secret from the environment, if the integration has one.
  pub fn get_client_secret() -> Option<String> {
    std::env::var("LINKMIRROR_CLIENT_SECRET")
      .ok()
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty())
  }

  /// Resolve the cache database path.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(p) => Ok(p.clone()),
      None => crate::db::default_path(),
    }
  }

  pub fn max_staleness(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.cache.max_staleness_minutes)
  }
}

impl OAuthConfig {
  /// The redirect URI must point back at this machine; the callback listener
  /// binds the port it names.
  pub fn loopback_port(&self) -> Result<u16> {
    let url = Url::parse(&self.redirect_uri)
      .map_err(|e| Error::Config(format!("oauth.redirect_uri is not a URL: {}", e)))?;

    match url.host_str() {
      Some("localhost") | Some("127.0.0.1") => {}
      _ => {
        return Err(Error::Config(
          "oauth.redirect_uri must be http://localhost:<port>/<path>".into(),
        ))
      }
    }

    url
      .port()
      .ok_or_else(|| Error::Config("oauth.redirect_uri must include a port".into()))
  }

  /// Path component the callback listener serves. The root and the refresh
  /// hand-off path are taken by the listener itself.
  pub fn callback_path(&self) -> Result<String> {
    let url = Url::parse(&self.redirect_uri)
      .map_err(|e| Error::Config(format!("oauth.redirect_uri is not a URL: {}", e)))?;

    match url.path() {
      "" | "/" => Err(Error::Config(
        "oauth.redirect_uri needs a callback path, e.g. http://localhost:8787/airtable-oauth".into(),
      )),
      "/refresh" => Err(Error::Config(
        "oauth.redirect_uri path /refresh is reserved".into(),
      )),
      path => Ok(path.to_string()),
    }
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}
