use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::{AuthError, Credential};
use crate::config::OAuthConfig;

/// Body of a token endpoint response, successful or not
#[derive(Debug, Default, Deserialize)]
pub struct TokenResponse {
  pub access_token: Option<String>,
  pub expires_in: Option<i64>,
  pub refresh_token: Option<String>,
  pub refresh_expires_in: Option<i64>,
  pub error: Option<String>,
  pub error_description: Option<String>,
}

impl TokenResponse {
  /// Turn the response into a credential issued at `now`. An `error` field or
  /// any missing token or lifetime fails the whole response.
  pub fn into_credential(self, now: DateTime<Utc>) -> Result<Credential, AuthError> {
    if let Some(error) = self.error {
      return Err(AuthError::Api(match self.error_description {
        Some(description) => format!("{}: {}", error, description),
        None => error,
      }));
    }

    let access_token = required(self.access_token, "access_token")?;
    let refresh_token = required(self.refresh_token, "refresh_token")?;
    let expires_in = self
      .expires_in
      .ok_or_else(|| AuthError::MalformedResponse("missing expires_in".into()))?;
    let refresh_expires_in = self
      .refresh_expires_in
      .ok_or_else(|| AuthError::MalformedResponse("missing refresh_expires_in".into()))?;

    Ok(Credential {
      access_token,
      access_expiry: now + Duration::seconds(expires_in),
      refresh_token,
      refresh_expiry: now + Duration::seconds(refresh_expires_in),
    })
  }
}

fn required(value: Option<String>, field: &str) -> Result<String, AuthError> {
  value
    .filter(|v| !v.is_empty())
    .ok_or_else(|| AuthError::MalformedResponse(format!("missing {}", field)))
}

/// Trade an authorization code and its PKCE verifier for tokens
pub async fn exchange_code(
  http: &reqwest::Client,
  oauth: &OAuthConfig,
  code: &str,
  code_verifier: &str,
) -> Result<Credential, AuthError> {
  let form = [
    ("grant_type", "authorization_code"),
    ("code", code),
    ("code_verifier", code_verifier),
    ("redirect_uri", oauth.redirect_uri.as_str()),
    ("client_id", oauth.client_id.as_str()),
  ];
  request_token(http, oauth, &form).await
}

/// Trade a refresh token for a new credential
pub async fn refresh(
  http: &reqwest::Client,
  oauth: &OAuthConfig,
  refresh_token: &str,
) -> Result<Credential, AuthError> {
  let scope = oauth.scopes.join(" ");
  let form = [
    ("grant_type", "refresh_token"),
    ("refresh_token", refresh_token),
    ("client_id", oauth.client_id.as_str()),
    ("scope", scope.as_str()),
  ];
  request_token(http, oauth, &form).await
}

async fn request_token(
  http: &reqwest::Client,
  oauth: &OAuthConfig,
  form: &[(&str, &str)],
) -> Result<Credential, AuthError> {
  let mut request = http.post(oauth.token_url.as_str()).form(form);
  if let Some(secret) = &oauth.client_secret {
    request = request.basic_auth(&oauth.client_id, Some(secret));
  }

  let response = request.send().await?;
  let status = response.status();
  let body = response.text().await?;

  let parsed: TokenResponse = match serde_json::from_str(&body) {
    Ok(parsed) => parsed,
    Err(_) if !status.is_success() => {
      return Err(AuthError::Api(format!(
        "token endpoint returned HTTP {}: {}",
        status.as_u16(),
        body.trim()
      )))
    }
    Err(e) => return Err(AuthError::MalformedResponse(e.to_string())),
  };

  if !status.is_success() && parsed.error.is_none() {
    return Err(AuthError::Api(format!(
      "token endpoint returned HTTP {}",
      status.as_u16()
    )));
  }

  parsed.into_credential(Utc::now())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn complete() -> TokenResponse {
    TokenResponse {
      access_token: Some("access".into()),
      expires_in: Some(3600),
      refresh_token: Some("refresh".into()),
      refresh_expires_in: Some(86400),
      ..Default::default()
    }
  }

  #[test]
  fn test_complete_response_becomes_credential() {
    let now = Utc::now();
    let credential = complete().into_credential(now).unwrap();

    assert_eq!(credential.access_token, "access");
    assert_eq!(credential.access_expiry, now + Duration::seconds(3600));
    assert_eq!(credential.refresh_expiry, now + Duration::seconds(86400));
  }

  #[test]
  fn test_error_field_is_api_error() {
    let response = TokenResponse {
      error: Some("invalid_grant".into()),
      error_description: Some("refresh token expired".into()),
      ..complete()
    };

    match response.into_credential(Utc::now()) {
      Err(AuthError::Api(message)) => {
        assert_eq!(message, "invalid_grant: refresh token expired")
      }
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn test_missing_fields_are_malformed() {
    let no_refresh = TokenResponse {
      refresh_token: None,
      ..complete()
    };
    assert!(matches!(
      no_refresh.into_credential(Utc::now()),
      Err(AuthError::MalformedResponse(_))
    ));

    let no_expiry = TokenResponse {
      expires_in: None,
      ..complete()
    };
    assert!(matches!(
      no_expiry.into_credential(Utc::now()),
      Err(AuthError::MalformedResponse(_))
    ));

    let empty_token = TokenResponse {
      access_token: Some(String::new()),
      ..complete()
    };
    assert!(matches!(
      empty_token.into_credential(Utc::now()),
      Err(AuthError::MalformedResponse(_))
    ));
  }
}
