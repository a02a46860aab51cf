//! Loopback HTTP listener that receives the authorization redirect and the
//! refresh hand-off, and delivers exactly one credential result.

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::{token, AuthError, Credential};
use crate::config::OAuthConfig;

type Delivery = Result<Credential, AuthError>;

/// Issued `state` values mapped to their PKCE verifiers
type PendingStates = Arc<Mutex<HashMap<String, String>>>;

pub const REFRESH_PATH: &str = "/refresh";

#[derive(Clone)]
struct CallbackState {
  oauth: Arc<OAuthConfig>,
  http: reqwest::Client,
  pending: PendingStates,
  delivery: Arc<Mutex<Option<oneshot::Sender<Delivery>>>>,
}

impl CallbackState {
  /// Single use: a matching state is removed from the map
  fn take_verifier(&self, state: &str) -> Option<String> {
    self.pending.lock().ok()?.remove(state)
  }

  fn deliver(&self, outcome: Delivery) {
    let sender = self.delivery.lock().ok().and_then(|mut slot| slot.take());
    match sender {
      Some(tx) => {
        let _ = tx.send(outcome);
      }
      None => tracing::debug!("Credential already delivered, dropping late result"),
    }
  }
}

pub struct CallbackServer {
  addr: SocketAddr,
  pending: PendingStates,
  result: oneshot::Receiver<Delivery>,
  shutdown: oneshot::Sender<()>,
  task: JoinHandle<()>,
}

impl CallbackServer {
  /// Bind the port named by the redirect URI and start serving.
  pub async fn start(oauth: Arc<OAuthConfig>, http: reqwest::Client) -> Result<Self, AuthError> {
    let port = oauth
      .loopback_port()
      .map_err(|e| AuthError::Listener(e.to_string()))?;
    let callback_path = oauth
      .callback_path()
      .map_err(|e| AuthError::Listener(e.to_string()))?;
    let listener = TcpListener::bind(("127.0.0.1", port))
      .await
      .map_err(|e| AuthError::Listener(format!("failed to bind 127.0.0.1:{}: {}", port, e)))?;
    let addr = listener
      .local_addr()
      .map_err(|e| AuthError::Listener(e.to_string()))?;

    let (result_tx, result) = oneshot::channel();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let pending: PendingStates = Arc::new(Mutex::new(HashMap::new()));

    let router = Router::new()
      .route("/", get(index))
      .route(&callback_path, get(authorization_callback))
      .route(REFRESH_PATH, post(refresh_callback))
      .with_state(CallbackState {
        oauth,
        http,
        pending: pending.clone(),
        delivery: Arc::new(Mutex::new(Some(result_tx))),
      });

    let task = tokio::spawn(async move {
      let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = shutdown_rx.await;
      });
      if let Err(e) = server.await {
        tracing::warn!(error = %e, "Callback listener failed");
      }
    });

    tracing::debug!(%addr, "Callback listener started");
    Ok(Self {
      addr,
      pending,
      result,
      shutdown,
      task,
    })
  }

  pub fn addr(&self) -> SocketAddr {
    self.addr
  }

  /// Accept one redirect carrying `state`.
  pub fn register(&self, state: &str, code_verifier: &str) -> Result<(), AuthError> {
    self
      .pending
      .lock()
      .map_err(|e| AuthError::Listener(format!("state map poisoned: {}", e)))?
      .insert(state.to_string(), code_verifier.to_string());
    Ok(())
  }

  /// Wait at most `timeout` for the result, then tear the listener down.
  pub async fn wait(mut self, timeout: Duration) -> Delivery {
    let outcome = tokio::time::timeout(timeout, &mut self.result).await;
    self.stop().await;

    match outcome {
      Err(_) => Err(AuthError::TimedOut(timeout)),
      Ok(Err(_)) => Err(AuthError::CallbackClosed),
      Ok(Ok(delivery)) => delivery,
    }
  }

  pub async fn stop(self) {
    let CallbackServer {
      shutdown, mut task, ..
    } = self;
    let _ = shutdown.send(());

    // Idle browser connections can hold a graceful shutdown open
    if tokio::time::timeout(Duration::from_secs(2), &mut task)
      .await
      .is_err()
    {
      task.abort();
    }
    tracing::debug!("Callback listener stopped");
  }
}

async fn index() -> &'static str {
  "linkmirror authorization listener"
}

#[derive(Debug, Deserialize)]
struct AuthorizationParams {
  state: Option<String>,
  code: Option<String>,
  error: Option<String>,
  error_description: Option<String>,
}

async fn authorization_callback(
  State(callback): State<CallbackState>,
  Query(params): Query<AuthorizationParams>,
) -> Response {
  let Some(code_verifier) = params
    .state
    .as_deref()
    .and_then(|state| callback.take_verifier(state))
  else {
    tracing::warn!("Rejected authorization callback with an unknown state");
    return (StatusCode::BAD_REQUEST, AuthError::StateMismatch.to_string()).into_response();
  };

  if let Some(error) = params.error {
    let message = match params.error_description {
      Some(description) => format!("{}: {}", error, description),
      None => error,
    };
    callback.deliver(Err(AuthError::Api(message.clone())));
    return (StatusCode::BAD_REQUEST, format!("Authorization failed: {}", message)).into_response();
  }

  let Some(code) = params.code.filter(|c| !c.is_empty()) else {
    callback.deliver(Err(AuthError::MalformedResponse(
      "authorization redirect without a code".into(),
    )));
    return (StatusCode::BAD_REQUEST, "Authorization failed: missing code").into_response();
  };

  let outcome = token::exchange_code(&callback.http, &callback.oauth, &code, &code_verifier).await;
  let response = match &outcome {
    Ok(_) => (
      StatusCode::OK,
      "linkmirror is authorized. You can close this window.".to_string(),
    ),
    Err(e) => (StatusCode::BAD_GATEWAY, format!("Authorization failed: {}", e)),
  };
  callback.deliver(outcome);
  response.into_response()
}

#[derive(Deserialize)]
struct RefreshForm {
  refresh_token: String,
}

async fn refresh_callback(
  State(callback): State<CallbackState>,
  Form(form): Form<RefreshForm>,
) -> StatusCode {
  let outcome = token::refresh(&callback.http, &callback.oauth, &form.refresh_token).await;
  let status = if outcome.is_ok() {
    StatusCode::OK
  } else {
    StatusCode::BAD_GATEWAY
  };
  callback.deliver(outcome);
  status
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::Json;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  async fn start_token_server(exchanges: Arc<AtomicUsize>) -> String {
    let router = Router::new().route(
      "/token",
      post(move || {
        let exchanges = exchanges.clone();
        async move {
          exchanges.fetch_add(1, Ordering::SeqCst);
          Json(json!({
            "access_token": "fresh-access",
            "expires_in": 3600,
            "refresh_token": "fresh-refresh",
            "refresh_expires_in": 5_184_000
          }))
        }
      }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{}/token", addr)
  }

  fn oauth(token_url: String) -> Arc<OAuthConfig> {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
      .unwrap()
      .local_addr()
      .unwrap()
      .port();
    Arc::new(OAuthConfig {
      client_id: "client-abc".into(),
      redirect_uri: format!("http://127.0.0.1:{}/airtable-oauth", port),
      authorize_url: "https://airtable.example/oauth2/v1/authorize".into(),
      token_url,
      scopes: vec!["data.records:read".into()],
      timeout_secs: 5,
      client_secret: None,
    })
  }

  #[tokio::test]
  async fn test_state_is_accepted_only_once() {
    let exchanges = Arc::new(AtomicUsize::new(0));
    let token_url = start_token_server(exchanges.clone()).await;
    let http = reqwest::Client::new();
    let server = CallbackServer::start(oauth(token_url), http.clone()).await.unwrap();
    server.register("state-1", "verifier-1").unwrap();
    let callback = format!("http://{}/airtable-oauth", server.addr());

    let first = http
      .get(&callback)
      .query(&[("state", "state-1"), ("code", "code-1")])
      .send()
      .await
      .unwrap();
    let replay = http
      .get(&callback)
      .query(&[("state", "state-1"), ("code", "code-2")])
      .send()
      .await
      .unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    assert_eq!(exchanges.load(Ordering::SeqCst), 1);

    let credential = server.wait(Duration::from_secs(5)).await.unwrap();
    assert_eq!(credential.access_token, "fresh-access");
  }

  #[tokio::test]
  async fn test_unanswered_flow_times_out() {
    let server = CallbackServer::start(oauth("http://127.0.0.1:1/token".into()), reqwest::Client::new())
      .await
      .unwrap();

    let outcome = server.wait(Duration::from_millis(100)).await;

    assert!(matches!(outcome, Err(AuthError::TimedOut(_))));
  }

  #[tokio::test]
  async fn test_listener_refuses_root_redirect() {
    let mut config = (*oauth("http://127.0.0.1:1/token".into())).clone();
    config.redirect_uri = config.redirect_uri.replace("/airtable-oauth", "/");

    let err = CallbackServer::start(Arc::new(config), reqwest::Client::new())
      .await
      .err()
      .unwrap();

    assert!(matches!(err, AuthError::Listener(_)));
  }
}
