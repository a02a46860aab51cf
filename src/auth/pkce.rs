use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Per-attempt secrets of an authorization-code-with-PKCE flow
#[derive(Clone)]
pub struct PkceChallenge {
  /// Anti-forgery token echoed back by the authorization server
  pub state: String,
  pub code_verifier: String,
  pub code_challenge: String,
}

impl PkceChallenge {
  pub fn generate() -> Self {
    // 75 bytes -> 100 chars, 72 bytes -> 96 chars (RFC 7636 allows 43..=128)
    let state = random_token(75);
    let code_verifier = random_token(72);
    let code_challenge = challenge_for(&code_verifier);

    Self {
      state,
      code_verifier,
      code_challenge,
    }
  }
}

/// base64url(sha256(verifier)) without padding
pub fn challenge_for(code_verifier: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(code_verifier.as_bytes());
  URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn random_token(len: usize) -> String {
  let mut bytes = vec![0u8; len];
  rand::thread_rng().fill_bytes(&mut bytes);
  URL_SAFE_NO_PAD.encode(bytes)
}
