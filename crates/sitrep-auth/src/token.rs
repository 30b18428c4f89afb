//! Signed bearer tokens.
//!
//! Wire form: `sitrep.<base64url(claims)>.<base64url(mac)>` where claims is
//! the JSON `{sub, exp}` and mac is HMAC-SHA256 over everything before the
//! second dot, keyed with the server-held secret. Verification recomputes
//! the MAC (constant-time comparison) before it ever parses the claims.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as B64};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac as _};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Minimum signing-secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

const PREFIX: &str = "sitrep";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
  sub: Uuid,
  /// Unix seconds.
  exp: i64,
}

/// Issues and verifies bearer tokens with a single server-held secret.
#[derive(Clone, Debug)]
pub struct TokenSigner {
  mac: HmacSha256,
}

impl TokenSigner {
  /// Build a signer. Rejects secrets shorter than [`MIN_SECRET_LEN`] bytes.
  pub fn new(secret: &[u8]) -> Result<Self> {
    if secret.len() < MIN_SECRET_LEN {
      return Err(Error::WeakSecret(secret.len()));
    }
    let mac = HmacSha256::new_from_slice(secret)
      .map_err(|e| Error::Encoding(e.to_string()))?;
    Ok(Self { mac })
  }

  /// Issue a token for `user_id`, expiring `ttl` from now.
  pub fn issue(&self, user_id: Uuid, ttl: Duration) -> Result<String> {
    let claims = Claims { sub: user_id, exp: (Utc::now() + ttl).timestamp() };
    let payload = B64.encode(
      serde_json::to_vec(&claims).map_err(|e| Error::Encoding(e.to_string()))?,
    );
    let signed = format!("{PREFIX}.{payload}");

    let mut mac = self.mac.clone();
    mac.update(signed.as_bytes());
    let tag = B64.encode(mac.finalize().into_bytes());

    Ok(format!("{signed}.{tag}"))
  }

  /// Verify a token and return its subject id.
  pub fn verify(&self, token: &str) -> Result<Uuid> {
    let rest = token
      .strip_prefix(PREFIX)
      .and_then(|r| r.strip_prefix('.'))
      .ok_or(Error::Malformed)?;
    let (payload, tag) = rest.rsplit_once('.').ok_or(Error::Malformed)?;
    let tag = B64.decode(tag).map_err(|_| Error::Malformed)?;

    let mut mac = self.mac.clone();
    mac.update(format!("{PREFIX}.{payload}").as_bytes());
    mac.verify_slice(&tag).map_err(|_| Error::BadSignature)?;

    // Signature checked; the claims are now trusted input.
    let claims: Claims = B64
      .decode(payload)
      .ok()
      .and_then(|bytes| serde_json::from_slice(&bytes).ok())
      .ok_or(Error::Malformed)?;

    if claims.exp < Utc::now().timestamp() {
      return Err(Error::Expired);
    }
    Ok(claims.sub)
  }
}
