//! Shared request representation and checks used by both signature
//! dialects (C2). Grounded on the header/digest handling in the teacher's
//! `http-signature-normalization-actix` dependency, generalized to cover
//! RFC-9421 as well as the draft-Cavage dialect it was written for.

use base64;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest as Sha2Digest, Sha256, Sha512};
use std::collections::HashMap;

use meridian_utils::{MeridianError, MeridianErrorKind};

/// An already-parsed HTTP request, the boundary object the core consumes
/// instead of owning a TCP/TLS listener (§1 scope note).
#[derive(Debug, Clone)]
pub struct RequestParts {
  pub method: String,
  pub path: String,
  pub query: Option<String>,
  pub host: String,
  /// Lowercased header name → all values in arrival order, matching HTTP's
  /// multi-value-header semantics.
  pub headers: HashMap<String, Vec<String>>,
}

impl RequestParts {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .and_then(|values| values.first())
      .map(|s| s.as_str())
  }

  pub fn header_joined(&self, name: &str) -> Option<String> {
    self
      .headers
      .get(&name.to_ascii_lowercase())
      .map(|values| values.join(", "))
  }

  pub fn request_target(&self) -> String {
    match &self.query {
      Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
      _ => self.path.clone(),
    }
  }

  pub fn target_uri(&self) -> String {
    format!("https://{}{}", self.host, self.request_target())
  }
}

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

fn auth_failure(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(
    anyhow::anyhow!("{}", msg.into()),
    MeridianErrorKind::AuthenticationFailure,
  )
}

/// Common contract checks shared by both dialects: host match, date within
/// bounds of `now`, key size.
pub fn check_host_matches(req: &RequestParts, domain: &str) -> Result<(), MeridianError> {
  let req_host = req.host.split(':').next().unwrap_or(&req.host);
  let domain_host = domain.split(':').next().unwrap_or(domain);
  if !req_host.eq_ignore_ascii_case(domain_host) {
    return Err(auth_failure(format!(
      "host header {:?} does not match receiving domain {:?}",
      req.host, domain
    )));
  }
  Ok(())
}

/// Parses an HTTP-date and checks it is within `max_age` of `now`, in
/// either direction (§4.2: "date within ±MaxRequestAge of now").
pub fn check_date_within_bounds(
  date_header: &str,
  now: DateTime<Utc>,
  max_age: Duration,
) -> Result<DateTime<Utc>, MeridianError> {
  let parsed = httpdate::parse_http_date(date_header)
    .map(DateTime::<Utc>::from)
    .map_err(|e| malformed(format!("unparseable Date header {:?}: {}", date_header, e)))?;
  let delta = if parsed > now { parsed - now } else { now - parsed };
  if delta > max_age {
    return Err(auth_failure(format!(
      "request date {} is outside the ±{:?} window around {}",
      parsed, max_age, now
    )));
  }
  Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlg {
  Sha256,
  Sha512,
}

/// Computes the body digest in the form required by the given dialect
/// convention; callers format the header string themselves since the two
/// dialects use different prefixes (`SHA-256=` vs. `sha-256=:...:`).
pub fn digest_body(body: &[u8], alg: DigestAlg) -> Vec<u8> {
  match alg {
    DigestAlg::Sha256 => Sha256::digest(body).to_vec(),
    DigestAlg::Sha512 => Sha512::digest(body).to_vec(),
  }
}

pub fn digest_body_base64(body: &[u8], alg: DigestAlg) -> String {
  base64::encode(digest_body(body, alg))
}

pub fn verify_digest_header(body: &[u8], expected_b64: &str, alg: DigestAlg) -> Result<(), MeridianError> {
  let actual = digest_body_base64(body, alg);
  if actual != expected_b64 {
    return Err(auth_failure("body digest mismatch"));
  }
  Ok(())
}

/// RSA key size bound: [2048, 8192] bits (§4.2).
pub fn check_rsa_key_size(key: &openssl::rsa::Rsa<openssl::pkey::Public>) -> Result<(), MeridianError> {
  let bits = key.size() * 8;
  if !(2048..=8192).contains(&bits) {
    return Err(auth_failure(format!("RSA key size {} bits out of [2048, 8192]", bits)));
  }
  Ok(())
}

/// Signature byte length must equal the RSA key size in bytes (§4.2).
pub fn check_signature_size_matches_key(sig_len: usize, key_size_bytes: usize) -> Result<(), MeridianError> {
  if sig_len != key_size_bytes {
    return Err(auth_failure(format!(
      "signature length {} does not match key size {}",
      sig_len, key_size_bytes
    )));
  }
  Ok(())
}
