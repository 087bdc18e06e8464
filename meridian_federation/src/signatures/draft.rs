//! Draft-Cavage HTTP signature dialect (the one the teacher's
//! `http-signature-normalization-actix` dependency already speaks). §4.2.

use chrono::{DateTime, Duration, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::{Signer, Verifier};
use std::collections::HashMap;

use super::common::{
  check_date_within_bounds, check_host_matches, check_rsa_key_size, check_signature_size_matches_key,
  digest_body_base64, verify_digest_header, DigestAlg, RequestParts,
};
use meridian_utils::{MeridianError, MeridianErrorKind};

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

fn auth_failure(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(
    anyhow::anyhow!("{}", msg.into()),
    MeridianErrorKind::AuthenticationFailure,
  )
}

#[derive(Debug, Clone)]
pub struct DraftSignature {
  pub key_id: String,
  pub algorithm: String,
  pub headers: Vec<String>,
  pub signature_b64: String,
}

/// Builds the signature base string by iterating `headers` in order,
/// rendering `(request-target)` specially and every other header as
/// `lowercased-name: comma-space-joined values`.
fn build_signing_base(req: &RequestParts, headers: &[String]) -> Result<String, MeridianError> {
  let mut seen = std::collections::HashSet::new();
  let mut lines = Vec::with_capacity(headers.len());
  for name in headers {
    let lname = name.to_ascii_lowercase();
    if !seen.insert(lname.clone()) {
      return Err(malformed(format!("duplicate signed header {:?}", name)));
    }
    if lname == "(request-target)" {
      lines.push(format!(
        "(request-target): {} {}",
        req.method.to_ascii_lowercase(),
        req.request_target()
      ));
    } else {
      let value = req
        .header_joined(&lname)
        .ok_or_else(|| malformed(format!("missing signed header {:?}", name)))?;
      lines.push(format!("{}: {}", lname, value));
    }
  }
  Ok(lines.join("\n"))
}

/// Signs an outbound request, producing the `Signature` and (for POSTs)
/// `Digest` header values to attach.
pub fn sign(
  req: &RequestParts,
  body: Option<&[u8]>,
  key_id: &str,
  private_key: &PKey<Private>,
  now: DateTime<Utc>,
) -> Result<(String, Option<String>, String), MeridianError> {
  let mut headers = vec!["(request-target)".to_string(), "host".to_string(), "date".to_string()];
  let digest_header = body.map(|b| format!("SHA-256={}", digest_body_base64(b, DigestAlg::Sha256)));
  if digest_header.is_some() {
    headers.push("digest".to_string());
  }

  let mut req_with_date = req.clone();
  let date_str = httpdate::fmt_http_date(now.into());
  req_with_date
    .headers
    .insert("date".to_string(), vec![date_str.clone()]);
  if let Some(ref d) = digest_header {
    req_with_date.headers.insert("digest".to_string(), vec![d.clone()]);
  }

  let base = build_signing_base(&req_with_date, &headers)?;
  let mut signer =
    Signer::new(MessageDigest::sha256(), private_key).map_err(|e| anyhow::anyhow!("signer init: {}", e))?;
  signer
    .update(base.as_bytes())
    .map_err(|e| anyhow::anyhow!("signer update: {}", e))?;
  let signature = signer.sign_to_vec().map_err(|e| anyhow::anyhow!("signer finish: {}", e))?;
  let sig_b64 = base64::encode(signature);

  let signature_header = format!(
    r#"keyId="{}",algorithm="hs2019",headers="{}",signature="{}""#,
    key_id,
    headers.join(" "),
    sig_b64
  );
  Ok((signature_header, digest_header, date_str))
}

/// Parses a `Signature:` header's comma-separated `key="value"` pairs.
fn parse_signature_header(raw: &str) -> Result<HashMap<String, String>, MeridianError> {
  let mut map = HashMap::new();
  // Split on commas that are outside quotes.
  let mut depth_quote = false;
  let mut current = String::new();
  let mut parts = Vec::new();
  for c in raw.chars() {
    if c == '"' {
      depth_quote = !depth_quote;
      current.push(c);
    } else if c == ',' && !depth_quote {
      parts.push(std::mem::take(&mut current));
    } else {
      current.push(c);
    }
  }
  if !current.is_empty() {
    parts.push(current);
  }
  for part in parts {
    let part = part.trim();
    let (key, value) = part
      .split_once('=')
      .ok_or_else(|| malformed(format!("malformed signature parameter {:?}", part)))?;
    let value = value.trim().trim_matches('"');
    map.insert(key.trim().to_string(), value.to_string());
  }
  Ok(map)
}

/// Extracts a draft-Cavage signature from a received request, without
/// verifying it against a key yet (that requires the resolved actor's
/// public key, fetched by C4).
pub fn extract(
  req: &RequestParts,
  body: &[u8],
  domain: &str,
  now: DateTime<Utc>,
  max_age: Duration,
) -> Result<DraftSignature, MeridianError> {
  let raw_sig = req
    .header("signature")
    .ok_or_else(|| malformed("missing Signature header"))?;
  let params = parse_signature_header(raw_sig)?;

  let key_id = params
    .get("keyId")
    .ok_or_else(|| malformed("missing keyId parameter"))?
    .clone();
  let algorithm = params
    .get("algorithm")
    .ok_or_else(|| malformed("missing algorithm parameter"))?
    .clone();
  if algorithm != "rsa-sha256" && algorithm != "hs2019" {
    return Err(malformed(format!("unsupported algorithm {:?}", algorithm)));
  }
  let headers_str = params
    .get("headers")
    .ok_or_else(|| malformed("missing headers parameter"))?
    .clone();
  let signature_b64 = params
    .get("signature")
    .ok_or_else(|| malformed("missing signature parameter"))?
    .clone();

  let headers: Vec<String> = headers_str.split(' ').map(|s| s.to_string()).collect();
  let required: Vec<&str> = if req.method.eq_ignore_ascii_case("post") {
    vec!["(request-target)", "host", "date", "digest"]
  } else {
    vec!["(request-target)", "host", "date"]
  };
  for r in &required {
    if !headers.iter().any(|h| h.eq_ignore_ascii_case(r)) {
      return Err(malformed(format!("signed headers missing required component {:?}", r)));
    }
  }
  // Reject duplicate header names in the listed set up front.
  let mut seen = std::collections::HashSet::new();
  for h in &headers {
    if !seen.insert(h.to_ascii_lowercase()) {
      return Err(malformed(format!("duplicate header name {:?} in headers list", h)));
    }
  }

  check_host_matches(req, domain)?;
  let date_header = req.header("date").ok_or_else(|| malformed("missing Date header"))?;
  check_date_within_bounds(date_header, now, max_age)?;

  if req.method.eq_ignore_ascii_case("post") {
    let digest_header = req.header("digest").ok_or_else(|| malformed("missing Digest header"))?;
    let (alg_name, b64) = digest_header
      .split_once('=')
      .ok_or_else(|| malformed("malformed Digest header"))?;
    let alg = match alg_name {
      "SHA-256" => DigestAlg::Sha256,
      other => return Err(malformed(format!("unsupported digest algorithm {:?}", other))),
    };
    verify_digest_header(body, b64, alg)?;
  }

  Ok(DraftSignature {
    key_id,
    algorithm,
    headers,
    signature_b64,
  })
}

impl DraftSignature {
  /// Verifies the signature bytes against `public_key`, reconstructing the
  /// signing base from the original request.
  pub fn verify(
    &self,
    req: &RequestParts,
    public_key: &PKey<Public>,
  ) -> Result<(), MeridianError> {
    if let Ok(rsa) = public_key.rsa() {
      check_rsa_key_size(&rsa)?;
    }
    let base = build_signing_base(req, &self.headers)?;
    let signature = base64::decode(&self.signature_b64).map_err(|e| malformed(format!("bad base64 signature: {}", e)))?;
    if let Ok(rsa) = public_key.rsa() {
      let rsa: Rsa<Public> = rsa;
      check_signature_size_matches_key(signature.len(), rsa.size() as usize)?;
    }
    let mut verifier =
      Verifier::new(MessageDigest::sha256(), public_key).map_err(|e| anyhow::anyhow!("verifier init: {}", e))?;
    verifier
      .update(base.as_bytes())
      .map_err(|e| anyhow::anyhow!("verifier update: {}", e))?;
    let ok = verifier
      .verify(&signature)
      .map_err(|e| anyhow::anyhow!("verifier finish: {}", e))?;
    if !ok {
      return Err(auth_failure("draft signature verification failed"));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap as Map;

  fn req(method: &str, path: &str, host: &str) -> RequestParts {
    RequestParts {
      method: method.to_string(),
      path: path.to_string(),
      query: None,
      host: host.to_string(),
      headers: Map::new(),
    }
  }

  fn keypair() -> (PKey<Private>, PKey<Public>) {
    let rsa = Rsa::generate(2048).unwrap();
    let priv_pem = rsa.private_key_to_pem().unwrap();
    let pub_pem = rsa.public_key_to_pem().unwrap();
    (
      PKey::private_key_from_pem(&priv_pem).unwrap(),
      PKey::public_key_from_pem(&pub_pem).unwrap(),
    )
  }

  #[test]
  fn test_sign_then_extract_then_verify_get() {
    let (priv_key, pub_key) = keypair();
    let mut r = req("GET", "/users/alice/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_header, digest_header, date_header) =
      sign(&r, None, "https://sender.example/users/bob#main-key", &priv_key, now).unwrap();
    assert!(digest_header.is_none());
    r.headers.insert("signature".to_string(), vec![sig_header]);
    r.headers.insert("date".to_string(), vec![date_header]);

    let extracted = extract(&r, b"", "receiver.example", now, Duration::seconds(300)).unwrap();
    assert_eq!(extracted.key_id, "https://sender.example/users/bob#main-key");
    extracted.verify(&r, &pub_key).unwrap();
  }

  #[test]
  fn test_sign_then_extract_post_with_digest() {
    let (priv_key, pub_key) = keypair();
    let mut r = req("POST", "/inbox", "receiver.example");
    let body = br#"{"type":"Follow"}"#;
    let now = Utc::now();
    let (sig_header, digest_header, date_header) =
      sign(&r, Some(body), "https://sender.example/users/bob#main-key", &priv_key, now).unwrap();
    r.headers.insert("signature".to_string(), vec![sig_header]);
    r.headers.insert("date".to_string(), vec![date_header]);
    r.headers
      .insert("digest".to_string(), vec![digest_header.unwrap()]);

    let extracted = extract(&r, body, "receiver.example", now, Duration::seconds(300)).unwrap();
    extracted.verify(&r, &pub_key).unwrap();
  }

  #[test]
  fn test_mutated_body_fails_digest() {
    let (priv_key, _pub_key) = keypair();
    let mut r = req("POST", "/inbox", "receiver.example");
    let body = br#"{"type":"Follow"}"#;
    let now = Utc::now();
    let (sig_header, digest_header, date_header) =
      sign(&r, Some(body), "https://sender.example/users/bob#main-key", &priv_key, now).unwrap();
    r.headers.insert("signature".to_string(), vec![sig_header]);
    r.headers.insert("date".to_string(), vec![date_header]);
    r.headers
      .insert("digest".to_string(), vec![digest_header.unwrap()]);

    let tampered_body = br#"{"type":"Undo"}"#;
    let result = extract(&r, tampered_body, "receiver.example", now, Duration::seconds(300));
    assert!(result.is_err());
  }

  #[test]
  fn test_expired_date_rejected() {
    let (priv_key, _pub_key) = keypair();
    let mut r = req("GET", "/users/alice/inbox", "receiver.example");
    let signed_at = Utc::now() - Duration::seconds(600);
    let (sig_header, _digest, date_header) =
      sign(&r, None, "https://sender.example/users/bob#main-key", &priv_key, signed_at).unwrap();
    r.headers.insert("signature".to_string(), vec![sig_header]);
    r.headers.insert("date".to_string(), vec![date_header]);

    let result = extract(&r, b"", "receiver.example", Utc::now(), Duration::seconds(300));
    assert!(result.is_err());
  }

  #[test]
  fn test_mutated_signed_component_fails_verify() {
    let (priv_key, pub_key) = keypair();
    let mut r = req("GET", "/users/alice/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_header, _digest, date_header) =
      sign(&r, None, "https://sender.example/users/bob#main-key", &priv_key, now).unwrap();
    r.headers.insert("signature".to_string(), vec![sig_header]);
    r.headers.insert("date".to_string(), vec![date_header]);

    let extracted = extract(&r, b"", "receiver.example", now, Duration::seconds(300)).unwrap();
    // Mutate the path after signing: verification must now fail.
    r.path = "/users/mallory/inbox".to_string();
    assert!(extracted.verify(&r, &pub_key).is_err());
  }
}
