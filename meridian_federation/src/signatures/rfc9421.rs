//! RFC-9421 ("HTTP Message Signatures") dialect. New relative to the
//! teacher, which only speaks the draft-Cavage predecessor; grounded on the
//! `Signature-Input`/`Signature` field layout
//! `activitypub-federation-rust::http_signatures` demonstrates, and on the
//! literal grammar in spec §4.2.

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{PublicKey as EdPublicKey, Signature as EdSignature, Verifier as EdVerifier};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::sign::{Signer, Verifier};
use std::collections::HashMap;

use super::common::{
  check_date_within_bounds, check_host_matches, check_rsa_key_size, check_signature_size_matches_key,
  digest_body_base64, DigestAlg, RequestParts,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlg {
  RsaV15Sha256,
  Ed25519,
}

impl KeyAlg {
  fn wire_name(self) -> &'static str {
    match self {
      KeyAlg::RsaV15Sha256 => "rsa-v1_5-sha256",
      KeyAlg::Ed25519 => "ed25519",
    }
  }

  fn from_wire_name(s: &str) -> Option<KeyAlg> {
    match s {
      "rsa-v1_5-sha256" => Some(KeyAlg::RsaV15Sha256),
      "ed25519" => Some(KeyAlg::Ed25519),
      _ => None,
    }
  }
}

const ALLOWED_DERIVED_COMPONENTS: &[&str] = &[
  "@method",
  "@target-uri",
  "@request-target",
  "@path",
  "@authority",
  "@query",
];

fn derived_component_value(req: &RequestParts, name: &str) -> Result<String, MeridianError> {
  Ok(match name {
    "@method" => req.method.to_ascii_uppercase(),
    "@target-uri" => req.target_uri(),
    "@request-target" => format!("{} {}", req.method.to_ascii_lowercase(), req.request_target()),
    "@path" => req.path.clone(),
    "@authority" => req.host.clone(),
    "@query" => format!("?{}", req.query.clone().unwrap_or_default()),
    other => return Err(malformed(format!("unsupported derived component {:?}", other))),
  })
}

/// Builds the covered-content signature base per RFC 9421 §2.5: one line
/// per covered component, followed by the `@signature-params` line.
fn build_signature_base(
  req: &RequestParts,
  components: &[String],
  params_line_value: &str,
) -> Result<String, MeridianError> {
  let mut lines = Vec::with_capacity(components.len() + 1);
  for c in components {
    let value = if c.starts_with('@') {
      if !ALLOWED_DERIVED_COMPONENTS.contains(&c.as_str()) {
        return Err(malformed(format!("unsupported derived component {:?}", c)));
      }
      derived_component_value(req, c)?
    } else {
      req
        .header_joined(c)
        .ok_or_else(|| malformed(format!("missing covered header {:?}", c)))?
    };
    lines.push(format!("\"{}\": {}", c, value));
  }
  lines.push(format!("\"@signature-params\": {}", params_line_value));
  Ok(lines.join("\n"))
}

fn format_component_list(components: &[String]) -> String {
  let quoted: Vec<String> = components.iter().map(|c| format!("\"{}\"", c)).collect();
  format!("({})", quoted.join(" "))
}

#[derive(Debug, Clone)]
pub struct Rfc9421Signature {
  pub key_id: String,
  pub alg: Option<KeyAlg>,
  pub components: Vec<String>,
  pub created: i64,
  pub expires: Option<i64>,
  pub signature_bytes: Vec<u8>,
  params_line_value: String,
}

/// Signs an outbound request using the given component list and algorithm.
/// `digest_fn`/body digest is the caller's responsibility: pass the already
/// rendered `content-digest` header value as a covered header if required.
#[allow(clippy::too_many_arguments)]
pub fn sign(
  req: &RequestParts,
  key_id: &str,
  now: DateTime<Utc>,
  expires: Option<DateTime<Utc>>,
  alg: KeyAlg,
  mut components: Vec<String>,
  sign_fn: impl FnOnce(&[u8]) -> Result<Vec<u8>, MeridianError>,
) -> Result<(String, String), MeridianError> {
  if components.is_empty() {
    components.push("@method".to_string());
  }
  let created = now.timestamp();
  let mut params = format!("{};created={}", format_component_list(&components), created);
  params.push_str(&format!(";keyid=\"{}\"", key_id));
  params.push_str(&format!(";alg=\"{}\"", alg.wire_name()));
  if let Some(exp) = expires {
    params.push_str(&format!(";expires={}", exp.timestamp()));
  }

  let base = build_signature_base(req, &components, &params)?;
  let signature = sign_fn(base.as_bytes())?;
  let sig_b64 = base64::encode(signature);

  let signature_input = format!("sig1={}", params);
  let signature_header = format!("sig1=:{}:", sig_b64);
  Ok((signature_input, signature_header))
}

pub fn sign_rsa(
  req: &RequestParts,
  key_id: &str,
  now: DateTime<Utc>,
  expires: Option<DateTime<Utc>>,
  components: Vec<String>,
  private_key: &PKey<Private>,
) -> Result<(String, String), MeridianError> {
  sign(req, key_id, now, expires, KeyAlg::RsaV15Sha256, components, |base| {
    let mut signer =
      Signer::new(MessageDigest::sha256(), private_key).map_err(|e| anyhow::anyhow!("signer init: {}", e))?;
    signer.update(base).map_err(|e| anyhow::anyhow!("signer update: {}", e))?;
    signer.sign_to_vec().map_err(|e| anyhow::anyhow!("signer finish: {}", e).into())
  })
}

pub fn sign_ed25519(
  req: &RequestParts,
  key_id: &str,
  now: DateTime<Utc>,
  expires: Option<DateTime<Utc>>,
  components: Vec<String>,
  private_key: &ed25519_dalek::Keypair,
) -> Result<(String, String), MeridianError> {
  sign(req, key_id, now, expires, KeyAlg::Ed25519, components, |base| {
    use ed25519_dalek::Signer;
    Ok(private_key.sign(base).to_bytes().to_vec())
  })
}

/// Parses the `;param=value` suffix of a `Signature-Input` member.
fn parse_params(raw: &str) -> Result<HashMap<String, String>, MeridianError> {
  let mut map = HashMap::new();
  for part in raw.split(';').skip(1) {
    let part = part.trim();
    if part.is_empty() {
      continue;
    }
    let (key, value) = part
      .split_once('=')
      .ok_or_else(|| malformed(format!("malformed signature-input parameter {:?}", part)))?;
    let key = key.trim();
    if !["keyid", "created", "expires", "alg", "tag"].contains(&key) {
      return Err(malformed(format!("unsupported signature-input parameter {:?}", key)));
    }
    map.insert(key.to_string(), value.trim().trim_matches('"').to_string());
  }
  Ok(map)
}

fn parse_component_list(raw: &str) -> Result<Vec<String>, MeridianError> {
  let raw = raw
    .strip_prefix('(')
    .and_then(|s| s.strip_suffix(')'))
    .ok_or_else(|| malformed("malformed component list"))?;
  Ok(
    raw
      .split_whitespace()
      .map(|s| s.trim_matches('"').to_string())
      .collect(),
  )
}

/// Extracts an RFC-9421 signature from a received request.
pub fn extract(
  req: &RequestParts,
  body: &[u8],
  domain: &str,
  now: DateTime<Utc>,
  max_age: Duration,
) -> Result<Rfc9421Signature, MeridianError> {
  let sig_input_values = req
    .headers
    .get("signature-input")
    .ok_or_else(|| malformed("missing Signature-Input header"))?;
  if sig_input_values.len() != 1 {
    return Err(malformed("at most one Signature-Input header is allowed"));
  }
  let sig_values = req
    .headers
    .get("signature")
    .ok_or_else(|| malformed("missing Signature header"))?;
  if sig_values.len() != 1 {
    return Err(malformed("at most one Signature header is allowed"));
  }

  let sig_input = &sig_input_values[0];
  let (label, rest) = sig_input
    .split_once('=')
    .ok_or_else(|| malformed("malformed Signature-Input header"))?;
  let label = label.trim();
  let (component_list_raw, params_raw) = rest
    .split_once(';')
    .map(|(a, b)| (a, format!(";{}", b)))
    .unwrap_or((rest, String::new()));
  let components = parse_component_list(component_list_raw)?;
  let params = parse_params(&format!("x{}", params_raw))?;

  let key_id = params
    .get("keyid")
    .ok_or_else(|| malformed("missing keyid parameter"))?
    .clone();
  let created: i64 = params
    .get("created")
    .ok_or_else(|| malformed("missing created parameter"))?
    .parse()
    .map_err(|_| malformed("malformed created parameter"))?;
  let expires: Option<i64> = params.get("expires").and_then(|v| v.parse().ok());
  let alg = params.get("alg").map(|a| {
    KeyAlg::from_wire_name(a).ok_or_else(|| malformed(format!("unsupported alg {:?}", a)))
  }).transpose()?;

  let sig_header = &sig_values[0];
  let (sig_label, sig_rest) = sig_header
    .split_once('=')
    .ok_or_else(|| malformed("malformed Signature header"))?;
  if sig_label.trim() != label {
    return Err(malformed("Signature label does not match Signature-Input label"));
  }
  let sig_b64 = sig_rest
    .trim()
    .strip_prefix(':')
    .and_then(|s| s.strip_suffix(':'))
    .ok_or_else(|| malformed("malformed Signature value, expected :base64:"))?;
  let signature_bytes = base64::decode(sig_b64).map_err(|e| malformed(format!("bad base64 signature: {}", e)))?;

  let required: Vec<&str> = {
    let mut r = vec!["@method", "@target-uri"];
    if req.method.eq_ignore_ascii_case("post") {
      r.push("content-digest");
    }
    if req.query.as_deref().map(|q| !q.is_empty()).unwrap_or(false) {
      r.push("@query");
    }
    r
  };
  for r in &required {
    if !components.iter().any(|c| c.eq_ignore_ascii_case(r)) {
      return Err(malformed(format!("covered components missing required member {:?}", r)));
    }
  }

  check_host_matches(req, domain)?;
  let created_dt = DateTime::<Utc>::from_utc(
    chrono::NaiveDateTime::from_timestamp(created, 0),
    Utc,
  );
  let in_bounds = check_date_within_bounds(&httpdate::fmt_http_date(created_dt.into()), now, max_age);
  in_bounds?;
  if let Some(expires_ts) = expires {
    if now.timestamp() > expires_ts {
      return Err(auth_failure("signature has expired per its `expires` parameter"));
    }
  }

  if req.method.eq_ignore_ascii_case("post") {
    let content_digest = req
      .header("content-digest")
      .ok_or_else(|| malformed("missing Content-Digest header"))?;
    verify_content_digest(body, content_digest)?;
  }

  let params_line_value = {
    let mut p = format!("{};created={}", format_component_list(&components), created);
    p.push_str(&format!(";keyid=\"{}\"", key_id));
    if let Some(a) = alg {
      p.push_str(&format!(";alg=\"{}\"", a.wire_name()));
    }
    if let Some(e) = expires {
      p.push_str(&format!(";expires={}", e));
    }
    p
  };

  Ok(Rfc9421Signature {
    key_id,
    alg,
    components,
    created,
    expires,
    signature_bytes,
    params_line_value,
  })
}

fn verify_content_digest(body: &[u8], header_value: &str) -> Result<(), MeridianError> {
  for member in header_value.split(',') {
    let member = member.trim();
    if let Some((alg_name, rest)) = member.split_once('=') {
      let alg = match alg_name {
        "sha-256" => DigestAlg::Sha256,
        "sha-512" => DigestAlg::Sha512,
        _ => continue,
      };
      let b64 = rest.trim().trim_start_matches(':').trim_end_matches(':');
      let expected = digest_body_base64(body, alg);
      if b64 == expected {
        return Ok(());
      } else {
        return Err(auth_failure("content-digest mismatch"));
      }
    }
  }
  Err(malformed("unparseable Content-Digest header"))
}

impl Rfc9421Signature {
  /// `alg`, if present, must match the actual key type; absent alg is
  /// inferred from the key (§4.2).
  pub fn verify_rsa(&self, req: &RequestParts, public_key: &PKey<Public>) -> Result<(), MeridianError> {
    if let Some(alg) = self.alg {
      if alg != KeyAlg::RsaV15Sha256 {
        return Err(malformed("alg parameter does not match RSA key"));
      }
    }
    if let Ok(rsa) = public_key.rsa() {
      check_rsa_key_size(&rsa)?;
      check_signature_size_matches_key(self.signature_bytes.len(), rsa.size() as usize)?;
    }
    let base = build_signature_base(req, &self.components, &self.params_line_value)?;
    let mut verifier =
      Verifier::new(MessageDigest::sha256(), public_key).map_err(|e| anyhow::anyhow!("verifier init: {}", e))?;
    verifier
      .update(base.as_bytes())
      .map_err(|e| anyhow::anyhow!("verifier update: {}", e))?;
    let ok = verifier
      .verify(&self.signature_bytes)
      .map_err(|e| anyhow::anyhow!("verifier finish: {}", e))?;
    if !ok {
      return Err(auth_failure("RFC-9421 RSA signature verification failed"));
    }
    Ok(())
  }

  /// Ed25519 verifies over the raw signed bytes (no digest pre-hash).
  pub fn verify_ed25519(&self, req: &RequestParts, public_key: &EdPublicKey) -> Result<(), MeridianError> {
    if let Some(alg) = self.alg {
      if alg != KeyAlg::Ed25519 {
        return Err(malformed("alg parameter does not match Ed25519 key"));
      }
    }
    if self.signature_bytes.len() != 64 {
      return Err(auth_failure("Ed25519 signature must be 64 bytes"));
    }
    let base = build_signature_base(req, &self.components, &self.params_line_value)?;
    let signature = EdSignature::from_bytes(&self.signature_bytes)
      .map_err(|e| auth_failure(format!("malformed Ed25519 signature: {}", e)))?;
    public_key
      .verify(base.as_bytes(), &signature)
      .map_err(|_| auth_failure("Ed25519 signature verification failed"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ed25519_dalek::Keypair;
  use openssl::rsa::Rsa;
  use rand::rngs::OsRng;
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

  #[test]
  fn test_sign_then_extract_then_verify_rsa() {
    let rsa = Rsa::generate(2048).unwrap();
    let priv_key = PKey::private_key_from_pem(&rsa.private_key_to_pem().unwrap()).unwrap();
    let pub_key = PKey::public_key_from_pem(&rsa.public_key_to_pem().unwrap()).unwrap();

    let r = req("GET", "/users/alice/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_input, sig_header) = sign_rsa(
      &r,
      "https://sender.example/users/bob#main-key",
      now,
      None,
      vec!["@method".to_string(), "@target-uri".to_string()],
      &priv_key,
    )
    .unwrap();

    let mut r2 = r.clone();
    r2.headers.insert("signature-input".to_string(), vec![sig_input]);
    r2.headers.insert("signature".to_string(), vec![sig_header]);

    let extracted = extract(&r2, b"", "receiver.example", now, Duration::seconds(300)).unwrap();
    extracted.verify_rsa(&r2, &pub_key).unwrap();
  }

  #[test]
  fn test_sign_then_extract_then_verify_ed25519() {
    let mut csprng = OsRng {};
    let keypair = Keypair::generate(&mut csprng);

    let r = req("GET", "/users/alice/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_input, sig_header) = sign_ed25519(
      &r,
      "https://sender.example/users/bob#ed25519-key",
      now,
      None,
      vec!["@method".to_string(), "@target-uri".to_string()],
      &keypair,
    )
    .unwrap();

    let mut r2 = r.clone();
    r2.headers.insert("signature-input".to_string(), vec![sig_input]);
    r2.headers.insert("signature".to_string(), vec![sig_header]);

    let extracted = extract(&r2, b"", "receiver.example", now, Duration::seconds(300)).unwrap();
    extracted.verify_ed25519(&r2, &keypair.public).unwrap();
  }

  #[test]
  fn test_mutated_component_fails_verify() {
    let mut csprng = OsRng {};
    let keypair = Keypair::generate(&mut csprng);
    let r = req("GET", "/users/alice/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_input, sig_header) = sign_ed25519(
      &r,
      "https://sender.example/users/bob#ed25519-key",
      now,
      None,
      vec!["@method".to_string(), "@target-uri".to_string()],
      &keypair,
    )
    .unwrap();
    let mut r2 = r.clone();
    r2.headers.insert("signature-input".to_string(), vec![sig_input]);
    r2.headers.insert("signature".to_string(), vec![sig_header]);
    let extracted = extract(&r2, b"", "receiver.example", now, Duration::seconds(300)).unwrap();

    r2.path = "/users/mallory/inbox".to_string();
    assert!(extracted.verify_ed25519(&r2, &keypair.public).is_err());
  }

  #[test]
  fn test_missing_content_digest_on_post_rejected() {
    let r = req("POST", "/inbox", "receiver.example");
    let result = extract(&r, b"{}", "receiver.example", Utc::now(), Duration::seconds(300));
    assert!(result.is_err());
  }

  #[test]
  fn test_unsupported_param_rejected() {
    assert!(parse_params(";foo=bar").is_err());
  }

  #[test]
  fn test_disallowed_derived_component_rejected() {
    let r = req("GET", "/inbox", "receiver.example");
    let result = build_signature_base(&r, &["@status".to_string()], "()");
    assert!(result.is_err());
  }
}
