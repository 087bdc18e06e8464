//! C2: HTTP signature engine. Dialect selection follows §4.2: RFC-9421 is
//! chosen whenever a `Signature-Input` header is present, otherwise the
//! draft-Cavage dialect is tried. Grounded on the teacher's
//! `http-signature-normalization-actix` dependency for the draft side and on
//! `activitypub-federation-rust::http_signatures` for the RFC-9421 side.

pub mod common;
pub mod draft;
pub mod rfc9421;

use chrono::{DateTime, Duration, Utc};
use openssl::pkey::{PKey, Public};

pub use common::RequestParts;
use meridian_utils::MeridianError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
  Draft,
  Rfc9421,
}

#[derive(Debug, Clone)]
pub enum VerifiedSignature {
  Draft(draft::DraftSignature),
  Rfc9421(rfc9421::Rfc9421Signature),
}

impl VerifiedSignature {
  pub fn dialect(&self) -> Dialect {
    match self {
      VerifiedSignature::Draft(_) => Dialect::Draft,
      VerifiedSignature::Rfc9421(_) => Dialect::Rfc9421,
    }
  }

  pub fn key_id(&self) -> &str {
    match self {
      VerifiedSignature::Draft(s) => &s.key_id,
      VerifiedSignature::Rfc9421(s) => &s.key_id,
    }
  }

  /// Ed25519 keys are only ever carried by the RFC-9421 dialect (§4.2); a
  /// draft-dialect signature paired with an Ed25519 key is a contradiction
  /// the caller should treat as a verification failure, not dispatch here.
  pub fn verify_rsa(&self, req: &RequestParts, public_key: &PKey<Public>) -> Result<(), MeridianError> {
    match self {
      VerifiedSignature::Draft(s) => s.verify(req, public_key),
      VerifiedSignature::Rfc9421(s) => s.verify_rsa(req, public_key),
    }
  }

  pub fn verify_ed25519(
    &self,
    req: &RequestParts,
    public_key: &ed25519_dalek::PublicKey,
  ) -> Result<(), MeridianError> {
    match self {
      VerifiedSignature::Draft(_) => Err(meridian_utils::MeridianError::with_kind(
        anyhow::anyhow!("draft-Cavage dialect does not carry Ed25519 signatures"),
        meridian_utils::MeridianErrorKind::MalformedInput,
      )),
      VerifiedSignature::Rfc9421(s) => s.verify_ed25519(req, public_key),
    }
  }
}

/// Selects a dialect by presence of `Signature-Input` and extracts the
/// signature, validating dialect-independent envelope checks (host, date
/// window, body digest) along the way.
pub fn extract(
  req: &RequestParts,
  body: &[u8],
  domain: &str,
  now: DateTime<Utc>,
  max_age: Duration,
) -> Result<VerifiedSignature, MeridianError> {
  if req.headers.contains_key("signature-input") {
    rfc9421::extract(req, body, domain, now, max_age).map(VerifiedSignature::Rfc9421)
  } else {
    draft::extract(req, body, domain, now, max_age).map(VerifiedSignature::Draft)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use openssl::rsa::Rsa;
  use std::collections::HashMap;

  fn req(method: &str, path: &str, host: &str) -> RequestParts {
    RequestParts {
      method: method.to_string(),
      path: path.to_string(),
      query: None,
      host: host.to_string(),
      headers: HashMap::new(),
    }
  }

  #[test]
  fn test_selects_rfc9421_when_signature_input_present() {
    let rsa = Rsa::generate(2048).unwrap();
    let priv_key = PKey::private_key_from_pem(&rsa.private_key_to_pem().unwrap()).unwrap();
    let pub_key = PKey::public_key_from_pem(&rsa.public_key_to_pem().unwrap()).unwrap();

    let r = req("GET", "/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_input, sig_header) = rfc9421::sign_rsa(
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

    let sig = extract(&r2, b"", "receiver.example", now, Duration::seconds(300)).unwrap();
    assert_eq!(sig.dialect(), Dialect::Rfc9421);
    sig.verify_rsa(&r2, &pub_key).unwrap();
  }

  #[test]
  fn test_falls_back_to_draft_when_no_signature_input() {
    let rsa = Rsa::generate(2048).unwrap();
    let priv_key = PKey::private_key_from_pem(&rsa.private_key_to_pem().unwrap()).unwrap();
    let pub_key = PKey::public_key_from_pem(&rsa.public_key_to_pem().unwrap()).unwrap();

    let r = req("GET", "/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_header, _digest, date_header) =
      draft::sign(&r, None, "https://sender.example/users/bob#main-key", &priv_key, now).unwrap();

    let mut r2 = r.clone();
    r2.headers.insert("signature".to_string(), vec![sig_header]);
    r2.headers.insert("date".to_string(), vec![date_header]);

    let sig = extract(&r2, b"", "receiver.example", now, Duration::seconds(300)).unwrap();
    assert_eq!(sig.dialect(), Dialect::Draft);
    sig.verify_rsa(&r2, &pub_key).unwrap();
  }

  #[test]
  fn test_ed25519_under_draft_dialect_rejected() {
    use ed25519_dalek::Keypair;
    use rand::rngs::OsRng;

    let rsa = Rsa::generate(2048).unwrap();
    let priv_key = PKey::private_key_from_pem(&rsa.private_key_to_pem().unwrap()).unwrap();

    let r = req("GET", "/inbox", "receiver.example");
    let now = Utc::now();
    let (sig_header, _digest, date_header) =
      draft::sign(&r, None, "https://sender.example/users/bob#main-key", &priv_key, now).unwrap();
    let mut r2 = r.clone();
    r2.headers.insert("signature".to_string(), vec![sig_header]);
    r2.headers.insert("date".to_string(), vec![date_header]);
    let sig = extract(&r2, b"", "receiver.example", now, Duration::seconds(300)).unwrap();

    let mut csprng = OsRng {};
    let keypair = Keypair::generate(&mut csprng);
    assert!(sig.verify_ed25519(&r2, &keypair.public).is_err());
  }
}
