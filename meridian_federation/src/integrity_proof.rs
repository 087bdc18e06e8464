//! C3: FEP-8b32 "eddsa-jcs-2022" data integrity proofs. New relative to the
//! teacher; grounded on the JCS + detached-signature recipe in spec §4.3,
//! using `serde_jcs` for canonicalization and `ed25519-dalek`/`bs58` for the
//! signature, the same pairing `mitra_activitypub`'s proof modules lean on.

use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Keypair, PublicKey, Signature, Signer, Verifier};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use meridian_utils::{MeridianError, MeridianErrorKind};

const CRYPTOSUITE: &str = "eddsa-jcs-2022";
const PROOF_PURPOSE: &str = "assertionMethod";

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
pub struct Proof {
  pub context: Value,
  pub created: DateTime<Utc>,
  pub verification_method: String,
  pub proof_value: String,
}

impl Proof {
  fn config_object(&self) -> Value {
    json!({
      "@context": self.context.clone(),
      "type": "DataIntegrityProof",
      "cryptosuite": CRYPTOSUITE,
      "created": self.created.to_rfc3339_opts(SecondsFormat::Secs, true),
      "proofPurpose": PROOF_PURPOSE,
      "verificationMethod": self.verification_method,
    })
  }

  /// Renders this proof as the `proof` field to attach to a document.
  pub fn to_value(&self) -> Value {
    let mut obj = self.config_object();
    obj
      .as_object_mut()
      .expect("config_object is always an object")
      .insert("proofValue".to_string(), Value::String(self.proof_value.clone()));
    obj
  }
}

fn jcs_canonicalize(value: &Value) -> Result<Vec<u8>, MeridianError> {
  serde_jcs::to_vec(value).map_err(|e| malformed(format!("JCS canonicalization failed: {}", e)))
}

fn sha256(bytes: &[u8]) -> Vec<u8> {
  Sha256::digest(bytes).to_vec()
}

/// Removes the `proof` field from a document, returning the stripped copy.
fn document_without_proof(document: &Value) -> Result<Value, MeridianError> {
  let mut obj = document
    .as_object()
    .cloned()
    .ok_or_else(|| malformed("document must be a JSON object"))?;
  obj.remove("proof");
  Ok(Value::Object(obj))
}

fn document_context(document: &Value) -> Value {
  document.get("@context").cloned().unwrap_or(Value::Null)
}

/// Creates a proof over `document` and returns the document with `proof`
/// attached. `document` must not already carry a `proof` field the caller
/// expects to survive; any existing `proof` is stripped before signing.
pub fn create(
  document: &Value,
  verification_method: &str,
  keypair: &Keypair,
  created: DateTime<Utc>,
) -> Result<Value, MeridianError> {
  let context = document_context(document);
  let stripped = document_without_proof(document)?;
  let doc_hash = sha256(&jcs_canonicalize(&stripped)?);

  let proof = Proof {
    context,
    created,
    verification_method: verification_method.to_string(),
    proof_value: String::new(),
  };
  let cfg_hash = sha256(&jcs_canonicalize(&proof.config_object())?);

  let mut signing_input = cfg_hash;
  signing_input.extend_from_slice(&doc_hash);
  let signature = keypair.sign(&signing_input);
  let proof_value = format!("z{}", bs58::encode(signature.to_bytes()).into_string());

  let mut signed_proof = proof;
  signed_proof.proof_value = proof_value;

  let mut out = stripped
    .as_object()
    .cloned()
    .ok_or_else(|| malformed("document must be a JSON object"))?;
  out.insert("proof".to_string(), signed_proof.to_value());
  Ok(Value::Object(out))
}

/// Verifies the proof embedded in `document` against `public_key`. Returns a
/// single opaque error on any mismatch (malformed proof, context mismatch,
/// bad signature), per §4.3's "reverses the process and returns a single
/// error on any mismatch".
pub fn verify(document: &Value, public_key: &PublicKey) -> Result<(), MeridianError> {
  let obj = document.as_object().ok_or_else(|| malformed("document must be a JSON object"))?;
  let proof_value_obj = obj.get("proof").ok_or_else(|| auth_failure("document has no proof"))?;
  let proof_obj: &Map<String, Value> = proof_value_obj
    .as_object()
    .ok_or_else(|| auth_failure("proof field must be an object"))?;

  let cryptosuite = proof_obj
    .get("cryptosuite")
    .and_then(|v| v.as_str())
    .ok_or_else(|| auth_failure("proof missing cryptosuite"))?;
  if cryptosuite != CRYPTOSUITE {
    return Err(auth_failure(format!("unsupported cryptosuite {:?}", cryptosuite)));
  }
  let proof_type = proof_obj.get("type").and_then(|v| v.as_str()).unwrap_or("");
  if proof_type != "DataIntegrityProof" {
    return Err(auth_failure("proof type must be DataIntegrityProof"));
  }
  let proof_purpose = proof_obj.get("proofPurpose").and_then(|v| v.as_str()).unwrap_or("");
  if proof_purpose != PROOF_PURPOSE {
    return Err(auth_failure("proof purpose must be assertionMethod"));
  }
  let created_str = proof_obj
    .get("created")
    .and_then(|v| v.as_str())
    .ok_or_else(|| auth_failure("proof missing created"))?;
  let created = DateTime::parse_from_rfc3339(created_str)
    .map_err(|_| auth_failure("proof created is not a valid RFC-3339 timestamp"))?
    .with_timezone(&Utc);
  let verification_method = proof_obj
    .get("verificationMethod")
    .and_then(|v| v.as_str())
    .ok_or_else(|| auth_failure("proof missing verificationMethod"))?
    .to_string();
  let proof_value = proof_obj
    .get("proofValue")
    .and_then(|v| v.as_str())
    .ok_or_else(|| auth_failure("proof missing proofValue"))?;
  let sig_bytes_b58 = proof_value
    .strip_prefix('z')
    .ok_or_else(|| auth_failure("proofValue must be multibase-z (base58btc) encoded"))?;
  let sig_bytes = bs58::decode(sig_bytes_b58)
    .into_vec()
    .map_err(|_| auth_failure("proofValue is not valid base58"))?;
  let signature = Signature::from_bytes(&sig_bytes).map_err(|_| auth_failure("malformed Ed25519 signature"))?;

  let proof_context = proof_obj.get("@context").cloned().unwrap_or(Value::Null);
  let document_context = document_context(document);
  if proof_context != document_context {
    return Err(auth_failure("proof @context does not match document @context"));
  }

  let stripped = document_without_proof(document)?;
  let doc_hash = sha256(&jcs_canonicalize(&stripped)?);

  let proof = Proof {
    context: proof_context,
    created,
    verification_method,
    proof_value: proof_value.to_string(),
  };
  let cfg_hash = sha256(&jcs_canonicalize(&proof.config_object())?);

  let mut signing_input = cfg_hash;
  signing_input.extend_from_slice(&doc_hash);

  public_key
    .verify(&signing_input, &signature)
    .map_err(|_| auth_failure("integrity proof signature verification failed"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::OsRng;

  fn keypair() -> Keypair {
    let mut csprng = OsRng {};
    Keypair::generate(&mut csprng)
  }

  fn sample_document() -> Value {
    json!({
      "@context": "https://www.w3.org/ns/activitystreams",
      "id": "ap://did:key:z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6/notes/1",
      "type": "Note",
      "content": "hello fediverse",
    })
  }

  #[test]
  fn test_create_then_verify_round_trip() {
    let kp = keypair();
    let doc = sample_document();
    let vm = "ap://did:key:z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6#z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6";
    let signed = create(&doc, vm, &kp, Utc::now()).unwrap();
    verify(&signed, &kp.public).unwrap();
  }

  #[test]
  fn test_tampered_content_fails_verify() {
    let kp = keypair();
    let doc = sample_document();
    let vm = "ap://did:key:z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6#key";
    let mut signed = create(&doc, vm, &kp, Utc::now()).unwrap();
    signed["content"] = Value::String("tampered".to_string());
    assert!(verify(&signed, &kp.public).is_err());
  }

  #[test]
  fn test_wrong_key_fails_verify() {
    let kp = keypair();
    let other = keypair();
    let doc = sample_document();
    let vm = "ap://did:key:z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6#key";
    let signed = create(&doc, vm, &kp, Utc::now()).unwrap();
    assert!(verify(&signed, &other.public).is_err());
  }

  #[test]
  fn test_context_mismatch_fails_verify() {
    let kp = keypair();
    let doc = sample_document();
    let vm = "ap://did:key:z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6#key";
    let mut signed = create(&doc, vm, &kp, Utc::now()).unwrap();
    signed["proof"]["@context"] = Value::String("https://example.com/other-context".to_string());
    assert!(verify(&signed, &kp.public).is_err());
  }

  #[test]
  fn test_missing_proof_rejected() {
    let kp = keypair();
    let doc = sample_document();
    assert!(verify(&doc, &kp.public).is_err());
  }

  #[test]
  fn test_unsupported_cryptosuite_rejected() {
    let kp = keypair();
    let doc = sample_document();
    let vm = "ap://did:key:z6MkvUie7gDQugJmyDQQPhMCCBfKJo7aGvzQYF2BqvFvdwx6#key";
    let mut signed = create(&doc, vm, &kp, Utc::now()).unwrap();
    signed["proof"]["cryptosuite"] = Value::String("other-suite".to_string());
    assert!(verify(&signed, &kp.public).is_err());
  }
}
