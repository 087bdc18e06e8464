//! Production `Fetcher` backing C4's signed GETs, signing with the local
//! instance actor's keys. Grounded on the teacher's `apub::fetcher`, which
//! built its requests around a single shared `actix_web::client::Client`;
//! here the signing step is the part C2/C7 generalize.

use async_trait::async_trait;
use chrono::Utc;
use url::Url;

use meridian_db::models::capability::SignatureDialect;
use meridian_federation::resolver::{Fetcher, FetchedResponse, ResolverKey};
use meridian_federation::signatures::{common::RequestParts, draft, rfc9421};
use meridian_utils::{MeridianError, MeridianErrorKind};

fn malformed(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::MalformedInput)
}

fn transient(msg: impl Into<String>) -> MeridianError {
  MeridianError::with_kind(anyhow::anyhow!("{}", msg.into()), MeridianErrorKind::Transient)
}

pub struct FederationClient {
  client: reqwest::Client,
  rsa_private_key_pem: String,
  ed25519_keypair_bytes: Vec<u8>,
}

impl FederationClient {
  pub fn new(rsa_private_key_pem: String, ed25519_keypair_bytes: Vec<u8>) -> Self {
    FederationClient {
      client: reqwest::Client::new(),
      rsa_private_key_pem,
      ed25519_keypair_bytes,
    }
  }

  fn sign(&self, url: &Url, key: &ResolverKey, now: chrono::DateTime<Utc>) -> Result<Vec<(String, String)>, MeridianError> {
    let host = url.host_str().unwrap_or_default();
    let req = RequestParts {
      method: "GET".to_string(),
      path: url.path().to_string(),
      query: url.query().map(|q| q.to_string()),
      host: host.to_string(),
      headers: Default::default(),
    };

    match key.dialect {
      SignatureDialect::CavageDraftRsa => {
        let private_key = openssl::pkey::PKey::private_key_from_pem(self.rsa_private_key_pem.as_bytes())
          .map_err(|e| malformed(format!("invalid RSA key: {}", e)))?;
        let (sig, _digest, date) = draft::sign(&req, None, &key.key_id, &private_key, now)?;
        Ok(vec![
          ("Host".to_string(), host.to_string()),
          ("Date".to_string(), date),
          ("Signature".to_string(), sig),
          ("Accept".to_string(), "application/activity+json".to_string()),
        ])
      }
      SignatureDialect::Rfc9421Rsa => {
        let private_key = openssl::pkey::PKey::private_key_from_pem(self.rsa_private_key_pem.as_bytes())
          .map_err(|e| malformed(format!("invalid RSA key: {}", e)))?;
        let components = vec!["@method".to_string(), "@target-uri".to_string()];
        let (sig_input, sig) = rfc9421::sign_rsa(&req, &key.key_id, now, None, components, &private_key)?;
        Ok(vec![
          ("Host".to_string(), host.to_string()),
          ("Signature-Input".to_string(), sig_input),
          ("Signature".to_string(), sig),
          ("Accept".to_string(), "application/activity+json".to_string()),
        ])
      }
      SignatureDialect::Rfc9421Ed25519 => {
        let keypair = ed25519_dalek::Keypair::from_bytes(&self.ed25519_keypair_bytes)
          .map_err(|e| malformed(format!("invalid Ed25519 keypair: {}", e)))?;
        let components = vec!["@method".to_string(), "@target-uri".to_string()];
        let (sig_input, sig) = rfc9421::sign_ed25519(&req, &key.key_id, now, None, components, &keypair)?;
        Ok(vec![
          ("Host".to_string(), host.to_string()),
          ("Signature-Input".to_string(), sig_input),
          ("Signature".to_string(), sig),
          ("Accept".to_string(), "application/activity+json".to_string()),
        ])
      }
    }
  }
}

#[async_trait(?Send)]
impl Fetcher for FederationClient {
  async fn signed_get(&self, url: &str, key: &ResolverKey) -> Result<FetchedResponse, MeridianError> {
    let parsed = Url::parse(url).map_err(|e| malformed(format!("invalid fetch url {:?}: {}", url, e)))?;
    let headers = self.sign(&parsed, key, Utc::now())?;
    let mut request = self.client.get(url);
    for (name, value) in headers {
      request = request.header(name, value);
    }
    let response = request
      .send()
      .await
      .map_err(|e| transient(format!("fetch of {:?} failed: {}", url, e)))?;
    let status = response.status().as_u16();
    let body = response
      .bytes()
      .await
      .map_err(|e| transient(format!("reading body of {:?} failed: {}", url, e)))?
      .to_vec();
    Ok(FetchedResponse { status, body })
  }
}
