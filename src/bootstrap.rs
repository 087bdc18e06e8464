//! First-run provisioning of the local instance actor: the synthetic
//! `instance.actor` account every federated server signs outbound
//! capability-discovery and instance-level GETs with (§4.7, §4.10).
//! Grounded on the teacher's `apub::user::generate_actor_keypair`, extended
//! with the Ed25519 pair FEP-8b32/FEP-844e require.

use chrono::Utc;
use ed25519_dalek::Keypair;
use openssl::rsa::Rsa;
use rand::rngs::OsRng;

use meridian_db::models::actor::{Actor, ActorForm};
use meridian_db::DbPool;
use meridian_utils::settings::Settings;
use meridian_utils::MeridianError;

const INSTANCE_ACTOR_USERNAME: &str = "instance.actor";

fn generate_rsa_pem_pair() -> Result<(String, String), MeridianError> {
  let rsa = Rsa::generate(2048).map_err(|e| anyhow::anyhow!("RSA keygen failed: {}", e))?;
  let private_pem = String::from_utf8(rsa.private_key_to_pem().map_err(|e| anyhow::anyhow!("PEM encode failed: {}", e))?)
    .map_err(|e| anyhow::anyhow!("PEM not UTF-8: {}", e))?;
  let public_pem = String::from_utf8(rsa.public_key_to_pem().map_err(|e| anyhow::anyhow!("PEM encode failed: {}", e))?)
    .map_err(|e| anyhow::anyhow!("PEM not UTF-8: {}", e))?;
  Ok((private_pem, public_pem))
}

fn generate_ed25519_multikey_pair() -> (String, String) {
  let mut csprng = OsRng {};
  let keypair = Keypair::generate(&mut csprng);
  let private = format!("z{}", bs58::encode(keypair.to_bytes()).into_string());
  let public = format!("z{}", bs58::encode(keypair.public.to_bytes()).into_string());
  (private, public)
}

/// Idempotent: does nothing if `instance.actor` already exists locally.
pub async fn ensure_instance_actor(pool: &DbPool, settings: &Settings) -> Result<Actor, MeridianError> {
  let domain = settings.get_hostname_without_port().unwrap_or_else(|| settings.hostname.clone());
  let lookup_domain = domain.clone();
  if let Some(existing) =
    meridian_db::blocking(pool, move |conn| Actor::find_local_by_username(conn, &lookup_domain, INSTANCE_ACTOR_USERNAME)).await??
  {
    return Ok(existing);
  }

  let protocol = settings.get_protocol_string();
  let canonical_id = format!("{}://{}/actor", protocol, domain);
  let (private_key_pem, public_key_pem) = generate_rsa_pem_pair()?;
  let (private_ed25519_key, ed25519_multikey) = generate_ed25519_multikey_pair();

  let form = ActorForm {
    canonical_id,
    preferred_username: Some(INSTANCE_ACTOR_USERNAME.to_string()),
    host: domain,
    actor_type: "Application".to_string(),
    inbox_url: format!("{}://{}/actor/inbox", protocol, settings.hostname),
    shared_inbox_url: Some(format!("{}://{}/inbox", protocol, settings.hostname)),
    followers_url: None,
    public_key_pem: Some(public_key_pem),
    ed25519_multikey: Some(ed25519_multikey),
    private_key_pem: Some(private_key_pem),
    private_ed25519_key: Some(private_ed25519_key),
    moved_to: None,
    also_known_as: vec![],
    manually_approves_followers: true,
    suspended: false,
    icon_url: None,
    gateways: vec![],
    local: true,
    last_refreshed_at: Utc::now().naive_utc(),
  };
  meridian_db::blocking(pool, move |conn| Actor::upsert(conn, &form)).await?
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ed25519_multikey_pair_decodes_back() {
    let (private, public) = generate_ed25519_multikey_pair();
    let secret_bytes = bs58::decode(private.trim_start_matches('z')).into_vec().unwrap();
    let keypair = Keypair::from_bytes(&secret_bytes).unwrap();
    let public_bytes = bs58::decode(public.trim_start_matches('z')).into_vec().unwrap();
    assert_eq!(keypair.public.to_bytes().to_vec(), public_bytes);
  }
}
