//! Host admission policy (§4.5 "honour host/domain blocklists", §5 "inbound
//! accepts drop activities from hosts in the blocklist before signature
//! work"). Grounded on the teacher's instance-level blocklist check, done
//! once up front rather than woven into the resolver/signature paths.

use meridian_utils::FederationSettings;

/// `true` if `host` may be federated with: not in `BlockedInstances`, and —
/// when `StrictAllowlist` is set — present in `AllowedInstances`.
pub fn is_host_allowed(settings: &FederationSettings, host: &str) -> bool {
  if settings.blocked_instances.iter().any(|blocked| blocked == host) {
    return false;
  }
  if settings.strict_allowlist {
    return settings.get_allowed_instances().iter().any(|allowed| allowed == host);
  }
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  fn settings_with(blocked: Vec<&str>, strict: bool, allowed: Option<Vec<&str>>) -> FederationSettings {
    let mut settings = FederationSettings::default();
    settings.blocked_instances = blocked.into_iter().map(String::from).collect();
    settings.strict_allowlist = strict;
    settings.allowed_instances = allowed.map(|v| v.into_iter().map(String::from).collect());
    settings
  }

  #[test]
  fn test_blocked_host_rejected() {
    let settings = settings_with(vec!["evil.example"], false, None);
    assert!(!is_host_allowed(&settings, "evil.example"));
    assert!(is_host_allowed(&settings, "good.example"));
  }

  #[test]
  fn test_strict_allowlist_rejects_unlisted_host() {
    let settings = settings_with(vec![], true, Some(vec!["friend.example"]));
    assert!(is_host_allowed(&settings, "friend.example"));
    assert!(!is_host_allowed(&settings, "stranger.example"));
  }

  #[test]
  fn test_block_takes_precedence_over_allowlist() {
    let settings = settings_with(vec!["friend.example"], true, Some(vec!["friend.example"]));
    assert!(!is_host_allowed(&settings, "friend.example"));
  }
}
