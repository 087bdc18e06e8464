pub mod error;
pub mod rate_limit;
pub mod settings;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

pub use error::{location_info, LemmyError as MeridianError, MeridianErrorKind};

lazy_static::lazy_static! {
  static ref MENTION_RE: Regex =
    Regex::new(r"@(?P<name>[\w.]+)@(?P<domain>[a-zA-Z0-9._\-:]+)").expect("compile mention regex");
}

/// A single `@user@instance` mention extracted from object content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionData {
  pub name: String,
  pub domain: String,
}

impl MentionData {
  pub fn full_name(&self) -> String {
    format!("@{}@{}", &self.name, &self.domain)
  }
}

/// Scrapes `@user@host` mentions out of arbitrary HTML/text content.
///
/// Local-only mentions (no `@domain` part) are not returned here; the caller
/// is expected to resolve bare `@user` against the local user table.
pub fn scrape_text_for_mentions(text: &str) -> Vec<MentionData> {
  MENTION_RE
    .captures_iter(text)
    .map(|captures| MentionData {
      name: captures["name"].to_string(),
      domain: captures["domain"].to_string(),
    })
    .collect()
}

/// Renders a stored UTC-naive timestamp as the RFC-3339 form activities use on the wire.
pub fn convert_datetime(naive: NaiveDateTime) -> DateTime<Utc> {
  DateTime::<Utc>::from_utc(naive, Utc)
}

/// `https` everywhere except when running the federation test harness against `localhost`.
pub fn get_apub_protocol_string() -> &'static str {
  if std::env::var("MERIDIAN_TEST_FEDERATION_ENABLED").is_ok() {
    "http"
  } else {
    "https"
  }
}

/// Both RFC-3339 and the non-standard `2006-01-02T15:04:05-0700` variant some
/// older AP implementations still emit are accepted on the wire (spec §6).
pub fn parse_activitystreams_datetime(raw: &str) -> Result<DateTime<Utc>, MeridianError> {
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Ok(dt.with_timezone(&Utc));
  }
  DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| anyhow::anyhow!("unparseable activitystreams datetime {:?}: {}", raw, e).into())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_scrape_mentions() {
    let text = "hello @alice@example.com and @bob@other.example, not @local";
    let mentions = scrape_text_for_mentions(text);
    assert_eq!(
      mentions,
      vec![
        MentionData {
          name: "alice".to_string(),
          domain: "example.com".to_string()
        },
        MentionData {
          name: "bob".to_string(),
          domain: "other.example".to_string()
        },
      ]
    );
  }

  #[test]
  fn test_parse_datetime_rfc3339() {
    let dt = parse_activitystreams_datetime("2021-01-01T00:00:00Z").unwrap();
    assert_eq!(dt.to_rfc3339(), "2021-01-01T00:00:00+00:00");
  }

  #[test]
  fn test_parse_datetime_legacy_offset() {
    let dt = parse_activitystreams_datetime("2021-01-01T00:00:00-0700").unwrap();
    assert_eq!(dt.timezone(), Utc);
  }
}
