use std::fmt;

/// Expands to `"file:line:col"` of the call site, the way the teacher's
/// `location_info!()` threads a breadcrumb through `anyhow::Context`.
#[macro_export]
macro_rules! location_info {
  () => {
    format!("{}:{}:{}", file!(), line!(), column!())
  };
}

/// The severity ladder of §7, increasing in order. Kept separate from the
/// free-form `anyhow::Error` message so the HTTP layer and the queue
/// workers can make table-driven decisions (retry vs. drop vs. 4xx vs. 5xx)
/// instead of matching on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeridianErrorKind {
  /// Network/DB hiccup. Retried by the enclosing worker.
  Transient,
  /// Bad JSON, unparseable header, unknown activity type.
  MalformedInput,
  /// Bad signature, expired date, digest mismatch, invalid proof.
  AuthenticationFailure,
  /// Origin mismatch, sender not permitted to act on target.
  AuthorizationFailure,
  /// Queue full, too many recipients, body too large.
  ResourceBoundedRejection,
  /// A violated invariant; never crashes the process, but is a bug.
  InvariantViolation,
}

impl MeridianErrorKind {
  /// Maps a kind to the HTTP status the ingress surface should return, per §7 and §6.
  pub fn http_status(self) -> u16 {
    match self {
      MeridianErrorKind::Transient => 503,
      MeridianErrorKind::MalformedInput => 400,
      MeridianErrorKind::AuthenticationFailure => 401,
      MeridianErrorKind::AuthorizationFailure => 401,
      MeridianErrorKind::ResourceBoundedRejection => 429,
      MeridianErrorKind::InvariantViolation => 500,
    }
  }

  /// Whether the enclosing worker should requeue the operation instead of discarding it.
  pub fn is_retryable(self) -> bool {
    matches!(self, MeridianErrorKind::Transient)
  }
}

/// Crate-wide error type, the `MeridianError` alias of `LemmyError` the
/// teacher's every fallible function returns.
#[derive(Debug)]
pub struct LemmyError {
  pub inner: anyhow::Error,
  pub kind: MeridianErrorKind,
}

impl LemmyError {
  pub fn from_message(message: &str) -> Self {
    LemmyError {
      inner: anyhow::anyhow!("{}", message),
      kind: MeridianErrorKind::InvariantViolation,
    }
  }

  pub fn with_kind(inner: anyhow::Error, kind: MeridianErrorKind) -> Self {
    LemmyError { inner, kind }
  }

  pub fn kind(&self) -> MeridianErrorKind {
    self.kind
  }
}

impl fmt::Display for LemmyError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    self.inner.fmt(f)
  }
}

impl std::error::Error for LemmyError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    self.inner.source()
  }
}

impl From<anyhow::Error> for LemmyError {
  fn from(inner: anyhow::Error) -> Self {
    LemmyError {
      inner,
      kind: MeridianErrorKind::InvariantViolation,
    }
  }
}

impl From<url::ParseError> for LemmyError {
  fn from(e: url::ParseError) -> Self {
    LemmyError {
      inner: e.into(),
      kind: MeridianErrorKind::MalformedInput,
    }
  }
}

impl From<serde_json::Error> for LemmyError {
  fn from(e: serde_json::Error) -> Self {
    LemmyError {
      inner: e.into(),
      kind: MeridianErrorKind::MalformedInput,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_http_status() {
    assert_eq!(MeridianErrorKind::MalformedInput.http_status(), 400);
    assert_eq!(MeridianErrorKind::AuthenticationFailure.http_status(), 401);
    assert_eq!(MeridianErrorKind::ResourceBoundedRejection.http_status(), 429);
    assert_eq!(MeridianErrorKind::InvariantViolation.http_status(), 500);
  }

  #[test]
  fn test_only_transient_is_retryable() {
    assert!(MeridianErrorKind::Transient.is_retryable());
    assert!(!MeridianErrorKind::MalformedInput.is_retryable());
  }

  #[test]
  fn test_location_info_format() {
    let loc = location_info!();
    assert!(loc.contains("error.rs"));
  }
}
