//! Maps `MeridianError`'s severity ladder onto actix-web responses, the way
//! the teacher's `LemmyError` implemented `ResponseError` directly. Kept as
//! a local newtype here since the orphan rules forbid implementing a
//! foreign trait for a foreign type across the crate boundary.

use actix_web::{HttpResponse, ResponseError};
use meridian_utils::MeridianError;
use std::fmt;

pub struct ApiError(pub MeridianError);

impl fmt::Debug for ApiError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    fmt::Debug::fmt(&self.0, f)
  }
}

impl fmt::Display for ApiError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    fmt::Display::fmt(&self.0, f)
  }
}

impl From<MeridianError> for ApiError {
  fn from(e: MeridianError) -> Self {
    ApiError(e)
  }
}

impl ResponseError for ApiError {
  fn error_response(&self) -> HttpResponse {
    let status = actix_web::http::StatusCode::from_u16(self.0.kind().http_status())
      .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
    log::warn!("request failed: {} ({:?})", self.0, self.0.kind());
    HttpResponse::build(status).json(serde_json::json!({ "error": self.0.to_string() }))
  }
}
