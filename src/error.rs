use axum::{
  response::{IntoResponse, Response},
  Json,
};
use http::StatusCode;
use serde_json::json;
use tracing::{debug, error};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("{0}")]
  InvalidInput(String),
  #[error("media not found: {0}")]
  NotFound(String),
  #[error("platform refused the request: {0}")]
  PlatformBlocked(String),
  #[error("failed to parse platform response: {0}")]
  ParseFailure(String),
  #[error("No playable formats found")]
  NoPlayableFormat,
  #[error("failed to fetch media: {0}")]
  UpstreamFetch(String),
  #[error("client closed request")]
  ClientAborted,
  #[error("stream failed: {0}")]
  StreamFailure(String),
  #[error("server error: {0}")]
  Server(String),
  #[error(transparent)]
  IO(#[from] std::io::Error),
  #[error(transparent)]
  Json(#[from] serde_json::Error),
  #[error(transparent)]
  Reqwest(#[from] reqwest::Error),
  #[error(transparent)]
  Response(#[from] http::Error),
}

// nginx's non-standard "client closed request"
pub fn client_closed_request() -> StatusCode {
  StatusCode::from_u16(499).expect("499 is within the valid status range")
}

impl Error {
  pub fn status(&self) -> StatusCode {
    match self {
      Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
      Error::UpstreamFetch(_) => StatusCode::BAD_GATEWAY,
      Error::ClientAborted => client_closed_request(),
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();

    match self {
      // the client is gone, nobody reads this body
      Error::ClientAborted => {
        debug!("client went away before the response was committed");
        status.into_response()
      }
      Error::InvalidInput(_) => {
        debug!("rejected request: {}", self);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
      }
      err => {
        error!("request failed: {}", err);
        (status, Json(json!({ "error": err.to_string() }))).into_response()
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn test_status_mapping() {
    assert_eq!(
      Error::InvalidInput("bad".into()).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      Error::NotFound("x".into()).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
      Error::NoPlayableFormat.status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
    assert_eq!(
      Error::UpstreamFetch("403".into()).status(),
      StatusCode::BAD_GATEWAY
    );
    assert_eq!(Error::ClientAborted.status().as_u16(), 499);
  }
}
