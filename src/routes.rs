use std::{convert::Infallible, sync::Arc};

use async_trait::async_trait;
use axum::{
  extract::{FromRequestParts, Query, State},
  http::{
    header::{CONTENT_DISPOSITION, CONTENT_LENGTH},
    Method,
  },
  response::Response,
  routing::get,
  Json, Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};

use crate::{
  config::Config,
  media::{MediaMetadata, MediaRequest, Platform},
  proxy::{Proxy, StreamSession},
  resolver::Resolvers,
  site, Result,
};

#[derive(Clone)]
pub struct AppState {
  pub config: Arc<Config>,
  pub proxy: Proxy,
  pub resolvers: Resolvers,
}

/// Fires when the client goes away. A front end that notices disconnects
/// puts its token in the request extensions; without one the token never
/// fires and dropping the response body is the only signal.
pub struct ClientGone(pub CancellationToken);

#[async_trait]
impl<S> FromRequestParts<S> for ClientGone
where
  S: Send + Sync,
{
  type Rejection = Infallible;

  async fn from_request_parts(
    parts: &mut http::request::Parts,
    _state: &S,
  ) -> Result<Self, Self::Rejection> {
    let token = parts
      .extensions
      .get::<CancellationToken>()
      .cloned()
      .unwrap_or_default();
    Ok(ClientGone(token))
  }
}

#[derive(Deserialize, Default)]
pub struct InfoQuery {
  url: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct DownloadQuery {
  url: Option<String>,
  format: Option<String>,
  #[serde(rename = "formatId", alias = "itag")]
  format_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/api/info", get(youtube_info))
    .route("/api/download", get(youtube_download))
    .route("/api/facebook/info", get(facebook_info))
    .route("/api/facebook/download", get(facebook_download))
    .route("/api/reels/info", get(reels_info))
    .route("/api/reels/download", get(reels_download))
    .route("/robots.txt", get(site::robots))
    .route("/sitemap.xml", get(site::sitemap))
    .route("/health", get(site::health))
    .layer(cors())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// the ui may be served from anywhere
fn cors() -> CorsLayer {
  CorsLayer::new()
    .allow_origin(Any)
    .allow_methods([Method::GET, Method::OPTIONS])
    .allow_headers(Any)
    .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH])
}

async fn info(
  platform: Platform,
  state: AppState,
  query: Option<Query<InfoQuery>>,
) -> Result<Json<MediaMetadata>> {
  let query = query.map(|q| q.0).unwrap_or_default();
  let url = platform.validate(query.url.as_deref().unwrap_or_default())?;
  let metadata = state.resolvers.get(platform).resolve(&url).await?;
  Ok(Json(metadata))
}

async fn download(
  platform: Platform,
  state: AppState,
  query: Option<Query<DownloadQuery>>,
  cancel: CancellationToken,
) -> Result<Response> {
  let query = query.map(|q| q.0).unwrap_or_default();
  let request = MediaRequest::new(
    platform,
    query.url.as_deref(),
    query.format.as_deref(),
    query.format_id.as_deref(),
  )?;

  StreamSession::new(&request.source_url, cancel)
    .start(&state.proxy, state.resolvers.get(platform), &request)
    .await
}

async fn youtube_info(
  State(state): State<AppState>,
  query: Option<Query<InfoQuery>>,
) -> Result<Json<MediaMetadata>> {
  info(Platform::YouTube, state, query).await
}

async fn youtube_download(
  State(state): State<AppState>,
  ClientGone(cancel): ClientGone,
  query: Option<Query<DownloadQuery>>,
) -> Result<Response> {
  download(Platform::YouTube, state, query, cancel).await
}

async fn facebook_info(
  State(state): State<AppState>,
  query: Option<Query<InfoQuery>>,
) -> Result<Json<MediaMetadata>> {
  info(Platform::Facebook, state, query).await
}

async fn facebook_download(
  State(state): State<AppState>,
  ClientGone(cancel): ClientGone,
  query: Option<Query<DownloadQuery>>,
) -> Result<Response> {
  download(Platform::Facebook, state, query, cancel).await
}

async fn reels_info(
  State(state): State<AppState>,
  query: Option<Query<InfoQuery>>,
) -> Result<Json<MediaMetadata>> {
  info(Platform::InstagramReel, state, query).await
}

async fn reels_download(
  State(state): State<AppState>,
  ClientGone(cancel): ClientGone,
  query: Option<Query<DownloadQuery>>,
) -> Result<Response> {
  download(Platform::InstagramReel, state, query, cancel).await
}

#[cfg(test)]
mod test {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
  };

  use axum::{
    body::{Body, HttpBody},
    http::{header, Request, StatusCode},
  };
  use tower::ServiceExt;

  use super::*;
  use crate::{
    media::FormatDescriptor,
    proxy::testing::{combined_mp4, metadata, ScriptedResolver},
    transcode::Transcoder,
    upstream::{
      testing::{chunks, Releases},
      Upstream,
    },
    Error,
  };

  /// Passes bytes through, counting the streams it was given.
  #[derive(Default)]
  struct CountingTranscoder(AtomicUsize);

  impl Transcoder for CountingTranscoder {
    fn transcode(&self, source: Upstream) -> Result<Upstream> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(source)
    }
  }

  fn app(
    resolver: Arc<ScriptedResolver>,
    transcoder: Arc<CountingTranscoder>,
  ) -> Router {
    router(AppState {
      config: Arc::new(Config::default()),
      proxy: Proxy {
        client: reqwest::Client::new(),
        transcoder,
        length_wait: Duration::from_secs(2),
      },
      resolvers: Resolvers::uniform(resolver),
    })
  }

  fn get_request(path: &str, url: &str, extra: &str) -> Request<Body> {
    let uri = format!("{path}?url={}{extra}", urlencoding::encode(url));
    Request::builder().uri(uri).body(Body::empty()).unwrap()
  }

  async fn body_bytes(resp: Response) -> Vec<u8> {
    let mut body = resp.into_body();
    let mut out = Vec::new();
    while let Some(chunk) = body.data().await {
      out.extend_from_slice(&chunk.unwrap());
    }
    out
  }

  async fn error_message(resp: Response) -> String {
    let json: serde_json::Value =
      serde_json::from_slice(&body_bytes(resp).await).unwrap();
    json["error"].as_str().unwrap().to_owned()
  }

  fn youtube_video() -> Arc<ScriptedResolver> {
    let upstream = Upstream::unknown_length(
      chunks(&[b"A", b"B", b"C"]),
      Releases::default().handle(),
    );
    Arc::new(ScriptedResolver::new(
      metadata("Never Gonna", vec![combined_mp4("18")]),
      upstream,
    ))
  }

  #[tokio::test]
  async fn test_invalid_urls_never_reach_resolver() {
    let resolver = youtube_video();
    let app = app(resolver.clone(), Default::default());

    let cases = [
      ("/api/info", "https://example.com/watch?v=X"),
      ("/api/download", "not a url"),
      ("/api/facebook/info", "https://youtube.com/watch?v=X"),
      ("/api/facebook/download", "ftp://facebook.com/watch?v=1"),
      ("/api/reels/info", "https://instagram.com/stories/someone/1"),
      ("/api/reels/download", ""),
    ];
    for (path, url) in cases {
      let resp =
        app.clone().oneshot(get_request(path, url, "")).await.unwrap();
      assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{path} {url}");
      assert!(!error_message(resp).await.is_empty());
    }

    let resp = app
      .clone()
      .oneshot(Request::get("/api/info").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_message(resp).await, "Invalid YouTube URL.");

    assert_eq!(resolver.resolve_calls(), 0);
  }

  #[tokio::test]
  async fn test_unsupported_container_is_rejected() {
    let resolver = youtube_video();
    let app = app(resolver.clone(), Default::default());

    let req = get_request(
      "/api/download",
      "https://youtube.com/watch?v=X",
      "&format=flac",
    );
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resolver.resolve_calls(), 0);
  }

  #[tokio::test]
  async fn test_info_returns_metadata() {
    let resolver = youtube_video();
    let app = app(resolver.clone(), Default::default());

    let req = get_request("/api/info", "https://youtu.be/X", "");
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json: serde_json::Value =
      serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(json["title"], "Never Gonna");
    assert_eq!(json["formats"][0]["formatId"], "18");
    assert!(json["thumbnail"].is_null());
    assert!(json["durationSeconds"].is_null());
    assert_eq!(resolver.resolve_calls(), 1);
  }

  #[tokio::test]
  async fn test_mp3_download_falls_back_to_lowest_audio() {
    let low_audio = FormatDescriptor {
      format_id: "1".to_owned(),
      has_audio: true,
      quality_label: Some("low".to_owned()),
      ..Default::default()
    };
    let upstream = Upstream::unknown_length(
      chunks(&[b"ID3", b"..."]),
      Releases::default().handle(),
    );
    let resolver = Arc::new(ScriptedResolver::new(
      metadata("Never Gonna", vec![low_audio]),
      upstream,
    ));
    let transcoder = Arc::new(CountingTranscoder::default());
    let app = app(resolver.clone(), transcoder.clone());

    let req = get_request(
      "/api/download",
      "https://youtube.com/watch?v=X",
      "&format=mp3",
    );
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(
      resp.headers()[header::CONTENT_DISPOSITION],
      "attachment; filename=\"Never Gonna.mp3\"; \
       filename*=UTF-8''Never%20Gonna.mp3"
    );
    assert_eq!(body_bytes(resp).await, b"ID3...");
    assert_eq!(*resolver.extracted.lock().unwrap(), ["1"]);
    assert_eq!(transcoder.0.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_explicit_format_id() {
    let resolver = youtube_video();
    let app = app(resolver.clone(), Default::default());

    let req = get_request(
      "/api/download",
      "https://youtube.com/watch?v=X",
      "&itag=18",
    );
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"ABC");

    let req = get_request(
      "/api/download",
      "https://youtube.com/watch?v=X",
      "&formatId=999",
    );
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
      error_message(resp).await,
      Error::NoPlayableFormat.to_string()
    );
  }

  #[tokio::test]
  async fn test_cancelled_request_is_499() {
    let releases = Releases::default();
    let upstream = Upstream::unknown_length(chunks(&[b"A"]), releases.handle());
    let resolver = Arc::new(ScriptedResolver::new(
      metadata("t", vec![combined_mp4("18")]),
      upstream,
    ));
    let app = app(resolver, Default::default());

    let token = CancellationToken::new();
    token.cancel();
    let mut req = get_request(
      "/api/reels/download",
      "https://www.instagram.com/reel/C1a2B3/",
      "",
    );
    req.extensions_mut().insert(token);

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status().as_u16(), 499);
    assert!(body_bytes(resp).await.is_empty());
  }

  #[tokio::test]
  async fn test_cors_allows_any_origin() {
    let app = app(youtube_video(), Default::default());

    let mut req = get_request("/api/info", "https://youtu.be/X", "");
    req
      .headers_mut()
      .insert(header::ORIGIN, "https://ui.example".parse().unwrap());
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let exposed = resp.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
      .to_str()
      .unwrap()
      .to_ascii_lowercase();
    assert!(exposed.contains("content-disposition"));
  }

  #[tokio::test]
  async fn test_site_routes() {
    let app = app(youtube_video(), Default::default());

    let resp = app
      .clone()
      .oneshot(Request::get("/robots.txt").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let robots = String::from_utf8(body_bytes(resp).await).unwrap();
    assert!(robots.ends_with("/sitemap.xml\n"));

    let resp = app
      .oneshot(Request::get("/health").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(body_bytes(resp).await, b"ok");
  }
}
