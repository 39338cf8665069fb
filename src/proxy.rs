use std::{future::Future, sync::Arc, time::Duration};

use axum::{
  body::{boxed, Bytes, StreamBody},
  response::Response,
};
use futures::{stream, Stream};
use http::{header, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  filename,
  media::{Container, MediaRequest},
  resolver::{Extraction, Resolver},
  select,
  transcode::Transcoder,
  upstream::{self, Upstream},
  Error, Result,
};

/// What every download shares: the http client used for direct media
/// urls, the encoder for audio requests and the content length policy.
#[derive(Clone)]
pub struct Proxy {
  pub client: reqwest::Client,
  pub transcoder: Arc<dyn Transcoder>,
  pub length_wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Idle,
  ResolvingFormat,
  Opened,
  Streaming,
  Completed,
  Aborted,
  Failed,
}

impl Phase {
  fn is_terminal(&self) -> bool {
    matches!(self, Phase::Completed | Phase::Aborted | Phase::Failed)
  }
}

struct Opened {
  title: String,
  container: Container,
  content_length: Option<u64>,
}

/// Owns one download from resolution until its body closes. The upstream
/// it opens is released exactly once, on whichever exit comes first.
pub struct StreamSession {
  phase: Phase,
  source: String,
  cancel: CancellationToken,
  upstream: Option<Upstream>,
}

impl StreamSession {
  pub fn new(source: &str, cancel: CancellationToken) -> Self {
    Self {
      phase: Phase::Idle,
      source: source.to_owned(),
      cancel,
      upstream: None,
    }
  }

  /// Resolves and opens the media, then hands the session over to the
  /// response body. Errors returned here happen before any header is sent.
  pub async fn start(
    mut self,
    proxy: &Proxy,
    resolver: &dyn Resolver,
    request: &MediaRequest,
  ) -> Result<Response> {
    match self.open(proxy, resolver, request).await {
      Ok(opened) => self.respond(opened),
      Err(Error::ClientAborted) => {
        self.finish(Phase::Aborted);
        Err(Error::ClientAborted)
      }
      Err(e) => {
        self.finish(Phase::Failed);
        Err(e)
      }
    }
  }

  async fn open(
    &mut self,
    proxy: &Proxy,
    resolver: &dyn Resolver,
    request: &MediaRequest,
  ) -> Result<Opened> {
    self.phase = Phase::ResolvingFormat;
    let metadata =
      or_cancel(&self.cancel, resolver.resolve(&request.source_url)).await?;

    let selection = select::choose(
      &metadata.formats,
      request.container,
      request.format_selector.as_deref(),
    )?;
    info!(
      "{} {}: format {} ({:?})",
      request.platform, metadata.id, selection.format.format_id, selection.rule
    );

    let extraction =
      or_cancel(&self.cancel, resolver.extract(&metadata, selection.format))
        .await?;
    let mut source = match extraction {
      Extraction::Proxy { url, headers } => {
        upstream::fetch(&proxy.client, &url, &headers)
      }
      Extraction::Stream { upstream } => upstream,
    };
    if request.container.needs_transcode() {
      source = proxy.transcoder.transcode(source)?;
    }

    let head = source.take_head();
    self.upstream = Some(source);
    self.phase = Phase::Opened;

    let content_length = tokio::select! {
      biased;
      _ = self.cancel.cancelled() => return Err(Error::ClientAborted),
      announced = tokio::time::timeout(proxy.length_wait, head) => {
        match announced {
          Ok(length) => length?,
          Err(_) => {
            debug!("no content length after {:?}", proxy.length_wait);
            None
          }
        }
      }
    };

    Ok(Opened {
      title: metadata.title,
      container: request.container,
      content_length,
    })
  }

  fn respond(mut self, opened: Opened) -> Result<Response> {
    let extension = opened.container.extension();
    let disposition =
      filename::sanitize(&opened.title).content_disposition(extension);

    let mut builder = Response::builder()
      .status(StatusCode::OK)
      .header(header::CONTENT_TYPE, opened.container.content_type())
      .header(header::CONTENT_DISPOSITION, disposition)
      .header(header::CACHE_CONTROL, "no-store");
    if let Some(length) = opened.content_length {
      builder = builder.header(header::CONTENT_LENGTH, length);
    }

    self.phase = Phase::Streaming;
    let body = StreamBody::new(self.into_body_stream());
    Ok(builder.body(boxed(body))?)
  }

  fn into_body_stream(self) -> impl Stream<Item = Result<Bytes>> + Send {
    stream::unfold(Some(self), |state| async move {
      let mut session = state?;
      let next = {
        let upstream = session.upstream.as_mut()?;
        tokio::select! {
          biased;
          _ = session.cancel.cancelled() => Err(Error::ClientAborted),
          chunk = upstream.next_chunk() => Ok(chunk),
        }
      };

      match next {
        Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(session))),
        Ok(Some(Err(e))) => {
          // headers are out, all that is left is to cut the body short
          warn!("stream of {} failed: {}", session.source, e);
          session.finish(Phase::Failed);
          Some((Err(e), None))
        }
        Ok(None) => {
          session.finish(Phase::Completed);
          None
        }
        Err(_) => {
          debug!("client left during the stream of {}", session.source);
          session.finish(Phase::Aborted);
          None
        }
      }
    })
  }

  fn finish(&mut self, phase: Phase) {
    if let Some(mut upstream) = self.upstream.take() {
      upstream.release();
    }
    debug!("session for {}: {:?} -> {:?}", self.source, self.phase, phase);
    self.phase = phase;
  }
}

async fn or_cancel<T>(
  cancel: &CancellationToken,
  fut: impl Future<Output = Result<T>>,
) -> Result<T> {
  tokio::select! {
    biased;
    _ = cancel.cancelled() => Err(Error::ClientAborted),
    res = fut => res,
  }
}

impl Drop for StreamSession {
  // hyper drops the body when the connection goes away
  fn drop(&mut self) {
    if !self.phase.is_terminal() {
      self.finish(Phase::Aborted);
    }
  }
}
