use bytes::Bytes;
use futures::{
  future::{self, BoxFuture},
  stream::{self, BoxStream},
  FutureExt, StreamExt,
};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{Error, Result};

/// Something owning the live end of a byte source: a network read, a
/// child process. Consuming `self` makes releasing it a one-shot affair.
pub trait Release: Send {
  fn release(self: Box<Self>);
}

impl Release for tokio::task::JoinHandle<()> {
  fn release(self: Box<Self>) {
    self.abort();
  }
}

/// A source of media bytes for exactly one download.
///
/// Besides the ordered chunk stream it carries a "head" future, resolved
/// once the source knows its size (or failed before sending anything),
/// and the handle that tears the source down.
pub struct Upstream {
  stream: BoxStream<'static, Result<Bytes>>,
  head: Option<BoxFuture<'static, Result<Option<u64>>>>,
  handle: Option<Box<dyn Release>>,
}

impl Upstream {
  pub fn new(
    stream: BoxStream<'static, Result<Bytes>>,
    head: BoxFuture<'static, Result<Option<u64>>>,
    handle: Box<dyn Release>,
  ) -> Self {
    Self {
      stream,
      head: Some(head),
      handle: Some(handle),
    }
  }

  /// A source whose length is never announced.
  pub fn unknown_length(
    stream: BoxStream<'static, Result<Bytes>>,
    handle: Box<dyn Release>,
  ) -> Self {
    Self::new(stream, future::ready(Ok(None)).boxed(), handle)
  }

  /// Hands out the head future. Later calls get an immediate `None`.
  pub fn take_head(&mut self) -> BoxFuture<'static, Result<Option<u64>>> {
    self
      .head
      .take()
      .unwrap_or_else(|| future::ready(Ok(None)).boxed())
  }

  pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
    self.stream.next().await
  }

  pub fn release(&mut self) {
    if let Some(handle) = self.handle.take() {
      handle.release();
    }
  }
}

impl Drop for Upstream {
  fn drop(&mut self) {
    self.release();
  }
}

/// Opens a direct media url. The request runs in its own task so the
/// head can be announced while nobody is pulling chunks yet.
pub fn fetch(
  client: &reqwest::Client,
  url: &str,
  headers: &[(String, String)],
) -> Upstream {
  let mut request = client.get(url);
  for (name, value) in headers {
    request = request.header(name.as_str(), value.as_str());
  }

  let (head_tx, head_rx) = oneshot::channel();
  let (chunk_tx, chunk_rx) = mpsc::channel::<Result<Bytes>>(16);

  let task = tokio::spawn(async move {
    let response = match request.send().await {
      Ok(resp) if resp.status().is_success() => resp,
      Ok(resp) => {
        let err = Error::UpstreamFetch(format!(
          "upstream responded with {}",
          resp.status()
        ));
        report(head_tx, &chunk_tx, err).await;
        return;
      }
      Err(e) => {
        report(head_tx, &chunk_tx, Error::UpstreamFetch(e.to_string())).await;
        return;
      }
    };

    // a dropped receiver only means nobody waits for the length anymore
    let _ = head_tx.send(Ok(response.content_length()));

    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
      let chunk =
        chunk.map_err(|e| Error::StreamFailure(format!("upstream read: {e}")));
      if chunk_tx.send(chunk).await.is_err() {
        debug!("chunk receiver dropped, stopping upstream read");
        break;
      }
    }
  });

  let head = head_rx
    .map(|announced| announced.unwrap_or(Ok(None)))
    .boxed();

  Upstream::new(receiver_stream(chunk_rx), head, Box::new(task))
}

// an early failure goes to whoever still listens: the head waiter while
// headers are pending, the body reader after that
async fn report(
  head_tx: oneshot::Sender<Result<Option<u64>>>,
  chunk_tx: &mpsc::Sender<Result<Bytes>>,
  err: Error,
) {
  if let Err(Err(err)) = head_tx.send(Err(err)) {
    let _ = chunk_tx.send(Err(err)).await;
  }
}

pub fn receiver_stream<T: Send + 'static>(
  rx: mpsc::Receiver<T>,
) -> BoxStream<'static, T> {
  stream::unfold(rx, |mut rx| async move {
    let item = rx.recv().await?;
    Some((item, rx))
  })
  .boxed()
}


#[cfg(test)]
mod test {
  use std::net::SocketAddr;

  use axum::{http::StatusCode, routing::get, Router};

  use super::testing::*;
  use super::*;

  #[tokio::test]
  async fn test_release_runs_once() {
    let releases = Releases::default();
    let mut upstream =
      Upstream::unknown_length(chunks(&[b"a"]), releases.handle());

    upstream.release();
    upstream.release();
    drop(upstream);

    assert_eq!(releases.count(), 1);
  }

  #[tokio::test]
  async fn test_drop_releases() {
    let releases = Releases::default();
    let upstream = Upstream::unknown_length(chunks(&[b"a"]), releases.handle());
    drop(upstream);
    assert_eq!(releases.count(), 1);
  }

  async fn serve(app: Router) -> SocketAddr {
    let server = axum::Server::bind(&"127.0.0.1:0".parse().unwrap())
      .serve(app.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
  }

  #[tokio::test]
  async fn test_fetch_announces_length_and_streams() {
    let app = Router::new()
      .route("/media", get(|| async { "0123456789" }))
      .route("/gone", get(|| async { StatusCode::FORBIDDEN }));
    let addr = serve(app).await;
    let client = reqwest::Client::new();

    let mut upstream = fetch(&client, &format!("http://{addr}/media"), &[]);
    assert_eq!(upstream.take_head().await.unwrap(), Some(10));

    let mut body = Vec::new();
    while let Some(chunk) = upstream.next_chunk().await {
      body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(body, b"0123456789");

    let mut upstream = fetch(&client, &format!("http://{addr}/gone"), &[]);
    let err = upstream.take_head().await.unwrap_err();
    assert!(matches!(err, Error::UpstreamFetch(_)));
  }

  #[tokio::test]
  async fn test_fetch_error_after_head_wait_reaches_body() {
    let app = Router::new()
      .route("/gone", get(|| async { StatusCode::NOT_FOUND }));
    let addr = serve(app).await;
    let client = reqwest::Client::new();

    let mut upstream = fetch(&client, &format!("http://{addr}/gone"), &[]);
    // nobody waits for the head
    drop(upstream.take_head());

    let first = upstream.next_chunk().await.unwrap();
    assert!(matches!(first, Err(Error::UpstreamFetch(_))));
    assert!(upstream.next_chunk().await.is_none());
  }
}
