use std::{sync::Arc, time::Duration};

use axum::Router;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod filename;
mod media;
mod platform;
mod proxy;
mod resolver;
mod routes;
mod select;
mod site;
mod transcode;
mod upstream;

pub use error::{Error, Result};

use crate::{
  config::Config,
  media::Platform,
  proxy::Proxy,
  resolver::{FacebookPage, Resolvers, Ytdlp},
  routes::AppState,
  transcode::Ffmpeg,
};

const DEFAULT_LOG_FILTER: &str = "vidsaver=info,tower_http=info";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    )
    .init();

  let config = Config::from_env()?;
  let client = reqwest::Client::builder()
    .user_agent(config.user_agent.as_str())
    .build()?;

  let ffmpeg = Ffmpeg::new(&config);
  ffmpeg.probe().await;

  let resolvers = Resolvers {
    youtube: Arc::new(Ytdlp::new(Platform::YouTube, &config)),
    facebook: Arc::new(FacebookPage::new(client.clone(), &config)),
    reels: Arc::new(Ytdlp::new(Platform::InstagramReel, &config)),
  };
  let proxy = Proxy {
    client,
    transcoder: Arc::new(ffmpeg),
    length_wait: config.length_wait,
  };
  let bind_addr = config.bind_addr;
  let app = routes::router(AppState {
    config: Arc::new(config),
    proxy,
    resolvers,
  });

  Toplevel::new(move |s| async move {
    s.start(SubsystemBuilder::new("http", move |h| {
      http_server(h, app, bind_addr)
    }));
  })
  .catch_signals()
  .handle_shutdown_requests(Duration::from_secs(5))
  .await
  .map_err(|e| Error::Server(e.to_string()))
}

async fn http_server(
  subsys: SubsystemHandle,
  app: Router,
  addr: std::net::SocketAddr,
) -> Result<()> {
  let server = axum::Server::try_bind(&addr)
    .map_err(|e| Error::Server(format!("cannot bind {addr}: {e}")))?
    .serve(app.into_make_service());

  info!("listening on {}", server.local_addr());

  server
    .with_graceful_shutdown(subsys.on_shutdown_requested())
    .await
    .map_err(|e| Error::Server(e.to_string()))
}
