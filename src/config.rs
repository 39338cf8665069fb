use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::{Error, Result};

#[cfg(not(debug_assertions))]
pub const DEFAULT_PUBLIC_URL: &str = "https://vidsaverproo.web.app";

#[cfg(debug_assertions)]
pub const DEFAULT_PUBLIC_URL: &str = "http://0.0.0.0:8080";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
  AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124 Safari/537.36";

/// Process-wide settings, read once before the server starts and handed to
/// the handlers through the router state.
#[derive(Debug, Clone)]
pub struct Config {
  pub bind_addr: SocketAddr,
  pub public_url: String,
  pub ytdlp_path: PathBuf,
  pub ytdlp_proxy: Option<String>,
  pub ffmpeg_path: PathBuf,
  pub mp3_bitrate: String,
  pub length_wait: Duration,
  pub user_agent: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
      public_url: DEFAULT_PUBLIC_URL.to_owned(),
      ytdlp_path: "yt-dlp".into(),
      ytdlp_proxy: None,
      ffmpeg_path: "ffmpeg".into(),
      mp3_bitrate: "192k".to_owned(),
      length_wait: Duration::from_secs(2),
      user_agent: DEFAULT_USER_AGENT.to_owned(),
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let mut config = Config::default();

    if let Some(addr) = get("BIND_ADDR") {
      config.bind_addr = addr
        .parse()
        .map_err(|_| Error::Server(format!("invalid BIND_ADDR: {addr}")))?;
    }
    if let Some(url) = get("PUBLIC_BASE_URL") {
      config.public_url = url.trim_end_matches('/').to_owned();
    }
    if let Some(path) = get("YTDLP_PATH") {
      config.ytdlp_path = path.into();
    }
    config.ytdlp_proxy = get("YTDLP_PROXY");
    if let Some(path) = get("FFMPEG_PATH") {
      config.ffmpeg_path = path.into();
    }
    if let Some(bitrate) = get("MP3_BITRATE") {
      config.mp3_bitrate = bitrate;
    }
    if let Some(ms) = get("CONTENT_LENGTH_WAIT_MS") {
      let ms = ms.parse::<u64>().map_err(|_| {
        Error::Server(format!("invalid CONTENT_LENGTH_WAIT_MS: {ms}"))
      })?;
      config.length_wait = Duration::from_millis(ms);
    }
    if let Some(ua) = get("USER_AGENT") {
      config.user_agent = ua;
    }

    Ok(config)
  }
}

#[cfg(test)]
mod test {
  use std::collections::HashMap;

  use super::*;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |key: &str| map.get(key).cloned()
  }

  #[test]
  fn test_defaults() {
    let config = Config::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config.bind_addr.port(), 8080);
    assert_eq!(config.length_wait, Duration::from_secs(2));
    assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
    assert!(config.ytdlp_proxy.is_none());
  }

  #[test]
  fn test_overrides() {
    let config = Config::from_lookup(lookup(&[
      ("BIND_ADDR", "127.0.0.1:9000"),
      ("PUBLIC_BASE_URL", "https://example.org/"),
      ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
      ("CONTENT_LENGTH_WAIT_MS", "500"),
      ("YTDLP_PROXY", "  "),
    ]))
    .unwrap();

    assert_eq!(config.bind_addr.port(), 9000);
    assert_eq!(config.public_url, "https://example.org");
    assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    assert_eq!(config.length_wait, Duration::from_millis(500));
    assert!(config.ytdlp_proxy.is_none());
  }

  #[test]
  fn test_invalid_values() {
    assert!(Config::from_lookup(lookup(&[("BIND_ADDR", "nope")])).is_err());
    assert!(
      Config::from_lookup(lookup(&[("CONTENT_LENGTH_WAIT_MS", "soon")]))
        .is_err()
    );
  }
}
