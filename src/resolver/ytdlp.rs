use std::{collections::HashMap, io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{
  config::Config,
  media::{mime_type_for, FormatDescriptor, MediaMetadata, Platform},
  Error, Result,
};

use super::Resolver;

// run yt-dlp command line to get the video info and its playback urls.
// requires yt-dlp executable at the configured path.
pub struct Ytdlp {
  platform: Platform,
  program: PathBuf,
  proxy: Option<String>,
}

impl Ytdlp {
  pub fn new(platform: Platform, config: &Config) -> Self {
    Self {
      platform,
      program: config.ytdlp_path.clone(),
      proxy: config.ytdlp_proxy.clone(),
    }
  }

  fn command(&self, url: &str) -> Command {
    let mut cmd = Command::new(&self.program);
    cmd
      // a single json document for the whole video
      .arg("-J")
      .arg("--no-playlist")
      .arg("--no-warnings");

    if let Some(proxy) = &self.proxy {
      debug!("using proxy: {}", redact(proxy));
      cmd.arg("--proxy").arg(proxy);
    }

    cmd.arg(url);
    cmd
  }
}

#[async_trait]
impl Resolver for Ytdlp {
  async fn resolve(&self, url: &str) -> Result<MediaMetadata> {
    let url = self.platform.validate(url)?;

    let output = self.command(&url).output().await.map_err(|e| {
      if e.kind() == ErrorKind::NotFound {
        Error::Server(format!("{} is not installed", self.program.display()))
      } else {
        Error::IO(e)
      }
    })?;

    if !output.status.success() {
      let err = classify(&String::from_utf8_lossy(&output.stderr));
      warn!("yt-dlp failed for {}: {}", url, err);
      return Err(err);
    }

    parse_info(&output.stdout)
  }
}

#[derive(Deserialize, Debug)]
struct YtdlpInfo {
  id: String,
  title: Option<String>,
  uploader: Option<String>,
  channel: Option<String>,
  duration: Option<f64>,
  thumbnail: Option<String>,
  #[serde(default)]
  formats: Vec<YtdlpFormat>,
  // some extractors describe their only format at the top level
  #[serde(flatten)]
  single: YtdlpFormat,
}

#[derive(Deserialize, Debug, Default)]
struct YtdlpFormat {
  format_id: Option<String>,
  ext: Option<String>,
  format_note: Option<String>,
  height: Option<u32>,
  vcodec: Option<String>,
  acodec: Option<String>,
  tbr: Option<f64>,
  abr: Option<f64>,
  filesize: Option<f64>,
  filesize_approx: Option<f64>,
  url: Option<String>,
  protocol: Option<String>,
  #[serde(default)]
  http_headers: HashMap<String, String>,
}

impl YtdlpFormat {
  // only plain progressive downloads can be proxied byte for byte
  fn is_direct(&self) -> bool {
    self.url.is_some()
      && self.ext.as_deref() != Some("mhtml")
      && matches!(self.protocol.as_deref(), None | Some("http" | "https"))
  }
}

fn parse_info(stdout: &[u8]) -> Result<MediaMetadata> {
  let mut info: YtdlpInfo = serde_json::from_slice(stdout)
    .map_err(|e| Error::ParseFailure(format!("yt-dlp output: {e}")))?;

  if info.formats.is_empty() && info.single.url.is_some() {
    info.formats.push(std::mem::take(&mut info.single));
  }

  let formats = info
    .formats
    .into_iter()
    .filter(YtdlpFormat::is_direct)
    .enumerate()
    .map(|(i, f)| f.into_descriptor(i))
    .collect();

  Ok(MediaMetadata {
    title: info.title.unwrap_or_else(|| info.id.clone()),
    id: info.id,
    author: info.uploader.or(info.channel),
    duration_seconds: info.duration.map(|d| d.round() as u64),
    thumbnail_url: info.thumbnail,
    formats,
  })
}

impl YtdlpFormat {
  fn into_descriptor(self, index: usize) -> FormatDescriptor {
    let has_video = match self.vcodec.as_deref() {
      Some(codec) => codec != "none",
      None => self.height.is_some(),
    };
    let has_audio = self.acodec.as_deref() != Some("none");
    let ext = self.ext.unwrap_or_else(|| "mp4".to_owned());
    let kbps = |rate: Option<f64>| {
      rate.filter(|r| *r > 0.0).map(|r| (r * 1000.0).round() as u64)
    };

    FormatDescriptor {
      format_id: self.format_id.unwrap_or_else(|| index.to_string()),
      quality_label: self
        .height
        .map(|h| format!("{h}p"))
        .or(self.format_note),
      has_video,
      has_audio,
      bitrate: kbps(self.tbr),
      audio_bitrate: kbps(self.abr),
      content_length: self
        .filesize
        .or(self.filesize_approx)
        .map(|size| size as u64),
      mime_type: Some(mime_type_for(&ext, has_video).to_owned()),
      container: Some(ext),
      height: self.height,
      url: self.url,
      http_headers: self.http_headers.into_iter().collect(),
    }
  }
}

fn classify(stderr: &str) -> Error {
  let message = stderr
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .next_back()
    .unwrap_or("yt-dlp failed without output");
  let message = message.strip_prefix("ERROR: ").unwrap_or(message).to_owned();
  let lower = message.to_ascii_lowercase();

  let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

  if any(&[
    "video unavailable",
    "private video",
    "does not exist",
    "has been removed",
    "not found",
    "http error 404",
    "unsupported url",
  ]) {
    Error::NotFound(message)
  } else if any(&[
    "sign in",
    "log in",
    "login",
    "http error 403",
    "http error 429",
    "too many requests",
    "rate-limit",
    "blocked",
  ]) {
    Error::PlatformBlocked(message)
  } else {
    Error::ParseFailure(message)
  }
}

// remove credentials from a proxy url before printing it
fn redact(proxy: &str) -> std::borrow::Cow<'_, str> {
  static AUTH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"//[^:/]+(:[^@]+)?@").unwrap());
  AUTH_REGEX.replace(proxy, "//<REDACTED>@")
}
