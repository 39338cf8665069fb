use std::fmt;

use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
  YouTube,
  Facebook,
  InstagramReel,
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Platform::YouTube => "youtube",
      Platform::Facebook => "facebook",
      Platform::InstagramReel => "instagram-reel",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Container {
  #[default]
  Mp4,
  Mp3,
}

impl Container {
  pub fn parse(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "" | "mp4" => Ok(Container::Mp4),
      "mp3" => Ok(Container::Mp3),
      other => Err(Error::InvalidInput(format!(
        "Unsupported format '{other}', expected mp4 or mp3."
      ))),
    }
  }

  pub fn content_type(&self) -> &'static str {
    match self {
      Container::Mp4 => "video/mp4",
      Container::Mp3 => "audio/mpeg",
    }
  }

  pub fn extension(&self) -> &'static str {
    match self {
      Container::Mp4 => "mp4",
      Container::Mp3 => "mp3",
    }
  }

  /// Audio requests are re-encoded before they reach the client.
  pub fn needs_transcode(&self) -> bool {
    matches!(self, Container::Mp3)
  }
}

/// A validated download request. Construction fails before any network
/// call when the url does not belong to the platform.
#[derive(Debug, Clone)]
pub struct MediaRequest {
  pub source_url: String,
  pub platform: Platform,
  pub container: Container,
  pub format_selector: Option<String>,
}

impl MediaRequest {
  pub fn new(
    platform: Platform,
    source_url: Option<&str>,
    container: Option<&str>,
    format_selector: Option<&str>,
  ) -> Result<Self> {
    let source_url = platform.validate(source_url.unwrap_or_default())?;
    let container = Container::parse(container.unwrap_or_default())?;
    let format_selector = format_selector
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_owned);

    Ok(Self {
      source_url,
      platform,
      container,
      format_selector,
    })
  }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
  pub id: String,
  pub title: String,
  pub author: Option<String>,
  pub duration_seconds: Option<u64>,
  #[serde(rename = "thumbnail")]
  pub thumbnail_url: Option<String>,
  pub formats: Vec<FormatDescriptor>,
}

impl MediaMetadata {
  #[cfg(test)]
  pub fn format(&self, format_id: &str) -> Option<&FormatDescriptor> {
    self.formats.iter().find(|f| f.format_id == format_id)
  }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescriptor {
  pub format_id: String,
  pub container: Option<String>,
  pub quality_label: Option<String>,
  pub has_video: bool,
  pub has_audio: bool,
  pub bitrate: Option<u64>,
  pub audio_bitrate: Option<u64>,
  pub content_length: Option<u64>,
  pub mime_type: Option<String>,
  #[serde(skip)]
  pub height: Option<u32>,
  #[serde(skip)]
  pub url: Option<String>,
  #[serde(skip)]
  pub http_headers: Vec<(String, String)>,
}

impl FormatDescriptor {
  pub fn is_audio_only(&self) -> bool {
    self.has_audio && !self.has_video
  }

  pub fn is_combined_mp4(&self) -> bool {
    self.has_audio && self.has_video && self.container.as_deref() == Some("mp4")
  }

  /// Ordering key for "highest quality": resolution first, then bitrate.
  pub fn quality_rank(&self) -> (u32, u64) {
    (self.height.unwrap_or(0), self.bitrate.unwrap_or(0))
  }

  /// Audio quality, only when the resolver reported one.
  pub fn audio_rank(&self) -> Option<u64> {
    self.audio_bitrate.or(self.bitrate).filter(|rate| *rate > 0)
  }
}

pub fn mime_type_for(ext: &str, has_video: bool) -> &'static str {
  match (ext, has_video) {
    ("mp4", true) => "video/mp4",
    ("mp4" | "m4a", false) => "audio/mp4",
    ("webm", true) => "video/webm",
    ("webm", false) => "audio/webm",
    ("mp3", _) => "audio/mpeg",
    ("ogg" | "opus", _) => "audio/ogg",
    ("aac", _) => "audio/aac",
    _ => "application/octet-stream",
  }
}
