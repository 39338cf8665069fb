use http_types::Url;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{media::Platform, Error, Result};

static YOUTUBE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  compile(&[
    r"(?i)^https?://(?:(?:www|m|music)\.)?youtube\.com/watch/?\?(?:.*&)?v=[\w-]+",
    r"(?i)^https?://(?:(?:www|m)\.)?youtube\.com/(?:shorts|embed|live|v)/[\w-]+",
    r"(?i)^https?://youtu\.be/[\w-]+",
  ])
});

static FACEBOOK_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  compile(&[
    r"(?i)^https?://(?:www\.)?facebook\.com/.+/videos/.+",
    r"(?i)^https?://(?:www\.)?facebook\.com/watch/?\?v=.+",
    r"(?i)^https?://(?:www\.)?facebook\.com/share/v/.+",
    r"(?i)^https?://(?:www\.)?fb\.watch/.+",
  ])
});

static REEL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
  compile(&[
    r"(?i)^https?://(?:www\.)?instagram\.com/(?:[\w.]+/)?(?:reel|reels|p|tv)/[\w-]+",
    r"(?i)^https?://(?:(?:www|m)\.)?facebook\.com/reel/\d+",
  ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
  patterns
    .iter()
    .map(|p| Regex::new(p).expect("hard-coded pattern"))
    .collect()
}

impl Platform {
  fn patterns(&self) -> &'static [Regex] {
    match self {
      Platform::YouTube => &YOUTUBE_PATTERNS,
      Platform::Facebook => &FACEBOOK_PATTERNS,
      Platform::InstagramReel => &REEL_PATTERNS,
    }
  }

  fn rejection(&self) -> &'static str {
    match self {
      Platform::YouTube => "Invalid YouTube URL.",
      Platform::Facebook => "Please enter a valid Facebook video URL.",
      Platform::InstagramReel => {
        "Invalid Reel URL. Please provide a valid Instagram Reel URL."
      }
    }
  }

  pub fn matches(&self, url: &str) -> bool {
    let url = url.trim();
    match url.parse::<Url>() {
      Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
        self.patterns().iter().any(|p| p.is_match(url))
      }
      _ => false,
    }
  }

  /// Returns the trimmed url when it belongs to this platform.
  pub fn validate(&self, url: &str) -> Result<String> {
    if self.matches(url) {
      Ok(url.trim().to_owned())
    } else {
      Err(Error::InvalidInput(self.rejection().to_owned()))
    }
  }
}
