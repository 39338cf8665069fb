use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header, StatusCode};
use tracing::{debug, warn};

use crate::{
  config::Config,
  media::{FormatDescriptor, MediaMetadata, Platform},
  Error, Result,
};

use super::Resolver;

const DEFAULT_TITLE: &str = "Facebook Video";

// the json may sit inside another json string, quotes then come as `\"`
static HD_URL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"playable_url_quality_hd\\?"\s*:\s*\\?"([^"]+?)\\?""#).unwrap()
});
static SD_URL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#"playable_url\\?"\s*:\s*\\?"([^"]+?)\\?""#).unwrap()
});
static ESCAPES: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\\+(/|u0025|u0026)").unwrap());
static MP4_URL: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"https://[^"'\s<>]+\.mp4[^"'\s<>]*"#).unwrap());
static CDN_URL: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"https://video[^"'\s<>]+"#).unwrap());
static THUMBNAIL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r#""thumbnailImage"\s*:\s*\{\s*"uri"\s*:\s*"([^"]+)""#).unwrap()
});
static VIDEO_ID: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?:[?&]v=|/videos/(?:[^/]+/)?)(\d+)").unwrap());

// scrape the public video page for its playable urls. Facebook changes this
// markup at will, so everything fragile stays inside this adapter.
pub struct FacebookPage {
  client: reqwest::Client,
  user_agent: String,
}

impl FacebookPage {
  pub fn new(client: reqwest::Client, config: &Config) -> Self {
    Self {
      client,
      user_agent: config.user_agent.clone(),
    }
  }

  async fn fetch_page(&self, url: &str) -> Result<String> {
    let resp = self
      .client
      .get(url)
      .header(header::USER_AGENT, &self.user_agent)
      .header(
        header::ACCEPT,
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
      )
      .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
      .header(header::CACHE_CONTROL, "no-cache")
      .header("Sec-Fetch-Dest", "document")
      .header("Sec-Fetch-Mode", "navigate")
      .header("Sec-Fetch-Site", "none")
      .header("Upgrade-Insecure-Requests", "1")
      .send()
      .await
      .map_err(|e| Error::PlatformBlocked(format!("facebook page: {e}")))?;

    match resp.status() {
      s if s.is_success() => Ok(resp.text().await?),
      s @ (StatusCode::NOT_FOUND | StatusCode::GONE) => {
        Err(Error::NotFound(format!("facebook page returned {s}")))
      }
      s => Err(Error::PlatformBlocked(format!("facebook page returned {s}"))),
    }
  }
}

#[async_trait]
impl Resolver for FacebookPage {
  async fn resolve(&self, url: &str) -> Result<MediaMetadata> {
    let url = Platform::Facebook.validate(url)?;
    let html = self.fetch_page(&url).await?;
    debug!("fetched facebook page, {} bytes", html.len());

    parse_page(&url, &html).map_err(|e| {
      warn!("no video found on {}: {}", url, e);
      e
    })
  }
}

pub(super) fn parse_page(url: &str, html: &str) -> Result<MediaMetadata> {
  let dom = tl::parse(html, tl::ParserOptions::default())
    .map_err(|e| Error::ParseFailure(format!("facebook html: {e:?}")))?;

  let mut hd = capture(&HD_URL, html).map(|u| unescape(&u));
  let mut sd = capture(&SD_URL, html)
    .map(|u| unescape(&u))
    .or_else(|| first_attr(&dom, "video", "src"))
    .or_else(|| meta(&dom, "og:video:url"))
    .or_else(|| meta(&dom, "og:video"));

  if hd.is_none() && sd.is_none() {
    for pattern in [&*MP4_URL, &*CDN_URL] {
      let mut found = pattern.find_iter(html).map(|m| unescape(m.as_str()));
      sd = found.next();
      hd = found.next();
      if sd.is_some() {
        break;
      }
    }
  }

  if hd.is_none() && sd.is_none() {
    return Err(Error::NotFound(
      "Could not find video URLs in the Facebook page. The video might be \
       private, restricted, or Facebook changed their markup."
        .to_owned(),
    ));
  }

  let title = meta(&dom, "og:title")
    .or_else(|| first_text(&dom, "title"))
    .map(|t| t.trim().to_owned())
    .filter(|t| !t.is_empty())
    .unwrap_or_else(|| DEFAULT_TITLE.to_owned());

  let thumbnail_url = capture(&THUMBNAIL, html)
    .map(|u| unescape(&u))
    .or_else(|| meta(&dom, "og:image"));

  let id = VIDEO_ID
    .captures(url)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().to_owned())
    .unwrap_or_else(|| "unknown".to_owned());

  let formats = [("fb_hd", "HD", 720, hd), ("fb_sd", "SD", 360, sd)]
    .into_iter()
    .filter_map(|(id, label, height, url)| {
      Some(FormatDescriptor {
        format_id: id.to_owned(),
        container: Some("mp4".to_owned()),
        quality_label: Some(label.to_owned()),
        has_video: true,
        has_audio: true,
        mime_type: Some("video/mp4".to_owned()),
        height: Some(height),
        url: Some(url?),
        http_headers: download_headers(),
        ..Default::default()
      })
    })
    .collect();

  Ok(MediaMetadata {
    id,
    title,
    author: None,
    duration_seconds: None,
    thumbnail_url,
    formats,
  })
}

fn download_headers() -> Vec<(String, String)> {
  [
    ("Referer", "https://www.facebook.com/"),
    ("Origin", "https://www.facebook.com"),
  ]
  .into_iter()
  .map(|(k, v)| (k.to_owned(), v.to_owned()))
  .collect()
}

fn capture(re: &Regex, html: &str) -> Option<String> {
  re.captures(html)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().to_owned())
}

// urls embedded in the page's json blobs come escaped, once per level
fn unescape(s: &str) -> String {
  ESCAPES
    .replace_all(s, |caps: &regex::Captures| match &caps[1] {
      "u0025" => "%",
      "u0026" => "&",
      _ => "/",
    })
    .replace("&amp;", "&")
}

fn tags<'d, 'a>(
  dom: &'d tl::VDom<'a>,
  name: &'d str,
) -> impl Iterator<Item = &'d tl::HTMLTag<'a>> + 'd {
  let parser = dom.parser();
  dom
    .query_selector(name)
    .into_iter()
    .flatten()
    .filter_map(move |handle| handle.get(parser))
    .filter_map(|node| node.as_tag())
}

fn first_attr(dom: &tl::VDom<'_>, tag: &str, attr: &str) -> Option<String> {
  tags(dom, tag).find_map(|t| attr_value(t, attr))
}

/// `<meta property=.. content=..>`, also matched by `name=`.
fn meta(dom: &tl::VDom<'_>, property: &str) -> Option<String> {
  tags(dom, "meta").find_map(|t| {
    let key = attr_value(t, "property").or_else(|| attr_value(t, "name"))?;
    if key == property {
      attr_value(t, "content").map(|v| unescape(&v))
    } else {
      None
    }
  })
}

fn first_text(dom: &tl::VDom<'_>, tag: &str) -> Option<String> {
  tags(dom, tag)
    .next()
    .map(|t| t.inner_text(dom.parser()).into_owned())
}

fn attr_value(tag: &tl::HTMLTag<'_>, name: &str) -> Option<String> {
  tag
    .attributes()
    .get(name)
    .flatten()
    .map(|v| v.as_utf8_str().into_owned())
}
