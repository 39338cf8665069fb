use axum::{
  extract::State, headers::ContentType, http::header, response::IntoResponse,
  TypedHeader,
};
use chrono::{DateTime, Utc};

use crate::routes::AppState;

const CRAWLER_CACHE: &str = "public, max-age=86400, stale-while-revalidate=86400";

pub async fn robots(State(state): State<AppState>) -> impl IntoResponse {
  (
    TypedHeader(ContentType::text_utf8()),
    [(header::CACHE_CONTROL, CRAWLER_CACHE)],
    robots_txt(&state.config.public_url),
  )
}

pub async fn sitemap(State(state): State<AppState>) -> impl IntoResponse {
  (
    TypedHeader(ContentType::xml()),
    [(header::CACHE_CONTROL, CRAWLER_CACHE)],
    sitemap_xml(&state.config.public_url, Utc::now()),
  )
}

pub async fn health() -> impl IntoResponse {
  "ok".to_owned()
}

fn robots_txt(base_url: &str) -> String {
  format!("User-agent: *\nAllow: /\nSitemap: {base_url}/sitemap.xml\n")
}

// a single page app, so the home page is the only entry
fn sitemap_xml(base_url: &str, modified: DateTime<Utc>) -> String {
  format!(
    r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>{base_url}</loc>
    <lastmod>{}</lastmod>
    <changefreq>daily</changefreq>
    <priority>1.0</priority>
  </url>
</urlset>
"#,
    modified.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
  )
}

#[cfg(test)]
mod test {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn test_robots_points_to_sitemap() {
    assert_eq!(
      robots_txt("https://vidsaverproo.web.app"),
      "User-agent: *\nAllow: /\n\
       Sitemap: https://vidsaverproo.web.app/sitemap.xml\n"
    );
  }

  #[test]
  fn test_sitemap_lists_home_page() {
    let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let xml = sitemap_xml("https://example.org", modified);
    assert!(xml.contains("<loc>https://example.org</loc>"));
    assert!(xml.contains("<lastmod>2024-05-01T12:00:00Z</lastmod>"));
    assert!(xml.contains("<changefreq>daily</changefreq>"));
  }
}
