//! Turns arbitrary media titles into `Content-Disposition` values.
//!
//! The header carries two names: a quoted ASCII fallback for old clients
//! and an RFC 5987 `filename*` with the full UTF-8 title percent-encoded.

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_NAME: &str = "video";

const ASCII_LIMIT: usize = 200;
const NAME_BYTE_LIMIT: usize = 255;

static RESERVED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.+$").unwrap());
static WINDOWS_RESERVED: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?i)^(con|prn|aux|nul|com[0-9]|lpt[0-9])(\..*)?$").unwrap()
});
static WINDOWS_TRAILING: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"[\. ]+$").unwrap());
static UNDERSCORE_RUNS: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"_{2,}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeName {
  /// Printable ASCII only, never empty.
  pub ascii_fallback: String,
  /// The cleaned title in full, before percent-encoding.
  pub utf8_extended: String,
}

pub fn sanitize(raw_title: &str) -> SafeName {
  let base = clean(raw_title);
  let base = if base.is_empty() {
    DEFAULT_NAME.to_owned()
  } else {
    base
  };

  let ascii: String = base
    .chars()
    .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
    .collect();
  let ascii = UNDERSCORE_RUNS.replace_all(&ascii, "_");
  let ascii: String = ascii.chars().take(ASCII_LIMIT).collect();
  let ascii_fallback = if ascii.trim().is_empty() {
    DEFAULT_NAME.to_owned()
  } else {
    ascii
  };

  SafeName {
    ascii_fallback,
    utf8_extended: base,
  }
}

impl SafeName {
  pub fn content_disposition(&self, extension: &str) -> String {
    format!(
      "attachment; filename=\"{}.{extension}\"; filename*=UTF-8''{}",
      self.ascii_fallback,
      urlencoding::encode(&format!("{}.{extension}", self.utf8_extended)),
    )
  }
}

// the usual sanitize-filename rules: drop characters no filesystem accepts
// along with control characters and line breaks.
fn clean(raw: &str) -> String {
  let stripped: String = raw
    .chars()
    .filter(|c| {
      !matches!(c, '/' | '?' | '<' | '>' | '\\' | ':' | '*' | '|' | '"')
    })
    .filter(|c| !c.is_control())
    .collect();

  if RESERVED.is_match(&stripped) || WINDOWS_RESERVED.is_match(&stripped) {
    return String::new();
  }

  let trimmed = WINDOWS_TRAILING.replace(&stripped, "");
  truncate_bytes(trimmed.trim(), NAME_BYTE_LIMIT).to_owned()
}

fn truncate_bytes(s: &str, limit: usize) -> &str {
  if s.len() <= limit {
    return s;
  }

  let mut end = limit;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  &s[..end]
}
