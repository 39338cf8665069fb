mod facebook;
mod ytdlp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
  media::{FormatDescriptor, MediaMetadata, Platform},
  upstream::Upstream,
  Error, Result,
};

pub use facebook::FacebookPage;
pub use ytdlp::Ytdlp;

pub enum Extraction {
  /// A direct media url, fetched with the given request headers.
  Proxy {
    url: String,
    headers: Vec<(String, String)>,
  },
  /// A byte source the resolver opened itself, for adapters that cannot
  /// hand out a plain url (a piped `yt-dlp -o -`, say). The bundled
  /// resolvers all return `Proxy`.
  Stream { upstream: Upstream },
}

#[async_trait]
pub trait Resolver: Send + Sync {
  async fn resolve(&self, url: &str) -> Result<MediaMetadata>;

  async fn extract(
    &self,
    _metadata: &MediaMetadata,
    format: &FormatDescriptor,
  ) -> Result<Extraction> {
    let url = format.url.clone().ok_or(Error::NoPlayableFormat)?;
    Ok(Extraction::Proxy {
      url,
      headers: format.http_headers.clone(),
    })
  }
}

/// One resolver per supported platform.
#[derive(Clone)]
pub struct Resolvers {
  pub youtube: Arc<dyn Resolver>,
  pub facebook: Arc<dyn Resolver>,
  pub reels: Arc<dyn Resolver>,
}

impl Resolvers {
  pub fn get(&self, platform: Platform) -> &dyn Resolver {
    match platform {
      Platform::YouTube => self.youtube.as_ref(),
      Platform::Facebook => self.facebook.as_ref(),
      Platform::InstagramReel => self.reels.as_ref(),
    }
  }

  #[cfg(test)]
  pub fn uniform(resolver: Arc<dyn Resolver>) -> Self {
    Self {
      youtube: resolver.clone(),
      facebook: resolver.clone(),
      reels: resolver,
    }
  }
}
