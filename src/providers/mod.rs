//! Cover-art provider abstractions and concrete implementations.

pub mod itunes;
pub mod lastfm;
pub mod musicbrainz;

use std::fmt;

use log::debug;

use crate::cancel_flag::CancelFlag;
use crate::config::FetcherConfig;
use crate::http_client::HttpClient;

pub use itunes::ITunesProvider;
pub use lastfm::LastFmProvider;
pub use musicbrainz::MusicBrainzProvider;

/// Which provider produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    LastFm,
    MusicBrainz,
    ITunes,
}

impl ProviderName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastFm => "lastfm",
            Self::MusicBrainz => "musicbrainz",
            Self::ITunes => "itunes",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artist/title pair used to search every provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoverQuery {
    pub artist: String,
    pub title: String,
}

impl CoverQuery {
    pub fn new(artist: &str, title: &str) -> Self {
        Self {
            artist: artist.trim().to_string(),
            title: title.trim().to_string(),
        }
    }

    /// True when neither field carries anything to search for.
    pub fn is_blank(&self) -> bool {
        self.artist.is_empty() && self.title.is_empty()
    }

    /// Free-text form, `"artist title"` with blanks dropped.
    pub fn search_term(&self) -> String {
        [self.artist.as_str(), self.title.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Undecoded image body as returned by a provider download.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Interface implemented by every cover-art source.
///
/// Implementations never fail: network errors, timeouts, rate limits and
/// unexpected response shapes all surface as an empty list.
pub trait CoverArtProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Inactive providers (e.g. missing credentials) get no share of the candidate budget.
    fn is_active(&self) -> bool {
        true
    }

    fn fetch_candidate_images(
        &self,
        query: &CoverQuery,
        limit: usize,
        cancel: &CancelFlag,
    ) -> Vec<RawImage>;
}

/// Builds the providers listed in `config.providers.order`, in that order.
pub fn build_providers(config: &FetcherConfig) -> Vec<Box<dyn CoverArtProvider>> {
    let http_client = HttpClient::new(&config.http);
    config
        .providers
        .order
        .iter()
        .map(|name| -> Box<dyn CoverArtProvider> {
            match name {
                ProviderName::LastFm => Box::new(LastFmProvider::new(
                    http_client.clone(),
                    config.providers.lastfm_api_key.clone(),
                )),
                ProviderName::MusicBrainz => {
                    Box::new(MusicBrainzProvider::new(http_client.clone()))
                }
                ProviderName::ITunes => Box::new(ITunesProvider::new(http_client.clone())),
            }
        })
        .collect()
}

/// Splits `max_candidates` evenly over `provider_count` providers, giving the
/// remainder to the highest-priority ones.
pub fn allocate_candidate_budget(max_candidates: usize, provider_count: usize) -> Vec<usize> {
    if provider_count == 0 {
        return Vec::new();
    }
    let base = max_candidates / provider_count;
    let remainder = max_candidates % provider_count;
    (0..provider_count)
        .map(|index| base + usize::from(index < remainder))
        .collect()
}

/// Downloads each URL in order until `limit` images were obtained.
pub(crate) fn download_images<'a, I>(
    http_client: &HttpClient,
    provider: ProviderName,
    urls: I,
    limit: usize,
    cancel: &CancelFlag,
) -> Vec<RawImage>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut images = Vec::new();
    for url in urls {
        if images.len() >= limit || cancel.is_cancelled() {
            break;
        }
        match http_client.download(url) {
            Ok(image) => {
                debug!(
                    "CoverArt[{provider}]: downloaded {} bytes from {url}",
                    image.bytes.len()
                );
                images.push(image);
            }
            Err(error) => {
                debug!("CoverArt[{provider}]: download failed for {url}: {error}");
            }
        }
    }
    images
}
