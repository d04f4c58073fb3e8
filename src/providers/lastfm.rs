//! Last.fm `track.getInfo` cover source.
//
// The album block of a track lookup lists the same artwork at several sizes.
// See: https://www.last.fm/api/show/track.getInfo

use log::debug;
use serde::Deserialize;

use crate::cancel_flag::CancelFlag;
use crate::http_client::{request_url, HttpClient, HttpError};
use crate::providers::{download_images, CoverArtProvider, CoverQuery, ProviderName, RawImage};

const LASTFM_API_BASE: &str = "https://ws.audioscrobbler.com/2.0/";

#[derive(Debug, Default, Deserialize)]
struct TrackInfoResponse {
    #[serde(default)]
    track: Option<TrackInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackInfo {
    #[serde(default)]
    album: Option<TrackAlbum>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackAlbum {
    #[serde(default)]
    image: Vec<LastFmImage>,
}

#[derive(Debug, Default, Deserialize)]
struct LastFmImage {
    #[serde(rename = "#text", default)]
    url: String,
}

/// Last.fm provider; inactive without an API key.
pub struct LastFmProvider {
    http_client: HttpClient,
    api_key: Option<String>,
    api_url: String,
}

impl LastFmProvider {
    pub fn new(http_client: HttpClient, api_key: Option<String>) -> Self {
        Self::with_api_url(http_client, api_key, LASTFM_API_BASE)
    }

    pub(crate) fn with_api_url(
        http_client: HttpClient,
        api_key: Option<String>,
        api_url: &str,
    ) -> Self {
        Self {
            http_client,
            api_key,
            api_url: api_url.to_string(),
        }
    }

    fn track_info(
        &self,
        query: &CoverQuery,
        api_key: &str,
    ) -> Result<TrackInfoResponse, HttpError> {
        let url = request_url(
            &self.api_url,
            &[
                ("method", "track.getInfo"),
                ("artist", query.artist.as_str()),
                ("track", query.title.as_str()),
                ("api_key", api_key),
                ("format", "json"),
            ],
        );
        self.http_client.get_json(&url)
    }
}

/// The last `limit` non-empty image URLs; Last.fm lists sizes smallest first.
fn image_urls(response: &TrackInfoResponse, limit: usize) -> Vec<&str> {
    let urls: Vec<&str> = response
        .track
        .as_ref()
        .and_then(|track| track.album.as_ref())
        .map(|album| {
            album
                .image
                .iter()
                .map(|image| image.url.trim())
                .filter(|url| !url.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let skip = urls.len().saturating_sub(limit);
    urls.into_iter().skip(skip).collect()
}

impl CoverArtProvider for LastFmProvider {
    fn name(&self) -> ProviderName {
        ProviderName::LastFm
    }

    fn is_active(&self) -> bool {
        self.api_key.is_some()
    }

    fn fetch_candidate_images(
        &self,
        query: &CoverQuery,
        limit: usize,
        cancel: &CancelFlag,
    ) -> Vec<RawImage> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("CoverArt[lastfm]: no API key configured, skipping");
            return Vec::new();
        };
        if query.artist.is_empty() || query.title.is_empty() {
            debug!("CoverArt[lastfm]: track lookup needs both artist and title, skipping");
            return Vec::new();
        }
        if limit == 0 || cancel.is_cancelled() {
            return Vec::new();
        }

        let response = match self.track_info(query, api_key) {
            Ok(response) => response,
            Err(error) => {
                debug!(
                    "CoverArt[lastfm]: lookup failed for {}: {}",
                    query.label(),
                    error
                );
                return Vec::new();
            }
        };

        let urls = image_urls(&response, limit);
        if urls.is_empty() {
            debug!("CoverArt[lastfm]: no album images for {}", query.label());
            return Vec::new();
        }
        download_images(&self.http_client, self.name(), urls, limit, cancel)
    }
}
