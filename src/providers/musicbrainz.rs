//! MusicBrainz + Cover Art Archive cover source.
//
// Searches recordings via the MusicBrainz API, then lists release artwork on `coverartarchive.org`.
// See: https://musicbrainz.org/doc/MusicBrainz_API and https://musicbrainz.org/doc/Cover_Art_Archive/API

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use serde::Deserialize;

use crate::cancel_flag::CancelFlag;
use crate::http_client::{request_url, HttpClient, HttpError};
use crate::providers::{download_images, CoverArtProvider, CoverQuery, ProviderName, RawImage};

const MUSICBRAINZ_RECORDING_URL: &str = "https://musicbrainz.org/ws/2/recording";
const COVER_ART_ARCHIVE_RELEASE_URL: &str = "https://coverartarchive.org/release";
const RECORDING_SEARCH_LIMIT: &str = "5";
const MAX_RELEASES: usize = 2;
const RATE_LIMIT_WAIT_CAP: Duration = Duration::from_secs(3);
const RATE_LIMIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Deserialize)]
struct RecordingSearchResponse {
    #[serde(default)]
    recordings: Vec<Recording>,
}

#[derive(Debug, Default, Deserialize)]
struct Recording {
    #[serde(default)]
    releases: Vec<ReleaseRef>,
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseRef {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct CoverArtResponse {
    #[serde(default)]
    images: Vec<CoverArtImage>,
}

#[derive(Debug, Default, Deserialize)]
struct CoverArtImage {
    #[serde(default)]
    image: String,
    #[serde(default)]
    front: bool,
    #[serde(default)]
    thumbnails: CoverArtThumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct CoverArtThumbnails {
    #[serde(rename = "1200")]
    xlarge: Option<String>,
    large: Option<String>,
}

impl CoverArtImage {
    /// Prefers the 1200px rendition; originals can be arbitrarily large scans.
    fn best_url(&self) -> Option<&str> {
        self.thumbnails
            .xlarge
            .as_deref()
            .or(self.thumbnails.large.as_deref())
            .or(Some(self.image.as_str()))
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// MusicBrainz provider, paced to one request per second.
pub struct MusicBrainzProvider {
    http_client: HttpClient,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    recording_url: String,
    release_art_url: String,
}

impl MusicBrainzProvider {
    pub fn new(http_client: HttpClient) -> Self {
        Self::with_endpoints(
            http_client,
            MUSICBRAINZ_RECORDING_URL,
            COVER_ART_ARCHIVE_RELEASE_URL,
        )
    }

    pub(crate) fn with_endpoints(
        http_client: HttpClient,
        recording_url: &str,
        release_art_url: &str,
    ) -> Self {
        Self {
            http_client,
            limiter: RateLimiter::direct(Quota::per_second(NonZeroU32::MIN)),
            recording_url: recording_url.to_string(),
            release_art_url: release_art_url.to_string(),
        }
    }

    fn wait_for_rate_limit_slot(&self, cancel: &CancelFlag) -> bool {
        let deadline = Instant::now() + RATE_LIMIT_WAIT_CAP;
        loop {
            if self.limiter.check().is_ok() {
                return true;
            }
            if Instant::now() >= deadline || !cancel.sleep(RATE_LIMIT_POLL) {
                return false;
            }
        }
    }

    fn search_recordings(&self, query: &CoverQuery) -> Result<RecordingSearchResponse, HttpError> {
        let lucene = recording_query(query);
        let url = request_url(
            &self.recording_url,
            &[
                ("query", lucene.as_str()),
                ("fmt", "json"),
                ("limit", RECORDING_SEARCH_LIMIT),
            ],
        );
        self.http_client.get_json(&url)
    }

    fn release_artwork(&self, release_id: &str) -> Result<CoverArtResponse, HttpError> {
        let url = format!(
            "{}/{}",
            self.release_art_url,
            urlencoding::encode(release_id)
        );
        self.http_client.get_json(&url)
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace(['"', '\\'], " ").trim())
}

/// Lucene query for the recording search; blank fields are left out.
fn recording_query(query: &CoverQuery) -> String {
    let mut clauses = Vec::with_capacity(2);
    if !query.artist.is_empty() {
        clauses.push(format!("artist:{}", quoted(&query.artist)));
    }
    if !query.title.is_empty() {
        clauses.push(format!("recording:{}", quoted(&query.title)));
    }
    clauses.join(" AND ")
}

/// First release of each leading recording, without duplicates.
fn release_ids(response: &RecordingSearchResponse) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for recording in response.recordings.iter().take(MAX_RELEASES) {
        let Some(release) = recording.releases.first() else {
            continue;
        };
        let id = release.id.trim();
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Front covers first, then the remaining artwork in archive order.
fn artwork_urls(response: &CoverArtResponse) -> Vec<&str> {
    let fronts = response.images.iter().filter(|image| image.front);
    let others = response.images.iter().filter(|image| !image.front);
    fronts.chain(others).filter_map(CoverArtImage::best_url).collect()
}

impl CoverArtProvider for MusicBrainzProvider {
    fn name(&self) -> ProviderName {
        ProviderName::MusicBrainz
    }

    fn fetch_candidate_images(
        &self,
        query: &CoverQuery,
        limit: usize,
        cancel: &CancelFlag,
    ) -> Vec<RawImage> {
        if limit == 0 || query.is_blank() || !self.wait_for_rate_limit_slot(cancel) {
            return Vec::new();
        }

        let recordings = match self.search_recordings(query) {
            Ok(response) => response,
            Err(error) => {
                debug!(
                    "CoverArt[musicbrainz]: recording search failed for {}: {}",
                    query.label(),
                    error
                );
                return Vec::new();
            }
        };

        let mut images = Vec::new();
        for release_id in release_ids(&recordings) {
            if images.len() >= limit || cancel.is_cancelled() {
                break;
            }
            let artwork = match self.release_artwork(release_id) {
                Ok(artwork) => artwork,
                Err(error) => {
                    debug!("CoverArt[musicbrainz]: no artwork for release {release_id}: {error}");
                    continue;
                }
            };
            let remaining = limit - images.len();
            images.extend(download_images(
                &self.http_client,
                self.name(),
                artwork_urls(&artwork),
                remaining,
                cancel,
            ));
        }

        if images.is_empty() {
            debug!("CoverArt[musicbrainz]: no images for {}", query.label());
        }
        images
    }
}

#[cfg(test)]
mod tests {
    use super::{
        artwork_urls, recording_query, release_ids, CoverArtResponse, MusicBrainzProvider,
        RecordingSearchResponse,
    };
    use crate::cancel_flag::CancelFlag;
    use crate::providers::{CoverArtProvider, CoverQuery};
    use crate::test_support::{stub_http_client, StubReply, StubServer};

    fn provider_for(server: &StubServer) -> MusicBrainzProvider {
        MusicBrainzProvider::with_endpoints(
            stub_http_client(1 << 20, 500),
            &server.url("/ws/2/recording"),
            &server.url("/release"),
        )
    }

    #[test]
    fn test_recording_query_combines_and_skips_blank_fields() {
        assert_eq!(
            recording_query(&CoverQuery::new("The Eagles", "Hotel \"California\"")),
            "artist:\"The Eagles\" AND recording:\"Hotel  California\""
        );
        assert_eq!(
            recording_query(&CoverQuery::new("The Eagles", "")),
            "artist:\"The Eagles\""
        );
    }

    #[test]
    fn test_release_ids_takes_first_release_of_leading_recordings() {
        let response: RecordingSearchResponse = serde_json::from_str(
            r#"{
                "count": 3,
                "recordings": [
                    {"id": "r1", "title": "A", "releases": [{"id": "rel-1"}, {"id": "rel-x"}]},
                    {"id": "r2", "title": "A", "releases": [{"id": "rel-1"}]},
                    {"id": "r3", "title": "A", "releases": [{"id": "rel-3"}]}
                ]
            }"#,
        )
        .expect("recording search should parse");

        assert_eq!(release_ids(&response), vec!["rel-1"]);
    }

    #[test]
    fn test_release_ids_skips_recordings_without_releases() {
        let response: RecordingSearchResponse = serde_json::from_str(
            r#"{"recordings": [{"id": "r1"}, {"id": "r2", "releases": [{"id": "rel-2"}]}]}"#,
        )
        .expect("recording search should parse");
        assert_eq!(release_ids(&response), vec!["rel-2"]);
    }

    #[test]
    fn test_artwork_urls_orders_front_first_and_prefers_thumbnails() {
        let response: CoverArtResponse = serde_json::from_str(
            r#"{
                "images": [
                    {"image": "https://caa/back.jpg", "front": false, "thumbnails": {}},
                    {
                        "image": "https://caa/front.jpg",
                        "front": true,
                        "thumbnails": {"large": "https://caa/front-500.jpg", "1200": "https://caa/front-1200.jpg"}
                    },
                    {"image": "", "front": false, "thumbnails": {}}
                ],
                "release": "https://musicbrainz.org/release/rel-1"
            }"#,
        )
        .expect("cover art listing should parse");

        assert_eq!(
            artwork_urls(&response),
            vec!["https://caa/front-1200.jpg", "https://caa/back.jpg"]
        );
    }

    #[test]
    fn test_fetch_follows_release_to_cover_art_archive() {
        let server = StubServer::bind();
        let listing = format!(
            r#"{{"images": [{{"image": "{}", "front": true, "thumbnails": {{}}}}]}}"#,
            server.url("/art/front.png")
        );
        let provider = provider_for(&server);
        server.serve(vec![
            (
                "/ws/2/recording",
                StubReply::json(r#"{"recordings": [{"releases": [{"id": "rel-1"}]}]}"#),
            ),
            ("/release/rel-1", StubReply::json(&listing)),
            ("/art/front.png", StubReply::png(16, 16)),
        ]);

        let images = provider.fetch_candidate_images(
            &CoverQuery::new("Artist X", "Song Y"),
            4,
            &CancelFlag::new(),
        );
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_fetch_degrades_to_empty_on_search_failure_or_missing_art() {
        let query = CoverQuery::new("Artist X", "Song Y");

        let failing = StubServer::bind();
        let provider = provider_for(&failing);
        failing.serve(vec![("/ws/2/recording", StubReply::status(503))]);
        assert!(provider
            .fetch_candidate_images(&query, 4, &CancelFlag::new())
            .is_empty());

        // Cover Art Archive answers 404 for releases without artwork.
        let artless = StubServer::bind();
        let provider = provider_for(&artless);
        artless.serve(vec![(
            "/ws/2/recording",
            StubReply::json(r#"{"recordings": [{"releases": [{"id": "rel-2"}]}]}"#),
        )]);
        assert!(provider
            .fetch_candidate_images(&query, 4, &CancelFlag::new())
            .is_empty());
    }
}
