//! iTunes Search API cover source.

use log::debug;
use serde::Deserialize;

use crate::cancel_flag::CancelFlag;
use crate::http_client::{request_url, HttpClient, HttpError};
use crate::providers::{download_images, CoverArtProvider, CoverQuery, ProviderName, RawImage};

const ITUNES_SEARCH_URL: &str = "https://itunes.apple.com/search";
const ARTWORK_THUMB_TOKEN: &str = "100x100bb";
const ARTWORK_FULL_TOKEN: &str = "600x600bb";
const MAX_SEARCH_RESULTS: usize = 25;

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    artwork_url100: Option<String>,
}

pub struct ITunesProvider {
    http_client: HttpClient,
    search_url: String,
}

impl ITunesProvider {
    pub fn new(http_client: HttpClient) -> Self {
        Self::with_search_url(http_client, ITUNES_SEARCH_URL)
    }

    pub(crate) fn with_search_url(http_client: HttpClient, search_url: &str) -> Self {
        Self {
            http_client,
            search_url: search_url.to_string(),
        }
    }

    fn search(&self, query: &CoverQuery, limit: usize) -> Result<SearchResponse, HttpError> {
        let term = query.search_term();
        let result_limit = limit.saturating_mul(2).clamp(1, MAX_SEARCH_RESULTS).to_string();
        let url = request_url(
            &self.search_url,
            &[
                ("term", term.as_str()),
                ("media", "music"),
                ("entity", "song"),
                ("limit", result_limit.as_str()),
            ],
        );
        self.http_client.get_json(&url)
    }
}

/// Distinct artwork URLs upgraded from the 100px thumbnail to the 600px rendition.
fn artwork_urls(response: &SearchResponse, limit: usize) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for result in &response.results {
        if urls.len() >= limit {
            break;
        }
        let Some(thumb) = result.artwork_url100.as_deref().map(str::trim) else {
            continue;
        };
        if thumb.is_empty() {
            continue;
        }
        let full = thumb.replace(ARTWORK_THUMB_TOKEN, ARTWORK_FULL_TOKEN);
        if !urls.contains(&full) {
            urls.push(full);
        }
    }
    urls
}

impl CoverArtProvider for ITunesProvider {
    fn name(&self) -> ProviderName {
        ProviderName::ITunes
    }

    fn fetch_candidate_images(
        &self,
        query: &CoverQuery,
        limit: usize,
        cancel: &CancelFlag,
    ) -> Vec<RawImage> {
        if limit == 0 || query.is_blank() || cancel.is_cancelled() {
            return Vec::new();
        }

        let response = match self.search(query, limit) {
            Ok(response) => response,
            Err(error) => {
                debug!(
                    "CoverArt[itunes]: search failed for {}: {}",
                    query.label(),
                    error
                );
                return Vec::new();
            }
        };

        let urls = artwork_urls(&response, limit);
        if urls.is_empty() {
            debug!("CoverArt[itunes]: no artwork for {}", query.label());
            return Vec::new();
        }
        download_images(
            &self.http_client,
            self.name(),
            urls.iter().map(String::as_str),
            limit,
            cancel,
        )
    }
}
