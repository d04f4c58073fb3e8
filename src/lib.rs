//! Consensus-based cover-art lookup.
//!
//! Several public providers are asked for artwork of one track. Every
//! downloaded image is validated, squeezed under a byte budget and
//! fingerprinted; the image most other sources agree on wins.

pub mod cancel_flag;
pub mod candidate;
pub mod config;
pub mod consensus;
pub mod fetcher;
pub mod fingerprint;
pub mod http_client;
pub mod image_pipeline;
pub mod providers;
pub mod tag_bridge;

#[cfg(test)]
mod test_support;

pub use cancel_flag::CancelFlag;
pub use candidate::{Candidate, Resolution};
pub use config::{load_config, FanOutMode, FetcherConfig};
pub use consensus::ConsensusSelector;
pub use fetcher::CoverArtFetcher;
pub use fingerprint::{fingerprint, similarity, Fingerprint};
pub use image_pipeline::{validate_and_compress, ImageRejection, ValidatedImage};
pub use providers::{CoverArtProvider, CoverQuery, ProviderName, RawImage};
