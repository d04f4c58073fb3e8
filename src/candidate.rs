//! One fetched cover image and its provenance.

use crate::fingerprint::{fingerprint, Fingerprint};
use crate::image_pipeline::ValidatedImage;
use crate::providers::ProviderName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A validated image from one provider. Only the consensus selector writes
/// `similarity_score` and `selected`, once.
#[derive(Debug, Clone)]
pub struct Candidate {
    source_url: String,
    provider: ProviderName,
    image_bytes: Vec<u8>,
    resolution: Resolution,
    fingerprint: Fingerprint,
    similarity_score: Option<f64>,
    selected: bool,
}

impl Candidate {
    /// Wraps validator output, fingerprinting the final bytes.
    pub fn from_validated(provider: ProviderName, source_url: &str, image: ValidatedImage) -> Self {
        let fingerprint = fingerprint(&image.bytes);
        Self::from_parts(
            provider,
            source_url,
            image.bytes,
            Resolution::new(image.width, image.height),
            fingerprint,
        )
    }

    /// Assembles a candidate from precomputed parts. The fingerprint must be
    /// the one `image_bytes` hash to.
    pub(crate) fn from_parts(
        provider: ProviderName,
        source_url: &str,
        image_bytes: Vec<u8>,
        resolution: Resolution,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            source_url: source_url.to_string(),
            provider,
            image_bytes,
            resolution,
            fingerprint,
            similarity_score: None,
            selected: false,
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn provider(&self) -> ProviderName {
        self.provider
    }

    pub fn image_bytes(&self) -> &[u8] {
        &self.image_bytes
    }

    pub fn into_image_bytes(self) -> Vec<u8> {
        self.image_bytes
    }

    pub fn size_bytes(&self) -> usize {
        self.image_bytes.len()
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Unset until this candidate wins a consensus round.
    pub fn similarity_score(&self) -> Option<f64> {
        self.similarity_score
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub(crate) fn mark_selected(&mut self, similarity_score: f64) {
        if self.selected {
            return;
        }
        self.similarity_score = Some(similarity_score);
        self.selected = true;
    }
}
