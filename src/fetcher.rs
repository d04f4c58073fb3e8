//! Cover-art lookup orchestration: provider fan-out, validation, and consensus.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::cancel_flag::CancelFlag;
use crate::candidate::Candidate;
use crate::config::{FanOutMode, FetcherConfig};
use crate::consensus::ConsensusSelector;
use crate::image_pipeline::validate_and_compress;
use crate::providers::{
    allocate_candidate_budget, build_providers, CoverArtProvider, CoverQuery, ProviderName,
    RawImage,
};

type ProviderBatch = (ProviderName, Vec<RawImage>);
type PlannedCall<'a> = (&'a dyn CoverArtProvider, usize);

/// Queries every configured provider for one track and votes on the results.
pub struct CoverArtFetcher {
    providers: Vec<Box<dyn CoverArtProvider>>,
    fan_out: FanOutMode,
    courtesy_delay: Duration,
    target_max_bytes: usize,
    selector: ConsensusSelector,
}

impl CoverArtFetcher {
    /// Builds the providers named in `config.providers.order`.
    pub fn new(config: &FetcherConfig) -> Self {
        Self::with_providers(config, build_providers(config))
    }

    /// Uses `providers` as given, highest priority first.
    pub fn with_providers(
        config: &FetcherConfig,
        providers: Vec<Box<dyn CoverArtProvider>>,
    ) -> Self {
        Self {
            providers,
            fan_out: config.fetch.fan_out,
            courtesy_delay: Duration::from_millis(config.fetch.courtesy_delay_ms),
            target_max_bytes: config.image.target_max_bytes,
            selector: ConsensusSelector::new(config.fetch.similarity_threshold),
        }
    }

    pub fn provider_names(&self) -> Vec<ProviderName> {
        self.providers.iter().map(|provider| provider.name()).collect()
    }

    pub fn fetch_cover_art(
        &self,
        artist: &str,
        title: &str,
        max_candidates: usize,
    ) -> Option<Candidate> {
        self.fetch_cover_art_with_cancel(artist, title, max_candidates, &CancelFlag::new())
    }

    /// Returns the consensus cover, or `None` when nothing usable was found or
    /// `cancel` was raised before selection.
    pub fn fetch_cover_art_with_cancel(
        &self,
        artist: &str,
        title: &str,
        max_candidates: usize,
        cancel: &CancelFlag,
    ) -> Option<Candidate> {
        let query = CoverQuery::new(artist, title);
        if query.is_blank() {
            debug!("CoverArt: blank query, skipping lookup");
            return None;
        }

        let candidates = self.collect_candidates(&query, max_candidates, cancel);
        if cancel.is_cancelled() {
            info!("CoverArt: lookup cancelled for {}", query.label());
            return None;
        }
        if candidates.is_empty() {
            info!("CoverArt: no usable candidates for {}", query.label());
            return None;
        }

        info!(
            "CoverArt: voting over {} candidates for {}",
            candidates.len(),
            query.label()
        );
        self.selector.select_best(candidates)
    }

    /// Fans out to the providers and turns every accepted image into a
    /// candidate, in provider-priority order.
    pub fn collect_candidates(
        &self,
        query: &CoverQuery,
        max_candidates: usize,
        cancel: &CancelFlag,
    ) -> Vec<Candidate> {
        if query.is_blank() || cancel.is_cancelled() {
            return Vec::new();
        }
        let plan = self.budget_plan(max_candidates);
        let batches = match self.fan_out {
            FanOutMode::Parallel => self.gather_parallel(query, &plan, cancel),
            FanOutMode::Sequential => self.gather_sequential(query, &plan, cancel),
        };
        if cancel.is_cancelled() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for (provider, images) in batches {
            for raw in images {
                if let Some(candidate) = self.accept_image(provider, raw) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    /// Splits the budget over active providers only, dropping those left with no share.
    fn budget_plan(&self, max_candidates: usize) -> Vec<PlannedCall<'_>> {
        let active: Vec<&dyn CoverArtProvider> = self
            .providers
            .iter()
            .map(|provider| &**provider)
            .filter(|provider| {
                let active = provider.is_active();
                if !active {
                    debug!("CoverArt[{}]: inactive, no candidate budget", provider.name());
                }
                active
            })
            .collect();
        let budgets = allocate_candidate_budget(max_candidates, active.len());
        active
            .into_iter()
            .zip(budgets)
            .filter(|(_, limit)| *limit > 0)
            .collect()
    }

    fn gather_parallel(
        &self,
        query: &CoverQuery,
        plan: &[PlannedCall<'_>],
        cancel: &CancelFlag,
    ) -> Vec<ProviderBatch> {
        thread::scope(|scope| {
            let handles: Vec<_> = plan
                .iter()
                .map(|&(provider, limit)| {
                    let handle =
                        scope.spawn(move || provider.fetch_candidate_images(query, limit, cancel));
                    (provider.name(), handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| match handle.join() {
                    Ok(images) => (name, images),
                    Err(_) => {
                        warn!("CoverArt[{name}]: provider thread panicked");
                        (name, Vec::new())
                    }
                })
                .collect()
        })
    }

    fn gather_sequential(
        &self,
        query: &CoverQuery,
        plan: &[PlannedCall<'_>],
        cancel: &CancelFlag,
    ) -> Vec<ProviderBatch> {
        let mut batches = Vec::new();
        for &(provider, limit) in plan {
            if !batches.is_empty() && !cancel.sleep(self.courtesy_delay) {
                break;
            }
            if cancel.is_cancelled() {
                break;
            }
            batches.push((
                provider.name(),
                provider.fetch_candidate_images(query, limit, cancel),
            ));
        }
        batches
    }

    fn accept_image(&self, provider: ProviderName, raw: RawImage) -> Option<Candidate> {
        let validated =
            validate_and_compress(&raw.bytes, raw.content_type.as_deref(), self.target_max_bytes);
        match validated {
            Ok(image) => {
                if !image.within_budget {
                    warn!(
                        "CoverArt[{provider}]: {} stays above the byte budget at {} bytes",
                        raw.url,
                        image.bytes.len()
                    );
                }
                Some(Candidate::from_validated(provider, &raw.url, image))
            }
            Err(rejection) => {
                debug!("CoverArt[{provider}]: dropped {}: {}", raw.url, rejection);
                None
            }
        }
    }
}
