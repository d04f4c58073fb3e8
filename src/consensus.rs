//! Consensus voting over fetched candidates.
//!
//! Candidates are grouped greedily in arrival order: each ungrouped candidate
//! seeds a group and absorbs every later ungrouped candidate whose similarity
//! *to the seed* reaches the threshold. Members are never compared with each
//! other, so two members of one group may be dissimilar. The largest group
//! wins (earliest seed on ties) and its highest-resolution member is returned
//! (earliest arrival on ties).

use log::{debug, info};

use crate::candidate::Candidate;
use crate::fingerprint::similarity;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusSelector {
    threshold: f64,
}

impl Default for ConsensusSelector {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl ConsensusSelector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Groups of candidate indices, in seed order. Every index appears exactly once.
    pub fn cluster(&self, candidates: &[Candidate]) -> Vec<Vec<usize>> {
        let mut grouped = vec![false; candidates.len()];
        let mut groups = Vec::new();

        for seed in 0..candidates.len() {
            if grouped[seed] {
                continue;
            }
            grouped[seed] = true;
            let mut group = vec![seed];

            for other in (seed + 1)..candidates.len() {
                if grouped[other] {
                    continue;
                }
                let score = similarity(
                    candidates[seed].fingerprint(),
                    candidates[other].fingerprint(),
                );
                if score >= self.threshold {
                    debug!(
                        "Consensus: grouped candidate {} with seed {} (similarity {:.1}%)",
                        other,
                        seed,
                        score * 100.0
                    );
                    grouped[other] = true;
                    group.push(other);
                }
            }
            groups.push(group);
        }
        groups
    }

    /// Marks the consensus winner in place and returns its index.
    pub fn select(&self, candidates: &mut [Candidate]) -> Option<usize> {
        match candidates.len() {
            0 => return None,
            1 => {
                candidates[0].mark_selected(1.0);
                return Some(0);
            }
            _ => {}
        }

        let groups = self.cluster(candidates);
        let mut largest = groups.first()?;
        for group in &groups[1..] {
            if group.len() > largest.len() {
                largest = group;
            }
        }
        info!(
            "Consensus: {} candidates formed {} groups, largest has {}",
            candidates.len(),
            groups.len(),
            largest.len()
        );

        let mut winner = largest[0];
        for &member in &largest[1..] {
            if candidates[member].resolution().pixel_count()
                > candidates[winner].resolution().pixel_count()
            {
                winner = member;
            }
        }

        let total: f64 = largest
            .iter()
            .map(|&member| {
                similarity(
                    candidates[winner].fingerprint(),
                    candidates[member].fingerprint(),
                )
            })
            .sum();
        let score = total / largest.len() as f64;
        candidates[winner].mark_selected(score);

        let resolution = candidates[winner].resolution();
        info!(
            "Consensus: selected {} ({}x{}) with group similarity {:.1}%",
            candidates[winner].provider(),
            resolution.width,
            resolution.height,
            score * 100.0
        );
        Some(winner)
    }

    /// Consumes the candidate list and returns the winner, if any.
    pub fn select_best(&self, mut candidates: Vec<Candidate>) -> Option<Candidate> {
        let index = self.select(&mut candidates)?;
        Some(candidates.swap_remove(index))
    }
}
