//! Overlap resolution for one recognition cycle.

use crate::matcher::MatchCandidate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverPolicy {
    /// Longest spans win; nested phrases disappear inside them.
    #[default]
    WidestCoverage,
    /// Shortest spans win, so the least surrounding speech is masked.
    ShortestFirst,
}

/// Text offsets already turned into pending matches in the current segment.
#[derive(Debug, Default)]
pub struct ProcessedMatchSet {
    offsets: HashSet<usize>,
}

impl ProcessedMatchSet {
    pub fn contains(&self, offset: usize) -> bool {
        self.offsets.contains(&offset)
    }

    pub fn insert(&mut self, offset: usize) {
        self.offsets.insert(offset);
    }

    pub fn clear(&mut self) {
        self.offsets.clear();
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Pick a non-overlapping subset of `candidates`. Every candidate's text
/// offset is marked processed, accepted or not.
pub fn resolve(
    mut candidates: Vec<MatchCandidate>,
    policy: ResolverPolicy,
    processed: &mut ProcessedMatchSet,
) -> Vec<MatchCandidate> {
    match policy {
        ResolverPolicy::WidestCoverage => {
            candidates.sort_by(|a, b| b.span().len().cmp(&a.span().len()))
        }
        ResolverPolicy::ShortestFirst => {
            candidates.sort_by(|a, b| a.span().len().cmp(&b.span().len()))
        }
    }

    let mut accepted: Vec<MatchCandidate> = Vec::new();
    for candidate in candidates {
        processed.insert(candidate.text_offset);
        let span = candidate.span();
        if accepted.iter().all(|a| !a.span().overlaps(&span)) {
            accepted.push(candidate);
        }
    }
    accepted.sort_by_key(|c| c.start_sample);
    accepted
}
