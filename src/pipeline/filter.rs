//! Allow/block policy over sentence types.

use std::collections::HashSet;

use crate::config::{FilterConfig, FilterMode};
use crate::nmea::Sentence;

/// Immutable sentence-type filter.
///
/// Identifiers match either the full type (`GNGGA`) or the bare type
/// (`GGA`). An empty allow-list accepts everything so a blank
/// configuration cannot brick the output.
#[derive(Debug)]
pub struct SentenceFilter {
    mode: FilterMode,
    allowed: HashSet<String>,
    blocked: HashSet<String>,
}

impl SentenceFilter {
    pub fn new(config: &FilterConfig) -> Self {
        SentenceFilter {
            mode: config.mode,
            allowed: normalize(&config.allowed),
            blocked: normalize(&config.blocked),
        }
    }

    /// Pass-everything filter used when no filter is configured.
    pub fn allow_all() -> Self {
        SentenceFilter::new(&FilterConfig::default())
    }

    pub fn allowed(&self, sentence: &Sentence) -> bool {
        match self.mode {
            FilterMode::AllowAll => true,
            FilterMode::AllowList => {
                self.allowed.is_empty() || contains(&self.allowed, sentence)
            }
            FilterMode::BlockList => !contains(&self.blocked, sentence),
        }
    }
}

fn normalize(ids: &[String]) -> HashSet<String> {
    ids.iter().map(|id| id.trim().to_ascii_uppercase()).collect()
}

fn contains(set: &HashSet<String>, sentence: &Sentence) -> bool {
    set.contains(&sentence.full_type().to_ascii_uppercase())
        || set.contains(&sentence.sentence_type().to_ascii_uppercase())
}
