pub mod lexical;
pub mod phonetic;
pub mod resolver;

pub use lexical::PatternSet;
pub use phonetic::PhoneticPatternSet;
pub use resolver::{resolve, ProcessedMatchSet, ResolverPolicy};

use crate::asr::engine::RecognitionResult;
use crate::asr::time_map::TimeMapper;
use crate::types::PendingMatch;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOrigin {
    Lexical,
    Phonetic,
}

/// One raw hit of one recognition cycle, already mapped to host samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchCandidate {
    /// Byte offset of the hit in the concatenated token text.
    pub text_offset: usize,
    pub start_sample: u64,
    pub end_sample: u64,
    pub origin: MatchOrigin,
    pub label: String,
}

impl MatchCandidate {
    pub fn span(&self) -> PendingMatch {
        PendingMatch::new(self.start_sample, self.end_sample)
    }
}

/// A hit whose widened span lies entirely before the start of the host
/// clock. It can never be masked and is reported as dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnmappedHit {
    pub text_offset: usize,
    pub origin: MatchOrigin,
    pub label: String,
}

/// Everything one call to [`ProfanityMatcher::find`] turned up.
#[derive(Debug, Default)]
pub struct MatchScan {
    pub candidates: Vec<MatchCandidate>,
    pub unmapped: Vec<UnmappedHit>,
}

/// Lexical and phonetic views of the dictionary, rebuilt only when the
/// dictionary text changes.
pub struct ProfanityMatcher {
    words: String,
    lexical: PatternSet,
    phonetic: PhoneticPatternSet,
    use_phonetic: bool,
}

impl ProfanityMatcher {
    pub fn new(cache_limit: usize) -> Self {
        Self {
            words: String::new(),
            lexical: PatternSet::compile(""),
            phonetic: PhoneticPatternSet::compile("", cache_limit),
            use_phonetic: true,
        }
    }

    /// Returns true when the pattern sets were rebuilt.
    pub fn refresh(&mut self, words: &str, use_phonetic: bool, cache_limit: usize) -> bool {
        self.use_phonetic = use_phonetic;
        self.phonetic.set_cache_limit(cache_limit);
        if self.words == words {
            return false;
        }
        self.words = words.to_string();
        self.lexical = PatternSet::compile(words);
        self.phonetic = PhoneticPatternSet::compile(words, cache_limit);
        log::info!(
            "Dictionary updated: {} patterns, {} phonetic patterns",
            self.lexical.len(),
            self.phonetic.len()
        );
        true
    }

    pub fn is_empty(&self) -> bool {
        self.lexical.is_empty() && (!self.use_phonetic || self.phonetic.is_empty())
    }

    /// Every hit in `result` whose text offset has not been processed in
    /// this segment yet.
    pub fn find(
        &mut self,
        result: &RecognitionResult,
        processed: &ProcessedMatchSet,
        mapper: &TimeMapper,
    ) -> MatchScan {
        let n = result.len();
        let tokens = &result.tokens[..n];
        let mut starts = Vec::with_capacity(n);
        let mut text = String::new();
        for token in tokens {
            starts.push(text.len());
            text.push_str(token);
        }

        let mut out = MatchScan::default();
        let mut claimed = HashSet::new();

        for (m_start, m_end, label) in self.lexical.find_all(&text) {
            if processed.contains(m_start) {
                continue;
            }
            let mut window: Option<(f32, f32)> = None;
            for (i, token) in tokens.iter().enumerate() {
                let t_start = starts[i];
                let t_end = t_start + token.len();
                if t_end > m_start && t_start < m_end {
                    let (s, e) = result.token_time(i);
                    window = Some(match window {
                        Some((ws, we)) => (ws.min(s), we.max(e)),
                        None => (s, e),
                    });
                }
            }
            let Some((s, e)) = window else {
                continue;
            };
            claimed.insert(m_start);
            match mapper.span(s, e) {
                Some(span) => out.candidates.push(MatchCandidate {
                    text_offset: m_start,
                    start_sample: span.start_sample,
                    end_sample: span.end_sample,
                    origin: MatchOrigin::Lexical,
                    label: label.to_string(),
                }),
                None => out.unmapped.push(UnmappedHit {
                    text_offset: m_start,
                    origin: MatchOrigin::Lexical,
                    label: label.to_string(),
                }),
            }
        }

        if self.use_phonetic && !self.phonetic.is_empty() {
            for hit in self.phonetic.find(tokens) {
                let offset = starts[hit.first_token];
                if processed.contains(offset) || claimed.contains(&offset) {
                    continue;
                }
                let (s, _) = result.token_time(hit.first_token);
                let (_, e) = result.token_time(hit.last_token);
                claimed.insert(offset);
                match mapper.span(s, e) {
                    Some(span) => out.candidates.push(MatchCandidate {
                        text_offset: offset,
                        start_sample: span.start_sample,
                        end_sample: span.end_sample,
                        origin: MatchOrigin::Phonetic,
                        label: hit.label,
                    }),
                    None => out.unmapped.push(UnmappedHit {
                        text_offset: offset,
                        origin: MatchOrigin::Phonetic,
                        label: hit.label,
                    }),
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::time_map::TimeBase;

    fn mapper() -> TimeMapper {
        // 16 kHz host, no offset, no margin: samples = seconds * 16000.
        TimeMapper::new(&TimeBase::default(), 16_000, 0, 0.0)
    }

    fn result(tokens: &[&str], times: &[f32]) -> RecognitionResult {
        RecognitionResult::new(tokens.iter().map(|s| s.to_string()).collect(), times.to_vec())
    }

    #[test]
    fn test_lexical_hit_spans_overlapping_tokens() {
        let mut m = ProfanityMatcher::new(100);
        m.refresh("badword", false, 100);
        let r = result(&["ab", " ", "badword", " ", "cd"], &[0.0, 0.2, 0.2, 0.5, 0.9]);
        let found = m.find(&r, &ProcessedMatchSet::default(), &mapper()).candidates;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text_offset, 3);
        assert_eq!(found[0].origin, MatchOrigin::Lexical);
        assert_eq!(found[0].span(), PendingMatch::new(3200, 8000));
    }

    #[test]
    fn test_processed_offsets_are_skipped() {
        let mut m = ProfanityMatcher::new(100);
        m.refresh("badword", false, 100);
        let r = result(&["badword"], &[0.0]);
        let mut processed = ProcessedMatchSet::default();
        processed.insert(0);
        let scan = m.find(&r, &processed, &mapper());
        assert!(scan.candidates.is_empty());
        assert!(scan.unmapped.is_empty());
    }

    #[test]
    fn test_phonetic_hit_uses_token_span() {
        let mut m = ProfanityMatcher::new(100);
        m.refresh("吃饭", true, 100);
        let r = result(&["我", "次", "饭"], &[0.0, 0.5, 1.0]);
        let found = m.find(&r, &ProcessedMatchSet::default(), &mapper()).candidates;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].origin, MatchOrigin::Phonetic);
        assert_eq!(found[0].text_offset, "我".len());
        let span = found[0].span();
        assert_eq!(span.start_sample, 8000);
        // Last token: 1.0 s + 0.2 s.
        assert_eq!(span.end_sample, 19_200);
    }

    #[test]
    fn test_phonetic_skips_offset_claimed_by_lexical() {
        let mut m = ProfanityMatcher::new(100);
        m.refresh("吃饭", true, 100);
        let r = result(&["吃", "饭"], &[0.0, 0.3]);
        let found = m.find(&r, &ProcessedMatchSet::default(), &mapper()).candidates;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].origin, MatchOrigin::Lexical);
    }

    #[test]
    fn test_hit_before_stream_start_is_reported_unmapped() {
        let mut m = ProfanityMatcher::new(100);
        m.refresh("badword", false, 100);
        let r = result(&["badword", " ", "ok"], &[0.0, 0.1, 0.3]);
        // -1 s of latency pushes [0.0, 0.1) plus margin entirely below zero.
        let early = TimeMapper::new(&TimeBase::default(), 16_000, -1000, 0.15);
        let scan = m.find(&r, &ProcessedMatchSet::default(), &early);
        assert!(scan.candidates.is_empty());
        assert_eq!(
            scan.unmapped,
            vec![UnmappedHit {
                text_offset: 0,
                origin: MatchOrigin::Lexical,
                label: "badword".to_string(),
            }]
        );
    }

    #[test]
    fn test_refresh_compares_by_value() {
        let mut m = ProfanityMatcher::new(100);
        assert!(m.refresh("a, b", true, 100));
        assert!(!m.refresh(&String::from("a, b"), true, 100));
        assert!(m.refresh("a, c", true, 100));
    }
}
