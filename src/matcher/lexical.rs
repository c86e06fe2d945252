//! Case-insensitive pattern matching over the concatenated token text.

use crate::config::split_phrases;
use regex::{Regex, RegexBuilder};

pub struct PatternSet {
    patterns: Vec<(String, Regex)>,
}

impl PatternSet {
    /// Compile every phrase of a comma-separated dictionary. A phrase that is
    /// not a valid pattern is skipped with a warning.
    pub fn compile(words: &str) -> Self {
        let patterns = split_phrases(words)
            .filter_map(|phrase| {
                match RegexBuilder::new(phrase).case_insensitive(true).build() {
                    Ok(re) => Some((phrase.to_string(), re)),
                    Err(e) => {
                        log::warn!("Skipping dictionary entry {:?}: {}", phrase, e);
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Every non-overlapping match of every pattern as
    /// `(byte_start, byte_end, phrase)`.
    pub fn find_all<'a>(&'a self, text: &'a str) -> impl Iterator<Item = (usize, usize, &'a str)> + 'a {
        self.patterns.iter().flat_map(move |(phrase, re)| {
            re.find_iter(text)
                .filter(|m| !m.as_str().is_empty())
                .map(move |m| (m.start(), m.end(), phrase.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_ignore_case() {
        let set = PatternSet::compile("badword, darn");
        let hits: Vec<_> = set.find_all("ab BadWord cd DARN").collect();
        assert_eq!(hits, vec![(3, 10, "badword"), (14, 18, "darn")]);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let set = PatternSet::compile("good(, fine");
        assert_eq!(set.len(), 1);
        assert_eq!(set.find_all("so fine").count(), 1);
    }

    #[test]
    fn test_every_occurrence_is_reported() {
        let set = PatternSet::compile("x");
        let starts: Vec<usize> = set.find_all("x_x_x").map(|(s, _, _)| s).collect();
        assert_eq!(starts, vec![0, 2, 4]);
    }
}
