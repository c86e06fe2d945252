//! Phonetic matching on normalized toneless syllables.
//!
//! Han characters become toneless pinyin, runs of ASCII letters and digits
//! become one lower-cased syllable, everything else is ignored. Each syllable
//! is normalized so near-identical sounds compare equal: retroflex initials
//! fold into their dental counterparts (`zh/ch/sh` to `z/c/s`) and a trailing
//! `ng` folds into `n`.

use crate::config::split_phrases;
use pinyin::ToPinyin;
use std::collections::HashMap;

/// Traces logged at debug level before going quiet.
const TRACE_LIMIT: usize = 3;

pub fn normalize_syllable(syllable: &str) -> String {
    let mut s = syllable;
    let mut out = String::with_capacity(s.len());
    for retroflex in ["zh", "ch", "sh"] {
        if let Some(rest) = s.strip_prefix(retroflex) {
            out.push_str(&retroflex[..1]);
            s = rest;
            break;
        }
    }
    out.push_str(s);
    if out.ends_with("ng") {
        out.pop();
    }
    out
}

/// Transcribe free text into normalized syllables.
pub fn transcribe(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut run = String::new();
    for ch in text.chars() {
        if let Some(py) = ch.to_pinyin() {
            flush_run(&mut run, &mut out);
            out.push(normalize_syllable(py.plain()));
        } else if ch.is_ascii_alphanumeric() {
            run.push(ch.to_ascii_lowercase());
        } else {
            flush_run(&mut run, &mut out);
        }
    }
    flush_run(&mut run, &mut out);
    out
}

fn flush_run(run: &mut String, out: &mut Vec<String>) {
    if !run.is_empty() {
        out.push(normalize_syllable(run));
        run.clear();
    }
}

/// A phonetic hit in token coordinates, inclusive on both ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhoneticHit {
    pub first_token: usize,
    pub last_token: usize,
    pub label: String,
}

pub struct PhoneticPatternSet {
    patterns: Vec<(String, Vec<String>)>,
    cache: HashMap<String, Vec<String>>,
    cache_limit: usize,
    traces: usize,
}

impl PhoneticPatternSet {
    pub fn compile(words: &str, cache_limit: usize) -> Self {
        let patterns = split_phrases(words)
            .filter_map(|phrase| {
                let syllables = transcribe(phrase);
                (!syllables.is_empty()).then(|| (phrase.to_string(), syllables))
            })
            .collect();
        Self {
            patterns,
            cache: HashMap::new(),
            cache_limit,
            traces: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn set_cache_limit(&mut self, limit: usize) {
        self.cache_limit = limit;
    }

    fn token_syllables(&mut self, token: &str) -> Vec<String> {
        if let Some(hit) = self.cache.get(token) {
            return hit.clone();
        }
        let syllables = transcribe(token);
        if self.cache.len() > self.cache_limit {
            self.cache.clear();
        }
        self.cache.insert(token.to_string(), syllables.clone());
        syllables
    }

    /// Exact syllable-sequence matches of every pattern at every offset.
    pub fn find(&mut self, tokens: &[String]) -> Vec<PhoneticHit> {
        let mut stream: Vec<String> = Vec::new();
        let mut owner: Vec<usize> = Vec::new();
        for (t, token) in tokens.iter().enumerate() {
            for syllable in self.token_syllables(token) {
                stream.push(syllable);
                owner.push(t);
            }
        }

        if self.traces < TRACE_LIMIT && !stream.is_empty() {
            self.traces += 1;
            log::debug!("Phonetic trace: {}", stream.join(" "));
        }

        let mut hits = Vec::new();
        for (label, pattern) in &self.patterns {
            if pattern.len() > stream.len() {
                continue;
            }
            for i in 0..=stream.len() - pattern.len() {
                if stream[i..i + pattern.len()] == pattern[..] {
                    hits.push(PhoneticHit {
                        first_token: owner[i],
                        last_token: owner[i + pattern.len() - 1],
                        label: label.clone(),
                    });
                }
            }
        }
        hits
    }
}
