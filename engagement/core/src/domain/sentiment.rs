// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lexical sentiment classification for user responses.
//!
//! Counts curated positive and negative indicators; the majority wins and a
//! tie (including zero hits on both sides) is neutral.

use crate::domain::engagement::Sentiment;

const POSITIVE_INDICATORS: &[&str] = &[
    "thanks", "thank you", "thx", "appreciate", "love", "great", "awesome", "nice", "good",
    "happy", "glad", "amazing", "wonderful", "perfect", "sweet", "cool", "yes", "yay",
    "haha", "lol", "exactly", "helpful", "excited", "fun", ":)", "<3",
];

const NEGATIVE_INDICATORS: &[&str] = &[
    "stop", "leave me alone", "annoying", "annoyed", "hate", "bad", "sad", "angry", "upset",
    "busy", "not now", "go away", "ugh", "whatever", "terrible", "awful", "worse", "worst",
    "tired", "no", "don't", "dont", "bother", ":(",
];

/// Classify a response by comparing indicator counts.
pub fn classify(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?' | ';'))
        .filter(|t| !t.is_empty())
        .collect();

    let positive = count_indicators(&lowered, &tokens, POSITIVE_INDICATORS);
    let negative = count_indicators(&lowered, &tokens, NEGATIVE_INDICATORS);

    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

fn count_indicators(lowered: &str, tokens: &[&str], indicators: &[&str]) -> usize {
    indicators
        .iter()
        .map(|indicator| {
            if indicator.contains(' ') || !indicator.chars().all(char::is_alphanumeric) {
                // phrases and emoticons match as substrings
                lowered.matches(indicator).count()
            } else {
                tokens.iter().filter(|t| **t == *indicator).count()
            }
        })
        .sum()
}
