// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Explicit request detection
//!
//! Recognises a user asking for a future message ("remind me", "message me
//! in 10 minutes"). A detected request forces engagement regardless of the
//! psychological signal.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::decision::Timing;

static REQUEST_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(send me a (?:message|text|note)|message me|text me|remind me|check in (?:with|on) me|ping me|get back to me)\b",
    )
    .expect("request phrase pattern is valid")
});

static REQUESTED_DELAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bin\s+(\d+|an?|one|two|three|five|ten|fifteen|twenty|thirty|a few|a couple(?: of)?)\s*(seconds?|secs?|minutes?|mins?|hours?|hrs?)\b",
    )
    .expect("requested delay pattern is valid")
});

/// A user's explicit ask for a proactive message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitRequest {
    /// The matched phrase, kept for reasoning and audit.
    pub phrase: String,
    pub requested_delay_seconds: Option<u64>,
}

impl ExplicitRequest {
    /// Scan a user message for an explicit request.
    pub fn detect(message: &str) -> Option<Self> {
        let delay = REQUESTED_DELAY.captures(message).and_then(|caps| {
            let amount = parse_amount(caps.get(1)?.as_str())?;
            let unit = unit_seconds(caps.get(2)?.as_str())?;
            Some((caps.get(0)?.as_str().to_string(), amount.saturating_mul(unit)))
        });
        let phrase = REQUEST_PHRASE
            .find(message)
            .map(|m| m.as_str().to_string());

        match (phrase, delay) {
            (Some(phrase), Some((_, seconds))) => Some(Self {
                phrase,
                requested_delay_seconds: Some(seconds),
            }),
            (Some(phrase), None) => Some(Self {
                phrase,
                requested_delay_seconds: None,
            }),
            (None, Some((matched, seconds))) => Some(Self {
                phrase: matched,
                requested_delay_seconds: Some(seconds),
            }),
            (None, None) => None,
        }
    }

    /// Timing that honours the request. Requests without a duration default
    /// to a five minute wait.
    pub fn timing(&self) -> Timing {
        match self.requested_delay_seconds {
            Some(seconds) => Timing::covering(seconds),
            None => Timing::Wait5m,
        }
    }
}

fn parse_amount(raw: &str) -> Option<u64> {
    let lowered = raw.trim().to_lowercase();
    if let Ok(n) = lowered.parse::<u64>() {
        return Some(n);
    }
    let n = match lowered.as_str() {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" | "a few" => 3,
        "five" => 5,
        "ten" => 10,
        "fifteen" => 15,
        "twenty" => 20,
        "thirty" => 30,
        s if s.starts_with("a couple") => 2,
        _ => return None,
    };
    Some(n)
}

fn unit_seconds(raw: &str) -> Option<u64> {
    let lowered = raw.to_lowercase();
    if lowered.starts_with("sec") {
        Some(1)
    } else if lowered.starts_with("min") {
        Some(60)
    } else if lowered.starts_with("h") {
        Some(3600)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_duration_request() {
        let request = ExplicitRequest::detect("Can you message me in 10 minutes?").unwrap();
        assert_eq!(request.phrase, "message me");
        assert_eq!(request.requested_delay_seconds, Some(600));
        assert_eq!(request.timing(), Timing::WaitLater);
    }

    #[test]
    fn test_detects_phrase_without_duration() {
        let request = ExplicitRequest::detect("Please REMIND ME to drink water").unwrap();
        assert_eq!(request.requested_delay_seconds, None);
        assert_eq!(request.timing(), Timing::Wait5m);
    }

    #[test]
    fn test_detects_bare_duration() {
        let request = ExplicitRequest::detect("talk again in 30 seconds").unwrap();
        assert_eq!(request.requested_delay_seconds, Some(30));
        assert_eq!(request.timing(), Timing::Wait30s);
    }

    #[test]
    fn test_word_amounts() {
        let request = ExplicitRequest::detect("text me in a couple of minutes").unwrap();
        assert_eq!(request.requested_delay_seconds, Some(120));
        let request = ExplicitRequest::detect("ping me in an hour").unwrap();
        assert_eq!(request.requested_delay_seconds, Some(3600));
        assert_eq!(request.timing(), Timing::WaitLater);
    }

    #[test]
    fn test_ordinary_messages_are_not_requests() {
        assert!(ExplicitRequest::detect("I had a long day at work").is_none());
        assert!(ExplicitRequest::detect("the message was confusing").is_none());
        assert!(ExplicitRequest::detect("").is_none());
    }
}
