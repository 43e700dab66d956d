// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pattern extractors
//!
//! Pure functions that mine scored engagement records into learned patterns.
//! The learning service decides *when* to run them and persists the result;
//! the only oracle-backed step (content) is split into prompt building and
//! answer interpretation so both halves stay testable.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::domain::decision::clamp_unit;
use crate::domain::engagement::EngagementRecord;
use crate::domain::pattern::{LearnedPattern, PatternType};

/// Cap on timing-pattern confidence
pub const TIMING_CONFIDENCE_CAP: f64 = 0.9;
/// Cap on context-pattern confidence
pub const CONTEXT_CONFIDENCE_CAP: f64 = 0.8;
/// Oracle-reported confidence a content pattern must exceed to be kept
pub const CONTENT_MIN_CONFIDENCE: f64 = 0.6;
/// Structured snapshots the context extractor needs among successful records
pub const MIN_CONTEXT_SNAPSHOTS: usize = 2;
/// Half-width of the stored energy window
pub const ENERGY_WINDOW: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionThresholds {
    pub success_threshold: f64,
    pub failure_threshold: f64,
    pub min_successful_samples: usize,
}

impl Default for ExtractionThresholds {
    fn default() -> Self {
        Self {
            success_threshold: 0.7,
            failure_threshold: 0.4,
            min_successful_samples: 3,
        }
    }
}

/// Records split by outcome. Scores between the two thresholds are neither.
#[derive(Debug)]
pub struct Partition<'a> {
    pub total: usize,
    pub successful: Vec<&'a EngagementRecord>,
    pub unsuccessful: Vec<&'a EngagementRecord>,
}

impl<'a> Partition<'a> {
    pub fn new(records: &'a [EngagementRecord], thresholds: &ExtractionThresholds) -> Self {
        let mut successful = Vec::new();
        let mut unsuccessful = Vec::new();
        for record in records {
            match record.success_score {
                Some(score) if score >= thresholds.success_threshold => successful.push(record),
                Some(score) if score < thresholds.failure_threshold => unsuccessful.push(record),
                _ => {}
            }
        }
        Self {
            total: records.len(),
            successful,
            unsuccessful,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful.len() as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DelayBucket {
    Immediate,
    Short,
    Medium,
    Long,
}

impl DelayBucket {
    pub const ALL: [DelayBucket; 4] = [
        DelayBucket::Immediate,
        DelayBucket::Short,
        DelayBucket::Medium,
        DelayBucket::Long,
    ];

    pub fn classify(delay_seconds: u64) -> Self {
        match delay_seconds {
            0 => DelayBucket::Immediate,
            1..=60 => DelayBucket::Short,
            61..=300 => DelayBucket::Medium,
            _ => DelayBucket::Long,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DelayBucket::Immediate => "immediate",
            DelayBucket::Short => "short",
            DelayBucket::Medium => "medium",
            DelayBucket::Long => "long",
        }
    }
}

pub fn timing_confidence(successful: usize) -> f64 {
    (successful as f64 / 10.0).min(TIMING_CONFIDENCE_CAP)
}

pub fn context_confidence(samples: usize) -> f64 {
    (samples as f64 / 8.0).min(CONTEXT_CONFIDENCE_CAP)
}

/// Modal delay bucket among successful records. Ties go to the shorter bucket.
pub fn extract_timing(
    personality_id: &str,
    partition: &Partition<'_>,
    thresholds: &ExtractionThresholds,
) -> Option<LearnedPattern> {
    let successful = &partition.successful;
    if successful.len() < thresholds.min_successful_samples {
        return None;
    }

    let delays: Vec<u64> = successful.iter().map(|r| r.scheduled_delay_seconds).collect();
    let average_delay = delays.iter().sum::<u64>() as f64 / delays.len() as f64;

    let mut counts: HashMap<DelayBucket, Vec<u64>> = HashMap::new();
    for delay in &delays {
        counts.entry(DelayBucket::classify(*delay)).or_default().push(*delay);
    }
    let (bucket, bucket_delays) = DelayBucket::ALL
        .iter()
        .filter_map(|b| counts.get(b).map(|d| (*b, d)))
        .fold(None::<(DelayBucket, &Vec<u64>)>, |best, (b, d)| match best {
            Some((_, best_d)) if best_d.len() >= d.len() => best,
            _ => Some((b, d)),
        })?;
    let optimal_delay = bucket_delays.iter().sum::<u64>() as f64 / bucket_delays.len() as f64;

    let mut distribution = Map::new();
    for b in DelayBucket::ALL {
        distribution.insert(
            b.as_str().to_string(),
            json!(counts.get(&b).map(Vec::len).unwrap_or(0)),
        );
    }

    let mut context = Map::new();
    context.insert("delayBucket".into(), json!(bucket.as_str()));

    let mut data = Map::new();
    data.insert("optimalDelaySeconds".into(), json!(optimal_delay.round() as u64));
    data.insert("averageSuccessfulDelaySeconds".into(), json!(average_delay));
    data.insert("bucket".into(), json!(bucket.as_str()));
    data.insert("bucketDistribution".into(), Value::Object(distribution));
    data.insert("successRate".into(), json!(partition.success_rate()));
    data.insert("unsuccessfulCount".into(), json!(partition.unsuccessful.len()));

    Some(LearnedPattern::new(
        personality_id,
        PatternType::Timing,
        context,
        data,
        timing_confidence(successful.len()),
        successful.len() as u32,
    ))
}

/// Emotions, motivations and energy that co-occur with success.
pub fn extract_context(
    personality_id: &str,
    partition: &Partition<'_>,
    thresholds: &ExtractionThresholds,
) -> Option<LearnedPattern> {
    if partition.successful.len() < thresholds.min_successful_samples {
        return None;
    }

    let snapshots: Vec<_> = partition
        .successful
        .iter()
        .filter_map(|r| r.psychological_snapshot.as_ref())
        .filter(|s| s.is_structured())
        .collect();
    if snapshots.len() < MIN_CONTEXT_SNAPSHOTS {
        return None;
    }

    let mut emotions: HashMap<String, usize> = HashMap::new();
    let mut motivations: HashMap<String, usize> = HashMap::new();
    let mut energies = Vec::new();
    for snapshot in &snapshots {
        if let Some(emotion) = snapshot.emotion.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            *emotions.entry(emotion.to_lowercase()).or_default() += 1;
        }
        for motivation in &snapshot.motivations {
            let tag = motivation.trim().to_lowercase();
            if !tag.is_empty() {
                *motivations.entry(tag).or_default() += 1;
            }
        }
        if let Some(energy) = snapshot.energy_level {
            energies.push(energy);
        }
    }

    let top_emotion = ranked(emotions).into_iter().next();
    let top_motivations: Vec<String> = ranked(motivations).into_iter().take(3).collect();

    let mut data = Map::new();
    data.insert("topEmotion".into(), json!(top_emotion));
    data.insert("topMotivations".into(), json!(top_motivations));
    if !energies.is_empty() {
        let average = energies.iter().sum::<f64>() / energies.len() as f64;
        data.insert("averageEnergy".into(), json!(average));
        data.insert(
            "energyRange".into(),
            json!([average - ENERGY_WINDOW, average + ENERGY_WINDOW]),
        );
    }

    let mut context = Map::new();
    if let Some(emotion) = &top_emotion {
        context.insert("emotion".into(), json!(emotion));
    }

    Some(LearnedPattern::new(
        personality_id,
        PatternType::Context,
        context,
        data,
        context_confidence(snapshots.len()),
        snapshots.len() as u32,
    ))
}

/// Labels by count descending, then alphabetically.
fn ranked(counts: HashMap<String, usize>) -> Vec<String> {
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.into_iter().map(|(label, _)| label).collect()
}

/// Oracle prompt asking what successful messages have in common.
pub fn content_prompt(partition: &Partition<'_>) -> String {
    let mut prompt = String::from(
        "These proactive messages from the same persona all got a good response. \
         Summarize what they have in common: tone, content type, the overall pattern and key phrases. \
         Report how confident you are that the commonality is real.\n\n",
    );
    for (i, record) in partition.successful.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, record.proactive_content));
    }
    prompt
}

pub fn content_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tone": { "type": "string" },
            "contentType": { "type": "string" },
            "pattern": { "type": "string" },
            "keyPhrases": { "type": "array", "items": { "type": "string" } },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": ["tone", "contentType", "pattern", "keyPhrases", "confidence"]
    })
}

/// Turn the oracle's content summary into a pattern, if it is confident enough.
pub fn content_pattern_from_value(
    personality_id: &str,
    value: &Value,
    sample_size: usize,
) -> Option<LearnedPattern> {
    let object = value.as_object()?;
    let confidence = object
        .get("confidence")
        .and_then(|c| c.as_f64().or_else(|| c.as_str().and_then(|s| s.trim().parse().ok())))
        .map(clamp_unit)?;
    if confidence <= CONTENT_MIN_CONFIDENCE {
        return None;
    }

    let text = |key: &str| object.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let key_phrases: Vec<String> = object
        .get("keyPhrases")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let mut context = Map::new();
    context.insert("tone".into(), json!(text("tone")));

    let mut data = Map::new();
    data.insert("tone".into(), json!(text("tone")));
    data.insert("contentType".into(), json!(text("contentType")));
    data.insert("pattern".into(), json!(text("pattern")));
    data.insert("keyPhrases".into(), json!(key_phrases));

    Some(LearnedPattern::new(
        personality_id,
        PatternType::Content,
        context,
        data,
        confidence,
        sample_size as u32,
    ))
}
