//! Parsing of free-form model replies into votes

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::VoterError;
use crate::types::{Outcome, Vote};

static OUTCOME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)outcome["']?\s*[:=]\s*["']?(yes|no|invalid)\b"#).expect("valid outcome regex")
});

static CONFIDENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)confidence["']?\s*[:=]\s*["']?(\d+(?:\.\d+)?)"#)
        .expect("valid confidence regex")
});

#[derive(Debug, Deserialize)]
struct RawVerdict {
    outcome: String,
    confidence: serde_json::Value,
}

/// Parse a model reply into a vote attributed to `source_id`
///
/// Accepts a JSON object (optionally fenced or surrounded by prose) and falls
/// back to `OUTCOME: YES` / `CONFIDENCE: 85` style lines.
pub fn parse_vote_response(source_id: &str, text: &str) -> Result<Vote, VoterError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(VoterError::AdapterMalformedResponse(
            "empty response".to_string(),
        ));
    }

    if let Some(raw) = extract_json_object(text) {
        if let Ok(verdict) = serde_json::from_str::<RawVerdict>(raw) {
            let outcome = verdict
                .outcome
                .parse::<Outcome>()
                .map_err(VoterError::AdapterMalformedResponse)?;
            let confidence = match &verdict.confidence {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
                _ => None,
            }
            .ok_or_else(|| {
                VoterError::AdapterMalformedResponse(format!(
                    "confidence is not numeric: {}",
                    verdict.confidence
                ))
            })?;
            return Ok(Vote::new(source_id, outcome, normalize_confidence(confidence)?));
        }
    }

    let outcome = OUTCOME_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<Outcome>().ok())
        .ok_or_else(|| VoterError::AdapterMalformedResponse("no outcome found".to_string()))?;

    let confidence = CONFIDENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .ok_or_else(|| VoterError::AdapterMalformedResponse("no confidence found".to_string()))?;

    Ok(Vote::new(source_id, outcome, normalize_confidence(confidence)?))
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Values at or below 1.0 are read as fractions
fn normalize_confidence(value: f64) -> Result<u8, VoterError> {
    if !value.is_finite() || value < 0.0 || value > 100.0 {
        return Err(VoterError::AdapterMalformedResponse(format!(
            "confidence out of range: {}",
            value
        )));
    }
    let pct = if value <= 1.0 { value * 100.0 } else { value };
    Ok(pct.round() as u8)
}
