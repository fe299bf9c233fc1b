// crates/xgate-explanation/src/quality.rs
// ============================================================================
// Module: Quality Scoring
// Description: Heuristic `[0, 1]` quality score and content hash for a
//              rendered explanation (spec §4.13a).
// Dependencies: xgate-core::hashing, serde_json
// ============================================================================

//! ## Overview
//! A rendered explanation is scored by counting signal phrases present in
//! TEXT output, or by counting populated sections in JSON/STRUCTURED output.
//! Either way the same input MUST score (and hash) the same way every time
//! (spec §8 invariant 8), so scoring never reads wall-clock time or anything
//! else non-deterministic.

use serde_json::Value;
use xgate_core::hashing::hash_value;
use xgate_core::hashing::CanonicalizeError;
use xgate_core::hashing::ContentHash;

const EVIDENCE_KEYWORDS: &[&str] = &["evidence", "similar", "rag", "tool", "policy", "rule", "guardrail"];
const FILLER_PHRASES: &[&str] =
    &["i don't know", "i'm not sure", "unable to determine", "cannot explain", "no information available"];
const REASONING_CONNECTORS: &[&str] = &["because", "reason", "based on", "due to", "therefore", "conclusion"];

/// Scores a TEXT-format explanation by length band, evidence-keyword
/// density, filler-phrase penalty, and reasoning-connector density.
#[must_use]
pub fn score_text(text: &str) -> f64 {
    let lowered = text.to_lowercase();
    let length = text.len();
    let mut score = 0.0;

    score += if (200..=2000).contains(&length) {
        0.3
    } else if (100..200).contains(&length) {
        0.2
    } else if length > 2000 && length <= 5000 {
        0.25
    } else {
        0.1
    };

    let evidence_hits = EVIDENCE_KEYWORDS.iter().filter(|keyword| lowered.contains(*keyword)).count();
    score += if evidence_hits >= 3 {
        0.3
    } else if evidence_hits >= 2 {
        0.2
    } else if evidence_hits >= 1 {
        0.1
    } else {
        0.0
    };

    let has_filler = FILLER_PHRASES.iter().any(|phrase| lowered.contains(phrase));
    score += if has_filler { -0.2 } else { 0.2 };

    let connector_hits = REASONING_CONNECTORS.iter().filter(|connector| lowered.contains(*connector)).count();
    score += if connector_hits >= 2 {
        0.2
    } else if connector_hits >= 1 {
        0.1
    } else {
        0.0
    };

    clamp_unit(score)
}

/// Scores a JSON- or STRUCTURED-format explanation by counting populated
/// timeline events, evidence items, agent decisions, evidence links, and
/// (for STRUCTURED output) grouped-evidence sections.
#[must_use]
pub fn score_structured(explanation: &Value) -> f64 {
    let mut score = 0.0;

    let event_count = explanation
        .pointer("/timeline/events")
        .and_then(Value::as_array)
        .map(Vec::len)
        .or_else(|| explanation.pointer("/timeline/events_count").and_then(Value::as_u64).map(|n| n as usize))
        .unwrap_or(0);
    score += band(event_count, &[(3, 0.3), (2, 0.2), (1, 0.1)]);

    let evidence_count = explanation
        .get("evidence_items")
        .and_then(Value::as_array)
        .map(Vec::len)
        .or_else(|| explanation.pointer("/evidence/total_items").and_then(Value::as_u64).map(|n| n as usize))
        .unwrap_or(0);
    score += band(evidence_count, &[(3, 0.3), (2, 0.2), (1, 0.1)]);

    let decision_count =
        explanation.get("agent_decisions").and_then(Value::as_object).map(|map| map.len()).unwrap_or(0);
    score += band(decision_count, &[(3, 0.2), (2, 0.15), (1, 0.1)]);

    let has_links = explanation
        .get("evidence_links")
        .and_then(Value::as_array)
        .is_some_and(|array| !array.is_empty());
    if has_links {
        score += 0.2;
    }

    if explanation.pointer("/evidence/by_type").is_some() {
        score += 0.1;
    }
    if explanation.pointer("/evidence/links_by_agent").is_some() {
        score += 0.1;
    }

    clamp_unit(score)
}

fn band(count: usize, thresholds: &[(usize, f64)]) -> f64 {
    thresholds.iter().find(|(min, _)| count >= *min).map_or(0.0, |(_, bonus)| *bonus)
}

fn clamp_unit(score: f64) -> f64 {
    score.max(0.0).min(1.0)
}

/// Content hash of a rendered explanation, reusing the workspace's canonical
/// JSON + SHA-256 primitive so the same explanation always hashes the same.
///
/// # Errors
///
/// Returns [`CanonicalizeError`] when `explanation` cannot be canonicalized.
pub fn explanation_hash(explanation: &Value) -> Result<ContentHash, CanonicalizeError> {
    hash_value(explanation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_well_formed_text_highly() {
        let text = "Because the policy guardrail flagged this exception, the reason is \
            low evidence confidence. Based on the rag similarity search, no tool retry was \
            attempted. Therefore the conclusion is an escalation to a human approver."
            .repeat(2);
        let score = score_text(&text);
        assert!(score > 0.7, "expected high score, got {score}");
    }

    #[test]
    fn penalizes_filler_phrases() {
        let text = "I don't know what happened here, unable to determine the cause.".repeat(3);
        let with_filler = score_text(&text);
        let without_filler = score_text(&text.replace("I don't know", "the evidence shows"));
        assert!(with_filler < without_filler);
    }

    #[test]
    fn scores_structured_sections() {
        let explanation = serde_json::json!({
            "timeline": {"events": [1, 2, 3]},
            "evidence_items": [1, 2],
            "agent_decisions": {"intake": {}, "triage": {}, "policy": {}},
            "evidence_links": [1],
            "evidence": {"by_type": {}, "links_by_agent": {}},
        });
        let score = score_structured(&explanation);
        assert!((0.0..=1.0).contains(&score));
        assert!(score > 0.9, "expected near-maximum score, got {score}");
    }

    #[test]
    fn score_never_exceeds_unit_interval() {
        let explanation = serde_json::json!({
            "timeline": {"events": (0..20).collect::<Vec<_>>()},
            "evidence_items": (0..20).collect::<Vec<_>>(),
            "agent_decisions": {"a": {}, "b": {}, "c": {}, "d": {}},
            "evidence_links": [1, 2, 3],
            "evidence": {"by_type": {}, "links_by_agent": {}},
        });
        assert_eq!(score_structured(&explanation), 1.0);
    }

    #[test]
    fn hash_is_deterministic_regardless_of_key_order() {
        let a = serde_json::json!({"exception_id": "EX-1", "timeline": {"events": []}});
        let b = serde_json::json!({"timeline": {"events": []}, "exception_id": "EX-1"});
        assert_eq!(explanation_hash(&a).expect("hash a"), explanation_hash(&b).expect("hash b"));
    }
}
