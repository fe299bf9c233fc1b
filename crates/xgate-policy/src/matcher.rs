// crates/xgate-policy/src/matcher.rs
// ============================================================================
// Module: Playbook Matcher
// Description: Filter-then-sort playbook selection over a tenant's
//              candidate playbooks (spec §4.9), plus cursor-paginated
//              candidate listing (SPEC_FULL §11).
// Purpose: Give the Policy Agent one deterministic "best match" function
//          instead of re-implementing condition filtering per caller.
// Dependencies: xgate-core, base64, crate::error
// ============================================================================

//! ## Overview
//! Candidates are filtered by every predicate set on their
//! [`xgate_core::PlaybookConditions`], then sorted by `priority` descending,
//! `created_at` descending as the tiebreak; the first surviving candidate
//! wins (spec §4.9). [`list_playbooks`] offers the same candidate set
//! through an opaque cursor rather than offset/limit, mirroring
//! `decision-gate-core::interfaces::DataShapeRegistry::list`'s cursor
//! pagination — stable across concurrent writes, unlike offset/limit
//! (SPEC_FULL §11).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use xgate_core::PlaybookDef;
use xgate_core::PlaybookId;
use xgate_core::PlaybookStepDef;
use xgate_core::Severity;
use xgate_core::Timestamp;

use crate::error::PolicyError;

/// Inputs the matcher evaluates a candidate playbook's conditions against
/// (spec §4.9).
#[derive(Debug, Clone)]
pub struct MatchInput {
    /// The tenant's configured domain, for `conditions.domain` matching.
    pub domain: Option<String>,
    /// The exception's classified type.
    pub exception_type: String,
    /// The exception's effective severity.
    pub severity: Severity,
    /// Minutes remaining until SLA breach, when known.
    pub sla_minutes_remaining: Option<f64>,
    /// Policy tags carried by the caller (e.g. from the tenant pack).
    pub policy_tags: Vec<String>,
}

/// A selected playbook plus a human-readable reason it was chosen.
#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    /// The winning candidate.
    pub playbook: &'a PlaybookDef,
    /// Why this candidate was selected over the others.
    pub reasoning: String,
}

fn passes(playbook: &PlaybookDef, input: &MatchInput) -> bool {
    if !playbook.exception_type.eq_ignore_ascii_case(&input.exception_type) {
        return false;
    }
    let conditions = &playbook.conditions;
    if let Some(domain) = &conditions.domain
        && !input.domain.as_deref().is_some_and(|candidate| candidate.eq_ignore_ascii_case(domain))
    {
        return false;
    }
    if let Some(fragment) = &conditions.exception_type
        && !playbook.exception_type.to_ascii_lowercase().contains(&fragment.to_ascii_lowercase())
    {
        return false;
    }
    if let Some(severity) = conditions.severity
        && severity != input.severity
    {
        return false;
    }
    if !conditions.severity_in.is_empty() && !conditions.severity_in.contains(&input.severity) {
        return false;
    }
    if let Some(threshold) = conditions.sla_minutes_remaining_lt {
        match input.sla_minutes_remaining {
            Some(remaining) if remaining < threshold => {}
            _ => return false,
        }
    }
    if !conditions.policy_tags.is_empty() {
        let has_all = conditions.policy_tags.iter().all(|tag| input.policy_tags.iter().any(|given| given == tag));
        if !has_all {
            return false;
        }
    }
    true
}

/// Selects the best-matching playbook from `candidates` for `input` (spec
/// §4.9): filters by every set condition, then sorts by `priority`
/// descending and `created_at` descending, returning the first survivor.
#[must_use]
pub fn match_playbook<'a>(candidates: &'a [PlaybookDef], input: &MatchInput) -> Option<MatchResult<'a>> {
    let mut survivors: Vec<&PlaybookDef> = candidates.iter().filter(|playbook| passes(playbook, input)).collect();
    survivors.sort_by(|a, b| {
        b.conditions.priority.cmp(&a.conditions.priority).then_with(|| b.created_at.cmp(&a.created_at))
    });
    survivors.into_iter().next().map(|playbook| MatchResult {
        playbook,
        reasoning: format!(
            "matched playbook {} for exception_type={} severity={} (priority={})",
            playbook.playbook_id,
            input.exception_type,
            input.severity.as_str(),
            playbook.conditions.priority
        ),
    })
}

/// Returns `playbook`'s steps ordered ascending by `step_order` (spec
/// §4.9). Callers that need to validate contiguity (spec invariant 6) can
/// check the returned slice's `step_order` values directly.
#[must_use]
pub fn ordered_steps(playbook: &PlaybookDef) -> Vec<&PlaybookStepDef> {
    let mut steps: Vec<&PlaybookStepDef> = playbook.steps.iter().collect();
    steps.sort_by_key(|step| step.step_order);
    steps
}

/// One page of [`list_playbooks`] results.
#[derive(Debug, Clone)]
pub struct PlaybookPage<'a> {
    /// The playbooks on this page, in `(created_at, playbook_id)` ascending
    /// order.
    pub items: Vec<&'a PlaybookDef>,
    /// An opaque cursor identifying the next page, or `None` at the end.
    pub next_cursor: Option<String>,
}

fn cursor_key(playbook: &PlaybookDef) -> String {
    format!("{}|{}", playbook.created_at.to_rfc3339(), playbook.playbook_id)
}

fn encode_cursor(playbook: &PlaybookDef) -> String {
    BASE64.encode(cursor_key(playbook))
}

fn decode_cursor(cursor: &str) -> Result<(Timestamp, PlaybookId), PolicyError> {
    let decoded = BASE64.decode(cursor).map_err(|err| PolicyError::InvalidCursor(err.to_string()))?;
    let text = String::from_utf8(decoded).map_err(|err| PolicyError::InvalidCursor(err.to_string()))?;
    let (timestamp_text, id_text) =
        text.split_once('|').ok_or_else(|| PolicyError::InvalidCursor("missing separator".to_string()))?;
    let timestamp = Timestamp::parse(timestamp_text).map_err(|err| PolicyError::InvalidCursor(err.to_string()))?;
    Ok((timestamp, PlaybookId::new(id_text)))
}

/// Lists `candidates` in stable `(created_at, playbook_id)` ascending order,
/// returning at most `page_size` items starting strictly after `cursor`
/// (SPEC_FULL §11).
///
/// # Errors
///
/// Returns [`PolicyError::InvalidCursor`] when `cursor` is not a value this
/// function previously returned.
pub fn list_playbooks<'a>(
    candidates: &'a [PlaybookDef],
    cursor: Option<&str>,
    page_size: usize,
) -> Result<PlaybookPage<'a>, PolicyError> {
    let mut ordered: Vec<&PlaybookDef> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.playbook_id.cmp(&b.playbook_id)));

    let start_after = cursor.map(decode_cursor).transpose()?;
    let start_index = start_after.map_or(0, |(after_ts, after_id)| {
        ordered
            .iter()
            .position(|playbook| (playbook.created_at, &playbook.playbook_id) > (after_ts, &after_id))
            .unwrap_or(ordered.len())
    });

    let page_size = page_size.max(1);
    let page: Vec<&PlaybookDef> = ordered[start_index..].iter().take(page_size).copied().collect();
    let next_cursor =
        if start_index + page.len() < ordered.len() { page.last().map(|playbook| encode_cursor(playbook)) } else { None };

    Ok(PlaybookPage {
        items: page,
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use xgate_core::PlaybookConditions;

    fn playbook(id: &str, priority: i64, created_offset_secs: i64) -> PlaybookDef {
        PlaybookDef {
            playbook_id: PlaybookId::new(id),
            exception_type: "SETTLEMENT_FAIL".to_string(),
            steps: vec![
                PlaybookStepDef {
                    step_order: 2,
                    action: "notify".to_string(),
                    parameters: serde_json::json!({}),
                },
                PlaybookStepDef {
                    step_order: 1,
                    action: "retry".to_string(),
                    parameters: serde_json::json!({}),
                },
            ],
            conditions: PlaybookConditions {
                priority,
                ..Default::default()
            },
            created_at: Timestamp::now_utc().plus_seconds(created_offset_secs),
        }
    }

    fn input() -> MatchInput {
        MatchInput {
            domain: Some("finance".to_string()),
            exception_type: "SETTLEMENT_FAIL".to_string(),
            severity: Severity::High,
            sla_minutes_remaining: Some(10.0),
            policy_tags: vec!["tier1".to_string()],
        }
    }

    #[test]
    fn picks_highest_priority_then_newest() {
        let candidates = vec![playbook("PB-LOW", 1, 0), playbook("PB-HIGH", 5, -10), playbook("PB-HIGH-NEWER", 5, 0)];
        let result = match_playbook(&candidates, &input()).expect("match");
        assert_eq!(result.playbook.playbook_id.as_str(), "PB-HIGH-NEWER");
    }

    #[test]
    fn sla_condition_is_filter_only() {
        let mut candidate = playbook("PB-SLA", 0, 0);
        candidate.conditions.sla_minutes_remaining_lt = Some(5.0);
        let result = match_playbook(std::slice::from_ref(&candidate), &input());
        assert!(result.is_none(), "remaining=10 should fail the < 5 filter");
    }

    #[test]
    fn ordered_steps_sorts_ascending() {
        let candidate = playbook("PB-1", 0, 0);
        let steps = ordered_steps(&candidate);
        assert_eq!(steps[0].step_order, 1);
        assert_eq!(steps[1].step_order, 2);
    }

    #[test]
    fn list_playbooks_paginates_with_opaque_cursor() {
        let candidates: Vec<PlaybookDef> =
            (0..5).map(|i| playbook(&format!("PB-{i}"), 0, i64::from(i))).collect();
        let first_page = list_playbooks(&candidates, None, 2).expect("page 1");
        assert_eq!(first_page.items.len(), 2);
        let cursor = first_page.next_cursor.expect("has next");

        let second_page = list_playbooks(&candidates, Some(&cursor), 2).expect("page 2");
        assert_eq!(second_page.items.len(), 2);
        assert_ne!(first_page.items[0].playbook_id, second_page.items[0].playbook_id);
    }

    #[test]
    fn invalid_cursor_is_rejected() {
        let candidates = vec![playbook("PB-1", 0, 0)];
        let err = list_playbooks(&candidates, Some("not-base64!!"), 10).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidCursor(_)));
    }
}
