// crates/xgate-agents/src/triage.rs
// ============================================================================
// Module: Triage Agent
// Description: Classifies an exception type and scores severity against
//              Domain Pack rules (spec §4.10.2).
// Dependencies: xgate-core, xgate-condlang, xgate-audit
// ============================================================================

//! Classification and severity scoring mirror
//! `src/agents/triage.py::TriageAgent` from the original implementation.
//! Severity rule conditions are parsed once per rule (at Domain Pack load
//! time, by the caller) rather than re-parsed on every evaluation, per
//! `xgate-condlang`'s design.
//!
//! Similarity search degrades through three tiers — hybrid, lexical, none —
//! rather than aborting when the richer tier fails, matching the original's
//! `except Exception: fall back to simpler search` behavior.

use async_trait::async_trait;
use xgate_condlang::AttributeLookup;
use xgate_condlang::AttributeValue;
use xgate_condlang::Expr;
use xgate_condlang::TriState;
use xgate_condlang::evaluate;
use xgate_core::AgentDecision;
use xgate_core::DomainPack;
use xgate_core::ExceptionRecord;
use xgate_core::ExceptionType;
use xgate_core::Severity;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::error::AgentError;
use crate::SharedAuditTrail;

/// One similarity search result, regardless of which tier produced it.
#[derive(Debug, Clone)]
pub struct SimilarCase {
    /// The prior exception this case refers to.
    pub exception_id: String,
    /// A score in `[0, 1]`; tiers compute it differently, but all report
    /// the same range.
    pub score: f64,
    /// A short human-readable reason for the match.
    pub explanation: String,
}

/// A three-tier similarity search capability: hybrid (embeddings + lexical
/// fusion), lexical-only, or none. Triage steps down a tier on failure
/// instead of aborting (spec §4.10.2, SPEC_FULL §11).
pub trait SimilaritySearch: Send + Sync {
    /// Attempts a hybrid semantic + lexical search. Returns `Err` when the
    /// embedding backend is unavailable; the caller falls back to
    /// [`Self::lexical_search`].
    fn hybrid_search(&self, exception: &ExceptionRecord, k: usize) -> Result<Vec<SimilarCase>, String>;

    /// Attempts a lexical-only search (e.g. substring or token overlap over
    /// `raw_payload`). Returns `Err` when even this degraded tier cannot
    /// run.
    fn lexical_search(&self, exception: &ExceptionRecord, k: usize) -> Result<Vec<SimilarCase>, String>;
}

/// Always reports both tiers unavailable. Used when no memory index is
/// configured.
#[derive(Debug, Default)]
pub struct NoSimilaritySearch;

impl SimilaritySearch for NoSimilaritySearch {
    fn hybrid_search(&self, _exception: &ExceptionRecord, _k: usize) -> Result<Vec<SimilarCase>, String> {
        Err("no similarity search backend configured".to_string())
    }

    fn lexical_search(&self, _exception: &ExceptionRecord, _k: usize) -> Result<Vec<SimilarCase>, String> {
        Err("no similarity search backend configured".to_string())
    }
}

fn search_with_degradation(search: &dyn SimilaritySearch, exception: &ExceptionRecord) -> (Vec<SimilarCase>, &'static str) {
    match search.hybrid_search(exception, 5) {
        Ok(results) => (results, "hybrid"),
        Err(hybrid_error) => {
            tracing::warn!(error = %hybrid_error, "hybrid search failed, falling back to lexical");
            match search.lexical_search(exception, 5) {
                Ok(results) => (results, "lexical"),
                Err(lexical_error) => {
                    tracing::warn!(error = %lexical_error, "lexical search also failed");
                    (Vec::new(), "none")
                }
            }
        }
    }
}

struct ExceptionLookup<'a> {
    exception_type: &'a str,
    raw_payload: &'a serde_json::Value,
}

impl AttributeLookup for ExceptionLookup<'_> {
    fn lookup(&self, path: &[String]) -> Option<AttributeValue> {
        match path.first().map(String::as_str) {
            Some("exceptionType") => Some(AttributeValue::String(self.exception_type.to_string())),
            Some("rawPayload") => {
                let mut cursor = self.raw_payload;
                for segment in &path[1..] {
                    cursor = cursor.get(segment)?;
                }
                AttributeValue::from_json(cursor)
            }
            _ => None,
        }
    }
}

fn evaluate_condition(parsed: &Expr, exception_type: &str, raw_payload: &serde_json::Value) -> bool {
    let ctx = ExceptionLookup { exception_type, raw_payload };
    evaluate(parsed, &ctx) == TriState::True
}

/// Classifies and scores an exception against a Domain Pack (spec
/// §4.10.2).
pub struct TriageAgent {
    domain_pack: DomainPack,
    similarity_search: Box<dyn SimilaritySearch>,
    audit: Option<SharedAuditTrail>,
}

impl TriageAgent {
    /// Builds an agent over `domain_pack`, with an optional similarity
    /// search backend (defaults to [`NoSimilaritySearch`]) and audit trail.
    #[must_use]
    pub fn new(domain_pack: DomainPack, similarity_search: Option<Box<dyn SimilaritySearch>>, audit: Option<SharedAuditTrail>) -> Self {
        Self {
            domain_pack,
            similarity_search: similarity_search.unwrap_or_else(|| Box::new(NoSimilaritySearch)),
            audit,
        }
    }

    fn classify(&self, exception: &ExceptionRecord) -> Result<ExceptionType, AgentError> {
        if let Some(exception_type) = &exception.exception_type {
            return if self.domain_pack.exception_types.contains_key(exception_type.as_str()) {
                Ok(exception_type.clone())
            } else {
                Err(AgentError::ClassificationFailed(format!(
                    "Exception type '{exception_type}' not found in domain pack"
                )))
            };
        }

        if let Some(payload_type) =
            exception.raw_payload.get("exceptionType").or_else(|| exception.raw_payload.get("exception_type")).and_then(serde_json::Value::as_str)
            && self.domain_pack.exception_types.contains_key(payload_type)
        {
            return Ok(ExceptionType::new(payload_type));
        }

        let error_text = format!(
            "{} {}",
            exception.raw_payload.get("error").and_then(serde_json::Value::as_str).unwrap_or_default(),
            exception.raw_payload.get("errorCode").and_then(serde_json::Value::as_str).unwrap_or_default(),
        )
        .to_ascii_uppercase();

        self.domain_pack
            .exception_types
            .keys()
            .find(|candidate| error_text.contains(candidate.to_ascii_uppercase().as_str()))
            .map(|candidate| ExceptionType::new(candidate.clone()))
            .ok_or_else(|| {
                AgentError::ClassificationFailed("could not classify exception type from domain pack or payload".to_string())
            })
    }

    fn evaluate_severity(&self, exception_type: &str, raw_payload: &serde_json::Value) -> (Severity, Vec<String>) {
        let mut matched = Vec::new();
        let mut highest: Option<Severity> = None;

        for rule in &self.domain_pack.severity_rules {
            let Ok(parsed) = xgate_condlang::parse_condition(&rule.condition) else {
                continue;
            };
            if evaluate_condition(&parsed, exception_type, raw_payload) {
                matched.push(format!("{} -> {}", rule.condition, rule.severity.as_str()));
                highest = Some(highest.map_or(rule.severity, |current| current.max(rule.severity)));
            }
        }

        if let Some(severity) = highest {
            return (severity, matched);
        }

        let upper = exception_type.to_ascii_uppercase();
        let fallback = if upper.contains("CRITICAL") || upper.contains("BREAK") {
            Severity::Critical
        } else if upper.contains("HIGH") || upper.contains("FAIL") {
            Severity::High
        } else if upper.contains("LOW") || upper.contains("MISMATCH") {
            Severity::Low
        } else {
            Severity::Medium
        };
        (fallback, matched)
    }
}

#[async_trait]
impl Agent for TriageAgent {
    fn name(&self) -> &'static str {
        "TriageAgent"
    }

    async fn process(&self, exception: &mut ExceptionRecord, context: &mut AgentContext) -> Result<AgentDecision, AgentError> {
        let classified_type = self.classify(exception)?;
        let (severity, matched_rules) = self.evaluate_severity(classified_type.as_str(), &exception.raw_payload);
        let was_already_typed = exception.exception_type.as_ref() == Some(&classified_type);

        exception.exception_type = Some(classified_type.clone());
        exception.severity = Some(severity);

        let (similar_cases, tier) = search_with_degradation(self.similarity_search.as_ref(), exception);

        let mut evidence = vec![format!("Classified as: {classified_type}"), format!("Severity: {}", severity.as_str())];
        if let Some(exception_type_def) = self.domain_pack.exception_types.get(classified_type.as_str()) {
            evidence.push(format!("Description: {}", exception_type_def.description));
        }
        if matched_rules.is_empty() {
            evidence.push("No severity rules matched (using default)".to_string());
        } else {
            evidence.push(format!("Matched severity rules: {}", matched_rules.len()));
            evidence.extend(matched_rules.iter().cloned());
        }
        if !similar_cases.is_empty() {
            evidence.push(format!("Found {} similar cases via {tier} search:", similar_cases.len()));
            for (index, case) in similar_cases.iter().take(3).enumerate() {
                evidence.push(format!("  {}. Case {}: score={:.2} ({})", index + 1, case.exception_id, case.score, case.explanation));
            }
        }

        let confidence = if was_already_typed && !matched_rules.is_empty() {
            0.9
        } else if !matched_rules.is_empty() {
            0.85
        } else if was_already_typed {
            0.8
        } else {
            0.7
        };
        context.set("confidence", serde_json::json!(confidence));

        let decision = AgentDecision {
            decision: format!("Triaged {classified_type} {}", severity.as_str()),
            confidence,
            evidence,
            next_step: "ProceedToPolicy".to_string(),
        };

        if let Some(audit) = &self.audit {
            audit.log_agent_event(serde_json::json!({
                "agent": self.name(),
                "exception_id": exception.exception_id.to_string(),
                "decision": decision.decision,
                "confidence": decision.confidence,
            }))?;
        }

        Ok(decision)
    }
}
