// crates/xgate-condlang/src/lib.rs
// ============================================================================
// Module: Condition Language
// Description: The severity-rule / playbook-condition mini-DSL: lexer,
//              parser, AST, and tri-state evaluator.
// Purpose: Replace the source's string-split rule evaluator with a single
//          parsed AST, walked once per evaluation (spec §9).
// Dependencies: bigdecimal, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The grammar (spec §4.10.2) is a small conjunctive/disjunctive comparator
//! language: `exceptionType == 'X' && rawPayload.amount > 50000`, with an
//! optional `if:` prefix some source rules carry. It is parsed once, at
//! pack-load time, into an [`Expr`] tree; evaluation is a tree walk over an
//! [`AttributeLookup`] implementation, never a re-parse. An empty condition
//! parses to [`Expr::Never`], which matches nothing and never errors
//! (spec §8 boundary behavior).
//!
//! This is deliberately generalized from `ret-logic`'s boolean-combinator
//! grammar (`all`/`any`/`not`/`at_least` over named conditions) to an
//! attribute-comparator grammar, but keeps the same shape: a byte-offset
//! lexer, a recursive-descent parser with a nesting-depth guard, and a
//! `thiserror` parse-error enum.

pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::AttributeLookup;
pub use eval::AttributeValue;
pub use eval::TriState;
pub use eval::evaluate;
pub use parser::Comparator;
pub use parser::Expr;
pub use parser::Literal;
pub use parser::ParseError;
pub use parser::parse_condition;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    struct MapContext {
        exception_type: Option<String>,
        raw_payload: serde_json::Value,
    }

    impl AttributeLookup for MapContext {
        fn lookup(&self, path: &[String]) -> Option<AttributeValue> {
            match path.first().map(String::as_str) {
                Some("exceptionType") => {
                    self.exception_type.as_ref().map(|value| AttributeValue::String(value.clone()))
                }
                Some("rawPayload") => {
                    let mut cursor = &self.raw_payload;
                    for segment in &path[1..] {
                        cursor = cursor.get(segment)?;
                    }
                    AttributeValue::from_json(cursor)
                }
                _ => None,
            }
        }
    }

    #[test]
    fn matches_conjunctive_rule() {
        let expr = parse_condition(
            "exceptionType == 'SETTLEMENT_FAIL' && rawPayload.amount > 50000",
        )
        .expect("parse");
        let ctx = MapContext {
            exception_type: Some("SETTLEMENT_FAIL".to_string()),
            raw_payload: json!({"amount": 75000.0}),
        };
        assert_eq!(evaluate(&expr, &ctx), TriState::True);
    }

    #[test]
    fn disjunctive_rule_with_if_prefix() {
        let expr = parse_condition(
            "if: exceptionType == 'A' || exceptionType == 'B'",
        )
        .expect("parse");
        let ctx = MapContext {
            exception_type: Some("B".to_string()),
            raw_payload: json!({}),
        };
        assert_eq!(evaluate(&expr, &ctx), TriState::True);
    }

    #[test]
    fn empty_condition_matches_nothing_and_never_errors() {
        let expr = parse_condition("").expect("parse");
        let ctx = MapContext {
            exception_type: Some("ANYTHING".to_string()),
            raw_payload: json!({}),
        };
        assert_eq!(evaluate(&expr, &ctx), TriState::False);
    }

    #[test]
    fn missing_attribute_is_unknown_not_an_error() {
        let expr = parse_condition("rawPayload.missing == 'X'").expect("parse");
        let ctx = MapContext {
            exception_type: None,
            raw_payload: json!({}),
        };
        assert_eq!(evaluate(&expr, &ctx), TriState::Unknown);
    }

    #[test]
    fn rejects_unbalanced_parens() {
        let err = parse_condition("(exceptionType == 'A'").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof));
    }

    #[test]
    fn resolver_map_is_unused_placeholder_for_future_attribute_sets() {
        // Attribute sets beyond exceptionType/rawPayload (e.g. tenant tags)
        // are supported by any AttributeLookup impl; this crate does not
        // hardcode the attribute namespace.
        let _: BTreeMap<String, String> = BTreeMap::new();
    }
}
