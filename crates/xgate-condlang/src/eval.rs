// crates/xgate-condlang/src/eval.rs
// ============================================================================
// Module: Evaluator
// Description: Tri-state (Kleene) evaluation of a parsed condition AST.
// Purpose: Walk an Expr against a caller-supplied attribute lookup without
//          ever panicking on a missing attribute or a type mismatch.
// Dependencies: crate::parser, bigdecimal
// ============================================================================

//! ## Overview
//! Evaluation never fails: a missing attribute, or a literal that cannot be
//! compared to the looked-up value, both produce [`TriState::Unknown`]
//! rather than an error. `And`/`Or` combine tri-state operands with Kleene
//! logic, the same discipline `decision-gate-core`'s comparator runtime
//! applies to its own three-valued comparisons.

use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::parser::Comparator;
use crate::parser::Expr;
use crate::parser::Literal;

/// The result of evaluating a condition: matched, did not match, or could
/// not be determined (e.g. the referenced attribute is absent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The condition could not be evaluated.
    Unknown,
}

/// A resolved attribute value, as read from the evaluation context.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A decimal number, compared exactly rather than via floating point.
    Number(BigDecimal),
    /// A boolean value.
    Bool(bool),
}

impl AttributeValue {
    /// Converts a [`serde_json::Value`] into an [`AttributeValue`], where
    /// possible. Returns `None` for `null`, arrays, and objects, which have
    /// no meaningful comparator semantics in this grammar.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(text) => Some(Self::String(text.clone())),
            serde_json::Value::Bool(flag) => Some(Self::Bool(*flag)),
            serde_json::Value::Number(number) => {
                BigDecimal::from_str(&number.to_string()).ok().map(Self::Number)
            }
            serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

/// Resolves dotted attribute paths (e.g. `rawPayload.amount`) to values
/// during condition evaluation.
///
/// Implementors decide the attribute namespace; this crate hardcodes none.
pub trait AttributeLookup {
    /// Looks up the value at `path`. Returns `None` when the attribute is
    /// absent, which the evaluator treats as [`TriState::Unknown`].
    fn lookup(&self, path: &[String]) -> Option<AttributeValue>;
}

/// Evaluates `expr` against `ctx`, never panicking.
#[must_use]
pub fn evaluate(expr: &Expr, ctx: &impl AttributeLookup) -> TriState {
    match expr {
        Expr::Never => TriState::False,
        Expr::Compare {
            path,
            comparator,
            literal,
        } => evaluate_compare(ctx, path, *comparator, literal),
        Expr::And(lhs, rhs) => kleene_and(evaluate(lhs, ctx), evaluate(rhs, ctx)),
        Expr::Or(lhs, rhs) => kleene_or(evaluate(lhs, ctx), evaluate(rhs, ctx)),
    }
}

fn evaluate_compare(
    ctx: &impl AttributeLookup,
    path: &[String],
    comparator: Comparator,
    literal: &Literal,
) -> TriState {
    let Some(resolved) = ctx.lookup(path) else {
        return TriState::Unknown;
    };
    match (resolved, literal) {
        (AttributeValue::String(value), Literal::String(expected)) => {
            compare_ordered(value.as_str(), expected.as_str(), comparator)
        }
        (AttributeValue::Bool(value), Literal::String(expected)) => {
            match expected.parse::<bool>() {
                Ok(expected_bool) => compare_eq_only(value, expected_bool, comparator),
                Err(_) => TriState::Unknown,
            }
        }
        (AttributeValue::Number(value), Literal::Number(expected)) => {
            match BigDecimal::from_str(expected) {
                Ok(expected_decimal) => compare_ordered(&value, &expected_decimal, comparator),
                Err(_) => TriState::Unknown,
            }
        }
        _ => TriState::Unknown,
    }
}

fn compare_ordered<T: PartialOrd + PartialEq>(value: &T, expected: &T, comparator: Comparator) -> TriState {
    let matched = match comparator {
        Comparator::Eq => value == expected,
        Comparator::Ne => value != expected,
        Comparator::Gt => value > expected,
        Comparator::Lt => value < expected,
        Comparator::Ge => value >= expected,
        Comparator::Le => value <= expected,
    };
    if matched {
        TriState::True
    } else {
        TriState::False
    }
}

fn compare_eq_only(value: bool, expected: bool, comparator: Comparator) -> TriState {
    match comparator {
        Comparator::Eq => {
            if value == expected {
                TriState::True
            } else {
                TriState::False
            }
        }
        Comparator::Ne => {
            if value != expected {
                TriState::True
            } else {
                TriState::False
            }
        }
        Comparator::Gt | Comparator::Lt | Comparator::Ge | Comparator::Le => TriState::Unknown,
    }
}

fn kleene_and(lhs: TriState, rhs: TriState) -> TriState {
    match (lhs, rhs) {
        (TriState::False, _) | (_, TriState::False) => TriState::False,
        (TriState::True, TriState::True) => TriState::True,
        _ => TriState::Unknown,
    }
}

fn kleene_or(lhs: TriState, rhs: TriState) -> TriState {
    match (lhs, rhs) {
        (TriState::True, _) | (_, TriState::True) => TriState::True,
        (TriState::False, TriState::False) => TriState::False,
        _ => TriState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_condition;

    struct FixedContext(Option<AttributeValue>);

    impl AttributeLookup for FixedContext {
        fn lookup(&self, _path: &[String]) -> Option<AttributeValue> {
            self.0.clone()
        }
    }

    #[test]
    fn numeric_comparison_is_decimal_exact() {
        let expr = parse_condition("rawPayload.amount >= 50000.10").expect("parse");
        let ctx = FixedContext(Some(AttributeValue::Number(
            BigDecimal::from_str("50000.10").expect("decimal"),
        )));
        assert_eq!(evaluate(&expr, &ctx), TriState::True);
    }

    #[test]
    fn and_short_circuits_to_false_on_either_branch() {
        assert_eq!(kleene_and(TriState::False, TriState::Unknown), TriState::False);
        assert_eq!(kleene_and(TriState::Unknown, TriState::False), TriState::False);
    }

    #[test]
    fn or_short_circuits_to_true_on_either_branch() {
        assert_eq!(kleene_or(TriState::True, TriState::Unknown), TriState::True);
        assert_eq!(kleene_or(TriState::Unknown, TriState::True), TriState::True);
    }

    #[test]
    fn type_mismatch_between_literal_and_attribute_is_unknown() {
        let expr = parse_condition("exceptionType == 'A'").expect("parse");
        let ctx = FixedContext(Some(AttributeValue::Number(BigDecimal::from_str("1").expect("decimal"))));
        assert_eq!(evaluate(&expr, &ctx), TriState::Unknown);
    }
}
