// crates/xgate-condlang/src/parser.rs
// ============================================================================
// Module: Parser
// Description: Recursive-descent parser producing a boolean-comparator AST.
// Purpose: Parse a severity rule or playbook condition exactly once, at
//          pack-load time, into a tree the evaluator walks repeatedly.
// Dependencies: crate::lexer
// ============================================================================

//! ## Overview
//! Grammar (informal):
//! ```text
//! condition   := ["if:"] or_expr | ε
//! or_expr     := and_expr ("||" and_expr)*
//! and_expr    := comparison ("&&" comparison)*
//! comparison  := "(" or_expr ")" | attr_path comparator literal
//! attr_path   := Ident
//! comparator  := "==" | "!=" | ">" | "<" | ">=" | "<="
//! literal     := String | Number
//! ```
//! An empty input parses to [`Expr::Never`] (spec §8: "Severity rule with
//! empty condition matches nothing; never throws"), not a parse error.

use crate::lexer::LexError;
use crate::lexer::Lexer;
use crate::lexer::SpannedToken;
use crate::lexer::Token;

/// Maximum expression nesting depth, guarding against pathological inputs
/// the way `ret-logic::dsl` bounds its own recursion.
pub const MAX_CONDITION_NESTING: usize = 32;

/// A comparator between an attribute path and a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
}

/// A literal value on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// A string literal.
    String(String),
    /// A numeric literal, kept as source text for exact decimal parsing.
    Number(String),
}

/// The parsed condition AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Matches nothing; the parse of an empty condition.
    Never,
    /// `lhs comparator literal`, where `lhs` is a dotted attribute path.
    Compare {
        /// The attribute path, split on `.` (e.g. `["rawPayload", "amount"]`).
        path: Vec<String>,
        /// The comparator.
        comparator: Comparator,
        /// The literal to compare against.
        literal: Literal,
    },
    /// Logical AND of two sub-expressions.
    And(Box<Expr>, Box<Expr>),
    /// Logical OR of two sub-expressions.
    Or(Box<Expr>, Box<Expr>),
}

/// Parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Lexing failed.
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    /// Nesting exceeded [`MAX_CONDITION_NESTING`].
    #[error("condition nesting too deep")]
    NestingTooDeep,
    /// Input ended where a token was expected.
    #[error("unexpected end of condition")]
    UnexpectedEof,
    /// A token appeared where it is not valid.
    #[error("unexpected token at byte {0}")]
    UnexpectedToken(usize),
    /// Trailing input remained after a complete expression parsed.
    #[error("trailing input after condition at byte {0}")]
    TrailingInput(usize),
}

/// Parses a condition string into an [`Expr`] AST.
///
/// # Errors
///
/// Returns [`ParseError`] on a lexing failure, malformed grammar, excessive
/// nesting, or trailing input. Never returns an error for an empty or
/// whitespace-only `source` — that parses to [`Expr::Never`].
pub fn parse_condition(source: &str) -> Result<Expr, ParseError> {
    let trimmed = source.trim();
    let trimmed = trimmed.strip_prefix("if:").map_or(trimmed, str::trim);
    if trimmed.is_empty() {
        return Ok(Expr::Never);
    }
    let tokens = Lexer::new(trimmed)?.tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    parser.expect_eof()?;
    Ok(expr)
}

/// Recursive-descent cursor over a tokenized condition.
struct Parser {
    /// The full token stream, including the trailing [`Token::Eof`].
    tokens: Vec<SpannedToken>,
    /// Index of the next unconsumed token.
    pos: usize,
    /// Current recursion depth, bounded by [`MAX_CONDITION_NESTING`].
    depth: usize,
}

impl Parser {
    /// Parses an `or_expr` production.
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        self.with_nesting(|parser| {
            let mut lhs = parser.parse_and()?;
            while matches!(parser.peek(), Token::Or) {
                parser.advance();
                let rhs = parser.parse_and()?;
                lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        })
    }

    /// Parses an `and_expr` production.
    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        self.with_nesting(|parser| {
            let mut lhs = parser.parse_comparison()?;
            while matches!(parser.peek(), Token::And) {
                parser.advance();
                let rhs = parser.parse_comparison()?;
                lhs = Expr::And(Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        })
    }

    /// Parses a parenthesized sub-expression or a single comparison.
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek(), Token::LParen) {
            self.advance();
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        let start = self.current_start();
        let path = match self.peek() {
            Token::Ident(value) => {
                let path = value.split('.').map(str::to_string).collect();
                self.advance();
                path
            }
            _ => return Err(ParseError::UnexpectedToken(start)),
        };
        let comparator = match self.peek() {
            Token::Eq => Comparator::Eq,
            Token::Ne => Comparator::Ne,
            Token::Gt => Comparator::Gt,
            Token::Lt => Comparator::Lt,
            Token::Ge => Comparator::Ge,
            Token::Le => Comparator::Le,
            _ => return Err(ParseError::UnexpectedToken(self.current_start())),
        };
        self.advance();
        let literal = match self.peek() {
            Token::String(value) => Literal::String(value.clone()),
            Token::Number(value) => Literal::Number(value.clone()),
            _ => return Err(ParseError::UnexpectedToken(self.current_start())),
        };
        self.advance();
        Ok(Expr::Compare {
            path,
            comparator,
            literal,
        })
    }

    fn with_nesting<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.depth += 1;
        if self.depth > MAX_CONDITION_NESTING {
            self.depth -= 1;
            return Err(ParseError::NestingTooDeep);
        }
        let result = body(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Token {
        self.tokens.get(self.pos).map_or(Token::Eof, |t| t.token.clone())
    }

    fn current_start(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |t| t.start)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else if matches!(self.peek(), Token::Eof) {
            Err(ParseError::UnexpectedEof)
        } else {
            Err(ParseError::UnexpectedToken(self.current_start()))
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Token::Eof => Ok(()),
            _ => Err(ParseError::TrailingInput(self.current_start())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_comparison() {
        let expr = parse_condition("exceptionType == 'SETTLEMENT_FAIL'").expect("parse");
        assert_eq!(
            expr,
            Expr::Compare {
                path: vec!["exceptionType".to_string()],
                comparator: Comparator::Eq,
                literal: Literal::String("SETTLEMENT_FAIL".to_string()),
            }
        );
    }

    #[test]
    fn parses_nested_grouping() {
        let expr = parse_condition(
            "(exceptionType == 'A' || exceptionType == 'B') && rawPayload.amount > 100",
        )
        .expect("parse");
        assert!(matches!(expr, Expr::And(_, _)));
    }

    #[test]
    fn empty_input_is_never() {
        assert_eq!(parse_condition("   ").expect("parse"), Expr::Never);
        assert_eq!(parse_condition("").expect("parse"), Expr::Never);
    }

    #[test]
    fn rejects_deep_nesting() {
        let mut source = String::new();
        for _ in 0..(MAX_CONDITION_NESTING + 5) {
            source.push('(');
        }
        source.push_str("exceptionType == 'A'");
        for _ in 0..(MAX_CONDITION_NESTING + 5) {
            source.push(')');
        }
        assert_eq!(parse_condition(&source).unwrap_err(), ParseError::NestingTooDeep);
    }
}
