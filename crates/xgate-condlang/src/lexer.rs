// crates/xgate-condlang/src/lexer.rs
// ============================================================================
// Module: Lexer
// Description: Byte-offset tokenizer for the condition mini-DSL.
// Purpose: Turn rule text into a flat token stream for the recursive-descent
//          parser.
// Dependencies: none
// ============================================================================

//! ## Overview
//! A small hand-rolled lexer, the same shape as `ret-logic`'s: a byte
//! cursor over the input, one token at a time, spans carried for error
//! messages. Identifiers may contain dots (`rawPayload.amount`) so the
//! parser can split attribute paths without the lexer knowing about
//! namespaces.

/// Maximum input length accepted by the lexer. Severity rules and playbook
/// conditions are short; this bounds pathological inputs the same way
/// `ret-logic::dsl::MAX_DSL_INPUT_BYTES` bounds its grammar.
pub const MAX_CONDITION_INPUT_BYTES: usize = 64 * 1024;

/// A lexical token with its source span, for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    /// The token kind and value.
    pub token: Token,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset just past the last character.
    pub end: usize,
}

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A dotted identifier path (`exceptionType`, `rawPayload.amount`).
    Ident(String),
    /// A single- or double-quoted string literal, already unescaped.
    String(String),
    /// A numeric literal, kept as source text for exact decimal parsing.
    Number(String),
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
    /// `&&`
    And,
    /// `||`
    Or,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// End of input.
    Eof,
}

/// Lexer error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexError {
    /// Input exceeds [`MAX_CONDITION_INPUT_BYTES`].
    #[error("condition text too large")]
    InputTooLarge,
    /// An unterminated string literal.
    #[error("unterminated string literal at byte {0}")]
    UnterminatedString(usize),
    /// A character the lexer does not recognize.
    #[error("unexpected character {0:?} at byte {1}")]
    UnexpectedChar(char, usize),
}

/// A cursor-based tokenizer over condition source text.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Builds a lexer over `source`.
    ///
    /// # Errors
    ///
    /// Returns [`LexError::InputTooLarge`] when `source` exceeds the byte cap.
    pub fn new(source: &'a str) -> Result<Self, LexError> {
        if source.len() > MAX_CONDITION_INPUT_BYTES {
            return Err(LexError::InputTooLarge);
        }
        Ok(Self {
            source,
            pos: 0,
        })
    }

    /// Tokenizes the entire input, ending with an [`Token::Eof`].
    ///
    /// # Errors
    ///
    /// Returns [`LexError`] on an unterminated string or unrecognized character.
    pub fn tokenize(mut self) -> Result<Vec<SpannedToken>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(ch) = self.peek() else {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    start,
                    end: start,
                });
                break;
            };
            let token = match ch {
                '(' => {
                    self.advance();
                    Token::LParen
                }
                ')' => {
                    self.advance();
                    Token::RParen
                }
                '=' if self.peek_at(1) == Some('=') => {
                    self.advance();
                    self.advance();
                    Token::Eq
                }
                '!' if self.peek_at(1) == Some('=') => {
                    self.advance();
                    self.advance();
                    Token::Ne
                }
                '>' if self.peek_at(1) == Some('=') => {
                    self.advance();
                    self.advance();
                    Token::Ge
                }
                '<' if self.peek_at(1) == Some('=') => {
                    self.advance();
                    self.advance();
                    Token::Le
                }
                '>' => {
                    self.advance();
                    Token::Gt
                }
                '<' => {
                    self.advance();
                    Token::Lt
                }
                '&' if self.peek_at(1) == Some('&') => {
                    self.advance();
                    self.advance();
                    Token::And
                }
                '|' if self.peek_at(1) == Some('|') => {
                    self.advance();
                    self.advance();
                    Token::Or
                }
                '\'' | '"' => self.lex_string(ch)?,
                c if c.is_ascii_digit() || (c == '-' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit())) => {
                    self.lex_number()
                }
                c if c.is_alphabetic() || c == '_' || c == ':' => self.lex_ident(),
                other => return Err(LexError::UnexpectedChar(other, start)),
            };
            tokens.push(SpannedToken {
                token,
                start,
                end: self.pos,
            });
        }
        Ok(tokens)
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, LexError> {
        let start = self.pos;
        self.advance();
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(LexError::UnterminatedString(start)),
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    match self.peek() {
                        Some(escaped) => {
                            value.push(escaped);
                            self.advance();
                        }
                        None => return Err(LexError::UnterminatedString(start)),
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance();
                }
            }
        }
        Ok(Token::String(value))
    }

    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.advance();
        }
        Token::Number(self.source[start..self.pos].to_string())
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == ':') {
            self.advance();
        }
        Token::Ident(self.source[start..self.pos].to_string())
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(ahead)
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_comparison() {
        let tokens = Lexer::new("exceptionType == 'X'").expect("lexer").tokenize().expect("tokenize");
        assert_eq!(
            tokens.iter().map(|t| t.token.clone()).collect::<Vec<_>>(),
            vec![
                Token::Ident("exceptionType".to_string()),
                Token::Eq,
                Token::String("X".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn tokenizes_dotted_path_and_number() {
        let tokens =
            Lexer::new("rawPayload.amount > 50000").expect("lexer").tokenize().expect("tokenize");
        assert_eq!(tokens[0].token, Token::Ident("rawPayload.amount".to_string()));
        assert_eq!(tokens[2].token, Token::Number("50000".to_string()));
    }

    #[test]
    fn rejects_oversized_input() {
        let huge = "a".repeat(MAX_CONDITION_INPUT_BYTES + 1);
        assert_eq!(Lexer::new(&huge).unwrap_err(), LexError::InputTooLarge);
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = Lexer::new("exceptionType == 'X").expect("lexer").tokenize().unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString(_)));
    }
}
