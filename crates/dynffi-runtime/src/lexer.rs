//! Lexical analysis (tokenization) of C declarations
//!
//! The lexer is a lazy, finite iterator over [`Token`]s. It skips whitespace,
//! `//` and `/* */` comments and reports the line every token starts on.
//! Preprocessor lines (`#...`) are rejected since there is no preprocessor.

use crate::error::{FfiError, FfiResult};
use crate::token::{Token, TokenKind};

/// Lexer state for tokenizing declaration text
pub struct Lexer {
    /// Characters of source text
    chars: Vec<char>,
    /// Current position in chars
    current: usize,
    /// Current line number (1-indexed)
    line: u32,
    /// Set once an error was yielded; the stream ends after it
    failed: bool,
}

impl Lexer {
    /// Create a new lexer for the given text
    pub fn new(source: &str) -> Self {
        Self::with_line(source, 1)
    }

    /// Create a lexer whose first line is numbered `line`
    pub fn with_line(source: &str, line: u32) -> Self {
        Self {
            chars: source.chars().collect(),
            current: 0,
            line,
            failed: false,
        }
    }

    /// Current line number
    pub fn line(&self) -> u32 {
        self.line
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        if c == '\n' {
            self.line += 1;
        }
        c
    }

    fn skip_whitespace_and_comments(&mut self) -> FfiResult<()> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next() == Some('/') => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                '/' if self.peek_next() == Some('*') => {
                    let start_line = self.line;
                    self.advance();
                    self.advance();
                    loop {
                        if self.is_at_end() {
                            return Err(FfiError::parse(start_line, "unterminated comment"));
                        }
                        if self.peek() == Some('*') && self.peek_next() == Some('/') {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Scan the next token, or None at end of input
    fn next_token(&mut self) -> FfiResult<Option<Token>> {
        self.skip_whitespace_and_comments()?;

        if self.is_at_end() {
            return Ok(None);
        }

        let line = self.line;
        let start = self.current;
        let c = self.advance();

        let kind = match c {
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '*' => TokenKind::Star,
            '?' => TokenKind::Question,
            '.' => {
                if self.peek() == Some('.') && self.peek_next() == Some('.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else {
                    return Err(FfiError::parse(line, "unexpected '.'"));
                }
            }
            '-' if self.peek().is_some_and(|c| c.is_ascii_digit()) => {
                let value = self.number(line)?;
                TokenKind::Integer(-value)
            }
            c if c.is_ascii_digit() => {
                self.current -= 1;
                TokenKind::Integer(self.number(line)?)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    self.advance();
                }
                let word: String = self.chars[start..self.current].iter().collect();
                let kind = TokenKind::keyword(&word).unwrap_or(TokenKind::Identifier);
                return Ok(Some(Token::new(kind, word, line)));
            }
            other => {
                return Err(FfiError::parse(line, format!("unexpected '{}'", other)));
            }
        };

        let lexeme: String = self.chars[start..self.current].iter().collect();
        Ok(Some(Token::new(kind, lexeme, line)))
    }

    /// Decode an integer literal (decimal, octal or hex, optional u/l suffixes)
    fn number(&mut self, line: u32) -> FfiResult<i64> {
        let start = self.current;
        let radix = if self.peek() == Some('0')
            && matches!(self.peek_next(), Some('x') | Some('X'))
        {
            self.advance();
            self.advance();
            16
        } else if self.peek() == Some('0') && self.peek_next().is_some_and(|c| c.is_ascii_digit())
        {
            self.advance();
            8
        } else {
            10
        };

        let digits_start = self.current;
        while self.peek().is_some_and(|c| c.is_digit(radix)) {
            self.advance();
        }
        let digits: String = self.chars[digits_start..self.current].iter().collect();

        while matches!(self.peek(), Some('u' | 'U' | 'l' | 'L')) {
            self.advance();
        }

        if self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            let text: String = self.chars[start..=self.current].iter().collect();
            return Err(FfiError::parse(line, format!("invalid integer '{}'", text)));
        }

        if digits.is_empty() {
            return if radix == 16 {
                Err(FfiError::parse(line, "invalid integer '0x'"))
            } else {
                Ok(0)
            };
        }

        i64::from_str_radix(&digits, radix)
            .map_err(|_| FfiError::parse(line, format!("integer '{}' out of range", digits)))
    }
}

impl Iterator for Lexer {
    type Item = FfiResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_token() {
            Ok(token) => token.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctype::Primitive;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .map(|t| t.map(|t| t.kind))
            .collect::<FfiResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_struct_declaration() {
        assert_eq!(
            kinds("struct point { int x; };"),
            vec![
                TokenKind::Struct,
                TokenKind::Identifier,
                TokenKind::LeftBrace,
                TokenKind::Primitive(Primitive::Int),
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::RightBrace,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_variadic_prototype() {
        assert_eq!(
            kinds("int printf(const char *fmt, ...);"),
            vec![
                TokenKind::Primitive(Primitive::Int),
                TokenKind::Identifier,
                TokenKind::LeftParen,
                TokenKind::Const,
                TokenKind::Primitive(Primitive::Char),
                TokenKind::Star,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::Ellipsis,
                TokenKind::RightParen,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn test_integer_literals() {
        assert_eq!(
            kinds("[16] [0x10] [010] [-1] [4u]"),
            vec![
                TokenKind::LeftBracket,
                TokenKind::Integer(16),
                TokenKind::RightBracket,
                TokenKind::LeftBracket,
                TokenKind::Integer(16),
                TokenKind::RightBracket,
                TokenKind::LeftBracket,
                TokenKind::Integer(8),
                TokenKind::RightBracket,
                TokenKind::LeftBracket,
                TokenKind::Integer(-1),
                TokenKind::RightBracket,
                TokenKind::LeftBracket,
                TokenKind::Integer(4),
                TokenKind::RightBracket,
            ]
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let tokens: Vec<Token> = Lexer::new("// header\nint /* a\nb */ x;")
            .collect::<FfiResult<_>>()
            .unwrap();
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[1].lexeme, "x");
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("int x = 1;")
            .collect::<FfiResult<Vec<_>>>()
            .unwrap_err();
        assert_eq!(err.to_string(), "1:unexpected '='");
    }

    #[test]
    fn test_unterminated_comment() {
        let err = Lexer::new("\n/* open")
            .collect::<FfiResult<Vec<_>>>()
            .unwrap_err();
        assert_eq!(err.to_string(), "2:unterminated comment");
    }

    #[test]
    fn test_stream_ends_after_error() {
        let mut lexer = Lexer::new("@ int");
        assert!(lexer.next().unwrap().is_err());
        assert!(lexer.next().is_none());
    }
}
