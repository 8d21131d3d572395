//! Token types for the declaration lexer

use crate::ctype::Primitive;
use std::fmt;

/// Token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The source text of this token
    pub lexeme: String,
    /// Line the token starts on (1-indexed)
    pub line: u32,
}

impl Token {
    /// Create a new token
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
        }
    }
}

/// Classification of token types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier (field, function, typedef or tag name)
    Identifier,
    /// Integer literal; value already decoded
    Integer(i64),

    // Keywords
    /// `typedef`
    Typedef,
    /// `struct`
    Struct,
    /// `union`
    Union,
    /// `const`
    Const,
    /// `volatile` (accepted and ignored)
    Volatile,
    /// `signed`
    Signed,
    /// `unsigned`
    Unsigned,
    /// A primitive type keyword (`int`, `size_t`, ...)
    Primitive(Primitive),

    // Punctuation
    /// `...`
    Ellipsis,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `;`
    Semicolon,
    /// `,`
    Comma,
    /// `*`
    Star,
    /// `?`
    Question,
}

impl TokenKind {
    /// Look up a keyword, returning None for plain identifiers
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "typedef" => TokenKind::Typedef,
            "struct" => TokenKind::Struct,
            "union" => TokenKind::Union,
            "const" => TokenKind::Const,
            "volatile" => TokenKind::Volatile,
            "signed" => TokenKind::Signed,
            "unsigned" => TokenKind::Unsigned,
            _ => return Primitive::from_keyword(word).map(TokenKind::Primitive),
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier => write!(f, "identifier"),
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Typedef => write!(f, "typedef"),
            TokenKind::Struct => write!(f, "struct"),
            TokenKind::Union => write!(f, "union"),
            TokenKind::Const => write!(f, "const"),
            TokenKind::Volatile => write!(f, "volatile"),
            TokenKind::Signed => write!(f, "signed"),
            TokenKind::Unsigned => write!(f, "unsigned"),
            TokenKind::Primitive(p) => write!(f, "{}", p.name()),
            TokenKind::Ellipsis => write!(f, "..."),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::LeftBrace => write!(f, "{{"),
            TokenKind::RightBrace => write!(f, "}}"),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Question => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(TokenKind::keyword("typedef"), Some(TokenKind::Typedef));
        assert_eq!(
            TokenKind::keyword("size_t"),
            Some(TokenKind::Primitive(Primitive::SizeT))
        );
        assert_eq!(TokenKind::keyword("point"), None);
    }

    #[test]
    fn test_display_punctuation() {
        assert_eq!(TokenKind::LeftBrace.to_string(), "{");
        assert_eq!(TokenKind::Ellipsis.to_string(), "...");
    }

    #[test]
    fn test_display_primitive_uses_type_name() {
        let from_alias = TokenKind::keyword("_Bool").unwrap();
        assert_eq!(from_alias.to_string(), "bool");
        assert_eq!(TokenKind::Primitive(Primitive::UInt64).to_string(), "uint64_t");
    }
}
