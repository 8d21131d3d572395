//! Parsing (declaration text to registered types)
//!
//! Recursive descent over the subset of C declaration syntax that matters for
//! binding: struct/union definitions, typedefs and function prototypes, plus
//! standalone type expressions such as `const char *` or `int[?]`.
//!
//! The parser reads committed names from [`Declarations`] and stages new ones
//! in a [`Pending`] batch. Nothing becomes visible until the caller commits
//! the batch, so a failing `cdef` leaves the tables untouched.

mod decl;
mod record;
mod types;

use crate::ctype::{CFunc, CRecord, CTypeRef};
use crate::error::{FfiError, FfiResult};
use crate::lexer::Lexer;
use crate::registry::{Declarations, Pending};
use crate::token::{Token, TokenKind};
use std::rc::Rc;

/// Parser state for one batch of declaration text
pub struct Parser<'d> {
    pub(super) tokens: Vec<Token>,
    pub(super) current: usize,
    pub(super) decls: &'d mut Declarations,
    pub(super) pending: Pending,
}

impl<'d> Parser<'d> {
    /// Tokenize `source`; lexical errors are reported here
    pub fn new(source: &str, decls: &'d mut Declarations) -> FfiResult<Self> {
        let tokens = Lexer::new(source).collect::<FfiResult<Vec<_>>>()?;
        Ok(Self {
            tokens,
            current: 0,
            decls,
            pending: Pending::default(),
        })
    }

    /// Parse a sequence of declarations
    ///
    /// Returns the staged names for the caller to commit.
    pub fn parse_declarations(mut self) -> FfiResult<Pending> {
        while !self.is_at_end() {
            self.parse_declaration()?;
        }
        Ok(self.pending)
    }

    /// Parse one standalone type expression
    ///
    /// A leading `[?]` or `[]` dimension yields a flexible (zero-length)
    /// array type whose extent the caller supplies. Records defined inline
    /// are staged like any other definition.
    pub fn parse_type_expr(mut self) -> FfiResult<(CTypeRef, Pending)> {
        let base = self.parse_base_type()?;
        let ty = self.parse_pointers(base);
        let dims = self.parse_array_dims()?;
        if ty.is_void() && !dims.is_empty() {
            return Err(self.void_forbidden());
        }
        let ty = self.apply_dims(&ty, &dims)?;

        if let Some(token) = self.peek() {
            return Err(FfiError::parse(
                token.line,
                format!("unexpected '{}'", token.lexeme),
            ));
        }
        Ok((ty, self.pending))
    }

    // === Name lookup across the committed tables and the current batch ===

    pub(super) fn lookup_record(&self, tag: &str) -> Option<Rc<CRecord>> {
        self.pending
            .records
            .get(tag)
            .or_else(|| self.decls.record(tag))
            .cloned()
    }

    pub(super) fn lookup_typedef(&self, name: &str) -> Option<CTypeRef> {
        self.pending
            .typedefs
            .get(name)
            .or_else(|| self.decls.typedef(name))
            .cloned()
    }

    pub(super) fn lookup_function(&self, name: &str) -> Option<Rc<CFunc>> {
        self.pending
            .functions
            .get(name)
            .or_else(|| self.decls.function(name))
            .cloned()
    }

    // === Token helpers ===

    /// Advance and return the consumed token
    pub(super) fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.current).cloned();
        if token.is_some() {
            self.current += 1;
        }
        token
    }

    pub(super) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    pub(super) fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    /// Kind of the token after the current one
    pub(super) fn peek_next_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.current + 1).map(|t| t.kind)
    }

    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    /// Match and consume token if it matches
    pub(super) fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    /// Consume token of given kind or report `'what' expected`
    pub(super) fn consume(&mut self, kind: TokenKind, what: &str) -> FfiResult<Token> {
        if self.check(kind) {
            if let Some(token) = self.advance() {
                return Ok(token);
            }
        }
        Err(self.expected(what))
    }

    pub(super) fn consume_identifier(&mut self) -> FfiResult<Token> {
        self.consume(TokenKind::Identifier, "identifier")
    }

    pub(super) fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    /// Line of the current token, or of the last one at end of input
    pub(super) fn line(&self) -> u32 {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    // === Errors ===

    pub(super) fn error(&self, message: impl Into<String>) -> FfiError {
        FfiError::parse(self.line(), message)
    }

    /// `'x' expected before 'tok'`
    pub(super) fn expected(&self, what: &str) -> FfiError {
        match self.peek() {
            Some(token) => self.error(format!(
                "'{}' expected before '{}'",
                what, token.lexeme
            )),
            None => self.error(format!("'{}' expected at end of input", what)),
        }
    }

    pub(super) fn void_forbidden(&self) -> FfiError {
        let near = self
            .tokens
            .get(self.current.saturating_sub(1))
            .map(|t| t.lexeme.as_str())
            .unwrap_or("void");
        self.error(format!("void type in forbidden context near '{}'", near))
    }
}
