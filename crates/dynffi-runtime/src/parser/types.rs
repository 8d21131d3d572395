//! Base types, pointer suffixes and array dimensions

use crate::ctype::{CTypeRef, Primitive};
use crate::error::FfiResult;
use crate::parser::Parser;
use crate::token::TokenKind;

impl Parser<'_> {
    /// Parse `qualifier* base qualifier*`
    pub(super) fn parse_base_type(&mut self) -> FfiResult<CTypeRef> {
        let mut is_const = self.parse_qualifiers();
        let base = self.parse_unqualified_base()?;
        is_const |= self.parse_qualifiers();

        Ok(if is_const {
            self.decls.registry.with_const(&base, true)
        } else {
            base
        })
    }

    /// Consume `const`/`volatile`; true if `const` was seen
    fn parse_qualifiers(&mut self) -> bool {
        let mut is_const = false;
        loop {
            if self.match_token(TokenKind::Const) {
                is_const = true;
            } else if !self.match_token(TokenKind::Volatile) {
                return is_const;
            }
        }
    }

    fn parse_unqualified_base(&mut self) -> FfiResult<CTypeRef> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("identifier expected"));
        };

        match token.kind {
            TokenKind::Signed | TokenKind::Unsigned => {
                self.advance();
                let base = match self.parse_primitive_words()? {
                    None => Primitive::Int,
                    Some(
                        p @ (Primitive::Char
                        | Primitive::Short
                        | Primitive::Int
                        | Primitive::Long
                        | Primitive::LongLong),
                    ) => p,
                    Some(other) => {
                        return Err(self.error(format!(
                            "'{}' cannot be combined with '{}'",
                            token.lexeme,
                            other.name()
                        )))
                    }
                };
                let p = if token.kind == TokenKind::Unsigned {
                    base.to_unsigned()
                } else {
                    base
                };
                Ok(self.decls.registry.primitive(p, false))
            }
            TokenKind::Primitive(_) => {
                let p = self.parse_primitive_words()?.unwrap_or(Primitive::Int);
                Ok(self.decls.registry.primitive(p, false))
            }
            TokenKind::Struct | TokenKind::Union => {
                let record = self.parse_record(token.kind == TokenKind::Union)?;
                Ok(self.decls.registry.record(&record, false))
            }
            TokenKind::Identifier => {
                self.advance();
                self.lookup_typedef(&token.lexeme).ok_or_else(|| {
                    crate::error::FfiError::parse(
                        token.line,
                        format!("unknown type name '{}'", token.lexeme),
                    )
                })
            }
            _ => Err(self.error(format!("unknown type name '{}'", token.lexeme))),
        }
    }

    /// Assemble multi-word primitive spellings (`long long int`, `short int`)
    fn parse_primitive_words(&mut self) -> FfiResult<Option<Primitive>> {
        let Some(TokenKind::Primitive(first)) = self.peek_kind() else {
            return Ok(None);
        };
        self.advance();

        let int = TokenKind::Primitive(Primitive::Int);
        let p = match first {
            Primitive::Short => {
                self.match_token(int);
                Primitive::Short
            }
            Primitive::Long => {
                if self.match_token(TokenKind::Primitive(Primitive::Long)) {
                    self.match_token(int);
                    Primitive::LongLong
                } else if self.check(TokenKind::Primitive(Primitive::Double)) {
                    return Err(self.error("unsupported type 'long double'"));
                } else {
                    self.match_token(int);
                    Primitive::Long
                }
            }
            other => other,
        };
        Ok(Some(p))
    }

    /// Wrap `ty` in one pointer level per `*`, honoring `* const`
    pub(super) fn parse_pointers(&mut self, mut ty: CTypeRef) -> CTypeRef {
        while self.match_token(TokenKind::Star) {
            let is_const = self.parse_qualifiers();
            ty = self.decls.registry.pointer_to(&ty, is_const);
        }
        ty
    }

    /// Parse `[N]` suffixes, outermost first; 0 marks a flexible dimension
    ///
    /// `[]` and `[?]` are only accepted as the outermost dimension.
    pub(super) fn parse_array_dims(&mut self) -> FfiResult<Vec<usize>> {
        let mut dims = Vec::new();
        while self.match_token(TokenKind::LeftBracket) {
            let flexible_syntax =
                self.check(TokenKind::RightBracket) || self.check(TokenKind::Question);
            if flexible_syntax {
                if !dims.is_empty() {
                    return Err(self.error("flexible array not supported at here"));
                }
                self.match_token(TokenKind::Question);
                self.consume(TokenKind::RightBracket, "]")?;
                dims.push(0);
                continue;
            }

            match self.peek_kind() {
                Some(TokenKind::Integer(n)) if n < 0 => {
                    return Err(self.error("size of array is negative"));
                }
                Some(TokenKind::Integer(n)) => {
                    self.advance();
                    self.consume(TokenKind::RightBracket, "]")?;
                    dims.push(n as usize);
                }
                _ => return Err(self.expected("]")),
            }
        }
        Ok(dims)
    }

    /// Build `elem[d0][d1]...`, innermost dimension last
    pub(super) fn apply_dims(&mut self, elem: &CTypeRef, dims: &[usize]) -> FfiResult<CTypeRef> {
        let mut ty = elem.clone();
        for &len in dims.iter().rev() {
            ty = self.decls.registry.array_of(&ty, len)?;
        }
        Ok(ty)
    }
}
