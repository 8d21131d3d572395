//! Top-level declarations: typedefs and function prototypes

use crate::ctype::{CFunc, CTypeRef, Primitive};
use crate::error::{FfiError, FfiResult};
use crate::parser::Parser;
use crate::token::TokenKind;
use std::rc::Rc;

impl Parser<'_> {
    /// Parse one top-level declaration
    pub(super) fn parse_declaration(&mut self) -> FfiResult<()> {
        if self.match_token(TokenKind::Semicolon) {
            return Ok(());
        }
        if self.match_token(TokenKind::Typedef) {
            return self.parse_typedef();
        }

        let base = self.parse_base_type()?;
        // `struct tag { ... };` defines the tag and nothing else
        if self.match_token(TokenKind::Semicolon) {
            return Ok(());
        }

        let ret = self.parse_pointers(base);
        self.parse_function(ret)
    }

    /// `typedef base declarator (, declarator)* ;`
    fn parse_typedef(&mut self) -> FfiResult<()> {
        let base = self.parse_base_type()?;

        loop {
            let ty = self.parse_pointers(base.clone());
            let name = self.consume_identifier()?;
            let dims = self.parse_array_dims()?;
            if ty.is_void() && !dims.is_empty() {
                return Err(self.error(format!(
                    "void type in forbidden context near '{}'",
                    name.lexeme
                )));
            }
            let ty = self.apply_dims(&ty, &dims)?;

            if self.lookup_typedef(&name.lexeme).is_some() {
                return Err(FfiError::parse(
                    name.line,
                    format!("redefinition of symbol '{}'", name.lexeme),
                ));
            }
            self.pending.typedefs.insert(name.lexeme, ty);

            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }

        self.consume(TokenKind::Semicolon, ";")?;
        Ok(())
    }

    /// `ret name ( params ) ;`
    fn parse_function(&mut self, ret: CTypeRef) -> FfiResult<()> {
        let name = self.consume_identifier()?;
        if self.lookup_function(&name.lexeme).is_some() {
            return Err(FfiError::parse(
                name.line,
                format!("redefinition of function '{}'", name.lexeme),
            ));
        }

        self.consume(TokenKind::LeftParen, "(")?;
        let (params, variadic) = self.parse_params()?;
        self.consume(TokenKind::Semicolon, ";")?;

        let func = Rc::new(CFunc {
            name: name.lexeme.clone(),
            params,
            variadic,
            ret,
        });
        self.pending.functions.insert(name.lexeme, func);
        Ok(())
    }

    /// Parameter list up to and including `)`
    ///
    /// Array parameters decay to pointers; `(void)` means no parameters.
    fn parse_params(&mut self) -> FfiResult<(Vec<CTypeRef>, bool)> {
        let mut params = Vec::new();

        if self.match_token(TokenKind::RightParen) {
            return Ok((params, false));
        }
        if self.check(TokenKind::Primitive(Primitive::Void))
            && self.peek_next_kind() == Some(TokenKind::RightParen)
        {
            self.advance();
            self.advance();
            return Ok((params, false));
        }

        loop {
            if self.match_token(TokenKind::Ellipsis) {
                self.consume(TokenKind::RightParen, ")")?;
                return Ok((params, true));
            }

            let base = self.parse_base_type()?;
            let ty = self.parse_pointers(base);
            if self.check(TokenKind::Identifier) {
                self.advance();
            }
            let dims = self.parse_array_dims()?;
            if ty.is_void() {
                return Err(self.void_forbidden());
            }

            let ty = match dims.split_first() {
                Some((_, inner)) => {
                    let elem = self.apply_dims(&ty, inner)?;
                    self.decls.registry.pointer_to(&elem, false)
                }
                None => ty,
            };
            params.push(ty);

            if !self.match_token(TokenKind::Comma) {
                self.consume(TokenKind::RightParen, ")")?;
                return Ok((params, false));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::FfiResult;
    use crate::parser::Parser;
    use crate::registry::Declarations;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn cdef(decls: &mut Declarations, source: &str) -> FfiResult<()> {
        let pending = Parser::new(source, decls)?.parse_declarations()?;
        decls.commit(pending);
        Ok(())
    }

    fn signature(source: &str, name: &str) -> (Vec<String>, bool, String) {
        let mut decls = Declarations::new();
        cdef(&mut decls, source).unwrap();
        let func = decls.function(name).unwrap();
        (
            func.params().iter().map(|p| p.to_string()).collect(),
            func.is_variadic(),
            func.ret().to_string(),
        )
    }

    #[rstest]
    #[case("int abs(int);", "abs", vec!["int"], false, "int")]
    #[case("int printf(const char *fmt, ...);", "printf", vec!["const char *"], true, "int")]
    #[case("void srand(void);", "srand", vec![], false, "void")]
    #[case("char *strdup(const char *s);", "strdup", vec!["const char *"], false, "char *")]
    #[case("int sum(int xs[], int n);", "sum", vec!["int *", "int"], false, "int")]
    #[case("void grid(double m[4][4]);", "grid", vec!["double[4] *"], false, "void")]
    #[case("unsigned long long f(signed short, unsigned);", "f", vec!["short", "unsigned int"], false, "unsigned long long")]
    fn test_prototypes(
        #[case] source: &str,
        #[case] name: &str,
        #[case] params: Vec<&str>,
        #[case] variadic: bool,
        #[case] ret: &str,
    ) {
        let (got_params, got_variadic, got_ret) = signature(source, name);
        assert_eq!(got_params, params);
        assert_eq!(got_variadic, variadic);
        assert_eq!(got_ret, ret);
    }

    #[test]
    fn test_typedefs() {
        let mut decls = Declarations::new();
        cdef(
            &mut decls,
            "typedef struct { int x; } point_t, *point_ptr;\ntypedef char name_t[16];",
        )
        .unwrap();

        assert_eq!(decls.typedef("point_t").unwrap().to_string(), "struct");
        assert_eq!(decls.typedef("point_ptr").unwrap().to_string(), "struct *");
        assert_eq!(decls.typedef("name_t").unwrap().to_string(), "char[16]");
    }

    #[rstest]
    #[case("int f(int);\nint f(int);", "2:redefinition of function 'f'")]
    #[case("typedef int a;\ntypedef long a;", "2:redefinition of symbol 'a'")]
    #[case("int f(int, void);", "1:void type in forbidden context near 'void'")]
    #[case("int f(..., int);", "1:')' expected before ','")]
    #[case("int f(int)", "1:';' expected at end of input")]
    #[case("int (", "1:'identifier' expected before '('")]
    #[case("mystery f(void);", "1:unknown type name 'mystery'")]
    fn test_declaration_errors(#[case] source: &str, #[case] message: &str) {
        let mut decls = Declarations::new();
        let err = cdef(&mut decls, source).unwrap_err();
        assert_eq!(err.to_string(), message);
    }
}
