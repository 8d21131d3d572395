//! Struct and union definitions

use crate::ctype::{CRecord, CTypeRef};
use crate::error::{FfiError, FfiResult};
use crate::layout;
use crate::parser::Parser;
use crate::token::TokenKind;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::trace;

impl Parser<'_> {
    /// Parse `struct|union name? { members }` or a reference `struct name`
    pub(super) fn parse_record(&mut self, is_union: bool) -> FfiResult<Rc<CRecord>> {
        self.advance();
        let name = if self.check(TokenKind::Identifier) {
            self.advance()
        } else {
            None
        };

        if !self.check(TokenKind::LeftBrace) {
            let Some(name) = name else {
                return Err(self.expected("identifier"));
            };
            let record = self.lookup_record(&name.lexeme).ok_or_else(|| {
                FfiError::parse(name.line, format!("undeclared symbol '{}'", name.lexeme))
            })?;
            if record.is_union() != is_union {
                return Err(FfiError::parse(
                    name.line,
                    format!("'{}' defined as wrong kind of tag", name.lexeme),
                ));
            }
            return Ok(record);
        }

        if let Some(name) = &name {
            if self.lookup_record(&name.lexeme).is_some() {
                return Err(FfiError::parse(
                    name.line,
                    format!("redefinition of symbol '{}'", name.lexeme),
                ));
            }
        }

        self.advance();
        let members = self.parse_members(is_union)?;
        let laid = if is_union {
            layout::union(members)?
        } else {
            layout::structure(members)?
        };

        let record = Rc::new(CRecord {
            name: name.map(|t| t.lexeme),
            is_union,
            fields: laid.fields,
            layout: laid.layout,
            sized: laid.sized,
            ffi: laid.ffi,
        });
        trace!(
            name = record.name().unwrap_or("<anonymous>"),
            size = record.layout.size,
            align = record.layout.align,
            "laid out record"
        );

        if let Some(name) = &record.name {
            self.pending.records.insert(name.clone(), record.clone());
        }
        Ok(record)
    }

    /// Parse members up to and including the closing brace
    fn parse_members(&mut self, is_union: bool) -> FfiResult<Vec<(String, CTypeRef)>> {
        let mut members: Vec<(String, CTypeRef)> = Vec::new();
        let mut names: HashSet<String> = HashSet::new();

        loop {
            if self.match_token(TokenKind::RightBrace) {
                break;
            }
            if self.is_at_end() {
                return Err(self.expected("}"));
            }

            let starts_record = self.check(TokenKind::Struct) || self.check(TokenKind::Union);
            let base = self.parse_base_type()?;

            if starts_record && self.match_token(TokenKind::Semicolon) {
                // `struct { ... };` inside a record is an anonymous member;
                // a named one only declares its tag
                if let Some(record) = base.as_record().filter(|r| r.is_anonymous()) {
                    for inner in reachable_names(record) {
                        if !names.insert(inner.clone()) {
                            return Err(self.error(format!("duplicate member '{}'", inner)));
                        }
                    }
                    members.push((String::new(), base.clone()));
                }
                continue;
            }

            loop {
                let ty = self.parse_pointers(base.clone());
                let name = self.consume_identifier()?;
                let dims = self.parse_array_dims()?;
                if ty.is_void() {
                    return Err(self.error(format!(
                        "void type in forbidden context near '{}'",
                        name.lexeme
                    )));
                }
                let ty = self.apply_dims(&ty, &dims)?;

                if !names.insert(name.lexeme.clone()) {
                    return Err(FfiError::parse(
                        name.line,
                        format!("duplicate member '{}'", name.lexeme),
                    ));
                }
                members.push((name.lexeme, ty));

                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::Semicolon, ";")?;
        }

        if !is_union {
            let last = members.len().saturating_sub(1);
            if let Some((name, _)) = members
                .iter()
                .enumerate()
                .find(|(i, (_, ty))| *i != last && !ty.is_sized())
                .map(|(_, m)| m)
            {
                return Err(self.error(format!(
                    "flexible array member '{}' not at end of struct",
                    name
                )));
            }
        }

        Ok(members)
    }
}

/// Member names visible through a record, including those of anonymous members
fn reachable_names(record: &CRecord) -> Vec<String> {
    let mut names = Vec::new();
    for field in record.fields() {
        if field.is_anonymous() {
            if let Some(inner) = field.ty.as_record() {
                names.extend(reachable_names(inner));
            }
        } else {
            names.push(field.name.clone());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use crate::error::FfiResult;
    use crate::parser::Parser;
    use crate::registry::Declarations;
    use pretty_assertions::assert_eq;

    fn cdef(decls: &mut Declarations, source: &str) -> FfiResult<()> {
        let pending = Parser::new(source, decls)?.parse_declarations()?;
        decls.commit(pending);
        Ok(())
    }

    fn cdef_err(source: &str) -> String {
        let mut decls = Declarations::new();
        cdef(&mut decls, source).unwrap_err().to_string()
    }

    #[test]
    fn test_struct_fields_and_offsets() {
        let mut decls = Declarations::new();
        cdef(&mut decls, "struct point { int x; int y; char tag; };").unwrap();

        let record = decls.record("point").unwrap();
        let fields: Vec<(&str, usize)> = record
            .fields()
            .iter()
            .map(|f| (f.name.as_str(), f.offset))
            .collect();
        assert_eq!(fields, vec![("x", 0), ("y", 4), ("tag", 8)]);
        assert_eq!(record.layout().size, 12);
    }

    #[test]
    fn test_anonymous_member_lookup() {
        let mut decls = Declarations::new();
        cdef(
            &mut decls,
            "struct value { int kind; union { int i; double d; }; };",
        )
        .unwrap();

        let record = decls.record("value").unwrap();
        let (field, offset) = record.find_field("d").unwrap();
        assert_eq!(field.ty.to_string(), "double");
        assert_eq!(offset, 8);
        assert_eq!(record.layout().size, 16);
    }

    #[test]
    fn test_flexible_member() {
        let mut decls = Declarations::new();
        cdef(&mut decls, "struct student { int age; char name[0]; };").unwrap();

        let record = decls.record("student").unwrap();
        assert_eq!(record.layout().size, 4);
        let (field, offset) = record.find_field("name").unwrap();
        assert_eq!(offset, 4);
        assert!(field.is_flexible());
        assert!(record.flexible_tail().is_some());
    }

    #[test]
    fn test_comma_declarators() {
        let mut decls = Declarations::new();
        cdef(&mut decls, "struct s { int a, *b, c[2]; };").unwrap();

        let types: Vec<String> = decls
            .record("s")
            .unwrap()
            .fields()
            .iter()
            .map(|f| f.ty.to_string())
            .collect();
        assert_eq!(types, vec!["int", "int *", "int[2]"]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            cdef_err("struct s { int a; int a; };"),
            "1:duplicate member 'a'"
        );
        assert_eq!(
            cdef_err("struct s { int a; };\nstruct s { int b; };"),
            "2:redefinition of symbol 's'"
        );
        assert_eq!(cdef_err("struct s { void v; };"), "1:void type in forbidden context near 'v'");
        assert_eq!(cdef_err("struct t { struct missing m; };"), "1:undeclared symbol 'missing'");
        assert_eq!(cdef_err("struct s { int a[-1]; };"), "1:size of array is negative");
        assert_eq!(
            cdef_err("struct s { char name[0]; int after; };"),
            "1:flexible array member 'name' not at end of struct"
        );
        assert_eq!(cdef_err("struct s { int a };"), "1:';' expected before '}'");
    }

    #[test]
    fn test_union_of_only_flexible_members_is_unsized() {
        let mut decls = Declarations::new();
        cdef(&mut decls, "union u { char a[0]; int b[0]; };").unwrap();
        let record = decls.record("u").unwrap();
        assert!(!record.sized);
        assert_eq!(record.layout().size, 0);
    }
}
