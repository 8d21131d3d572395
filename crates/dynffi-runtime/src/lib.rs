//! dynffi runtime - dynamic C foreign function interface
//!
//! Declares C types and prototypes from C declaration text at runtime,
//! lays them out the way the platform compiler would, and calls native
//! functions through libffi:
//! - Lexing and parsing of C declarations (`cdef`)
//! - Canonical, interned type descriptions with libffi layouts
//! - Native-backed values with host-value marshaling
//! - Dynamic library loading and variadic-aware calls
//!
//! Everything hangs off one [`Ffi`] context; see [`runtime`].

/// dynffi runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cdata;
pub mod ctype;
pub mod error;
pub mod ffi;
pub mod layout;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod runtime;
pub mod token;
pub mod value;

pub use cdata::{CData, CDataRef, Finalizer};
pub use ctype::{CArray, CField, CFunc, CRecord, CType, CTypeKind, CTypeRef, Primitive};
pub use error::{FfiError, FfiResult};
pub use ffi::{Library, LibraryRef, LoadError, SymbolSource, SymbolTable};
pub use layout::Layout;
pub use lexer::Lexer;
pub use parser::Parser;
pub use registry::{Declarations, TypeRegistry};
pub use runtime::{Ffi, TypeSpec};
pub use token::{Token, TokenKind};
pub use value::{Value, ValueArray, ValueMap, ValueString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smoke() {
        assert_eq!(VERSION, "0.1.0");
    }
}
