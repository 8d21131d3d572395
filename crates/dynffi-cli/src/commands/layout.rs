//! Layout queries: `sizeof` and `offsetof`

use anyhow::{bail, Result};
use dynffi_runtime::Ffi;
use std::path::Path;

/// Print `sizeof(ty)`, or `variable-length` for open arrays
pub fn sizeof(ffi: &Ffi, ty: &str, decl: Option<&Path>) -> Result<()> {
    if let Some(decl) = decl {
        super::declare_file(ffi, decl)?;
    }
    match ffi.size_of(ty)? {
        Some(size) => println!("{}", size),
        None => println!("variable-length"),
    }
    Ok(())
}

/// Print the byte offset of `field` within record `ty`
pub fn offsetof(ffi: &Ffi, ty: &str, field: &str, decl: Option<&Path>) -> Result<()> {
    if let Some(decl) = decl {
        super::declare_file(ffi, decl)?;
    }
    let ctype = ffi.type_of(ty)?;
    if ctype.as_record().is_none() {
        bail!("'{}' is not a struct or union", ctype);
    }
    match ffi.offset_of(&ctype, field)? {
        Some(offset) => println!("{}", offset),
        None => bail!("'{}' has no member named '{}'", ctype, field),
    }
    Ok(())
}
