pub mod call;
pub mod check;
pub mod layout;

use anyhow::{anyhow, Context, Result};
use dynffi_runtime::Ffi;
use std::fs;
use std::path::Path;

/// Run the declarations in `path` through `ffi.cdef`
///
/// Parse errors are reported as `file:line:message`.
pub fn declare_file(ffi: &Ffi, path: &Path) -> Result<()> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read declaration file: {}", path.display()))?;
    ffi.cdef(&source)
        .map_err(|e| anyhow!("{}:{}", path.display(), e))
}
