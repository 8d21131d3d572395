//! Check command - parse a declaration file and list its functions

use anyhow::Result;
use dynffi_runtime::{CFunc, Ffi};
use std::path::Path;
use tracing::debug;

/// Declare everything in `file` and print each function's signature
pub fn run(ffi: &Ffi, file: &Path) -> Result<()> {
    super::declare_file(ffi, file)?;

    let names = ffi.function_names();
    debug!(functions = names.len(), types = ffi.type_count(), "declarations checked");

    println!("{}: {} function(s) declared", file.display(), names.len());
    for name in names {
        if let Some(func) = ffi.function(&name) {
            println!("  {}", signature(&func));
        }
    }
    Ok(())
}

/// `ret name(params, ...)` using canonical type text
pub fn signature(func: &CFunc) -> String {
    let mut params: Vec<String> = func.params().iter().map(|p| p.to_string()).collect();
    if func.is_variadic() {
        params.push("...".to_string());
    }
    if params.is_empty() {
        params.push("void".to_string());
    }
    format!("{} {}({})", func.ret(), func.name(), params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_check_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "int abs(int x);\nstruct point {{ int x, y; }};").unwrap();

        let ffi = Ffi::new();
        assert!(run(&ffi, file.path()).is_ok());
        assert!(ffi.function("abs").is_some());
    }

    #[test]
    fn test_check_reports_file_and_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "int ok(void);\nint broken(int;").unwrap();

        let err = run(&Ffi::new(), file.path()).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with(&file.path().display().to_string()));
        assert!(message.contains(":2:"), "{}", message);
    }

    #[test]
    fn test_check_missing_file() {
        assert!(run(&Ffi::new(), Path::new("nonexistent.h")).is_err());
    }

    #[test]
    fn test_signature_text() {
        let ffi = Ffi::new();
        ffi.cdef("int printf(const char *fmt, ...);\nvoid abort(void);")
            .unwrap();
        assert_eq!(
            signature(&ffi.function("printf").unwrap()),
            "int printf(const char *, ...)"
        );
        assert_eq!(signature(&ffi.function("abort").unwrap()), "void abort(void)");
    }
}
