//! Call command - resolve a declared function and invoke it

use anyhow::{Context, Result};
use dynffi_runtime::{CDataRef, Ffi, Primitive, Value};
use std::path::PathBuf;
use tracing::info;

/// Arguments for `dynffi call`
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub name: String,
    pub args: Vec<String>,
    pub decl: PathBuf,
    /// Library path or short name; `None` uses the running process
    pub lib: Option<String>,
}

pub fn run(ffi: &Ffi, args: CallArgs) -> Result<()> {
    super::declare_file(ffi, &args.decl)?;

    let library = match &args.lib {
        Some(name) => ffi
            .load(name, None)
            .with_context(|| format!("Failed to load library '{}'", name))?,
        None => ffi.default_library(),
    };
    let func = library.get(ffi, &args.name)?;

    let values: Vec<Value> = args.args.iter().map(|arg| parse_arg(arg)).collect();
    info!(function = %args.name, args = values.len(), "calling");
    let result = func.call(&values)?;

    println!("{}", render(ffi, result));
    Ok(())
}

/// Read a command line argument as the closest host value
pub fn parse_arg(arg: &str) -> Value {
    match arg {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(i) = arg.parse::<i64>() {
                Value::Integer(i)
            } else if let Ok(n) = arg.parse::<f64>() {
                Value::Number(n)
            } else {
                Value::string(arg)
            }
        }
    }
}

/// Text for a call result; `char *` results print as strings
fn render(ffi: &Ffi, result: Option<Value>) -> String {
    match result {
        None => "void".to_string(),
        Some(Value::CData(cd)) if is_char_pointer(&cd) => match ffi.string(&cd, None) {
            Ok(Value::String(s)) => s.to_string_lossy(),
            Ok(other) => other.to_string(),
            Err(_) => cd.to_string(),
        },
        Some(value) => value.to_string(),
    }
}

fn is_char_pointer(cd: &CDataRef) -> bool {
    matches!(
        cd.ctype().pointee().and_then(|p| p.as_primitive()),
        Some(Primitive::Char | Primitive::UChar)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("42"), Value::Integer(42));
        assert_eq!(parse_arg("-7"), Value::Integer(-7));
        assert_eq!(parse_arg("2.5"), Value::Number(2.5));
        assert_eq!(parse_arg("nil"), Value::Nil);
        assert_eq!(parse_arg("true"), Value::Bool(true));
        assert_eq!(parse_arg("hello"), Value::string("hello"));
    }

    #[test]
    fn test_render_results() {
        let ffi = Ffi::new();
        assert_eq!(render(&ffi, None), "void");
        assert_eq!(render(&ffi, Some(Value::Integer(5))), "5");

        let text = ffi
            .new_cdata("char[6]", None, &[Value::string("hello")])
            .unwrap();
        let ptr = ffi.cast("const char *", &Value::CData(text.clone())).unwrap();
        assert_eq!(render(&ffi, Some(Value::CData(ptr))), "hello");
    }

    #[test]
    fn test_call_libc() {
        let mut decl = NamedTempFile::new().unwrap();
        writeln!(decl, "int abs(int x);").unwrap();
        let args = CallArgs {
            name: "abs".to_string(),
            args: vec!["-3".to_string()],
            decl: decl.path().to_path_buf(),
            lib: None,
        };
        assert!(run(&Ffi::new(), args).is_ok());
    }

    #[test]
    fn test_call_undeclared() {
        let mut decl = NamedTempFile::new().unwrap();
        writeln!(decl, "int abs(int x);").unwrap();
        let args = CallArgs {
            name: "labs".to_string(),
            args: vec![],
            decl: decl.path().to_path_buf(),
            lib: None,
        };
        let err = run(&Ffi::new(), args).unwrap_err();
        assert_eq!(err.to_string(), "missing declaration for function 'labs'");
    }
}
