//! Library handles, symbol resolution and module loading

mod common;

use common::*;
use dynffi_config::FfiConfig;
use dynffi_runtime::{Ffi, FfiError, SymbolTable, Value};
use pretty_assertions::assert_eq;
use std::os::raw::c_void;
use std::path::PathBuf;
use std::rc::Rc;

#[test]
fn test_missing_declaration() {
    let ffi = Ffi::new();
    let err = ffi.default_library().get(&ffi, "strlen").unwrap_err();
    assert!(matches!(err, FfiError::Resource(_)));
    assert_eq!(err.to_string(), "missing declaration for function 'strlen'");
}

#[test]
fn test_undefined_function() {
    let ffi = ffi_with("int definitely_not_exported_xyz(void);");
    let err = ffi
        .default_library()
        .get(&ffi, "definitely_not_exported_xyz")
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "undefined function 'definitely_not_exported_xyz'"
    );
}

#[test]
fn test_functions_are_memoized_per_library() {
    let ffi = ffi_with(TEST_DECLS);
    let lib = test_library(&ffi);
    assert_eq!(lib.cached_count(), 0);

    let first = lib.get(&ffi, "add").unwrap();
    let second = lib.get(&ffi, "add").unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(lib.cached_count(), 1);

    // Another handle resolves its own copy
    let other = test_library(&ffi);
    let third = other.get(&ffi, "add").unwrap();
    assert!(!Rc::ptr_eq(&first, &third));
    assert_eq!(first.address(), third.address());
}

#[test]
fn test_function_cdata() {
    let ffi = ffi_with(TEST_DECLS);
    let add = test_library(&ffi).get(&ffi, "add").unwrap();
    assert_eq!(add.ctype().to_string(), "int (int,int)");
    assert!(!add.address().is_null());
    assert!(ffi.is_type(&add, &Value::CData(add.clone())).unwrap());
}

#[test]
fn test_raw_symbol_lookup() {
    let ffi = Ffi::new();
    let libc = ffi.default_library();
    assert!(libc.symbol("strlen").is_some());
    assert!(libc.symbol("no_such_symbol_xyz").is_none());
}

#[test]
fn test_library_display() {
    let ffi = Ffi::new();
    assert_eq!(ffi.default_library().to_string(), "library: default");

    let table = SymbolTable::new().with("nothing", std::ptr::null::<c_void>());
    let lib = ffi.register_library(table);
    assert!(lib.to_string().starts_with("library: 0x"));
    assert_eq!(Value::Library(lib).type_name(), "library");
}

#[test]
fn test_load_missing_library() {
    let ffi = Ffi::new();
    let err = ffi.load("no_such_library_xyz", None).unwrap_err();
    assert!(matches!(err, FfiError::Resource(_)));
    assert!(err.to_string().contains("no_such_library_xyz"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_load_system_library() {
    let ffi = ffi_with("double cos(double x);");
    let libm = ffi.load("libm.so.6", Some(false)).unwrap();
    assert!(libm.to_string().starts_with("library: 0x"));

    let cos = libm.get(&ffi, "cos").unwrap();
    assert_eq!(cos.call(&[Value::Number(0.0)]).unwrap(), Some(Value::Number(1.0)));
}

#[test]
fn test_config_search_paths_come_first() {
    let config = FfiConfig::parse(
        r#"
        [library]
        search_paths = ["/opt/first", "/opt/second"]
        global = true
        "#,
    )
    .unwrap();
    let ffi = Ffi::with_config(&config);
    assert_eq!(
        &ffi.search_paths()[..2],
        &[PathBuf::from("/opt/first"), PathBuf::from("/opt/second")]
    );
}
