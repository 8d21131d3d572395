//! Shared test helpers for the dynffi runtime integration tests

#![allow(dead_code)]

use dynffi_runtime::{CDataRef, Ffi, LibraryRef, SymbolTable, Value};
use std::os::raw::{c_int, c_void};

/// Context with `source` already declared
pub fn ffi_with(source: &str) -> Ffi {
    let ffi = Ffi::new();
    ffi.cdef(source)
        .unwrap_or_else(|e| panic!("cdef failed: {}\n{}", e, source));
    ffi
}

/// Read `cd[key]`, panicking on error
pub fn get(cd: &CDataRef, key: impl Into<Value>) -> Value {
    cd.index(&key.into())
        .unwrap_or_else(|e| panic!("index failed: {}", e))
}

/// Read `cd[key]` as a cdata view
pub fn view(cd: &CDataRef, key: impl Into<Value>) -> CDataRef {
    match get(cd, key) {
        Value::CData(child) => child,
        other => panic!("Expected cdata, got {:?}", other),
    }
}

// ===== Native functions exported through an in-memory library =====

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Point {
    pub x: c_int,
    pub y: c_int,
}

pub extern "C" fn add(a: c_int, b: c_int) -> c_int {
    a + b
}

pub extern "C" fn point_sum(p: Point) -> c_int {
    p.x + p.y
}

pub extern "C" fn point_make(x: c_int, y: c_int) -> Point {
    Point { x, y }
}

pub extern "C" fn point_scale(p: *mut Point, k: c_int) {
    // SAFETY: tests pass a valid struct point *
    unsafe {
        (*p).x *= k;
        (*p).y *= k;
    }
}

pub extern "C" fn is_positive(x: f64) -> bool {
    x > 0.0
}

pub extern "C" fn first_byte(s: *const u8) -> c_int {
    if s.is_null() {
        -1
    } else {
        // SAFETY: tests pass NUL-terminated strings
        unsafe { *s as c_int }
    }
}

pub extern "C" fn sum_ints(xs: *const c_int, n: c_int) -> i64 {
    // SAFETY: tests pass `n` readable ints
    unsafe { std::slice::from_raw_parts(xs, n as usize) }
        .iter()
        .map(|x| *x as i64)
        .sum()
}

/// Declarations matching the functions in [`test_library`]
pub const TEST_DECLS: &str = r#"
    struct point { int x; int y; };
    int add(int a, int b);
    int point_sum(struct point p);
    struct point point_make(int x, int y);
    void point_scale(struct point *p, int k);
    bool is_positive(double x);
    int first_byte(const char *s);
    int64_t sum_ints(const int *xs, int n);
"#;

/// Library exporting the `extern "C"` test functions
pub fn test_library(ffi: &Ffi) -> LibraryRef {
    let table = SymbolTable::new()
        .with("add", add as *const c_void)
        .with("point_sum", point_sum as *const c_void)
        .with("point_make", point_make as *const c_void)
        .with("point_scale", point_scale as *const c_void)
        .with("is_positive", is_positive as *const c_void)
        .with("first_byte", first_byte as *const c_void)
        .with("sum_ints", sum_ints as *const c_void);
    ffi.register_library(table)
}
