//! Record layout against the platform's `repr(C)` layout

mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::mem::{align_of, size_of, MaybeUninit};
use std::os::raw::{c_char, c_double, c_int, c_long, c_short, c_void};

/// Byte offset of `$field` within `$ty`
macro_rules! field_offset {
    ($ty:ty, $field:ident) => {{
        let value = MaybeUninit::<$ty>::uninit();
        let base = value.as_ptr();
        // SAFETY: only the address is taken, nothing is read
        let field = unsafe { std::ptr::addr_of!((*base).$field) };
        field as usize - base as usize
    }};
}

#[repr(C)]
struct Mixed {
    c: c_char,
    d: c_double,
    s: c_short,
    p: *mut c_void,
    i: c_int,
}

#[repr(C)]
struct Packed {
    a: c_char,
    b: c_char,
    s: c_short,
    i: c_int,
}

#[repr(C)]
struct Nested {
    tag: c_char,
    inner: Mixed,
    tail: [c_short; 3],
}

#[repr(C)]
struct WithTail {
    len: c_long,
    flag: c_char,
    data: [c_int; 0],
}

#[test]
fn test_mixed_struct_layout() {
    let ffi = ffi_with("struct mixed { char c; double d; short s; void *p; int i; };");
    let ty = "struct mixed";

    assert_eq!(ffi.size_of(ty).unwrap(), Some(size_of::<Mixed>()));
    assert_eq!(ffi.type_of(ty).unwrap().align(), align_of::<Mixed>());
    assert_eq!(ffi.offset_of(ty, "c").unwrap(), Some(field_offset!(Mixed, c)));
    assert_eq!(ffi.offset_of(ty, "d").unwrap(), Some(field_offset!(Mixed, d)));
    assert_eq!(ffi.offset_of(ty, "s").unwrap(), Some(field_offset!(Mixed, s)));
    assert_eq!(ffi.offset_of(ty, "p").unwrap(), Some(field_offset!(Mixed, p)));
    assert_eq!(ffi.offset_of(ty, "i").unwrap(), Some(field_offset!(Mixed, i)));
}

#[test]
fn test_tightly_ordered_struct() {
    let ffi = ffi_with("struct packed { char a, b; short s; int i; };");
    assert_eq!(ffi.size_of("struct packed").unwrap(), Some(size_of::<Packed>()));
    assert_eq!(
        ffi.offset_of("struct packed", "b").unwrap(),
        Some(field_offset!(Packed, b))
    );
    assert_eq!(
        ffi.offset_of("struct packed", "i").unwrap(),
        Some(field_offset!(Packed, i))
    );
}

#[test]
fn test_nested_struct_and_array_member() {
    let ffi = ffi_with(
        r#"
        struct mixed { char c; double d; short s; void *p; int i; };
        struct nested { char tag; struct mixed inner; short tail[3]; };
        "#,
    );
    assert_eq!(ffi.size_of("struct nested").unwrap(), Some(size_of::<Nested>()));
    assert_eq!(
        ffi.offset_of("struct nested", "inner").unwrap(),
        Some(field_offset!(Nested, inner))
    );
    assert_eq!(
        ffi.offset_of("struct nested", "tail").unwrap(),
        Some(field_offset!(Nested, tail))
    );
}

#[test]
fn test_trailing_flexible_array() {
    let ffi = ffi_with("struct with_tail { long len; char flag; int data[]; };");
    assert_eq!(ffi.size_of("struct with_tail").unwrap(), Some(size_of::<WithTail>()));
    assert_eq!(
        ffi.offset_of("struct with_tail", "data").unwrap(),
        Some(field_offset!(WithTail, data))
    );
    assert_eq!(ffi.size_of("int[?]").unwrap(), None);
}

#[test]
fn test_union_layout() {
    let ffi = ffi_with("union num { char c; double d; int i[3]; };");
    let ty = ffi.type_of("union num").unwrap();
    // 12 bytes of ints rounded up to the double's alignment
    assert_eq!(ty.size(), 16);
    assert_eq!(ty.align(), align_of::<c_double>());
    for field in ["c", "d", "i"] {
        assert_eq!(ffi.offset_of("union num", field).unwrap(), Some(0));
    }
}

#[test]
fn test_primitive_sizes_follow_libc() {
    let ffi = ffi_with("");
    let cases = [
        ("char", size_of::<c_char>()),
        ("short", size_of::<c_short>()),
        ("long", size_of::<c_long>()),
        ("size_t", size_of::<libc::size_t>()),
        ("off_t", size_of::<libc::off_t>()),
        ("time_t", size_of::<libc::time_t>()),
        ("pid_t", size_of::<libc::pid_t>()),
        ("void *", size_of::<*const c_void>()),
        ("bool", 1),
        ("int64_t", 8),
    ];
    for (ty, size) in cases {
        assert_eq!(ffi.size_of(ty).unwrap(), Some(size), "sizeof({})", ty);
    }
}
