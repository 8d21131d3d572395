//! Type marshaling - host values ↔ native memory
//!
//! - `MarshalContext::write()`: store a host value into typed native memory
//! - [`read()`]: decode typed native memory into a host value
//!
//! Aggregates and pointers read back as views (cdata borrowing the memory)
//! rather than copies, so writes through the view reach the original bytes.
//!
//! # Memory Safety
//!
//! - Strings written as pointers are anchored in the `MarshalContext`; the
//!   caller moves the anchors onto whatever keeps the memory alive
//! - All accesses are unaligned-tolerant
//! - Declared sizes are trusted: destinations must be large enough for the type

use crate::cdata::{CData, CDataRef};
use crate::ctype::{CTypeKind, CTypeRef, Primitive, Scalar};
use crate::error::{FfiError, FfiResult};
use crate::value::{Value, ValueMap};
use std::os::raw::c_void;
use std::ptr;

/// How strictly a write converts between kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Assignment, initialization and argument passing
    Implicit,
    /// Explicit cast: numbers and pointers convert freely
    Cast,
}

/// A number moved through a scalar slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_i64(self) -> i64 {
        match self {
            Number::Int(i) => i,
            Number::Float(f) => f as i64,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            Number::Float(f) => f == 0.0,
        }
    }
}

/// Store `n` into `dest` with the representation of `scalar`
///
/// # Safety
/// `dest` must be valid for `scalar.size()` bytes.
pub(crate) unsafe fn write_scalar(scalar: Scalar, dest: *mut u8, n: Number) {
    match scalar {
        Scalar::I8 => ptr::write_unaligned(dest as *mut i8, n.as_i64() as i8),
        Scalar::U8 => ptr::write_unaligned(dest, n.as_i64() as u8),
        Scalar::I16 => ptr::write_unaligned(dest as *mut i16, n.as_i64() as i16),
        Scalar::U16 => ptr::write_unaligned(dest as *mut u16, n.as_i64() as u16),
        Scalar::I32 => ptr::write_unaligned(dest as *mut i32, n.as_i64() as i32),
        Scalar::U32 => ptr::write_unaligned(dest as *mut u32, n.as_i64() as u32),
        Scalar::I64 => ptr::write_unaligned(dest as *mut i64, n.as_i64()),
        Scalar::U64 => ptr::write_unaligned(dest as *mut u64, n.as_i64() as u64),
        Scalar::F32 => ptr::write_unaligned(dest as *mut f32, n.as_f64() as f32),
        Scalar::F64 => ptr::write_unaligned(dest as *mut f64, n.as_f64()),
    }
}

/// Load a scalar; unsigned 64-bit values keep their bit pattern
///
/// # Safety
/// `src` must be valid for `scalar.size()` bytes.
pub(crate) unsafe fn read_scalar(scalar: Scalar, src: *const u8) -> Number {
    match scalar {
        Scalar::I8 => Number::Int(ptr::read_unaligned(src as *const i8) as i64),
        Scalar::U8 => Number::Int(ptr::read_unaligned(src) as i64),
        Scalar::I16 => Number::Int(ptr::read_unaligned(src as *const i16) as i64),
        Scalar::U16 => Number::Int(ptr::read_unaligned(src as *const u16) as i64),
        Scalar::I32 => Number::Int(ptr::read_unaligned(src as *const i32) as i64),
        Scalar::U32 => Number::Int(ptr::read_unaligned(src as *const u32) as i64),
        Scalar::I64 => Number::Int(ptr::read_unaligned(src as *const i64)),
        Scalar::U64 => Number::Int(ptr::read_unaligned(src as *const u64) as i64),
        Scalar::F32 => Number::Float(ptr::read_unaligned(src as *const f32) as f64),
        Scalar::F64 => Number::Float(ptr::read_unaligned(src as *const f64)),
    }
}

/// Store a number into a primitive slot; bools are normalized to 0/1
///
/// # Safety
/// `dest` must be valid for the primitive's size.
pub(crate) unsafe fn write_number(p: Primitive, dest: *mut u8, n: Number) {
    let Some(scalar) = p.scalar() else {
        return;
    };
    if p == Primitive::Bool {
        ptr::write_unaligned(dest, u8::from(!n.is_zero()));
    } else {
        write_scalar(scalar, dest, n);
    }
}

/// Decode a primitive slot into a host value
///
/// # Safety
/// `src` must be valid for the primitive's size.
pub(crate) unsafe fn read_primitive(p: Primitive, src: *const u8) -> Value {
    let Some(scalar) = p.scalar() else {
        return Value::Nil;
    };
    match read_scalar(scalar, src) {
        Number::Int(i) if p == Primitive::Bool => Value::Bool(i != 0),
        Number::Int(i) => Value::Integer(i),
        Number::Float(f) => Value::Number(f),
    }
}

/// # Safety
/// `src` must be valid for a pointer-sized read.
pub(crate) unsafe fn read_pointer(src: *const u8) -> *mut c_void {
    ptr::read_unaligned(src as *const *mut c_void)
}

/// # Safety
/// `dest` must be valid for a pointer-sized write.
pub(crate) unsafe fn write_pointer(dest: *mut u8, value: *const c_void) {
    ptr::write_unaligned(dest as *mut *const c_void, value)
}

/// Decode typed memory into a host value
///
/// Numerics are copied out; records, arrays, pointers and functions become
/// cdata views of `src` kept alive through `owner`.
///
/// # Safety
/// `src` must be valid for the type's size and outlive `owner`.
pub(crate) unsafe fn read(ty: &CTypeRef, src: *mut u8, owner: Option<&CDataRef>) -> Value {
    match &ty.kind {
        CTypeKind::Primitive(p) => read_primitive(*p, src),
        _ => Value::CData(CData::borrowed(ty.clone(), src, owner.cloned())),
    }
}

/// Store a host number into a numeric slot, or into a pointer when casting
///
/// Returns false when the target cannot hold a number.
///
/// # Safety
/// `dest` must be valid for `ty.size()` bytes.
unsafe fn store_number(ty: &CTypeRef, dest: *mut u8, n: Number, mode: Coercion) -> bool {
    match &ty.kind {
        CTypeKind::Primitive(p) => {
            write_number(*p, dest, n);
            true
        }
        CTypeKind::Pointer(_) if mode == Coercion::Cast => {
            write_pointer(dest, n.as_i64() as usize as *const c_void);
            true
        }
        _ => false,
    }
}

/// Host-value describer for conversion errors
fn describe(value: &Value) -> String {
    match value {
        Value::CData(cd) => cd.ctype().to_string(),
        other => other.type_name().to_string(),
    }
}

fn is_byte_like(ty: &CTypeRef) -> bool {
    matches!(
        ty.as_primitive(),
        Some(Primitive::Char | Primitive::UChar | Primitive::Int8 | Primitive::UInt8)
    )
}

/// Pointer conversion rule: exact pointee, added const, or void on either side
fn pointee_compatible(target: &CTypeRef, source: &CTypeRef) -> bool {
    target.is_void()
        || source.is_void()
        || **target == **source
        || (target.is_const() && target.same_unqualified(source))
}

/// Marshal context for host → native writes
///
/// Collects the host values that written pointers refer to (string bytes,
/// source cdata) so the caller can keep them alive as long as the memory.
#[derive(Default)]
pub struct MarshalContext {
    anchors: Vec<Value>,
}

impl MarshalContext {
    /// Create a new marshal context
    pub fn new() -> Self {
        Self::default()
    }

    /// Values that must outlive the memory written through this context
    pub fn into_anchors(self) -> Vec<Value> {
        self.anchors
    }

    /// Store `value` into memory of type `ty` at `dest`
    ///
    /// Flexible arrays reached by this write receive nothing.
    ///
    /// # Safety
    /// `dest` must be valid for `ty.size()` bytes.
    pub unsafe fn write(
        &mut self,
        ty: &CTypeRef,
        dest: *mut u8,
        value: &Value,
        mode: Coercion,
    ) -> FfiResult<()> {
        self.write_within(ty, dest, ty.size(), value, mode)
    }

    /// Store `value` at `dest`, which has `room` bytes available
    ///
    /// A flexible array takes as many elements as fit in the room left at
    /// its offset; strings and tables beyond that are truncated.
    ///
    /// # Safety
    /// `dest` must be valid for `ty.size().max(room)` bytes.
    pub unsafe fn write_within(
        &mut self,
        ty: &CTypeRef,
        dest: *mut u8,
        room: usize,
        value: &Value,
        mode: Coercion,
    ) -> FfiResult<()> {
        match &ty.kind {
            CTypeKind::Function(_) => return Err(FfiError::type_error("invalid C type")),
            CTypeKind::Primitive(Primitive::Void) => {
                return Err(FfiError::type_error("invalid C type"))
            }
            CTypeKind::Array(_) | CTypeKind::Record(_) if mode == Coercion::Cast => {
                return Err(FfiError::type_error("invalid C type"))
            }
            _ => {}
        }

        let fail = || FfiError::convert(describe(value), ty);

        match value {
            Value::Nil => match &ty.kind {
                CTypeKind::Pointer(_) => write_pointer(dest, ptr::null()),
                _ => return Err(fail()),
            },
            Value::Bool(b) => {
                if !store_number(ty, dest, Number::Int(i64::from(*b)), mode) {
                    return Err(fail());
                }
            }
            Value::Integer(i) => {
                if !store_number(ty, dest, Number::Int(*i), mode) {
                    return Err(fail());
                }
            }
            Value::Number(f) => {
                if !store_number(ty, dest, Number::Float(*f), mode) {
                    return Err(fail());
                }
            }
            Value::String(s) => match &ty.kind {
                CTypeKind::Pointer(pointee)
                    if mode == Coercion::Cast || pointee.is_void() || is_byte_like(pointee) =>
                {
                    write_pointer(dest, s.as_ptr() as *const c_void);
                    self.anchors.push(value.clone());
                }
                CTypeKind::Array(arr) if is_byte_like(&arr.elem) => {
                    let bytes = s.as_bytes_with_nul();
                    let count = if arr.is_flexible() {
                        bytes.len().min(room)
                    } else {
                        bytes.len().min(arr.len)
                    };
                    ptr::copy_nonoverlapping(bytes.as_ptr(), dest, count);
                }
                _ => return Err(fail()),
            },
            Value::Handle(h) => match &ty.kind {
                CTypeKind::Pointer(_) => write_pointer(dest, *h),
                _ => return Err(fail()),
            },
            Value::CData(cd) => self.write_cdata(ty, dest, cd, mode)?,
            Value::Array(items) => match &ty.kind {
                CTypeKind::Array(arr) => {
                    let stride = arr.elem.size();
                    let cap = if arr.is_flexible() {
                        room / stride.max(1)
                    } else {
                        arr.len
                    };
                    for (i, item) in items.iter().take(cap).enumerate() {
                        if item.is_nil() {
                            break;
                        }
                        self.write(&arr.elem, dest.add(i * stride), item, mode)?;
                    }
                }
                CTypeKind::Record(rec) => {
                    for (field, item) in rec.fields.iter().zip(items.iter()) {
                        if !item.is_nil() {
                            let slot = dest.add(field.offset);
                            let left = room.saturating_sub(field.offset);
                            self.write_within(&field.ty, slot, left, item, mode)?;
                        }
                    }
                }
                _ => return Err(fail()),
            },
            Value::Map(entries) => match &ty.kind {
                CTypeKind::Record(_) => self.write_named(ty, dest, room, entries, mode)?,
                CTypeKind::Array(_) => {}
                _ => return Err(fail()),
            },
            Value::CType(_) | Value::Library(_) => return Err(fail()),
        }
        Ok(())
    }

    /// Fill record fields from a name-keyed table; anonymous members draw
    /// from the same table
    unsafe fn write_named(
        &mut self,
        ty: &CTypeRef,
        dest: *mut u8,
        room: usize,
        entries: &ValueMap,
        mode: Coercion,
    ) -> FfiResult<()> {
        let Some(rec) = ty.as_record() else {
            return Ok(());
        };
        for field in &rec.fields {
            let slot = dest.add(field.offset);
            let left = room.saturating_sub(field.offset);
            if field.is_anonymous() {
                self.write_named(&field.ty, slot, left, entries, mode)?;
            } else if let Some(item) = entries.get(&field.name) {
                if !item.is_nil() {
                    self.write_within(&field.ty, slot, left, item, mode)?;
                }
            }
        }
        Ok(())
    }

    unsafe fn write_cdata(
        &mut self,
        ty: &CTypeRef,
        dest: *mut u8,
        cd: &CDataRef,
        mode: Coercion,
    ) -> FfiResult<()> {
        let fail = || FfiError::convert(cd.ctype(), ty);
        let source = cd.ctype();

        match &source.kind {
            CTypeKind::Array(_) | CTypeKind::Pointer(_) | CTypeKind::Function(_) => {
                let source_pointee = match &source.kind {
                    CTypeKind::Array(arr) => arr.elem.clone(),
                    CTypeKind::Pointer(p) => p.clone(),
                    _ => source.clone(),
                };
                let address = cd.address();
                match &ty.kind {
                    CTypeKind::Pointer(target)
                        if mode == Coercion::Cast || pointee_compatible(target, &source_pointee) =>
                    {
                        write_pointer(dest, address);
                    }
                    CTypeKind::Primitive(p) if mode == Coercion::Cast && p.is_integer() => {
                        write_number(*p, dest, Number::Int(address as usize as i64));
                    }
                    _ => return Err(fail()),
                }
                self.anchors.push(Value::CData(cd.clone()));
            }
            CTypeKind::Record(source_rec) => match &ty.kind {
                CTypeKind::Pointer(target)
                    if mode == Coercion::Cast
                        || target.is_void()
                        || target
                            .as_record()
                            .is_some_and(|r| std::rc::Rc::ptr_eq(r, source_rec)) =>
                {
                    write_pointer(dest, cd.as_ptr() as *const c_void);
                    self.anchors.push(Value::CData(cd.clone()));
                }
                CTypeKind::Record(target_rec) if std::rc::Rc::ptr_eq(target_rec, source_rec) => {
                    ptr::copy(cd.as_ptr(), dest, source_rec.layout.size);
                }
                _ => return Err(fail()),
            },
            CTypeKind::Primitive(Primitive::Void) => return Err(fail()),
            CTypeKind::Primitive(p) => {
                let Some(scalar) = p.scalar() else {
                    return Err(fail());
                };
                let n = read_scalar(scalar, cd.as_ptr());
                match &ty.kind {
                    CTypeKind::Primitive(target) => write_number(*target, dest, n),
                    CTypeKind::Pointer(_) if mode == Coercion::Cast => {
                        write_pointer(dest, n.as_i64() as usize as *const c_void)
                    }
                    _ => return Err(fail()),
                }
            }
        }
        Ok(())
    }
}
