//! Native-backed values
//!
//! A [`CData`] pairs a type with the memory holding an object of that type.
//! The memory is either owned (zeroed heap storage sized for the type) or
//! borrowed from another cdata, which the view keeps alive through `owner`.
//!
//! For pointer and function types the memory holds the address itself, so
//! [`CData::address`] reads it back out; for everything else the address is
//! the memory location.

use crate::ctype::{CRecord, CTypeKind, CTypeRef};
use crate::error::{FfiError, FfiResult};
use crate::ffi::caller;
use crate::ffi::marshal::{self, Coercion, MarshalContext};
use crate::value::Value;
use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::rc::{Rc, Weak};
use tracing::warn;

/// Shared handle to a cdata
pub type CDataRef = Rc<CData>;

/// Callback run once when an owned value is released
pub type Finalizer = Box<dyn FnOnce(&CData) -> FfiResult<()>>;

/// Zeroed, aligned heap storage
pub(crate) struct Buffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Buffer {
    pub(crate) fn zeroed(size: usize, align: usize) -> FfiResult<Self> {
        let layout = Layout::from_size_align(size.max(1), align.max(1).next_power_of_two())
            .map_err(|e| FfiError::resource(format!("invalid allocation of {} bytes: {}", size, e)))?;
        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(raw)
            .map(|ptr| Buffer { ptr, layout })
            .ok_or_else(|| FfiError::resource(format!("failed to allocate {} bytes", size)))
    }

    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

enum Memory {
    Owned(Buffer),
    Borrowed(*mut u8),
}

/// Cache key for values derived from a parent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ChildKey {
    Index(i64),
    Field(String),
}

/// A native-backed value
pub struct CData {
    ctype: CTypeRef,
    memory: Memory,
    /// Keeps borrowed memory alive
    owner: Option<CDataRef>,
    /// Derived views by key, with the address they were made for
    children: RefCell<HashMap<ChildKey, (usize, Weak<CData>)>>,
    finalizer: RefCell<Option<Finalizer>>,
    /// Host values referenced from this memory (string bytes, pointed-to cdata)
    anchors: RefCell<Vec<Value>>,
}

impl CData {
    fn with_memory(ctype: CTypeRef, memory: Memory, owner: Option<CDataRef>) -> CDataRef {
        Rc::new(CData {
            ctype,
            memory,
            owner,
            children: RefCell::new(HashMap::new()),
            finalizer: RefCell::new(None),
            anchors: RefCell::new(Vec::new()),
        })
    }

    /// Allocate zeroed storage of `size` bytes for a value of `ctype`
    pub(crate) fn owned(ctype: CTypeRef, size: usize) -> FfiResult<CDataRef> {
        let buffer = Buffer::zeroed(size, ctype.align())?;
        Ok(Self::with_memory(ctype, Memory::Owned(buffer), None))
    }

    /// A view of memory that belongs to someone else
    pub(crate) fn borrowed(ctype: CTypeRef, ptr: *mut u8, owner: Option<CDataRef>) -> CDataRef {
        Self::with_memory(ctype, Memory::Borrowed(ptr), owner)
    }

    /// Owned pointer-typed value holding `address`
    pub(crate) fn pointer(ctype: CTypeRef, address: *const c_void) -> FfiResult<CDataRef> {
        let cd = Self::owned(ctype, std::mem::size_of::<*const c_void>())?;
        // SAFETY: freshly allocated with pointer size
        unsafe { marshal::write_pointer(cd.as_ptr(), address) };
        Ok(cd)
    }

    pub fn ctype(&self) -> &CTypeRef {
        &self.ctype
    }

    /// Location of the object
    pub fn as_ptr(&self) -> *mut u8 {
        match &self.memory {
            Memory::Owned(buffer) => buffer.as_ptr(),
            Memory::Borrowed(ptr) => *ptr,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.memory, Memory::Owned(_))
    }

    /// Bytes available at [`as_ptr`](Self::as_ptr)
    ///
    /// Owned variable-length values report their allocation and views their
    /// type size. A view of a flexible array reaches to the end of the
    /// memory it was taken from.
    pub fn size(&self) -> usize {
        match &self.memory {
            Memory::Owned(buffer) => buffer.len().max(self.ctype.size()),
            Memory::Borrowed(ptr) if !self.ctype.is_sized() => self
                .owner
                .as_ref()
                .and_then(|owner| owner.extent_at(*ptr))
                .unwrap_or(0),
            Memory::Borrowed(_) => self.ctype.size(),
        }
    }

    /// Bytes from `addr` to the end of this value's own memory, if `addr`
    /// lies inside it
    fn extent_at(&self, addr: *mut u8) -> Option<usize> {
        if matches!(self.ctype.kind, CTypeKind::Pointer(_) | CTypeKind::Function(_)) {
            return None;
        }
        let start = self.as_ptr() as usize;
        let offset = (addr as usize).checked_sub(start)?;
        self.size().checked_sub(offset)
    }

    /// The address this value designates
    ///
    /// Pointers and functions yield the stored address, everything else its
    /// own memory location.
    pub fn address(&self) -> *mut c_void {
        match &self.ctype.kind {
            CTypeKind::Pointer(_) | CTypeKind::Function(_) => {
                // SAFETY: pointer-typed memory is pointer-sized
                unsafe { marshal::read_pointer(self.as_ptr()) }
            }
            _ => self.as_ptr() as *mut c_void,
        }
    }

    /// Install or clear the release callback
    pub fn set_finalizer(&self, finalizer: Option<Finalizer>) {
        *self.finalizer.borrow_mut() = finalizer;
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizer.borrow().is_some()
    }

    /// Root of the ownership chain
    fn root(&self) -> &CData {
        let mut current = self;
        while let Some(owner) = &current.owner {
            current = owner;
        }
        current
    }

    /// Keep `values` alive as long as the underlying memory
    pub(crate) fn anchor(&self, values: Vec<Value>) {
        if !values.is_empty() {
            self.root().anchors.borrow_mut().extend(values);
        }
    }

    /// Host value of a numeric cdata
    pub fn to_value(&self) -> Option<Value> {
        let p = self.ctype.as_primitive()?;
        if !self.ctype.is_numeric() {
            return None;
        }
        // SAFETY: memory holds an object of this primitive type
        Some(unsafe { marshal::read_primitive(p, self.as_ptr()) })
    }

    /// `cd[key]`: element of an array or pointer, member of a record
    ///
    /// Aggregate and pointer results are views cached per parent, so the same
    /// key yields the same cdata while it is alive.
    pub fn index(self: &Rc<Self>, key: &Value) -> FfiResult<Value> {
        let (key, ty, addr) = self.resolve(key)?;

        if let Some((cached_addr, weak)) = self.children.borrow().get(&key) {
            if *cached_addr == addr as usize {
                if let Some(child) = weak.upgrade() {
                    return Ok(Value::CData(child));
                }
            }
        }

        // SAFETY: `resolve` produced an address inside this value's memory or
        // at the declared pointee location
        let value = unsafe { marshal::read(&ty, addr, Some(self)) };
        if let Value::CData(child) = &value {
            let mut children = self.children.borrow_mut();
            children.retain(|_, (_, weak)| weak.strong_count() > 0);
            children.insert(key, (addr as usize, Rc::downgrade(child)));
        }
        Ok(value)
    }

    /// `cd[key] = value`
    pub fn set_index(self: &Rc<Self>, key: &Value, value: &Value) -> FfiResult<()> {
        let read_only = match &self.ctype.kind {
            CTypeKind::Pointer(_) => false,
            _ => self.ctype.is_const(),
        };
        let (_, ty, addr) = self.resolve(key)?;
        if read_only || ty.is_const() {
            return Err(FfiError::type_error("assignment of read-only variable"));
        }

        let room = self.extent_at(addr).unwrap_or_else(|| ty.size());
        let mut ctx = MarshalContext::new();
        // SAFETY: see `index`; flexible targets are bounded by `room`
        unsafe { ctx.write_within(&ty, addr, room, value, Coercion::Implicit)? };
        self.anchor(ctx.into_anchors());
        Ok(())
    }

    /// Entries in the derived-view cache; dropped views are pruned on the
    /// next insert
    pub fn cached_views(&self) -> usize {
        self.children.borrow().len()
    }

    /// Map an index key to the target type and address
    fn resolve(&self, key: &Value) -> FfiResult<(ChildKey, CTypeRef, *mut u8)> {
        match &self.ctype.kind {
            CTypeKind::Record(rec) => self.resolve_field(rec, self.as_ptr(), key),
            CTypeKind::Pointer(pointee) => {
                let base = self.address() as *mut u8;
                match (&pointee.kind, key) {
                    (CTypeKind::Record(rec), Value::String(_)) => {
                        self.check_not_null(base)?;
                        self.resolve_field(rec, base, key)
                    }
                    _ => self.resolve_element(pointee, base, key),
                }
            }
            CTypeKind::Array(arr) => self.resolve_element(&arr.elem, self.as_ptr(), key),
            _ => Err(self.not_indexable()),
        }
    }

    fn resolve_element(
        &self,
        elem: &CTypeRef,
        base: *mut u8,
        key: &Value,
    ) -> FfiResult<(ChildKey, CTypeRef, *mut u8)> {
        if elem.is_void() {
            return Err(self.not_indexable());
        }
        let index = key.as_i64().ok_or_else(|| {
            FfiError::type_error(format!(
                "ctype '{}' cannot be indexed with {}",
                self.ctype,
                key.type_name()
            ))
        })?;
        self.check_not_null(base)?;

        let offset = (index as isize).wrapping_mul(elem.size() as isize);
        Ok((ChildKey::Index(index), elem.clone(), base.wrapping_offset(offset)))
    }

    fn resolve_field(
        &self,
        rec: &CRecord,
        base: *mut u8,
        key: &Value,
    ) -> FfiResult<(ChildKey, CTypeRef, *mut u8)> {
        let Value::String(name) = key else {
            return Err(FfiError::type_error(format!(
                "ctype '{}' cannot be indexed with {}",
                self.ctype,
                key.type_name()
            )));
        };
        let name = name.to_string_lossy();
        let (field, offset) = rec.find_field(&name).ok_or_else(|| {
            FfiError::type_error(format!(
                "ctype '{}' has no member named '{}'",
                self.ctype, name
            ))
        })?;
        Ok((ChildKey::Field(name.clone()), field.ty.clone(), base.wrapping_add(offset)))
    }

    fn check_not_null(&self, base: *mut u8) -> FfiResult<()> {
        if base.is_null() {
            Err(FfiError::type_error(format!(
                "attempt to index a NULL pointer of type '{}'",
                self.ctype
            )))
        } else {
            Ok(())
        }
    }

    fn not_indexable(&self) -> FfiError {
        FfiError::type_error(format!("ctype '{}' cannot be indexed", self.ctype))
    }

    /// Invoke a function-typed value
    ///
    /// Returns None for `void` functions.
    pub fn call(&self, args: &[Value]) -> FfiResult<Option<Value>> {
        let Some(func) = self.ctype.as_function() else {
            return Err(FfiError::type_error(format!(
                "'{}' is not callable",
                self.ctype
            )));
        };
        caller::call(func, self.address(), args)
    }

    /// `cd == other`
    ///
    /// Numeric values compare by value against host numbers. Pointers compare
    /// by address with other pointers, and `nil` equals NULL. Records, arrays
    /// and functions never compare equal.
    pub fn equals(&self, other: &Value) -> bool {
        match &self.ctype.kind {
            CTypeKind::Primitive(_) => {
                let Some(value) = self.to_value() else {
                    return false;
                };
                match other {
                    Value::CData(cd) => cd.to_value().is_some_and(|v| v == value),
                    other => *other == value,
                }
            }
            CTypeKind::Pointer(_) => match other {
                Value::CData(cd) => cd.ctype().is_pointer() && self.address() == cd.address(),
                Value::Nil => self.address().is_null(),
                Value::Handle(h) => self.address() == *h,
                _ => false,
            },
            CTypeKind::Record(_) | CTypeKind::Array(_) | CTypeKind::Function(_) => false,
        }
    }

    /// Copy `len` bytes from `src` into this value's memory
    ///
    /// # Safety
    /// `src` must be readable for `len` bytes and `len` must not exceed
    /// the destination.
    pub(crate) unsafe fn copy_from(&self, src: *const u8, len: usize) {
        ptr::copy(src, self.address() as *mut u8, len);
    }
}

impl Drop for CData {
    fn drop(&mut self) {
        let Some(finalizer) = self.finalizer.get_mut().take() else {
            return;
        };
        let this: &CData = self;
        match panic::catch_unwind(AssertUnwindSafe(|| finalizer(this))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(ctype = %self.ctype, error = %e, "finalizer failed"),
            Err(_) => warn!(ctype = %self.ctype, "finalizer panicked"),
        }
    }
}

impl fmt::Display for CData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cdata<{}>: {:p}", self.ctype, self.address())
    }
}

impl fmt::Debug for CData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CData")
            .field("ctype", &self.ctype.to_string())
            .field("ptr", &self.as_ptr())
            .field("owned", &self.is_owned())
            .finish()
    }
}
