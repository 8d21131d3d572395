//! The `Ffi` context: the runtime surface for embedding
//!
//! One context owns the type registry, the declaration tables and the
//! default library. Nothing is global; two contexts never share types.
//!
//! Borrows of the declaration tables are scoped to parsing and lookup and are
//! never held across a native call or a cdata drop, so finalizers and
//! re-entrant calls may use the context freely.

use crate::cdata::{CData, CDataRef};
use crate::ctype::{CFunc, CTypeKind, CTypeRef, Primitive};
use crate::error::{FfiError, FfiResult};
use crate::ffi::loader::{Library, LibraryLoader, LibraryRef, ProcessImage, SymbolSource};
use crate::ffi::marshal::{Coercion, MarshalContext};
use crate::parser::Parser;
use crate::registry::Declarations;
use crate::value::Value;
use dynffi_config::FfiConfig;
use std::cell::RefCell;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::rc::Rc;
use tracing::debug;

/// Anything that names a C type: declaration text or a resolved type
#[derive(Debug, Clone)]
pub enum TypeSpec<'a> {
    Text(&'a str),
    Type(CTypeRef),
}

impl<'a> From<&'a str> for TypeSpec<'a> {
    fn from(text: &'a str) -> Self {
        TypeSpec::Text(text)
    }
}

impl<'a> From<&'a String> for TypeSpec<'a> {
    fn from(text: &'a String) -> Self {
        TypeSpec::Text(text)
    }
}

impl From<CTypeRef> for TypeSpec<'_> {
    fn from(ty: CTypeRef) -> Self {
        TypeSpec::Type(ty)
    }
}

impl From<&CTypeRef> for TypeSpec<'_> {
    fn from(ty: &CTypeRef) -> Self {
        TypeSpec::Type(ty.clone())
    }
}

/// A cdata stands for its own type
impl From<&CDataRef> for TypeSpec<'_> {
    fn from(cd: &CDataRef) -> Self {
        TypeSpec::Type(cd.ctype().clone())
    }
}

/// FFI context
///
/// # Examples
///
/// ```no_run
/// use dynffi_runtime::{Ffi, Value};
///
/// let ffi = Ffi::new();
/// ffi.cdef("int abs(int);").unwrap();
/// let abs = ffi.default_library().get(&ffi, "abs").unwrap();
/// assert_eq!(abs.call(&[Value::Integer(-3)]).unwrap(), Some(Value::Integer(3)));
/// ```
pub struct Ffi {
    decls: RefCell<Declarations>,
    loader: LibraryLoader,
    default_global: bool,
    default_library: LibraryRef,
    /// Modules opened with global visibility live as long as the context
    global_libraries: RefCell<Vec<LibraryRef>>,
}

impl Ffi {
    pub fn new() -> Self {
        Self::with_config(&FfiConfig::default())
    }

    /// Context using the configured search paths and default visibility
    pub fn with_config(config: &FfiConfig) -> Self {
        let mut loader = LibraryLoader::new();
        for path in config.search_paths().iter().rev() {
            loader.add_search_path(path.clone());
        }

        Self {
            decls: RefCell::new(Declarations::new()),
            loader,
            default_global: config.global(),
            default_library: Library::new(ProcessImage::new()),
            global_libraries: RefCell::new(Vec::new()),
        }
    }

    // === Declarations ===

    /// Parse and register a batch of declarations
    ///
    /// The batch is all-or-nothing: on error none of its names are visible.
    pub fn cdef(&self, source: &str) -> FfiResult<()> {
        let mut decls = self.decls.borrow_mut();
        let pending = Parser::new(source, &mut decls)?.parse_declarations()?;
        debug!(
            records = pending.records.len(),
            typedefs = pending.typedefs.len(),
            functions = pending.functions.len(),
            "declarations committed"
        );
        decls.commit(pending);
        Ok(())
    }

    /// Declared prototype for `name`
    pub fn function(&self, name: &str) -> Option<Rc<CFunc>> {
        self.decls.borrow().function(name).cloned()
    }

    /// Names of every declared function, sorted
    pub fn function_names(&self) -> Vec<String> {
        self.decls.borrow().function_names()
    }

    /// Function type for declared prototype `name`
    pub(crate) fn function_type(&self, name: &str) -> Option<CTypeRef> {
        let mut decls = self.decls.borrow_mut();
        let func = decls.function(name)?.clone();
        Some(decls.registry.function(&func))
    }

    /// Resolve a type description to its canonical type
    pub fn type_of<'a>(&self, spec: impl Into<TypeSpec<'a>>) -> FfiResult<CTypeRef> {
        match spec.into() {
            TypeSpec::Type(ty) => Ok(ty),
            TypeSpec::Text(text) => {
                let mut decls = self.decls.borrow_mut();
                let (ty, pending) = Parser::new(text, &mut decls)?.parse_type_expr()?;
                decls.commit(pending);
                Ok(ty)
            }
        }
    }

    /// Number of canonical types interned so far
    pub fn type_count(&self) -> usize {
        self.decls.borrow().registry.len()
    }

    // === Construction ===

    /// `ffi.new(type, [count], [init])`
    ///
    /// `count` sizes a flexible array (`int[?]`) or the flexible tail of a
    /// variable-length struct. At most one initializer is accepted.
    pub fn new_cdata<'a>(
        &self,
        spec: impl Into<TypeSpec<'a>>,
        count: Option<usize>,
        init: &[Value],
    ) -> FfiResult<CDataRef> {
        let ty = self.type_of(spec)?;
        let (ty, size) = self.instance_layout(ty, count)?;

        if init.len() > 1 {
            return Err(FfiError::type_error(format!(
                "too many initializers for '{}'",
                ty
            )));
        }

        let cd = CData::owned(ty.clone(), size)?;
        if let Some(value) = init.first() {
            let mut ctx = MarshalContext::new();
            // SAFETY: `cd` owns `size` bytes, enough for the type and its tail
            unsafe { ctx.write_within(&ty, cd.as_ptr(), size, value, Coercion::Implicit)? };
            cd.anchor(ctx.into_anchors());
        }
        Ok(cd)
    }

    /// Concrete type and allocation size for a new instance
    fn instance_layout(&self, ty: CTypeRef, count: Option<usize>) -> FfiResult<(CTypeRef, usize)> {
        match (&ty.kind, count) {
            (CTypeKind::Array(arr), count) if arr.is_flexible() => {
                let n = count
                    .filter(|n| *n > 0)
                    .ok_or_else(|| FfiError::type_error("array size must great than 0"))?;
                let elem = arr.elem.clone();
                let sized = self.decls.borrow_mut().registry.array_of(&elem, n)?;
                let size = sized.size();
                Ok((sized, size))
            }
            (CTypeKind::Record(rec), Some(n)) if rec.flexible_tail().is_some() => {
                let stride = rec.flexible_tail().map_or(0, |tail| tail.elem.size());
                let size = n
                    .checked_mul(stride)
                    .and_then(|tail| tail.checked_add(ty.size()))
                    .ok_or_else(|| {
                        FfiError::resource(format!("size of '{}' with {} elements overflows", ty, n))
                    })?;
                Ok((ty.clone(), size))
            }
            (_, Some(_)) => Err(FfiError::type_error(format!(
                "ctype '{}' is not variable-length",
                ty
            ))),
            (CTypeKind::Primitive(Primitive::Void), None) | (CTypeKind::Function(_), None) => {
                Err(FfiError::type_error(format!("invalid C type '{}'", ty)))
            }
            (_, None) => Ok((ty.clone(), ty.size())),
        }
    }

    /// `ffi.cast(type, value)`: forced conversion
    pub fn cast<'a>(&self, spec: impl Into<TypeSpec<'a>>, value: &Value) -> FfiResult<CDataRef> {
        let ty = self.type_of(spec)?;
        let cd = CData::owned(ty.clone(), ty.size())?;
        let mut ctx = MarshalContext::new();
        // SAFETY: `cd` owns `ty.size()` bytes
        unsafe { ctx.write(&ty, cd.as_ptr(), value, Coercion::Cast)? };
        cd.anchor(ctx.into_anchors());
        Ok(cd)
    }

    /// `ffi.addressof(cd)`: pointer to the value's memory
    pub fn address_of(&self, cd: &CDataRef) -> FfiResult<CDataRef> {
        let ptr_ty = self
            .decls
            .borrow_mut()
            .registry
            .pointer_to(cd.ctype(), false);
        let ptr = CData::pointer(ptr_ty, cd.as_ptr() as *const _)?;
        ptr.anchor(vec![Value::CData(cd.clone())]);
        Ok(ptr)
    }

    /// A `void *` holding NULL
    pub fn nullptr(&self) -> FfiResult<CDataRef> {
        let ty = {
            let mut decls = self.decls.borrow_mut();
            let void = decls.registry.primitive(Primitive::Void, false);
            decls.registry.pointer_to(&void, false)
        };
        CData::pointer(ty, ptr::null())
    }

    // === Queries ===

    /// Byte size, `None` for flexible arrays
    pub fn size_of<'a>(&self, spec: impl Into<TypeSpec<'a>>) -> FfiResult<Option<usize>> {
        let ty = self.type_of(spec)?;
        Ok(ty.is_sized().then(|| ty.size()))
    }

    /// Offset of `field` within a record type
    pub fn offset_of<'a>(
        &self,
        spec: impl Into<TypeSpec<'a>>,
        field: &str,
    ) -> FfiResult<Option<usize>> {
        let ty = self.type_of(spec)?;
        Ok(ty
            .as_record()
            .and_then(|rec| rec.find_field(field))
            .map(|(_, offset)| offset))
    }

    /// Whether `value` is a cdata of exactly this type
    pub fn is_type<'a>(&self, spec: impl Into<TypeSpec<'a>>, value: &Value) -> FfiResult<bool> {
        let ty = self.type_of(spec)?;
        Ok(match value {
            Value::CData(cd) => Rc::ptr_eq(cd.ctype(), &ty) || **cd.ctype() == *ty,
            _ => false,
        })
    }

    /// Host number of a numeric cdata, `Nil` otherwise
    pub fn to_number(&self, value: &Value) -> Value {
        match value {
            Value::CData(cd) => cd.to_value().unwrap_or(Value::Nil),
            Value::Integer(_) | Value::Number(_) => value.clone(),
            _ => Value::Nil,
        }
    }

    // === Memory ===

    /// `ffi.string(cd, [len])`
    ///
    /// With `len`, copies exactly that many bytes out of a pointer, array or
    /// record. Without, reads a NUL-terminated string from a byte pointer, or
    /// from a fixed array up to its first NUL or its full size.
    pub fn string(&self, cd: &CData, len: Option<usize>) -> FfiResult<Value> {
        let ty = cd.ctype();
        let fail = || FfiError::convert(ty, "string");
        let base = cd.address() as *const u8;

        if let Some(len) = len {
            if !matches!(
                ty.kind,
                CTypeKind::Pointer(_) | CTypeKind::Array(_) | CTypeKind::Record(_)
            ) {
                return Err(fail());
            }
            if base.is_null() {
                return Ok(Value::Nil);
            }
            check_bounds(cd, len)?;
            // SAFETY: caller vouches for `len` readable bytes behind pointers;
            // owned memory was bounds-checked above
            let bytes = unsafe { std::slice::from_raw_parts(base, len) };
            return Ok(Value::string(bytes));
        }

        let (elem, fixed) = match &ty.kind {
            CTypeKind::Pointer(p) => (p, None),
            CTypeKind::Array(a) => (&a.elem, Some(cd.size())),
            _ => return Err(fail()),
        };
        if !matches!(
            elem.as_primitive(),
            Some(Primitive::Void | Primitive::Char | Primitive::UChar)
        ) {
            return Err(fail());
        }
        if base.is_null() {
            return Ok(Value::Nil);
        }

        // SAFETY: arrays are read within their extent; pointers and tails of
        // unknown extent are trusted to reference a NUL-terminated string
        let bytes = unsafe {
            match fixed {
                Some(size) if size > 0 => {
                    let all = std::slice::from_raw_parts(base, size);
                    let end = all.iter().position(|b| *b == 0).unwrap_or(size);
                    &all[..end]
                }
                _ => CStr::from_ptr(base as *const c_char).to_bytes(),
            }
        };
        Ok(Value::string(bytes))
    }

    /// `ffi.copy(dst, src, [len])`, returning the number of bytes copied
    ///
    /// Without `len` the source must be a string; its bytes and a trailing
    /// NUL are copied.
    pub fn copy(&self, dst: &CData, src: &Value, len: Option<usize>) -> FfiResult<usize> {
        let dest = dst.address() as *mut u8;
        if dest.is_null() {
            return Err(FfiError::type_error(format!(
                "attempt to copy into a NULL '{}'",
                dst.ctype()
            )));
        }

        let (source, count) = match (src, len) {
            (Value::String(s), None) => (s.as_ptr() as *const u8, s.len() + 1),
            (_, None) => return Err(FfiError::convert(src.type_name(), "string")),
            (Value::String(s), Some(len)) => {
                if len > s.len() + 1 {
                    return Err(FfiError::type_error(format!(
                        "copy of {} bytes exceeds a string of {}",
                        len,
                        s.len()
                    )));
                }
                (s.as_ptr() as *const u8, len)
            }
            (Value::CData(cd), Some(len)) => (cd.address() as *const u8, len),
            (other, Some(_)) => {
                return Err(FfiError::convert(other.type_name(), "const void *"))
            }
        };
        check_bounds(dst, count)?;

        // SAFETY: destination bounds checked for owned memory; sources are
        // strings of known length or caller-vouched cdata
        unsafe { ptr::copy(source, dest, count) };
        Ok(count)
    }

    /// `ffi.fill(cd, len, byte)`
    pub fn fill(&self, cd: &CData, len: usize, byte: u8) -> FfiResult<()> {
        let dest = cd.address() as *mut u8;
        if dest.is_null() {
            return Err(FfiError::type_error(format!(
                "attempt to fill a NULL '{}'",
                cd.ctype()
            )));
        }
        check_bounds(cd, len)?;
        // SAFETY: see `copy`
        unsafe { ptr::write_bytes(dest, byte, len) };
        Ok(())
    }

    /// Read the thread's `errno`, optionally replacing it; returns the old value
    pub fn errno(&self, new: Option<i32>) -> i32 {
        let location = errno_location();
        // SAFETY: the C library hands out a valid thread-local slot
        unsafe {
            let current = *location;
            if let Some(value) = new {
                *location = value;
            }
            current
        }
    }

    // === Libraries ===

    /// Symbols of the whole process
    pub fn default_library(&self) -> LibraryRef {
        self.default_library.clone()
    }

    /// `ffi.load(name, [global])`
    ///
    /// Global modules stay open for the lifetime of the context.
    pub fn load(&self, name: &str, global: Option<bool>) -> FfiResult<LibraryRef> {
        let global = global.unwrap_or(self.default_global);
        let module = self.loader.open(name, global)?;
        let library = Library::new(module);
        debug!(library = name, global, handle = %library, "library opened");
        if global {
            self.global_libraries.borrow_mut().push(library.clone());
        }
        Ok(library)
    }

    /// Wrap a host-provided symbol source as a library
    pub fn register_library(&self, source: impl SymbolSource + 'static) -> LibraryRef {
        Library::new(source)
    }

    /// Search paths used for short library names
    pub fn search_paths(&self) -> &[std::path::PathBuf] {
        self.loader.search_paths()
    }
}

impl Default for Ffi {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject accesses past the end of memory this crate allocated
///
/// Pointer targets have no known extent and are trusted.
fn check_bounds(cd: &CData, len: usize) -> FfiResult<()> {
    if cd.ctype().is_pointer() || len <= cd.size() {
        return Ok(());
    }
    Err(FfiError::type_error(format!(
        "access of {} bytes overflows '{}' ({} bytes)",
        len,
        cd.ctype(),
        cd.size()
    )))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn errno_location() -> *mut c_int {
    // SAFETY: always returns the calling thread's errno slot
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno_location() -> *mut c_int {
    // SAFETY: always returns the calling thread's errno slot
    unsafe { libc::__error() }
}
