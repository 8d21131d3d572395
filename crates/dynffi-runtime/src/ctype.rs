//! Canonical C type descriptions
//!
//! A [`CType`] is a tagged description of a native type plus a const flag.
//! Instances are interned by the [`TypeRegistry`](crate::registry::TypeRegistry)
//! so structurally equal types share one `Rc`. Equality follows C rules with
//! two exceptions:
//! - records compare by identity, never structurally
//! - function types are never equal to anything, themselves included
//!
//! `Display` renders the canonical text used in every error message
//! (`const char *`, `int[4]`, `struct point`, `int (int,int)`).

use crate::layout::{self, Layout};
use libffi::middle::Type;
use std::cell::OnceCell;
use std::fmt;
use std::mem::size_of;
use std::os::raw::{c_int, c_long, c_short};
use std::rc::Rc;

/// Shared handle to an interned type
pub type CTypeRef = Rc<CType>;

/// Fixed-width scalar representation used to move numbers in and out of memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Scalar {
    /// Integer scalar of the given byte width
    pub fn int(size: usize, signed: bool) -> Scalar {
        match (size, signed) {
            (1, true) => Scalar::I8,
            (1, false) => Scalar::U8,
            (2, true) => Scalar::I16,
            (2, false) => Scalar::U16,
            (4, true) => Scalar::I32,
            (4, false) => Scalar::U32,
            (_, true) => Scalar::I64,
            (_, false) => Scalar::U64,
        }
    }

    pub fn size(self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::I64 | Scalar::U64 | Scalar::F64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Scalar::F32 | Scalar::F64)
    }

    /// libffi descriptor for this scalar
    pub fn ffi_type(self) -> Type {
        match self {
            Scalar::I8 => Type::i8(),
            Scalar::U8 => Type::u8(),
            Scalar::I16 => Type::i16(),
            Scalar::U16 => Type::u16(),
            Scalar::I32 => Type::i32(),
            Scalar::U32 => Type::u32(),
            Scalar::I64 => Type::i64(),
            Scalar::U64 => Type::u64(),
            Scalar::F32 => Type::f32(),
            Scalar::F64 => Type::f64(),
        }
    }
}

/// Primitive type keywords, including the platform typedef catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    InoT,
    DevT,
    GidT,
    ModeT,
    NlinkT,
    UidT,
    OffT,
    PidT,
    SizeT,
    SsizeT,
    UsecondsT,
    SusecondsT,
    BlksizeT,
    BlkcntT,
    TimeT,
    IntptrT,
    UintptrT,
    PtrdiffT,
    Float,
    Double,
}

impl Primitive {
    /// Map a single keyword to a primitive
    ///
    /// Multi-word spellings (`unsigned long long`) are assembled by the parser.
    pub fn from_keyword(word: &str) -> Option<Primitive> {
        let p = match word {
            "void" => Primitive::Void,
            "bool" | "_Bool" => Primitive::Bool,
            "char" => Primitive::Char,
            "short" => Primitive::Short,
            "int" => Primitive::Int,
            "long" => Primitive::Long,
            "float" => Primitive::Float,
            "double" => Primitive::Double,
            "int8_t" => Primitive::Int8,
            "int16_t" => Primitive::Int16,
            "int32_t" => Primitive::Int32,
            "int64_t" => Primitive::Int64,
            "uint8_t" => Primitive::UInt8,
            "uint16_t" => Primitive::UInt16,
            "uint32_t" => Primitive::UInt32,
            "uint64_t" => Primitive::UInt64,
            "ino_t" => Primitive::InoT,
            "dev_t" => Primitive::DevT,
            "gid_t" => Primitive::GidT,
            "mode_t" => Primitive::ModeT,
            "nlink_t" => Primitive::NlinkT,
            "uid_t" => Primitive::UidT,
            "off_t" => Primitive::OffT,
            "pid_t" => Primitive::PidT,
            "size_t" => Primitive::SizeT,
            "ssize_t" => Primitive::SsizeT,
            "useconds_t" => Primitive::UsecondsT,
            "suseconds_t" => Primitive::SusecondsT,
            "blksize_t" => Primitive::BlksizeT,
            "blkcnt_t" => Primitive::BlkcntT,
            "time_t" => Primitive::TimeT,
            "intptr_t" => Primitive::IntptrT,
            "uintptr_t" => Primitive::UintptrT,
            "ptrdiff_t" => Primitive::PtrdiffT,
            _ => return None,
        };
        Some(p)
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            Primitive::Void => "void",
            Primitive::Bool => "bool",
            Primitive::Char => "char",
            Primitive::UChar => "unsigned char",
            Primitive::Short => "short",
            Primitive::UShort => "unsigned short",
            Primitive::Int => "int",
            Primitive::UInt => "unsigned int",
            Primitive::Long => "long",
            Primitive::ULong => "unsigned long",
            Primitive::LongLong => "long long",
            Primitive::ULongLong => "unsigned long long",
            Primitive::Int8 => "int8_t",
            Primitive::Int16 => "int16_t",
            Primitive::Int32 => "int32_t",
            Primitive::Int64 => "int64_t",
            Primitive::UInt8 => "uint8_t",
            Primitive::UInt16 => "uint16_t",
            Primitive::UInt32 => "uint32_t",
            Primitive::UInt64 => "uint64_t",
            Primitive::InoT => "ino_t",
            Primitive::DevT => "dev_t",
            Primitive::GidT => "gid_t",
            Primitive::ModeT => "mode_t",
            Primitive::NlinkT => "nlink_t",
            Primitive::UidT => "uid_t",
            Primitive::OffT => "off_t",
            Primitive::PidT => "pid_t",
            Primitive::SizeT => "size_t",
            Primitive::SsizeT => "ssize_t",
            Primitive::UsecondsT => "useconds_t",
            Primitive::SusecondsT => "suseconds_t",
            Primitive::BlksizeT => "blksize_t",
            Primitive::BlkcntT => "blkcnt_t",
            Primitive::TimeT => "time_t",
            Primitive::IntptrT => "intptr_t",
            Primitive::UintptrT => "uintptr_t",
            Primitive::PtrdiffT => "ptrdiff_t",
            Primitive::Float => "float",
            Primitive::Double => "double",
        }
    }

    /// Unsigned counterpart of a signed base keyword
    pub fn to_unsigned(self) -> Primitive {
        match self {
            Primitive::Char => Primitive::UChar,
            Primitive::Short => Primitive::UShort,
            Primitive::Int => Primitive::UInt,
            Primitive::Long => Primitive::ULong,
            Primitive::LongLong => Primitive::ULongLong,
            other => other,
        }
    }

    /// Memory representation, or None for `void`
    pub fn scalar(self) -> Option<Scalar> {
        use Primitive::*;
        let s = match self {
            Void => return None,
            Bool => Scalar::U8,
            Char => Scalar::I8,
            UChar => Scalar::U8,
            Short => Scalar::int(size_of::<c_short>(), true),
            UShort => Scalar::int(size_of::<c_short>(), false),
            Int => Scalar::int(size_of::<c_int>(), true),
            UInt => Scalar::int(size_of::<c_int>(), false),
            Long => Scalar::int(size_of::<c_long>(), true),
            ULong => Scalar::int(size_of::<c_long>(), false),
            LongLong => Scalar::I64,
            ULongLong => Scalar::U64,
            Int8 => Scalar::I8,
            Int16 => Scalar::I16,
            Int32 => Scalar::I32,
            Int64 => Scalar::I64,
            UInt8 => Scalar::U8,
            UInt16 => Scalar::U16,
            UInt32 => Scalar::U32,
            UInt64 => Scalar::U64,
            InoT => Scalar::int(size_of::<libc::ino_t>(), false),
            DevT => Scalar::int(size_of::<libc::dev_t>(), false),
            GidT => Scalar::int(size_of::<libc::gid_t>(), false),
            ModeT => Scalar::int(size_of::<libc::mode_t>(), false),
            NlinkT => Scalar::int(size_of::<libc::nlink_t>(), false),
            UidT => Scalar::int(size_of::<libc::uid_t>(), false),
            OffT => Scalar::int(size_of::<libc::off_t>(), true),
            PidT => Scalar::int(size_of::<libc::pid_t>(), true),
            SizeT => Scalar::int(size_of::<libc::size_t>(), false),
            SsizeT => Scalar::int(size_of::<libc::ssize_t>(), true),
            UsecondsT => Scalar::int(size_of::<libc::useconds_t>(), false),
            SusecondsT => Scalar::int(size_of::<libc::suseconds_t>(), true),
            BlksizeT => Scalar::int(size_of::<libc::blksize_t>(), true),
            BlkcntT => Scalar::int(size_of::<libc::blkcnt_t>(), true),
            TimeT => Scalar::int(size_of::<libc::time_t>(), true),
            IntptrT => Scalar::int(size_of::<isize>(), true),
            UintptrT => Scalar::int(size_of::<usize>(), false),
            PtrdiffT => Scalar::int(size_of::<isize>(), true),
            Float => Scalar::F32,
            Double => Scalar::F64,
        };
        Some(s)
    }

    /// libffi descriptor
    pub fn ffi_type(self) -> Type {
        match self.scalar() {
            Some(s) => s.ffi_type(),
            None => Type::void(),
        }
    }

    pub fn is_integer(self) -> bool {
        self.scalar().is_some_and(|s| !s.is_float())
    }
}

/// Array description: element type and count (0 = flexible)
///
/// The libffi descriptor lists every element, so it is only built when the
/// array is laid out as a by-value record member.
pub struct CArray {
    pub(crate) len: usize,
    pub(crate) elem: CTypeRef,
    pub(crate) layout: Layout,
    ffi: OnceCell<Option<Type>>,
}

impl CArray {
    pub(crate) fn new(elem: CTypeRef, len: usize, layout: Layout) -> Self {
        Self {
            len,
            elem,
            layout,
            ffi: OnceCell::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Zero-length arrays are flexible: their extent comes from the caller
    pub fn is_flexible(&self) -> bool {
        self.len == 0
    }

    pub fn elem(&self) -> &CTypeRef {
        &self.elem
    }

    /// Whether the libffi descriptor has been built
    pub(crate) fn has_ffi_type(&self) -> bool {
        self.ffi.get().is_some()
    }

    fn ffi_type(&self) -> Option<Type> {
        self.ffi
            .get_or_init(|| layout::array_ffi_type(&self.elem, self.len))
            .clone()
    }
}

impl fmt::Debug for CArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CArray")
            .field("len", &self.len)
            .field("elem", &self.elem.to_string())
            .field("layout", &self.layout)
            .finish()
    }
}

/// One record member
#[derive(Debug, Clone)]
pub struct CField {
    /// Empty for an anonymous nested struct/union
    pub name: String,
    pub ty: CTypeRef,
    pub offset: usize,
}

impl CField {
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn is_flexible(&self) -> bool {
        matches!(&self.ty.kind, CTypeKind::Array(a) if a.is_flexible())
    }
}

/// Struct or union description with computed layout
pub struct CRecord {
    pub(crate) name: Option<String>,
    pub(crate) is_union: bool,
    pub(crate) fields: Vec<CField>,
    pub(crate) layout: Layout,
    pub(crate) sized: bool,
    pub(crate) ffi: Option<Type>,
}

impl CRecord {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_union(&self) -> bool {
        self.is_union
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    pub fn fields(&self) -> &[CField] {
        &self.fields
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Look a member up by name, descending into anonymous members
    ///
    /// Returns the field and its offset from the start of this record.
    pub fn find_field(&self, name: &str) -> Option<(&CField, usize)> {
        for field in &self.fields {
            if field.is_anonymous() {
                if let CTypeKind::Record(inner) = &field.ty.kind {
                    if let Some((found, offset)) = inner.find_field(name) {
                        return Some((found, field.offset + offset));
                    }
                }
            } else if field.name == name {
                return Some((field, field.offset));
            }
        }
        None
    }

    /// Trailing flexible array member, if any
    pub fn flexible_tail(&self) -> Option<&CArray> {
        if self.is_union {
            return None;
        }
        match self.fields.last().map(|f| &f.ty.kind) {
            Some(CTypeKind::Array(a)) if a.is_flexible() => Some(a),
            _ => None,
        }
    }

    pub(crate) fn keyword(&self) -> &'static str {
        if self.is_union {
            "union"
        } else {
            "struct"
        }
    }
}

impl fmt::Debug for CRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CRecord")
            .field("name", &self.name)
            .field("is_union", &self.is_union)
            .field("fields", &self.fields)
            .field("layout", &self.layout)
            .field("sized", &self.sized)
            .finish()
    }
}

/// Function prototype
#[derive(Debug)]
pub struct CFunc {
    pub(crate) name: String,
    pub(crate) params: Vec<CTypeRef>,
    pub(crate) variadic: bool,
    pub(crate) ret: CTypeRef,
}

impl CFunc {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[CTypeRef] {
        &self.params
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn ret(&self) -> &CTypeRef {
        &self.ret
    }
}

/// Tag of a type description
#[derive(Debug, Clone)]
pub enum CTypeKind {
    Primitive(Primitive),
    Pointer(CTypeRef),
    Array(Rc<CArray>),
    Record(Rc<CRecord>),
    Function(Rc<CFunc>),
}

/// A type description plus its const qualifier
#[derive(Debug, Clone)]
pub struct CType {
    pub(crate) kind: CTypeKind,
    pub(crate) is_const: bool,
}

impl CType {
    pub fn new(kind: CTypeKind, is_const: bool) -> Self {
        Self { kind, is_const }
    }

    pub fn primitive(p: Primitive) -> Self {
        Self::new(CTypeKind::Primitive(p), false)
    }

    pub fn kind(&self) -> &CTypeKind {
        &self.kind
    }

    pub fn is_const(&self) -> bool {
        self.is_const
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.kind {
            CTypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        self.as_primitive() == Some(Primitive::Void)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, CTypeKind::Pointer(_))
    }

    /// Numeric (including bool), excluding void
    pub fn is_numeric(&self) -> bool {
        self.as_primitive().is_some_and(|p| p != Primitive::Void)
    }

    pub fn is_integer(&self) -> bool {
        self.as_primitive().is_some_and(Primitive::is_integer)
    }

    pub fn pointee(&self) -> Option<&CTypeRef> {
        match &self.kind {
            CTypeKind::Pointer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Rc<CArray>> {
        match &self.kind {
            CTypeKind::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Rc<CRecord>> {
        match &self.kind {
            CTypeKind::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<CFunc>> {
        match &self.kind {
            CTypeKind::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Pointer whose pointee is one of the given primitives, any qualification
    pub fn points_to_any(&self, kinds: &[Primitive]) -> bool {
        self.pointee()
            .and_then(|p| p.as_primitive())
            .is_some_and(|p| kinds.contains(&p))
    }

    /// Same type ignoring top-level const
    pub fn same_unqualified(&self, other: &CType) -> bool {
        CType::new(self.kind.clone(), false) == CType::new(other.kind.clone(), false)
    }

    /// Native layout; pointers and functions are pointer-sized
    pub fn layout(&self) -> Layout {
        match &self.kind {
            CTypeKind::Primitive(p) => layout::of_ffi_type(&p.ffi_type()),
            CTypeKind::Pointer(_) | CTypeKind::Function(_) => {
                layout::of_ffi_type(&Type::pointer())
            }
            CTypeKind::Array(a) => a.layout,
            CTypeKind::Record(r) => r.layout,
        }
    }

    pub fn size(&self) -> usize {
        self.layout().size
    }

    pub fn align(&self) -> usize {
        self.layout().align
    }

    /// False for flexible arrays and unions made only of flexible members
    pub fn is_sized(&self) -> bool {
        match &self.kind {
            CTypeKind::Array(a) => !a.is_flexible(),
            CTypeKind::Record(r) => r.sized,
            _ => true,
        }
    }

    /// libffi descriptor for passing/returning by value, if representable
    pub fn ffi_type(&self) -> Option<Type> {
        match &self.kind {
            CTypeKind::Primitive(p) => Some(p.ffi_type()),
            CTypeKind::Pointer(_) | CTypeKind::Function(_) => Some(Type::pointer()),
            CTypeKind::Array(a) => a.ffi_type(),
            CTypeKind::Record(r) => r.ffi.clone(),
        }
    }

    fn write_text(&self, out: &mut String, first_ptr: &mut bool) {
        if self.is_const && !self.is_pointer() {
            out.push_str("const ");
        }

        match &self.kind {
            CTypeKind::Primitive(p) => out.push_str(p.name()),
            CTypeKind::Pointer(inner) => {
                inner.write_text(out, first_ptr);
                if *first_ptr {
                    out.push(' ');
                    *first_ptr = false;
                }
                out.push('*');
                if self.is_const {
                    out.push_str(" const");
                }
            }
            CTypeKind::Array(a) => {
                // Dimensions print outermost first, as declared
                let mut dims = vec![a.len];
                let mut elem = &a.elem;
                while let CTypeKind::Array(inner) = &elem.kind {
                    dims.push(inner.len);
                    elem = &inner.elem;
                }
                elem.write_text(out, first_ptr);
                for len in dims {
                    if len == 0 {
                        out.push_str("[?]");
                    } else {
                        out.push_str(&format!("[{}]", len));
                    }
                }
            }
            CTypeKind::Function(func) => {
                func.ret.write_text(out, first_ptr);
                out.push_str(" (");
                for (i, param) in func.params.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    param.write_text(out, &mut true);
                }
                if func.variadic {
                    if !func.params.is_empty() {
                        out.push(',');
                    }
                    out.push_str("...");
                }
                out.push(')');
            }
            CTypeKind::Record(r) => {
                out.push_str(r.keyword());
                if let Some(name) = &r.name {
                    out.push(' ');
                    out.push_str(name);
                }
            }
        }
    }
}

impl PartialEq for CType {
    fn eq(&self, other: &Self) -> bool {
        if self.is_const != other.is_const {
            return false;
        }

        match (&self.kind, &other.kind) {
            (CTypeKind::Primitive(a), CTypeKind::Primitive(b)) => a == b,
            (CTypeKind::Pointer(a), CTypeKind::Pointer(b)) => a == b,
            (CTypeKind::Array(a), CTypeKind::Array(b)) => a.len == b.len && a.elem == b.elem,
            (CTypeKind::Record(a), CTypeKind::Record(b)) => Rc::ptr_eq(a, b),
            // Function types have no structural identity
            _ => false,
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_text(&mut out, &mut true);
        f.write_str(&out)
    }
}
