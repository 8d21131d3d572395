//! Host value representation
//!
//! The dynamic values the embedding side exchanges with the engine.
//! - Nil, Bool, Integer, Number, Handle: immediate values
//! - String: reference-counted immutable bytes, NUL-terminated for C
//! - Array, Map: copy-on-write containers used as initializer tables
//! - CData, CType, Library: engine objects, shared by reference
//!
//! Everything is `Rc`-based; values stay on the thread that created them.

use crate::cdata::CDataRef;
use crate::ctype::CTypeRef;
use crate::ffi::LibraryRef;
use std::collections::HashMap;
use std::fmt;
use std::os::raw::{c_char, c_void};
use std::rc::Rc;

/// Immutable byte string with a hidden trailing NUL
///
/// The NUL lets the bytes be handed to C as a `const char *` without a copy.
#[derive(Clone)]
pub struct ValueString(Rc<Vec<u8>>);

impl ValueString {
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        let mut data = Vec::with_capacity(bytes.len() + 1);
        data.extend_from_slice(bytes);
        data.push(0);
        ValueString(Rc::new(data))
    }

    /// Content without the terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..self.0.len() - 1]
    }

    /// Content plus the terminator
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pointer to the NUL-terminated bytes; valid while any clone is alive
    pub fn as_ptr(&self) -> *const c_char {
        self.0.as_ptr() as *const c_char
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl PartialEq for ValueString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl fmt::Debug for ValueString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl From<&str> for ValueString {
    fn from(s: &str) -> Self {
        ValueString::new(s)
    }
}

/// Copy-on-write array. Cheap to clone (refcount bump).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueArray(Rc<Vec<Value>>);

impl ValueArray {
    pub fn new() -> Self {
        ValueArray(Rc::new(Vec::new()))
    }

    pub fn from_vec(v: Vec<Value>) -> Self {
        ValueArray(Rc::new(v))
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn push(&mut self, value: Value) {
        Rc::make_mut(&mut self.0).push(value);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.0.iter()
    }
}

impl From<Vec<Value>> for ValueArray {
    fn from(v: Vec<Value>) -> Self {
        ValueArray::from_vec(v)
    }
}

impl FromIterator<Value> for ValueArray {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        ValueArray(Rc::new(iter.into_iter().collect()))
    }
}

/// Copy-on-write string-keyed map. Cheap to clone (refcount bump).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueMap(Rc<HashMap<String, Value>>);

impl ValueMap {
    pub fn new() -> Self {
        ValueMap(Rc::new(HashMap::new()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        Rc::make_mut(&mut self.0).insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, Value>> for ValueMap {
    fn from(m: HashMap<String, Value>) -> Self {
        ValueMap(Rc::new(m))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        ValueMap(Rc::new(
            iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }
}

/// Host value type
#[derive(Clone, Debug)]
pub enum Value {
    /// Absence of a value; NULL when written into a pointer
    Nil,
    Bool(bool),
    /// Integer number
    Integer(i64),
    /// Floating-point number
    Number(f64),
    /// Byte string
    String(ValueString),
    /// Opaque native address owned by the host
    Handle(*mut c_void),
    /// Positional initializer list
    Array(ValueArray),
    /// Named initializer table
    Map(ValueMap),
    /// Native-backed value
    CData(CDataRef),
    /// Type object
    CType(CTypeRef),
    /// Loaded library
    Library(LibraryRef),
}

impl Value {
    pub fn string(s: impl AsRef<[u8]>) -> Self {
        Value::String(ValueString::new(s))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(ValueArray::from_vec(values))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().collect())
    }

    /// Name of the value's kind, as used in conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Handle(_) => "userdata",
            Value::Array(_) | Value::Map(_) => "table",
            Value::CData(_) => "cdata",
            Value::CType(_) => "ctype",
            Value::Library(_) => "library",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_cdata(&self) -> Option<&CDataRef> {
        match self {
            Value::CData(cd) => Some(cd),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&ValueString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Equality contract:
    ///
    /// - Nil, Bool, String: content equality
    /// - Integer and Number compare numerically, across variants
    /// - Array, Map: CoW wrappers compare by content
    /// - Handle: address equality
    /// - CData, CType, Library: identity (same allocation)
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Handle(a), Value::Handle(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::CData(a), Value::CData(b)) => Rc::ptr_eq(a, b),
            (Value::CType(a), Value::CType(b)) => Rc::ptr_eq(a, b),
            (Value::Library(a), Value::Library(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s.to_string_lossy()),
            Value::Handle(p) => write!(f, "userdata: {:p}", p),
            Value::Array(a) => write!(f, "table: {:p}", a.as_slice().as_ptr()),
            Value::Map(m) => write!(f, "table: {:p}", &*m.0),
            Value::CData(cd) => write!(f, "{}", cd),
            Value::CType(ty) => write!(f, "ctype<{}>", ty),
            Value::Library(lib) => write!(f, "{}", lib),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<CDataRef> for Value {
    fn from(cd: CDataRef) -> Self {
        Value::CData(cd)
    }
}

impl From<CTypeRef> for Value {
    fn from(ty: CTypeRef) -> Self {
        Value::CType(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_is_nul_terminated() {
        let s = ValueString::new("abc");
        assert_eq!(s.as_bytes(), b"abc");
        assert_eq!(s.as_bytes_with_nul(), b"abc\0");
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Nil.type_name(), "nil");
        assert_eq!(Value::Integer(1).type_name(), "number");
        assert_eq!(Value::Number(1.5).type_name(), "number");
        assert_eq!(Value::array(vec![]).type_name(), "table");
        assert_eq!(Value::Handle(std::ptr::null_mut()).type_name(), "userdata");
    }

    #[test]
    fn test_numeric_equality_crosses_variants() {
        assert_eq!(Value::Integer(3), Value::Number(3.0));
        assert_ne!(Value::Integer(3), Value::Number(3.5));
        assert_ne!(Value::Integer(0), Value::Bool(false));
    }

    #[test]
    fn test_array_copy_on_write() {
        let a = ValueArray::from_vec(vec![Value::Integer(1)]);
        let mut b = a.clone();
        b.push(Value::Integer(2));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(Value::Number(4.0).as_i64(), Some(4));
        assert_eq!(Value::Number(4.5).as_i64(), None);
        assert_eq!(Value::string("4").as_i64(), None);
    }
}
