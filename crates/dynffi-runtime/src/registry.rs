//! Type interning and declaration tables
//!
//! [`TypeRegistry`] owns every canonical type. Interning is a linear scan
//! with [`CType`]'s equality, so structurally equal pointers and arrays
//! share one `Rc` and identity comparison works for registry-produced
//! types. Records are never matched structurally and function types never
//! match, so each of those is appended.
//!
//! [`Declarations`] adds the name-keyed tables filled by `cdef`. A batch
//! stages its additions in [`Pending`] and only [`Declarations::commit`]
//! makes them visible.

use crate::ctype::{CArray, CFunc, CRecord, CType, CTypeKind, CTypeRef, Primitive};
use crate::error::FfiResult;
use crate::layout;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Intern table for canonical types
#[derive(Default)]
pub struct TypeRegistry {
    types: Vec<CTypeRef>,
    arrays: Vec<Rc<CArray>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical instance equal to `candidate`, appending it if new
    pub fn intern(&mut self, candidate: CType) -> CTypeRef {
        if let Some(existing) = self.types.iter().find(|t| ***t == candidate) {
            return existing.clone();
        }
        let ty = Rc::new(candidate);
        trace!(ty = %ty, "interned type");
        self.types.push(ty.clone());
        ty
    }

    pub fn primitive(&mut self, p: Primitive, is_const: bool) -> CTypeRef {
        self.intern(CType::new(CTypeKind::Primitive(p), is_const))
    }

    /// `pointee *`
    pub fn pointer_to(&mut self, pointee: &CTypeRef, is_const: bool) -> CTypeRef {
        self.intern(CType::new(CTypeKind::Pointer(pointee.clone()), is_const))
    }

    /// Same type with a different top-level const flag
    pub fn with_const(&mut self, ty: &CTypeRef, is_const: bool) -> CTypeRef {
        if ty.is_const == is_const {
            return ty.clone();
        }
        self.intern(CType::new(ty.kind.clone(), is_const))
    }

    /// Canonical array description for `len` elements of `elem`
    pub fn lookup_array(&mut self, elem: &CTypeRef, len: usize) -> FfiResult<Rc<CArray>> {
        if let Some(existing) = self
            .arrays
            .iter()
            .find(|a| a.len == len && a.elem == *elem)
        {
            return Ok(existing.clone());
        }

        let layout = layout::array(elem, len)?;
        let array = Rc::new(CArray::new(elem.clone(), len, layout));
        self.arrays.push(array.clone());
        Ok(array)
    }

    /// `elem[len]`; zero means flexible
    pub fn array_of(&mut self, elem: &CTypeRef, len: usize) -> FfiResult<CTypeRef> {
        let array = self.lookup_array(elem, len)?;
        Ok(self.intern(CType::new(CTypeKind::Array(array), false)))
    }

    pub fn record(&mut self, record: &Rc<CRecord>, is_const: bool) -> CTypeRef {
        self.intern(CType::new(CTypeKind::Record(record.clone()), is_const))
    }

    pub fn function(&mut self, func: &Rc<CFunc>) -> CTypeRef {
        self.intern(CType::new(CTypeKind::Function(func.clone()), false))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Names staged by one `cdef` batch
#[derive(Default)]
pub struct Pending {
    pub records: HashMap<String, Rc<CRecord>>,
    pub typedefs: HashMap<String, CTypeRef>,
    pub functions: HashMap<String, Rc<CFunc>>,
}

/// Registry plus the committed name tables
#[derive(Default)]
pub struct Declarations {
    pub registry: TypeRegistry,
    records: HashMap<String, Rc<CRecord>>,
    typedefs: HashMap<String, CTypeRef>,
    functions: HashMap<String, Rc<CFunc>>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, tag: &str) -> Option<&Rc<CRecord>> {
        self.records.get(tag)
    }

    pub fn typedef(&self, name: &str) -> Option<&CTypeRef> {
        self.typedefs.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Rc<CFunc>> {
        self.functions.get(name)
    }

    /// Committed function names in sorted order
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Publish a successful batch
    pub fn commit(&mut self, pending: Pending) {
        let Pending {
            records,
            typedefs,
            functions,
        } = pending;
        trace!(
            records = records.len(),
            typedefs = typedefs.len(),
            functions = functions.len(),
            "committing declarations"
        );
        self.records.extend(records);
        self.typedefs.extend(typedefs);
        self.functions.extend(functions);
    }
}
