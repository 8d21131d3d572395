//! Native layout computation
//!
//! Struct offsets, sizes and alignments come from libffi so they match the
//! platform ABI exactly. Unions are laid out here (libffi has no union type)
//! and described to libffi as a struct of the most-aligned member padded with
//! bytes, which has the same size, alignment and classification.

use crate::ctype::{CField, CTypeKind, CTypeRef};
use crate::error::{FfiError, FfiResult};
use libffi::middle::Type;
use libffi::raw;
use std::iter;
use tracing::debug;

/// Size and alignment of a native type, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub align: usize,
}

impl Layout {
    pub const EMPTY: Layout = Layout { size: 0, align: 1 };

    pub fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }
}

/// Round `n` up to a multiple of `align`
pub fn round_up(n: usize, align: usize) -> usize {
    if align <= 1 {
        n
    } else {
        (n + align - 1) / align * align
    }
}

/// Read size and alignment from an initialized libffi type
///
/// Aggregates are only initialized after [`struct_offsets`] or cif
/// preparation has run over them.
pub(crate) fn of_ffi_type(ty: &Type) -> Layout {
    // SAFETY: as_raw_ptr points to a live ffi_type owned by `ty`
    unsafe {
        let raw = ty.as_raw_ptr();
        Layout::new((*raw).size, (*raw).alignment as usize)
    }
}

/// Build a libffi struct from `members` and compute its layout
///
/// Returns the aggregate descriptor, its layout and the member offsets.
pub(crate) fn struct_offsets(members: Vec<Type>) -> FfiResult<(Type, Layout, Vec<usize>)> {
    let count = members.len();
    let ty = Type::structure(members);
    let mut offsets = vec![0usize; count];

    // SAFETY: `ty` is a well-formed struct type with `count` elements and
    // `offsets` has room for each of them
    let status = unsafe {
        raw::ffi_get_struct_offsets(
            raw::ffi_abi_FFI_DEFAULT_ABI,
            ty.as_raw_ptr(),
            offsets.as_mut_ptr(),
        )
    };
    if status != raw::ffi_status_FFI_OK {
        return Err(FfiError::type_error(format!(
            "failed to compute struct layout (status {})",
            status
        )));
    }

    let layout = of_ffi_type(&ty);
    Ok((ty, layout, offsets))
}

/// Layout of `len` elements of `elem`
///
/// Zero-length (flexible) arrays have size 0 but keep the element alignment.
pub(crate) fn array(elem: &CTypeRef, len: usize) -> FfiResult<Layout> {
    let elem_layout = elem.layout();
    let size = elem_layout
        .size
        .checked_mul(len)
        .ok_or_else(|| FfiError::type_error(format!("array size too large for '{}'", elem)))?;
    Ok(Layout::new(size, elem_layout.align))
}

/// libffi descriptor for a fixed array: a struct of `len` elements
///
/// Flexible arrays and arrays of unrepresentable elements have none.
pub(crate) fn array_ffi_type(elem: &CTypeRef, len: usize) -> Option<Type> {
    if len == 0 || elem.size() == 0 {
        return None;
    }
    let elem_ffi = elem.ffi_type()?;
    match struct_offsets(iter::repeat(elem_ffi).take(len).collect()) {
        Ok((ty, _, _)) => Some(ty),
        Err(e) => {
            debug!(elem = %elem, len, error = %e, "no descriptor for array");
            None
        }
    }
}

/// Computed record layout: field offsets plus the aggregate descriptor
pub(crate) struct RecordLayout {
    pub fields: Vec<CField>,
    pub layout: Layout,
    pub sized: bool,
    pub ffi: Option<Type>,
}

/// Members that occupy storage; flexible and empty members do not
fn occupies_storage(ty: &CTypeRef) -> bool {
    match &ty.kind {
        CTypeKind::Array(a) => {
            !a.is_flexible() && a.elem.size() > 0 && a.elem.ffi_type().is_some()
        }
        _ => ty.size() > 0 && ty.ffi_type().is_some(),
    }
}

/// Lay out a struct
///
/// Storage-less members sit right after the previous member's extent.
pub(crate) fn structure(members: Vec<(String, CTypeRef)>) -> FfiResult<RecordLayout> {
    let stored: Vec<Type> = members
        .iter()
        .filter(|(_, ty)| occupies_storage(ty))
        .filter_map(|(_, ty)| ty.ffi_type())
        .collect();

    let (ffi, mut layout, offsets) = if stored.is_empty() {
        (None, Layout::EMPTY, Vec::new())
    } else {
        let (ty, layout, offsets) = struct_offsets(stored)?;
        (Some(ty), layout, offsets)
    };

    let mut fields: Vec<CField> = Vec::with_capacity(members.len());
    let mut next_offset = offsets.iter();
    for (name, ty) in members {
        let offset = if occupies_storage(&ty) {
            next_offset.next().copied().unwrap_or_default()
        } else {
            let end = fields.last().map(|f| f.offset + f.ty.size()).unwrap_or(0);
            // A flexible tail still aligns the struct, as in C
            layout.align = layout.align.max(ty.align());
            round_up(end, ty.align())
        };
        fields.push(CField { name, ty, offset });
    }
    let end = fields.last().map(|f| f.offset + f.ty.size()).unwrap_or(0);
    layout.size = round_up(layout.size.max(end), layout.align);

    Ok(RecordLayout {
        fields,
        layout,
        sized: true,
        ffi,
    })
}

/// Lay out a union: every member at offset 0
///
/// A union with no storage-bearing member is unsized.
pub(crate) fn union(members: Vec<(String, CTypeRef)>) -> FfiResult<RecordLayout> {
    let mut widest: Option<&CTypeRef> = None;
    let mut max_size = 0;
    let mut max_align = 1;

    for (_, ty) in members.iter().filter(|(_, ty)| occupies_storage(ty)) {
        let layout = ty.layout();
        max_size = max_size.max(layout.size);
        let better = match widest {
            None => true,
            Some(w) => {
                layout.align > w.align() || (layout.align == w.align() && layout.size > w.size())
            }
        };
        if better {
            widest = Some(ty);
        }
        max_align = max_align.max(layout.align);
    }

    let (ffi, layout, sized) = match widest.and_then(|w| w.ffi_type().map(|t| (w, t))) {
        Some((w, widest_ffi)) => {
            let size = round_up(max_size, max_align);
            let padding = size - w.size();
            let elements = iter::once(widest_ffi)
                .chain(iter::repeat(Type::u8()).take(padding))
                .collect();
            let (ty, _, _) = struct_offsets(elements)?;
            (Some(ty), Layout::new(size, max_align), true)
        }
        None => (None, Layout::EMPTY, false),
    };

    let fields = members
        .into_iter()
        .map(|(name, ty)| CField {
            name,
            ty,
            offset: 0,
        })
        .collect();

    Ok(RecordLayout {
        fields,
        layout,
        sized,
        ffi,
    })
}
