//! FFI function calling through libffi
//!
//! A call description (cif) is prepared per invocation from the declared
//! prototype plus, for variadic functions, the promoted types of the extra
//! arguments. Every argument is marshaled into its own aligned slot and the
//! return value lands in a slot at least as wide as `ffi_arg`, since libffi
//! widens small integer returns to that size.

use crate::cdata::{Buffer, CData};
use crate::ctype::{CFunc, CTypeKind, CTypeRef, Primitive, Scalar};
use crate::error::{FfiError, FfiResult};
use crate::ffi::marshal::{self, Coercion, MarshalContext, Number};
use crate::value::Value;
use libffi::middle::{CodePtr, Type};
use libffi::raw;
use std::mem::{align_of, size_of};
use std::os::raw::{c_int, c_long, c_void};
use std::ptr;
use tracing::trace;

/// One marshaled argument: its libffi type and the bytes libffi reads
struct ArgSlot {
    ty: Type,
    data: Buffer,
}

impl ArgSlot {
    fn scalar(scalar: Scalar, n: Number) -> FfiResult<Self> {
        let data = Buffer::zeroed(8, 8)?;
        // SAFETY: 8 bytes cover every scalar
        unsafe { marshal::write_scalar(scalar, data.as_ptr(), n) };
        Ok(Self {
            ty: scalar.ffi_type(),
            data,
        })
    }

    fn pointer(address: *const c_void) -> FfiResult<Self> {
        let data = Buffer::zeroed(size_of::<*const c_void>(), align_of::<*const c_void>())?;
        // SAFETY: buffer is pointer-sized
        unsafe { marshal::write_pointer(data.as_ptr(), address) };
        Ok(Self {
            ty: Type::pointer(),
            data,
        })
    }
}

/// Invoke `fn_ptr` with prototype `func`
///
/// Non-variadic functions need exactly the declared argument count, variadic
/// ones at least the fixed count.
pub(crate) fn call(func: &CFunc, fn_ptr: *mut c_void, args: &[Value]) -> FfiResult<Option<Value>> {
    let fixed = func.params.len();
    let arity_ok = if func.variadic {
        args.len() >= fixed
    } else {
        args.len() == fixed
    };
    if !arity_ok {
        return Err(FfiError::Arity {
            expected: fixed,
            got: args.len(),
            variadic: func.variadic,
        });
    }
    if fn_ptr.is_null() {
        return Err(FfiError::type_error(format!(
            "attempt to call NULL function '{}'",
            func.name
        )));
    }

    let ret_type = return_ffi_type(&func.ret)?;

    let mut ctx = MarshalContext::new();
    let mut slots = Vec::with_capacity(args.len());
    for (param, arg) in func.params.iter().zip(args) {
        slots.push(fixed_slot(param, arg, &mut ctx)?);
    }
    for arg in &args[fixed..] {
        slots.push(promote(arg)?);
    }

    let mut arg_types: Vec<*mut raw::ffi_type> =
        slots.iter().map(|slot| slot.ty.as_raw_ptr()).collect();
    let mut arg_values: Vec<*mut c_void> = slots
        .iter()
        .map(|slot| slot.data.as_ptr() as *mut c_void)
        .collect();

    // SAFETY: zeroed is the expected initial state for ffi_prep_cif
    let mut cif: raw::ffi_cif = unsafe { std::mem::zeroed() };
    // SAFETY: arg_types and ret_type outlive the cif, which is only used below
    let status = unsafe {
        if func.variadic {
            raw::ffi_prep_cif_var(
                &mut cif,
                raw::ffi_abi_FFI_DEFAULT_ABI,
                fixed as u32,
                arg_types.len() as u32,
                ret_type.as_raw_ptr(),
                arg_types.as_mut_ptr(),
            )
        } else {
            raw::ffi_prep_cif(
                &mut cif,
                raw::ffi_abi_FFI_DEFAULT_ABI,
                arg_types.len() as u32,
                ret_type.as_raw_ptr(),
                arg_types.as_mut_ptr(),
            )
        }
    };
    if status != raw::ffi_status_FFI_OK {
        return Err(FfiError::type_error(format!(
            "failed to prepare call to '{}' (status {})",
            func.name, status
        )));
    }

    let ret_slot = Buffer::zeroed(
        func.ret.size().max(size_of::<raw::ffi_arg>()),
        func.ret.align().max(align_of::<raw::ffi_arg>()),
    )?;

    trace!(function = %func.name, args = args.len(), "calling native function");
    let code = CodePtr(fn_ptr);
    // SAFETY: the declared prototype is trusted to match the native function;
    // argument slots and anchors in `ctx` stay alive across the call
    unsafe {
        raw::ffi_call(
            &mut cif,
            Some(*code.as_safe_fun()),
            ret_slot.as_ptr() as *mut c_void,
            arg_values.as_mut_ptr(),
        );
    }
    drop(ctx);

    decode_return(&func.ret, &ret_slot)
}

/// libffi type of a return value; arrays and functions cannot be returned
fn return_ffi_type(ret: &CTypeRef) -> FfiResult<Type> {
    let unsupported = || FfiError::type_error(format!("unsupported return type '{}'", ret));
    match &ret.kind {
        CTypeKind::Primitive(p) => Ok(p.ffi_type()),
        CTypeKind::Pointer(_) => Ok(Type::pointer()),
        CTypeKind::Record(_) => ret.ffi_type().ok_or_else(unsupported),
        CTypeKind::Array(_) | CTypeKind::Function(_) => Err(unsupported()),
    }
}

/// Marshal a declared parameter
fn fixed_slot(param: &CTypeRef, arg: &Value, ctx: &mut MarshalContext) -> FfiResult<ArgSlot> {
    let ty = param
        .ffi_type()
        .filter(|_| param.is_sized() && !param.is_void())
        .ok_or_else(|| FfiError::type_error(format!("unsupported type '{}'", param)))?;
    let data = Buffer::zeroed(param.size().max(8), param.align().max(8))?;
    // SAFETY: slot is at least the parameter's size
    unsafe { ctx.write(param, data.as_ptr(), arg, Coercion::Implicit)? };
    Ok(ArgSlot { ty, data })
}

/// Default argument promotion for values passed through `...`
fn promote(arg: &Value) -> FfiResult<ArgSlot> {
    let long = Scalar::int(size_of::<c_long>(), true);
    let int = Scalar::int(size_of::<c_int>(), true);

    match arg {
        Value::Bool(b) => ArgSlot::scalar(int, Number::Int(i64::from(*b))),
        Value::Integer(i) => ArgSlot::scalar(long, Number::Int(*i)),
        Value::Number(n) => ArgSlot::scalar(Scalar::F64, Number::Float(*n)),
        Value::Nil => ArgSlot::pointer(ptr::null()),
        Value::String(s) => ArgSlot::pointer(s.as_ptr() as *const c_void),
        Value::Handle(h) => ArgSlot::pointer(*h),
        Value::CData(cd) => match &cd.ctype().kind {
            CTypeKind::Record(_) | CTypeKind::Array(_) => {
                ArgSlot::pointer(cd.as_ptr() as *const c_void)
            }
            CTypeKind::Pointer(_) | CTypeKind::Function(_) => ArgSlot::pointer(cd.address()),
            CTypeKind::Primitive(Primitive::Void) => Err(unsupported(arg)),
            CTypeKind::Primitive(p) => {
                let Some(scalar) = p.scalar() else {
                    return Err(unsupported(arg));
                };
                // SAFETY: memory holds an object of this primitive type
                let n = unsafe { marshal::read_scalar(scalar, cd.as_ptr()) };
                let promoted = match scalar {
                    Scalar::F32 => Scalar::F64,
                    s if s.size() < int.size() => int,
                    s => s,
                };
                ArgSlot::scalar(promoted, n)
            }
        },
        Value::Array(_) | Value::Map(_) | Value::CType(_) | Value::Library(_) => {
            Err(unsupported(arg))
        }
    }
}

fn unsupported(arg: &Value) -> FfiError {
    FfiError::type_error(format!("unsupported type '{}'", arg.type_name()))
}

/// Turn the raw return slot into a host value
fn decode_return(ret: &CTypeRef, slot: &Buffer) -> FfiResult<Option<Value>> {
    let value = match &ret.kind {
        CTypeKind::Primitive(Primitive::Void) => return Ok(None),
        CTypeKind::Primitive(p) => {
            let Some(scalar) = p.scalar() else {
                return Ok(None);
            };
            // SAFETY: slot is at least ffi_arg-sized and holds the result
            unsafe {
                if scalar.is_float() {
                    marshal::read_primitive(*p, slot.as_ptr())
                } else {
                    // Small integers come back widened to ffi_arg
                    let widened = ptr::read(slot.as_ptr() as *const raw::ffi_arg);
                    let mut narrow = [0u8; 8];
                    marshal::write_number(*p, narrow.as_mut_ptr(), Number::Int(widened as i64));
                    marshal::read_primitive(*p, narrow.as_ptr())
                }
            }
        }
        CTypeKind::Pointer(_) => {
            // SAFETY: slot holds a returned pointer
            let address = unsafe { marshal::read_pointer(slot.as_ptr()) };
            Value::CData(CData::pointer(ret.clone(), address)?)
        }
        CTypeKind::Record(_) => {
            let cd = CData::owned(ret.clone(), ret.size())?;
            // SAFETY: slot holds `ret.size()` bytes of the returned record
            unsafe { cd.copy_from(slot.as_ptr(), ret.size()) };
            Value::CData(cd)
        }
        CTypeKind::Array(_) | CTypeKind::Function(_) => {
            return Err(FfiError::type_error(format!(
                "unsupported return type '{}'",
                ret
            )))
        }
    };
    Ok(Some(value))
}
