//! Foreign function interface plumbing
//!
//! - `marshal`: host values ↔ typed native memory
//! - `caller`: libffi call preparation and invocation
//! - `loader`: dynamic libraries and symbol resolution
//!
//! # Safety
//!
//! Declared prototypes and sizes are trusted. A wrong declaration makes the
//! native side read or write out of bounds; nothing here can detect that.

pub mod caller;
pub mod loader;
pub mod marshal;

pub use loader::{
    Library, LibraryLoader, LibraryRef, LoadError, NativeModule, ProcessImage, SymbolSource,
    SymbolTable,
};
pub use marshal::{Coercion, MarshalContext};
