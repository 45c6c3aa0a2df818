//! C ABI surface of the MiniJS engine
//!
//! Everything that crosses the engine boundary goes through this module:
//! the fixed-layout value struct, the kind tags, the native callback
//! signature, and the `minijs_*` functions themselves. The rest of the
//! crate never sees the wire representation; it converts to and from
//! [`crate::value::Value`] right here at the edge.
//!
//! The function surface is provided by the bundled reference engine in
//! [`crate::engine`]. It stands in for a platform `libminijs`; the
//! signatures are the C ones, so host code written against this module
//! does not care which engine is behind it.

use std::os::raw::{c_char, c_int, c_void};

// Kind tags carried in `MjsValue::kind`. Stable across the ABI.
pub const MINIJS_NULL: i32 = 0;
pub const MINIJS_NUMBER: i32 = 1;
pub const MINIJS_BOOL: i32 = 2;
pub const MINIJS_STRING: i32 = 3;
pub const MINIJS_ARRAY: i32 = 4;
pub const MINIJS_OBJECT: i32 = 5;
pub const MINIJS_FUNCTION: i32 = 6;
pub const MINIJS_CLASS: i32 = 7;
pub const MINIJS_TASK: i32 = 8;

/// Fixed-layout value record passed through the ABI.
///
/// Only the fields relevant to `kind` are meaningful; the others are
/// zero/null. `str_` is either null, a host-owned buffer (outbound
/// arguments) or an engine-allocated buffer that must be freed with
/// [`minijs_free`] (inbound results). `handle` is an opaque pointer into
/// engine-owned, reference-counted memory and is never dereferenced on
/// this side of the boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MjsValue {
    pub kind: i32,
    pub num: f64,
    pub boolean: i32,
    pub str_: *const c_char,
    pub handle: *mut c_void,
}

impl MjsValue {
    /// An all-zero record of kind `MINIJS_NULL`.
    pub const fn null() -> Self {
        MjsValue {
            kind: MINIJS_NULL,
            num: 0.0,
            boolean: 0,
            str_: std::ptr::null(),
            handle: std::ptr::null_mut(),
        }
    }
}

impl Default for MjsValue {
    fn default() -> Self {
        MjsValue::null()
    }
}

/// Signature of a native callback the engine can invoke.
///
/// `argv` entries and `this_val` are borrowed references; the return
/// value is consumed by the engine (string payloads must come from
/// [`minijs_malloc`], handle payloads give up one reference count).
pub type NativeCallback = unsafe extern "C" fn(
    argc: c_int,
    argv: *const MjsValue,
    this_val: *const MjsValue,
    userdata: *mut c_void,
) -> MjsValue;

pub use crate::engine::exports::{
    minijs_array_create, minijs_array_get, minijs_array_length, minijs_array_push,
    minijs_array_set, minijs_class_add_method, minijs_class_create, minijs_create,
    minijs_destroy, minijs_free, minijs_function_create_native, minijs_global_declare,
    minijs_handle_release, minijs_handle_retain, minijs_malloc, minijs_object_create,
    minijs_object_get, minijs_object_has, minijs_object_keys, minijs_object_set,
    minijs_register, minijs_run,
};

/// Copy `s` into a NUL-terminated buffer from the engine allocator.
///
/// Used for string payloads the engine will take ownership of (callback
/// returns). Returns null if the allocator fails.
pub(crate) fn alloc_engine_text(s: &str) -> *const c_char {
    let bytes = s.as_bytes();
    unsafe {
        let mem = minijs_malloc(bytes.len() + 1) as *mut u8;
        if mem.is_null() {
            return std::ptr::null();
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mem, bytes.len());
        *mem.add(bytes.len()) = 0;
        mem as *const c_char
    }
}

/// Copy an engine-allocated string out and free the original.
///
/// # Safety
/// `p` must be null or a NUL-terminated buffer from [`minijs_malloc`];
/// it is invalid after this call.
pub(crate) unsafe fn take_engine_text(p: *const c_char) -> String {
    if p.is_null() {
        return String::new();
    }
    let text = unsafe { std::ffi::CStr::from_ptr(p) }
        .to_string_lossy()
        .into_owned();
    unsafe { minijs_free(p as *mut c_void) };
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_struct_layout_is_fixed() {
        let v = MjsValue::null();
        assert_eq!(v.kind, MINIJS_NULL);
        assert!(v.str_.is_null());
        assert!(v.handle.is_null());
    }

    // Field offsets must match the engine's 8-byte-packed C struct.
    #[test]
    #[cfg(target_pointer_width = "64")]
    fn wire_struct_offsets_match_c() {
        assert_eq!(std::mem::offset_of!(MjsValue, kind), 0);
        assert_eq!(std::mem::offset_of!(MjsValue, num), 8);
        assert_eq!(std::mem::offset_of!(MjsValue, boolean), 16);
        assert_eq!(std::mem::offset_of!(MjsValue, str_), 24);
        assert_eq!(std::mem::offset_of!(MjsValue, handle), 32);
        assert_eq!(std::mem::size_of::<MjsValue>(), 40);
    }

    #[test]
    fn engine_text_round_trip() {
        let p = alloc_engine_text("hello");
        assert!(!p.is_null());
        let s = unsafe { take_engine_text(p) };
        assert_eq!(s, "hello");
    }

    #[test]
    fn take_engine_text_accepts_null() {
        assert_eq!(unsafe { take_engine_text(std::ptr::null()) }, "");
    }
}
