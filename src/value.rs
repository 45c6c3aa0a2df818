//! Host-side value wrapper
//!
//! [`Value`] is the closed sum type host code works with: primitives are
//! carried by value, strings are host-owned text copied at the boundary,
//! and the four handle kinds (plus the reserved `Task` kind) carry a
//! reference-counted opaque pointer into engine-owned memory.
//!
//! Ownership rules for handle kinds:
//! - clone = retain, drop = release, move = transfer
//! - [`Value::detach`] strips ownership without touching the count and
//!   resets the wrapper to `Null`; it is the only way a reference leaves
//!   a wrapper for a consuming call
//! - values produced by container `get` calls are borrowed: they hold no
//!   count and release nothing when dropped; cloning one retains a fresh
//!   duplicate

use std::ffi::CString;
use std::fmt;
use std::os::raw::c_void;

use crate::abi::{
    self, MINIJS_ARRAY, MINIJS_BOOL, MINIJS_CLASS, MINIJS_FUNCTION, MINIJS_NULL, MINIJS_NUMBER,
    MINIJS_OBJECT, MINIJS_STRING, MINIJS_TASK, MjsValue,
};
use crate::error::Result;

/// Value kind, mirroring the wire tags in [`crate::abi`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Null,
    Number,
    Bool,
    String,
    Array,
    Object,
    Function,
    Class,
    /// Reserved for future asynchronous results.
    Task,
}

impl Kind {
    /// Map a wire tag to a kind. Unknown tags decay to `Null`.
    pub(crate) fn from_raw(tag: i32) -> Kind {
        match tag {
            MINIJS_NUMBER => Kind::Number,
            MINIJS_BOOL => Kind::Bool,
            MINIJS_STRING => Kind::String,
            MINIJS_ARRAY => Kind::Array,
            MINIJS_OBJECT => Kind::Object,
            MINIJS_FUNCTION => Kind::Function,
            MINIJS_CLASS => Kind::Class,
            MINIJS_TASK => Kind::Task,
            _ => Kind::Null,
        }
    }

    /// The wire tag for this kind.
    pub(crate) fn to_raw(self) -> i32 {
        match self {
            Kind::Null => MINIJS_NULL,
            Kind::Number => MINIJS_NUMBER,
            Kind::Bool => MINIJS_BOOL,
            Kind::String => MINIJS_STRING,
            Kind::Array => MINIJS_ARRAY,
            Kind::Object => MINIJS_OBJECT,
            Kind::Function => MINIJS_FUNCTION,
            Kind::Class => MINIJS_CLASS,
            Kind::Task => MINIJS_TASK,
        }
    }

    /// Whether values of this kind carry an engine handle.
    pub fn is_handle(self) -> bool {
        matches!(
            self,
            Kind::Array | Kind::Object | Kind::Function | Kind::Class | Kind::Task
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Number => "number",
            Kind::Bool => "bool",
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Function => "function",
            Kind::Class => "class",
            Kind::Task => "task",
        };
        f.write_str(name)
    }
}

/// RAII wrapper around one engine handle reference.
///
/// An owned ref holds exactly one retain count and releases it on drop.
/// A borrowed ref holds none and releases nothing; it exists so container
/// `get` results can be dropped without touching the count.
#[derive(Debug)]
pub(crate) struct HandleRef {
    raw: *mut c_void,
    owned: bool,
}

impl HandleRef {
    /// Adopt an existing count (factory results, consumed returns).
    pub(crate) fn owned(raw: *mut c_void) -> Self {
        HandleRef { raw, owned: true }
    }

    /// Retain `raw` and own the new count.
    pub(crate) fn retained(raw: *mut c_void) -> Self {
        unsafe { abi::minijs_handle_retain(raw) };
        HandleRef { raw, owned: true }
    }

    /// Reference `raw` without owning a count.
    pub(crate) fn borrowed(raw: *mut c_void) -> Self {
        HandleRef { raw, owned: false }
    }

    pub(crate) fn raw(&self) -> *mut c_void {
        self.raw
    }

    /// Hand out one caller-owned count and null this ref.
    ///
    /// An owned ref gives up its count without touching the engine; a
    /// borrowed ref retains a fresh duplicate first, so the returned
    /// pointer always carries exactly one count the caller may consume.
    pub(crate) fn detach(&mut self) -> *mut c_void {
        let raw = std::mem::replace(&mut self.raw, std::ptr::null_mut());
        if !self.owned && !raw.is_null() {
            unsafe { abi::minijs_handle_retain(raw) };
        }
        self.owned = false;
        raw
    }
}

impl Clone for HandleRef {
    fn clone(&self) -> Self {
        if self.raw.is_null() {
            HandleRef::owned(self.raw)
        } else {
            HandleRef::retained(self.raw)
        }
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        if self.owned && !self.raw.is_null() {
            unsafe { abi::minijs_handle_release(self.raw) };
        }
    }
}

/// A dynamically-typed script value held by the host.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Number(f64),
    Bool(bool),
    String(String),
    Array(HandleRef),
    Object(HandleRef),
    Function(HandleRef),
    Class(HandleRef),
    Task(HandleRef),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Number(_) => Kind::Number,
            Value::Bool(_) => Kind::Bool,
            Value::String(_) => Kind::String,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
            Value::Function(_) => Kind::Function,
            Value::Class(_) => Kind::Class,
            Value::Task(_) => Kind::Task,
        }
    }

    /// Whether this value carries an engine handle.
    pub fn is_handle_kind(&self) -> bool {
        self.kind().is_handle()
    }

    /// Numeric view: numbers as-is, bools as 0/1, everything else `default`.
    pub fn as_number(&self, default: f64) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            _ => default,
        }
    }

    /// Boolean view: bools as-is, numbers as `!= 0`, everything else `default`.
    pub fn as_bool(&self, default: bool) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => default,
        }
    }

    /// String view; empty for non-string values.
    pub fn as_str(&self) -> &str {
        match self {
            Value::String(s) => s.as_str(),
            _ => "",
        }
    }

    /// The raw engine handle, or null for non-handle kinds and inert refs.
    pub fn handle(&self) -> *mut c_void {
        match self.handle_ref() {
            Some(h) => h.raw(),
            None => std::ptr::null_mut(),
        }
    }

    /// Strip ownership and hand the raw reference to the caller.
    ///
    /// The wrapper becomes `Null` afterwards; the returned pointer carries
    /// exactly one count the caller must consume (typically by passing it
    /// to a consuming ABI call). Null for non-handle kinds.
    pub fn detach(&mut self) -> *mut c_void {
        let mut taken = std::mem::replace(self, Value::Null);
        match taken.handle_ref_mut() {
            Some(h) => h.detach(),
            None => std::ptr::null_mut(),
        }
    }

    pub(crate) fn handle_ref(&self) -> Option<&HandleRef> {
        match self {
            Value::Array(h)
            | Value::Object(h)
            | Value::Function(h)
            | Value::Class(h)
            | Value::Task(h) => Some(h),
            _ => None,
        }
    }

    fn handle_ref_mut(&mut self) -> Option<&mut HandleRef> {
        match self {
            Value::Array(h)
            | Value::Object(h)
            | Value::Function(h)
            | Value::Class(h)
            | Value::Task(h) => Some(h),
            _ => None,
        }
    }

    /// Build a handle-kind value around `raw`.
    ///
    /// `retain = true` adds a count (borrowed input that must be durably
    /// kept); `retain = false` adopts the count already embedded in `raw`
    /// (factory results). Non-handle kinds yield `Null`.
    pub(crate) fn from_handle(kind: Kind, raw: *mut c_void, retain: bool) -> Value {
        let href = if retain && !raw.is_null() {
            HandleRef::retained(raw)
        } else {
            HandleRef::owned(raw)
        };
        match kind {
            Kind::Array => Value::Array(href),
            Kind::Object => Value::Object(href),
            Kind::Function => Value::Function(href),
            Kind::Class => Value::Class(href),
            Kind::Task => Value::Task(href),
            _ => Value::Null,
        }
    }

    /// Convert a wire struct into a host value.
    ///
    /// `retain` follows the same rule as [`Value::from_handle`]. String
    /// payloads are copied; the caller keeps whatever ownership it had
    /// over `nv.str_`.
    pub(crate) fn from_native(nv: &MjsValue, retain: bool) -> Value {
        match Kind::from_raw(nv.kind) {
            Kind::Null => Value::Null,
            Kind::Number => Value::Number(nv.num),
            Kind::Bool => Value::Bool(nv.boolean != 0),
            Kind::String => Value::String(copy_wire_text(nv.str_)),
            kind => Value::from_handle(kind, nv.handle, retain),
        }
    }

    /// Convert the out-param of a borrowing getter into a host value.
    ///
    /// Handle payloads come back borrowed (no count held; drop releases
    /// nothing). String payloads are engine-allocated: they are copied and
    /// freed here with the engine's allocator.
    pub(crate) fn from_get_result(nv: MjsValue) -> Value {
        match Kind::from_raw(nv.kind) {
            Kind::Null => Value::Null,
            Kind::Number => Value::Number(nv.num),
            Kind::Bool => Value::Bool(nv.boolean != 0),
            Kind::String => Value::String(unsafe { abi::take_engine_text(nv.str_) }),
            Kind::Array => Value::Array(HandleRef::borrowed(nv.handle)),
            Kind::Object => Value::Object(HandleRef::borrowed(nv.handle)),
            Kind::Function => Value::Function(HandleRef::borrowed(nv.handle)),
            Kind::Class => Value::Class(HandleRef::borrowed(nv.handle)),
            Kind::Task => Value::Task(HandleRef::borrowed(nv.handle)),
        }
    }

    /// Borrowing view of this value as a wire struct.
    ///
    /// No ownership moves: handle payloads keep their count here, string
    /// payloads point into the returned guard, which must stay alive for
    /// the duration of the ABI call.
    pub(crate) fn to_native_borrowed(&self) -> Result<(MjsValue, Option<CString>)> {
        let mut nv = MjsValue::null();
        nv.kind = self.kind().to_raw();
        match self {
            Value::Null => Ok((nv, None)),
            Value::Number(n) => {
                nv.num = *n;
                Ok((nv, None))
            }
            Value::Bool(b) => {
                nv.boolean = i32::from(*b);
                Ok((nv, None))
            }
            Value::String(s) => {
                let text = CString::new(s.as_str())?;
                nv.str_ = text.as_ptr();
                Ok((nv, Some(text)))
            }
            _ => {
                nv.handle = self.handle();
                Ok((nv, None))
            }
        }
    }

    /// Consuming view of this value as a wire struct.
    ///
    /// Handle payloads are detached into the struct: the embedded count
    /// belongs to whichever consuming call the struct is passed to.
    /// String payloads stay caller-owned (consuming calls copy them), so
    /// the guard must outlive the call just like the borrowing case.
    pub(crate) fn into_native_consuming(mut self) -> Result<(MjsValue, Option<CString>)> {
        if self.is_handle_kind() {
            let mut nv = MjsValue::null();
            nv.kind = self.kind().to_raw();
            nv.handle = self.detach();
            Ok((nv, None))
        } else {
            self.to_native_borrowed()
        }
    }
}

fn copy_wire_text(p: *const std::os::raw::c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        unsafe { std::ffi::CStr::from_ptr(p) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            // Handle kinds compare by identity.
            (a, b) => a.kind() == b.kind() && a.is_handle_kind() && a.handle() == b.handle(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(_) => write!(f, "[array]"),
            Value::Object(_) => write!(f, "[object]"),
            Value::Function(_) => write!(f, "[function]"),
            Value::Class(_) => write!(f, "[class]"),
            Value::Task(_) => write!(f, "[task]"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::heap::refcount;

    fn fresh_array() -> Value {
        let raw = unsafe { abi::minijs_array_create() };
        Value::from_handle(Kind::Array, raw, false)
    }

    #[test]
    fn primitive_accessors() {
        assert_eq!(Value::Number(4.5).as_number(0.0), 4.5);
        assert_eq!(Value::Bool(true).as_number(0.0), 1.0);
        assert_eq!(Value::Null.as_number(7.0), 7.0);
        assert!(Value::Number(2.0).as_bool(false));
        assert!(!Value::Number(0.0).as_bool(true));
        assert_eq!(Value::from("hi").as_str(), "hi");
        assert_eq!(Value::Null.as_str(), "");
    }

    #[test]
    fn clone_retains_drop_releases() {
        let v = fresh_array();
        let raw = v.handle();
        assert_eq!(refcount(raw), 1);

        let copy = v.clone();
        assert_eq!(refcount(raw), 2);

        drop(copy);
        assert_eq!(refcount(raw), 1);
        drop(v);
    }

    #[test]
    fn move_transfers_without_touching_count() {
        let v = fresh_array();
        let raw = v.handle();
        assert_eq!(refcount(raw), 1);

        let moved = v;
        assert_eq!(refcount(raw), 1);
        assert_eq!(moved.handle(), raw);
        drop(moved);
    }

    #[test]
    fn detach_leaves_wrapper_inert() {
        let mut v = fresh_array();
        let raw = v.handle();

        let taken = v.detach();
        assert_eq!(taken, raw);
        assert_eq!(v.kind(), Kind::Null);
        assert!(v.handle().is_null());
        // The count moved out with the pointer; balance it by hand.
        assert_eq!(refcount(raw), 1);
        unsafe { abi::minijs_handle_release(taken) };
    }

    #[test]
    fn detaching_a_borrowed_ref_retains_a_duplicate() {
        let owner = fresh_array();
        let raw = owner.handle();

        let mut borrowed = Value::Array(HandleRef::borrowed(raw));
        let taken = borrowed.detach();
        // The duplicate belongs to us now; the owner's count is untouched.
        assert_eq!(refcount(raw), 2);
        unsafe { abi::minijs_handle_release(taken) };
        assert_eq!(refcount(raw), 1);
        drop(owner);
    }

    #[test]
    fn dropping_a_borrowed_value_releases_nothing() {
        let owner = fresh_array();
        let raw = owner.handle();

        let borrowed = Value::Array(HandleRef::borrowed(raw));
        drop(borrowed);
        assert_eq!(refcount(raw), 1);
        drop(owner);
    }

    #[test]
    fn null_handle_values_are_inert() {
        let v = Value::from_handle(Kind::Object, std::ptr::null_mut(), false);
        assert_eq!(v.kind(), Kind::Object);
        assert!(v.handle().is_null());
        drop(v); // must not release anything
    }

    #[test]
    fn consuming_conversion_detaches() {
        let v = fresh_array();
        let raw = v.handle();

        let (nv, guard) = v.into_native_consuming().unwrap();
        assert!(guard.is_none());
        assert_eq!(nv.handle, raw);
        assert_eq!(refcount(raw), 1);
        unsafe { abi::minijs_handle_release(nv.handle) };
    }

    #[test]
    fn borrowed_conversion_keeps_ownership() {
        let v = Value::from("text");
        let (nv, guard) = v.to_native_borrowed().unwrap();
        assert_eq!(Kind::from_raw(nv.kind), Kind::String);
        assert!(guard.is_some());
        assert_eq!(
            unsafe { std::ffi::CStr::from_ptr(nv.str_) }.to_str().unwrap(),
            "text"
        );
    }

    #[test]
    fn equality_by_value_and_identity() {
        assert_eq!(Value::Number(3.0), Value::Number(3.0));
        assert_ne!(Value::Number(3.0), Value::Bool(true));
        let a = fresh_array();
        let b = a.clone();
        assert_eq!(a, b);
        let c = fresh_array();
        assert_ne!(a, c);
    }
}
