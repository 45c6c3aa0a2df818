//! Object handle wrapper

use std::ffi::CString;

use crate::abi::{self, MjsValue};
use crate::error::Result;
use crate::handles::{expect_kind, live_handle};
use crate::util::parse_string_array;
use crate::value::{Kind, Value};

/// View over a [`Value`] of kind [`Kind::Object`].
///
/// Same borrowing/consuming split as [`crate::Array`]: `get` borrows,
/// `set` consumes. `keys` parses the engine's compact array-of-strings
/// wire format.
#[derive(Debug)]
pub struct Object {
    value: Value,
}

impl Object {
    /// Wrap `value`, failing with `TypeMismatch` for any other kind.
    pub fn from_value(value: Value) -> Result<Self> {
        expect_kind(&value, Kind::Object)?;
        Ok(Object { value })
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Give the wrapped value back.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Whether the object has an own property `key`.
    pub fn has(&self, key: &str) -> Result<bool> {
        let h = live_handle(&self.value)?;
        let key = CString::new(key)?;
        Ok(unsafe { abi::minijs_object_has(h, key.as_ptr()) } != 0)
    }

    /// Borrowing read of property `key`; null when absent.
    pub fn get(&self, key: &str) -> Result<Value> {
        let h = live_handle(&self.value)?;
        let key = CString::new(key)?;
        let mut out = MjsValue::null();
        unsafe { abi::minijs_object_get(h, key.as_ptr(), &mut out) };
        Ok(Value::from_get_result(out))
    }

    /// Consuming write of property `key`.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let h = live_handle(&self.value)?;
        let key = CString::new(key)?;
        let (nv, _text) = value.into_native_consuming()?;
        unsafe { abi::minijs_object_set(h, key.as_ptr(), &nv) };
        Ok(())
    }

    /// Own property names, in insertion order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let h = live_handle(&self.value)?;
        let raw = unsafe { abi::minijs_object_keys(h) };
        let text = unsafe { abi::take_engine_text(raw) };
        Ok(parse_string_array(&text))
    }
}
