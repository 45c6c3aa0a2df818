//! Array handle wrapper

use crate::abi::{self, MjsValue};
use crate::error::Result;
use crate::handles::{expect_kind, live_handle};
use crate::value::{Kind, Value};

/// View over a [`Value`] of kind [`Kind::Array`].
///
/// `get` is a borrowing call: the returned [`Value`] holds no count and
/// must be cloned to outlive the array. `set` and `push` are consuming
/// calls: the passed value's handle (if any) moves into the array.
#[derive(Debug)]
pub struct Array {
    value: Value,
}

impl Array {
    /// Wrap `value`, failing with `TypeMismatch` for any other kind.
    pub fn from_value(value: Value) -> Result<Self> {
        expect_kind(&value, Kind::Array)?;
        Ok(Array { value })
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Give the wrapped value back.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Number of elements.
    pub fn len(&self) -> Result<i32> {
        let h = live_handle(&self.value)?;
        Ok(unsafe { abi::minijs_array_length(h) })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Borrowing read of the element at `index`; null past the end.
    pub fn get(&self, index: i32) -> Result<Value> {
        let h = live_handle(&self.value)?;
        let mut out = MjsValue::null();
        unsafe { abi::minijs_array_get(h, index, &mut out) };
        Ok(Value::from_get_result(out))
    }

    /// Consuming write of the element at `index`; the array grows with
    /// nulls when `index` is past the end.
    pub fn set(&self, index: i32, value: Value) -> Result<()> {
        let h = live_handle(&self.value)?;
        let (nv, _text) = value.into_native_consuming()?;
        unsafe { abi::minijs_array_set(h, index, &nv) };
        Ok(())
    }

    /// Consuming append.
    pub fn push(&self, value: Value) -> Result<()> {
        let h = live_handle(&self.value)?;
        let (nv, _text) = value.into_native_consuming()?;
        unsafe { abi::minijs_array_push(h, &nv) };
        Ok(())
    }
}
