//! Class handle wrapper

use std::ffi::CString;

use crate::abi;
use crate::error::{Error, Result};
use crate::handles::{Function, expect_kind, live_handle};
use crate::value::{Kind, Value};

/// The distinguished initializer method name.
///
/// A method registered under this name is invoked by the engine when a
/// script constructs an instance with `new`.
pub const CONSTRUCTOR: &str = "constructor";

/// View over a [`Value`] of kind [`Kind::Class`].
#[derive(Debug)]
pub struct Class {
    value: Value,
}

impl Class {
    /// Wrap `value`, failing with `TypeMismatch` for any other kind.
    pub fn from_value(value: Value) -> Result<Self> {
        expect_kind(&value, Kind::Class)?;
        Ok(Class { value })
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Give the wrapped value back, e.g. to declare the class into
    /// global scope.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Add or replace an instance method. Consumes the function handle;
    /// use [`CONSTRUCTOR`] as the name to install the initializer.
    pub fn add_method(&self, name: &str, mut function: Function) -> Result<()> {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        let h = live_handle(&self.value)?;
        let name = CString::new(name)?;
        let fn_handle = function.detach()?;
        unsafe { abi::minijs_class_add_method(h, name.as_ptr(), fn_handle) };
        Ok(())
    }
}
