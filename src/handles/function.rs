//! Function handle wrapper

use std::os::raw::c_void;

use crate::error::{Error, Result};
use crate::handles::expect_kind;
use crate::value::{Kind, Value};

/// View over a [`Value`] of kind [`Kind::Function`].
///
/// Functions are opaque to the host; the wrapper exists to carry the
/// handle to a consuming call (`Class::add_method`, declarations).
#[derive(Debug)]
pub struct Function {
    value: Value,
}

impl Function {
    /// Wrap `value`, failing with `TypeMismatch` for any other kind.
    pub fn from_value(value: Value) -> Result<Self> {
        expect_kind(&value, Kind::Function)?;
        Ok(Function { value })
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Give the wrapped value back.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Strip ownership and hand the raw reference to the caller.
    ///
    /// The wrapper becomes inert; a second detach (or any later use
    /// through a consuming call) fails with `InvalidHandle`.
    pub fn detach(&mut self) -> Result<*mut c_void> {
        if self.value.handle().is_null() {
            return Err(Error::InvalidHandle);
        }
        Ok(self.value.detach())
    }
}
