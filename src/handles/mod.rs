//! Typed handle wrappers
//!
//! Thin, single-purpose views over a [`Value`] restricted to one handle
//! kind. Construction asserts the kind; operations fail with
//! [`InvalidHandle`](crate::Error::InvalidHandle) once the underlying
//! handle is null or detached.

mod array;
mod class;
mod function;
mod object;

pub use array::Array;
pub use class::{CONSTRUCTOR, Class};
pub use function::Function;
pub use object::Object;

use std::os::raw::c_void;

use crate::error::{Error, Result};
use crate::value::{Kind, Value};

/// Kind assertion shared by the wrapper constructors.
pub(crate) fn expect_kind(value: &Value, expected: Kind) -> Result<()> {
    let actual = value.kind();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::TypeMismatch { expected, actual })
    }
}

/// The wrapped handle, if it is still live.
pub(crate) fn live_handle(value: &Value) -> Result<*mut c_void> {
    let raw = value.handle();
    if raw.is_null() {
        Err(Error::InvalidHandle)
    } else {
        Ok(raw)
    }
}
