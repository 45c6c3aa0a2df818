//! MiniJS - safe Rust bindings for the MiniJS embedded scripting engine
//!
//! MiniJS exposes its engine through a small C ABI: a fixed-layout value
//! struct, opaque reference-counted handles, and a native-callback entry
//! point. This crate wraps that ABI in an ownership-safe API:
//!
//! - [`Value`]: a closed tagged value (null, number, bool, string, and
//!   the handle kinds array/object/function/class), with clone = retain,
//!   move = transfer, drop = release for handle kinds
//! - [`Array`], [`Object`], [`Function`], [`Class`]: typed views over a
//!   `Value` of one handle kind
//! - [`Session`]: owns one interpreter instance plus every registered
//!   host callback, and bridges script calls into Rust closures
//!
//! A bundled reference engine provides the ABI in-process, so the crate
//! builds and tests without a platform `libminijs`.
//!
//! # Example
//! ```
//! use minijs::{Session, Value};
//!
//! let session = Session::new().unwrap();
//! session
//!     .register("hostAdd", |args, _this| {
//!         let a = args.first().map_or(0.0, |v| v.as_number(0.0));
//!         let b = args.get(1).map_or(0.0, |v| v.as_number(0.0));
//!         Ok(Value::Number(a + b))
//!     })
//!     .unwrap();
//! assert_eq!(session.run("hostAdd(2, 3)").unwrap(), "5");
//! ```

// Boundary layer
pub mod abi;

// Host value wrapper
pub mod value;

// Typed handle wrappers
pub mod handles;

// Session and trampoline
pub mod session;

// Errors
pub mod error;

// Bundled reference engine (the black box behind the ABI)
mod engine;

// Small shared helpers
mod util;

// Re-export main types
pub use error::{Error, Result};
pub use handles::{Array, CONSTRUCTOR, Class, Function, Object};
pub use session::{Callback, Session};
pub use value::{Kind, Value};
