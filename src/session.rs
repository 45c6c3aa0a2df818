//! Engine session and callback trampoline
//!
//! A [`Session`] owns one native interpreter instance and the arena of
//! closures the engine can call back into. The arena must outlive the
//! interpreter: the engine may invoke any registered callback until it
//! is destroyed, so [`Session::destroy`] tears the interpreter down
//! first and only then drops the closures.
//!
//! Sessions are single-threaded. Reentrancy on the same thread (engine →
//! callback → engine) is supported; retain/release pairs simply nest.

use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::os::raw::{c_int, c_void};
use std::panic::{self, AssertUnwindSafe};

use crate::abi::{self, MjsValue};
use crate::error::{Error, Result};
use crate::handles::{Array, Class, Function, Object};
use crate::value::{Kind, Value};

/// Host closure invoked from script through the trampoline.
///
/// Arguments and `this` arrive as owned values (the trampoline retains
/// handle arguments, so dropping them is always safe). The returned
/// value is consumed by the engine; returning an `Err` surfaces to the
/// script as an `"Error: ..."` string result.
pub type Callback = Box<dyn Fn(&[Value], &Value) -> Result<Value>>;

/// One registered closure. Boxed so its address stays stable for the
/// engine's userdata pointer while the arena vector grows.
struct Binding {
    callback: Callback,
}

/// Owning context for one native interpreter and its callbacks.
///
/// States: created (`new`) → running → destroyed (`destroy`, terminal).
/// Any operation after destruction fails with `InvalidHandle`.
pub struct Session {
    raw: Cell<*mut c_void>,
    bindings: RefCell<Vec<Box<Binding>>>,
}

impl Session {
    /// Allocate a native interpreter.
    pub fn new() -> Result<Self> {
        let raw = unsafe { abi::minijs_create() };
        if raw.is_null() {
            return Err(Error::EngineCreationFailed);
        }
        log::debug!("engine session created");
        Ok(Session {
            raw: Cell::new(raw),
            bindings: RefCell::new(Vec::new()),
        })
    }

    fn raw(&self) -> Result<*mut c_void> {
        let raw = self.raw.get();
        if raw.is_null() {
            Err(Error::InvalidHandle)
        } else {
            Ok(raw)
        }
    }

    /// Execute script source and return the text rendering of the final
    /// statement value.
    ///
    /// May be called reentrantly from inside a registered callback.
    pub fn run(&self, source: &str) -> Result<String> {
        let raw = self.raw()?;
        let source = CString::new(source)?;
        let out = unsafe { abi::minijs_run(raw, source.as_ptr()) };
        Ok(unsafe { abi::take_engine_text(out) })
    }

    /// Bind a global native function under `name`.
    pub fn register<F>(&self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(&[Value], &Value) -> Result<Value> + 'static,
    {
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        let raw = self.raw()?;
        let c_name = CString::new(name)?;
        let userdata = self.store_binding(Box::new(callback));
        unsafe { abi::minijs_register(raw, c_name.as_ptr(), trampoline, userdata) };
        log::trace!("registered native function '{}'", name);
        Ok(())
    }

    /// Create a function handle for a host closure, e.g. for
    /// [`Class::add_method`].
    pub fn create_function<F>(&self, callback: F) -> Result<Function>
    where
        F: Fn(&[Value], &Value) -> Result<Value> + 'static,
    {
        self.raw()?;
        let userdata = self.store_binding(Box::new(callback));
        let handle = unsafe { abi::minijs_function_create_native(trampoline, userdata) };
        if handle.is_null() {
            return Err(Error::NativeCallFailed("minijs_function_create_native"));
        }
        Function::from_value(Value::from_handle(Kind::Function, handle, false))
    }

    /// Create a named class. Declare it into global scope when the
    /// methods are in place.
    pub fn create_class(&self, name: &str) -> Result<Class> {
        let raw = self.raw()?;
        let c_name = CString::new(name)?;
        let handle = unsafe { abi::minijs_class_create(raw, c_name.as_ptr()) };
        if handle.is_null() {
            return Err(Error::NativeCallFailed("minijs_class_create"));
        }
        Class::from_value(Value::from_handle(Kind::Class, handle, false))
    }

    /// Create an empty object.
    pub fn create_object(&self) -> Result<Object> {
        self.raw()?;
        let handle = unsafe { abi::minijs_object_create() };
        if handle.is_null() {
            return Err(Error::NativeCallFailed("minijs_object_create"));
        }
        Object::from_value(Value::from_handle(Kind::Object, handle, false))
    }

    /// Create an empty array.
    pub fn create_array(&self) -> Result<Array> {
        self.raw()?;
        let handle = unsafe { abi::minijs_array_create() };
        if handle.is_null() {
            return Err(Error::NativeCallFailed("minijs_array_create"));
        }
        Array::from_value(Value::from_handle(Kind::Array, handle, false))
    }

    /// Declare `value` into global scope, keeping the caller's value
    /// alive.
    ///
    /// The declare call consumes one count, so a duplicate is retained
    /// first; the net effect on the caller's reference is zero.
    pub fn declare(&self, name: &str, value: &Value) -> Result<()> {
        let raw = self.raw()?;
        let c_name = CString::new(name)?;
        let (mut nv, _text) = value.to_native_borrowed()?;
        if value.is_handle_kind() && !value.handle().is_null() {
            unsafe { abi::minijs_handle_retain(value.handle()) };
            nv.handle = value.handle();
        }
        unsafe { abi::minijs_global_declare(raw, c_name.as_ptr(), &nv) };
        log::trace!("declared global '{}' (copy)", name);
        Ok(())
    }

    /// Declare `value` into global scope, transferring ownership.
    ///
    /// The value's handle (if any) is detached and consumed by the
    /// engine.
    pub fn declare_move(&self, name: &str, value: Value) -> Result<()> {
        let raw = self.raw()?;
        let c_name = CString::new(name)?;
        let (nv, _text) = value.into_native_consuming()?;
        unsafe { abi::minijs_global_declare(raw, c_name.as_ptr(), &nv) };
        log::trace!("declared global '{}' (move)", name);
        Ok(())
    }

    /// Tear down the interpreter, then the callback arena. Idempotent.
    ///
    /// Handles still held by the host after this point must not be used;
    /// that is a contract of the protocol, not something the session can
    /// trap.
    pub fn destroy(&mut self) {
        let raw = self.raw.replace(std::ptr::null_mut());
        if raw.is_null() {
            return;
        }
        unsafe { abi::minijs_destroy(raw) };
        self.bindings.borrow_mut().clear();
        log::debug!("engine session destroyed");
    }

    fn store_binding(&self, callback: Callback) -> *mut c_void {
        let binding = Box::new(Binding { callback });
        let userdata = &*binding as *const Binding as *mut c_void;
        self.bindings.borrow_mut().push(binding);
        userdata
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// The fixed-signature entry point the engine invokes for every
/// registered closure.
///
/// Arguments and `this` are borrowed; they are marshaled with
/// `retain = true` so the host values own their counts no matter what
/// the closure does with them. The return value is consumed by the
/// engine. Closure errors and panics never unwind across the ABI; they
/// come back as an `"Error: ..."` string result.
unsafe extern "C" fn trampoline(
    argc: c_int,
    argv: *const MjsValue,
    this_val: *const MjsValue,
    userdata: *mut c_void,
) -> MjsValue {
    if userdata.is_null() {
        return MjsValue::null();
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let binding = unsafe { &*(userdata as *const Binding) };
        let count = if argv.is_null() { 0 } else { argc.max(0) as usize };
        let mut args = Vec::with_capacity(count);
        for i in 0..count {
            let nv = unsafe { &*argv.add(i) };
            args.push(Value::from_native(nv, true));
        }
        let this = if this_val.is_null() {
            Value::Null
        } else {
            Value::from_native(unsafe { &*this_val }, true)
        };
        (binding.callback)(&args, &this)
    }));

    match outcome {
        Ok(Ok(value)) => consume_into_native(value),
        Ok(Err(err)) => {
            log::debug!("native callback failed: {}", err);
            error_result(&err.to_string())
        }
        Err(payload) => {
            let msg = panic_message(&payload);
            log::debug!("native callback panicked: {}", msg);
            error_result(msg)
        }
    }
}

/// Marshal a closure's return value into a struct the engine consumes:
/// strings re-allocated with the engine allocator, handles detached.
fn consume_into_native(mut value: Value) -> MjsValue {
    let mut out = MjsValue::null();
    out.kind = value.kind().to_raw();
    if value.is_handle_kind() {
        out.handle = value.detach();
        return out;
    }
    match &value {
        Value::Number(n) => out.num = *n,
        Value::Bool(b) => out.boolean = i32::from(*b),
        Value::String(s) => out.str_ = abi::alloc_engine_text(s),
        _ => {}
    }
    out
}

fn error_result(message: &str) -> MjsValue {
    let mut out = MjsValue::null();
    out.kind = Kind::String.to_raw();
    out.str_ = abi::alloc_engine_text(&format!("Error: {}", message));
    out
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "native callback panicked"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::heap::refcount;
    use std::rc::Rc;

    #[test]
    fn create_run_destroy() {
        let mut session = Session::new().unwrap();
        assert_eq!(session.run("1 + 2").unwrap(), "3");
        session.destroy();
        session.destroy(); // second call is a no-op
        assert!(matches!(session.run("1"), Err(Error::InvalidHandle)));
    }

    #[test]
    fn register_rejects_blank_names() {
        let session = Session::new().unwrap();
        let err = session
            .register("", |_args, _this| Ok(Value::Null))
            .unwrap_err();
        assert!(matches!(err, Error::EmptyName));
    }

    #[test]
    fn host_function_from_script() {
        let session = Session::new().unwrap();
        session
            .register("hostAdd", |args, _this| {
                let a = args.first().map_or(0.0, |v| v.as_number(0.0));
                let b = args.get(1).map_or(0.0, |v| v.as_number(0.0));
                Ok(Value::Number(a + b))
            })
            .unwrap();

        assert_eq!(session.run("hostAdd(2, 3)").unwrap(), "5");
    }

    #[test]
    fn counter_class_end_to_end() {
        let session = Session::new().unwrap();
        let counter = session.create_class("Counter").unwrap();

        let ctor = session
            .create_function(|args, this| {
                let this = Object::from_value(this.clone())?;
                let start = args.first().map_or(0.0, |v| v.as_number(0.0));
                this.set("x", Value::Number(start))?;
                Ok(Value::Null)
            })
            .unwrap();
        counter.add_method(crate::handles::CONSTRUCTOR, ctor).unwrap();

        let inc = session
            .create_function(|_args, this| {
                let this = Object::from_value(this.clone())?;
                let x = this.get("x")?.as_number(0.0) + 1.0;
                this.set("x", Value::Number(x))?;
                Ok(Value::Number(x))
            })
            .unwrap();
        counter.add_method("inc", inc).unwrap();

        session.declare_move("Counter", counter.into_value()).unwrap();

        assert_eq!(
            session.run("var c = new Counter(5); c.inc()").unwrap(),
            "6"
        );
        assert_eq!(session.run("var c = new Counter(0); c.inc() + c.inc()").unwrap(), "3");
    }

    #[test]
    fn failing_closure_is_contained() {
        let session = Session::new().unwrap();
        session
            .register("boom", |_args, _this| {
                Err(Error::ClosureFailure("kaboom".into()))
            })
            .unwrap();
        session
            .register("ok", |_args, _this| Ok(Value::Number(1.0)))
            .unwrap();

        let result = session.run("boom()").unwrap();
        assert!(result.starts_with("Error: "), "got: {result}");
        assert!(result.contains("kaboom"));

        // The session stays usable afterwards.
        assert_eq!(session.run("ok()").unwrap(), "1");
    }

    #[test]
    fn panicking_closure_is_contained() {
        let session = Session::new().unwrap();
        session
            .register("panics", |_args, _this| panic!("do not cross the ABI"))
            .unwrap();

        let result = session.run("panics()").unwrap();
        assert!(result.starts_with("Error: "), "got: {result}");
        assert!(result.contains("do not cross the ABI"));
        assert_eq!(session.run("1 + 1").unwrap(), "2");
    }

    #[test]
    fn copy_declare_keeps_the_caller_value() {
        let session = Session::new().unwrap();
        let array = session.create_array().unwrap();
        array.push(Value::from(1)).unwrap();
        let value = array.into_value();
        let raw = value.handle();
        assert_eq!(refcount(raw), 1);

        session.declare("a", &value).unwrap();
        // Caller's count plus the global scope's count.
        assert_eq!(refcount(raw), 2);
        assert!(!value.handle().is_null());

        // The engine sees the same array the caller still holds.
        session
            .register("lenOf", |args, _this| {
                let arr = Array::from_value(args[0].clone())?;
                Ok(Value::Number(arr.len()? as f64))
            })
            .unwrap();
        assert_eq!(session.run("lenOf(a)").unwrap(), "1");
    }

    #[test]
    fn move_declare_transfers_ownership() {
        let session = Session::new().unwrap();
        let value = session.create_array().unwrap().into_value();
        let raw = value.handle();
        let keep = value.clone();
        assert_eq!(refcount(raw), 2);

        session.declare_move("a", value).unwrap();
        // One count moved into global scope; `keep` owns the other.
        assert_eq!(refcount(raw), 2);
        drop(keep);
        assert_eq!(refcount(raw), 1);
    }

    #[test]
    fn move_declare_round_trips_by_identity() {
        let session = Session::new().unwrap();
        let value = session.create_array().unwrap().into_value();
        let original = value.handle();

        session.declare_move("arr", value).unwrap();

        let seen = Rc::new(Cell::new(std::ptr::null_mut::<c_void>()));
        let seen_in_cb = Rc::clone(&seen);
        session
            .register("check", move |args, _this| {
                seen_in_cb.set(args[0].handle());
                Ok(Value::Null)
            })
            .unwrap();
        session.run("check(arr)").unwrap();
        assert_eq!(seen.get(), original);
    }

    #[test]
    fn declare_round_trips_primitives_by_value() {
        let session = Session::new().unwrap();
        session.declare("n", &Value::Number(7.0)).unwrap();
        session
            .declare("greeting", &Value::from("hello"))
            .unwrap();
        session.declare("flag", &Value::Bool(true)).unwrap();

        assert_eq!(session.run("n").unwrap(), "7");
        assert_eq!(session.run("greeting").unwrap(), "hello");
        assert_eq!(session.run("flag").unwrap(), "true");
    }

    #[test]
    fn callbacks_can_reenter_the_engine() {
        let session = Rc::new(Session::new().unwrap());
        let inner = Rc::clone(&session);
        session
            .register("nested", move |_args, _this| {
                Ok(Value::String(inner.run("40 + 2")?))
            })
            .unwrap();

        assert_eq!(session.run("nested()").unwrap(), "42");
    }

    #[test]
    fn callback_returning_a_handle_hands_it_to_the_engine() {
        let session = Session::new().unwrap();
        session
            .register("makeArray", |_args, _this| {
                let arr = unsafe { abi::minijs_array_create() };
                Ok(Value::from_handle(Kind::Array, arr, false))
            })
            .unwrap();

        // The returned handle is consumed by the engine and reported as
        // an array; nothing leaks and nothing double-frees.
        assert_eq!(session.run("makeArray()").unwrap(), "[array]");
        assert_eq!(session.run("var a = makeArray(); a == a").unwrap(), "true");
    }

    #[test]
    fn session_objects_round_trip_through_globals() {
        let session = Session::new().unwrap();
        let obj = session.create_object().unwrap();
        obj.set("name", Value::from("widget")).unwrap();
        obj.set("count", Value::from(3)).unwrap();
        assert_eq!(obj.keys().unwrap(), vec!["name", "count"]);

        session.declare_move("w", obj.into_value()).unwrap();
        assert_eq!(session.run("w.name").unwrap(), "widget");
        assert_eq!(session.run("w.count + 1").unwrap(), "4");
    }

    #[test]
    fn arguments_arrive_retained_and_typed() {
        let session = Session::new().unwrap();
        session
            .register("describe", |args, _this| {
                let mut text = String::new();
                for arg in args {
                    text.push_str(&format!("{}:{};", arg.kind(), arg));
                }
                Ok(Value::String(text))
            })
            .unwrap();

        assert_eq!(
            session.run("describe(1, 'two', true, null)").unwrap(),
            "number:1;string:two;bool:true;null:null;"
        );
    }
}
