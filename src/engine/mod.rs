//! Bundled reference engine
//!
//! Implements the MiniJS C ABI in-process so the binding builds and tests
//! without a platform `libminijs`. The binding side treats this module as
//! a black box: every interaction goes through [`exports`] and the wire
//! struct, exactly as it would with a native library.

pub(crate) mod heap;
pub(crate) mod interp;
pub(crate) mod lexer;

pub mod exports {
    //! The `minijs_*` C ABI functions.
    //!
    //! Ownership contracts per function match the engine header: `get`
    //! calls hand out borrowed handles and engine-allocated strings,
    //! `set`/`push`/`declare`/`add_method` consume handle payloads, and
    //! every function is a no-op on null where the header says so.

    use std::os::raw::{c_char, c_int, c_void};

    use crate::abi::{MINIJS_FUNCTION, MjsValue, NativeCallback};
    use crate::engine::heap::{
        self, Body, CellRef, ClassBody, HeapCell, NativeFunction, ObjectBody, Slot, new_cell,
    };
    use crate::engine::interp::Interp;

    fn text_arg(p: *const c_char) -> Option<String> {
        if p.is_null() {
            None
        } else {
            Some(
                unsafe { std::ffi::CStr::from_ptr(p) }
                    .to_string_lossy()
                    .into_owned(),
            )
        }
    }

    // ------------------------------------------------------------
    // Allocator
    // ------------------------------------------------------------

    pub unsafe extern "C" fn minijs_malloc(n: usize) -> *mut c_void {
        unsafe { heap::alloc_bytes(n) }
    }

    pub unsafe extern "C" fn minijs_free(p: *mut c_void) {
        unsafe { heap::free_bytes(p) }
    }

    // ------------------------------------------------------------
    // Interpreter lifecycle
    // ------------------------------------------------------------

    pub unsafe extern "C" fn minijs_create() -> *mut c_void {
        Box::into_raw(Box::new(Interp::new())) as *mut c_void
    }

    pub unsafe extern "C" fn minijs_destroy(it: *mut c_void) {
        if !it.is_null() {
            drop(unsafe { Box::from_raw(it as *mut Interp) });
        }
    }

    /// Run source text; the result is the final statement value rendered
    /// as text in a buffer the caller frees with [`minijs_free`].
    pub unsafe extern "C" fn minijs_run(it: *mut c_void, code: *const c_char) -> *mut c_char {
        if it.is_null() {
            return std::ptr::null_mut();
        }
        let source = match text_arg(code) {
            Some(s) => s,
            None => return std::ptr::null_mut(),
        };
        let interp = unsafe { &*(it as *mut Interp) };
        let result = interp.run(&source);
        crate::abi::alloc_engine_text(&result) as *mut c_char
    }

    // ------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------

    pub unsafe extern "C" fn minijs_handle_retain(h: *mut c_void) {
        unsafe { heap::retain(h) }
    }

    pub unsafe extern "C" fn minijs_handle_release(h: *mut c_void) {
        unsafe { heap::release(h) }
    }

    // ------------------------------------------------------------
    // Native functions and globals
    // ------------------------------------------------------------

    pub unsafe extern "C" fn minijs_register(
        it: *mut c_void,
        name: *const c_char,
        cb: NativeCallback,
        userdata: *mut c_void,
    ) {
        let (interp, name) = match (it.is_null(), text_arg(name)) {
            (false, Some(n)) => (unsafe { &*(it as *mut Interp) }, n),
            _ => return,
        };
        let cell = new_cell(Body::Function(NativeFunction { cb, userdata }));
        interp.set_global(&name, Slot::Handle(MINIJS_FUNCTION, CellRef::adopt(cell)));
    }

    pub unsafe extern "C" fn minijs_function_create_native(
        cb: NativeCallback,
        userdata: *mut c_void,
    ) -> *mut c_void {
        new_cell(Body::Function(NativeFunction { cb, userdata })) as *mut c_void
    }

    /// Declare a value into global scope. Handle payloads are consumed;
    /// string payloads are copied and stay caller-owned.
    pub unsafe extern "C" fn minijs_global_declare(
        it: *mut c_void,
        name: *const c_char,
        v: *const MjsValue,
    ) {
        if v.is_null() {
            return;
        }
        let slot = unsafe { Slot::from_consumed(&*v) };
        let (interp, name) = match (it.is_null(), text_arg(name)) {
            (false, Some(n)) => (unsafe { &*(it as *mut Interp) }, n),
            // Still consumed: dropping the slot releases the handle.
            _ => return,
        };
        interp.set_global(&name, slot);
    }

    // ------------------------------------------------------------
    // Classes
    // ------------------------------------------------------------

    pub unsafe extern "C" fn minijs_class_create(_it: *mut c_void, name: *const c_char) -> *mut c_void {
        let name = match text_arg(name) {
            Some(n) => n,
            None => return std::ptr::null_mut(),
        };
        new_cell(Body::Class(ClassBody {
            name,
            methods: Vec::new(),
        })) as *mut c_void
    }

    /// Add or replace an instance method. The function handle is consumed
    /// even when the class handle is unusable.
    pub unsafe extern "C" fn minijs_class_add_method(
        class: *mut c_void,
        method_name: *const c_char,
        fn_handle: *mut c_void,
    ) {
        if fn_handle.is_null() {
            return;
        }
        let method = CellRef::adopt(fn_handle as *mut HeapCell);
        let name = match (class.is_null(), text_arg(method_name)) {
            (false, Some(n)) => n,
            _ => return, // method dropped, count released
        };
        let cell = unsafe { &*(class as *mut HeapCell) };
        let old;
        {
            let mut body = cell.body.borrow_mut();
            match &mut *body {
                Body::Class(cb) => {
                    if let Some(entry) = cb.methods.iter_mut().find(|(n, _)| *n == name) {
                        old = Some(std::mem::replace(&mut entry.1, method));
                    } else {
                        cb.methods.push((name, method));
                        old = None;
                    }
                }
                _ => old = Some(method),
            }
        }
        drop(old);
    }

    // ------------------------------------------------------------
    // Arrays
    // ------------------------------------------------------------

    pub unsafe extern "C" fn minijs_array_create() -> *mut c_void {
        new_cell(Body::Array(Vec::new())) as *mut c_void
    }

    pub unsafe extern "C" fn minijs_array_length(arr: *mut c_void) -> i32 {
        if arr.is_null() {
            return 0;
        }
        let cell = unsafe { &*(arr as *mut HeapCell) };
        match &*cell.body.borrow() {
            Body::Array(items) => items.len() as i32,
            _ => 0,
        }
    }

    /// Borrowing read: handle payloads carry no extra count, string
    /// payloads are fresh engine allocations the caller must free.
    pub unsafe extern "C" fn minijs_array_get(arr: *mut c_void, index: i32, out: *mut MjsValue) {
        if out.is_null() {
            return;
        }
        let out = unsafe { &mut *out };
        *out = MjsValue::null();
        if arr.is_null() || index < 0 {
            return;
        }
        let cell = unsafe { &*(arr as *mut HeapCell) };
        let body = cell.body.borrow();
        if let Body::Array(items) = &*body {
            if let Some(slot) = items.get(index as usize) {
                slot.write_borrowed(out);
            }
        }
    }

    /// Consuming write; the array grows with nulls when `index` is past
    /// the end.
    pub unsafe extern "C" fn minijs_array_set(arr: *mut c_void, index: i32, v: *const MjsValue) {
        if v.is_null() {
            return;
        }
        let slot = unsafe { Slot::from_consumed(&*v) };
        if arr.is_null() || index < 0 {
            return; // slot dropped, handle released
        }
        let cell = unsafe { &*(arr as *mut HeapCell) };
        let old;
        {
            let mut body = cell.body.borrow_mut();
            match &mut *body {
                Body::Array(items) => {
                    let index = index as usize;
                    if index >= items.len() {
                        items.resize(index + 1, Slot::Null);
                    }
                    old = Some(std::mem::replace(&mut items[index], slot));
                }
                _ => old = Some(slot),
            }
        }
        drop(old);
    }

    /// Consuming append.
    pub unsafe extern "C" fn minijs_array_push(arr: *mut c_void, v: *const MjsValue) {
        if v.is_null() {
            return;
        }
        let slot = unsafe { Slot::from_consumed(&*v) };
        if arr.is_null() {
            return;
        }
        let cell = unsafe { &*(arr as *mut HeapCell) };
        let mut body = cell.body.borrow_mut();
        if let Body::Array(items) = &mut *body {
            items.push(slot);
        }
    }

    // ------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------

    pub unsafe extern "C" fn minijs_object_create() -> *mut c_void {
        new_cell(Body::Object(ObjectBody {
            props: Vec::new(),
            class: None,
        })) as *mut c_void
    }

    pub unsafe extern "C" fn minijs_object_has(obj: *mut c_void, key: *const c_char) -> i32 {
        let key = match (obj.is_null(), text_arg(key)) {
            (false, Some(k)) => k,
            _ => return 0,
        };
        let cell = unsafe { &*(obj as *mut HeapCell) };
        match &*cell.body.borrow() {
            Body::Object(ob) => i32::from(ob.props.iter().any(|(k, _)| *k == key)),
            _ => 0,
        }
    }

    /// Borrowing read; same contract as [`minijs_array_get`].
    pub unsafe extern "C" fn minijs_object_get(
        obj: *mut c_void,
        key: *const c_char,
        out: *mut MjsValue,
    ) {
        if out.is_null() {
            return;
        }
        let out = unsafe { &mut *out };
        *out = MjsValue::null();
        let key = match (obj.is_null(), text_arg(key)) {
            (false, Some(k)) => k,
            _ => return,
        };
        let cell = unsafe { &*(obj as *mut HeapCell) };
        let body = cell.body.borrow();
        if let Body::Object(ob) = &*body {
            if let Some((_, slot)) = ob.props.iter().find(|(k, _)| *k == key) {
                slot.write_borrowed(out);
            }
        }
    }

    /// Consuming write.
    pub unsafe extern "C" fn minijs_object_set(
        obj: *mut c_void,
        key: *const c_char,
        v: *const MjsValue,
    ) {
        if v.is_null() {
            return;
        }
        let slot = unsafe { Slot::from_consumed(&*v) };
        let key = match (obj.is_null(), text_arg(key)) {
            (false, Some(k)) => k,
            _ => return, // slot dropped, handle released
        };
        let cell = unsafe { &*(obj as *mut HeapCell) };
        let old;
        {
            let mut body = cell.body.borrow_mut();
            match &mut *body {
                Body::Object(ob) => {
                    if let Some(entry) = ob.props.iter_mut().find(|(k, _)| *k == key) {
                        old = Some(std::mem::replace(&mut entry.1, slot));
                    } else {
                        ob.props.push((key, slot));
                        old = None;
                    }
                }
                _ => old = Some(slot),
            }
        }
        drop(old);
    }

    /// Key list in the compact wire format, e.g. `["a","b"]`, in a buffer
    /// the caller frees with [`minijs_free`].
    pub unsafe extern "C" fn minijs_object_keys(obj: *mut c_void) -> *mut c_char {
        if obj.is_null() {
            return std::ptr::null_mut();
        }
        let cell = unsafe { &*(obj as *mut HeapCell) };
        let mut text = String::from("[");
        if let Body::Object(ob) = &*cell.body.borrow() {
            for (i, (key, _)) in ob.props.iter().enumerate() {
                if i > 0 {
                    text.push(',');
                }
                text.push('"');
                for c in key.chars() {
                    match c {
                        '\\' => text.push_str("\\\\"),
                        '"' => text.push_str("\\\""),
                        '\n' => text.push_str("\\n"),
                        '\r' => text.push_str("\\r"),
                        '\t' => text.push_str("\\t"),
                        other => text.push(other),
                    }
                }
                text.push('"');
            }
        }
        text.push(']');
        crate::abi::alloc_engine_text(&text) as *mut c_char
    }
}

#[cfg(test)]
mod tests {
    use super::exports::*;
    use crate::abi::{MINIJS_NUMBER, MINIJS_STRING, MjsValue};
    use std::ffi::CString;
    use std::os::raw::c_void;

    unsafe fn run_text(it: *mut c_void, code: &str) -> String {
        let code = CString::new(code).unwrap();
        unsafe {
            let out = minijs_run(it, code.as_ptr());
            crate::abi::take_engine_text(out)
        }
    }

    #[test]
    fn run_returns_engine_allocated_text() {
        unsafe {
            let it = minijs_create();
            assert_eq!(run_text(it, "1 + 2"), "3");
            assert_eq!(run_text(it, "'hi'"), "hi");
            minijs_destroy(it);
        }
    }

    #[test]
    fn globals_survive_across_runs() {
        unsafe {
            let it = minijs_create();
            assert_eq!(run_text(it, "x = 41"), "41");
            assert_eq!(run_text(it, "x + 1"), "42");
            minijs_destroy(it);
        }
    }

    #[test]
    fn array_abi_round_trip() {
        unsafe {
            let arr = minijs_array_create();

            let mut v = MjsValue::null();
            v.kind = MINIJS_NUMBER;
            v.num = 7.0;
            minijs_array_push(arr, &v);

            let hello = CString::new("hello").unwrap();
            let mut s = MjsValue::null();
            s.kind = MINIJS_STRING;
            s.str_ = hello.as_ptr();
            minijs_array_push(arr, &s);

            assert_eq!(minijs_array_length(arr), 2);

            let mut out = MjsValue::null();
            minijs_array_get(arr, 0, &mut out);
            assert_eq!(out.kind, MINIJS_NUMBER);
            assert_eq!(out.num, 7.0);

            minijs_array_get(arr, 1, &mut out);
            assert_eq!(out.kind, MINIJS_STRING);
            assert_eq!(crate::abi::take_engine_text(out.str_), "hello");

            // Out-of-range reads come back null.
            minijs_array_get(arr, 9, &mut out);
            assert_eq!(out.kind, crate::abi::MINIJS_NULL);

            minijs_handle_release(arr);
        }
    }

    #[test]
    fn object_keys_wire_format_escapes() {
        unsafe {
            let obj = minijs_object_create();
            let mut v = MjsValue::null();
            v.kind = MINIJS_NUMBER;
            v.num = 1.0;

            let plain = CString::new("plain").unwrap();
            minijs_object_set(obj, plain.as_ptr(), &v);
            let tricky = CString::new("a\"b\\c\nd").unwrap();
            minijs_object_set(obj, tricky.as_ptr(), &v);

            let keys = crate::abi::take_engine_text(minijs_object_keys(obj));
            assert_eq!(keys, "[\"plain\",\"a\\\"b\\\\c\\nd\"]");

            assert_eq!(minijs_object_has(obj, plain.as_ptr()), 1);
            let missing = CString::new("missing").unwrap();
            assert_eq!(minijs_object_has(obj, missing.as_ptr()), 0);

            minijs_handle_release(obj);
        }
    }
}
