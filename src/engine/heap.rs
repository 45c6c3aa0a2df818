//! Engine heap: reference-counted handle cells and the engine allocator
//!
//! Every array, object, function and class the engine hands across the
//! ABI is a boxed [`HeapCell`] addressed by opaque pointer. The cell owns
//! its body; the body owns one retain count per handle it stores, through
//! [`CellRef`]. Releasing the last count drops the box, which cascades
//! releases through everything the cell referenced.

use std::alloc::{Layout, alloc, dealloc};
use std::cell::{Cell, RefCell};
use std::os::raw::c_void;

use crate::abi::{
    MINIJS_ARRAY, MINIJS_BOOL, MINIJS_CLASS, MINIJS_FUNCTION, MINIJS_NULL, MINIJS_NUMBER,
    MINIJS_OBJECT, MINIJS_STRING, MINIJS_TASK, MjsValue, NativeCallback,
};

/// One reference-counted engine object.
pub(crate) struct HeapCell {
    refs: Cell<u32>,
    pub(crate) body: RefCell<Body>,
}

/// What a cell holds.
pub(crate) enum Body {
    Array(Vec<Slot>),
    Object(ObjectBody),
    Function(NativeFunction),
    Class(ClassBody),
}

pub(crate) struct ObjectBody {
    pub(crate) props: Vec<(String, Slot)>,
    /// Set for class instances; `new` resolves methods through this.
    pub(crate) class: Option<CellRef>,
}

#[derive(Clone, Copy)]
pub(crate) struct NativeFunction {
    pub(crate) cb: NativeCallback,
    pub(crate) userdata: *mut c_void,
}

pub(crate) struct ClassBody {
    pub(crate) name: String,
    pub(crate) methods: Vec<(String, CellRef)>,
}

/// Allocate a fresh cell with one retain count, owned by the caller.
pub(crate) fn new_cell(body: Body) -> *mut HeapCell {
    Box::into_raw(Box::new(HeapCell {
        refs: Cell::new(1),
        body: RefCell::new(body),
    }))
}

/// Increment the count. No-op on null.
pub(crate) unsafe fn retain(p: *mut c_void) {
    if p.is_null() {
        return;
    }
    let cell = unsafe { &*(p as *mut HeapCell) };
    cell.refs.set(cell.refs.get() + 1);
}

/// Decrement the count; reclaim the cell at zero. No-op on null.
pub(crate) unsafe fn release(p: *mut c_void) {
    if p.is_null() {
        return;
    }
    let cell = unsafe { &*(p as *mut HeapCell) };
    let n = cell.refs.get();
    if n <= 1 {
        // Dropping the box drops the body, which releases every handle
        // the cell owned.
        drop(unsafe { Box::from_raw(p as *mut HeapCell) });
    } else {
        cell.refs.set(n - 1);
    }
}

/// Current count of a live cell. Test probe only.
#[cfg(test)]
pub(crate) fn refcount(p: *mut c_void) -> u32 {
    assert!(!p.is_null());
    unsafe { &*(p as *mut HeapCell) }.refs.get()
}

/// Owning engine-internal handle: clone = retain, drop = release.
pub(crate) struct CellRef(*mut HeapCell);

impl CellRef {
    /// Take ownership of a count already held on `p`.
    pub(crate) fn adopt(p: *mut HeapCell) -> CellRef {
        debug_assert!(!p.is_null());
        CellRef(p)
    }

    /// Retain `p` and own the new count.
    pub(crate) fn retained(p: *mut HeapCell) -> CellRef {
        unsafe { retain(p as *mut c_void) };
        CellRef(p)
    }

    pub(crate) fn as_ptr(&self) -> *mut HeapCell {
        self.0
    }

    pub(crate) fn cell(&self) -> &HeapCell {
        unsafe { &*self.0 }
    }
}

impl Clone for CellRef {
    fn clone(&self) -> Self {
        CellRef::retained(self.0)
    }
}

impl Drop for CellRef {
    fn drop(&mut self) {
        unsafe { release(self.0 as *mut c_void) };
    }
}

/// Engine-internal owned value stored in containers, globals and locals.
#[derive(Clone)]
pub(crate) enum Slot {
    Null,
    Number(f64),
    Bool(bool),
    Str(String),
    Handle(i32, CellRef),
}

impl Slot {
    pub(crate) fn kind_tag(&self) -> i32 {
        match self {
            Slot::Null => MINIJS_NULL,
            Slot::Number(_) => MINIJS_NUMBER,
            Slot::Bool(_) => MINIJS_BOOL,
            Slot::Str(_) => MINIJS_STRING,
            Slot::Handle(tag, _) => *tag,
        }
    }

    /// Build a slot from a wire struct passed to a consuming call.
    ///
    /// Handle payloads transfer their embedded count into the slot;
    /// string payloads are copied, the caller keeps its buffer.
    pub(crate) unsafe fn from_consumed(nv: &MjsValue) -> Slot {
        match nv.kind {
            MINIJS_NUMBER => Slot::Number(nv.num),
            MINIJS_BOOL => Slot::Bool(nv.boolean != 0),
            MINIJS_STRING => Slot::Str(copy_c_text(nv.str_)),
            MINIJS_ARRAY | MINIJS_OBJECT | MINIJS_FUNCTION | MINIJS_CLASS | MINIJS_TASK => {
                if nv.handle.is_null() {
                    Slot::Null
                } else {
                    Slot::Handle(nv.kind, CellRef::adopt(nv.handle as *mut HeapCell))
                }
            }
            _ => Slot::Null,
        }
    }

    /// Build a slot from a native callback's return struct.
    ///
    /// Same as [`Slot::from_consumed`], except string payloads were
    /// allocated by the callback with the engine allocator and are freed
    /// here after copying.
    pub(crate) unsafe fn from_callback_return(nv: MjsValue) -> Slot {
        if nv.kind == MINIJS_STRING {
            let text = copy_c_text(nv.str_);
            if !nv.str_.is_null() {
                unsafe { free_bytes(nv.str_ as *mut c_void) };
            }
            Slot::Str(text)
        } else {
            unsafe { Slot::from_consumed(&nv) }
        }
    }

    /// Write this slot into a borrowing out-param.
    ///
    /// Handles go out without a retain (the container keeps its count);
    /// strings go out as fresh engine allocations the caller must free.
    pub(crate) fn write_borrowed(&self, out: &mut MjsValue) {
        *out = MjsValue::null();
        out.kind = self.kind_tag();
        match self {
            Slot::Null => {}
            Slot::Number(n) => out.num = *n,
            Slot::Bool(b) => out.boolean = i32::from(*b),
            Slot::Str(s) => out.str_ = crate::abi::alloc_engine_text(s),
            Slot::Handle(_, cell) => out.handle = cell.as_ptr() as *mut c_void,
        }
    }
}

fn copy_c_text(p: *const std::os::raw::c_char) -> String {
    if p.is_null() {
        String::new()
    } else {
        unsafe { std::ffi::CStr::from_ptr(p) }
            .to_string_lossy()
            .into_owned()
    }
}

// ---------------------------------------------------------------------
// Engine allocator
//
// Buffers carry their layout in an 8-byte header so free can rebuild it.
// ---------------------------------------------------------------------

const HEADER: usize = 8;

pub(crate) unsafe fn alloc_bytes(n: usize) -> *mut c_void {
    let total = match n.checked_add(HEADER) {
        Some(t) => t,
        None => return std::ptr::null_mut(),
    };
    let layout = match Layout::from_size_align(total, HEADER) {
        Ok(l) => l,
        Err(_) => return std::ptr::null_mut(),
    };
    let base = unsafe { alloc(layout) };
    if base.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { (base as *mut usize).write(total) };
    unsafe { base.add(HEADER) as *mut c_void }
}

pub(crate) unsafe fn free_bytes(p: *mut c_void) {
    if p.is_null() {
        return;
    }
    let base = unsafe { (p as *mut u8).sub(HEADER) };
    let total = unsafe { (base as *mut usize).read() };
    // Layout was validated at allocation time.
    if let Ok(layout) = Layout::from_size_align(total, HEADER) {
        unsafe { dealloc(base, layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_release_lifecycle() {
        let p = new_cell(Body::Array(Vec::new()));
        let h = p as *mut c_void;
        assert_eq!(refcount(h), 1);
        unsafe { retain(h) };
        assert_eq!(refcount(h), 2);
        unsafe { release(h) };
        assert_eq!(refcount(h), 1);
        unsafe { release(h) }; // reclaims
    }

    #[test]
    fn null_is_a_no_op() {
        unsafe {
            retain(std::ptr::null_mut());
            release(std::ptr::null_mut());
        }
    }

    #[test]
    fn dropping_a_container_releases_its_elements() {
        let inner = new_cell(Body::Object(ObjectBody {
            props: Vec::new(),
            class: None,
        }));
        unsafe { retain(inner as *mut c_void) }; // our probe count

        let outer = new_cell(Body::Array(vec![Slot::Handle(
            MINIJS_OBJECT,
            CellRef::adopt(inner),
        )]));
        assert_eq!(refcount(inner as *mut c_void), 2);

        unsafe { release(outer as *mut c_void) };
        assert_eq!(refcount(inner as *mut c_void), 1);
        unsafe { release(inner as *mut c_void) };
    }

    #[test]
    fn slot_clone_retains() {
        let cell = new_cell(Body::Array(Vec::new()));
        let slot = Slot::Handle(MINIJS_ARRAY, CellRef::adopt(cell));
        assert_eq!(refcount(cell as *mut c_void), 1);
        let copy = slot.clone();
        assert_eq!(refcount(cell as *mut c_void), 2);
        drop(copy);
        assert_eq!(refcount(cell as *mut c_void), 1);
        drop(slot);
    }

    #[test]
    fn allocator_round_trip() {
        unsafe {
            let p = alloc_bytes(32);
            assert!(!p.is_null());
            std::ptr::write_bytes(p as *mut u8, 0xAB, 32);
            free_bytes(p);
            free_bytes(std::ptr::null_mut());
            let zero = alloc_bytes(0);
            assert!(!zero.is_null());
            free_bytes(zero);
        }
    }
}
