//! C Bindings for the shared buffer
//!
//! Mode arguments use the numeric mapping `0 = LIFO`, `1 = FIFO`.

use crate::buffer::SharedBuffer;
use crate::mode::Mode;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;

// Opaque handle
pub struct VenomBufferHandle(SharedBuffer);

/// Create an anonymous buffer
///
/// Returns null if `capacity` is zero, `mode` is not 0 or 1, or the region
/// cannot be mapped.
#[no_mangle]
pub extern "C" fn venom_buffer_create(capacity: usize, mode: i8) -> *mut VenomBufferHandle {
    let mode = match Mode::try_from(i64::from(mode)) {
        Ok(mode) => mode,
        Err(_) => return ptr::null_mut(),
    };

    match SharedBuffer::create(capacity, mode) {
        Ok(buffer) => Box::into_raw(Box::new(VenomBufferHandle(buffer))),
        Err(_) => ptr::null_mut(),
    }
}

/// Create a buffer in named shared memory
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_create_named(
    name: *const c_char,
    capacity: usize,
    mode: i8,
) -> *mut VenomBufferHandle {
    if name.is_null() {
        return ptr::null_mut();
    }

    let str_slice = match CStr::from_ptr(name).to_str() {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };
    let mode = match Mode::try_from(i64::from(mode)) {
        Ok(mode) => mode,
        Err(_) => return ptr::null_mut(),
    };

    match SharedBuffer::create_named(str_slice, capacity, mode) {
        Ok(buffer) => Box::into_raw(Box::new(VenomBufferHandle(buffer))),
        Err(_) => ptr::null_mut(),
    }
}

/// Attach to a named buffer
///
/// # Safety
/// name must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_open(name: *const c_char) -> *mut VenomBufferHandle {
    if name.is_null() {
        return ptr::null_mut();
    }

    let str_slice = match CStr::from_ptr(name).to_str() {
        Ok(s) => s,
        Err(_) => return ptr::null_mut(),
    };

    match SharedBuffer::open(str_slice) {
        Ok(buffer) => Box::into_raw(Box::new(VenomBufferHandle(buffer))),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroy a buffer handle
///
/// # Safety
/// handle must come from one of the create/open functions and must not be
/// used afterwards, by this or (for the creator) any other process.
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_destroy(handle: *mut VenomBufferHandle) {
    if !handle.is_null() {
        let VenomBufferHandle(buffer) = *Box::from_raw(handle);
        buffer.destroy();
    }
}

/// Insert a value, blocking while full
///
/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_put(handle: *mut VenomBufferHandle, value: i32) {
    (*handle).0.put(value);
}

/// Remove a value, blocking while empty
///
/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_take(handle: *mut VenomBufferHandle) -> i32 {
    (*handle).0.take()
}

/// Insert `len` values from `items` in order
///
/// # Safety
/// handle must be a live handle, items must point to `len` readable i32
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_put_all(
    handle: *mut VenomBufferHandle,
    items: *const i32,
    len: usize,
) {
    if len == 0 {
        return;
    }
    let buffer = &(*handle).0;
    buffer.put_all(slice::from_raw_parts(items, len).iter().copied());
}

/// Remove `len` values into `out`
///
/// # Safety
/// handle must be a live handle, out must point to `len` writable i32
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_take_many(
    handle: *mut VenomBufferHandle,
    out: *mut i32,
    len: usize,
) {
    if len == 0 {
        return;
    }
    let buffer = &(*handle).0;
    for slot in slice::from_raw_parts_mut(out, len) {
        *slot = buffer.take();
    }
}

/// Diagnostic listing of the first `n` slots
///
/// Free the result with [`venom_buffer_string_free`].
///
/// # Safety
/// handle must be a live handle
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_inspect(
    handle: *mut VenomBufferHandle,
    n: usize,
) -> *mut c_char {
    let listing = (*handle).0.inspect(n);
    match CString::new(listing) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Free a string returned by this library
///
/// # Safety
/// s must come from [`venom_buffer_inspect`] and not be freed twice
#[no_mangle]
pub unsafe extern "C" fn venom_buffer_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
