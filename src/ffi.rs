//! C-ABI exports of the process-wide allocator.
//!
//! Gated behind `features = ["ffi"]`. Status codes are those of
//! [`crate::global::init`].

use std::{
    ffi::{CStr, c_char, c_int, c_void},
    path::PathBuf,
};

use crate::global;

/// Status returned for a path that cannot be read.
const BAD_PATH: c_int = 1;

fn path_from_c(path: *const c_char) -> Option<PathBuf> {
    if path.is_null() {
        return None;
    }

    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes();

    #[cfg(unix)]
    let path = {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        Some(PathBuf::from(OsStr::from_bytes(bytes)))
    };

    #[cfg(not(unix))]
    let path = std::str::from_utf8(bytes).ok().map(PathBuf::from);

    path
}

/// # Safety
///
/// `path` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn daxalloc_init(path: *const c_char, size: usize) -> c_int {
    match path_from_c(path) {
        Some(path) => global::init(path, size),
        None => BAD_PATH,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn daxalloc_alloc(size: usize) -> *mut c_void {
    global::alloc(size).cast()
}

/// # Safety
///
/// See [`crate::Allocator::dealloc`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn daxalloc_dealloc(ptr: *mut c_void) {
    unsafe { global::dealloc(ptr.cast()) }
}

#[unsafe(no_mangle)]
pub extern "C" fn daxalloc_finalize() {
    global::finalize();
}
