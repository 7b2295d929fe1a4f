//! Process-wide allocator with C-style status codes.
//!
//! The first successful [`init`] registers an exit handler that finalizes
//! the allocator, so the device is unmapped even if the program never calls
//! [`finalize`] itself.

use std::{path::Path, ptr, sync::Once};

use log::error;

use crate::{
    allocator::Allocator,
    config::{AllocatorConfig, PoolConfig},
    error::{InitError, STATUS_OK},
};

static GLOBAL: Allocator = Allocator::new(PoolConfig::new());
static TEARDOWN: Once = Once::new();

/// The process-wide allocator behind the free functions of this module.
pub fn allocator() -> &'static Allocator {
    &GLOBAL
}

/// Maps `size` bytes of `path` and builds a general purpose pool over it.
///
/// Returns [`STATUS_OK`] or the [`InitError::code`] of the failing stage.
pub fn init(path: impl AsRef<Path>, size: usize) -> i32 {
    status(GLOBAL.init(path, size))
}

/// Initializes from the `DAXALLOC_*` environment variables, see
/// [`AllocatorConfig::from_env`].
///
/// A bad path or size is reported as a provider parameter failure, a bad
/// pool variable as a pool parameter failure.
pub fn init_from_env() -> i32 {
    let config = match AllocatorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            if let Some(cause) = err.cause() {
                error!("environment configuration rejected: {cause}");
            }
            return err.code();
        }
    };

    status(GLOBAL.init_with(&config.path, config.size, &config.pool))
}

/// Returns at least `size` bytes, or null when uninitialized, when `size` is
/// zero, or when the pool is exhausted.
pub fn alloc(size: usize) -> *mut u8 {
    GLOBAL.alloc(size).map_or(ptr::null_mut(), |ptr| ptr.as_ptr())
}

/// Returns `ptr` to the pool. Null, or any pointer while uninitialized, is
/// a no-op.
///
/// # Safety
///
/// See [`Allocator::dealloc`].
pub unsafe fn dealloc(ptr: *mut u8) {
    unsafe { GLOBAL.dealloc(ptr) }
}

/// Tears down the pool and unmaps the device. Idempotent.
pub fn finalize() {
    GLOBAL.finalize();
}

fn status(result: Result<(), InitError>) -> i32 {
    match result {
        Ok(()) => {
            register_teardown();
            STATUS_OK
        }
        Err(err) => err.code(),
    }
}

fn register_teardown() {
    TEARDOWN.call_once(|| {
        #[cfg(unix)]
        {
            extern "C" fn teardown() {
                GLOBAL.finalize();
            }

            if unsafe { libc::atexit(teardown) } != 0 {
                error!("could not register exit handler, call finalize explicitly");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn status_codes_and_lifecycle() {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(1 << 20).unwrap();

        assert!(alloc(64).is_null());
        assert_eq!(init("", 1 << 20), 1);
        assert_eq!(init(file.path(), 1 << 30), 2);

        assert_eq!(init(file.path(), 1 << 20), STATUS_OK);
        assert_eq!(init(file.path(), 1 << 20), 5);

        let ptr = alloc(64);
        assert!(!ptr.is_null());
        assert!(allocator().owns(ptr));

        unsafe {
            dealloc(ptr);
            dealloc(ptr::null_mut());
        }

        finalize();
        finalize();
        assert!(alloc(64).is_null());
    }

    #[test]
    #[serial]
    fn env_failures_report_their_stage() {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(1 << 20).unwrap();

        let set = |key: &str, value: &str| unsafe { std::env::set_var(key, value) };

        set("DAXALLOC_PATH", file.path().to_str().unwrap());
        set("DAXALLOC_SIZE", "abc");
        assert_eq!(init_from_env(), 1);

        set("DAXALLOC_SIZE", "1048576");
        set("DAXALLOC_POOL_KIND", "buddy");
        assert_eq!(init_from_env(), 3);

        set("DAXALLOC_POOL_KIND", "fixed_size");
        set("DAXALLOC_BLOCK_SIZE", "0");
        assert_eq!(init_from_env(), 3);

        set("DAXALLOC_BLOCK_SIZE", "256");
        assert_eq!(init_from_env(), STATUS_OK);
        assert_eq!(allocator().capacity(), 256);
        finalize();

        for key in [
            "DAXALLOC_PATH",
            "DAXALLOC_SIZE",
            "DAXALLOC_POOL_KIND",
            "DAXALLOC_BLOCK_SIZE",
        ] {
            unsafe { std::env::remove_var(key) };
        }
    }
}
