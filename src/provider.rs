use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    ptr::NonNull,
};

use log::{debug, error};

use crate::{
    error::{Error, Result},
    stats,
};

/// Validated parameters of a [`MemoryProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderParams {
    path: PathBuf,
    size: usize,
}

impl ProviderParams {
    /// Checks that `size` is non-zero and that `path` names something that
    /// exists. Whether it can actually be opened and mapped is only known
    /// when the provider is created.
    pub fn new(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref();

        if path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("device path is empty".into()));
        }

        if size == 0 {
            return Err(Error::InvalidArgument("mapping size must be non-zero".into()));
        }

        if let Err(err) = fs::metadata(path) {
            return Err(Error::InvalidArgument(format!(
                "{} is not reachable: {err}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Owns a shared mapping of `size` bytes of a DAX device (or any file).
///
/// The mapping is released exactly once, either by [`MemoryProvider::destroy`]
/// or when the provider is dropped.
#[derive(Debug)]
pub struct MemoryProvider {
    path: PathBuf,
    size: usize,
    /// Start of the mapping. `Some` iff the range is mapped.
    base: Option<NonNull<u8>>,
}

// The provider only hands out its base address; access to the mapped bytes
// is synchronized by whoever carves it up.
unsafe impl Send for MemoryProvider {}
unsafe impl Sync for MemoryProvider {}

impl MemoryProvider {
    /// Opens `params.path()` for reading and writing and maps exactly
    /// `params.size()` bytes from offset 0. No partial mapping is ever
    /// returned.
    pub fn create(params: &ProviderParams) -> Result<Self> {
        let mapping_failed = |source: io::Error| Error::MappingFailed {
            path: params.path.clone(),
            size: params.size,
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&params.path)
            .map_err(mapping_failed)?;

        check_backing_len(&file, params.size).map_err(mapping_failed)?;

        let base = unsafe { Platform::map(&file, params.size) }.map_err(mapping_failed)?;

        stats::provider_mapped();
        debug!(
            "mapped {} bytes of {} at {:p}",
            params.size,
            params.path.display(),
            base
        );

        Ok(Self {
            path: params.path.clone(),
            size: params.size,
            base: Some(base),
        })
    }

    /// Unmaps the range. Calling it again is a no-op; failures are logged.
    pub fn destroy(&mut self) {
        let Some(base) = self.base.take() else {
            return;
        };

        if let Err(err) = unsafe { Platform::unmap(base, self.size) } {
            error!(
                "failed to unmap {} bytes of {} at {:p}: {err}",
                self.size,
                self.path.display(),
                base
            );
        }

        stats::provider_unmapped();
        debug!("unmapped {}", self.path.display());
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.base.is_some()
    }

    /// Start of the mapping, `None` once destroyed.
    #[inline]
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MemoryProvider {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A regular file shorter than the mapping would fault on access past its
/// end. Devices report no meaningful length and are trusted.
fn check_backing_len(file: &File, size: usize) -> io::Result<()> {
    let metadata = file.metadata()?;

    if metadata.is_file() && metadata.len() < size as u64 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("backing file holds only {} bytes", metadata.len()),
        ));
    }

    Ok(())
}

/// Low level mapping operations. As the allocator, our top level view of
/// this has nothing to do with the concrete APIs offered by each kernel.
trait PlatformMapping {
    /// Maps `len` bytes of `file` from offset 0, shared and writable.
    unsafe fn map(file: &File, len: usize) -> io::Result<NonNull<u8>>;

    /// Releases a mapping returned by [`PlatformMapping::map`].
    unsafe fn unmap(addr: NonNull<u8>, len: usize) -> io::Result<()>;
}

struct Platform;

#[cfg(unix)]
mod unix {
    use super::{Platform, PlatformMapping};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        fs::File,
        io,
        os::{
            fd::AsRawFd,
            raw::{c_int, c_void},
        },
        ptr::NonNull,
    };

    impl PlatformMapping for Platform {
        unsafe fn map(file: &File, len: usize) -> io::Result<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            // Writes must reach the device, not a private copy.
            const FLAGS: c_int = libc::MAP_SHARED;
            const OFFSET: off_t = 0;

            let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, file.as_raw_fd(), OFFSET) };

            match addr {
                libc::MAP_FAILED => Err(io::Error::last_os_error()),
                addr => NonNull::new(addr.cast::<u8>())
                    .ok_or_else(|| io::Error::other("mmap returned a null mapping")),
            }
        }

        unsafe fn unmap(addr: NonNull<u8>, len: usize) -> io::Result<()> {
            match unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) } {
                0 => Ok(()),
                _ => Err(io::Error::last_os_error()),
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{fs::File, io, os::windows::io::AsRawHandle, ptr::NonNull};

    use super::{Platform, PlatformMapping};

    use windows::{
        Win32::{
            Foundation::{CloseHandle, HANDLE},
            System::Memory::{
                CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
                PAGE_READWRITE, UnmapViewOfFile,
            },
        },
        core::PCWSTR,
    };

    impl PlatformMapping for Platform {
        unsafe fn map(file: &File, len: usize) -> io::Result<NonNull<u8>> {
            let size = len as u64;

            unsafe {
                let mapping = CreateFileMappingW(
                    HANDLE(file.as_raw_handle()),
                    None,
                    PAGE_READWRITE,
                    (size >> 32) as u32,
                    size as u32,
                    PCWSTR::null(),
                )
                .map_err(io::Error::from)?;

                let view = MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, len);

                // The view keeps the mapping object alive.
                let _ = CloseHandle(mapping);

                NonNull::new(view.Value.cast::<u8>()).ok_or_else(io::Error::last_os_error)
            }
        }

        unsafe fn unmap(addr: NonNull<u8>, _len: usize) -> io::Result<()> {
            let view = MEMORY_MAPPED_VIEW_ADDRESS {
                Value: addr.as_ptr().cast(),
            };

            unsafe { UnmapViewOfFile(view) }.map_err(io::Error::from)
        }
    }
}
