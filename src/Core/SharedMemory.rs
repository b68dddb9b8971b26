// Named shared memory segments.
// Segments live under /dev/shm so any process (or Python's
// multiprocessing.shared_memory) can open them by name.

use std::fmt::Debug;
use std::io;

pub use imp::{attach_shared_memory, create_shared_memory, unlink_shared_memory};
#[cfg(target_os = "linux")]
pub use imp::LinuxSharedMemory;

/// A mapped segment. Dropping it unmaps; the name outlives the mapping
/// until it is unlinked.
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Start of the mapping; byte 0 of the segment.
    fn as_ptr(&self) -> *mut u8;

    /// Mapped length in bytes.
    fn size(&self) -> usize;

    /// Segment name, without the leading slash.
    fn name(&self) -> &str;

    fn raw_handle(&self) -> RawHandle;
}

#[derive(Debug, Clone, Copy)]
pub enum RawHandle {
    Fd(i32),
}

/// Path of a named segment on the shm filesystem.
pub fn segment_path(name: &str) -> String {
    format!("/dev/shm/{}", name)
}

/// Whether a named segment currently exists.
pub fn shared_memory_exists(name: &str) -> bool {
    validate_name(name).is_ok() && std::path::Path::new(&segment_path(name)).exists()
}

fn validate_name(name: &str) -> io::Result<()> {
    if name.is_empty() || name.len() > 200 || name.contains('/') || name.contains('\0') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Invalid shared memory name: {:?}", name),
        ));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
mod imp {
    use super::{segment_path, validate_name, RawHandle, SharedMemoryBackend};
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::{AsRawFd, IntoRawFd};
    use std::os::unix::fs::OpenOptionsExt;
    use std::ptr::{self, NonNull};

    /// Create a zero-filled segment of `size` bytes.
    ///
    /// Fails with `AlreadyExists` if the name is taken, so two owners never
    /// end up sharing one segment by accident.
    pub fn create_shared_memory(size: usize, name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
        Ok(Box::new(LinuxSharedMemory::create(size, name)?))
    }

    /// Map an existing segment. `size` is the minimum the caller needs; the
    /// whole segment is mapped.
    pub fn attach_shared_memory(name: &str, size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
        Ok(Box::new(LinuxSharedMemory::attach(name, size)?))
    }

    /// Remove a segment name. Open mappings stay valid until unmapped.
    pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
        validate_name(name)?;
        std::fs::remove_file(segment_path(name))
    }

    #[derive(Debug)]
    pub struct LinuxSharedMemory {
        base: NonNull<u8>,
        len: usize,
        fd: i32,
        name: String,
    }

    unsafe impl Send for LinuxSharedMemory {}
    unsafe impl Sync for LinuxSharedMemory {}

    impl LinuxSharedMemory {
        pub fn create(size: usize, name: &str) -> io::Result<Self> {
            validate_name(name)?;
            if size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Shared memory size must be non-zero",
                ));
            }
            let path = segment_path(name);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)
                .map_err(|e| io::Error::new(e.kind(), format!("cannot create segment {}: {}", path, e)))?;

            match file.set_len(size as u64).and_then(|_| Self::from_file(file, size, name)) {
                Ok(segment) => Ok(segment),
                Err(e) => {
                    let _ = std::fs::remove_file(&path);
                    Err(e)
                }
            }
        }

        pub fn attach(name: &str, min_size: usize) -> io::Result<Self> {
            validate_name(name)?;
            let path = segment_path(name);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| io::Error::new(e.kind(), format!("cannot open segment {}: {}", path, e)))?;

            let len = file.metadata()?.len() as usize;
            if len == 0 || len < min_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment {} holds {} bytes, {} needed", name, len, min_size),
                ));
            }
            Self::from_file(file, len, name)
        }

        /// Map `len` bytes of `file` from offset 0, shared and writable. No
        /// alignment adjustment: byte offsets must agree with every other
        /// process mapping the same segment.
        fn from_file(file: File, len: usize, name: &str) -> io::Result<Self> {
            let mapped = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };
            if mapped == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }
            let base = NonNull::new(mapped as *mut u8)
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
            Ok(Self {
                base,
                len,
                fd: file.into_raw_fd(),
                name: name.to_string(),
            })
        }
    }

    impl Drop for LinuxSharedMemory {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
                libc::close(self.fd);
            }
        }
    }

    impl SharedMemoryBackend for LinuxSharedMemory {
        fn as_ptr(&self) -> *mut u8 {
            self.base.as_ptr()
        }

        fn size(&self) -> usize {
            self.len
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn raw_handle(&self) -> RawHandle {
            RawHandle::Fd(self.fd)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::SharedMemoryBackend;
    use std::io;

    fn unsupported<T>() -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "named shared memory segments need /dev/shm (Linux)",
        ))
    }

    pub fn create_shared_memory(_size: usize, _name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
        unsupported()
    }

    pub fn attach_shared_memory(_name: &str, _size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
        unsupported()
    }

    pub fn unlink_shared_memory(_name: &str) -> io::Result<()> {
        unsupported()
    }
}
