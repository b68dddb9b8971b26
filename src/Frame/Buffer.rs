// The shared frame buffer: a named segment holding a fixed header followed
// by tightly packed row-major pixels.

use super::layout::{self, FrameHeader, FrameShape, FRAME_HEADER_SIZE};
use crate::error::{RenderError, Result};
use crate::Core::SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, SharedMemoryBackend,
};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

static SEGMENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// A segment name unique within this host for the life of the process.
pub fn unique_segment_name(prefix: &str) -> String {
    let seq = SEGMENT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, std::process::id(), seq)
}

/// Address and length of the pixel region, as handed across the C boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FramePointer {
    pub ptr: *const u8,
    pub len: usize,
}

impl FramePointer {
    /// The pointer as the integer the C ABI returns.
    pub fn addr(&self) -> u64 {
        self.ptr as usize as u64
    }

    /// View the frame bytes.
    ///
    /// # Safety
    /// The owning buffer must still be mapped and no render may be in flight.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }
}

/// One shared frame buffer, either created here (the owner) or attached.
pub struct SharedFrameBuffer {
    pub(crate) shm: Box<dyn SharedMemoryBackend>,
    pub(crate) shape: FrameShape,
    /// Created by this process; only the owner unlinks on drop.
    pub(crate) owner: bool,
    pub(crate) unlinked: bool,
}

impl SharedFrameBuffer {
    /// Create the named segment for `shape`, write its header and return the
    /// buffer together with the total segment size.
    pub fn create(name: &str, shape: FrameShape) -> Result<(Self, usize)> {
        let total = shape.total_size();
        let shm = create_shared_memory(total, name).map_err(map_shm_error)?;

        let mut buffer = Self {
            shm,
            shape,
            owner: true,
            unlinked: false,
        };
        let header = unsafe { std::slice::from_raw_parts_mut(buffer.shm.as_ptr(), FRAME_HEADER_SIZE) };
        if let Err(e) = layout::write_header(header, &shape) {
            let _ = buffer.unlink();
            return Err(e);
        }

        tracing::debug!(segment = name, total, ?shape, "created shared frame buffer");
        Ok((buffer, total))
    }

    /// Open an existing segment and check that its header describes `shape`.
    pub fn attach(name: &str, shape: FrameShape) -> Result<Self> {
        let shm = attach_shared_memory(name, shape.total_size()).map_err(map_shm_error)?;
        let buffer = Self {
            shm,
            shape,
            owner: false,
            unlinked: false,
        };
        let header = buffer.header()?;
        if header.shape()? != shape || header.dtype != layout::DTYPE_UINT8 {
            return Err(RenderError::Layout(format!(
                "segment {} holds {:?} ({}), expected {:?}",
                name,
                header.dims,
                header.dtype,
                shape.dims()
            )));
        }
        Ok(buffer)
    }

    pub fn name(&self) -> &str {
        self.shm.name()
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    /// Whole segment size, header included.
    pub fn total_size(&self) -> usize {
        self.shape.total_size()
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn header(&self) -> Result<FrameHeader> {
        layout::read_header(self.header_bytes())
    }

    pub fn header_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.shm.as_ptr(), FRAME_HEADER_SIZE) }
    }

    /// Address and length of the pixel region (header excluded).
    pub fn data_pointer(&self) -> FramePointer {
        let ptr = unsafe { self.shm.as_ptr().add(FRAME_HEADER_SIZE) };
        FramePointer {
            ptr,
            len: self.shape.data_len(),
        }
    }

    /// Pixel bytes. Only meaningful once the writer has finished a frame.
    pub fn pixels(&self) -> &[u8] {
        let frame = self.data_pointer();
        unsafe { std::slice::from_raw_parts(frame.ptr, frame.len) }
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        let frame = self.data_pointer();
        unsafe { std::slice::from_raw_parts_mut(frame.ptr as *mut u8, frame.len) }
    }

    /// Remove the named OS object. A segment that is already gone counts as
    /// unlinked, since the remote side removes it first at teardown.
    pub fn unlink(&mut self) -> Result<()> {
        if self.unlinked {
            return Ok(());
        }
        match unlink_shared_memory(self.shm.name()) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(RenderError::SharedMemory(e)),
        }
        self.unlinked = true;
        tracing::debug!(segment = self.shm.name(), "unlinked shared frame buffer");
        Ok(())
    }

    /// Release the local mapping.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for SharedFrameBuffer {
    fn drop(&mut self) {
        if self.owner && !self.unlinked {
            if let Err(e) = self.unlink() {
                tracing::warn!(segment = self.shm.name(), error = %e, "failed to unlink frame buffer on drop");
            }
        }
    }
}

fn map_shm_error(e: io::Error) -> RenderError {
    match e.kind() {
        io::ErrorKind::Unsupported => RenderError::Unsupported(e.to_string()),
        _ => RenderError::SharedMemory(e),
    }
}

/// Copy tightly packed rows into a destination whose rows are `dst_stride`
/// bytes apart. Padding bytes in the destination are left untouched.
pub fn copy_to_strided(
    src: &[u8],
    dst: &mut [u8],
    width: usize,
    height: usize,
    dst_stride: usize,
) -> Result<()> {
    if width == 0 || height == 0 {
        return Ok(());
    }
    let src_stride = width * layout::CHANNELS;
    if dst_stride < src_stride {
        return Err(RenderError::InvalidArgument(format!(
            "destination stride {} is smaller than a row of {} bytes",
            dst_stride, src_stride
        )));
    }
    if src.len() < src_stride * height {
        return Err(RenderError::InvalidArgument(format!(
            "source holds {} bytes, {} needed",
            src.len(),
            src_stride * height
        )));
    }
    if dst.len() < dst_stride * (height - 1) + src_stride {
        return Err(RenderError::InvalidArgument(format!(
            "destination holds {} bytes, {} needed",
            dst.len(),
            dst_stride * (height - 1) + src_stride
        )));
    }

    for (row, src_row) in src.chunks_exact(src_stride).take(height).enumerate() {
        let at = row * dst_stride;
        dst[at..at + src_stride].copy_from_slice(src_row);
    }
    Ok(())
}

impl std::fmt::Debug for SharedFrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_shared_frame_buffer(self, f)
    }
}
