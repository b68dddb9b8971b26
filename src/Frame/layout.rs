// Byte layout of the shared frame buffer header.
//
// Both ends of the exchange derive the pixel offset from `header_size`; the
// renderer-side module computes `4 + rank*4 + 16 + 1` from the marker word
// it reads at offset 0. Nothing else in the crate is allowed to spell out
// this arithmetic.

use crate::error::{RenderError, Result};

/// Channels per pixel (RGBA / BGR0 style, one byte each).
pub const CHANNELS: usize = 4;

/// Rank of every frame shape: `[height, width, channels]`.
pub const FRAME_RANK: usize = 3;

/// Size of the marker word at offset 0. It holds the rank of the shape.
pub const MARKER_SIZE: usize = 4;

/// Size of one dimension entry.
pub const DIM_SIZE: usize = 4;

/// Size of the dtype descriptor (ASCII, NUL padded).
pub const DTYPE_SIZE: usize = 16;

/// Size of the trailing lock/sync byte.
pub const LOCK_SIZE: usize = 1;

/// Dtype descriptor written for 8-bit pixel data.
pub const DTYPE_UINT8: &str = "uint8";

/// Header size for a shape of the given rank.
pub const fn header_size(rank: usize) -> usize {
    MARKER_SIZE + DIM_SIZE * rank + DTYPE_SIZE + LOCK_SIZE
}

/// Header size of every frame buffer this crate creates (33 bytes).
pub const FRAME_HEADER_SIZE: usize = header_size(FRAME_RANK);

/// C view of the rank-3 header, for layout checks and foreign readers.
/// Packed: the pixel data starts right after `lock`, at byte 33.
#[repr(C, packed)]
#[derive(Copy, Clone, Debug)]
pub struct FrameHeaderRaw {
    pub rank: u32,
    pub dims: [u32; FRAME_RANK],
    pub dtype: [u8; DTYPE_SIZE],
    pub lock: u8,
}

/// Logical shape of a frame: `[height, width, channels]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl FrameShape {
    /// Shape of a `width` x `height` frame with 4 bytes per pixel.
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "frame size must be positive, got {}x{}",
                width, height
            )));
        }
        let shape = Self {
            height,
            width,
            channels: CHANNELS,
        };
        // Dimensions travel as u32 and the total must be addressable.
        if height > u32::MAX as usize || width > u32::MAX as usize {
            return Err(RenderError::InvalidArgument(format!(
                "frame size {}x{} does not fit the header",
                width, height
            )));
        }
        height
            .checked_mul(width)
            .and_then(|px| px.checked_mul(CHANNELS))
            .and_then(|len| len.checked_add(FRAME_HEADER_SIZE))
            .ok_or_else(|| {
                RenderError::InvalidArgument(format!("frame size {}x{} overflows", width, height))
            })?;
        Ok(shape)
    }

    pub fn dims(&self) -> [usize; FRAME_RANK] {
        [self.height, self.width, self.channels]
    }

    /// Product of the shape: the pixel region length in bytes.
    pub fn data_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// Bytes per row in the (unpadded) shared buffer.
    pub fn row_stride(&self) -> usize {
        self.width * self.channels
    }

    /// Header plus pixel region.
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.data_len()
    }
}

/// Parsed header of a frame buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub rank: usize,
    pub dims: Vec<usize>,
    pub dtype: String,
    pub lock: u8,
}

impl FrameHeader {
    pub fn header_size(&self) -> usize {
        header_size(self.rank)
    }

    /// Interpret the dimensions as a frame shape.
    pub fn shape(&self) -> Result<FrameShape> {
        if self.rank != FRAME_RANK || self.dims[2] != CHANNELS {
            return Err(RenderError::Layout(format!(
                "expected shape [h, w, {}], found {:?}",
                CHANNELS, self.dims
            )));
        }
        FrameShape::new(self.dims[1], self.dims[0])
    }
}

/// Write a uint8 header for `shape` into the start of `buf`.
pub fn write_header(buf: &mut [u8], shape: &FrameShape) -> Result<()> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Err(RenderError::Layout(format!(
            "buffer of {} bytes cannot hold a {} byte header",
            buf.len(),
            FRAME_HEADER_SIZE
        )));
    }
    buf[..MARKER_SIZE].copy_from_slice(&(FRAME_RANK as u32).to_le_bytes());
    for (i, dim) in shape.dims().iter().enumerate() {
        let at = MARKER_SIZE + i * DIM_SIZE;
        buf[at..at + DIM_SIZE].copy_from_slice(&(*dim as u32).to_le_bytes());
    }
    let dtype_at = MARKER_SIZE + FRAME_RANK * DIM_SIZE;
    let dtype = &mut buf[dtype_at..dtype_at + DTYPE_SIZE];
    dtype.fill(0);
    dtype[..DTYPE_UINT8.len()].copy_from_slice(DTYPE_UINT8.as_bytes());
    buf[dtype_at + DTYPE_SIZE] = 0;
    Ok(())
}

/// Parse and sanity check the header at the start of `buf`.
pub fn read_header(buf: &[u8]) -> Result<FrameHeader> {
    let word = |at: usize| -> Result<u32> {
        buf.get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .ok_or_else(|| RenderError::Layout(format!("header truncated at byte {}", at)))
    };

    let rank = word(0)? as usize;
    if rank == 0 || rank > 8 {
        return Err(RenderError::Layout(format!("implausible rank {}", rank)));
    }
    let size = header_size(rank);
    if buf.len() < size {
        return Err(RenderError::Layout(format!(
            "buffer of {} bytes cannot hold a rank {} header",
            buf.len(),
            rank
        )));
    }

    let dims = (0..rank)
        .map(|i| word(MARKER_SIZE + i * DIM_SIZE).map(|d| d as usize))
        .collect::<Result<Vec<_>>>()?;

    let dtype_at = MARKER_SIZE + rank * DIM_SIZE;
    let dtype_bytes = &buf[dtype_at..dtype_at + DTYPE_SIZE];
    let end = dtype_bytes.iter().position(|b| *b == 0).unwrap_or(DTYPE_SIZE);
    let dtype = std::str::from_utf8(&dtype_bytes[..end])
        .map_err(|_| RenderError::Layout("dtype descriptor is not ASCII".to_string()))?
        .to_string();

    Ok(FrameHeader {
        rank,
        dims,
        dtype,
        lock: buf[dtype_at + DTYPE_SIZE],
    })
}
