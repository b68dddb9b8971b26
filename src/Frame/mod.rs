pub mod Buffer;
pub mod layout;

pub use layout::{header_size, FrameHeader, FrameShape, FRAME_HEADER_SIZE};
pub use Buffer::{copy_to_strided, unique_segment_name, FramePointer, SharedFrameBuffer};
