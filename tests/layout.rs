// Layout conformance tests for the shared frame buffer header.
// The renderer process computes the same offsets independently, so these
// pin sizes and field offsets of FrameHeaderRaw and the byte-level codec.
use memoffset::offset_of;
use shm_render::Frame::layout::{
    header_size, read_header, write_header, FrameHeaderRaw, FrameShape, FRAME_HEADER_SIZE,
};
use std::mem::{align_of, size_of};

#[test]
fn test_frame_header_raw_layout() {
    let size = size_of::<FrameHeaderRaw>();
    let align = align_of::<FrameHeaderRaw>();
    let off_rank = offset_of!(FrameHeaderRaw, rank);
    let off_dims = offset_of!(FrameHeaderRaw, dims);
    let off_dtype = offset_of!(FrameHeaderRaw, dtype);
    let off_lock = offset_of!(FrameHeaderRaw, lock);

    println!(
        "FrameHeaderRaw => size: {size}, align: {align}, offsets: [rank:{off_rank}, dims:{off_dims}, dtype:{off_dtype}, lock:{off_lock}]"
    );

    assert_eq!(size, 33);
    assert_eq!(align, 1);
    assert_eq!(off_rank, 0);
    assert_eq!(off_dims, 4);
    assert_eq!(off_dtype, 16);
    assert_eq!(off_lock, 32);
    assert_eq!(size, FRAME_HEADER_SIZE);
}

#[test]
fn test_header_size_formula() {
    assert_eq!(header_size(3), 4 + 3 * 4 + 16 + 1);
    assert_eq!(FRAME_HEADER_SIZE, 33);
    assert_eq!(header_size(1), 25);
    assert_eq!(header_size(4), 37);
}

#[test]
fn test_frame_shape_sizes() {
    let shape = FrameShape::new(64, 32).unwrap();
    assert_eq!(shape.dims(), [32, 64, 4]);
    assert_eq!(shape.data_len(), 64 * 32 * 4);
    assert_eq!(shape.row_stride(), 256);
    assert_eq!(shape.total_size(), 33 + 8192);

    assert!(FrameShape::new(0, 32).is_err());
    assert!(FrameShape::new(64, 0).is_err());
}

#[test]
fn test_header_bytes() {
    let shape = FrameShape::new(1920, 1080).unwrap();
    let mut buf = vec![0xAAu8; FRAME_HEADER_SIZE];
    write_header(&mut buf, &shape).unwrap();

    assert_eq!(&buf[0..4], &3u32.to_le_bytes());
    assert_eq!(&buf[4..8], &1080u32.to_le_bytes());
    assert_eq!(&buf[8..12], &1920u32.to_le_bytes());
    assert_eq!(&buf[12..16], &4u32.to_le_bytes());
    assert_eq!(&buf[16..21], b"uint8");
    assert!(buf[21..32].iter().all(|b| *b == 0), "dtype must be NUL padded");
    assert_eq!(buf[32], 0, "lock byte starts cleared");

    let header = read_header(&buf).unwrap();
    assert_eq!(header.rank, 3);
    assert_eq!(header.dims, vec![1080, 1920, 4]);
    assert_eq!(header.dtype, "uint8");
    assert_eq!(header.lock, 0);
    assert_eq!(header.header_size(), FRAME_HEADER_SIZE);
    assert_eq!(header.shape().unwrap(), shape);
}

#[test]
fn test_read_header_rejects_garbage() {
    // truncated
    assert!(read_header(&[3, 0, 0]).is_err());
    // rank 0
    assert!(read_header(&[0u8; 64]).is_err());
    // rank claims more dims than the buffer holds
    let mut buf = vec![0u8; 20];
    buf[0] = 5;
    assert!(read_header(&buf).is_err());
    // header too small for write
    let shape = FrameShape::new(2, 2).unwrap();
    assert!(write_header(&mut [0u8; 10], &shape).is_err());
}

#[test]
fn test_non_frame_shape_is_rejected() {
    let mut buf = vec![0u8; FRAME_HEADER_SIZE];
    buf[0..4].copy_from_slice(&3u32.to_le_bytes());
    buf[4..8].copy_from_slice(&10u32.to_le_bytes());
    buf[8..12].copy_from_slice(&10u32.to_le_bytes());
    buf[12..16].copy_from_slice(&3u32.to_le_bytes()); // RGB, not RGBA
    buf[16..21].copy_from_slice(b"uint8");
    let header = read_header(&buf).unwrap();
    assert!(header.shape().is_err());
}
