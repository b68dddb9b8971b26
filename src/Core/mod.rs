pub mod SharedMemory;
pub mod registry;

pub use registry::{HandleRegistry, INVALID_HANDLE};
pub use SharedMemory::{
    attach_shared_memory, create_shared_memory, shared_memory_exists, unlink_shared_memory,
    RawHandle, SharedMemoryBackend,
};
