// Module naming follows project convention: subsystem namespaces are capitalised
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Frame;
#[allow(non_snake_case)]
pub mod Channel;
#[allow(non_snake_case)]
pub mod Context;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod config;
pub mod error;
pub mod ffi;

pub use config::RenderConfig;
pub use error::{RenderError, Result};
pub use Context::{ContextParams, FrameDriver, RenderContext, RendererEnvironment};
pub use Frame::{FramePointer, FrameShape, SharedFrameBuffer};
