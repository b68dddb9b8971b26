use crate::Channel::ReplChannel;
use crate::Context::{RenderContext, RendererEnvironment};
use crate::Frame::SharedFrameBuffer;
use crate::Channel::CommandChannel;
use std::fmt;

/// Debug function for SharedFrameBuffer
///
/// Shows the segment name, shape and pixel address without reading the
/// mapped bytes.
pub fn debug_shared_frame_buffer(buffer: &SharedFrameBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedFrameBuffer")
        .field("name", &buffer.name())
        .field("shape", &buffer.shape().dims())
        .field("total_size", &buffer.total_size())
        .field("data", &format_args!("{:p}", buffer.data_pointer().ptr))
        .field("owner", &buffer.owner)
        .field("unlinked", &buffer.unlinked)
        .finish()
}

/// Debug function for ReplChannel
pub fn debug_repl_channel(channel: &ReplChannel, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReplChannel")
        .field("pid", &channel.pid())
        .field("alive", &channel.is_alive())
        .field("timeout", &channel.timeout())
        .finish_non_exhaustive()
}

/// Debug function for RenderContext
///
/// The channel is opaque (any CommandChannel); only its pid and liveness show.
pub fn debug_render_context(context: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RenderContext")
        .field("width", &context.width)
        .field("height", &context.height)
        .field("pid", &context.channel.pid())
        .field("alive", &context.channel_alive())
        .field("buffer", &context.buffer)
        .field("closed", &context.closed)
        .finish()
}

pub fn debug_environment(env: &RendererEnvironment, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RendererEnvironment")
        .field("python", &env.config.python)
        .field("version", &env.python_version)
        .field("module_dir", &env.module_dir)
        .field("install_packages", &env.config.install_packages)
        .finish()
}
