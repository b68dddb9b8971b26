// Render context lifecycle: create (bootstrap the remote renderer and the
// shared frame buffer), render frames, close.

pub mod driver;
pub mod environment;

pub use driver::{ContextRegistry, FrameDriver};
pub use environment::RendererEnvironment;

use crate::config::RenderConfig;
use crate::error::{RenderError, Result};
use crate::Channel::protocol::py_str;
use crate::Channel::CommandChannel;
use crate::Frame::{unique_segment_name, FramePointer, FrameShape, SharedFrameBuffer};

/// Prefix of every segment name this crate creates.
pub const SEGMENT_PREFIX: &str = "shmrender";

/// Remote teardown of the renderer's view of the buffer.
pub const REMOTE_UNLINK_COMMAND: &str = "shm.close(); shm.unlink()";

/// What a caller supplies to create a context.
#[derive(Clone, Debug)]
pub struct ContextParams {
    pub width: u32,
    pub height: u32,
    pub shader_id: String,
    /// Access key for the renderer; empty means none is set remotely.
    pub credential: String,
}

impl ContextParams {
    pub fn new(width: u32, height: u32, shader_id: &str) -> Self {
        Self {
            width,
            height,
            shader_id: shader_id.to_string(),
            credential: String::new(),
        }
    }

    pub fn with_credential(mut self, credential: &str) -> Self {
        self.credential = credential.to_string();
        self
    }

    fn validate(&self) -> Result<FrameShape> {
        if self.shader_id.trim().is_empty() {
            return Err(RenderError::InvalidArgument("shader id is empty".to_string()));
        }
        FrameShape::new(self.width as usize, self.height as usize)
    }
}

/// One live renderer session: the subprocess channel, the shared buffer and
/// the fixed frame dimensions.
///
/// Frames are only valid between the return of one `render` and the start
/// of the next; the remote side writes the buffer while a render command is
/// in flight and the header lock byte is not consulted.
pub struct RenderContext {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) channel: Box<dyn CommandChannel>,
    pub(crate) buffer: SharedFrameBuffer,
    pub(crate) closed: bool,
}

impl RenderContext {
    /// Spawn an interpreter from `env` and bring a renderer up in it.
    pub fn create(env: &RendererEnvironment, params: &ContextParams) -> Result<Self> {
        params.validate()?;
        let channel = env.spawn_channel()?;
        Self::create_with_channel(env.config(), channel, params)
    }

    /// Bring a renderer up over an already running channel. On failure the
    /// channel is closed and any buffer created on the way is unlinked.
    pub fn create_with_channel(
        config: &RenderConfig,
        mut channel: Box<dyn CommandChannel>,
        params: &ContextParams,
    ) -> Result<Self> {
        let result = params
            .validate()
            .and_then(|shape| bootstrap(config, channel.as_mut(), params, shape));

        match result {
            Ok(buffer) => {
                tracing::info!(
                    pid = ?channel.pid(),
                    segment = buffer.name(),
                    width = params.width,
                    height = params.height,
                    shader = %params.shader_id,
                    "render context ready"
                );
                Ok(Self {
                    width: params.width,
                    height: params.height,
                    channel,
                    buffer,
                    closed: false,
                })
            }
            Err(e) => {
                tracing::error!(error = %e, shader = %params.shader_id, "render context creation failed");
                if let Err(close_err) = channel.close() {
                    tracing::warn!(error = %close_err, "failed to close channel after creation error");
                }
                Err(e)
            }
        }
    }

    /// Render the frame at `time` seconds and return where its pixels are.
    ///
    /// A remote failure leaves the context usable for the next call.
    pub fn render(&mut self, time: f64) -> Result<FramePointer> {
        if self.closed {
            return Err(RenderError::ChannelClosed);
        }
        if !time.is_finite() {
            return Err(RenderError::InvalidArgument(format!(
                "frame time must be finite, got {}",
                time
            )));
        }
        let command = format!("renderer.render_to_buffer(shm, time={:.6})", time);
        self.channel.execute_checked(&command)?;
        Ok(self.buffer.data_pointer())
    }

    /// Tear the session down: remote close+unlink, stop the subprocess,
    /// unlink the local segment. Every step runs; the first error wins.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first = None;
        keep_first(
            &mut first,
            "remote unlink",
            self.channel.execute_checked(REMOTE_UNLINK_COMMAND).map(|_| ()),
        );
        keep_first(&mut first, "channel close", self.channel.close());
        keep_first(&mut first, "local unlink", self.buffer.unlink());

        tracing::info!(segment = self.buffer.name(), clean = first.is_none(), "render context closed");
        first.map_or(Ok(()), Err)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `[height, width, 4]`
    pub fn shape(&self) -> FrameShape {
        self.buffer.shape()
    }

    pub fn frame_len(&self) -> usize {
        self.buffer.shape().data_len()
    }

    pub fn segment_name(&self) -> &str {
        self.buffer.name()
    }

    pub fn buffer(&self) -> &SharedFrameBuffer {
        &self.buffer
    }

    /// Pixels of the last rendered frame.
    pub fn frame(&self) -> &[u8] {
        self.buffer.pixels()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn channel_alive(&self) -> bool {
        !self.closed && self.channel.is_alive()
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "render context dropped without a clean close");
            }
        }
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_render_context(self, f)
    }
}

fn bootstrap(
    config: &RenderConfig,
    channel: &mut dyn CommandChannel,
    params: &ContextParams,
    shape: FrameShape,
) -> Result<SharedFrameBuffer> {
    channel.execute_checked("from multiprocessing import shared_memory")?;
    channel.execute_checked(&format!("import {}, os", config.renderer_module))?;
    if !params.credential.is_empty() {
        channel.execute_checked(&format!(
            "os.environ[{}] = {}",
            py_str(&config.credential_env),
            py_str(&params.credential)
        ))?;
    }
    channel.execute_checked(&format!(
        "renderer = {}.{}({}, resolution=({}, {}))",
        config.renderer_module,
        config.renderer_class,
        py_str(&params.shader_id),
        params.width,
        params.height
    ))?;

    let name = unique_segment_name(SEGMENT_PREFIX);
    let (mut buffer, total) = SharedFrameBuffer::create(&name, shape)?;
    let open = format!(
        "shm = shared_memory.SharedMemory(name={}, create=False, size={})",
        py_str(&name),
        total
    );
    if let Err(e) = channel.execute_checked(&open) {
        let _ = buffer.unlink();
        return Err(e);
    }
    Ok(buffer)
}

fn keep_first(first: &mut Option<RenderError>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::warn!(step, error = %e, "teardown step failed");
        first.get_or_insert(e);
    }
}
