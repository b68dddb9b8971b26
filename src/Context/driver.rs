use super::{ContextParams, RenderContext, RendererEnvironment};
use crate::error::Result;
use crate::Core::registry::HandleRegistry;
use crate::Frame::FramePointer;
use parking_lot::Mutex;
use std::sync::Arc;

/// Registry of live contexts. The per-context mutex keeps one command in
/// flight per channel; different contexts render in parallel.
pub type ContextRegistry = HandleRegistry<Mutex<RenderContext>>;

/// Handle-based front end: create, render and close contexts by handle.
#[derive(Clone)]
pub struct FrameDriver {
    registry: Arc<ContextRegistry>,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new(Arc::new(ContextRegistry::new()))
    }
}

impl FrameDriver {
    pub fn new(registry: Arc<ContextRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Create a context in `env` and register it. Nothing is registered on
    /// failure.
    pub fn create_context(&self, env: &RendererEnvironment, params: &ContextParams) -> Result<u64> {
        let context = RenderContext::create(env, params)?;
        Ok(self.adopt(context))
    }

    /// Register a context built elsewhere.
    pub fn adopt(&self, context: RenderContext) -> u64 {
        let segment = context.segment_name().to_string();
        let handle = self.registry.register(Mutex::new(context));
        tracing::debug!(handle, segment = %segment, "registered render context");
        handle
    }

    /// Render the frame at `time` on the context behind `handle`.
    ///
    /// Failures leave the context registered; fatal channel errors are
    /// logged so operators know the subprocess is gone.
    pub fn render(&self, handle: u64, time: f64) -> Result<FramePointer> {
        let context = self.registry.lookup(handle)?;
        let mut context = context.lock();
        context.render(time).map_err(|e| {
            if e.is_fatal() {
                tracing::error!(handle, error = %e, "renderer subprocess is gone; close this context");
            } else {
                tracing::warn!(handle, time, error = %e, "frame render failed");
            }
            e
        })
    }

    /// Release `handle` and tear its context down. Unknown or already closed
    /// handles return `NotFound` and touch nothing.
    pub fn close_context(&self, handle: u64) -> Result<()> {
        let context = self.registry.release(handle)?;
        let mut context = context.lock();
        context.close()
    }

    /// Run `f` against the context behind `handle` while holding its lock.
    pub fn with_context<R>(&self, handle: u64, f: impl FnOnce(&mut RenderContext) -> R) -> Result<R> {
        let context = self.registry.lookup(handle)?;
        let mut context = context.lock();
        Ok(f(&mut context))
    }

    pub fn live_contexts(&self) -> usize {
        self.registry.len()
    }
}
