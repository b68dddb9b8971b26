use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// The interpreter or its support files could not be set up.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// The remote side answered with an error marker.
    #[error("Remote command `{command}` failed:\n{traceback}")]
    Remote { command: String, traceback: String },

    #[error("Command channel I/O error: {0}")]
    Channel(#[from] std::io::Error),

    #[error("Shared memory error: {0}")]
    SharedMemory(std::io::Error),

    #[error("Command channel is closed")]
    ChannelClosed,

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handle {0} not found")]
    NotFound(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Frame buffer layout error: {0}")]
    Layout(String),
}

impl RenderError {
    /// True when the subprocess behind a channel can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::Channel(_) | RenderError::ChannelClosed | RenderError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
