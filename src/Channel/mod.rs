mod drain;
pub mod protocol;
pub mod repl;

pub use protocol::{check_response, is_error_response, ERROR_MARKER};
pub use repl::ReplChannel;

use crate::error::Result;

/// Blocking request/response link to one long-lived command interpreter.
///
/// One command is in flight at a time (`&mut self`); the protocol has no
/// request ids, so responses are matched to commands purely by order.
/// Remote failures come back as ordinary text starting with
/// [`ERROR_MARKER`]; `Err` means the link itself failed.
pub trait CommandChannel: Send {
    /// Run `command` and wait for it to finish. With `capture_output` the
    /// remote output is returned, otherwise only error text is.
    fn execute(&mut self, command: &str, capture_output: bool) -> Result<String>;

    /// Stop the interpreter. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_alive(&self) -> bool;

    fn pid(&self) -> Option<u32>;

    /// `execute` with capture, mapping an error-marker response to
    /// `RenderError::Remote`.
    fn execute_checked(&mut self, command: &str) -> Result<String> {
        let response = self.execute(command, true)?;
        check_response(command, response)
    }
}
