// Framing and quoting for the text command protocol.

use crate::error::{RenderError, Result};

/// Prefix a remote response carries when the command raised.
pub const ERROR_MARKER: &str = "Traceback";

/// Record separator; never allowed inside command text.
pub const FRAME_SEPARATOR: char = '\x1e';

/// Opens a request; followed by ` 0` or ` 1` for the capture flag.
pub const BEGIN_LINE: &str = "\x1eBEGIN";

/// Closes a request and a response.
pub const END_LINE: &str = "\x1eEND";

/// Whether a response reports a remote failure.
pub fn is_error_response(response: &str) -> bool {
    response.trim_start().starts_with(ERROR_MARKER)
}

/// Turn an error-marker response into `RenderError::Remote`.
pub fn check_response(command: &str, response: String) -> Result<String> {
    if is_error_response(&response) {
        return Err(RenderError::Remote {
            command: command.to_string(),
            traceback: response,
        });
    }
    Ok(response)
}

/// Frame one command for the wire.
pub fn encode_request(command: &str, capture_output: bool) -> Result<String> {
    if command.contains(FRAME_SEPARATOR) {
        return Err(RenderError::InvalidArgument(
            "command text contains the frame separator".to_string(),
        ));
    }
    let mut framed = String::with_capacity(command.len() + 16);
    framed.push_str(BEGIN_LINE);
    framed.push_str(if capture_output { " 1\n" } else { " 0\n" });
    framed.push_str(command.trim_end_matches('\n'));
    framed.push('\n');
    framed.push_str(END_LINE);
    framed.push('\n');
    Ok(framed)
}

/// Single-quoted Python string literal for `value`.
pub fn py_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\x7f' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
