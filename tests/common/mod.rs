// Scripted stand-in for the renderer subprocess, shared by the context and
// driver tests. It maps the segment it is told about by name, the way the
// real renderer does, and paints a time-dependent pattern on each render.
#![allow(dead_code)]

use parking_lot::Mutex;
use shm_render::Channel::protocol::ERROR_MARKER;
use shm_render::Channel::CommandChannel;
use shm_render::Core::{attach_shared_memory, unlink_shared_memory, SharedMemoryBackend};
use shm_render::Frame::layout::read_header;
use shm_render::Frame::{SharedFrameBuffer, FRAME_HEADER_SIZE};
use shm_render::{RenderError, Result};
use std::sync::Arc;

/// Pixel value the fake renderer writes at `index` for frame time `time`.
pub fn pattern_byte(index: usize, time: f64) -> u8 {
    ((index as u64 + (time * 10.0).round() as u64) % 251) as u8
}

#[derive(Default)]
pub struct Script {
    /// Every command received, in order.
    pub commands: Vec<String>,
    /// Commands containing this text fail remotely.
    pub fail_on: Option<String>,
    /// Fail the link itself on this command.
    pub break_on: Option<String>,
    pub closed: bool,
    pub close_calls: usize,
}

pub struct FakeRenderer {
    script: Arc<Mutex<Script>>,
    view: Option<SharedFrameBuffer>,
    segment: Option<String>,
}

impl FakeRenderer {
    pub fn new() -> (Box<dyn CommandChannel>, Arc<Mutex<Script>>) {
        let script = Arc::new(Mutex::new(Script::default()));
        let channel = FakeRenderer {
            script: script.clone(),
            view: None,
            segment: None,
        };
        (Box::new(channel), script)
    }

    pub fn failing_on(text: &str) -> (Box<dyn CommandChannel>, Arc<Mutex<Script>>) {
        let (channel, script) = Self::new();
        script.lock().fail_on = Some(text.to_string());
        (channel, script)
    }

    fn traceback(message: &str) -> String {
        format!(
            "{} (most recent call last):\n  File \"<repl>\", line 1, in <module>\nRuntimeError: {}",
            ERROR_MARKER, message
        )
    }

    fn open_segment(&mut self, command: &str) -> String {
        let name = between(command, "name='", "'");
        let size: usize = between(command, "size=", ")").parse().unwrap_or(0);
        let raw = match attach_shared_memory(&name, size) {
            Ok(raw) => raw,
            Err(e) => return Self::traceback(&format!("FileNotFoundError: {}", e)),
        };
        let header_bytes = unsafe { std::slice::from_raw_parts(raw.as_ptr(), FRAME_HEADER_SIZE) };
        let shape = match read_header(header_bytes).and_then(|h| h.shape()) {
            Ok(shape) => shape,
            Err(e) => return Self::traceback(&e.to_string()),
        };
        drop(raw);
        match SharedFrameBuffer::attach(&name, shape) {
            Ok(view) => {
                self.view = Some(view);
                self.segment = Some(name);
                String::new()
            }
            Err(e) => Self::traceback(&e.to_string()),
        }
    }

    fn render(&mut self, command: &str) -> String {
        let time: f64 = between(command, "time=", ")").parse().unwrap_or(f64::NAN);
        if time < 0.0 {
            return Self::traceback("negative frame time");
        }
        match self.view.as_mut() {
            Some(view) => {
                for (i, px) in view.pixels_mut().iter_mut().enumerate() {
                    *px = pattern_byte(i, time);
                }
                String::new()
            }
            None => Self::traceback("NameError: name 'shm' is not defined"),
        }
    }

    fn unlink(&mut self) -> String {
        self.view = None;
        match self.segment.take() {
            Some(name) => match unlink_shared_memory(&name) {
                Ok(()) => String::new(),
                Err(e) => Self::traceback(&e.to_string()),
            },
            None => Self::traceback("NameError: name 'shm' is not defined"),
        }
    }
}

fn between(haystack: &str, start: &str, end: &str) -> String {
    haystack
        .split_once(start)
        .and_then(|(_, rest)| rest.split_once(end))
        .map(|(value, _)| value.to_string())
        .unwrap_or_default()
}

impl CommandChannel for FakeRenderer {
    fn execute(&mut self, command: &str, _capture_output: bool) -> Result<String> {
        {
            let mut script = self.script.lock();
            if script.closed {
                return Err(RenderError::ChannelClosed);
            }
            script.commands.push(command.to_string());
            let broken = matches!(&script.break_on, Some(text) if command.contains(text.as_str()));
            if broken {
                script.closed = true;
                return Err(RenderError::ChannelClosed);
            }
            if matches!(&script.fail_on, Some(text) if command.contains(text.as_str())) {
                return Ok(Self::traceback("scripted failure"));
            }
        }

        let response = if command.starts_with("shm = shared_memory.SharedMemory(") {
            self.open_segment(command)
        } else if command.starts_with("renderer.render_to_buffer(") {
            self.render(command)
        } else if command == "shm.close(); shm.unlink()" {
            self.unlink()
        } else {
            String::new()
        };
        Ok(response)
    }

    fn close(&mut self) -> Result<()> {
        let mut script = self.script.lock();
        script.close_calls += 1;
        script.closed = true;
        self.view = None;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.script.lock().closed
    }

    fn pid(&self) -> Option<u32> {
        None
    }
}
