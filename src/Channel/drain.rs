use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::thread;

#[derive(Copy, Clone, Debug)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

/// Forward every line of `source` to the log until EOF.
///
/// Lines are read as raw bytes and decoded lossily: native libraries in the
/// renderer may write anything, and the pipe must stay drained or the child
/// blocks (or fails with EPIPE) on its next diagnostic write.
///
/// The thread is detached: it ends when the subprocess closes the stream,
/// and nothing ever joins it, so it cannot hold up teardown or exit.
pub(crate) fn spawn_drain<R>(source: R, stream: Stream, pid: u32) -> std::io::Result<()>
where
    R: Read + Send + 'static,
{
    let name = match stream {
        Stream::Stdout => format!("shm-render-out-{}", pid),
        Stream::Stderr => format!("shm-render-err-{}", pid),
    };
    thread::Builder::new().name(name).spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => log_line(stream, pid, &buf),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(target: "shm_render::remote", pid, ?stream, error = %e, "diagnostic stream ended");
                    break;
                }
            }
        }
    })?;
    Ok(())
}

fn log_line(stream: Stream, pid: u32, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    match stream {
        Stream::Stdout => tracing::info!(target: "shm_render::remote", pid, "{}", line),
        Stream::Stderr => tracing::warn!(target: "shm_render::remote", pid, "{}", line),
    }
}
