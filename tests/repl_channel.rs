// Command channel tests against a real interpreter running the bundled
// command server. Skipped when python3 is not on PATH.
// Run with: cargo test --test repl_channel -- --nocapture

use serial_test::serial;
use shm_render::Channel::repl::{ReplChannel, ReplOptions};
use shm_render::Channel::CommandChannel;
use shm_render::Context::environment::{materialize_modules, REPL_SERVER_FILE};
use shm_render::RenderError;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

fn python_available() -> bool {
    let found = Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !found {
        println!("python3 not found, skipping");
    }
    found
}

fn spawn(cache: &tempfile::TempDir, timeout: Option<Duration>) -> ReplChannel {
    let module_dir = materialize_modules(cache.path()).unwrap();
    let options = ReplOptions {
        python: PathBuf::from("python3"),
        server_script: module_dir.join(REPL_SERVER_FILE),
        python_path: vec![module_dir],
        command_timeout: timeout,
        close_grace: Duration::from_millis(2000),
    };
    ReplChannel::spawn(&options).unwrap()
}

#[test]
#[serial]
fn test_execute_and_capture() {
    if !python_available() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let mut channel = spawn(&cache, None);
    println!("Channel: {:#?}", channel);
    assert!(channel.is_alive());
    assert!(channel.pid().is_some());

    assert_eq!(channel.execute("x = 20", true).unwrap(), "");
    assert_eq!(channel.execute("x + 22", true).unwrap(), "42");
    assert_eq!(channel.execute("print('a'); print('b')", true).unwrap(), "a\nb");
    // Without capture, ordinary output goes to the log, not the response.
    assert_eq!(channel.execute("print('hidden')", false).unwrap(), "");

    let block = "def twice(v):\n    return v * 2\n";
    channel.execute_checked(block).unwrap();
    assert_eq!(channel.execute_checked("twice(x)").unwrap(), "40");

    channel.close().unwrap();
    assert!(!channel.is_alive());
    assert!(matches!(channel.execute("1", true), Err(RenderError::ChannelClosed)));
    // close twice
    channel.close().unwrap();
}

#[test]
#[serial]
fn test_remote_error_is_text() {
    if !python_available() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let mut channel = spawn(&cache, None);

    let response = channel.execute("1 / 0", false).unwrap();
    assert!(response.starts_with("Traceback"), "got {:?}", response);
    assert!(response.contains("ZeroDivisionError"));

    match channel.execute_checked("undefined_name") {
        Err(RenderError::Remote { command, traceback }) => {
            assert_eq!(command, "undefined_name");
            assert!(traceback.contains("NameError"));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // State survives a failed command.
    channel.execute_checked("y = 5").unwrap();
    assert_eq!(channel.execute_checked("y").unwrap(), "5");
    channel.close().unwrap();
}

#[test]
#[serial]
fn test_timeout_kills_subprocess() {
    if !python_available() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let mut channel = spawn(&cache, Some(Duration::from_millis(300)));

    assert_eq!(channel.execute_checked("1 + 1").unwrap(), "2");

    let started = Instant::now();
    let err = channel.execute("import time; time.sleep(30)", true).unwrap_err();
    assert!(matches!(err, RenderError::Timeout(_)));
    assert!(err.is_fatal());
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(!channel.is_alive());
    assert!(matches!(channel.execute("1", true), Err(RenderError::ChannelClosed)));
    channel.close().unwrap();
}

#[test]
#[serial]
fn test_exit_is_detected() {
    if !python_available() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let mut channel = spawn(&cache, Some(Duration::from_secs(5)));

    let err = channel.execute("import os; os._exit(3)", true).unwrap_err();
    assert!(err.is_fatal(), "unexpected error: {:?}", err);
    assert!(!channel.is_alive());
    assert!(channel.execute("1", true).is_err());
    channel.close().unwrap();
}

#[test]
fn test_missing_interpreter() {
    let cache = tempfile::tempdir().unwrap();
    let module_dir = materialize_modules(cache.path()).unwrap();
    let options = ReplOptions {
        python: PathBuf::from("/nonexistent/python-for-shm-render"),
        server_script: module_dir.join(REPL_SERVER_FILE),
        python_path: vec![],
        command_timeout: None,
        close_grace: Duration::from_millis(100),
    };
    assert!(matches!(ReplChannel::spawn(&options), Err(RenderError::Provisioning(_))));
}

#[test]
fn test_materialize_is_reused() {
    let cache = tempfile::tempdir().unwrap();
    let first = materialize_modules(cache.path()).unwrap();
    let second = materialize_modules(cache.path()).unwrap();
    assert_eq!(first, second);
    assert!(first.join(REPL_SERVER_FILE).is_file());
    assert!(first.join("shadertoyinterop.py").is_file());

    // A damaged file is rewritten.
    std::fs::write(first.join(REPL_SERVER_FILE), "broken").unwrap();
    let third = materialize_modules(cache.path()).unwrap();
    assert_eq!(third, first);
    let restored = std::fs::read_to_string(third.join(REPL_SERVER_FILE)).unwrap();
    assert!(restored.contains("def serve"));
}

#[test]
#[serial]
fn test_diagnostic_output_keeps_flowing() {
    if !python_available() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let mut channel = spawn(&cache, Some(Duration::from_secs(20)));
    channel.execute_checked("import os, sys").unwrap();

    // Bytes that are not UTF-8 must not stop the log forwarding.
    let response = channel
        .execute("os.write(2, b'\\xff\\xfe bad bytes\\n'); os.write(1, b'\\xc3(\\n')", true)
        .unwrap();
    assert!(!response.starts_with("Traceback"), "got {:?}", response);

    // Well past one pipe buffer per stream, spread over several commands.
    for round in 0..4 {
        let stderr = channel
            .execute("os.write(2, (b'x' * 1023 + b'\\n') * 96) and None", true)
            .unwrap();
        assert_eq!(stderr, "", "stderr round {} failed", round);
        let stdout = channel
            .execute("for _ in range(2048): print('y' * 63)", false)
            .unwrap();
        assert_eq!(stdout, "", "stdout round {} failed", round);
        channel
            .execute_checked("os.write(2, b'\\x80\\x81 ' * 4096 + b'\\n') and None")
            .unwrap();
    }

    channel.execute_checked("print('after', file=sys.stderr)").unwrap();
    assert_eq!(channel.execute_checked("40 + 2").unwrap(), "42");
    assert!(channel.is_alive());
    channel.close().unwrap();
}

#[test]
#[serial]
fn test_separator_in_output_is_escaped() {
    if !python_available() {
        return;
    }
    let cache = tempfile::tempdir().unwrap();
    let mut channel = spawn(&cache, Some(Duration::from_secs(20)));

    let response = channel.execute("print('\\x1eEND'); print('tail')", true).unwrap();
    assert_eq!(response, "\\x1eEND\ntail");

    // The next response belongs to the next command.
    assert_eq!(channel.execute_checked("40 + 2").unwrap(), "42");

    // Same for text that only shows up in a traceback.
    let err = channel.execute_checked("raise ValueError('\\x1eEND')").unwrap_err();
    assert!(matches!(err, RenderError::Remote { .. }));
    assert_eq!(channel.execute_checked("'ok'").unwrap(), "'ok'");

    // Output the response stream cannot encode comes back escaped.
    assert_eq!(channel.execute_checked("print('\\ud800')").unwrap(), "\\ud800");
    channel.close().unwrap();
}
