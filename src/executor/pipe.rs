//! Streams child process output into the log, line by line.

use std::io::{BufRead, BufReader, Read};

/// Output stream of a child process.
#[derive(Clone, Copy, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(super) enum StreamType {
    Stdout,
    Stderr,
}

/// Extracts a human-readable message from a thread panic.
pub(super) fn panic_message(err: &(dyn std::any::Any + Send)) -> &str {
    err.downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Reads from a pipe and logs each line as it arrives.
///
/// - stdout is logged at INFO level, stderr at WARN level, so apt-get and
///   curl progress is visible while a step is being applied.
/// - Binary data uses lossy UTF-8 conversion; apt's `\r` progress redraws
///   are trimmed.
/// - I/O errors stop reading but don't fail the command; its exit status
///   decides success.
pub(super) fn read_pipe_to_log<R: Read>(pipe: Option<R>, stream_type: StreamType, command: String) {
    let Some(pipe) = pipe else {
        tracing::error!(
            stream = %stream_type,
            command = %command,
            "pipe was None (unexpected: Stdio::piped() was set), no output will be captured"
        );
        return;
    };

    let mut reader = BufReader::new(pipe);
    let mut line_buf = Vec::new();

    loop {
        line_buf.clear();
        match reader.read_until(b'\n', &mut line_buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = line_buf.strip_suffix(b"\n").unwrap_or(&line_buf);
                let text = String::from_utf8_lossy(line);
                let trimmed = text.trim_end_matches('\r');
                if trimmed.is_empty() {
                    continue;
                }
                match stream_type {
                    StreamType::Stdout => tracing::info!(command = %command, "{}", trimmed),
                    StreamType::Stderr => tracing::warn!(command = %command, "{}", trimmed),
                }
            }
            Err(e) => {
                tracing::error!(stream = %stream_type, error = %e, "I/O error, stopping read");
                break;
            }
        }
    }
}
