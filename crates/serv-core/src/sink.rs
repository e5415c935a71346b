//! Line-oriented output sinks.
//!
//! Text loggers (server lifecycle events, access logs) format one line per
//! event and hand it to a [`LineWriter`]. The default sink forwards lines to
//! `tracing`; [`IoWriter`] writes them to any [`std::io::Write`].

use std::fmt;
use std::io::Write;

use parking_lot::Mutex;

/// Receives formatted log lines.
pub trait LineWriter: Send + Sync {
    /// Writes a single line. `line` does not end with a newline.
    fn write_line(&self, line: &str);
}

/// Forwards lines to `tracing` as info events on a fixed target.
#[derive(Debug, Clone, Copy)]
pub struct TracingWriter {
    target: Target,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Server,
    Access,
}

impl TracingWriter {
    /// A sink for server lifecycle events (target `serv::server`).
    pub const fn server() -> Self {
        Self {
            target: Target::Server,
        }
    }

    /// A sink for access log lines (target `serv::access`).
    pub const fn access() -> Self {
        Self {
            target: Target::Access,
        }
    }
}

impl LineWriter for TracingWriter {
    fn write_line(&self, line: &str) {
        // tracing targets must be constants
        match self.target {
            Target::Server => tracing::info!(target: "serv::server", "{line}"),
            Target::Access => tracing::info!(target: "serv::access", "{line}"),
        }
    }
}

/// Writes lines to an [`std::io::Write`], one `write_all` per line.
pub struct IoWriter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl IoWriter {
    /// Creates a sink writing to `out`.
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    /// Creates a sink writing to standard error.
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl fmt::Debug for IoWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoWriter").finish_non_exhaustive()
    }
}

impl LineWriter for IoWriter {
    fn write_line(&self, line: &str) {
        let mut out = self.out.lock();
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        if let Err(err) = out.write_all(buf.as_bytes()) {
            tracing::warn!(error = %err, "failed to write log line");
        }
    }
}

/// Collects lines in memory. Useful for tests and for buffering output.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    lines: Mutex<Vec<String>>,
}

impl MemoryWriter {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all lines written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl LineWriter for MemoryWriter {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_io_writer_appends_newline() {
        let buf = Shared::default();
        let sink = IoWriter::new(buf.clone());
        sink.write_line("first");
        sink.write_line("second");

        let written = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(written, "first\nsecond\n");
    }

    #[test]
    fn test_memory_writer() {
        let sink = MemoryWriter::new();
        sink.write_line("hello");
        assert_eq!(sink.lines(), vec!["hello".to_string()]);
    }
}
