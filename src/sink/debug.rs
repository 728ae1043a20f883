use crate::event::EventRecord;
use crate::sink::{Sink, render_text};
use std::io::Write;
use std::sync::Mutex;

/// Mirrors events to the local debug stream (stderr).
///
/// Fire-and-forget: write errors are swallowed and `emit` always succeeds. By default the sink
/// is only active in debug builds, like a debugger output window.
pub struct DebugSink {
    writer: Option<Mutex<Box<dyn Write + Send>>>,
}

impl DebugSink {
    pub fn new() -> Self {
        if cfg!(debug_assertions) {
            Self::with_writer(std::io::stderr())
        } else {
            DebugSink { writer: None }
        }
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        DebugSink {
            writer: Some(Mutex::new(Box::new(writer))),
        }
    }

    pub fn is_active(&self) -> bool {
        self.writer.is_some()
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for DebugSink {
    fn name(&self) -> &str {
        "debug"
    }

    fn emit(&self, record: &EventRecord) -> anyhow::Result<()> {
        if let Some(writer) = &self.writer {
            let line = render_text(record);
            let mut writer = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = writeln!(writer, "{}", line);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("no debugger attached"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("no debugger attached"))
        }
    }

    #[test]
    fn never_fails_the_caller() {
        let sink = DebugSink::with_writer(FailingWriter);
        assert!(sink.emit(&EventRecord::new(Level::Information, "hello")).is_ok());
    }

    #[test]
    fn inactive_sink_accepts_everything() {
        let sink = DebugSink { writer: None };
        assert!(!sink.is_active());
        assert!(sink.emit(&EventRecord::new(Level::Fatal, "ignored")).is_ok());
    }
}
