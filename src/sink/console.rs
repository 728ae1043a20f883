//! Console output for events.
//!
//! Without `pretty_logs`, output is plain text suitable for log aggregation:
//! ```text
//! [14:32:01 INF] "GET" "/home/index" responded 200 in 12.3000 ms {MachineName="web-01"}
//! ```
//!
//! With `pretty_logs`, the timestamp is dimmed and the level is colorized.

use crate::event::EventRecord;
use crate::sink::Sink;
use anyhow::Context;
use std::io::Write;
use std::sync::Mutex;

/// Writes one formatted line per event to stdout (or any other writer).
pub struct ConsoleSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::with_writer(std::io::stdout())
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        ConsoleSink {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn emit(&self, record: &EventRecord) -> anyhow::Result<()> {
        let line = format_line(record);
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        writeln!(writer, "{}", line).context("Failed to write to the console")?;
        writer.flush().context("Failed to flush the console")
    }
}

#[cfg(not(feature = "pretty_logs"))]
fn format_line(record: &EventRecord) -> String {
    crate::sink::render_text(record)
}

#[cfg(feature = "pretty_logs")]
fn format_line(record: &EventRecord) -> String {
    use crate::event::Level;
    use nu_ansi_term::{Color, Style};

    let level_style = match record.level {
        Level::Verbose => Style::new().fg(Color::Purple),
        Level::Debug => Style::new().fg(Color::Blue),
        Level::Information => Style::new().fg(Color::Green),
        Level::Warning => Style::new().fg(Color::Yellow),
        Level::Error | Level::Fatal => Style::new().fg(Color::Red),
    };

    let mut line = format!(
        "{} {} ",
        Style::new()
            .dimmed()
            .paint(record.timestamp.with_timezone(&chrono::Local).format("%T%.3f").to_string()),
        level_style.paint(record.level.abbreviation()),
    );
    crate::sink::render_body(&mut line, record);
    line
}
