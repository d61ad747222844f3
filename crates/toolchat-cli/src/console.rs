//! Terminal rendering of a streamed turn

use async_trait::async_trait;
use crossterm::style::Stylize;
use std::io::{self, Write};

use toolchat_core::ResponseHandler;

/// Prints model output as it arrives and errors to a separate sink.
///
/// One handler per turn: it remembers whether anything was printed so the
/// turn can be closed with a single newline.
pub struct ConsoleHandler<O, E> {
    out: O,
    err: E,
    printed: bool,
}

impl ConsoleHandler<io::Stdout, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> ConsoleHandler<O, E> {
    pub const fn new(out: O, err: E) -> Self {
        Self {
            out,
            err,
            printed: false,
        }
    }

    /// Print the assistant label
    pub fn begin(&mut self) -> io::Result<()> {
        writeln!(self.out, "\n{}", "Assistant:".green().bold())?;
        self.out.flush()
    }

    /// Terminate the turn's output
    pub fn finish(&mut self) -> io::Result<()> {
        if self.printed {
            writeln!(self.out)?;
        }
        self.out.flush()
    }

    #[cfg(test)]
    fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}

#[async_trait]
impl<O, E> ResponseHandler for ConsoleHandler<O, E>
where
    O: Write + Send,
    E: Write + Send,
{
    async fn on_text_chunk(&mut self, text: &str) {
        self.printed = true;
        if write!(self.out, "{text}").and_then(|()| self.out.flush()).is_err() {
            tracing::debug!("stdout closed");
        }
    }

    async fn on_error(&mut self, message: &str) {
        if writeln!(self.err, "\n{} {message}", "Error:".red().bold()).is_err() {
            tracing::debug!("stderr closed");
        }
    }

    async fn on_tool_event(&mut self, event: &str) {
        let prefix = if self.printed { "\n" } else { "" };
        let line = format!("Tool: {event}");
        if writeln!(self.out, "{prefix}{}", line.dim()).is_err() {
            tracing::debug!("stdout closed");
        }
        self.printed = false;
    }
}
