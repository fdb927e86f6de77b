use std::{
    borrow::Cow,
    io::{self, Write as _},
};

use crate::{exception_private::ExcType, exception_public::Exception};

/// Destination for the output of `print` statements and `PRINT_EXPR`.
///
/// `PRINT_ITEM` writes the `str()` of each item through [`stdout_write`] and the
/// separating spaces through [`stdout_push`]; `PRINT_NEWLINE` pushes `'\n'`. The VM
/// tracks the soft-space state itself, so implementations only append text.
///
/// [`stdout_write`]: PrintWriter::stdout_write
/// [`stdout_push`]: PrintWriter::stdout_push
pub trait PrintWriter {
    /// Appends formatted text for one printed item.
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception>;

    /// Appends a single separator or terminator character.
    fn stdout_push(&mut self, end: char) -> Result<(), Exception>;
}

impl<P: PrintWriter + ?Sized> PrintWriter for &mut P {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        (**self).stdout_write(output)
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        (**self).stdout_push(end)
    }
}

/// `PrintWriter` that writes to the process's stdout.
///
/// Output is flushed at every newline so program output interleaves sensibly with
/// tracer output on stderr.
#[derive(Debug, Default)]
pub struct StdPrint;

fn io_error(err: &io::Error) -> Exception {
    Exception::new(ExcType::RuntimeError, Some(format!("failed to write to stdout: {err}")))
}

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        io::stdout().lock().write_all(output.as_bytes()).map_err(|e| io_error(&e))
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        let mut stdout = io::stdout().lock();
        let mut buf = [0; 4];
        stdout
            .write_all(end.encode_utf8(&mut buf).as_bytes())
            .map_err(|e| io_error(&e))?;
        if end == '\n' {
            stdout.flush().map_err(|e| io_error(&e))?;
        }
        Ok(())
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing program output.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Returns the collected output.
    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) -> Result<(), Exception> {
        self.0.push_str(&output);
        Ok(())
    }

    fn stdout_push(&mut self, end: char) -> Result<(), Exception> {
        self.0.push(end);
        Ok(())
    }
}

/// `PrintWriter` that discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) -> Result<(), Exception> {
        Ok(())
    }

    fn stdout_push(&mut self, _end: char) -> Result<(), Exception> {
        Ok(())
    }
}
