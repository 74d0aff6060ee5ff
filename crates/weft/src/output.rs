use std::io::{self, Write as _};

use crate::error::{EngineResult, Error};

/// Trait for receiving rendered output.
///
/// Implement this trait to capture or redirect the rendered document. The
/// renderer calls [`write`](OutputSink::write) once per emitted fragment, in
/// render order: depth-first, left-to-right, with exactly the selected
/// branch of each conditional.
pub trait OutputSink {
    /// Called once for each emitted fragment.
    ///
    /// Fragments carry no added separators; concatenating them in call
    /// order yields the rendered document.
    fn write(&mut self, fragment: &str) -> EngineResult<()>;
}

/// Default `OutputSink` that writes to stdout.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write(&mut self, fragment: &str) -> EngineResult<()> {
        io::stdout()
            .write_all(fragment.as_bytes())
            .map_err(|err| Error::system(err.to_string()))
    }
}

/// An `OutputSink` that collects all output into a string.
///
/// Useful for testing or capturing rendered output programmatically.
#[derive(Debug, Default)]
pub struct CollectString(String);

impl CollectString {
    /// Creates a new empty `CollectString`.
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Returns the collected output as a string slice.
    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    /// Consumes the sink and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl OutputSink for CollectString {
    fn write(&mut self, fragment: &str) -> EngineResult<()> {
        self.0.push_str(fragment);
        Ok(())
    }
}

/// `OutputSink` that ignores all output.
///
/// Useful for suppressing output while exercising side effects such as
/// `set` directives.
#[derive(Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn write(&mut self, _fragment: &str) -> EngineResult<()> {
        Ok(())
    }
}
