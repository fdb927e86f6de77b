use crate::frame::Frame;

/// Lifecycle of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created by a call, body not yet entered.
    New,
    /// Body is currently executing.
    Running,
    /// Paused at a `YIELD_VALUE`.
    Suspended,
    /// Body returned or raised; every further advance raises `StopIteration`.
    Finished,
}

/// A suspended function activation.
///
/// The generator owns its frame while suspended. While running, the frame lives in the
/// VM's frame arena and `frame` is `None`.
#[derive(Debug)]
pub struct Generator {
    pub(crate) state: GeneratorState,
    pub(crate) frame: Option<Frame>,
    name: String,
}

impl Generator {
    pub(crate) fn new(name: String, frame: Frame) -> Self {
        Self {
            state: GeneratorState::New,
            frame: Some(frame),
            name,
        }
    }

    #[must_use]
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}
