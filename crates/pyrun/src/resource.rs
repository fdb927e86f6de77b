use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception_private::{ExcType, ExceptionRaise, RunError, SimpleException};

/// Recommended maximum recursion depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Results estimated above this many bytes are checked with
/// [`ResourceTracker::check_large_result`] before they are built.
pub const LARGE_RESULT_THRESHOLD: usize = 100_000;

/// Error returned when an execution budget is exhausted.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// Maximum instruction count exceeded.
    Operation { limit: usize, count: usize },
    /// Maximum wall-clock time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum call depth exceeded.
    Recursion { limit: usize, depth: usize },
    /// A single result would exceed the memory budget.
    Memory { limit: usize, used: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation { limit, count } => write!(f, "operation limit exceeded: {count} > {limit}"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:?} > {limit:?}"),
            Self::Recursion { .. } => f.write_str("maximum recursion depth exceeded"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Maps the error onto the Python exception raised in its place:
    /// `Operation` and `Time` become `TimeoutError`, `Recursion` becomes `RecursionError`
    /// and `Memory` becomes `MemoryError`.
    fn into_exception(self) -> ExceptionRaise {
        let exc_type = match self {
            Self::Operation { .. } | Self::Time { .. } => ExcType::TimeoutError,
            Self::Recursion { .. } => ExcType::RecursionError,
            Self::Memory { .. } => ExcType::MemoryError,
        };
        SimpleException::new_msg(exc_type, self).into()
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        // A runaway recursion can be caught and recovered from; a spent budget cannot.
        if matches!(err, ResourceError::Recursion { .. }) {
            Self::Exc(Box::new(err.into_exception()))
        } else {
            Self::UncatchableExc(Box::new(err.into_exception()))
        }
    }
}

/// Budget checks consulted by the VM while it runs.
///
/// The VM is generic over the tracker, so [`NoLimitTracker`] compiles down to the
/// recursion check alone.
pub trait ResourceTracker: fmt::Debug {
    /// Called once per dispatched instruction.
    ///
    /// Returns `Ok(())` if within the configured budget, or a `ResourceError`
    /// (`Time` or `Operation`) once it is spent.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before a function frame is pushed.
    ///
    /// # Arguments
    /// * `current_depth` - Call stack depth before the new frame is pushed
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Called before building a result estimated above [`LARGE_RESULT_THRESHOLD`],
    /// such as `'ab' * n` or `range(n)`.
    ///
    /// # Arguments
    /// * `estimated_bytes` - Approximate size of the result in bytes
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError>;

    /// Number of instructions charged so far, if this tracker counts them.
    fn operation_count(&self) -> Option<usize> {
        None
    }
}

/// Tracker with no budget beyond [`DEFAULT_MAX_RECURSION_DEPTH`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_RECURSION_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_RECURSION_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn check_large_result(&self, _estimated_bytes: usize) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// Configuration for resource limits.
///
/// All limits are optional; `None` disables that limit. Build custom limits with the
/// builder methods.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of instructions executed.
    pub max_operations: Option<usize>,
    /// Maximum wall-clock execution time.
    pub max_duration: Option<Duration>,
    /// Maximum function call depth.
    pub max_recursion_depth: Option<usize>,
    /// Maximum size in bytes of any single result.
    pub max_memory: Option<usize>,
}

impl ResourceLimits {
    /// All limits disabled except the call depth, which is [`DEFAULT_MAX_RECURSION_DEPTH`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }
}

/// A resource tracker that enforces configurable limits.
///
/// The clock starts when the tracker is created, so create it immediately before
/// running.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    operation_count: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            operation_count: 0,
        }
    }

    /// Returns the elapsed time since tracker creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    #[must_use]
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

impl ResourceTracker for LimitedTracker {
    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_operations {
            self.operation_count += 1;
            if self.operation_count > max {
                return Err(ResourceError::Operation {
                    limit: max,
                    count: self.operation_count,
                });
            }
        }

        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_recursion_depth
            && current_depth >= max
        {
            return Err(ResourceError::Recursion {
                limit: max,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_memory
            && estimated_bytes > max
        {
            return Err(ResourceError::Memory {
                limit: max,
                used: estimated_bytes,
            });
        }
        Ok(())
    }

    fn operation_count(&self) -> Option<usize> {
        self.limits.max_operations.map(|_| self.operation_count)
    }
}
