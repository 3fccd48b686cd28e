//! Fiber construction with optional attributes.

use crate::error::SpawnError;
use crate::fiber::{Fiber, FiberHandle};

/// Configures a fiber before it is created.
///
/// # Example
///
/// ```
/// use cofiber::FiberBuilder;
///
/// let fiber = FiberBuilder::new()
///     .name("worker")
///     .stack_size(512 * 1024)
///     .build(|| {})
///     .expect("fiber stack allocation");
/// cofiber::current().spawn(&fiber);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FiberBuilder {
    pub(crate) name: Option<String>,
    pub(crate) stack_size: Option<usize>,
}

impl FiberBuilder {
    /// Creates a builder with default attributes: unnamed, default
    /// execution stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the fiber. The name shows up in logs and thread listings.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the execution stack size in bytes.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Creates the fiber. The body does not run until the fiber is spawned
    /// on a scheduler.
    pub fn build<F>(self, body: F) -> Result<FiberHandle, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        Fiber::create(&self, Box::new(body))
    }
}
