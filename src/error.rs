//! Error types.
//!
//! Timeouts and contention are not errors in this crate; they surface as
//! boolean results. The only recoverable failure is resource exhaustion
//! while creating a fiber, reported synchronously to the spawner.

use std::io;
use thiserror::Error;

/// Errors that can occur when creating a fiber.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The execution stack backing the fiber could not be allocated.
    #[error("failed to allocate fiber execution stack: {source}")]
    Stack {
        /// The underlying allocation failure.
        #[from]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    #[test]
    fn spawn_error_preserves_source() {
        init_test_logging();
        crate::test_phase!("spawn_error_preserves_source");
        let err = SpawnError::from(io::Error::new(io::ErrorKind::OutOfMemory, "no stack"));
        let text = err.to_string();
        crate::assert_with_log!(
            text.contains("no stack"),
            "source message retained",
            true,
            text.contains("no stack")
        );
        crate::test_complete!("spawn_error_preserves_source");
    }
}
