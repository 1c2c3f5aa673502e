use {skein_core::FiberId, std::io, thiserror::Error};

/// Errors reported by [`Fiber`](crate::Fiber) operations.
///
/// Apart from [`Error::StackAllocation`], every variant describes a call that was declined
/// before any context switch took place, so the fiber is left exactly as it was.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Unable to allocate fiber stack: {0}")]
    StackAllocation(#[source] io::Error),

    #[error("Unable to set up or switch execution context: {0}")]
    Switch(#[source] io::Error),

    #[error("{0} has been torn down and can no longer be resumed")]
    Finished(FiberId),

    #[error("{0} is already running")]
    Reentrant(FiberId),

    #[error("{fiber} must be resumed from {}, not from {}", describe(.expected), describe(.current))]
    WrongCaller {
        fiber: FiberId,
        expected: Option<FiberId>,
        current: Option<FiberId>,
    },

    #[error("{fiber} can only yield from its own body (currently executing: {})", describe(.current))]
    NotRunning {
        fiber: FiberId,
        current: Option<FiberId>,
    },

    #[error("{0} is suspended mid-body and cannot be cleared")]
    Suspended(FiberId),
}

/// Names an execution context: a fiber, or the thread's own stack.
pub(crate) fn describe(context: &Option<FiberId>) -> String {
    match context {
        Some(id) => id.to_string(),
        None => "the thread root".to_string(),
    }
}
