//! Per-thread bookkeeping for fibers.
//!
//! A thread has to be enabled before it can host fibers. Enabling records the thread's own stack
//! as the root execution context, after which the thread tracks which fiber (if any) is
//! executing so that resume and yield can refuse calls made from the wrong place. Enabling
//! happens automatically on first use and is idempotent.

use {
    skein_core::FiberId,
    std::cell::Cell,
    tracing::debug,
};

struct ThreadState {
    enabled: Cell<bool>,
    current: Cell<Option<FiberId>>,
}

thread_local! {
    static THREAD: ThreadState = const {
        ThreadState {
            enabled: Cell::new(false),
            current: Cell::new(None),
        }
    };
}

/// Enables the current thread to host fibers.
///
/// Returns `true` if this call did the work, or `false` if the thread was already enabled.
/// [`Fiber`](crate::Fiber) calls this itself, so calling it explicitly is only useful to control
/// when the one-time cost (and its log line) happens.
pub fn enable_current_thread() -> bool {
    THREAD.with(|thread| {
        if thread.enabled.replace(true) {
            return false;
        }
        let current = std::thread::current();
        debug!(thread = current.name().unwrap_or("<unnamed>"), "thread enabled for fibers");
        true
    })
}

/// Whether [`enable_current_thread`] has run on this thread.
pub fn is_current_thread_enabled() -> bool {
    THREAD.with(|thread| thread.enabled.get())
}

/// The fiber executing on this thread, or `None` on the thread's own stack.
pub fn current() -> Option<FiberId> {
    THREAD.with(|thread| thread.current.get())
}

/// Marks `id` as the executing fiber until the guard drops, which restores the previous one.
pub(crate) fn enter(id: FiberId) -> Active {
    let previous = THREAD.with(|thread| thread.current.replace(Some(id)));
    Active { previous }
}

pub(crate) struct Active {
    previous: Option<FiberId>,
}

impl Drop for Active {
    fn drop(&mut self) {
        THREAD.with(|thread| thread.current.set(self.previous));
    }
}
