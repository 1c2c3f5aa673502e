//! Execution-context back-ends.
//!
//! Every back-end offers the same two moves: switch *in* to a fiber, saving the caller as the
//! continuation, and switch *out* of a fiber back to that continuation. The fiber state machine
//! is written against [`Switch`] alone and never learns which back-end it is driving.

use {
    crate::{
        fiber::{Core, Entry},
        stack::Stack,
    },
    std::{
        fmt::{self, Display, Formatter},
        io,
        ptr::NonNull,
    },
};

#[cfg(feature = "corosensei")]
mod coro;
#[cfg(skein_ucontext)]
mod ucontext;

#[cfg(not(any(feature = "corosensei", skein_ucontext)))]
compile_error!(
    "skein needs a context-switch back-end: enable the `corosensei` feature, or the `ucontext` \
     feature on x86_64 Linux with glibc"
);

/// A way of moving execution between a fiber's stack and the stack that resumed it.
pub(crate) trait Switch<'a>: Sized {
    /// What the fiber side needs to switch out. Holds no borrow of the fiber's entry function,
    /// so that the core record can keep it without a lifetime.
    type Suspender: Copy;

    /// Prepares a context on `stack` whose first switch in calls
    /// [`trampoline`](crate::fiber::trampoline) with `core` and `entry`.
    fn new(stack: Stack, core: NonNull<Core>, entry: Entry<'a>) -> io::Result<Self>;

    /// Saves the current context as the continuation, then enters the fiber. Returns once the
    /// fiber switches out.
    ///
    /// # Safety
    ///
    /// No other switch into this context may be in flight, and the fiber must not have made its
    /// final switch out.
    unsafe fn switch_in(&mut self) -> io::Result<()>;

    /// Saves the fiber's context, then returns to the continuation. Returns once the fiber is
    /// switched into again.
    ///
    /// # Safety
    ///
    /// Must run on the fiber's own stack, inside an activation started by `switch_in`.
    unsafe fn switch_out(suspender: Self::Suspender) -> io::Result<()>;
}

/// Selects the mechanism used to switch between a fiber and its caller.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Backend {
    /// Hand-written assembly from the `corosensei` crate.
    #[cfg(feature = "corosensei")]
    Corosensei,
    /// glibc `getcontext`/`makecontext`/`swapcontext`. Also saves and restores the signal mask
    /// on every switch, which makes it noticeably slower.
    #[cfg(skein_ucontext)]
    Ucontext,
}

const AVAILABLE: &[Backend] = &[
    #[cfg(feature = "corosensei")]
    Backend::Corosensei,
    #[cfg(skein_ucontext)]
    Backend::Ucontext,
];

impl Backend {
    /// Every back-end compiled into this build, preferred first.
    pub fn available() -> &'static [Backend] {
        AVAILABLE
    }
}

impl Default for Backend {
    fn default() -> Self {
        AVAILABLE[0]
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            #[cfg(feature = "corosensei")]
            Backend::Corosensei => f.write_str("corosensei"),
            #[cfg(skein_ucontext)]
            Backend::Ucontext => f.write_str("ucontext"),
        }
    }
}

/// The owner side of a fiber's context pair, for whichever back-end was selected.
pub(crate) enum Context<'a> {
    #[cfg(feature = "corosensei")]
    Corosensei(coro::Coro<'a>),
    #[cfg(skein_ucontext)]
    Ucontext(ucontext::Ucontext<'a>),
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        backend: Backend,
        stack: Stack,
        core: NonNull<Core>,
        entry: Entry<'a>,
    ) -> io::Result<Self> {
        match backend {
            #[cfg(feature = "corosensei")]
            Backend::Corosensei => coro::Coro::new(stack, core, entry).map(Context::Corosensei),
            #[cfg(skein_ucontext)]
            Backend::Ucontext => {
                ucontext::Ucontext::new(stack, core, entry).map(Context::Ucontext)
            }
        }
    }

    /// # Safety
    ///
    /// See [`Switch::switch_in`].
    pub(crate) unsafe fn switch_in(&mut self) -> io::Result<()> {
        match self {
            #[cfg(feature = "corosensei")]
            Context::Corosensei(context) => context.switch_in(),
            #[cfg(skein_ucontext)]
            Context::Ucontext(context) => context.switch_in(),
        }
    }
}

/// The fiber side of a fiber's context pair. Installed by the trampoline on first entry.
#[derive(Clone, Copy)]
pub(crate) enum Suspender {
    #[cfg(feature = "corosensei")]
    Corosensei(coro::YielderRef),
    #[cfg(skein_ucontext)]
    Ucontext(ucontext::Pair),
}

impl Suspender {
    /// # Safety
    ///
    /// See [`Switch::switch_out`].
    pub(crate) unsafe fn switch_out(self) -> io::Result<()> {
        match self {
            #[cfg(feature = "corosensei")]
            Suspender::Corosensei(yielder) => coro::Coro::switch_out(yielder),
            #[cfg(skein_ucontext)]
            Suspender::Ucontext(pair) => ucontext::Ucontext::switch_out(pair),
        }
    }
}
