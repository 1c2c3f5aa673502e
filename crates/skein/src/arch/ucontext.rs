use {
    super::{Suspender, Switch},
    crate::{
        fiber::{trampoline, Core, Entry},
        stack::Stack,
    },
    libc::ucontext_t,
    std::{io, mem, ptr::NonNull},
    tracing::error,
};

/// Context pair backed by glibc `ucontext_t` records.
pub(crate) struct Ucontext<'a> {
    pair: Pair,
    launch: NonNull<Launch<'a>>,
    stack: Stack,
}

/// The fiber's own context and its continuation. Both are heap records owned by [`Ucontext`].
#[derive(Clone, Copy)]
pub(crate) struct Pair {
    own: NonNull<ucontext_t>,
    continuation: NonNull<ucontext_t>,
}

/// Everything `start` needs, reachable through the single pointer `makecontext` can pass.
struct Launch<'a> {
    core: NonNull<Core>,
    pair: Pair,
    entry: Option<Entry<'a>>,
}

impl<'a> Switch<'a> for Ucontext<'a> {
    type Suspender = Pair;

    fn new(stack: Stack, core: NonNull<Core>, entry: Entry<'a>) -> io::Result<Self> {
        let pair = Pair {
            own: zeroed_context(),
            continuation: zeroed_context(),
        };
        let launch = NonNull::from(Box::leak(Box::new(Launch {
            core,
            pair,
            entry: Some(entry),
        })));
        // Assembled first so that every early return below frees what was allocated.
        let this = Ucontext {
            pair,
            launch,
            stack,
        };

        // SAFETY: `own` is a live record that nothing else refers to yet.
        let result = unsafe { libc::getcontext(pair.own.as_ptr()) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: As above. The stack outlives the context since both belong to `this`, and
        // `start` is only ever called by makecontext's trampoline with the two arguments given.
        unsafe {
            let own = &mut *pair.own.as_ptr();
            own.uc_stack.ss_sp = this.stack.limit() as *mut libc::c_void;
            own.uc_stack.ss_size = this.stack.len();
            own.uc_stack.ss_flags = 0;
            own.uc_link = pair.continuation.as_ptr();

            let addr = launch.as_ptr() as usize as u64;
            let start = mem::transmute::<extern "C" fn(u32, u32), extern "C" fn()>(start);
            libc::makecontext(pair.own.as_ptr(), start, 2, (addr >> 32) as u32, addr as u32);
        }
        Ok(this)
    }

    unsafe fn switch_in(&mut self) -> io::Result<()> {
        swap(self.pair.continuation, self.pair.own)
    }

    unsafe fn switch_out(pair: Pair) -> io::Result<()> {
        swap(pair.own, pair.continuation)
    }
}

impl Drop for Ucontext<'_> {
    fn drop(&mut self) {
        // SAFETY: All three were leaked from boxes in `new` and are reclaimed only here. Dropping
        // the launch record drops the entry function if the fiber never started.
        unsafe {
            drop(Box::from_raw(self.launch.as_ptr()));
            drop(Box::from_raw(self.pair.own.as_ptr()));
            drop(Box::from_raw(self.pair.continuation.as_ptr()));
        }
    }
}

fn zeroed_context() -> NonNull<ucontext_t> {
    // SAFETY: ucontext_t is plain data; all zeroes is a valid (if meaningless) value.
    let context: ucontext_t = unsafe { mem::zeroed() };
    NonNull::from(Box::leak(Box::new(context)))
}

/// Saves the running context into `save` and resumes `load`.
unsafe fn swap(save: NonNull<ucontext_t>, load: NonNull<ucontext_t>) -> io::Result<()> {
    // SAFETY: Both records belong to a live `Ucontext`; the caller guarantees `load` is
    // resumable.
    let result = unsafe { libc::swapcontext(save.as_ptr(), load.as_ptr()) };
    if result == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// First frame on a fresh fiber stack. The launch record address arrives split in two halves
/// because makecontext only forwards `int`-sized arguments.
extern "C" fn start(hi: u32, lo: u32) {
    let addr = ((u64::from(hi) << 32) | u64::from(lo)) as usize;
    // SAFETY: `addr` is the launch record made by `Ucontext::new`, which lives as long as the
    // context that is running this function.
    let (core, pair, entry) = unsafe {
        let launch = &mut *(addr as *mut Launch<'_>);
        (launch.core, launch.pair, launch.entry.take())
    };

    if let Some(entry) = entry {
        // SAFETY: The core outlives every activation of the fiber.
        trampoline(unsafe { core.as_ref() }, Suspender::Ucontext(pair), entry);
    }

    // The resumer observes the finished flag and frees this stack without switching back, so
    // the switch below never returns.
    // SAFETY: Running on the fiber's own stack, inside an activation.
    if let Err(e) = unsafe { Ucontext::switch_out(pair) } {
        error!(error = %e, "final switch out of fiber failed");
    }
    std::process::abort();
}

