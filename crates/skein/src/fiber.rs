use {
    crate::{
        arch::{Backend, Context, Suspender},
        error::Error,
        stack::Stack,
        thread, FiberBuilder,
    },
    skein_core::{FiberId, FiberState},
    std::{
        cell::{Cell, UnsafeCell},
        fmt::{self, Debug, Formatter},
        mem,
        panic::{self, AssertUnwindSafe},
        ptr::{self, NonNull},
        sync::atomic::{AtomicU64, Ordering},
    },
    tracing::{debug, error, span, trace, warn, Level, Span},
};

/// The boxed entry function of a fiber.
pub(crate) type Entry<'a> = Box<dyn FnOnce(&FiberHandle<'_>) + 'a>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Bookkeeping shared by the owning [`Fiber`] and the code running inside it.
///
/// Lives in its own heap allocation so that its address survives moves of the `Fiber`.
pub(crate) struct Core {
    id: FiberId,
    name: Option<String>,
    /// The context that created the fiber, and the only one allowed to resume it.
    caller: Option<FiberId>,
    state: Cell<FiberState>,
    finished: Cell<bool>,
    panicked: Cell<bool>,
    userdata: Cell<*mut ()>,
    suspender: Cell<Option<Suspender>>,
    span: Span,
}

impl Core {
    fn try_yield(&self) -> Result<(), Error> {
        let current = thread::current();
        let suspender = match self.suspender.get() {
            Some(suspender) if current == Some(self.id) => suspender,
            _ => {
                let err = Error::NotRunning {
                    fiber: self.id,
                    current,
                };
                error!(%err, "yield rejected");
                return Err(err);
            }
        };

        self.state.set(FiberState::Suspended);
        trace!("yield");
        // SAFETY: This fiber is the one executing, so we are on its stack inside an activation.
        if let Err(e) = unsafe { suspender.switch_out() } {
            self.state.set(FiberState::Running);
            error!(error = %e, "switch out of fiber failed");
            return Err(Error::Switch(e));
        }
        Ok(())
    }
}

/// Runs on the fiber's own stack, exactly once, when it is first switched into.
///
/// Calls the entry function, then marks the fiber finished. The caller performs the final switch
/// out afterwards; everything this function owned has been dropped by then.
pub(crate) fn trampoline(core: &Core, suspender: Suspender, entry: Entry<'_>) {
    core.suspender.set(Some(suspender));
    debug!("fiber started");

    let handle = FiberHandle { core };
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| entry(&handle))) {
        core.panicked.set(true);
        let msg = "Fiber exited due to panic.";
        if let Some(panic) = panic.downcast_ref::<&'static str>() {
            error!(panic, msg);
        } else if let Some(panic) = panic.downcast_ref::<String>() {
            error!(panic, msg);
        } else {
            error!(msg);
        }
    }

    core.finished.set(true);
    core.state.set(FiberState::Completed);
    debug!("fiber completed");
}

/// A stackful coroutine: a function with its own call stack that can pause itself with
/// [`FiberHandle::yield_now`] and be continued with [`Fiber::resume`].
///
/// Exactly one of the fiber and the context that resumed it runs at any moment; `resume` blocks
/// until the fiber yields or returns. Once the entry function has returned, the resume that
/// observed it releases the stack and the fiber is inert.
///
/// A fiber may only be resumed from the context that created it: the thread's own stack, or the
/// body of another fiber. Calls that break this rule are refused with an [`Error`] and a
/// `tracing` error event, and no switch takes place.
///
/// Dropping a fiber that is suspended mid-body leaks its stack: values living on that stack are
/// never dropped and the memory is never reused.
///
/// # Example
///
/// ```
/// use {skein::Fiber, std::cell::Cell};
///
/// let progress = Cell::new(0);
/// let fiber = Fiber::new(|f| {
///     for i in 1..=3 {
///         progress.set(i);
///         f.yield_now();
///     }
/// })?;
///
/// assert!(fiber.resume());
/// assert_eq!(progress.get(), 1);
/// assert!(fiber.resume());
/// assert!(fiber.resume());
/// assert_eq!(progress.get(), 3);
/// assert!(!fiber.is_finished());
///
/// assert!(fiber.resume());
/// assert!(fiber.is_finished());
/// assert!(!fiber.resume());
/// # Ok::<(), skein::Error>(())
/// ```
pub struct Fiber<'a> {
    core: NonNull<Core>,
    /// `None` once torn down.
    context: UnsafeCell<Option<Context<'a>>>,
    backend: Backend,
    stack_size: usize,
}

impl<'a> Fiber<'a> {
    /// Creates a fiber with default settings. The entry function does not run until the first
    /// [`resume`](Self::resume).
    pub fn new(entry: impl FnOnce(&FiberHandle<'_>) + 'a) -> Result<Self, Error> {
        FiberBuilder::new().spawn(entry)
    }

    /// Starts configuring a fiber.
    pub fn builder() -> FiberBuilder {
        FiberBuilder::new()
    }

    pub(crate) fn from_builder(builder: FiberBuilder, entry: Entry<'a>) -> Result<Self, Error> {
        thread::enable_current_thread();

        let id = FiberId::from(NEXT_ID.fetch_add(1, Ordering::Relaxed));
        let span = span!(Level::TRACE, "fiber", %id, name = builder.name.as_deref());
        let _enter = span.enter();

        let stack = Stack::new(builder.stack_size).map_err(|e| {
            error!(error = %e, bytes = builder.stack_size, "stack allocation failed");
            Error::StackAllocation(e)
        })?;
        let stack_size = stack.len();

        let core = NonNull::from(Box::leak(Box::new(Core {
            id,
            name: builder.name,
            caller: thread::current(),
            state: Cell::new(FiberState::Created),
            finished: Cell::new(false),
            panicked: Cell::new(false),
            userdata: Cell::new(ptr::null_mut()),
            suspender: Cell::new(None),
            span: span.clone(),
        })));
        // From here on, dropping `fiber` releases whatever has been set up.
        let mut fiber = Fiber {
            core,
            context: UnsafeCell::new(None),
            backend: builder.backend,
            stack_size,
        };

        let context = Context::new(builder.backend, stack, core, entry).map_err(|e| {
            error!(error = %e, "context initialization failed");
            Error::Switch(e)
        })?;
        *fiber.context.get_mut() = Some(context);

        debug!(stack = stack_size, backend = %builder.backend, "fiber created");
        Ok(fiber)
    }

    fn core(&self) -> &Core {
        // SAFETY: The core is freed only when the fiber is dropped.
        unsafe { self.core.as_ref() }
    }

    /// Switches into the fiber and blocks until it yields or finishes.
    ///
    /// Returns `true` if a switch took place. Returns `false` without side effects if the fiber
    /// has been torn down, or if the call breaks the resume protocol (see [`try_resume`]).
    ///
    /// [`try_resume`]: Self::try_resume
    pub fn resume(&self) -> bool {
        self.try_resume().is_ok()
    }

    /// Like [`resume`](Self::resume), but says why a resume was refused. On success returns the
    /// state the fiber was left in: [`FiberState::Suspended`] or [`FiberState::Cleared`].
    ///
    /// # Errors
    ///
    /// - [`Error::Finished`] if the fiber has been torn down.
    /// - [`Error::Reentrant`] if the fiber is already running: the call comes from its own body,
    ///   or from a fiber that it is (transitively) resuming.
    /// - [`Error::WrongCaller`] if the executing context did not create the fiber.
    /// - [`Error::Switch`] if the platform refused the switch.
    pub fn try_resume(&self) -> Result<FiberState, Error> {
        thread::enable_current_thread();
        let core = self.core();
        let _enter = core.span.enter();

        match core.state.get() {
            FiberState::Created | FiberState::Suspended => {}
            FiberState::Cleared => {
                warn!("resume of a fiber that was already torn down");
                return Err(Error::Finished(core.id));
            }
            FiberState::Running | FiberState::Completed => {
                let err = Error::Reentrant(core.id);
                error!(%err, "resume rejected");
                return Err(err);
            }
        }

        let current = thread::current();
        if current != core.caller {
            let err = Error::WrongCaller {
                fiber: core.id,
                expected: core.caller,
                current,
            };
            error!(%err, "resume rejected");
            return Err(err);
        }

        // SAFETY: The fiber is neither running nor torn down, so no other switch into it is in
        // flight and nothing else touches the context until this one returns.
        let context = match unsafe { &mut *self.context.get() } {
            Some(context) => context,
            None => return Err(Error::Finished(core.id)),
        };

        let before = core.state.replace(FiberState::Running);
        trace!(from = %before, "resume");
        let switched = {
            let _active = thread::enter(core.id);
            // SAFETY: As above; a fiber that is not finished has not made its final switch.
            unsafe { context.switch_in() }
        };
        if let Err(e) = switched {
            core.state.set(before);
            error!(error = %e, "switch into fiber failed");
            return Err(Error::Switch(e));
        }

        if core.finished.get() {
            self.teardown();
        }
        Ok(core.state.get())
    }

    /// Releases the stack and context records. The fiber must not be running or suspended.
    fn teardown(&self) {
        let core = self.core();
        // SAFETY: Nothing is executing on the fiber's stack, and the only borrow of the context
        // (in `try_resume`) has ended.
        let context = unsafe { (*self.context.get()).take() };
        drop(context);
        core.suspender.set(None);
        core.state.set(FiberState::Cleared);
        debug!("fiber torn down");
    }

    /// Tears the fiber down without finishing it, when that is safe.
    ///
    /// A fiber that never started is cleared without running its entry function. Clearing a
    /// finished fiber does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::Suspended`] if the fiber is paused mid-body. Its stack may hold live values,
    ///   so it can only be released by resuming the fiber until it returns.
    /// - [`Error::Reentrant`] if called while the fiber is running.
    pub fn clear(&self) -> Result<(), Error> {
        let core = self.core();
        let _enter = core.span.enter();
        match core.state.get() {
            FiberState::Created => {
                self.teardown();
                Ok(())
            }
            FiberState::Completed | FiberState::Cleared => Ok(()),
            FiberState::Suspended => {
                let err = Error::Suspended(core.id);
                warn!(%err, "clear rejected");
                Err(err)
            }
            FiberState::Running => {
                let err = Error::Reentrant(core.id);
                error!(%err, "clear rejected");
                Err(err)
            }
        }
    }

    /// Yields from inside the fiber through its owning handle. See [`FiberHandle::yield_now`].
    pub fn yield_now(&self) {
        let _ = self.core().try_yield();
    }

    /// See [`FiberHandle::try_yield`].
    pub fn try_yield(&self) -> Result<(), Error> {
        self.core().try_yield()
    }

    /// Stores an opaque pointer for the entry function to pick up with
    /// [`FiberHandle::userdata`]. The fiber never dereferences it.
    pub fn set_userdata(&self, data: *mut ()) {
        self.core().userdata.set(data);
    }

    /// The pointer last passed to a `set_userdata`, or null.
    pub fn userdata(&self) -> *mut () {
        self.core().userdata.get()
    }

    /// Whether the entry function has returned. Stays `true` after teardown.
    pub fn is_finished(&self) -> bool {
        self.core().finished.get()
    }

    /// Whether the entry function panicked. The panic is caught at the fiber boundary and the
    /// fiber counts as finished.
    pub fn panicked(&self) -> bool {
        self.core().panicked.get()
    }

    pub fn state(&self) -> FiberState {
        self.core().state.get()
    }

    pub fn id(&self) -> FiberId {
        self.core().id
    }

    pub fn name(&self) -> Option<&str> {
        self.core().name.as_deref()
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Usable stack bytes, after rounding the requested size.
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }
}

impl Drop for Fiber<'_> {
    fn drop(&mut self) {
        let state = self.core().state.get();
        if let Some(context) = self.context.get_mut().take() {
            if state == FiberState::Suspended {
                let _enter = self.core().span.enter();
                warn!(
                    stack = self.stack_size,
                    "suspended fiber dropped; leaking its stack"
                );
                mem::forget(context);
            } else {
                drop(context);
            }
        }
        // SAFETY: Leaked from a box in `from_builder` and freed only here. A forgotten context
        // still points at the core, but can never be switched into again.
        unsafe { drop(Box::from_raw(self.core.as_ptr())) };
    }
}

impl Debug for Fiber<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let core = self.core();
        f.debug_struct("Fiber")
            .field("id", &core.id)
            .field("name", &core.name)
            .field("state", &core.state.get())
            .field("backend", &self.backend)
            .finish()
    }
}

/// The running fiber's view of itself, passed to its entry function.
pub struct FiberHandle<'f> {
    core: &'f Core,
}

impl FiberHandle<'_> {
    /// Pauses the fiber and returns control to whoever resumed it. Returns when the fiber is
    /// resumed again, with everything on its stack exactly as it was.
    ///
    /// A call from anywhere but this fiber's own body is refused and logged; use
    /// [`try_yield`](Self::try_yield) to observe the refusal.
    pub fn yield_now(&self) {
        let _ = self.core.try_yield();
    }

    /// Like [`yield_now`](Self::yield_now), but reports a refused yield.
    ///
    /// # Errors
    ///
    /// [`Error::NotRunning`] if this fiber is not the one executing, for instance when the handle
    /// was captured by a nested fiber.
    pub fn try_yield(&self) -> Result<(), Error> {
        self.core.try_yield()
    }

    /// The pointer last stored with [`Fiber::set_userdata`] or [`set_userdata`], or null.
    ///
    /// [`set_userdata`]: Self::set_userdata
    pub fn userdata(&self) -> *mut () {
        self.core.userdata.get()
    }

    pub fn set_userdata(&self, data: *mut ()) {
        self.core.userdata.set(data);
    }

    /// Always `false` while the entry function runs.
    pub fn is_finished(&self) -> bool {
        self.core.finished.get()
    }

    pub fn id(&self) -> FiberId {
        self.core.id
    }

    pub fn name(&self) -> Option<&str> {
        self.core.name.as_deref()
    }
}

impl Debug for FiberHandle<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .finish()
    }
}
