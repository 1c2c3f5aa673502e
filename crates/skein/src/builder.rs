use crate::{
    arch::Backend,
    error::Error,
    fiber::{Fiber, FiberHandle},
    stack::DEFAULT_STACK_SIZE,
};

/// Configuration for a new [`Fiber`].
///
/// ```
/// use skein::{Backend, FiberBuilder};
///
/// let fiber = FiberBuilder::new()
///     .name("parser")
///     .stack_size(64 * 1024)
///     .backend(Backend::default())
///     .spawn(|f| f.yield_now())?;
/// assert_eq!(fiber.name(), Some("parser"));
/// assert!(fiber.stack_size() >= 64 * 1024);
/// # Ok::<(), skein::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct FiberBuilder {
    pub(crate) name: Option<String>,
    pub(crate) stack_size: usize,
    pub(crate) backend: Backend,
}

impl Default for FiberBuilder {
    fn default() -> Self {
        FiberBuilder {
            name: None,
            stack_size: DEFAULT_STACK_SIZE,
            backend: Backend::default(),
        }
    }
}

impl FiberBuilder {
    pub fn new() -> Self {
        FiberBuilder::default()
    }

    /// Name recorded on the fiber's `tracing` span and returned by [`Fiber::name`].
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Usable stack size in bytes. Rounded up to whole pages and to at least
    /// [`MIN_STACK_SIZE`](crate::MIN_STACK_SIZE).
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Allocates the fiber. The entry function does not run until the first
    /// [`Fiber::resume`].
    ///
    /// # Errors
    ///
    /// [`Error::StackAllocation`] if the stack cannot be mapped.
    pub fn spawn<'a>(self, entry: impl FnOnce(&FiberHandle<'_>) + 'a) -> Result<Fiber<'a>, Error> {
        Fiber::from_builder(self, Box::new(entry))
    }
}
