//! Memory used as a fiber's private call stack.

use {
    std::{io, ptr::NonNull, sync::OnceLock},
    tracing::trace,
};

/// Stack size used when [`FiberBuilder::stack_size`](crate::FiberBuilder::stack_size) is not
/// called.
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Requests below this are rounded up to it.
///
/// A panic in the entry function runs the panic hook on the fiber's stack, and with
/// `RUST_BACKTRACE` set the hook symbolizes a backtrace there. That needs tens of kilobytes; with
/// less, the hook overflows into the guard page and takes the process down instead of the panic
/// being caught.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// An anonymous mapping with an inaccessible guard page at its low end.
///
/// Stacks grow downwards, so running off the end faults on the guard page instead of silently
/// overwriting whatever was mapped below.
pub(crate) struct Stack {
    mapping: NonNull<u8>,
    mapping_len: usize,
    guard_len: usize,
}

impl Stack {
    /// Map a stack with at least `size` usable bytes.
    ///
    /// The usable size is rounded up to whole pages, and never below [`MIN_STACK_SIZE`].
    pub(crate) fn new(size: usize) -> io::Result<Self> {
        let page = page_size();
        let usable = round_up(size.max(MIN_STACK_SIZE), page).ok_or_else(too_large)?;
        let mapping_len = usable.checked_add(page).ok_or_else(too_large)?;

        // SAFETY: An anonymous private mapping with no address hint aliases nothing.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let mapping = NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)?;

        // Constructed before mprotect so that a failure below still unmaps.
        let stack = Stack {
            mapping,
            mapping_len,
            guard_len: page,
        };

        // SAFETY: The guard page is the first page of the mapping created above.
        let result = unsafe { libc::mprotect(ptr, page, libc::PROT_NONE) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        trace!(bytes = usable, "stack mapped");
        Ok(stack)
    }

    /// Highest address of the stack. Execution starts here and grows down.
    pub(crate) fn base(&self) -> usize {
        self.mapping.as_ptr() as usize + self.mapping_len
    }

    /// Lowest usable address, just above the guard page.
    pub(crate) fn limit(&self) -> usize {
        self.mapping.as_ptr() as usize + self.guard_len
    }

    /// Usable bytes between [`limit`](Self::limit) and [`base`](Self::base).
    pub(crate) fn len(&self) -> usize {
        self.mapping_len - self.guard_len
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: The mapping was created in `new` and is unmapped only here.
        let result = unsafe { libc::munmap(self.mapping.as_ptr().cast(), self.mapping_len) };
        debug_assert_eq!(result, 0, "munmap failed: {}", io::Error::last_os_error());
        trace!(bytes = self.len(), "stack unmapped");
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("limit", &format_args!("{:#x}", self.limit()))
            .field("base", &format_args!("{:#x}", self.base()))
            .finish()
    }
}

// SAFETY: `base` is page aligned (and so 16-byte aligned), and the range down to `limit` stays
// mapped read/write for as long as the `Stack` lives.
#[cfg(feature = "corosensei")]
unsafe impl corosensei::stack::Stack for Stack {
    fn base(&self) -> corosensei::stack::StackPointer {
        // SAFETY: The mapping is non-null, and so is every address above it.
        unsafe { corosensei::stack::StackPointer::new_unchecked(Stack::base(self)) }
    }

    fn limit(&self) -> corosensei::stack::StackPointer {
        // SAFETY: As above.
        unsafe { corosensei::stack::StackPointer::new_unchecked(Stack::limit(self)) }
    }
}

fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: This is always safe.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).ok().filter(|&n| n > 0).unwrap_or(4096)
    })
}

fn round_up(n: usize, align: usize) -> Option<usize> {
    n.checked_add(align - 1).map(|n| n & !(align - 1))
}

fn too_large() -> io::Error {
    io::Error::new(
        io::ErrorKind::OutOfMemory,
        "requested stack size does not fit in the address space",
    )
}
