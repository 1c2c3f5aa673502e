use {
    super::{Suspender, Switch},
    crate::{
        fiber::{trampoline, Core, Entry},
        stack::Stack,
    },
    corosensei::{CoroutineResult, ScopedCoroutine, Yielder},
    std::{io, ptr::NonNull},
};

/// Context pair backed by a corosensei coroutine running on a [`Stack`].
///
/// corosensei keeps the continuation itself: the coroutine's parent link is rewritten on every
/// `resume`, which is exactly the "most recent resumer" rule.
pub(crate) struct Coro<'a> {
    coroutine: ScopedCoroutine<'a, (), (), (), Stack>,
}

/// Address of the [`Yielder`] living at the bottom of the fiber's stack.
#[derive(Clone, Copy)]
pub(crate) struct YielderRef(NonNull<Yielder<(), ()>>);

impl<'a> Switch<'a> for Coro<'a> {
    type Suspender = YielderRef;

    fn new(stack: Stack, core: NonNull<Core>, entry: Entry<'a>) -> io::Result<Self> {
        let coroutine = ScopedCoroutine::with_stack(stack, move |yielder: &Yielder<(), ()>, ()| {
            // SAFETY: The core outlives every activation of the fiber.
            let core = unsafe { core.as_ref() };
            let suspender = Suspender::Corosensei(YielderRef(NonNull::from(yielder)));
            trampoline(core, suspender, entry);
            // Returning is the final switch out.
        });
        Ok(Coro { coroutine })
    }

    unsafe fn switch_in(&mut self) -> io::Result<()> {
        match self.coroutine.resume(()) {
            CoroutineResult::Yield(()) | CoroutineResult::Return(()) => Ok(()),
        }
    }

    unsafe fn switch_out(yielder: YielderRef) -> io::Result<()> {
        // SAFETY: The yielder lives on the fiber's stack, which we are running on.
        let yielder = unsafe { yielder.0.as_ref() };
        yielder.suspend(());
        Ok(())
    }
}
