//! Calls that break the resume/yield protocol are refused, logged, and leave the fibers involved
//! untouched.

use {
    skein::{Backend, Error, Fiber, FiberBuilder, FiberState},
    std::{
        cell::RefCell,
        io,
        rc::Rc,
        sync::{Arc, Mutex},
    },
    tracing_subscriber::fmt::MakeWriter,
};

/// Collects formatted log output in memory.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with a subscriber that records every event on this thread, returning the log text.
fn capture<R>(f: impl FnOnce() -> R) -> (R, String) {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, captured.contents())
}

fn builder(backend: Backend) -> FiberBuilder {
    FiberBuilder::new().backend(backend)
}

#[test]
fn resume_from_own_body_is_reentrant() {
    for &backend in Backend::available() {
        let slot: Rc<RefCell<Option<Rc<Fiber<'static>>>>> = Rc::default();
        let outcome = Rc::new(RefCell::new(None));
        let fiber = {
            let slot = slot.clone();
            let outcome = outcome.clone();
            Rc::new(
                builder(backend)
                    .spawn(move |f| {
                        let me = slot.borrow().clone().unwrap();
                        *outcome.borrow_mut() = Some(me.try_resume());
                        assert_eq!(me.state(), FiberState::Running);
                        f.yield_now();
                    })
                    .unwrap(),
            )
        };
        *slot.borrow_mut() = Some(fiber.clone());

        let (resumed, logs) = capture(|| fiber.resume());
        assert!(resumed);
        match outcome.borrow_mut().take() {
            Some(Err(Error::Reentrant(id))) => assert_eq!(id, fiber.id()),
            other => panic!("{backend}: unexpected outcome {other:?}"),
        }
        assert!(logs.contains("resume rejected"), "{logs}");
        assert!(logs.contains("is already running"), "{logs}");

        assert!(fiber.resume());
        assert!(fiber.is_finished() && !fiber.panicked());
        slot.borrow_mut().take();
    }
}

#[test]
fn clear_from_own_body_is_reentrant() {
    for &backend in Backend::available() {
        let slot: Rc<RefCell<Option<Rc<Fiber<'static>>>>> = Rc::default();
        let outcome = Rc::new(RefCell::new(None));
        let fiber = {
            let slot = slot.clone();
            let outcome = outcome.clone();
            Rc::new(
                builder(backend)
                    .spawn(move |_| {
                        let me = slot.borrow().clone().unwrap();
                        *outcome.borrow_mut() = Some(me.clear());
                        assert_eq!(me.state(), FiberState::Running);
                    })
                    .unwrap(),
            )
        };
        *slot.borrow_mut() = Some(fiber.clone());

        let (resumed, logs) = capture(|| fiber.resume());
        assert!(resumed);
        assert!(fiber.is_finished() && !fiber.panicked());
        match outcome.borrow_mut().take() {
            Some(Err(Error::Reentrant(id))) => assert_eq!(id, fiber.id()),
            other => panic!("{backend}: unexpected outcome {other:?}"),
        }
        assert!(logs.contains("clear rejected"), "{logs}");
        slot.borrow_mut().take();
    }
}

#[test]
fn resume_of_an_ancestor_is_reentrant() {
    for &backend in Backend::available() {
        let slot: Rc<RefCell<Option<Rc<Fiber<'static>>>>> = Rc::default();
        let outcome = Rc::new(RefCell::new(None));
        let outer = {
            let slot = slot.clone();
            let outcome = outcome.clone();
            Rc::new(
                builder(backend)
                    .spawn(move |_| {
                        let inner = builder(backend)
                            .spawn(|_| {
                                let outer = slot.borrow().clone().unwrap();
                                *outcome.borrow_mut() = Some(outer.try_resume());
                            })
                            .unwrap();
                        assert!(inner.resume());
                        assert!(inner.is_finished());
                    })
                    .unwrap(),
            )
        };
        *slot.borrow_mut() = Some(outer.clone());

        assert!(outer.resume());
        assert!(outer.is_finished() && !outer.panicked());
        assert!(matches!(
            outcome.borrow_mut().take(),
            Some(Err(Error::Reentrant(id))) if id == outer.id()
        ));
        slot.borrow_mut().take();
    }
}

#[test]
fn resume_from_another_fiber_is_refused() {
    for &backend in Backend::available() {
        let target = builder(backend).spawn(|f| f.yield_now()).unwrap();
        let outcome = RefCell::new(None);
        let intruder = builder(backend)
            .spawn(|_| {
                *outcome.borrow_mut() = Some(target.try_resume());
            })
            .unwrap();

        let (_, logs) = capture(|| intruder.resume());
        assert!(intruder.is_finished() && !intruder.panicked());
        match outcome.take() {
            Some(Err(Error::WrongCaller {
                fiber,
                expected: None,
                current: Some(current),
            })) => {
                assert_eq!(fiber, target.id());
                assert_eq!(current, intruder.id());
            }
            other => panic!("{backend}: unexpected outcome {other:?}"),
        }
        assert!(logs.contains("must be resumed from the thread root"), "{logs}");

        // The refused call did not disturb the target.
        assert_eq!(target.state(), FiberState::Created);
        assert!(target.resume());
        assert!(target.resume());
        assert!(target.is_finished());
    }
}

#[test]
fn nested_fiber_cannot_be_resumed_from_the_root() {
    for &backend in Backend::available() {
        let escaped: RefCell<Option<Rc<Fiber<'static>>>> = RefCell::new(None);
        let outer = builder(backend)
            .spawn(|f| {
                let inner = Rc::new(builder(backend).spawn(|g| g.yield_now()).unwrap());
                assert!(inner.resume());
                *escaped.borrow_mut() = Some(inner.clone());
                f.yield_now();
                assert!(inner.resume());
                assert!(inner.is_finished());
            })
            .unwrap();
        assert!(outer.resume());

        let inner = escaped.borrow_mut().take().unwrap();
        match inner.try_resume() {
            Err(Error::WrongCaller {
                expected: Some(expected),
                current: None,
                ..
            }) => assert_eq!(expected, outer.id()),
            other => panic!("{backend}: unexpected outcome {other:?}"),
        }
        assert_eq!(inner.state(), FiberState::Suspended);

        assert!(outer.resume());
        assert!(outer.is_finished() && !outer.panicked());
        assert!(inner.is_finished());
    }
}

#[test]
fn yield_outside_the_fiber_is_refused() {
    for &backend in Backend::available() {
        let fiber = builder(backend).spawn(|f| f.yield_now()).unwrap();

        let (result, logs) = capture(|| fiber.try_yield());
        assert!(matches!(
            result,
            Err(Error::NotRunning { fiber: id, current: None }) if id == fiber.id()
        ));
        assert!(logs.contains("yield rejected"), "{logs}");
        assert_eq!(fiber.state(), FiberState::Created);

        assert!(fiber.resume());
        assert!(matches!(fiber.try_yield(), Err(Error::NotRunning { .. })));
        // A refused yield is a no-op, even through the infallible variant.
        fiber.yield_now();
        assert_eq!(fiber.state(), FiberState::Suspended);

        assert!(fiber.resume());
        assert!(fiber.is_finished());
    }
}

#[test]
fn captured_handle_cannot_yield_from_a_nested_fiber() {
    for &backend in Backend::available() {
        let outcome = RefCell::new(None);
        let inner_id = RefCell::new(None);
        let outer = builder(backend)
            .spawn(|f| {
                let inner = builder(backend)
                    .spawn(|_| {
                        *outcome.borrow_mut() = Some(f.try_yield());
                    })
                    .unwrap();
                *inner_id.borrow_mut() = Some(inner.id());
                assert!(inner.resume());
                assert!(inner.is_finished());
            })
            .unwrap();

        assert!(outer.resume());
        // Had the yield gone through, the outer fiber would be suspended instead.
        assert!(outer.is_finished() && !outer.panicked());
        match outcome.take() {
            Some(Err(Error::NotRunning { fiber, current })) => {
                assert_eq!(fiber, outer.id());
                assert_eq!(current, *inner_id.borrow());
            }
            other => panic!("{backend}: unexpected outcome {other:?}"),
        }
    }
}

#[test]
fn resume_after_teardown_warns() {
    for &backend in Backend::available() {
        let fiber = builder(backend).spawn(|_| {}).unwrap();
        assert!(fiber.resume());
        let (resumed, logs) = capture(|| fiber.resume());
        assert!(!resumed);
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("already torn down"), "{logs}");
    }
}

#[test]
fn dropping_a_suspended_fiber_warns() {
    for &backend in Backend::available() {
        // Created under the subscriber so that the fiber's span (and its name) is recorded.
        let ((), logs) = capture(|| {
            let fiber = builder(backend).name("worker").spawn(|f| f.yield_now()).unwrap();
            assert!(fiber.resume());
            drop(fiber);
        });
        assert!(logs.contains("leaking its stack"), "{logs}");
        assert!(logs.contains("worker"), "{logs}");
    }
}

#[test]
fn panic_message_is_logged() {
    for &backend in Backend::available() {
        let fiber = builder(backend)
            .spawn(|_| panic!("bad input {}", 7))
            .unwrap();
        let (resumed, logs) = capture(|| fiber.resume());
        assert!(resumed);
        assert!(fiber.panicked() && fiber.is_finished());
        assert!(logs.contains("Fiber exited due to panic."), "{logs}");
        assert!(logs.contains("bad input 7"), "{logs}");
    }
}

#[test]
fn first_fiber_enables_the_thread() {
    std::thread::spawn(|| {
        assert!(!skein::is_current_thread_enabled());
        let (fiber, logs) = capture(|| Fiber::new(|_| {}).unwrap());
        assert!(skein::is_current_thread_enabled());
        assert!(logs.contains("thread enabled for fibers"), "{logs}");

        let (_, logs) = capture(|| Fiber::new(|_| {}).unwrap());
        assert!(!logs.contains("thread enabled for fibers"), "{logs}");
        assert!(!skein::enable_current_thread());
        drop(fiber);
    })
    .join()
    .unwrap();
}
