//! Skein provides stackful cooperative fibers: functions with their own call stack that can pause
//! anywhere (not just at `.await` points) and be continued later with all local state intact.
//!
//! There is no scheduler. The code that creates a [`Fiber`] drives it by calling
//! [`Fiber::resume`], which blocks until the fiber calls [`FiberHandle::yield_now`] or returns.
//!
//! # Usage
//!
//! ```
//! use skein::Fiber;
//!
//! // Pass context in through the opaque user-data slot instead of capturing it.
//! let mut total = 0u32;
//! let fiber = Fiber::new(|f| {
//!     for n in 1..=4 {
//!         // SAFETY: The pointer is set below and outlives the fiber.
//!         unsafe { *f.userdata().cast::<u32>() += n };
//!         f.yield_now();
//!     }
//! })?;
//! fiber.set_userdata((&mut total as *mut u32).cast());
//!
//! while !fiber.is_finished() {
//!     fiber.resume();
//! }
//! drop(fiber);
//! assert_eq!(total, 10);
//! # Ok::<(), skein::Error>(())
//! ```
//!
//! # Protocol
//!
//! - A fiber is resumed only by the context that created it (the thread's own stack or another
//!   fiber's body). It yields back to whoever resumed it.
//! - Calls that break these rules return an [`Error`] and emit a `tracing` error event instead
//!   of switching. See [`Fiber::try_resume`] and [`FiberHandle::try_yield`].
//! - A panic in the entry function is caught at the fiber boundary, logged, and the fiber
//!   finishes ([`Fiber::panicked`]). Application errors never cross the boundary; pass them out
//!   through user data.
//! - Fibers are neither `Send` nor `Sync`. A thread hosting fibers is enabled on first use
//!   ([`enable_current_thread`]).
//!
//! # Features
//!
//! - `corosensei` (default): the assembly back-end from the `corosensei` crate.
//! - `ucontext` (default): glibc `ucontext` back-end, on x86_64 Linux with glibc only.
//!
//! At least one back-end must be available; [`Backend::available`] lists them.

#![cfg_attr(all(doc, CHANNEL_NIGHTLY), feature(doc_auto_cfg))]
#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

#[cfg(not(unix))]
compile_error!("skein only supports Unix targets");

mod arch;
mod builder;
mod error;
mod fiber;
mod stack;
mod thread;

pub use arch::Backend;

pub use builder::FiberBuilder;

pub use error::Error;

pub use fiber::{Fiber, FiberHandle};

pub use skein_core::{FiberId, FiberState};

pub use stack::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};

pub use thread::{current, enable_current_thread, is_current_thread_enabled};
