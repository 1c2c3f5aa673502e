//! This crate specifies the core types for the [Skein](https://docs.rs/skein/) fiber library.
//!
//! They are kept apart from the runtime so that code which only observes fibers (loggers,
//! inspectors, test harnesses) does not need to link the context-switching machinery.
//!
//! # Features
//!
//! - `serde`: Implement `Serialize` and `Deserialize` for [`FiberId`] and [`FiberState`].

#![cfg_attr(not(test), no_std)]
#![deny(unused_must_use)]
#![warn(rust_2018_idioms, unreachable_pub)]

use core::fmt::{Display, Formatter};

mod id;

pub use id::FiberId;

/// Where a fiber is in its lifecycle.
///
/// ```text
/// Created ──resume──▶ Running ──yield──▶ Suspended
///                        ▲                   │
///                        └──────resume───────┘
/// Running ──entry returns──▶ Completed ──resume observes──▶ Cleared
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FiberState {
    /// Stack and context allocated; the entry function has not started.
    Created,
    /// Executing. Exactly one of the fiber and its resumer runs at any instant.
    Running,
    /// Paused inside a yield, waiting for the next resume.
    Suspended,
    /// The entry function returned. Only observable from inside the fiber.
    Completed,
    /// Stack and context released. Terminal.
    Cleared,
}

impl FiberState {
    /// Whether a resume would switch into the fiber.
    pub const fn is_resumable(self) -> bool {
        matches!(self, FiberState::Created | FiberState::Suspended)
    }

    /// Whether the entry function has returned.
    pub const fn is_finished(self) -> bool {
        matches!(self, FiberState::Completed | FiberState::Cleared)
    }
}

impl Display for FiberState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            FiberState::Created => "created",
            FiberState::Running => "running",
            FiberState::Suspended => "suspended",
            FiberState::Completed => "completed",
            FiberState::Cleared => "cleared",
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_created_and_suspended_are_resumable() {
        use FiberState::*;
        let resumable: Vec<_> = [Created, Running, Suspended, Completed, Cleared]
            .into_iter()
            .filter(|s| s.is_resumable())
            .collect();
        assert_eq!(resumable, vec![Created, Suspended]);
    }

    #[test]
    fn finished_states() {
        assert!(!FiberState::Suspended.is_finished());
        assert!(FiberState::Completed.is_finished());
        assert!(FiberState::Cleared.is_finished());
        assert_eq!(FiberState::Cleared.to_string(), "cleared");
    }
}
