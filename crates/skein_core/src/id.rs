use core::fmt::{Debug, Display, Formatter};

/// Process-unique identity of a fiber.
///
/// Identities are handed out in creation order and never reused, so they stay meaningful in logs
/// after the fiber they named has been torn down.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct FiberId(u64);

impl Debug for FiberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), core::fmt::Error> {
        Display::fmt(self, f)
    }
}

impl Display for FiberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str("fiber#")?;
        Display::fmt(&self.0, f)
    }
}

impl From<FiberId> for u64 {
    fn from(id: FiberId) -> Self {
        id.0
    }
}

impl From<u64> for FiberId {
    fn from(n: u64) -> Self {
        FiberId(n)
    }
}
