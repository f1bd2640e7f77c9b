use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-record write counter used for optimistic locking. Starts at 1 when a
/// record is created and advances by exactly 1 on every accepted conditional
/// write; the remote store enforces the check-and-set atomically.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u32);

impl Version {
    pub const INITIAL: Version = Version(1);

    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// The version a record carries after one more accepted write.
    pub fn next(&self) -> Version {
        Version(self.0 + 1)
    }
}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_is_one() {
        assert_eq!(Version::INITIAL.get(), 1);
    }

    #[test]
    fn next_advances_by_one() {
        let v = Version::INITIAL;
        assert_eq!(v.next().get(), 2);
        assert_eq!(v.next().next().get(), 3);
    }

    #[test]
    fn ordering_follows_counter() {
        assert!(Version::new(2) > Version::INITIAL);
        assert!(Version::new(2) < Version::new(10));
    }
}
