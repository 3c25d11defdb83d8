//! Peer identifiers: a 64-bit private id and a 16-bit user-facing key.
//!
//! Both are plain random handles, not secrets -- `key` in particular is
//! meant to be shown to users. The type-minimum value of each is reserved
//! as the "no id" / "no key" sentinel and is never generated.

use std::fmt;

use rand::Rng;

/// 64-bit peer identifier. `PeerId::NONE` (`i64::MIN`) means "no id".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(i64);

impl PeerId {
    pub const NONE: PeerId = PeerId(i64::MIN);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Draw a uniformly random id, excluding the sentinel.
    pub fn generate() -> Self {
        loop {
            let candidate = rand::rng().random_range(i64::MIN..=i64::MAX);
            if candidate != i64::MIN {
                return Self(candidate);
            }
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 16-bit user-facing peer key. `PeerKey::NONE` (`i16::MIN`) means "no key".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerKey(i16);

impl PeerKey {
    pub const NONE: PeerKey = PeerKey(i16::MIN);

    pub fn new(value: i16) -> Self {
        Self(value)
    }

    pub fn get(self) -> i16 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Draw a uniformly random key, excluding the sentinel.
    pub fn generate() -> Self {
        loop {
            let candidate = rand::rng().random_range(i16::MIN..=i16::MAX);
            if candidate != i16::MIN {
                return Self(candidate);
            }
        }
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
