//! Self-space and target-space addresses as distinct types, so that an
//! address from one process cannot silently be used in the other.
//! Arithmetic between the two spaces happens only in the resolver.

use std::fmt;

/// An address in this tool's own address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddr(u64);

impl LocalAddr {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// An address in the traced target's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(u64);

impl RemoteAddr {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn add(self, offset: u64) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::LowerHex for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::LowerHex for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
