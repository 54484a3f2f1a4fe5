//! Core type definitions.

use std::fmt;

/// Identifier of a fixed-size page.
///
/// Page ids 0 and 1 hold the store headers, so `0` doubles as "no page".
pub type PageId = u32;

/// Identifier of a database session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Creates a new session ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Identifier of a table in the row layer above the page store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u32);

impl TableId {
    /// Creates a new table ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// A position in the log: the section (checkpoint epoch) and the ordinal of
/// the row operation within that section.
///
/// Positions order by section first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogPosition {
    /// Log section id; advanced only by checkpoints.
    pub section: u32,
    /// Row operation ordinal within the section.
    pub pos: u32,
}

impl LogPosition {
    /// Creates a new log position.
    #[must_use]
    pub const fn new(section: u32, pos: u32) -> Self {
        Self { section, pos }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.section, self.pos)
    }
}
