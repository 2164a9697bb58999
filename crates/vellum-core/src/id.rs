//! Identifiers and the attachment side.
//!
//! An [`Id`] names one UTF-16 code unit (or one operation): the minting
//! replica's author string plus a sequence number drawn from that
//! replica's Lamport clock. The total order `(seq, author)` is the
//! tie-break for every concurrent-operation conflict in the engine.

use std::cmp::Ordering;
use std::fmt;

/// Stable identifier: `(author, seq)`, ordered by `(seq, author)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Id {
    pub author: String,
    pub seq: i64,
}

impl Id {
    pub fn new(author: impl Into<String>, seq: i64) -> Self {
        Self {
            author: author.into(),
            seq,
        }
    }

    /// Seed id of the anchor character every document starts with.
    pub fn root() -> Self {
        Self::new("root", 0)
    }

    /// Seed id of the trailing newline.
    pub fn last() -> Self {
        Self::new("q", 1)
    }

    /// The "no id" sentinel.
    pub fn none() -> Self {
        Self::new("", -1)
    }

    pub fn is_none(&self) -> bool {
        self.seq == -1 && self.author.is_empty()
    }

    /// The unit `offset` code units after this one in the same run.
    pub fn offset(&self, offset: i64) -> Self {
        Self {
            author: self.author.clone(),
            seq: self.seq + offset,
        }
    }

    /// Parse the `author_seq` form produced by [`fmt::Display`].
    pub fn parse(s: &str) -> Option<Self> {
        let (author, seq) = s.rsplit_once('_')?;
        Some(Self::new(author, seq.parse::<i64>().ok()?))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.author.cmp(&other.author))
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.author, self.seq)
    }
}

/// Where a fugue node attaches relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Root,
    Right,
}

impl Side {
    /// Wire encoding: -1 / 0 / 1.
    pub fn as_i64(self) -> i64 {
        match self {
            Side::Left => -1,
            Side::Root => 0,
            Side::Right => 1,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            -1 => Some(Side::Left),
            0 => Some(Side::Root),
            1 => Some(Side::Right),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_seq_then_author() {
        let a = Id::new("alice", 5);
        let b = Id::new("bob", 5);
        let c = Id::new("alice", 6);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn parse_round_trips() {
        let id = Id::new("8cd8-dk", 42);
        assert_eq!(Id::parse(&id.to_string()), Some(id));
        assert_eq!(Id::parse("nounderscore"), None);
    }
}
