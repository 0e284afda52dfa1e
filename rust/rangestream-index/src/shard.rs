//! Shard identifiers and their ordering.
//!
//! The index is partitioned by day, and each day is split into numbered shards.
//! A shard identifier is either a bare day (`"20190314"`) or a day plus a numeric
//! partition suffix (`"20190314_7"`). A bare day sorts before every shard of that
//! day, and partitions within a day compare numerically, so `"20190314_2"` comes
//! before `"20190314_11"`.

use std::cmp::Ordering;
use std::fmt;

/// Identifier of a day or of a single shard within a day.
///
/// Wraps the textual identifier and imposes the stream ordering: days first,
/// then their shards by numeric partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> ShardId {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` when this identifier names a whole day rather than
    /// a single shard. An identifier with a trailing separator but no
    /// partition digits (`"20190314_"`) is not a day.
    pub fn is_day(&self) -> bool {
        !self.0.contains('_')
    }

    /// The day portion of the identifier (everything before the partition
    /// separator, or the whole identifier for a bare day).
    pub fn day(&self) -> &str {
        match self.0.split_once('_') {
            Some((day, _)) => day,
            None => &self.0,
        }
    }

    /// The partition suffix, if this identifier names a shard.
    pub fn partition(&self) -> Option<&str> {
        self.0.split_once('_').map(|(_, part)| part)
    }

    /// Returns `true` when both identifiers belong to the same day.
    pub fn same_day(&self, other: &ShardId) -> bool {
        self.day() == other.day()
    }

    /// Returns `true` when `other` is covered by this identifier: either the
    /// two are equal, or `self` is a bare day and `other` is a shard (or the
    /// day itself) of that day.
    pub fn covers(&self, other: &ShardId) -> bool {
        if self.is_day() {
            self.same_day(other)
        } else {
            self == other
        }
    }
}

impl Ord for ShardId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.day()
            .cmp(other.day())
            .then_with(|| compare_partitions(self.partition(), other.partition()))
    }
}

impl PartialOrd for ShardId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_partitions(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        // A bare day precedes every shard of that day.
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        },
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(id: &str) -> ShardId {
        ShardId::new(id)
    }
}

impl From<String> for ShardId {
    fn from(id: String) -> ShardId {
        ShardId(id)
    }
}

impl PartialEq<&str> for ShardId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
