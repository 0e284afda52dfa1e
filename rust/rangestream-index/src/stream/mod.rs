//! Shard-ordered streams of index lookup results.
//!
//! A stream yields [`ShardEntry`] values in ascending shard order: leaf
//! streams ([`ScannerStream`]) replay the postings of a single term, while
//! [`Intersection`] and [`Union`] merge child streams under the query
//! connectives. Every stream carries a [`StreamContext`] describing what kind
//! of information it contributes, and the expression subtree it stands for.

mod comparator;
mod intersection;
mod scanner;
mod union;

pub use comparator::StreamKey;
pub use intersection::Intersection;
pub use scanner::ScannerStream;
pub use union::Union;

use rangestream_common::Result;

use crate::expr::ExprRef;
use crate::index_info::IndexInfo;
use crate::shard::ShardId;

/// One positioned element of a stream: a shard key and the lookup result
/// at that key.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardEntry {
    pub shard: ShardId,
    pub info: IndexInfo,
}

impl ShardEntry {
    pub fn new(shard: impl Into<ShardId>, info: IndexInfo) -> ShardEntry {
        ShardEntry {
            shard: shard.into(),
            info,
        }
    }
}

/// What a stream knows about its term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamContext {
    /// The stream yields concrete shard keys for its subtree.
    Present,
    /// The term has no hits at all; an intersection containing it is empty.
    Absent,
    /// The term is deliberately not evaluated against the index.
    Ignored,
    /// The field is not indexed, so the index cannot bound the subtree.
    Unindexed,
    /// The field cannot be evaluated against the index for the query's date
    /// range; the subtree must run against retrieved documents.
    DelayedField,
    /// The field does not exist in the data dictionary.
    UnknownField,
    /// Term expansion exceeded the configured threshold.
    ExceededTermThreshold,
    /// Value expansion exceeded the configured threshold; the stream still
    /// yields shard keys.
    ExceededValueThreshold,
}

impl StreamContext {
    /// Contexts that constrain nothing by shard but still name an expression
    /// the planner must keep: the subtree applies everywhere.
    pub fn is_variable(self) -> bool {
        matches!(
            self,
            StreamContext::Ignored
                | StreamContext::Unindexed
                | StreamContext::UnknownField
                | StreamContext::ExceededTermThreshold
                | StreamContext::ExceededValueThreshold
        )
    }

    /// Contexts that contribute no selectivity information at all.
    pub fn is_uninformative(self) -> bool {
        matches!(self, StreamContext::Absent | StreamContext::DelayedField)
    }
}

/// A shard-ordered stream of index lookup results.
pub trait IndexStream {
    /// The kind of information this stream contributes.
    fn context(&self) -> StreamContext;

    /// The expression subtree this stream currently stands for.
    fn current_node(&self) -> Option<&ExprRef>;

    /// The current head entry, without consuming it. Repeated calls return
    /// the same entry.
    fn peek(&mut self) -> Option<&ShardEntry>;

    /// Consumes and returns the head entry. Calling past exhaustion is an
    /// invalid operation.
    fn pop(&mut self) -> Result<ShardEntry>;

    /// Discards entries ordered before `target` and returns the new head
    /// shard, or `None` when the stream is exhausted. A day-level head
    /// whose day contains `target` is kept as-is: the day covers the
    /// target. Seeking is monotonic; a target at or before the current
    /// head leaves the stream unchanged.
    fn seek(&mut self, target: &ShardId) -> Result<Option<ShardId>>;

    /// `true` for merge nodes, `false` for leaf streams.
    fn is_composite(&self) -> bool {
        false
    }
}

impl IndexStream for Box<dyn IndexStream> {
    fn context(&self) -> StreamContext {
        (**self).context()
    }

    fn current_node(&self) -> Option<&ExprRef> {
        (**self).current_node()
    }

    fn peek(&mut self) -> Option<&ShardEntry> {
        (**self).peek()
    }

    fn pop(&mut self) -> Result<ShardEntry> {
        (**self).pop()
    }

    fn seek(&mut self, target: &ShardId) -> Result<Option<ShardId>> {
        (**self).seek(target)
    }

    fn is_composite(&self) -> bool {
        (**self).is_composite()
    }
}
