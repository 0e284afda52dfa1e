//! Ordering of sibling streams inside a merge node.
//!
//! Streams are sorted so that the most informative source is consulted
//! earliest: contextual streams (which apply everywhere and are folded in up
//! front) come first, then positioned streams by shard key, and exhausted
//! streams last. At equal shard key, a leaf with concrete hits precedes a
//! composite with concrete hits, which precedes the variable contexts, which
//! precede the uninformative ones. The expression's canonical form breaks
//! the remaining ties to keep merges deterministic.

use crate::shard::ShardId;
use crate::stream::{IndexStream, StreamContext};

/// Sort key of a stream at its current position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum StreamKey {
    /// A stream with no positions at all: its context applies to every
    /// shard, and the merge consumes it before stepping.
    Contextual { rank: u8, tiebreak: String },
    /// A stream positioned at a shard key.
    At {
        shard: ShardId,
        rank: u8,
        tiebreak: String,
    },
    /// A data stream that has run out of entries.
    Exhausted { tiebreak: String },
}

impl StreamKey {
    pub fn of(stream: &mut dyn IndexStream) -> StreamKey {
        let tiebreak = stream
            .current_node()
            .map(|n| n.canonical())
            .unwrap_or_default();
        let context = stream.context();
        match stream.peek() {
            Some(entry) => StreamKey::At {
                shard: entry.shard.clone(),
                rank: positioned_rank(context, stream.is_composite()),
                tiebreak,
            },
            None if context == StreamContext::Present
                || context == StreamContext::ExceededValueThreshold =>
            {
                StreamKey::Exhausted { tiebreak }
            }
            None => StreamKey::Contextual {
                rank: contextual_rank(context),
                tiebreak,
            },
        }
    }

    pub fn shard(&self) -> Option<&ShardId> {
        match self {
            StreamKey::At { shard, .. } => Some(shard),
            _ => None,
        }
    }
}

fn positioned_rank(context: StreamContext, composite: bool) -> u8 {
    if context.is_uninformative() {
        3
    } else if context.is_variable() {
        2
    } else if composite {
        1
    } else {
        0
    }
}

fn contextual_rank(context: StreamContext) -> u8 {
    if context.is_uninformative() { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::index_info::IndexInfo;
    use crate::stream::{ScannerStream, ShardEntry, Union};

    fn entries(ids: &[&str]) -> impl Iterator<Item = ShardEntry> + 'static {
        ids.iter()
            .map(|id| ShardEntry::new(*id, IndexInfo::with_count(1)))
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn earlier_shard_sorts_first() {
        let mut a = ScannerStream::with_data(entries(&["20190314_2"]), Expr::term("A", "1"));
        let mut b = ScannerStream::with_data(entries(&["20190314_11"]), Expr::term("A", "1"));
        assert!(StreamKey::of(&mut a) < StreamKey::of(&mut b));
    }

    #[test]
    fn leaf_precedes_composite_at_equal_shard() {
        let mut leaf = ScannerStream::with_data(entries(&["20190314_0"]), Expr::term("A", "1"));
        let inner = ScannerStream::with_data(entries(&["20190314_0"]), Expr::term("B", "2"));
        let mut composite =
            Union::new(vec![Box::new(inner) as Box<dyn IndexStream>]).unwrap();
        assert!(StreamKey::of(&mut leaf) < StreamKey::of(&mut composite));
    }

    #[test]
    fn contextual_streams_sort_before_positioned() {
        let mut absent = ScannerStream::absent(Expr::term("A", "1"));
        let mut unindexed = ScannerStream::unindexed(Expr::term("B", "2"));
        let mut present = ScannerStream::with_data(entries(&["20190314_0"]), Expr::term("C", "3"));
        assert!(StreamKey::of(&mut absent) < StreamKey::of(&mut present));
        assert!(StreamKey::of(&mut absent) < StreamKey::of(&mut unindexed));
        assert!(StreamKey::of(&mut unindexed) < StreamKey::of(&mut present));
    }

    #[test]
    fn exhausted_streams_sort_last() {
        let mut done = ScannerStream::with_data(entries(&["20190314_0"]), Expr::term("A", "1"));
        done.pop().unwrap();
        let mut live = ScannerStream::with_data(entries(&["20190315_0"]), Expr::term("A", "1"));
        assert!(StreamKey::of(&mut live) < StreamKey::of(&mut done));
    }

    #[test]
    fn canonical_form_breaks_ties() {
        let mut a = ScannerStream::with_data(entries(&["20190314_0"]), Expr::term("A", "1"));
        let mut b = ScannerStream::with_data(entries(&["20190314_0"]), Expr::term("B", "2"));
        assert!(StreamKey::of(&mut a) < StreamKey::of(&mut b));
    }
}
