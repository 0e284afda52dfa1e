//! Leaf streams over the postings of a single term.

use rangestream_common::{Result, error::Error};

use crate::expr::ExprRef;
use crate::shard::ShardId;
use crate::stream::{IndexStream, ShardEntry, StreamContext};

/// A leaf [`IndexStream`]: replays the shard-ordered entries of one term,
/// or stands for a term the index cannot bound (carrying only a context and
/// an expression).
pub struct ScannerStream {
    context: StreamContext,
    node: Option<ExprRef>,
    entries: std::iter::Peekable<Box<dyn Iterator<Item = ShardEntry>>>,
}

impl ScannerStream {
    fn new(
        context: StreamContext,
        node: Option<ExprRef>,
        entries: Box<dyn Iterator<Item = ShardEntry>>,
    ) -> ScannerStream {
        ScannerStream {
            context,
            node,
            entries: entries.peekable(),
        }
    }

    fn without_data(context: StreamContext, node: ExprRef) -> ScannerStream {
        ScannerStream::new(context, Some(node), Box::new(std::iter::empty()))
    }

    /// A term with concrete index hits.
    pub fn with_data(
        entries: impl Iterator<Item = ShardEntry> + 'static,
        node: ExprRef,
    ) -> ScannerStream {
        ScannerStream::new(StreamContext::Present, Some(node), Box::new(entries))
    }

    /// A term whose value expansion blew the threshold but still yields
    /// shard keys.
    pub fn exceeded_value_threshold(
        entries: impl Iterator<Item = ShardEntry> + 'static,
        node: ExprRef,
    ) -> ScannerStream {
        ScannerStream::new(
            StreamContext::ExceededValueThreshold,
            Some(node),
            Box::new(entries),
        )
    }

    /// A term with no hits anywhere in the query's date range.
    pub fn absent(node: ExprRef) -> ScannerStream {
        ScannerStream::without_data(StreamContext::Absent, node)
    }

    /// A term deliberately excluded from index evaluation.
    pub fn ignored(node: ExprRef) -> ScannerStream {
        ScannerStream::without_data(StreamContext::Ignored, node)
    }

    /// A term on a field that is not indexed.
    pub fn unindexed(node: ExprRef) -> ScannerStream {
        ScannerStream::without_data(StreamContext::Unindexed, node)
    }

    /// A term that must be evaluated against retrieved documents.
    pub fn delayed_field(node: ExprRef) -> ScannerStream {
        ScannerStream::without_data(StreamContext::DelayedField, node)
    }

    /// A term on a field absent from the data dictionary.
    pub fn unknown_field(node: ExprRef) -> ScannerStream {
        ScannerStream::without_data(StreamContext::UnknownField, node)
    }

    /// A term whose expansion blew the term threshold.
    pub fn exceeded_term_threshold(node: ExprRef) -> ScannerStream {
        ScannerStream::without_data(StreamContext::ExceededTermThreshold, node)
    }
}

impl IndexStream for ScannerStream {
    fn context(&self) -> StreamContext {
        self.context
    }

    fn current_node(&self) -> Option<&ExprRef> {
        self.node.as_ref()
    }

    fn peek(&mut self) -> Option<&ShardEntry> {
        self.entries.peek()
    }

    fn pop(&mut self) -> Result<ShardEntry> {
        self.entries
            .next()
            .ok_or_else(|| Error::invalid_operation("pop on exhausted scanner stream"))
    }

    fn seek(&mut self, target: &ShardId) -> Result<Option<ShardId>> {
        while let Some(head) = self.entries.peek() {
            // A day head covers every shard of that day, so an in-day target
            // is already satisfied.
            if head.shard >= *target || head.shard.covers(target) {
                return Ok(Some(head.shard.clone()));
            }
            self.entries.next();
        }
        Ok(None)
    }
}
