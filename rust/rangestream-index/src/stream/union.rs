//! Disjunctive merge of index streams.

use std::collections::BTreeMap;

use rangestream_common::{Result, error::Error};

use crate::expr::{ExprRef, ExprSet};
use crate::index_info::IndexInfo;
use crate::shard::ShardId;
use crate::stream::{IndexStream, ShardEntry, StreamContext, StreamKey};

/// Merges child streams under a disjunction: every shard key any positioned
/// child yields is emitted, with same-key results combined by
/// [`IndexInfo::union`].
///
/// A bare day key subsumes the shard-level keys of the same day: when the
/// smallest head is a day, every same-day head merges into one day-level
/// result. Absent children are discarded (a false branch adds nothing to a
/// disjunction), children with no positions contribute their expression to
/// every emitted key as a delayed evaluation node, and exhausted children
/// simply drop out.
pub struct Union {
    children: BTreeMap<StreamKey, Vec<Box<dyn IndexStream>>>,
    delayed: Vec<ExprRef>,
    context: StreamContext,
    node: Option<ExprRef>,
    head: Option<ShardEntry>,
}

impl Union {
    pub fn new(children: Vec<Box<dyn IndexStream>>) -> Result<Union> {
        let mut positioned: BTreeMap<StreamKey, Vec<Box<dyn IndexStream>>> = BTreeMap::new();
        let mut delayed = Vec::new();
        let mut nodes = ExprSet::new();
        let mut contextual = Vec::new();

        for mut child in children {
            match child.context() {
                StreamContext::Absent => continue,
                StreamContext::Present | StreamContext::ExceededValueThreshold => {
                    if let Some(node) = child.current_node() {
                        nodes.insert_or_terms(node);
                    }
                    if child.peek().is_some() {
                        let key = StreamKey::of(&mut child);
                        positioned.entry(key).or_default().push(child);
                    }
                }
                context => {
                    if let Some(node) = child.current_node() {
                        nodes.insert_or_terms(node);
                        delayed.push(node.clone());
                    }
                    contextual.push(context);
                }
            }
        }

        let context = if !positioned.is_empty() {
            StreamContext::Present
        } else if contextual.is_empty() {
            // Nothing but absent (or no) children.
            StreamContext::Absent
        } else if contextual.iter().all(|c| *c == StreamContext::Unindexed) {
            StreamContext::Unindexed
        } else if contextual.iter().any(|c| {
            matches!(
                c,
                StreamContext::DelayedField | StreamContext::ExceededTermThreshold
            )
        }) {
            StreamContext::DelayedField
        } else {
            StreamContext::Ignored
        };

        let mut merged = Union {
            children: positioned,
            delayed,
            context,
            node: nodes.or_node(),
            head: None,
        };
        if merged.context == StreamContext::Present {
            merged.advance()?;
            if merged.head.is_none() {
                merged.context = StreamContext::Absent;
            }
        }
        Ok(merged)
    }

    fn advance(&mut self) -> Result<()> {
        self.head = None;
        while self.head.is_none() && !self.children.is_empty() {
            let Some(min_shard) = self
                .children
                .first_key_value()
                .and_then(|(k, _)| k.shard().cloned())
            else {
                // Positioned maps hold only keyed streams.
                self.children.clear();
                break;
            };

            // Gather every stream whose head falls under the smallest key;
            // a bare day pulls in all shard-level heads of that day.
            let merge_keys: Vec<StreamKey> = self
                .children
                .keys()
                .take_while(|k| k.shard().is_some_and(|s| min_shard.covers(s)))
                .cloned()
                .collect();
            log::trace!("union at {min_shard}, {} stream groups", merge_keys.len());

            let mut combined = IndexInfo::empty();
            let mut merged_streams = Vec::new();
            for key in merge_keys {
                if let Some(group) = self.children.remove(&key) {
                    for mut child in group {
                        let entry = child.pop()?;
                        combined = combined.union(&entry.info, &self.delayed);
                        // A day key subsumes every shard of the day, so the
                        // child's remaining in-day entries fold in as well.
                        while child.peek().is_some_and(|e| min_shard.covers(&e.shard)) {
                            let entry = child.pop()?;
                            combined = combined.union(&entry.info, &self.delayed);
                        }
                        merged_streams.push(child);
                    }
                }
            }

            for mut child in merged_streams {
                if child.peek().is_some() {
                    let key = StreamKey::of(&mut child);
                    self.children.entry(key).or_default().push(child);
                }
            }

            if combined.count() != 0 {
                self.head = Some(ShardEntry::new(min_shard, combined));
            }
        }
        Ok(())
    }
}

impl IndexStream for Union {
    fn context(&self) -> StreamContext {
        self.context
    }

    fn current_node(&self) -> Option<&ExprRef> {
        self.node.as_ref()
    }

    fn peek(&mut self) -> Option<&ShardEntry> {
        self.head.as_ref()
    }

    fn pop(&mut self) -> Result<ShardEntry> {
        let head = self
            .head
            .take()
            .ok_or_else(|| Error::invalid_operation("pop on exhausted union"))?;
        self.advance()?;
        Ok(head)
    }

    fn seek(&mut self, target: &ShardId) -> Result<Option<ShardId>> {
        if let Some(head) = &self.head {
            if head.shard >= *target || head.shard.covers(target) {
                return Ok(Some(head.shard.clone()));
            }
        }
        self.head = None;
        let groups = std::mem::take(&mut self.children);
        for (_, group) in groups {
            for mut child in group {
                if child.seek(target)?.is_some() {
                    let key = StreamKey::of(&mut child);
                    self.children.entry(key).or_default().push(child);
                }
            }
        }
        self.advance()?;
        Ok(self.head.as_ref().map(|e| e.shard.clone()))
    }

    fn is_composite(&self) -> bool {
        true
    }
}
