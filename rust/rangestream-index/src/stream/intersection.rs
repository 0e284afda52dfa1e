//! Conjunctive merge of index streams.

use std::collections::BTreeMap;

use rangestream_common::{Result, error::Error};

use crate::expr::{Expr, ExprRef, ExprSet};
use crate::index_info::IndexInfo;
use crate::shard::ShardId;
use crate::stream::{IndexStream, ShardEntry, StreamContext};

/// Merges child streams under a conjunction: a shard key is emitted only
/// when every positioned child has it, with the per-key results combined by
/// [`IndexInfo::intersect`].
///
/// Children that carry no positions (unindexed fields, delayed subtrees,
/// exceeded thresholds) constrain nothing by shard; their expressions ride
/// along as delayed evaluation nodes on every emitted key. A child that is
/// absent, or that exhausts, empties the whole intersection. When any child
/// defers its subtree to document evaluation (a delayed field or an exceeded
/// term threshold), emitted keys keep their counts and combined expression
/// but drop per-document identifiers, since the deferred subtree could
/// disqualify any of them.
///
/// Positioned children are keyed by their head shard. When all heads agree
/// the key is emitted; otherwise every lagging child seeks directly to the
/// highest head rather than stepping through intervening entries. A child
/// positioned on a bare day key matches every shard of that day without
/// being advanced, so one day-level result broadcasts across its partner's
/// shard-level keys.
pub struct Intersection {
    children: BTreeMap<ShardId, Vec<Box<dyn IndexStream>>>,
    delayed: Vec<ExprRef>,
    drop_uids: bool,
    context: StreamContext,
    node: Option<ExprRef>,
    head: Option<ShardEntry>,
}

impl Intersection {
    pub fn new(children: Vec<Box<dyn IndexStream>>) -> Result<Intersection> {
        let mut positioned: BTreeMap<ShardId, Vec<Box<dyn IndexStream>>> = BTreeMap::new();
        let mut delayed = Vec::new();
        let mut nodes = ExprSet::new();
        let mut absent = false;
        let mut drop_uids = false;
        let mut contextual = Vec::new();
        let empty_input = children.is_empty();

        for mut child in children {
            if let Some(node) = child.current_node() {
                nodes.insert(node.clone());
            }
            match child.context() {
                StreamContext::Present | StreamContext::ExceededValueThreshold => {
                    match child.peek() {
                        Some(entry) => {
                            let shard = entry.shard.clone();
                            positioned.entry(shard).or_default().push(child);
                        }
                        None => absent = true,
                    }
                }
                StreamContext::Absent => absent = true,
                context => {
                    if matches!(
                        context,
                        StreamContext::DelayedField | StreamContext::ExceededTermThreshold
                    ) {
                        drop_uids = true;
                    }
                    contextual.push(context);
                    if let Some(node) = child.current_node() {
                        delayed.push(node.clone());
                    }
                }
            }
        }

        let context = if absent || empty_input {
            StreamContext::Absent
        } else if positioned.is_empty() {
            if contextual
                .iter()
                .all(|c| *c == StreamContext::Unindexed)
            {
                StreamContext::Unindexed
            } else if drop_uids {
                StreamContext::DelayedField
            } else {
                StreamContext::Ignored
            }
        } else if positioned
            .values()
            .flatten()
            .all(|c| c.context() == StreamContext::ExceededValueThreshold)
        {
            StreamContext::ExceededValueThreshold
        } else {
            StreamContext::Present
        };

        let mut merged = Intersection {
            children: positioned,
            delayed,
            drop_uids,
            context,
            node: nodes.and_node(),
            head: None,
        };
        if absent || empty_input {
            merged.children.clear();
        } else if matches!(
            merged.context,
            StreamContext::Present | StreamContext::ExceededValueThreshold
        ) {
            merged.advance()?;
            if merged.head.is_none() && merged.context == StreamContext::Present {
                merged.context = StreamContext::Absent;
            }
        }
        Ok(merged)
    }

    /// Computes the next emitted entry, or leaves `head` empty at exhaustion.
    fn advance(&mut self) -> Result<()> {
        self.head = None;
        while self.head.is_none() && !self.children.is_empty() {
            if self.children.len() == 1 {
                self.emit_single_key()?;
            } else {
                self.pivot()?;
            }
        }
        Ok(())
    }

    /// All children share one key: combine their results, then step each
    /// child past the key.
    fn emit_single_key(&mut self) -> Result<()> {
        let Some((key, mut group)) = self.children.pop_first() else {
            return Ok(());
        };
        log::trace!("intersection at {key}, {} children", group.len());

        let mut infos = group.iter_mut().filter_map(|child| {
            child.peek().map(|e| {
                let mut info = e.info.clone();
                if e.shard != key && e.shard.covers(&key) {
                    // A day-level count cannot vouch for membership in one
                    // of the day's shards; its subtree must be re-checked
                    // on the retrieved documents.
                    if let Some(node) = info.node().cloned() {
                        info.apply_node(&Expr::delayed(node));
                    }
                }
                info
            })
        });
        // The group is never empty; every stream in it was peeked when keyed.
        let mut combined = match infos.next() {
            Some(first) => first,
            None => return Ok(()),
        };
        for info in infos {
            combined = combined.intersect(&info, &self.delayed);
        }
        combined = combined.attach_delayed(&self.delayed);

        if combined.count() != 0 {
            if self.drop_uids {
                combined = combined.without_uids();
            }
            self.head = Some(ShardEntry::new(key.clone(), combined));
        }

        for mut child in group {
            let head_shard = match child.peek() {
                Some(entry) => entry.shard.clone(),
                None => continue,
            };
            if head_shard != key {
                // Day-positioned child broadcasting over shard keys: leave
                // it in place, re-keyed by its own head.
                self.children.entry(head_shard).or_default().push(child);
                continue;
            }
            child.pop()?;
            match child.peek() {
                Some(next) => {
                    let shard = next.shard.clone();
                    self.children.entry(shard).or_default().push(child);
                }
                None => {
                    // One exhausted child empties the conjunction.
                    self.children.clear();
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Heads disagree: seek every lagging child to the highest head.
    fn pivot(&mut self) -> Result<()> {
        let Some(target) = self.children.last_key_value().map(|(k, _)| k.clone()) else {
            return Ok(());
        };
        log::trace!("intersection pivot to {target}");
        let groups = std::mem::take(&mut self.children);
        for (key, group) in groups {
            for mut child in group {
                if key == target {
                    self.children.entry(key.clone()).or_default().push(child);
                    continue;
                }
                match child.seek(&target)? {
                    Some(head) => {
                        let key = if head.covers(&target) {
                            target.clone()
                        } else {
                            head
                        };
                        self.children.entry(key).or_default().push(child);
                    }
                    None => {
                        self.children.clear();
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}

impl IndexStream for Intersection {
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
            .ok_or_else(|| Error::invalid_operation("pop on exhausted intersection"))?;
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
                match child.seek(target)? {
                    Some(head) => {
                        self.children.entry(head).or_default().push(child);
                    }
                    None => {
                        self.children.clear();
                        return Ok(None);
                    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::index_info::IndexInfo;
    use crate::stream::ScannerStream;

    fn uid_entry(shard: &str, node: &ExprRef, uids: &[&str]) -> ShardEntry {
        let mut info = IndexInfo::from_uids(uids.iter().copied()).unwrap();
        info.apply_node(node);
        ShardEntry::new(shard, info)
    }

    fn uid_stream(node: ExprRef, entries: Vec<ShardEntry>) -> Box<dyn IndexStream> {
        Box::new(ScannerStream::with_data(entries.into_iter(), node))
    }

    fn term(field: &str) -> ExprRef {
        Expr::term(field, "VALUE")
    }

    #[test]
    fn same_shard_streams_intersect_identifiers() {
        let a = term("A");
        let b = term("B");
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![uid_entry("20190314_0", &a, &["doc1", "doc2", "doc3"])]),
            uid_stream(b.clone(), vec![uid_entry("20190314_0", &b, &["doc2", "doc3", "doc4"])]),
        ])
        .unwrap();

        assert_eq!(i.context(), StreamContext::Present);
        let entry = i.pop().unwrap();
        assert_eq!(entry.shard, "20190314_0");
        assert_eq!(entry.info.uids().collect::<Vec<_>>(), ["doc2", "doc3"]);
        assert!(i.peek().is_none());
        assert_eq!(
            i.current_node().unwrap().canonical(),
            "(A == 'VALUE' && B == 'VALUE')"
        );
    }

    #[test]
    fn disjoint_shard_streams_are_absent() {
        let a = term("A");
        let b = term("B");
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![uid_entry("20190314_0", &a, &["doc1"])]),
            uid_stream(b.clone(), vec![uid_entry("20190315_0", &b, &["doc1"])]),
        ])
        .unwrap();
        assert!(i.peek().is_none());
        assert_eq!(i.context(), StreamContext::Absent);
    }

    #[test]
    fn pivot_skips_to_the_shared_shard() {
        let a = term("A");
        let b = term("B");
        let mut i = Intersection::new(vec![
            uid_stream(
                a.clone(),
                vec![
                    uid_entry("20190314_0", &a, &["doc1"]),
                    uid_entry("20190314_5", &a, &["doc2"]),
                ],
            ),
            uid_stream(b.clone(), vec![uid_entry("20190314_5", &b, &["doc2"])]),
        ])
        .unwrap();
        let entry = i.pop().unwrap();
        assert_eq!(entry.shard, "20190314_5");
        assert_eq!(entry.info.uids().collect::<Vec<_>>(), ["doc2"]);
        assert!(i.peek().is_none());
    }

    #[test]
    fn day_entry_broadcasts_over_shards() {
        let a = term("A");
        let b = term("B");
        let mut day_info = IndexInfo::with_count(20);
        day_info.apply_node(&a);
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![ShardEntry::new("20190314", day_info)]),
            uid_stream(
                b.clone(),
                vec![
                    uid_entry("20190314_2", &b, &["doc1"]),
                    uid_entry("20190314_11", &b, &["doc2"]),
                ],
            ),
        ])
        .unwrap();

        let first = i.pop().unwrap();
        assert_eq!(first.shard, "20190314_2");
        assert_eq!(first.info.uids().collect::<Vec<_>>(), ["doc1"]);
        let second = i.pop().unwrap();
        assert_eq!(second.shard, "20190314_11");
        assert_eq!(second.info.uids().collect::<Vec<_>>(), ["doc2"]);
        assert!(i.peek().is_none());
    }

    #[test]
    fn broadcast_day_term_is_delayed_in_shard_results() {
        let a = term("A");
        let b = term("B");
        let mut day_info = IndexInfo::with_count(30);
        day_info.apply_node(&a);
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![ShardEntry::new("20190314", day_info)]),
            uid_stream(
                b.clone(),
                vec![uid_entry("20190314_4", &b, &["doc1", "doc2", "doc3", "doc4"])],
            ),
        ])
        .unwrap();

        let entry = i.pop().unwrap();
        assert_eq!(entry.shard, "20190314_4");
        assert_eq!(entry.info.uids().count(), 4);
        assert_eq!(
            entry.info.node().unwrap().canonical(),
            "(B == 'VALUE' && _Delayed_(A == 'VALUE'))"
        );
        let m = entry.info.matches().next().unwrap();
        assert_eq!(
            m.node().unwrap().canonical(),
            "(B == 'VALUE' && _Delayed_(A == 'VALUE'))"
        );
        assert!(i.peek().is_none());
    }

    #[test]
    fn absent_child_empties_the_intersection() {
        let a = term("A");
        let b = term("B");
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![uid_entry("20190314_0", &a, &["doc1"])]),
            Box::new(ScannerStream::absent(b)),
        ])
        .unwrap();
        assert_eq!(i.context(), StreamContext::Absent);
        assert!(i.peek().is_none());
        assert!(i.pop().is_err());
    }

    #[test]
    fn empty_data_stream_is_absent() {
        let a = term("A");
        let b = term("B");
        let i = Intersection::new(vec![
            uid_stream(a.clone(), vec![uid_entry("20190314_0", &a, &["doc1"])]),
            Box::new(ScannerStream::exceeded_value_threshold(
                std::iter::empty(),
                b,
            )),
        ])
        .unwrap();
        assert_eq!(i.context(), StreamContext::Absent);
    }

    #[test]
    fn unindexed_sibling_rides_along_as_delayed() {
        let a = term("A");
        let b = term("B");
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![uid_entry("20190314_0", &a, &["doc1"])]),
            Box::new(ScannerStream::unindexed(b.clone())),
        ])
        .unwrap();

        assert_eq!(i.context(), StreamContext::Present);
        let entry = i.pop().unwrap();
        assert_eq!(entry.info.uids().collect::<Vec<_>>(), ["doc1"]);
        let m = entry.info.matches().next().unwrap();
        assert_eq!(
            m.node().unwrap().canonical(),
            "(A == 'VALUE' && B == 'VALUE')"
        );
    }

    #[test]
    fn delayed_field_sibling_drops_identifiers() {
        let a = term("A");
        let delayed = Expr::delayed(term("D"));
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![uid_entry("20190314_0", &a, &["doc1", "doc2"])]),
            Box::new(ScannerStream::delayed_field(delayed.clone())),
        ])
        .unwrap();

        let entry = i.pop().unwrap();
        assert_eq!(entry.shard, "20190314_0");
        assert_eq!(entry.info.matches().count(), 0, "identifiers are dropped");
        assert_eq!(entry.info.count(), 2);
        assert_eq!(
            i.current_node().unwrap().canonical(),
            "(A == 'VALUE' && _Delayed_(D == 'VALUE'))"
        );
    }

    #[test]
    fn exceeded_term_sibling_drops_identifiers() {
        let a = term("A");
        let marker = Expr::exceeded_term(term("T"));
        let mut i = Intersection::new(vec![
            uid_stream(a.clone(), vec![uid_entry("20190314_0", &a, &["doc1"])]),
            Box::new(ScannerStream::exceeded_term_threshold(marker)),
        ])
        .unwrap();
        let entry = i.pop().unwrap();
        assert_eq!(entry.info.matches().count(), 0);
        assert_eq!(entry.info.count(), 1);
    }

    #[test]
    fn contextual_only_children_emit_nothing() {
        let i = Intersection::new(vec![
            Box::new(ScannerStream::unindexed(term("A"))) as Box<dyn IndexStream>,
            Box::new(ScannerStream::unindexed(term("B"))),
        ])
        .unwrap();
        assert_eq!(i.context(), StreamContext::Unindexed);

        let i = Intersection::new(vec![
            Box::new(ScannerStream::unindexed(term("A"))) as Box<dyn IndexStream>,
            Box::new(ScannerStream::delayed_field(Expr::delayed(term("D")))),
        ])
        .unwrap();
        assert_eq!(i.context(), StreamContext::DelayedField);
    }

    #[test]
    fn zero_count_keys_are_skipped() {
        let a = term("A");
        let b = term("B");
        let mut i = Intersection::new(vec![
            uid_stream(
                a.clone(),
                vec![
                    uid_entry("20190314_0", &a, &["doc1"]),
                    uid_entry("20190314_1", &a, &["doc7"]),
                ],
            ),
            uid_stream(
                b.clone(),
                vec![
                    uid_entry("20190314_0", &b, &["doc2"]),
                    uid_entry("20190314_1", &b, &["doc7"]),
                ],
            ),
        ])
        .unwrap();

        // The streams share shard _0 but no identifiers there.
        let entry = i.pop().unwrap();
        assert_eq!(entry.shard, "20190314_1");
        assert_eq!(entry.info.uids().collect::<Vec<_>>(), ["doc7"]);
    }

    #[test]
    fn seek_forwards_all_children() {
        let a = term("A");
        let b = term("B");
        let mut i = Intersection::new(vec![
            uid_stream(
                a.clone(),
                vec![
                    uid_entry("20190314_0", &a, &["doc1"]),
                    uid_entry("20190315_0", &a, &["doc2"]),
                ],
            ),
            uid_stream(
                b.clone(),
                vec![
                    uid_entry("20190314_0", &b, &["doc1"]),
                    uid_entry("20190315_0", &b, &["doc2"]),
                ],
            ),
        ])
        .unwrap();

        assert_eq!(i.seek(&"20190315".into()).unwrap().unwrap(), "20190315_0");
        let entry = i.pop().unwrap();
        assert_eq!(entry.shard, "20190315_0");
        assert!(i.peek().is_none());
    }

    #[test]
    fn empty_input_is_absent() {
        let i = Intersection::new(Vec::new()).unwrap();
        assert_eq!(i.context(), StreamContext::Absent);
    }
}
