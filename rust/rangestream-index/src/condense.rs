//! Day-level rollup of shard entry streams.
//!
//! A term that hits most shards of a day is cheaper to plan as one day-level
//! range than as dozens of shard ranges. [`DayRollup`] watches a day's worth
//! of consecutive entries and, when the day exceeds the configured shard or
//! identifier caps, replaces them with a single count-only entry at the bare
//! day key.

use std::collections::VecDeque;

use crate::expr::ExprSet;
use crate::index_info::IndexInfo;
use crate::shard::ShardId;
use crate::stream::ShardEntry;

/// Iterator adapter that collapses oversized days to a single day-level
/// entry. Days under both caps pass through untouched.
pub struct DayRollup<I: Iterator<Item = ShardEntry>> {
    entries: std::iter::Peekable<I>,
    shards_per_day: usize,
    max_ids: usize,
    pending: VecDeque<ShardEntry>,
}

impl<I: Iterator<Item = ShardEntry>> DayRollup<I> {
    /// `shards_per_day` caps how many shard-level entries a day may emit,
    /// and `max_ids` caps the day's total identifier count, before the day
    /// collapses to its rollup key.
    pub fn new(entries: I, shards_per_day: usize, max_ids: usize) -> DayRollup<I> {
        DayRollup {
            entries: entries.peekable(),
            shards_per_day,
            max_ids,
            pending: VecDeque::new(),
        }
    }
}

impl<I: Iterator<Item = ShardEntry>> Iterator for DayRollup<I> {
    type Item = ShardEntry;

    fn next(&mut self) -> Option<ShardEntry> {
        if let Some(entry) = self.pending.pop_front() {
            return Some(entry);
        }

        let first = self.entries.next()?;
        let day = first.shard.day().to_string();
        let mut buffered = vec![first];
        while let Some(next) = self.entries.next_if(|e| e.shard.day() == day) {
            buffered.push(next);
        }

        let shard_entries = buffered.iter().filter(|e| !e.shard.is_day()).count();
        let mut total_ids: i64 = 0;
        let mut unbounded = false;
        for entry in &buffered {
            if entry.info.is_unbounded() {
                unbounded = true;
            } else {
                total_ids += entry.info.count();
            }
        }

        let oversized =
            unbounded || shard_entries > self.shards_per_day || total_ids > self.max_ids as i64;
        if !oversized {
            self.pending.extend(buffered);
            return self.pending.pop_front();
        }

        log::trace!(
            "rolling up day {day}: {shard_entries} shard entries, {total_ids} ids{}",
            if unbounded { " (unbounded)" } else { "" }
        );
        let mut nodes = ExprSet::new();
        for entry in &buffered {
            if let Some(node) = entry.info.node() {
                nodes.insert_or_terms(node);
            }
        }
        let mut info = if unbounded {
            IndexInfo::unbounded()
        } else {
            IndexInfo::with_count(total_ids)
        };
        if let Some(node) = nodes.or_node() {
            info.apply_node(&node);
        }
        Some(ShardEntry::new(ShardId::new(day), info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::index_info::IndexInfo;

    fn shard_entry(shard: &str, uids: &[&str]) -> ShardEntry {
        let mut info = IndexInfo::from_uids(uids.iter().copied()).unwrap();
        info.apply_node(&Expr::term("FOO", "bar"));
        ShardEntry::new(shard, info)
    }

    #[test]
    fn small_days_pass_through() {
        let entries = vec![
            shard_entry("20190314_0", &["doc1"]),
            shard_entry("20190314_1", &["doc2"]),
            shard_entry("20190315_0", &["doc3"]),
        ];
        let out: Vec<ShardEntry> = DayRollup::new(entries.clone().into_iter(), 25, 100).collect();
        assert_eq!(out, entries);
    }

    #[test]
    fn too_many_shards_collapse_to_the_day() {
        let entries: Vec<ShardEntry> = (0..49)
            .map(|i| shard_entry(&format!("20190314_{i}"), &["doc1", "doc2", "doc3", "doc4"]))
            .collect();
        let out: Vec<ShardEntry> = DayRollup::new(entries.into_iter(), 25, 10_000).collect();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].shard, "20190314");
        assert!(out[0].shard.is_day());
        assert_eq!(out[0].info.count(), 49 * 4);
        assert_eq!(out[0].info.matches().count(), 0);
        assert_eq!(out[0].info.node().unwrap().canonical(), "FOO == 'bar'");
    }

    #[test]
    fn too_many_ids_collapse_to_the_day() {
        let entries = vec![
            shard_entry("20190314_0", &["doc1", "doc2", "doc3"]),
            shard_entry("20190314_1", &["doc4", "doc5", "doc6"]),
        ];
        let out: Vec<ShardEntry> = DayRollup::new(entries.into_iter(), 25, 4).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].shard, "20190314");
        assert_eq!(out[0].info.count(), 6);
    }

    #[test]
    fn unbounded_entries_force_the_rollup() {
        let entries = vec![
            shard_entry("20190314_0", &["doc1"]),
            ShardEntry::new("20190314_1", IndexInfo::unbounded()),
        ];
        let out: Vec<ShardEntry> = DayRollup::new(entries.into_iter(), 25, 1_000).collect();
        assert_eq!(out.len(), 1);
        assert!(out[0].info.is_unbounded());
    }

    #[test]
    fn only_the_oversized_day_collapses() {
        let mut entries: Vec<ShardEntry> = (0..30)
            .map(|i| shard_entry(&format!("20190314_{i}"), &["doc1"]))
            .collect();
        entries.push(shard_entry("20190315_0", &["doc9"]));
        let out: Vec<ShardEntry> = DayRollup::new(entries.into_iter(), 25, 1_000).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].shard, "20190314");
        assert_eq!(out[1].shard, "20190315_0");
        assert_eq!(out[1].info.uids().collect::<Vec<_>>(), ["doc9"]);
    }
}
