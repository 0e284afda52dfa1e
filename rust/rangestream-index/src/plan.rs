//! Conversion of merged streams into executable query plans.

use rangestream_common::Result;

use crate::entry::root_uid;
use crate::expr::ExprRef;
use crate::shard::ShardId;
use crate::stream::{IndexStream, ShardEntry};

/// A range of the event table one plan step will scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardRange {
    /// A single document within a shard.
    Document { shard: ShardId, uid: String },
    /// One whole shard.
    Shard(ShardId),
    /// Every shard of a day.
    Day(ShardId),
}

/// One step of the query plan: the ranges to scan and the expression to
/// evaluate over them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub node: Option<ExprRef>,
    pub ranges: Vec<ShardRange>,
}

/// Scan ranges for one emitted entry. Retained identifiers become document
/// ranges (truncated to root documents when `tld` is set); count-only
/// results fall back to the shard, or the whole day for day-level keys.
pub fn ranges_for(entry: &ShardEntry, tld: bool) -> Vec<ShardRange> {
    let info = &entry.info;
    if info.only_events() && info.matches().count() > 0 {
        info.uids()
            .map(|uid| ShardRange::Document {
                shard: entry.shard.clone(),
                uid: if tld { root_uid(uid).to_string() } else { uid.to_string() },
            })
            .collect()
    } else if info.count() == 0 {
        Vec::new()
    } else if entry.shard.is_day() {
        vec![ShardRange::Day(entry.shard.clone())]
    } else {
        vec![ShardRange::Shard(entry.shard.clone())]
    }
}

/// Drains a stream into plan steps, one per emitted shard key. Keys whose
/// results are empty produce no step.
pub fn stream_plans(stream: &mut dyn IndexStream, tld: bool) -> Result<Vec<QueryPlan>> {
    let mut plans = Vec::new();
    while stream.peek().is_some() {
        let entry = stream.pop()?;
        let ranges = ranges_for(&entry, tld);
        if ranges.is_empty() {
            continue;
        }
        let node = entry
            .info
            .node()
            .cloned()
            .or_else(|| stream.current_node().cloned());
        plans.push(QueryPlan { node, ranges });
    }
    Ok(plans)
}
