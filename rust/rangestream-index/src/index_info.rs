//! Per-shard index lookup results.
//!
//! An [`IndexInfo`] is what a term lookup yields for one shard key: either the
//! concrete document identifiers that matched (with one [`IndexMatch`] per
//! identifier), or just a cardinality when identifiers were not kept. A count
//! of [`IndexInfo::UNBOUNDED`] means the term matched too broadly to measure.
//!
//! Infos combine under the query connectives with [`IndexInfo::union`] and
//! [`IndexInfo::intersect`]; both operations thread through the expression
//! tree responsible for each surviving identifier.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use rangestream_common::{Result, verify_arg};

use crate::expr::{ExprRef, ExprSet};
use crate::shard::ShardId;

/// How the expressions accumulated on a match relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    And,
    Or,
}

/// A single matched document identifier together with the expressions that
/// produced it.
///
/// Equality, ordering and hashing consider the identifier alone, so a set of
/// matches is a set of identifiers.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    uid: String,
    shard: Option<ShardId>,
    exprs: ExprSet,
    ty: MatchType,
}

impl IndexMatch {
    pub fn new(uid: impl Into<String>) -> Result<IndexMatch> {
        let uid = uid.into();
        verify_arg!(uid, !uid.is_empty());
        Ok(IndexMatch {
            uid,
            shard: None,
            exprs: ExprSet::new(),
            ty: MatchType::Or,
        })
    }

    pub fn with_expr(uid: impl Into<String>, expr: ExprRef) -> Result<IndexMatch> {
        let mut m = IndexMatch::new(uid)?;
        m.exprs.insert(expr);
        Ok(m)
    }

    fn from_parts(uid: String, exprs: ExprSet, ty: MatchType) -> IndexMatch {
        IndexMatch {
            uid,
            shard: None,
            exprs,
            ty,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn shard(&self) -> Option<&ShardId> {
        self.shard.as_ref()
    }

    pub fn set_shard(&mut self, shard: ShardId) {
        self.shard = Some(shard);
    }

    pub fn match_type(&self) -> MatchType {
        self.ty
    }

    /// Adds an expression; a logically equal expression already present is
    /// kept, preferring the marker-wrapped form.
    pub fn add_expr(&mut self, expr: ExprRef) {
        self.exprs.insert(expr);
    }

    pub fn exprs(&self) -> impl Iterator<Item = &ExprRef> {
        self.exprs.iter()
    }

    /// The combined expression for this identifier, joined per the match type.
    pub fn node(&self) -> Option<ExprRef> {
        match self.ty {
            MatchType::And => self.exprs.and_node(),
            MatchType::Or => self.exprs.or_node(),
        }
    }
}

impl PartialEq for IndexMatch {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for IndexMatch {}

impl PartialOrd for IndexMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexMatch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.uid.cmp(&other.uid)
    }
}

impl Hash for IndexMatch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

/// Lookup result for a term (or a combination of terms) at one shard key.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    uids: BTreeSet<IndexMatch>,
    count: i64,
    node: Option<ExprRef>,
}

impl IndexInfo {
    /// Cardinality sentinel for terms that matched too broadly to count.
    pub const UNBOUNDED: i64 = -1;

    pub fn empty() -> IndexInfo {
        IndexInfo::with_count(0)
    }

    pub fn unbounded() -> IndexInfo {
        IndexInfo::with_count(Self::UNBOUNDED)
    }

    /// A count-only result: the identifiers were not kept.
    pub fn with_count(count: i64) -> IndexInfo {
        IndexInfo {
            uids: BTreeSet::new(),
            count,
            node: None,
        }
    }

    pub fn from_matches(matches: impl IntoIterator<Item = IndexMatch>) -> IndexInfo {
        let uids: BTreeSet<IndexMatch> = matches.into_iter().collect();
        IndexInfo {
            count: uids.len() as i64,
            uids,
            node: None,
        }
    }

    pub fn from_uids<S: Into<String>>(uids: impl IntoIterator<Item = S>) -> Result<IndexInfo> {
        let matches = uids
            .into_iter()
            .map(IndexMatch::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(IndexInfo::from_matches(matches))
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub(crate) fn set_count(&mut self, count: i64) {
        self.count = count;
    }

    pub fn matches(&self) -> impl Iterator<Item = &IndexMatch> {
        self.uids.iter()
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.uids.iter().map(|m| m.uid())
    }

    pub fn node(&self) -> Option<&ExprRef> {
        self.node.as_ref()
    }

    pub fn is_unbounded(&self) -> bool {
        self.count == Self::UNBOUNDED
    }

    /// Returns `true` when every counted match is carried as an identifier,
    /// i.e. the count equals the number of retained identifiers.
    pub fn only_events(&self) -> bool {
        self.count == self.uids.len() as i64
    }

    /// Attaches an expression to this info and to every retained identifier.
    pub fn apply_node(&mut self, node: &ExprRef) {
        self.node = Some(node.clone());
        let uids = std::mem::take(&mut self.uids);
        self.uids = uids
            .into_iter()
            .map(|mut m| {
                m.add_expr(node.clone());
                m
            })
            .collect();
    }

    /// Drops the retained identifiers, keeping the count and expression.
    pub fn without_uids(mut self) -> IndexInfo {
        self.uids.clear();
        self
    }

    /// Combines two results under a disjunction.
    ///
    /// Identifiers survive only when both sides carry all of theirs;
    /// otherwise the result degrades to a count (the sum, or unbounded when
    /// either side is unbounded). Nodes in `delayed` are expressions that
    /// must be re-evaluated on retrieved documents; they join the combined
    /// expression and every surviving identifier.
    pub fn union(&self, other: &IndexInfo, delayed: &[ExprRef]) -> IndexInfo {
        let mut nodes = ExprSet::new();
        if let Some(n) = &self.node {
            nodes.insert_or_terms(n);
        }
        if let Some(n) = &other.node {
            nodes.insert_or_terms(n);
        }
        nodes.extend(delayed.iter().cloned());
        let node = nodes.or_node();

        if self.is_unbounded() || other.is_unbounded() {
            return IndexInfo {
                uids: BTreeSet::new(),
                count: Self::UNBOUNDED,
                node,
            };
        }
        if !self.only_events() || !other.only_events() {
            return IndexInfo {
                uids: BTreeSet::new(),
                count: self.count + other.count,
                node,
            };
        }

        let mut by_uid: BTreeMap<&str, ExprSet> = BTreeMap::new();
        for m in self.uids.iter().chain(other.uids.iter()) {
            let exprs = by_uid.entry(m.uid()).or_default();
            if let Some(n) = m.node() {
                exprs.insert_or_terms(&n);
            }
        }
        let uids: BTreeSet<IndexMatch> = by_uid
            .into_iter()
            .map(|(uid, mut exprs)| {
                exprs.extend(delayed.iter().cloned());
                IndexMatch::from_parts(uid.to_string(), exprs, MatchType::Or)
            })
            .collect();
        IndexInfo {
            count: uids.len() as i64,
            uids,
            node,
        }
    }

    /// Combines two results under a conjunction.
    ///
    /// When both sides carry all their identifiers, the result keeps the
    /// identifiers present on both. When only one side does, its identifiers
    /// are kept and narrowed by the other side's expression. When neither
    /// does, the result is the smaller count, or unbounded when either side
    /// is. Nodes in `delayed` join the combined expression and every
    /// retained identifier.
    pub fn intersect(&self, other: &IndexInfo, delayed: &[ExprRef]) -> IndexInfo {
        let mut nodes = ExprSet::new();
        if let Some(n) = &self.node {
            nodes.insert(n.clone());
        }
        if let Some(n) = &other.node {
            nodes.insert(n.clone());
        }
        nodes.extend(delayed.iter().cloned());
        let node = nodes.and_node();

        if self.only_events() && other.only_events() {
            let mut by_uid: BTreeMap<&str, (usize, ExprSet)> = BTreeMap::new();
            for m in self.uids.iter().chain(other.uids.iter()) {
                let slot = by_uid.entry(m.uid()).or_default();
                slot.0 += 1;
                if let Some(n) = m.node() {
                    slot.1.insert(n);
                }
            }
            let uids: BTreeSet<IndexMatch> = by_uid
                .into_iter()
                .filter(|(_, (sides, _))| *sides > 1)
                .map(|(uid, (_, mut exprs))| {
                    exprs.extend(delayed.iter().cloned());
                    IndexMatch::from_parts(uid.to_string(), exprs, MatchType::And)
                })
                .collect();
            IndexInfo {
                count: uids.len() as i64,
                uids,
                node,
            }
        } else if self.only_events() {
            Self::narrow(self, other.node.as_ref(), delayed, node)
        } else if other.only_events() {
            Self::narrow(other, self.node.as_ref(), delayed, node)
        } else {
            let count = if self.is_unbounded() || other.is_unbounded() {
                Self::UNBOUNDED
            } else {
                self.count.min(other.count)
            };
            IndexInfo {
                uids: BTreeSet::new(),
                count,
                node,
            }
        }
    }

    /// Attaches delayed evaluation nodes to this result: they join the
    /// combined expression and every retained identifier. The count is
    /// unchanged, since delayed nodes cannot narrow what the index reported.
    pub fn attach_delayed(&self, delayed: &[ExprRef]) -> IndexInfo {
        if delayed.is_empty() {
            return self.clone();
        }
        let mut nodes = ExprSet::new();
        if let Some(n) = &self.node {
            nodes.insert(n.clone());
        }
        nodes.extend(delayed.iter().cloned());
        let mut result = Self::narrow(self, None, delayed, nodes.and_node());
        result.count = self.count;
        result
    }

    /// Keeps the identifiers of `events`, attaching the expression of the
    /// count-only (or unbounded) partner and any delayed nodes to each.
    fn narrow(
        events: &IndexInfo,
        partner: Option<&ExprRef>,
        delayed: &[ExprRef],
        node: Option<ExprRef>,
    ) -> IndexInfo {
        let uids: BTreeSet<IndexMatch> = events
            .uids
            .iter()
            .map(|m| {
                let mut exprs = ExprSet::new();
                if let Some(n) = m.node() {
                    exprs.insert(n);
                }
                if let Some(n) = partner {
                    exprs.insert(n.clone());
                }
                exprs.extend(delayed.iter().cloned());
                IndexMatch::from_parts(m.uid().to_string(), exprs, MatchType::And)
            })
            .collect();
        IndexInfo {
            count: uids.len() as i64,
            uids,
            node,
        }
    }
}

impl PartialEq for IndexInfo {
    fn eq(&self, other: &Self) -> bool {
        self.count == other.count && self.uids == other.uids
    }
}

impl Eq for IndexInfo {}
