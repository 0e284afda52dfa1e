//! Aggregation of raw term postings into per-shard lookup results.
//!
//! The global index stores one posting per (shard, datatype) cell of a term:
//! a list of document identifiers plus a count, with the identifier list
//! dropped at ingest time once it grew past a threshold (the `ignore` flag).
//! [`EntryParser`] folds the consecutive postings of one shard into a single
//! [`ShardEntry`] and attaches the term's expression to it.

use std::collections::BTreeSet;

use crate::expr::ExprRef;
use crate::index_info::{IndexInfo, IndexMatch};
use crate::shard::ShardId;
use crate::stream::ShardEntry;

/// Decoded identifier list of a single posting.
#[derive(Debug, Clone, Default)]
pub struct UidList {
    pub uids: Vec<String>,
    pub count: i64,
    /// Set at ingest time when the identifier list was dropped because the
    /// term matched too many documents; `count` is then the only record.
    pub ignore: bool,
}

/// One raw posting of a term: the shard, the datatype of the documents, and
/// the identifier list.
#[derive(Debug, Clone)]
pub struct TermPosting {
    pub shard: ShardId,
    pub datatype: String,
    pub uid_list: UidList,
}

impl TermPosting {
    pub fn new(shard: impl Into<ShardId>, datatype: impl Into<String>, uid_list: UidList) -> Self {
        TermPosting {
            shard: shard.into(),
            datatype: datatype.into(),
            uid_list,
        }
    }
}

/// Truncates a qualified identifier (`datatype NUL uid`) to its root
/// document: the first three dot-separated segments of the uid. Child
/// documents append further segments to their root's identifier.
pub fn root_uid(uid: &str) -> &str {
    let uid_start = uid.find('\0').map(|i| i + 1).unwrap_or(0);
    let mut dots = 0;
    for (i, b) in uid[uid_start..].char_indices() {
        if b == '.' {
            dots += 1;
            if dots == 3 {
                return &uid[..uid_start + i];
            }
        }
    }
    uid
}

/// Qualifies a document identifier with its datatype, the form carried by
/// [`IndexMatch`].
pub fn qualified_uid(datatype: &str, uid: &str) -> String {
    format!("{datatype}\0{uid}")
}

/// Folds shard-ordered [`TermPosting`]s into one [`ShardEntry`] per shard.
#[derive(Debug, Clone)]
pub struct EntryParser {
    node: ExprRef,
    parse_tld_uids: bool,
    collapse: bool,
}

impl EntryParser {
    pub fn new(node: ExprRef) -> EntryParser {
        EntryParser {
            node,
            parse_tld_uids: false,
            collapse: false,
        }
    }

    /// Truncate identifiers to their root document and deduplicate, for
    /// queries that retrieve whole document trees.
    pub fn parse_tld_uids(mut self, enabled: bool) -> EntryParser {
        self.parse_tld_uids = enabled;
        self
    }

    /// Drop identifiers and keep only counts, for plans that will scan
    /// shards wholesale anyway.
    pub fn collapse(mut self, enabled: bool) -> EntryParser {
        self.collapse = enabled;
        self
    }

    pub fn parse<I>(self, postings: I) -> ParsedEntries<I::IntoIter>
    where
        I: IntoIterator<Item = TermPosting>,
    {
        ParsedEntries {
            postings: postings.into_iter().peekable(),
            parser: self,
        }
    }
}

/// Iterator of aggregated shard entries, produced by [`EntryParser::parse`].
pub struct ParsedEntries<I: Iterator<Item = TermPosting>> {
    postings: std::iter::Peekable<I>,
    parser: EntryParser,
}

impl<I: Iterator<Item = TermPosting>> Iterator for ParsedEntries<I> {
    type Item = ShardEntry;

    fn next(&mut self) -> Option<ShardEntry> {
        let first = self.postings.next()?;
        let shard = first.shard.clone();

        let mut count = 0i64;
        let mut ignore = false;
        let mut uids: BTreeSet<String> = BTreeSet::new();

        let mut fold = |posting: TermPosting| {
            count += posting.uid_list.count;
            ignore |= posting.uid_list.ignore;
            for uid in posting.uid_list.uids {
                if uid.is_empty() {
                    log::warn!("dropping empty uid in shard {}", posting.shard);
                    continue;
                }
                uids.insert(qualified_uid(&posting.datatype, &uid));
            }
        };

        fold(first);
        while let Some(next) = self.postings.next_if(|next| next.shard == shard) {
            fold(next);
        }

        let tag_shard = |mut m: IndexMatch| {
            m.set_shard(shard.clone());
            m
        };
        let mut info = if ignore || self.parser.collapse {
            IndexInfo::with_count(count)
        } else if self.parser.parse_tld_uids {
            let roots: BTreeSet<&str> = uids.iter().map(|uid| root_uid(uid)).collect();
            IndexInfo::from_matches(
                roots
                    .into_iter()
                    .filter_map(|uid| IndexMatch::new(uid).ok())
                    .map(tag_shard),
            )
        } else {
            let mut info = IndexInfo::from_matches(
                uids.into_iter()
                    .filter_map(|uid| IndexMatch::new(uid).ok())
                    .map(tag_shard),
            );
            info.set_count(count);
            info
        };
        info.apply_node(&self.parser.node);
        Some(ShardEntry { shard, info })
    }
}
