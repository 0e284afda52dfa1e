//! Query planning core for a time-sharded inverted index.
//!
//! A query arrives as an expression tree of field/value terms. For each term,
//! the global index yields a shard-ordered stream of hits: shard keys with
//! either concrete document identifiers or just cardinalities. This crate
//! merges those streams back up the expression tree — intersections for
//! conjunctions, unions for disjunctions — and turns the merged stream into
//! a plan of document, shard and day ranges to scan.
//!
//! # Overview
//!
//! - [`shard`] defines shard identifiers and their ordering: days before
//!   their shards, partitions in numeric order.
//! - [`expr`] is the expression tree the streams annotate their results with.
//! - [`entry`] folds raw index postings into per-shard lookup results.
//! - [`index_info`] holds those results and combines them under the query
//!   connectives.
//! - [`stream`] provides the leaf and merge streams.
//! - [`condense`] rolls oversized days up to day-level entries.
//! - [`plan`] converts a merged stream into executable scan ranges.

pub mod condense;
pub mod entry;
pub mod expr;
pub mod index_info;
pub mod plan;
pub mod shard;
pub mod stream;

pub use expr::{Expr, ExprRef};
pub use index_info::{IndexInfo, IndexMatch};
pub use shard::ShardId;
pub use stream::{IndexStream, Intersection, ScannerStream, ShardEntry, StreamContext, Union};
