//! Ordered partition engine for BurrowDB.
//!
//! This crate provides the storage capability the write-ahead layer and the
//! query executor are built on: named partitions of sorted byte keys with
//! atomic read/write transactions, cursor iteration, and single-file
//! persistence. Readers run without writers; one write transaction commits
//! at a time.

mod snapshot;
mod tree;
mod tx;

pub use tree::Tree;
pub use tx::{Partition, ReadTx, WriteTx};
