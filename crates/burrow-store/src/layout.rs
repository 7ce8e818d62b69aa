//! Partition naming and composite index keys.
//!
//! Base partition name is the bucket name verbatim. Each declared index gets
//! its own partition named `<bucket>_index_<index>`, whose keys are
//! `<indexed-value> 0x00 <record-key>` with empty values. Indexed values and
//! record keys cannot contain NUL, so the first NUL splits the halves and
//! the partition sorts by indexed value first, record key second.

/// Returns the partition name for one index of a bucket.
pub fn index_partition_name(bucket: &[u8], index: &str) -> Vec<u8> {
    let mut name = Vec::with_capacity(bucket.len() + 7 + index.len());
    name.extend_from_slice(bucket);
    name.extend_from_slice(b"_index_");
    name.extend_from_slice(index.as_bytes());
    name
}

/// Builds the composite key for an index entry.
pub fn composite_key(value: &str, record_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(value.len() + 1 + record_key.len());
    key.extend_from_slice(value.as_bytes());
    key.push(0);
    key.extend_from_slice(record_key.as_bytes());
    key
}

/// The `<value> 0x00` prefix that selects one indexed value's block.
pub fn value_prefix(value: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(value.len() + 1);
    prefix.extend_from_slice(value.as_bytes());
    prefix.push(0);
    prefix
}

/// Splits a composite key at the first NUL into (indexed value, record key).
pub fn split_composite(composite: &[u8]) -> Option<(&[u8], &[u8])> {
    let separator = composite.iter().position(|&b| b == 0)?;
    Some((&composite[..separator], &composite[separator + 1..]))
}
