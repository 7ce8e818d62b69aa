//! Typed store facade: put/get/delete and their batch forms, bound to one
//! bucket and one record type.

use crate::db::Database;
use crate::record::Record;
use burrow_common::{validate_bucket_name, validate_index_value, validate_key, BurrowError, Result};
use burrow_wal::{IndexOp, Operation};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

pub(crate) fn encode_record<T: Record>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| BurrowError::Codec {
        context: "encode record",
        source: e,
    })
}

pub(crate) fn decode_record<T: Record>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| BurrowError::Codec {
        context: "decode record",
        source: e,
    })
}

/// A typed view over one bucket of a [`Database`].
///
/// Reads consult the operation buffer before the partition store, so a
/// write is visible to the writer (and everyone else in the process) before
/// any flush happens.
#[derive(Clone)]
pub struct Store<T: Record> {
    pub(crate) database: Database,
    pub(crate) bucket: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Store<T> {
    /// Creates a store for `T` over the named bucket.
    pub fn new(database: &Database, bucket: &str) -> Result<Self> {
        validate_bucket_name(bucket)?;
        Ok(Self {
            database: database.clone(),
            bucket: bucket.to_string(),
            _record: PhantomData,
        })
    }

    /// Retrieves a record by key, buffer first.
    pub async fn get(&self, ctx: &CancellationToken, key: &str) -> Result<T> {
        validate_key(key)?;

        if let Some(op) = self.database.buffered_operation(self.bucket.as_bytes(), key) {
            if op.is_put {
                return decode_record(&op.value);
            }
            // Buffered tombstone hides anything already flushed.
            return Err(BurrowError::KeyNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            });
        }

        if ctx.is_cancelled() {
            return Err(BurrowError::Cancelled);
        }
        let read = self.database.tree().begin_read();
        let partition = read
            .partition(self.bucket.as_bytes())
            .ok_or_else(|| BurrowError::BucketNotFound {
                bucket: self.bucket.clone(),
            })?;
        let data = partition
            .get(key.as_bytes())
            .ok_or_else(|| BurrowError::KeyNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })?;
        decode_record(data)
    }

    /// Retrieves multiple records by key. Missing keys are simply absent
    /// from the result; per-key decode failures surface together as a
    /// [`BurrowError::PartialBatch`].
    pub async fn get_batch(
        &self,
        ctx: &CancellationToken,
        keys: &[&str],
    ) -> Result<HashMap<String, T>> {
        for key in keys {
            validate_key(key)?;
        }

        let mut results = HashMap::new();
        let mut failed: HashMap<String, BurrowError> = HashMap::new();
        let mut resolved: HashSet<&str> = HashSet::new();

        for &key in keys {
            if let Some(op) = self.database.buffered_operation(self.bucket.as_bytes(), key) {
                resolved.insert(key);
                if op.is_put {
                    match decode_record(&op.value) {
                        Ok(item) => {
                            results.insert(key.to_string(), item);
                        }
                        Err(e) => {
                            failed.insert(key.to_string(), e);
                        }
                    }
                }
                // A buffered tombstone resolves the key as absent.
            }
        }

        if ctx.is_cancelled() {
            return Err(BurrowError::Cancelled);
        }
        let read = self.database.tree().begin_read();
        if let Some(partition) = read.partition(self.bucket.as_bytes()) {
            for &key in keys {
                if resolved.contains(key) {
                    continue;
                }
                if let Some(data) = partition.get(key.as_bytes()) {
                    match decode_record(data) {
                        Ok(item) => {
                            results.insert(key.to_string(), item);
                        }
                        Err(e) => {
                            failed.insert(key.to_string(), e);
                        }
                    }
                }
            }
        }

        if !failed.is_empty() {
            return Err(BurrowError::PartialBatch {
                successful_count: results.len(),
                failed,
            });
        }
        Ok(results)
    }

    /// Stores a record, updating any indexes whose value changed.
    pub async fn put(&self, ctx: &CancellationToken, value: &T) -> Result<()> {
        let key = value.key().to_string();
        validate_key(&key)?;

        // The pre-image drives minimal index deltas; a failed read means no
        // prior record.
        let old = self.get(ctx, &key).await.ok();
        let index_ops = self.index_deltas(old.as_ref(), Some(value))?;
        let data = encode_record(value)?;

        let op = Operation::put(self.bucket.as_bytes().to_vec(), key, data, index_ops);
        self.database.write_operation(ctx, op).await
    }

    /// Stores multiple records with one WAL append.
    pub async fn put_batch(&self, ctx: &CancellationToken, values: &[T]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut keys = Vec::with_capacity(values.len());
        for value in values {
            validate_key(value.key())?;
            keys.push(value.key());
        }

        let old_values = self.get_batch(ctx, &keys).await?;

        let mut ops = Vec::with_capacity(values.len());
        for value in values {
            let index_ops = self.index_deltas(old_values.get(value.key()), Some(value))?;
            let data = encode_record(value)?;
            ops.push(Operation::put(
                self.bucket.as_bytes().to_vec(),
                value.key().to_string(),
                data,
                index_ops,
            ));
        }
        self.database.write_operations(ctx, ops).await
    }

    /// Deletes a record by key. Deleting an absent key succeeds.
    pub async fn delete(&self, ctx: &CancellationToken, key: &str) -> Result<()> {
        validate_key(key)?;

        let old = self.get(ctx, key).await.ok();
        let index_ops = self.index_deltas(old.as_ref(), None)?;

        let op = Operation::delete(self.bucket.as_bytes().to_vec(), key.to_string(), index_ops);
        self.database.write_operation(ctx, op).await
    }

    /// Deletes multiple records with one WAL append.
    pub async fn delete_batch(&self, ctx: &CancellationToken, keys: &[&str]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            validate_key(key)?;
        }

        let old_values = self.get_batch(ctx, keys).await?;

        let mut ops = Vec::with_capacity(keys.len());
        for &key in keys {
            let index_ops = self.index_deltas(old_values.get(key), None)?;
            ops.push(Operation::delete(
                self.bucket.as_bytes().to_vec(),
                key.to_string(),
                index_ops,
            ));
        }
        self.database.write_operations(ctx, ops).await
    }

    /// Computes the index deltas between two record states. `None` stands
    /// for "absent": a put of a new record has `old = None`, a delete has
    /// `new = None`. Indexes whose value is unchanged emit nothing.
    fn index_deltas(&self, old: Option<&T>, new: Option<&T>) -> Result<Vec<IndexOp>> {
        let mut deltas = Vec::new();
        for spec in T::indexes() {
            let old_value = old
                .and_then(|record| record.index_value(spec.name))
                .unwrap_or_default();
            let new_value = new
                .and_then(|record| record.index_value(spec.name))
                .unwrap_or_default();
            if old_value != new_value {
                validate_index_value(spec.name, &new_value)?;
                deltas.push(IndexOp {
                    index: spec.name.to_string(),
                    old_value,
                    new_value,
                });
            }
        }
        Ok(deltas)
    }
}
