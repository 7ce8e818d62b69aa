//! Query model, planner, and executor.
//!
//! Conditions over indexed string fields are served by range scans of the
//! index partitions; everything else is evaluated against decoded records.
//! With several indexed conditions, the one with the smallest estimated
//! cardinality drives retrieval and the rest intersect into it.

use crate::layout;
use crate::record::{index_by_name, index_for_field, FieldValue, Record};
use crate::store::{decode_record, Store};
use burrow_common::{BurrowError, Result};
use burrow_tree::ReadTx;
use std::cmp::Ordering;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    #[default]
    Equals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

/// Result ordering of a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sorting {
    #[default]
    Unsorted,
    Ascending,
    Descending,
}

/// One field comparison. Conditions combine with AND semantics.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub value: FieldValue,
    pub operator: Operator,
}

impl Condition {
    /// Creates a condition with an explicit operator.
    pub fn new(field: impl Into<String>, value: impl Into<FieldValue>, operator: Operator) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            operator,
        }
    }

    /// Creates an equality condition.
    pub fn equals(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::new(field, value, Operator::Equals)
    }
}

/// A query over one store.
///
/// `index` names a declared index; with no conditions it supplies the scan
/// order, with conditions it selects the field for the in-memory sort of
/// the final results. `limit == 0` means unlimited.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub index: String,
    pub limit: usize,
    pub offset: usize,
    pub sort: Sorting,
    pub conditions: Vec<Condition>,
}

impl<T: Record> Store<T> {
    fn validate_query(&self, query: &Query) -> Result<()> {
        if !query.index.is_empty() && index_by_name::<T>(&query.index).is_none() {
            return Err(BurrowError::QueryInvalid {
                field: "index",
                value: query.index.clone(),
                reason: "index does not exist",
            });
        }
        for condition in &query.conditions {
            if !T::fields().contains(&condition.field.as_str()) {
                return Err(BurrowError::QueryInvalid {
                    field: "condition.field",
                    value: condition.field.clone(),
                    reason: "field does not exist",
                });
            }
        }
        Ok(())
    }

    /// Runs a query and returns the matching records.
    pub async fn query(&self, ctx: &CancellationToken, query: &Query) -> Result<Vec<T>> {
        self.validate_query(query)?;
        if ctx.is_cancelled() {
            return Err(BurrowError::Cancelled);
        }

        let mut results = Vec::new();
        {
            let read = self.database.tree().begin_read();

            let max_keys = if query.limit > 0 {
                query.offset + query.limit
            } else {
                0
            };

            let candidate_keys = if !query.conditions.is_empty() {
                self.candidate_keys(&read, &query.conditions, max_keys)
            } else if !query.index.is_empty() {
                // No conditions: the index cursor order is the result order.
                self.keys_from_index(&read, &query.index, query.sort, max_keys)
            } else {
                self.all_keys(&read, max_keys)
            };

            let start = query.offset.min(candidate_keys.len());
            let end = if query.limit > 0 {
                (start + query.limit).min(candidate_keys.len())
            } else {
                candidate_keys.len()
            };

            let partition = self.base_partition(&read)?;
            for key in &candidate_keys[start..end] {
                let Some(data) = partition.get(key.as_bytes()) else {
                    continue;
                };
                let Ok(item) = decode_record::<T>(data) else {
                    continue;
                };
                results.push(item);
            }
        }

        // Candidate gathering ignored the index order, so sort explicitly.
        if !query.index.is_empty() && !query.conditions.is_empty() {
            sort_results(&mut results, &query.index, query.sort);
        }

        Ok(results)
    }

    /// Counts the records a query would match, without fetching them.
    pub async fn query_count(&self, ctx: &CancellationToken, query: &Query) -> Result<usize> {
        self.validate_query(query)?;
        if ctx.is_cancelled() {
            return Err(BurrowError::Cancelled);
        }

        let read = self.database.tree().begin_read();
        if !query.conditions.is_empty() {
            Ok(self.candidate_keys(&read, &query.conditions, 0).len())
        } else if !query.index.is_empty() {
            Ok(self.count_keys_from_index(&read, &query.index))
        } else {
            Ok(self.count_all_keys(&read))
        }
    }

    fn base_partition<'r, 'a>(
        &self,
        read: &'r ReadTx<'a>,
    ) -> Result<burrow_tree::Partition<'r>> {
        read.partition(self.bucket.as_bytes())
            .ok_or_else(|| BurrowError::BucketNotFound {
                bucket: self.bucket.clone(),
            })
    }

    /// Returns keys matching all conditions.
    fn candidate_keys(
        &self,
        read: &ReadTx<'_>,
        conditions: &[Condition],
        max_keys: usize,
    ) -> Vec<String> {
        let mut indexed: Vec<&Condition> = Vec::new();
        let mut residual: Vec<&Condition> = Vec::new();
        for condition in conditions {
            let is_indexed = index_for_field::<T>(&condition.field).is_some()
                && condition.value.as_str().is_some();
            if is_indexed {
                indexed.push(condition);
            } else {
                residual.push(condition);
            }
        }

        let mut indexed_keys = Vec::new();
        if !indexed.is_empty() {
            let mut sized: Vec<(usize, &Condition)> = indexed
                .iter()
                .map(|&condition| {
                    (
                        self.count_keys_for_condition(read, condition, max_keys),
                        condition,
                    )
                })
                .collect();
            sized.sort_by_key(|(size, _)| *size);

            // Drive from the smallest candidate set; cap the scan only when
            // nothing further will filter it.
            let driver_max = if indexed.len() == 1 && residual.is_empty() {
                max_keys
            } else {
                0
            };
            indexed_keys = self.keys_for_condition(read, sized[0].1, driver_max);
            for &(_, condition) in &sized[1..] {
                let other = self.keys_for_condition(read, condition, 0);
                indexed_keys = intersect(&indexed_keys, &other);
            }
        }

        if residual.is_empty() {
            return indexed_keys;
        }

        let candidates = if indexed.is_empty() {
            None
        } else {
            Some(indexed_keys.as_slice())
        };
        self.scan_for_conditions(read, &residual, candidates, max_keys)
    }

    /// Range-scans one indexed condition's partition, returning matching
    /// record keys sorted.
    fn keys_for_condition(
        &self,
        read: &ReadTx<'_>,
        condition: &Condition,
        max_keys: usize,
    ) -> Vec<String> {
        let mut keys = Vec::new();
        let Some(spec) = index_for_field::<T>(&condition.field) else {
            return keys;
        };
        let Some(value) = condition.value.as_str() else {
            return keys;
        };
        let Some(partition) =
            read.partition(&layout::index_partition_name(self.bucket.as_bytes(), spec.name))
        else {
            return keys;
        };

        let prefix = layout::value_prefix(value);
        match condition.operator {
            Operator::Equals => {
                for (composite, _) in partition.range_from(&prefix) {
                    if !composite.starts_with(&prefix) {
                        break;
                    }
                    if max_keys > 0 && keys.len() >= max_keys {
                        break;
                    }
                    push_record_key(&mut keys, composite);
                }
            }
            Operator::GreaterThan => {
                for (composite, _) in partition.range_from(&prefix) {
                    // Skip the equals block first.
                    if composite.starts_with(&prefix) {
                        continue;
                    }
                    if max_keys > 0 && keys.len() >= max_keys {
                        break;
                    }
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part > value.as_bytes() {
                        push_record_key(&mut keys, composite);
                    } else {
                        break;
                    }
                }
            }
            Operator::GreaterThanOrEqual => {
                for (composite, _) in partition.range_from(&prefix) {
                    if max_keys > 0 && keys.len() >= max_keys {
                        break;
                    }
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part >= value.as_bytes() {
                        push_record_key(&mut keys, composite);
                    } else {
                        break;
                    }
                }
            }
            Operator::LessThan => {
                for (composite, _) in partition.iter() {
                    if max_keys > 0 && keys.len() >= max_keys {
                        break;
                    }
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part < value.as_bytes() {
                        push_record_key(&mut keys, composite);
                    } else {
                        break;
                    }
                }
            }
            Operator::LessThanOrEqual => {
                for (composite, _) in partition.iter() {
                    if max_keys > 0 && keys.len() >= max_keys {
                        break;
                    }
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part <= value.as_bytes() {
                        push_record_key(&mut keys, composite);
                    } else {
                        break;
                    }
                }
            }
        }
        keys.sort();
        keys
    }

    /// Counts keys an indexed condition would match, bounded by `max_keys`.
    /// Cheap cardinality estimate for driver selection.
    fn count_keys_for_condition(
        &self,
        read: &ReadTx<'_>,
        condition: &Condition,
        max_keys: usize,
    ) -> usize {
        let Some(spec) = index_for_field::<T>(&condition.field) else {
            return 0;
        };
        let Some(value) = condition.value.as_str() else {
            return 0;
        };
        let Some(partition) =
            read.partition(&layout::index_partition_name(self.bucket.as_bytes(), spec.name))
        else {
            return 0;
        };

        let prefix = layout::value_prefix(value);
        let mut count = 0;
        match condition.operator {
            Operator::Equals => {
                for (composite, _) in partition.range_from(&prefix) {
                    if !composite.starts_with(&prefix) {
                        break;
                    }
                    count += 1;
                    if max_keys > 0 && count >= max_keys {
                        break;
                    }
                }
            }
            Operator::GreaterThan => {
                for (composite, _) in partition.range_from(&prefix) {
                    if composite.starts_with(&prefix) {
                        continue;
                    }
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part <= value.as_bytes() {
                        break;
                    }
                    count += 1;
                    if max_keys > 0 && count >= max_keys {
                        break;
                    }
                }
            }
            Operator::GreaterThanOrEqual => {
                for (composite, _) in partition.range_from(&prefix) {
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part < value.as_bytes() {
                        break;
                    }
                    count += 1;
                    if max_keys > 0 && count >= max_keys {
                        break;
                    }
                }
            }
            Operator::LessThan => {
                for (composite, _) in partition.iter() {
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part >= value.as_bytes() {
                        break;
                    }
                    count += 1;
                    if max_keys > 0 && count >= max_keys {
                        break;
                    }
                }
            }
            Operator::LessThanOrEqual => {
                for (composite, _) in partition.iter() {
                    let Some((value_part, _)) = layout::split_composite(composite) else {
                        continue;
                    };
                    if value_part > value.as_bytes() {
                        break;
                    }
                    count += 1;
                    if max_keys > 0 && count >= max_keys {
                        break;
                    }
                }
            }
        }
        count
    }

    /// Scans records and returns keys matching all residual conditions.
    /// With a candidate set, only those keys are decoded; otherwise the
    /// whole base partition is scanned.
    fn scan_for_conditions(
        &self,
        read: &ReadTx<'_>,
        conditions: &[&Condition],
        candidates: Option<&[String]>,
        max_keys: usize,
    ) -> Vec<String> {
        let mut keys = Vec::new();
        let Some(partition) = read.partition(self.bucket.as_bytes()) else {
            return keys;
        };

        match candidates {
            Some(candidates) => {
                for key in candidates {
                    let Some(data) = partition.get(key.as_bytes()) else {
                        continue;
                    };
                    let Ok(item) = decode_record::<T>(data) else {
                        continue;
                    };
                    if conditions
                        .iter()
                        .all(|&condition| matches_condition(&item, condition))
                    {
                        keys.push(key.clone());
                        if max_keys > 0 && keys.len() >= max_keys {
                            break;
                        }
                    }
                }
            }
            None => {
                for (key_bytes, data) in partition.iter() {
                    let Ok(item) = decode_record::<T>(data) else {
                        continue;
                    };
                    if conditions
                        .iter()
                        .all(|&condition| matches_condition(&item, condition))
                    {
                        keys.push(String::from_utf8_lossy(key_bytes).into_owned());
                        if max_keys > 0 && keys.len() >= max_keys {
                            break;
                        }
                    }
                }
            }
        }
        keys
    }

    /// Returns all base-partition keys in order, up to `max_keys` if > 0.
    fn all_keys(&self, read: &ReadTx<'_>, max_keys: usize) -> Vec<String> {
        let mut keys = Vec::new();
        let Some(partition) = read.partition(self.bucket.as_bytes()) else {
            return keys;
        };
        for (key_bytes, _) in partition.iter() {
            if max_keys > 0 && keys.len() >= max_keys {
                break;
            }
            keys.push(String::from_utf8_lossy(key_bytes).into_owned());
        }
        keys
    }

    fn count_all_keys(&self, read: &ReadTx<'_>) -> usize {
        read.partition(self.bucket.as_bytes())
            .map(|partition| partition.len())
            .unwrap_or(0)
    }

    /// Emits record keys in the cursor order of the named index partition.
    fn keys_from_index(
        &self,
        read: &ReadTx<'_>,
        index: &str,
        sorting: Sorting,
        max_keys: usize,
    ) -> Vec<String> {
        let mut keys = Vec::new();
        let Some(partition) =
            read.partition(&layout::index_partition_name(self.bucket.as_bytes(), index))
        else {
            return keys;
        };

        if sorting == Sorting::Descending {
            for (composite, _) in partition.iter_rev() {
                if max_keys > 0 && keys.len() >= max_keys {
                    break;
                }
                push_record_key(&mut keys, composite);
            }
        } else {
            for (composite, _) in partition.iter() {
                if max_keys > 0 && keys.len() >= max_keys {
                    break;
                }
                push_record_key(&mut keys, composite);
            }
        }
        keys
    }

    fn count_keys_from_index(&self, read: &ReadTx<'_>, index: &str) -> usize {
        read.partition(&layout::index_partition_name(self.bucket.as_bytes(), index))
            .map(|partition| partition.len())
            .unwrap_or(0)
    }
}

/// Evaluates one condition against a decoded record. Unknown fields and
/// incompatible value kinds do not match.
fn matches_condition<T: Record>(item: &T, condition: &Condition) -> bool {
    let Some(field_value) = item.field_value(&condition.field) else {
        return false;
    };
    match condition.operator {
        Operator::Equals => field_value == condition.value,
        Operator::GreaterThan => {
            field_value.compare(&condition.value) == Some(Ordering::Greater)
        }
        Operator::LessThan => field_value.compare(&condition.value) == Some(Ordering::Less),
        Operator::GreaterThanOrEqual => matches!(
            field_value.compare(&condition.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::LessThanOrEqual => matches!(
            field_value.compare(&condition.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

/// Keeps the elements of `other` that are also in `base`, in `other`'s
/// order.
fn intersect(base: &[String], other: &[String]) -> Vec<String> {
    let base_set: HashSet<&str> = base.iter().map(String::as_str).collect();
    other
        .iter()
        .filter(|key| base_set.contains(key.as_str()))
        .cloned()
        .collect()
}

/// Sorts decoded results by the named index's field.
fn sort_results<T: Record>(results: &mut [T], index: &str, sorting: Sorting) {
    let Some(spec) = index_by_name::<T>(index) else {
        return;
    };
    results.sort_by(|a, b| {
        let ordering = match (a.field_value(spec.field), b.field_value(spec.field)) {
            (Some(a), Some(b)) => a.compare(&b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        if sorting == Sorting::Descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

fn push_record_key(keys: &mut Vec<String>, composite: &[u8]) {
    if let Some((_, record_key)) = layout::split_composite(composite) {
        keys.push(String::from_utf8_lossy(record_key).into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_keeps_other_order() {
        let base = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let other = vec!["c".to_string(), "x".to_string(), "a".to_string()];
        assert_eq!(intersect(&base, &other), vec!["c", "a"]);
    }

    #[test]
    fn test_intersect_empty() {
        assert!(intersect(&[], &["a".to_string()]).is_empty());
        assert!(intersect(&["a".to_string()], &[]).is_empty());
    }

    #[test]
    fn test_condition_constructors() {
        let condition = Condition::equals("Name", "Alice");
        assert_eq!(condition.operator, Operator::Equals);
        assert_eq!(condition.value, FieldValue::Str("Alice".to_string()));

        let condition = Condition::new("Age", 30_i64, Operator::GreaterThan);
        assert_eq!(condition.operator, Operator::GreaterThan);
        assert_eq!(condition.value, FieldValue::Int(30));
    }

    #[test]
    fn test_query_default() {
        let query = Query::default();
        assert!(query.index.is_empty());
        assert_eq!(query.limit, 0);
        assert_eq!(query.offset, 0);
        assert_eq!(query.sort, Sorting::Unsorted);
        assert!(query.conditions.is_empty());
    }
}
