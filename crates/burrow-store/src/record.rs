//! The schema oracle: how a record type exposes its key, fields, and
//! indexes to the store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cmp::Ordering;

/// A projected field value, as seen by residual query filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
}

impl FieldValue {
    /// Compares two values of the same kind: lexicographic for strings,
    /// numeric for integers. Mismatched kinds are incomparable.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Str(a), FieldValue::Str(b)) => Some(a.cmp(b)),
            (FieldValue::Int(a), FieldValue::Int(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// The string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::Int(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Int(i)
    }
}

/// One declared secondary index: its name (used in partition naming and in
/// `Query::index`) and the record field it covers (used in conditions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: &'static str,
    pub field: &'static str,
}

/// A storable record type.
///
/// Implementations declare the schema the store needs: the primary key
/// accessor, the queryable field set, and the secondary indexes. String
/// index fields populate their index partition; integer fields may be
/// declared as indexes for sorting but produce no index entries, so
/// conditions on them are evaluated against decoded records.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The primary key. Must be non-empty, at most 1024 bytes, without NUL.
    fn key(&self) -> &str;

    /// Names of all queryable fields.
    fn fields() -> &'static [&'static str];

    /// Projects a field by name. `None` for unknown fields.
    fn field_value(&self, field: &str) -> Option<FieldValue>;

    /// The declared secondary indexes.
    fn indexes() -> &'static [IndexSpec] {
        &[]
    }

    /// The string value this record contributes to the named index, if any.
    fn index_value(&self, index: &str) -> Option<String> {
        let spec = Self::indexes().iter().find(|spec| spec.name == index)?;
        match self.field_value(spec.field)? {
            FieldValue::Str(s) => Some(s),
            FieldValue::Int(_) => None,
        }
    }
}

/// Looks up the index spec covering a field, if one is declared.
pub(crate) fn index_for_field<T: Record>(field: &str) -> Option<IndexSpec> {
    T::indexes().iter().copied().find(|spec| spec.field == field)
}

/// Looks up an index spec by index name.
pub(crate) fn index_by_name<T: Record>(name: &str) -> Option<IndexSpec> {
    T::indexes().iter().copied().find(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Sample {
        id: String,
        name: String,
        age: i64,
    }

    impl Record for Sample {
        fn key(&self) -> &str {
            &self.id
        }

        fn fields() -> &'static [&'static str] {
            &["Id", "Name", "Age"]
        }

        fn field_value(&self, field: &str) -> Option<FieldValue> {
            match field {
                "Id" => Some(FieldValue::Str(self.id.clone())),
                "Name" => Some(FieldValue::Str(self.name.clone())),
                "Age" => Some(FieldValue::Int(self.age)),
                _ => None,
            }
        }

        fn indexes() -> &'static [IndexSpec] {
            &[
                IndexSpec {
                    name: "name",
                    field: "Name",
                },
                IndexSpec {
                    name: "age",
                    field: "Age",
                },
            ]
        }
    }

    fn sample() -> Sample {
        Sample {
            id: "s1".to_string(),
            name: "Alice".to_string(),
            age: 30,
        }
    }

    #[test]
    fn test_string_index_value() {
        assert_eq!(sample().index_value("name"), Some("Alice".to_string()));
    }

    #[test]
    fn test_int_index_produces_no_value() {
        assert_eq!(sample().index_value("age"), None);
    }

    #[test]
    fn test_unknown_index() {
        assert_eq!(sample().index_value("email"), None);
    }

    #[test]
    fn test_field_projection() {
        let record = sample();
        assert_eq!(record.field_value("Age"), Some(FieldValue::Int(30)));
        assert_eq!(record.field_value("Missing"), None);
    }

    #[test]
    fn test_index_lookup_helpers() {
        assert_eq!(index_for_field::<Sample>("Name").unwrap().name, "name");
        assert!(index_for_field::<Sample>("Id").is_none());
        assert_eq!(index_by_name::<Sample>("age").unwrap().field, "Age");
        assert!(index_by_name::<Sample>("missing").is_none());
    }

    #[test]
    fn test_field_value_compare() {
        let a = FieldValue::from("apple");
        let b = FieldValue::from("banana");
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(b.compare(&a), Some(Ordering::Greater));
        assert_eq!(a.compare(&a.clone()), Some(Ordering::Equal));

        let x = FieldValue::from(5_i64);
        let y = FieldValue::from(9_i64);
        assert_eq!(x.compare(&y), Some(Ordering::Less));

        // Mismatched kinds never compare.
        assert_eq!(a.compare(&x), None);
    }
}
