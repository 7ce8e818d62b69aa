//! Shared test fixtures.

use burrow_store::{FieldValue, IndexSpec, Record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestUser {
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub age: i64,
}

impl Record for TestUser {
    fn key(&self) -> &str {
        &self.uuid
    }

    fn fields() -> &'static [&'static str] {
        &["UUID", "Name", "Email", "Age"]
    }

    fn field_value(&self, field: &str) -> Option<FieldValue> {
        match field {
            "UUID" => Some(FieldValue::Str(self.uuid.clone())),
            "Name" => Some(FieldValue::Str(self.name.clone())),
            "Email" => Some(FieldValue::Str(self.email.clone())),
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
                name: "email",
                field: "Email",
            },
            // Integer field: declared, but never populates an index
            // partition, so age conditions take the residual path.
            IndexSpec {
                name: "age",
                field: "Age",
            },
        ]
    }
}

pub fn user(uuid: &str, name: &str, email: &str, age: i64) -> TestUser {
    TestUser {
        uuid: uuid.to_string(),
        name: name.to_string(),
        email: email.to_string(),
        age,
    }
}
