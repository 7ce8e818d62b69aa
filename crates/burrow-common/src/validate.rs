//! Name and key validation.

use crate::error::{BurrowError, Result};

/// Maximum record key length in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// Maximum bucket name length in bytes.
pub const MAX_BUCKET_BYTES: usize = 255;

/// Validates a record key: non-empty, at most [`MAX_KEY_BYTES`], no NUL.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(BurrowError::KeyInvalid {
            reason: "cannot be empty".to_string(),
        });
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(BurrowError::KeyInvalid {
            reason: format!("too long: {} bytes (max {})", key.len(), MAX_KEY_BYTES),
        });
    }
    if key.contains('\0') {
        return Err(BurrowError::KeyInvalid {
            reason: "contains NUL byte".to_string(),
        });
    }
    Ok(())
}

/// Validates a bucket name: non-empty, at most [`MAX_BUCKET_BYTES`], and no
/// NUL or path separators.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BurrowError::BucketNameInvalid {
            name: name.to_string(),
            reason: "cannot be empty",
        });
    }
    if name.len() > MAX_BUCKET_BYTES {
        return Err(BurrowError::BucketNameInvalid {
            name: name.to_string(),
            reason: "too long",
        });
    }
    if name.contains('\0') || name.contains('/') || name.contains('\\') {
        return Err(BurrowError::BucketNameInvalid {
            name: name.to_string(),
            reason: "contains invalid characters",
        });
    }
    Ok(())
}

/// Validates a string index value. The composite index key layout splits at
/// the first NUL, so indexed values must not contain one.
pub fn validate_index_value(index: &str, value: &str) -> Result<()> {
    if value.contains('\0') {
        return Err(BurrowError::IndexValueInvalid {
            index: index.to_string(),
            reason: "contains NUL byte",
        });
    }
    Ok(())
}
