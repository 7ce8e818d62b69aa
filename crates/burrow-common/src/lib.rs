//! BurrowDB common types, errors, and validation.
//!
//! This crate provides shared definitions used across all BurrowDB
//! components.

pub mod config;
pub mod error;
pub mod validate;

pub use config::Config;
pub use error::{BurrowError, Result};
pub use validate::{validate_bucket_name, validate_index_value, validate_key};
