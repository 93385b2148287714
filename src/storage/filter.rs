//! Metadata filter key validation.
//!
//! Grounded on the teacher's `storage::filter::FieldPath::parse`, which
//! rejects any field path it doesn't recognize before it reaches SQL
//! construction. This crate applies the same principle to caller-supplied
//! metadata filter *keys*: since those keys are interpolated into a JSON
//! path expression rather than bound as a parameter, every key is
//! validated against an identifier pattern before any query string is
//! built, so a malicious key can never reach the database engine.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{MeshError, Result};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Validate that `key` is a safe metadata filter key: it must match
/// `^[A-Za-z_][A-Za-z0-9_]*$`. Returns `InvalidArgument` without ever
/// constructing a query string from a rejected key.
pub fn validate_filter_key(key: &str) -> Result<()> {
    if IDENTIFIER.is_match(key) {
        Ok(())
    } else {
        Err(MeshError::InvalidArgument(format!(
            "metadata filter key '{key}' is not a valid identifier"
        )))
    }
}
