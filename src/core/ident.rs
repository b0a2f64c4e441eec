use lazy_static::lazy_static;
use regex::Regex;

use super::{DbError, Result};

const MAX_IDENTIFIER_LEN: usize = 63;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern");
}

/// Whitelist check for table, column and savepoint names.
///
/// Names that pass are plain ASCII identifiers, so they can never smuggle
/// anything past the storage layer's schema lookups.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(DbError::InvalidInput(format!(
            "{} name '{}' exceeds {} bytes",
            kind, name, MAX_IDENTIFIER_LEN
        )));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(DbError::InvalidInput(format!(
            "{} name '{}' is not a valid identifier",
            kind, name
        )));
    }
    Ok(())
}
