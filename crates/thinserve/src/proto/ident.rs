//! The wire identifier grammar: `[A-Za-z][A-Za-z0-9_]*`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ProtocolError;

static IDENT_RGX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("identifier regex should compile"));

/// The reserved sentinel marking a JSON array as a list rather than a variant.
pub const LIST_TAG: &str = "@LIST";

/// Validate `ident` against the wire grammar, raising `InvalidIdentifier`
/// (with `path`/`fragment` filled in) on failure.
pub fn verify_identifier(ident: &str, path: &str, fragment: &serde_json::Value) -> Result<(), ProtocolError> {
    if IDENT_RGX.is_match(ident) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidIdentifier {
            path: path.to_owned(),
            fragment: fragment.clone(),
            ident: ident.to_owned(),
        })
    }
}
