//! `none` attestation

use ciborium::value::Value;
use log::warn;

use super::Evidence;
use crate::error::WebAuthnError;

/// Nothing to verify; a non-empty statement is ignored
pub(super) fn verify(stmt: &[(Value, Value)]) -> Result<Evidence, WebAuthnError> {
    if !stmt.is_empty() {
        warn!(
            "Ignoring {} attStmt entries on a none attestation",
            stmt.len()
        );
    }
    Ok(Evidence::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_always_verifies() {
        assert!(matches!(verify(&[]), Ok(Evidence::Empty)));
        let stmt = vec![(Value::Text("sig".into()), Value::Bytes(vec![1]))];
        assert!(matches!(verify(&stmt), Ok(Evidence::Empty)));
    }
}
