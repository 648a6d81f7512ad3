//! Entity identifier utilities

use uuid::Uuid;

/// Generate a new entity id (UUIDv4, hyphenated)
pub fn generate() -> String {
    Uuid::new_v4().to_string()
}

/// Reject ids that cannot name a catalog row
pub fn validate(id: &str) -> crate::Result<&str> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::InvalidInput("entity id must not be empty".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(generate(), generate());
    }

    #[test]
    fn test_blank_ids_are_rejected() {
        assert!(validate("   ").is_err());
        assert_eq!(validate(" r-1 ").unwrap(), "r-1");
    }
}
