// Validation utilities module
// Custom validation functions for credential input

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._@+-]{2,63}$").expect("username pattern is valid")
    })
}

/// Validates a username: 3 to 64 characters, starts with a letter or digit,
/// then letters, digits and `. _ @ + -` (so e-mail addresses are accepted).
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username_pattern().is_match(username) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_username"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_and_email_usernames() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("bob_99").is_ok());
        assert!(validate_username("carol@example.com").is_ok());
    }

    #[test]
    fn test_rejects_bad_usernames() {
        assert!(validate_username("").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("_leading").is_err());
        assert!(validate_username("with space").is_err());
        assert!(validate_username(&"a".repeat(65)).is_err());
    }
}
