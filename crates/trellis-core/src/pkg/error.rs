//! Package manager error types.

use std::fmt;
use std::io;

/// Package manager error codes.
pub mod codes {
    /// Malformed ident, range or reference string.
    pub const PKG_PARSE_ERROR: &str = "PKG_PARSE_ERROR";
    /// No resolver claims the descriptor.
    pub const PKG_UNSUPPORTED_RANGE: &str = "PKG_UNSUPPORTED_RANGE";
    /// No candidate reference satisfies the descriptor.
    pub const PKG_CANDIDATE_EXHAUSTED: &str = "PKG_CANDIDATE_EXHAUSTED";
    /// A fetcher could not produce the package contents.
    pub const PKG_FETCH_FAILED: &str = "PKG_FETCH_FAILED";
    /// Fetched contents do not match the expected checksum.
    pub const PKG_INTEGRITY_ERROR: &str = "PKG_INTEGRITY_ERROR";
    /// An internal ordering contract was violated.
    pub const PKG_ASSERTION_FAILED: &str = "PKG_ASSERTION_FAILED";
    /// The generated resolution map does not exist.
    pub const PKG_MISSING_INSTALL_STATE: &str = "PKG_MISSING_INSTALL_STATE";
    /// A locator is absent from the generated resolution map.
    pub const PKG_UNRESOLVED_LOCATOR: &str = "PKG_UNRESOLVED_LOCATOR";
    pub const PKG_MANIFEST_INVALID: &str = "PKG_MANIFEST_INVALID";
    pub const PKG_REGISTRY_ERROR: &str = "PKG_REGISTRY_ERROR";
    pub const PKG_EXTRACT_FAILED: &str = "PKG_EXTRACT_FAILED";
    pub const PKG_IO_ERROR: &str = "PKG_IO_ERROR";
}

/// Package manager error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgError {
    code: &'static str,
    message: String,
}

impl PkgError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the user can fix this by reinstalling.
    #[must_use]
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self.code,
            codes::PKG_MISSING_INSTALL_STATE | codes::PKG_UNRESOLVED_LOCATOR
        )
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_PARSE_ERROR, msg)
    }

    #[must_use]
    pub fn unsupported_range(descriptor: &str) -> Self {
        Self::new(
            codes::PKG_UNSUPPORTED_RANGE,
            format!("No resolver supports the descriptor {descriptor}"),
        )
    }

    #[must_use]
    pub fn unsupported_locator(locator: &str) -> Self {
        Self::new(
            codes::PKG_UNSUPPORTED_RANGE,
            format!("No resolver or fetcher supports the locator {locator}"),
        )
    }

    #[must_use]
    pub fn candidate_exhausted(descriptor: &str) -> Self {
        Self::new(
            codes::PKG_CANDIDATE_EXHAUSTED,
            format!("No candidates found for {descriptor}"),
        )
    }

    pub fn fetch_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_FETCH_FAILED, msg)
    }

    #[must_use]
    pub fn integrity(locator: &str, expected: &str, actual: &str) -> Self {
        Self::new(
            codes::PKG_INTEGRITY_ERROR,
            format!("{locator}: checksum mismatch (expected {expected}, got {actual})"),
        )
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_ASSERTION_FAILED, format!("Assertion failed: {}", msg.into()))
    }

    #[must_use]
    pub fn missing_install_state(path: &std::path::Path) -> Self {
        Self::new(
            codes::PKG_MISSING_INSTALL_STATE,
            format!(
                "Couldn't find the resolution map at {} - run an install to generate it",
                path.display()
            ),
        )
    }

    #[must_use]
    pub fn unresolved_locator(locator: &str) -> Self {
        Self::new(
            codes::PKG_UNRESOLVED_LOCATOR,
            format!("Couldn't find {locator} in the currently installed resolution map - run an install to update it"),
        )
    }

    pub fn manifest_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, msg)
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_REGISTRY_ERROR, msg)
    }

    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_EXTRACT_FAILED, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(codes::PKG_IO_ERROR, msg)
    }
}

impl fmt::Display for PkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PkgError {}

impl From<io::Error> for PkgError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PKG_IO_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PkgError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::PKG_REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::PKG_REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PkgError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PKG_MANIFEST_INVALID, format!("Invalid JSON: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        let err = PkgError::parse("bad ident");
        assert_eq!(err.code(), codes::PKG_PARSE_ERROR);
        assert!(err.to_string().starts_with("PKG_PARSE_ERROR: "));
    }

    #[test]
    fn test_assertion_message_prefix() {
        let err = PkgError::assertion("information store not found");
        assert_eq!(err.code(), codes::PKG_ASSERTION_FAILED);
        assert_eq!(err.message(), "Assertion failed: information store not found");
        assert!(!err.is_user_actionable());
    }

    #[test]
    fn test_lookup_errors_are_user_actionable() {
        let err = PkgError::missing_install_state(std::path::Path::new("/p/.pnp.cjs"));
        assert!(err.is_user_actionable());
        assert!(err.message().contains("run an install"));
        assert!(PkgError::unresolved_locator("a@npm:1.0.0").is_user_actionable());
    }

    #[test]
    fn test_error_codes_uppercase() {
        let all_codes = [
            codes::PKG_PARSE_ERROR,
            codes::PKG_UNSUPPORTED_RANGE,
            codes::PKG_CANDIDATE_EXHAUSTED,
            codes::PKG_FETCH_FAILED,
            codes::PKG_INTEGRITY_ERROR,
            codes::PKG_ASSERTION_FAILED,
            codes::PKG_MISSING_INSTALL_STATE,
            codes::PKG_UNRESOLVED_LOCATOR,
            codes::PKG_MANIFEST_INVALID,
            codes::PKG_REGISTRY_ERROR,
            codes::PKG_EXTRACT_FAILED,
            codes::PKG_IO_ERROR,
        ];

        for code in all_codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Error code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }
}
