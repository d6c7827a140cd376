//! Validated tunnel interface names

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted tunnel name, matching the kernel's interface name
/// limit (IFNAMSIZ minus the terminator).
pub const MAX_NAME_LEN: usize = 15;

/// Tunnel name validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("tunnel name is empty")]
    Empty,

    #[error("tunnel name exceeds {MAX_NAME_LEN} characters")]
    TooLong,

    #[error("tunnel name contains invalid character {0:?}")]
    InvalidChar(char),

    #[error("tunnel name must start with an ASCII letter or digit")]
    InvalidStart,
}

/// A validated tunnel interface name.
///
/// Tunnel names end up as single elements of external-process argument
/// vectors, as service names, and as single path components of config
/// file paths, so validation restricts them to ASCII alphanumerics plus
/// `-`, `_` and `.`, starting with an alphanumeric. Path separators,
/// whitespace and shell metacharacters never get through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TunnelName(String);

impl TunnelName {
    /// Validates `name` and wraps it.
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong);
        }
        for ch in name.chars() {
            if !ch.is_ascii_alphanumeric() && !matches!(ch, '-' | '_' | '.') {
                return Err(NameError::InvalidChar(ch));
            }
        }
        if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(NameError::InvalidStart);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TunnelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TunnelName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_names() {
        for name in ["wg0", "corp-vpn", "tun.1", "a", "Home_Office"] {
            assert!(TunnelName::new(name).is_ok(), "rejected {name:?}");
        }
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert_eq!(
            TunnelName::new("../evil"),
            Err(NameError::InvalidChar('/'))
        );
        assert_eq!(
            TunnelName::new("a\\b"),
            Err(NameError::InvalidChar('\\'))
        );
    }

    #[test]
    fn test_rejects_shell_metacharacters() {
        assert_eq!(
            TunnelName::new("a;rm -rf"),
            Err(NameError::InvalidChar(';'))
        );
        assert_eq!(TunnelName::new("a b"), Err(NameError::InvalidChar(' ')));
        assert_eq!(
            TunnelName::new("x$(id)"),
            Err(NameError::InvalidChar('$'))
        );
    }

    #[test]
    fn test_rejects_empty_and_overlong() {
        assert_eq!(TunnelName::new(""), Err(NameError::Empty));
        assert_eq!(
            TunnelName::new("a-name-that-is-too-long"),
            Err(NameError::TooLong)
        );
    }

    #[test]
    fn test_rejects_leading_separator() {
        assert_eq!(TunnelName::new("-flag"), Err(NameError::InvalidStart));
        assert_eq!(TunnelName::new(".hidden"), Err(NameError::InvalidStart));
    }
}
