//! Error types shared across the crate.
//!
//! Sign-on rejection ([`SignOnError`]) and session-level operations
//! ([`SessionError`]) get typed errors because callers branch on them.
//! Wire decoding failures stay `anyhow` errors: any of them is fatal to
//! its connection, so the only consumer is the teardown log line.
//! Transient conditions the session recovers from on its own
//! (rate-limited list requests, bounced messages) are reported through
//! events instead of these types.

/// Sign-on rejection reasons, decoded from the error-code TLV of a
/// sign-on reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOnError {
    /// The screen name is not registered (code 0x0001).
    UnknownScreenName,
    /// The password was wrong (codes 0x0004 and 0x0005).
    IncorrectPassword,
    /// The account has been suspended (code 0x0011).
    AccountSuspended,
    /// Too many recent sign-on attempts (code 0x0018).
    RateLimited,
    /// The server refuses this client version (code 0x001C).
    ClientTooOld,
    /// Any code outside the known table.
    Other(u16),
}

impl SignOnError {
    /// Maps a wire error code to its reason.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => Self::UnknownScreenName,
            0x0004 | 0x0005 => Self::IncorrectPassword,
            0x0011 => Self::AccountSuspended,
            0x0018 => Self::RateLimited,
            0x001C => Self::ClientTooOld,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for SignOnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownScreenName => write!(f, "Screen name is not registered"),
            Self::IncorrectPassword => write!(f, "Incorrect password"),
            Self::AccountSuspended => write!(f, "Account suspended"),
            Self::RateLimited => {
                write!(f, "Too many sign-on attempts, wait before retrying")
            }
            Self::ClientTooOld => write!(f, "Client version no longer accepted"),
            Self::Other(code) => write!(f, "Sign-on refused (code 0x{code:04X})"),
        }
    }
}

impl std::error::Error for SignOnError {}

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session task has shut down; no further commands are accepted.
    Closed,
    /// The message exceeds the wire size limit even after markup stripping.
    MessageTooLong(usize),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Session closed"),
            Self::MessageTooLong(len) => {
                write!(f, "Message too long after stripping: {len} bytes")
            }
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_on_code_mapping() {
        assert_eq!(SignOnError::from_code(0x0001), SignOnError::UnknownScreenName);
        assert_eq!(SignOnError::from_code(0x0004), SignOnError::IncorrectPassword);
        assert_eq!(SignOnError::from_code(0x0005), SignOnError::IncorrectPassword);
        assert_eq!(SignOnError::from_code(0x0011), SignOnError::AccountSuspended);
        assert_eq!(SignOnError::from_code(0x0018), SignOnError::RateLimited);
        assert_eq!(SignOnError::from_code(0x001C), SignOnError::ClientTooOld);
        assert_eq!(SignOnError::from_code(0x9999), SignOnError::Other(0x9999));
    }

    #[test]
    fn test_display_includes_code_for_unknown() {
        let err = SignOnError::from_code(0x00AB);
        assert!(err.to_string().contains("0x00AB"));
    }
}
