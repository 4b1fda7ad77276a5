//! Keyword classification for untyped exchange error messages.

/// Substrings that mark a transient failure.
const RETRYABLE_KEYWORDS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timeout",
    "temporary failure",
    "service unavailable",
    "rate limit",
    "429",
    "500",
    "503",
];

/// Returns true if an error message looks like a transient transport failure.
///
/// Only used for errors that reach the port without a typed class.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_messages() {
        assert!(is_retryable_message("dial tcp: Connection refused"));
        assert!(is_retryable_message("read: connection reset by peer"));
        assert!(is_retryable_message("context deadline exceeded (Client.Timeout)"));
        assert!(is_retryable_message("Temporary failure in name resolution"));
        assert!(is_retryable_message("503 Service Unavailable"));
        assert!(is_retryable_message("Rate limit exceeded"));
        assert!(is_retryable_message("status 429"));
        assert!(is_retryable_message("status 500: internal"));
    }

    #[test]
    fn test_non_retryable_messages() {
        assert!(!is_retryable_message("insufficient balance"));
        assert!(!is_retryable_message("invalid parameter: amount"));
        assert!(!is_retryable_message(""));
    }
}
