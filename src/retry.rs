//! Retry policy for queue items
//!
//! Both pipeline loops reschedule failed items with a bounded attempt count
//! and exponential backoff. Errors coming back from RPC calls are classified
//! by message text, since both alloy and raw JSON-RPC surface node errors as
//! strings.

use std::time::Duration;

/// Retry configuration shared by the validation and attestation loops.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts allowed before an item is dead-lettered
    pub max_attempts: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Whether an item with this many failed attempts goes back on the queue.
    /// Attempt `max_attempts` itself is still allowed; the one after is not.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts <= self.max_attempts
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorClass {
    /// Temporary failure - should retry (RPC timeout, network issues)
    Transient,
    /// The quorum contract rejected the vote outright; resubmitting the
    /// same vote can never succeed
    VoteRejected,
    /// Permanent failure - do not retry (invalid params, contract error)
    Permanent,
    /// Unknown error - may retry with backoff
    Unknown,
}

/// Classify an error for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    // Transient errors
    if error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    // Quorum-layer rejections: the contract has already moved past this vote
    if error_lower.contains("already voted")
        || error_lower.contains("already attested")
        || error_lower.contains("already claimed")
        || error_lower.contains("not in the validator set")
        || error_lower.contains("not a validator")
    {
        return ErrorClass::VoteRejected;
    }

    // Permanent errors
    if error_lower.contains("reverted")
        || error_lower.contains("execution reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

impl ErrorClass {
    /// Whether a failure of this class is worth putting back on the queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let config = RetryConfig::default();

        assert_eq!(config.backoff_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.backoff_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.backoff_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.backoff_for_attempt(3), Duration::from_secs(16));
        assert_eq!(config.backoff_for_attempt(4), Duration::from_secs(32));
        assert_eq!(config.backoff_for_attempt(5), Duration::from_secs(60)); // capped
    }

    #[test]
    fn test_retry_bound() {
        let config = RetryConfig::default();
        assert!(config.should_retry(0));
        assert!(config.should_retry(10));
        assert!(!config.should_retry(11), "the 11th failure exhausts the item");
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("connection timeout"), ErrorClass::Transient);
        assert_eq!(
            classify_error("RPC call timeout after 10s"),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_error("validator already voted on this hash"),
            ErrorClass::VoteRejected
        );
        assert_eq!(
            classify_error("hash is already claimed"),
            ErrorClass::VoteRejected
        );
        assert_eq!(classify_error("execution reverted"), ErrorClass::Permanent);
        assert_eq!(classify_error("some unknown error"), ErrorClass::Unknown);
    }

    #[test]
    fn test_retryable_classes() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::Unknown.is_retryable());
        assert!(!ErrorClass::VoteRejected.is_retryable());
        assert!(!ErrorClass::Permanent.is_retryable());
    }
}
