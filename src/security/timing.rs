//! Timing attack protection for the administrator challenge
//!
//! Passwords are compared as SHA-256 digests so the comparison always runs
//! over the same number of bytes, whatever the candidate's length.

use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// Minimum time a failed password check takes before the caller answers
pub const MIN_AUTH_FAILURE_DELAY: Duration = Duration::from_millis(100);

/// Constant-time byte array comparison
pub fn constant_time_eq_bytes(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// Compare a submitted password against the configured secret
pub fn verify_secret(candidate: &str, secret: &str) -> bool {
    let candidate = Sha256::digest(candidate.as_bytes());
    let secret = Sha256::digest(secret.as_bytes());
    constant_time_eq_bytes(candidate.as_slice(), secret.as_slice())
}

/// Pads failed attempts to a minimum duration
pub struct AuthTimer {
    start: Instant,
    min_duration: Duration,
}

impl AuthTimer {
    pub fn new(min_duration: Duration) -> Self {
        Self {
            start: Instant::now(),
            min_duration,
        }
    }

    pub fn start() -> Self {
        Self::new(MIN_AUTH_FAILURE_DELAY)
    }

    /// Wait until the minimum duration has elapsed since the timer started
    pub async fn wait(self) {
        let elapsed = self.start.elapsed();
        if elapsed < self.min_duration {
            tokio::time::sleep(self.min_duration - elapsed).await;
        }
    }
}
