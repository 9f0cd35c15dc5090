//! Round-robin selection over the configured upstream credentials.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ProxyError;

/// Fixed credential pool with a lock-free rotating cursor. Every request
/// takes the next credential in order; concurrent requests may interleave
/// but each `next()` call observes a distinct cursor value.
pub struct KeyRotation {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRotation {
    pub fn new(keys: Vec<String>) -> Result<Self, ProxyError> {
        if keys.is_empty() {
            return Err(ProxyError::NoCredentials);
        }
        Ok(KeyRotation {
            keys,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Returns the next credential and its position in the pool.
    pub fn next(&self) -> (usize, &str) {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        (idx, &self.keys[idx])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// All credentials, in pool order. Used for the usage report.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}
