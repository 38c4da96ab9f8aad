//! API credential rotation.
//!
//! Model and embedding clients receive a [`CredentialProvider`] instead of
//! reading keys themselves. [`KeyRotator`] hands out a pool of keys
//! round-robin, so consecutive requests (and retries after a 429) spread
//! across every configured key.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Source of API credentials for outbound model requests.
pub trait CredentialProvider: Send + Sync {
    /// The credential to use for the next request, or `None` when no
    /// credential is configured.
    fn next_credential(&self) -> Option<String>;
}

/// Round-robin rotation over a fixed set of keys.
#[derive(Debug, Default)]
pub struct KeyRotator {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRotator {
    pub fn new(keys: Vec<String>) -> Self {
        let keys = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Collect keys from environment variables, each holding one key or a
    /// comma-separated list. Unset variables are skipped.
    pub fn from_env(vars: &[String]) -> Self {
        let keys = vars
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .flat_map(|value| {
                value
                    .split(',')
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Self::new(keys)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl CredentialProvider for KeyRotator {
    fn next_credential(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some(self.keys[i].clone())
    }
}
