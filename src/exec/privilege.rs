// src/exec/privilege.rs

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Time-bounded cache for the privilege check, so repeated sequences don't
/// re-prompt the elevation mechanism.
#[derive(Debug)]
pub struct PrivilegeCache {
    ttl: Duration,
    entry: Mutex<Option<(Instant, bool)>>,
}

impl PrivilegeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached answer, if one was stored less than `ttl` ago.
    pub fn get(&self) -> Option<bool> {
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        match *entry {
            Some((at, available)) if at.elapsed() < self.ttl => Some(available),
            _ => None,
        }
    }

    pub fn store(&self, available: bool) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        *entry = Some((Instant::now(), available));
    }

    pub fn clear(&self) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        *entry = None;
    }
}
