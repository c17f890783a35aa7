//! Provider credential rotation.
//!
//! Each session owns a [`KeyRotator`] over the configured API keys. Keys are
//! advanced round-robin either on demand (after a failed provider call) or
//! lazily once the rotation cooldown has elapsed.

use crate::error::{ParleyError, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default minimum time between non-forced rotations (5 minutes).
pub const DEFAULT_ROTATION_COOLDOWN: Duration = Duration::from_secs(300);

/// Round-robin rotator over a fixed, non-empty list of credentials.
#[derive(Clone)]
pub struct KeyRotator {
    keys: Vec<String>,
    index: usize,
    last_rotation: Instant,
    cooldown: Duration,
}

impl KeyRotator {
    /// Create a rotator with the default cooldown.
    pub fn new(keys: Vec<String>) -> Result<Self> {
        Self::with_cooldown(keys, DEFAULT_ROTATION_COOLDOWN)
    }

    /// Create a rotator with a custom cooldown.
    pub fn with_cooldown(keys: Vec<String>, cooldown: Duration) -> Result<Self> {
        if keys.is_empty() {
            return Err(ParleyError::NoCredentials("the credentials variable".to_string()));
        }

        Ok(Self {
            keys,
            index: 0,
            last_rotation: Instant::now(),
            cooldown,
        })
    }

    /// The active credential.
    pub fn current(&self) -> &str {
        &self.keys[self.index]
    }

    /// Index of the active credential.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of credentials in rotation.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Always false; construction rejects empty lists.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Advance to the next credential if forced or the cooldown has elapsed.
    ///
    /// Returns the (possibly unchanged) active credential.
    pub fn rotate(&mut self, force: bool) -> &str {
        self.rotate_at(force, Instant::now())
    }

    fn rotate_at(&mut self, force: bool, now: Instant) -> &str {
        if force || now.saturating_duration_since(self.last_rotation) > self.cooldown {
            self.index = (self.index + 1) % self.keys.len();
            self.last_rotation = now;
            debug!(index = self.index, forced = force, "Rotated provider credential");
        }
        self.current()
    }
}

impl std::fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotator")
            .field("keys", &self.keys.len())
            .field("index", &self.index)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// Cloneable handle to a rotator shared by an agent runner and its tools.
#[derive(Clone, Debug)]
pub struct SharedRotator {
    inner: Arc<Mutex<KeyRotator>>,
}

impl SharedRotator {
    pub fn new(rotator: KeyRotator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rotator)),
        }
    }

    /// The active credential.
    pub fn current(&self) -> String {
        self.lock().current().to_string()
    }

    /// Rotate (see [`KeyRotator::rotate`]) and return the active credential.
    pub fn rotate(&self, force: bool) -> String {
        self.lock().rotate(force).to_string()
    }

    /// Index of the active credential.
    pub fn index(&self) -> usize {
        self.lock().index()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KeyRotator> {
        // A poisoned rotator still holds a valid index.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parse a comma-separated credential list, trimming whitespace and dropping empties.
pub fn parse_credentials(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the credential list from the named environment variable.
pub fn credentials_from_env(var: &str) -> Result<Vec<String>> {
    let keys = std::env::var(var)
        .map(|raw| parse_credentials(&raw))
        .unwrap_or_default();

    if keys.is_empty() {
        return Err(ParleyError::NoCredentials(var.to_string()));
    }
    Ok(keys)
}
