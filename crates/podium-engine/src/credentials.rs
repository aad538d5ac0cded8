//! In-memory credential envelopes with TTL and explicit purge.
//!
//! Provider credentials from a submitted plan never reach disk. They are
//! sealed into a process-local envelope keyed by task ID, and purged when
//! the task reaches a terminal state or the TTL elapses. Envelopes are
//! never logged, never written to the task's plan snapshot, and never
//! transmitted on the queue.
//!
//! Sealing uses an HMAC-SHA256 keystream under a per-process random key
//! with a per-envelope random nonce. The envelope only needs to protect
//! against accidental disclosure (heap dumps, debug logging of the store);
//! the key never leaves the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Deserialize;
use sha2::Sha256;

use podium_core::TaskId;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// A secret string that refuses to leak.
///
/// - `Debug` prints a redaction marker
/// - There is deliberately no `Serialize` implementation
/// - The raw value is only reachable through [`Secret::expose`]
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a raw secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw secret value.
    ///
    /// Call sites should be rare and obvious: hydrating an evaluator
    /// request, or sealing into the vault.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Credentials for one plan, keyed by model name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    entries: BTreeMap<String, Secret>,
}

impl CredentialSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a credential for a model.
    pub fn insert(&mut self, model_name: impl Into<String>, secret: Secret) {
        self.entries.insert(model_name.into(), secret);
    }

    /// Looks up the credential for a model.
    #[must_use]
    pub fn get(&self, model_name: &str) -> Option<&Secret> {
        self.entries.get(model_name)
    }

    /// Returns the number of credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn to_plaintext(&self) -> Vec<u8> {
        let raw: BTreeMap<&str, &str> = self
            .entries
            .iter()
            .map(|(name, secret)| (name.as_str(), secret.expose()))
            .collect();
        // BTreeMap of strings cannot fail to serialize.
        serde_json::to_vec(&raw).unwrap_or_default()
    }

    fn from_plaintext(bytes: &[u8]) -> Result<Self> {
        let raw: BTreeMap<String, String> =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization {
                message: format!("credential envelope decode failed: {e}"),
            })?;
        let mut set = Self::new();
        for (name, value) in raw {
            set.insert(name, Secret::new(value));
        }
        Ok(set)
    }
}

impl FromIterator<(String, Secret)> for CredentialSet {
    fn from_iter<I: IntoIterator<Item = (String, Secret)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One sealed envelope.
struct SealedEnvelope {
    nonce: [u8; 16],
    ciphertext: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for SealedEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedEnvelope")
            .field("ciphertext", &format_args!("<{} bytes>", self.ciphertext.len()))
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Process-local store of sealed credential envelopes.
#[derive(Debug)]
pub struct CredentialVault {
    key: [u8; 32],
    ttl: Duration,
    envelopes: Mutex<HashMap<TaskId, SealedEnvelope>>,
}

impl CredentialVault {
    /// Creates a vault with a fresh random process key and the given TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            key,
            ttl,
            envelopes: Mutex::new(HashMap::new()),
        }
    }

    /// Seals credentials for a task.
    ///
    /// Replaces any previous envelope for the same task.
    pub fn store(&self, task_id: TaskId, credentials: &CredentialSet) {
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut data = credentials.to_plaintext();
        self.apply_keystream(&nonce, &mut data);

        let envelope = SealedEnvelope {
            nonce,
            ciphertext: data,
            expires_at: Utc::now()
                + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(1)),
        };

        if let Ok(mut envelopes) = self.envelopes.lock() {
            envelopes.insert(task_id, envelope);
        }
    }

    /// Unseals the credentials for a task.
    ///
    /// # Errors
    ///
    /// Returns `Error::CredentialsMissing` if no envelope exists or the
    /// envelope has expired (expired envelopes are removed on the way).
    pub fn hydrate(&self, task_id: TaskId) -> Result<CredentialSet> {
        let missing = || Error::CredentialsMissing { task_id };

        let (nonce, mut data) = {
            let mut envelopes = self.envelopes.lock().map_err(|_| missing())?;
            let envelope = envelopes.get(&task_id).ok_or_else(missing)?;
            if envelope.expires_at <= Utc::now() {
                envelopes.remove(&task_id);
                return Err(missing());
            }
            (envelope.nonce, envelope.ciphertext.clone())
        };

        self.apply_keystream(&nonce, &mut data);
        CredentialSet::from_plaintext(&data)
    }

    /// Removes the envelope for a task, if any.
    pub fn purge(&self, task_id: TaskId) {
        if let Ok(mut envelopes) = self.envelopes.lock() {
            envelopes.remove(&task_id);
        }
    }

    /// Removes all expired envelopes, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let Ok(mut envelopes) = self.envelopes.lock() else {
            return 0;
        };
        let before = envelopes.len();
        envelopes.retain(|_, e| e.expires_at > now);
        before - envelopes.len()
    }

    /// Returns the number of live envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.envelopes.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns true if the vault holds no envelopes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// XORs `data` with an HMAC-SHA256 keystream derived from the
    /// process key and `nonce`. Applying twice restores the input.
    fn apply_keystream(&self, nonce: &[u8; 16], data: &mut [u8]) {
        let mut counter: u64 = 0;
        let mut offset = 0;
        while offset < data.len() {
            // Infallible: HMAC accepts keys of any length.
            let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
                return;
            };
            mac.update(nonce);
            mac.update(&counter.to_be_bytes());
            let block = mac.finalize().into_bytes();

            for byte in block.iter().take(data.len() - offset) {
                data[offset] ^= byte;
                offset += 1;
            }
            counter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> CredentialSet {
        let mut set = CredentialSet::new();
        set.insert("m1", Secret::new("sk-first"));
        set.insert("m2", Secret::new("sk-second"));
        set
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("sk-very-secret");
        let debug = format!("{secret:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn store_and_hydrate_roundtrip() {
        let vault = CredentialVault::new(Duration::from_secs(60));
        let task_id = TaskId::generate();
        let set = sample_set();

        vault.store(task_id, &set);
        let hydrated = vault.hydrate(task_id).unwrap();
        assert_eq!(hydrated.get("m1").unwrap().expose(), "sk-first");
        assert_eq!(hydrated.get("m2").unwrap().expose(), "sk-second");
    }

    #[test]
    fn hydrate_missing_fails() {
        let vault = CredentialVault::new(Duration::from_secs(60));
        let err = vault.hydrate(TaskId::generate()).unwrap_err();
        assert!(matches!(err, Error::CredentialsMissing { .. }));
    }

    #[test]
    fn purge_removes_envelope() {
        let vault = CredentialVault::new(Duration::from_secs(60));
        let task_id = TaskId::generate();
        vault.store(task_id, &sample_set());
        assert_eq!(vault.len(), 1);

        vault.purge(task_id);
        assert!(vault.is_empty());
        assert!(vault.hydrate(task_id).is_err());
    }

    #[test]
    fn expired_envelope_is_missing() {
        let vault = CredentialVault::new(Duration::from_millis(0));
        let task_id = TaskId::generate();
        vault.store(task_id, &sample_set());

        let err = vault.hydrate(task_id).unwrap_err();
        assert!(matches!(err, Error::CredentialsMissing { .. }));
    }

    #[test]
    fn purge_expired_drops_only_expired() {
        let vault = CredentialVault::new(Duration::from_secs(60));
        let live = TaskId::generate();
        vault.store(live, &sample_set());
        assert_eq!(vault.purge_expired(), 0);
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let vault = CredentialVault::new(Duration::from_secs(60));
        let task_id = TaskId::generate();
        vault.store(task_id, &sample_set());

        let envelopes = vault.envelopes.lock().unwrap();
        let envelope = envelopes.get(&task_id).unwrap();
        let ciphertext = String::from_utf8_lossy(&envelope.ciphertext);
        assert!(!ciphertext.contains("sk-first"));
    }

    #[test]
    fn envelope_debug_hides_contents() {
        let vault = CredentialVault::new(Duration::from_secs(60));
        let task_id = TaskId::generate();
        vault.store(task_id, &sample_set());

        let envelopes = vault.envelopes.lock().unwrap();
        let debug = format!("{:?}", envelopes.get(&task_id).unwrap());
        assert!(!debug.contains("sk-first"));
    }
}
