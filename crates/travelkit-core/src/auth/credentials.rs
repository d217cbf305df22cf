//! Durable storage for the current session.
//!
//! The session manager is the only writer. Implementations must be safe to
//! call from its commit region without outside synchronization.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use keyring::Entry;
use rand::RngCore;
use tracing::debug;

use super::Session;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Encrypted session file name in cache directory
const SEALED_SESSION_FILE: &str = "session.bin";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Keyring account name the session is stored under
const KEYRING_ACCOUNT: &str = "session";

/// Synchronous session storage.
///
/// `save` and `clear` run inline on the calling task while the manager holds
/// its commit lock, so they block that worker thread for their duration. A
/// sealed [`FileCredentialStore`] runs an Argon2 key derivation on every
/// `save` and `load`, which takes tens of milliseconds.
pub trait CredentialStore: Send + Sync {
    /// Load the persisted session, `None` if nothing is stored.
    fn load(&self) -> Result<Option<Session>>;

    fn save(&self, session: &Session) -> Result<()>;

    /// Remove the persisted session. Succeeds when nothing is stored.
    fn clear(&self) -> Result<()>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for Arc<S> {
    fn load(&self) -> Result<Option<Session>> {
        (**self).load()
    }

    fn save(&self, session: &Session) -> Result<()> {
        (**self).save(session)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }
}

// ============================================================================
// File store
// ============================================================================

/// Session persisted as a file in the cache directory, optionally sealed
/// with a passphrase.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
    passphrase: Option<String>,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            passphrase: None,
        }
    }

    /// Encrypt the session at rest with a key derived from `passphrase`.
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn session_path(&self) -> PathBuf {
        match self.passphrase {
            Some(_) => self.cache_dir.join(SEALED_SESSION_FILE),
            None => self.cache_dir.join(SESSION_FILE),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Session>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read(&path).context("Failed to read session file")?;
        let json = match self.passphrase {
            Some(ref passphrase) => open_sealed(passphrase, &contents)?,
            None => contents,
        };
        let session: Session =
            serde_json::from_slice(&json).context("Failed to parse session file")?;
        debug!(path = %path.display(), "Session loaded from file");
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        let path = self.session_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create session directory")?;
        }
        let json = serde_json::to_vec_pretty(session)?;
        let contents = match self.passphrase {
            Some(ref passphrase) => seal(passphrase, &json)?,
            None => json,
        };
        write_private(&path, &contents).context("Failed to write session file")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| anyhow!("Failed to derive session key: {}", e))?;
    Ok(key)
}

/// Layout: salt || nonce || ciphertext
fn seal(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| anyhow!("Failed to encrypt session"))?;

    let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

fn open_sealed(passphrase: &str, sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < SALT_LEN + NONCE_LEN {
        bail!("Sealed session file is truncated");
    }
    let (salt, rest) = sealed.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| anyhow!("Failed to decrypt session (wrong passphrase or corrupted file)"))
}

// ============================================================================
// Keyring store
// ============================================================================

/// Session stored as JSON in the OS keychain
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, KEYRING_ACCOUNT).context("Failed to create keyring entry")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self) -> Result<Option<Session>> {
        match self.entry()?.get_password() {
            Ok(json) => {
                let session = serde_json::from_str(&json)
                    .context("Failed to parse session from keychain")?;
                Ok(Some(session))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve session from keychain"),
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&json)
            .context("Failed to store session in keychain")
    }

    fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete session from keychain"),
        }
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Process-local store for hosts that don't persist sessions
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: Mutex<Option<Session>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session, as if persisted by an earlier run
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.slot().clone())
    }

    fn save(&self, session: &Session) -> Result<()> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionKind;
    use chrono::{Duration, Utc};

    fn temp_dir() -> PathBuf {
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        std::env::temp_dir().join(format!("travelkit-test-{}", hex::encode(suffix)))
    }

    fn user_session() -> Session {
        let now = Utc::now();
        Session::new(
            "access-token-value".into(),
            Some("refresh-token-value".into()),
            now,
            Some(now + Duration::hours(1)),
            SessionKind::User,
        )
        .expect("valid session")
    }

    #[test]
    fn test_file_store_save_load_clear() {
        let dir = temp_dir();
        let store = FileCredentialStore::new(dir.clone());
        assert!(store.load().expect("load").is_none());

        let session = user_session();
        store.save(&session).expect("save");
        assert_eq!(store.load().expect("load"), Some(session));

        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());
        // Clearing twice is fine
        store.clear().expect("second clear");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("create dir");
        std::fs::write(dir.join(SESSION_FILE), "not json").expect("write");

        let store = FileCredentialStore::new(dir.clone());
        assert!(store.load().is_err());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_sealed_file_store_round_trip() {
        let dir = temp_dir();
        let store = FileCredentialStore::new(dir.clone()).with_passphrase("correct horse");
        let session = user_session();
        store.save(&session).expect("save");

        let raw = std::fs::read(store.session_path()).expect("read raw");
        let raw_text = String::from_utf8_lossy(&raw);
        assert!(!raw_text.contains("access-token-value"));

        assert_eq!(store.load().expect("load"), Some(session));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_sealed_file_store_wrong_passphrase() {
        let dir = temp_dir();
        FileCredentialStore::new(dir.clone())
            .with_passphrase("right")
            .save(&user_session())
            .expect("save");

        let wrong = FileCredentialStore::new(dir.clone()).with_passphrase("wrong");
        assert!(wrong.load().is_err());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_open_sealed_rejects_truncated_input() {
        assert!(open_sealed("pass", &[0u8; 10]).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().expect("load").is_none());

        let session = user_session();
        store.save(&session).expect("save");
        assert_eq!(store.load().expect("load"), Some(session.clone()));

        store.clear().expect("clear");
        assert!(store.load().expect("load").is_none());

        let seeded = MemoryCredentialStore::with_session(session.clone());
        assert_eq!(seeded.load().expect("load"), Some(session));
    }
}
