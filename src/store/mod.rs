//! Session-scoped token storage.
//!
//! A [`TokenStore`] layers an in-memory cache over a persisted
//! [`SessionStorage`] backend and broadcasts auth changes to subscribers.
//! The store is the only owner of credential state; collaborators mutate it
//! through its operations only.

use std::collections::HashMap;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Persisted key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Persisted key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Persisted key for the id token.
pub const ID_TOKEN_KEY: &str = "id_token";
/// Persisted key for the pending PKCE verifier.
pub const PKCE_VERIFIER_KEY: &str = "pkce_verifier";

/// Persisted key-value storage scoped to the current session.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory storage backend, for tests and storage-less environments.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemorySessionStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

impl MemorySessionStorage {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// File-backed session storage using a single TOML file.
///
/// # Example
/// ```no_run
/// use erp_oauth::store::{FileSessionStorage, SessionStorage, ACCESS_TOKEN_KEY};
///
/// let storage = FileSessionStorage::new_default();
/// storage.set(ACCESS_TOKEN_KEY, "token")?;
/// # Ok::<(), erp_oauth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn new_default() -> Self {
        Self {
            path: default_session_path(),
        }
    }

    fn read_file(&self) -> Result<SessionFile> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SessionFile::empty());
            }
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        Ok(toml::from_str(&raw)?)
    }

    fn write_file(&self, mut file: SessionFile) -> Result<()> {
        Self::ensure_parent(&self.path)?;
        file.saved_at = Utc::now();
        let serialized = toml::to_string(&file)?;
        fs::write(&self.path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl SessionStorage for FileSessionStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_file()?.values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut file = self.read_file()?;
        file.values.insert(key.to_string(), value.to_string());
        self.write_file(file)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut file = self.read_file()?;
        if file.values.remove(key).is_none() {
            return Ok(());
        }
        self.write_file(file)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    saved_at: DateTime<Utc>,
    values: HashMap<String, String>,
}

impl SessionFile {
    fn empty() -> Self {
        Self {
            version: 1,
            saved_at: Utc::now(),
            values: HashMap::new(),
        }
    }
}

fn default_session_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".erp-oauth"))
        .unwrap_or_else(|| PathBuf::from(".erp-oauth"))
        .join("session.toml")
}

/// How `set_credentials` should treat the stored refresh token.
#[derive(Debug, Clone)]
pub enum RefreshUpdate {
    /// Leave the existing refresh token untouched.
    Keep,
    /// Replace it.
    Set(String),
    /// Remove it.
    Clear,
}

#[derive(Debug, Default)]
struct MemTokens {
    access: Option<String>,
    refresh: Option<String>,
    id: Option<String>,
}

type Listener = Arc<dyn Fn() + Send + Sync>;

/// In-memory token cache over a persisted backend, with change broadcast.
///
/// Access-token presence is the sole truth value of "authenticated". Every
/// credential mutation triggers exactly one broadcast, except
/// [`TokenStore::set_id_token`]: identity presence is not part of the auth
/// signal.
///
/// Persisted-storage failures degrade gracefully: the store keeps working
/// memory-only for the session and logs a warning.
pub struct TokenStore {
    storage: Arc<dyn SessionStorage>,
    mem: RwLock<MemTokens>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            mem: RwLock::new(MemTokens::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Overwrite the access token and optionally the refresh token, then
    /// broadcast once.
    ///
    /// `RefreshUpdate::Keep` leaves a previously stored refresh token
    /// untouched; `Clear` removes it.
    pub fn set_credentials(&self, access: Option<&str>, refresh: RefreshUpdate) {
        {
            let mut mem = self.write_mem();
            mem.access = access.map(str::to_string);
            self.persist(ACCESS_TOKEN_KEY, access);
            match &refresh {
                RefreshUpdate::Keep => {}
                RefreshUpdate::Set(value) => {
                    mem.refresh = Some(value.clone());
                    self.persist(REFRESH_TOKEN_KEY, Some(value));
                }
                RefreshUpdate::Clear => {
                    mem.refresh = None;
                    self.persist(REFRESH_TOKEN_KEY, None);
                }
            }
        }
        self.notify();
    }

    /// Overwrite the id token. Does not broadcast.
    pub fn set_id_token(&self, token: Option<&str>) {
        let mut mem = self.write_mem();
        mem.id = token.map(str::to_string);
        self.persist(ID_TOKEN_KEY, token);
    }

    pub fn access_token(&self) -> Option<String> {
        self.get(|mem| mem.access.clone(), ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.get(|mem| mem.refresh.clone(), REFRESH_TOKEN_KEY)
    }

    pub fn id_token(&self) -> Option<String> {
        self.get(|mem| mem.id.clone(), ID_TOKEN_KEY)
    }

    /// True iff a non-empty access token is present.
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some_and(|token| !token.is_empty())
    }

    /// Clear access, refresh, and id tokens as one operation, then broadcast
    /// once.
    pub fn logout(&self) {
        {
            let mut mem = self.write_mem();
            mem.access = None;
            mem.refresh = None;
            mem.id = None;
            self.persist(ACCESS_TOKEN_KEY, None);
            self.persist(REFRESH_TOKEN_KEY, None);
            self.persist(ID_TOKEN_KEY, None);
        }
        self.notify();
    }

    /// Re-read all three tokens from persisted storage into memory.
    ///
    /// Used at process start before memory is populated. Idempotent; storage
    /// errors are swallowed.
    pub fn rehydrate(&self) {
        let access = self.storage.get(ACCESS_TOKEN_KEY).ok().flatten();
        let refresh = self.storage.get(REFRESH_TOKEN_KEY).ok().flatten();
        let id = self.storage.get(ID_TOKEN_KEY).ok().flatten();
        let mut mem = self.write_mem();
        mem.access = access;
        mem.refresh = refresh;
        mem.id = id;
    }

    /// Persist a pending PKCE verifier until the callback consumes it.
    pub fn stash_verifier(&self, verifier: &str) -> Result<()> {
        self.storage.set(PKCE_VERIFIER_KEY, verifier)
    }

    /// Consume the pending verifier: read it and remove it in one step.
    pub fn take_verifier(&self) -> Option<String> {
        let verifier = self.storage.get(PKCE_VERIFIER_KEY).ok().flatten()?;
        if let Err(err) = self.storage.remove(PKCE_VERIFIER_KEY) {
            tracing::warn!(error = %err, "failed to clear consumed verifier");
        }
        Some(verifier)
    }

    /// Register a change listener. Returns an id for [`TokenStore::unsubscribe`].
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock_listeners().retain(|(entry, _)| *entry != id);
    }

    /// Broadcast to a snapshot of the listener set.
    ///
    /// The snapshot tolerates listeners that unsubscribe during notification,
    /// and a panicking listener must not prevent the rest from running.
    fn notify(&self) {
        let snapshot: Vec<Listener> = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::warn!("auth change listener panicked");
            }
        }
    }

    fn get(&self, from_mem: impl Fn(&MemTokens) -> Option<String>, key: &str) -> Option<String> {
        if let Some(value) = from_mem(&self.read_mem()) {
            return Some(value);
        }
        // Covers page-reload timing where memory has not been hydrated yet.
        self.storage.get(key).ok().flatten()
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.storage.set(key, value),
            None => self.storage.remove(key),
        };
        if let Err(err) = result {
            tracing::warn!(key, error = %err, "session storage unavailable, continuing in memory");
        }
    }

    fn read_mem(&self) -> std::sync::RwLockReadGuard<'_, MemTokens> {
        self.mem.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_mem(&self) -> std::sync::RwLockWriteGuard<'_, MemTokens> {
        self.mem.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
