/// Credential store: durable username -> password hash records
///
/// The whole record set lives in one JSON document that is rewritten on every
/// registration (write to a temp file in the same directory, fsync, atomic
/// rename). Readers work from an immutable in-memory snapshot that is swapped
/// only after the new document is durable, so a reader sees either the old or
/// the new record set and never a partial one.
use crate::error::{BrokerError, Result};
use crate::models::UserRecord;
use crate::security::SecretHasher;
use crate::validators::validate_registration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type Snapshot = Arc<HashMap<String, UserRecord>>;

/// On-disk layout: `{"users": {"alice": {"password": "$argon2id$..."}}}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    users: BTreeMap<String, StoredUser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredUser {
    password: String,
}

impl StoreDocument {
    fn from_records(records: &HashMap<String, UserRecord>) -> Self {
        let users = records
            .values()
            .map(|record| {
                (
                    record.username.clone(),
                    StoredUser {
                        password: record.password_hash.clone(),
                    },
                )
            })
            .collect();
        Self { users }
    }

    fn into_records(self) -> HashMap<String, UserRecord> {
        self.users
            .into_iter()
            .map(|(username, stored)| {
                let record = UserRecord::new(username.clone(), stored.password);
                (username, record)
            })
            .collect()
    }
}

struct StoreInner {
    path: Option<PathBuf>,
    snapshot: RwLock<Snapshot>,
    /// Single-writer discipline for read-modify-write
    write_lock: Mutex<()>,
}

impl StoreInner {
    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    async fn insert_new(self: Arc<Self>, record: UserRecord) -> Result<UserRecord> {
        let _guard = self.write_lock.lock().await;

        let current = self.snapshot();
        if current.contains_key(&record.username) {
            return Err(BrokerError::DuplicateUser);
        }

        let mut next = HashMap::clone(&current);
        next.insert(record.username.clone(), record.clone());

        if let Some(path) = self.path.clone() {
            let document = StoreDocument::from_records(&next);
            tokio::task::spawn_blocking(move || write_document(&path, &document)).await??;
        }

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);

        Ok(record)
    }
}

/// Keyed store of local accounts
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
    hasher: SecretHasher,
}

impl CredentialStore {
    /// Open (or create) the store document at `path`
    ///
    /// ## Errors
    ///
    /// `StorageFault` if the file exists but cannot be read or parsed, or if
    /// a fresh document cannot be created.
    pub async fn open(path: impl Into<PathBuf>, hasher: SecretHasher) -> Result<Self> {
        let path = path.into();
        let load_path = path.clone();

        let records = tokio::task::spawn_blocking(move || -> Result<_> {
            match read_document(&load_path)? {
                Some(document) => Ok(document.into_records()),
                None => {
                    write_document(&load_path, &StoreDocument::default())?;
                    info!(path = %load_path.display(), "Created empty credential store");
                    Ok(HashMap::new())
                }
            }
        })
        .await??;

        info!(
            path = %path.display(),
            users = records.len(),
            "Credential store opened"
        );

        Ok(Self::with_records(Some(path), records, hasher))
    }

    /// Store without a backing file
    pub fn in_memory(hasher: SecretHasher) -> Self {
        Self::with_records(None, HashMap::new(), hasher)
    }

    fn with_records(
        path: Option<PathBuf>,
        records: HashMap<String, UserRecord>,
        hasher: SecretHasher,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path,
                snapshot: RwLock::new(Arc::new(records)),
                write_lock: Mutex::new(()),
            }),
            hasher,
        }
    }

    /// Register a new account
    ///
    /// The password is hashed before the writer lock is taken; the duplicate
    /// check, durable write and snapshot swap then happen under the lock on a
    /// detached task, so dropping the returned future cannot interrupt them.
    ///
    /// ## Errors
    ///
    /// - `Validation` for malformed input
    /// - `DuplicateUser` if the name is taken (the existing record is kept)
    /// - `StorageFault` if the document cannot be written
    pub async fn register(&self, username: &str, password: &str) -> Result<UserRecord> {
        validate_registration(username, password)?;

        // Cheap early exit; the authoritative check happens under the lock
        if self.inner.snapshot().contains_key(username) {
            warn!(username = %username, "User already registered");
            return Err(BrokerError::DuplicateUser);
        }

        let hasher = self.hasher.clone();
        let plaintext = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hasher.hash(&plaintext)).await??;

        let record = UserRecord::new(username, password_hash);
        let inner = Arc::clone(&self.inner);
        let result = tokio::spawn(inner.insert_new(record)).await?;

        match &result {
            Ok(_) => info!(username = %username, "User registered"),
            Err(BrokerError::DuplicateUser) => {
                warn!(username = %username, "User already registered")
            }
            Err(e) => warn!(username = %username, error = %e, "Registration failed"),
        }

        result
    }

    /// Look up an account by username
    pub fn lookup(&self, username: &str) -> Option<UserRecord> {
        let record = self.inner.snapshot().get(username).cloned();
        debug!(username = %username, found = record.is_some(), "Credential lookup");
        record
    }

    /// Verify a plaintext password against a stored hash on the blocking pool
    pub async fn verify_password(&self, plaintext: &str, stored_hash: &str) -> Result<bool> {
        let hasher = self.hasher.clone();
        let plaintext = plaintext.to_string();
        let stored_hash = stored_hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &stored_hash)).await?
    }

    /// Burn one verification's worth of work for an unknown account
    pub async fn verify_decoy(&self, plaintext: &str) -> Result<bool> {
        let hasher = self.hasher.clone();
        let plaintext = plaintext.to_string();
        Ok(tokio::task::spawn_blocking(move || hasher.verify_decoy(&plaintext)).await?)
    }

    pub fn len(&self) -> usize {
        self.inner.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.inner.path)
            .field("users", &self.len())
            .finish()
    }
}

fn read_document(path: &Path) -> Result<Option<StoreDocument>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
            BrokerError::StorageFault(format!(
                "corrupt credential store {}: {}",
                path.display(),
                e
            ))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_document(path: &Path, document: &StoreDocument) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, document)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| BrokerError::from(e.error))?;

    #[cfg(unix)]
    std::fs::File::open(dir)?.sync_all()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::HashCost;

    fn cheap_hasher() -> SecretHasher {
        SecretHasher::new(HashCost {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("database.json");

        let store = CredentialStore::open(&path, cheap_hasher()).await.unwrap();
        assert!(store.is_empty());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"users":{}}"#);
    }

    #[tokio::test]
    async fn test_register_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");

        let store = CredentialStore::open(&path, cheap_hasher()).await.unwrap();
        let record = store.register("alice", "s3cret").await.unwrap();
        assert_eq!(record.username, "alice");

        let reopened = CredentialStore::open(&path, cheap_hasher()).await.unwrap();
        let found = reopened.lookup("alice").expect("alice should be stored");
        assert_eq!(found, record);
        assert!(reopened
            .verify_password("s3cret", &found.password_hash)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_keeps_first_hash() {
        let store = CredentialStore::in_memory(cheap_hasher());
        let first = store.register("alice", "s3cret").await.unwrap();

        let second = store.register("alice", "other").await;
        assert!(matches!(second, Err(BrokerError::DuplicateUser)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup("alice").unwrap().password_hash, first.password_hash);
    }

    #[tokio::test]
    async fn test_reads_original_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");
        let hash = cheap_hasher().hash("s3cret").unwrap();
        std::fs::write(
            &path,
            format!(r#"{{"users":{{"bob":{{"password":"{}"}}}}}}"#, hash),
        )
        .unwrap();

        let store = CredentialStore::open(&path, cheap_hasher()).await.unwrap();
        assert_eq!(store.lookup("bob").unwrap().password_hash, hash);
        assert!(store.lookup("alice").is_none());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_storage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = CredentialStore::open(&path, cheap_hasher()).await;
        assert!(matches!(result, Err(BrokerError::StorageFault(_))));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_snapshot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.json");
        let store = CredentialStore::open(&path, cheap_hasher()).await.unwrap();

        // Replace the document path with a directory so the rename fails
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let result = store.register("alice", "s3cret").await;
        assert!(matches!(result, Err(BrokerError::StorageFault(_))));
        assert!(store.lookup("alice").is_none());
    }

    #[tokio::test]
    async fn test_invalid_username_rejected_before_hashing() {
        let store = CredentialStore::in_memory(cheap_hasher());
        let result = store.register("bad name", "s3cret").await;
        assert!(matches!(result, Err(BrokerError::Validation(_))));
        assert!(store.is_empty());
    }
}
