//! Durable storage for the current token set
//!
//! The file backend stores one `TokenSet` as pretty JSON and uses atomic
//! temp-file + rename writes so a crash mid-write never leaves a truncated
//! file behind. The file holds live OAuth tokens and is created `0600`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::TokenSet;

/// Boxed future returned by `Persistence` methods.
pub type PersistFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage collaborator for the credential store.
///
/// `delete` must succeed when nothing is stored.
pub trait Persistence: Send + Sync {
    fn save<'a>(&'a self, token_set: &'a TokenSet) -> PersistFuture<'a, ()>;

    fn load(&self) -> PersistFuture<'_, Option<TokenSet>>;

    fn delete(&self) -> PersistFuture<'_, ()>;
}

/// JSON file persistence.
pub struct FilePersistence {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Persistence for FilePersistence {
    fn save<'a>(&'a self, token_set: &'a TokenSet) -> PersistFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            write_atomic(&self.path, token_set).await
        })
    }

    fn load(&self) -> PersistFuture<'_, Option<TokenSet>> {
        Box::pin(async move {
            let contents = match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => contents,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    info!(path = %self.path.display(), "credential file not found");
                    return Ok(None);
                }
                Err(e) => return Err(Error::Io(format!("reading credential file: {e}"))),
            };
            let token_set: TokenSet = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(
                path = %self.path.display(),
                expires_at = %token_set.expires_at(),
                "loaded credentials"
            );
            Ok(Some(token_set))
        })
    }

    fn delete(&self) -> PersistFuture<'_, ()> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "deleted credential file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("deleting credential file: {e}"))),
            }
        })
    }
}

/// Write a token set to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only).
async fn write_atomic(path: &Path, token_set: &TokenSet) -> Result<()> {
    let json = serde_json::to_string_pretty(token_set)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

/// In-process persistence for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryPersistence {
    slot: Mutex<Option<TokenSet>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored value, for inspection.
    pub fn snapshot(&self) -> Option<TokenSet> {
        self.slot.lock().clone()
    }
}

impl Persistence for MemoryPersistence {
    fn save<'a>(&'a self, token_set: &'a TokenSet) -> PersistFuture<'a, ()> {
        *self.slot.lock() = Some(token_set.clone());
        Box::pin(async { Ok(()) })
    }

    fn load(&self) -> PersistFuture<'_, Option<TokenSet>> {
        let stored = self.slot.lock().clone();
        Box::pin(async move { Ok(stored) })
    }

    fn delete(&self) -> PersistFuture<'_, ()> {
        self.slot.lock().take();
        Box::pin(async { Ok(()) })
    }
}
