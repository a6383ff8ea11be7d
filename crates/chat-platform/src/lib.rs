//! Client-local persistence of the chosen session identifier.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session profile is corrupt: {0}")]
    Corrupt(String),
    #[error("session store backend failure: {0}")]
    Backend(String),
}

/// Remembers the last identifier so a returning user is treated as authenticated.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<String>, SessionStoreError>;

    fn save(&self, client_id: &str) -> Result<(), SessionStoreError>;

    /// Forget the identifier. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), SessionStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    data: Arc<RwLock<Option<String>>>,
}

impl SessionStore for InMemorySessionStore {
    fn load(&self) -> Result<Option<String>, SessionStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.clone())
    }

    fn save(&self, client_id: &str) -> Result<(), SessionStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        *data = Some(client_id.to_owned());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        *data = None;
        Ok(())
    }
}

/// On-disk session profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionProfile {
    pub client_id: String,
}

/// JSON-file store that replaces the profile atomically via a temp file.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let file_name = self
            .path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("session.json");
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        parent.join(format!(".{file_name}.{now_nanos}.tmp"))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<String>, SessionStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SessionStoreError::Unavailable(format!(
                    "failed reading session profile {}: {err}",
                    self.path.display()
                )));
            }
        };

        let profile = serde_json::from_str::<SessionProfile>(&raw).map_err(|err| {
            SessionStoreError::Corrupt(format!("{}: {err}", self.path.display()))
        })?;
        let client_id = profile.client_id.trim();
        if client_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(client_id.to_owned()))
    }

    fn save(&self, client_id: &str) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| {
                SessionStoreError::Unavailable(format!(
                    "failed creating session profile directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let profile = SessionProfile {
            client_id: client_id.to_owned(),
        };
        let encoded = serde_json::to_vec(&profile)
            .map_err(|err| SessionStoreError::Backend(err.to_string()))?;
        let temp_path = self.temp_path();
        fs::write(&temp_path, encoded).map_err(|err| {
            SessionStoreError::Backend(format!(
                "failed writing temp session profile {}: {err}",
                temp_path.display()
            ))
        })?;

        if let Err(rename_err) = fs::rename(&temp_path, &self.path) {
            // Windows does not allow replacing existing files via rename.
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    let _ = fs::remove_file(&temp_path);
                    return Err(SessionStoreError::Backend(format!(
                        "failed replacing session profile {} after rename error ({rename_err}): {err}",
                        self.path.display()
                    )));
                }
            }
            fs::rename(&temp_path, &self.path).map_err(|err| {
                let _ = fs::remove_file(&temp_path);
                SessionStoreError::Backend(format!(
                    "failed writing session profile {} after temp write: {err}",
                    self.path.display()
                ))
            })?;
        }

        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionStoreError::Backend(format!(
                "failed deleting session profile {}: {err}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn unique_temp_path(label: &str) -> PathBuf {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        env::temp_dir()
            .join(format!("chat-platform-{label}-{now_nanos}"))
            .join("session.json")
    }

    #[test]
    fn in_memory_store_tracks_latest_identifier() {
        let store = InMemorySessionStore::default();
        assert_eq!(store.load(), Ok(None));

        store.save("alice").expect("save should work");
        store.save("bob").expect("overwrite should work");
        assert_eq!(store.load(), Ok(Some("bob".to_owned())));

        store.clear().expect("clear should work");
        store.clear().expect("clearing twice is fine");
        assert_eq!(store.load(), Ok(None));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let path = unique_temp_path("persist");
        FileSessionStore::new(&path)
            .save("alice")
            .expect("save should create parent dirs");

        let reopened = FileSessionStore::new(&path);
        assert_eq!(reopened.load(), Ok(Some("alice".to_owned())));

        reopened.save("carol").expect("replace should work");
        assert_eq!(reopened.load(), Ok(Some("carol".to_owned())));

        reopened.clear().expect("clear should work");
        assert_eq!(reopened.load(), Ok(None));
        reopened.clear().expect("clearing a missing file is fine");
    }

    #[test]
    fn file_store_reports_corrupt_profile() {
        let path = unique_temp_path("corrupt");
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, b"{not json").expect("write");

        let err = FileSessionStore::new(&path)
            .load()
            .expect_err("corrupt profile must fail");
        assert!(matches!(err, SessionStoreError::Corrupt(_)));
    }

    #[test]
    fn blank_persisted_identifier_counts_as_absent() {
        let path = unique_temp_path("blank");
        let store = FileSessionStore::new(&path);
        store.save("   ").expect("save should work");
        assert_eq!(store.load(), Ok(None));
    }

    #[derive(Default)]
    struct FailingStore;

    impl SessionStore for FailingStore {
        fn load(&self) -> Result<Option<String>, SessionStoreError> {
            Err(SessionStoreError::Unavailable("mock outage".to_owned()))
        }

        fn save(&self, _client_id: &str) -> Result<(), SessionStoreError> {
            Err(SessionStoreError::Unavailable("mock outage".to_owned()))
        }

        fn clear(&self) -> Result<(), SessionStoreError> {
            Err(SessionStoreError::Unavailable("mock outage".to_owned()))
        }
    }

    #[test]
    fn failures_surface_through_trait_objects() {
        let store: Box<dyn SessionStore> = Box::new(FailingStore);
        assert_eq!(
            store.save("alice"),
            Err(SessionStoreError::Unavailable("mock outage".to_owned()))
        );
    }
}
