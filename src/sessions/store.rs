//! Session store.
//!
//! Owns all session mutation. Each customer maps to one handle guarded by an
//! async mutex; the engine holds that lock for the duration of a turn
//! (fetch → persist), which serializes turns per customer while leaving
//! different customers fully parallel.
//!
//! Persistence is one JSON file per customer under the configured directory,
//! written through on every mutation. Writes go through `tokio::fs` because
//! callers hold the per-customer lock inside async turns; a blocking write
//! there would stall a worker thread. A corrupt or unreadable file is
//! logged and replaced with a fresh session rather than failing the turn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Session, INITIAL_STATE};

/// Shared, per-customer session handle. Locking it is what serializes a
/// customer's turns.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Session persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Store of per-customer conversation sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    persist_dir: Option<PathBuf>,
    entries: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    /// Create an in-memory store (no persistence), used by tests and the
    /// `simulate` CLI.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that writes each session through to
    /// `{dir}/{customer}.json`.
    pub fn with_persist_dir(dir: impl Into<PathBuf>) -> Result<Self, SessionStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| SessionStoreError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            persist_dir: Some(dir),
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Return the customer's session handle, creating a fresh session in the
    /// initial sentinel state if none exists. Safe under concurrent first
    /// contact: the map entry is inserted under a write lock, so duplicate
    /// creation cannot happen.
    ///
    /// A logically retired session is reinitialized in place on next
    /// contact, preserving the record itself.
    pub async fn get_or_create(&self, customer_id: &str) -> SessionHandle {
        let handle = {
            let entries = self.entries.read();
            entries.get(customer_id).cloned()
        };
        let handle = match handle {
            Some(handle) => handle,
            None => {
                let loaded = self
                    .load_from_disk(customer_id)
                    .await
                    .unwrap_or_else(|| Session::new(customer_id));
                let mut entries = self.entries.write();
                entries
                    .entry(customer_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(loaded)))
                    .clone()
            }
        };

        {
            let mut session = handle.lock().await;
            if !session.is_active {
                debug!(customer = customer_id, "reviving retired session");
                let created_at = session.created_at;
                *session = Session::new(customer_id);
                session.created_at = created_at;
                self.persist_logged(&session).await;
            }
        }
        handle
    }

    /// Point the session at a new state token and persist. Validation of the
    /// token against the active flow is the caller's job.
    pub async fn set_state(
        &self,
        session: &mut Session,
        new_state_token: impl Into<String>,
    ) -> Result<(), SessionStoreError> {
        session.current_state = new_state_token.into();
        session.touch();
        self.persist(session).await
    }

    /// Replace the session's context bag and persist.
    pub async fn set_context(
        &self,
        session: &mut Session,
        context_data: HashMap<String, serde_json::Value>,
    ) -> Result<(), SessionStoreError> {
        session.context_data = context_data;
        session.touch();
        self.persist(session).await
    }

    /// Logically retire a session. Used for explicit resets and stale
    /// cleanup; the record survives until the customer's next contact.
    pub async fn mark_inactive(&self, session: &mut Session) -> Result<(), SessionStoreError> {
        session.is_active = false;
        session.touch();
        self.persist(session).await
    }

    /// Retire sessions untouched for longer than `older_than`. Batch
    /// operation, run on a schedule outside the per-turn hot path. Sessions
    /// currently locked by a turn are skipped; they are active by
    /// definition.
    pub async fn cleanup_stale(&self, older_than: Duration) -> usize {
        let horizon = Utc::now() - older_than;
        let handles: Vec<SessionHandle> = self.entries.read().values().cloned().collect();

        let mut retired = 0;
        for handle in handles {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            if session.is_active && session.updated_at < horizon {
                session.is_active = false;
                session.touch();
                self.persist_logged(&session).await;
                retired += 1;
            }
        }
        if retired > 0 {
            info!(retired, "retired stale sessions");
        }
        retired
    }

    /// Number of sessions currently loaded.
    pub fn loaded_count(&self) -> usize {
        self.entries.read().len()
    }

    async fn load_from_disk(&self, customer_id: &str) -> Option<Session> {
        let path = self.session_path(customer_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read session file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt session file, starting fresh");
                None
            }
        }
    }

    async fn persist(&self, session: &Session) -> Result<(), SessionStoreError> {
        let Some(path) = self.session_path(&session.customer_id) else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| SessionStoreError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    async fn persist_logged(&self, session: &Session) {
        if let Err(e) = self.persist(session).await {
            warn!(customer = %session.customer_id, error = %e, "failed to persist session");
        }
    }

    fn session_path(&self, customer_id: &str) -> Option<PathBuf> {
        let dir = self.persist_dir.as_ref()?;
        Some(dir.join(format!("{}.json", sanitize_file_stem(customer_id))))
    }
}

/// Map a customer id to a filesystem-safe file stem.
fn sanitize_file_stem(customer_id: &str) -> String {
    customer_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Load every persisted session file under `dir`. Used by maintenance paths
/// (stale cleanup across restarts), not the per-turn hot path.
pub fn preload_sessions(store: &SessionStore, dir: &Path) -> usize {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut loaded = 0;
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => {
                let mut entries = store.entries.write();
                entries
                    .entry(session.customer_id.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(session)));
                loaded += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping corrupt session file"),
        }
    }
    loaded
}
