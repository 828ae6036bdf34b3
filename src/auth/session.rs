//! Session persistence and establishment. The session and permission set
//! are process-wide state with exactly one writer: the establisher here.
//! Logout and the HTTP layer's 401 hook fully clear the state; nothing
//! else mutates it.

use crate::api::{
    types::{MenuEntry, PermissionSet, PermissionUser, Session},
    ApiClient,
};
use anyhow::{Context, Result};
use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, warn};

/// Fixed file name the session is persisted under.
pub const SESSION_FILE_NAME: &str = "session.json";

/// Default session path: `$HOME/.cassa/session.json`, falling back to the
/// working directory when no home is set.
#[must_use]
pub fn default_session_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cassa").join(SESSION_FILE_NAME),
        None => PathBuf::from(".cassa").join(SESSION_FILE_NAME),
    }
}

/// Durable client storage for the session token and profile.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        match serde_json::from_str(&contents) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                // An unreadable session is the same as no session.
                warn!("discarding corrupt session file: {err}");
                Ok(None)
            }
        }
    }

    fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        debug!("session persisted to {}", self.path.display());

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct SessionState {
    session: Option<Session>,
    permissions: Option<PermissionSet>,
}

/// In-memory session context shared with the rest of the application.
/// Readers clone out of it; only the establisher and the clear paths
/// write.
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    #[must_use]
    pub fn permissions(&self) -> Option<PermissionSet> {
        self.lock().permissions.clone()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().session.is_some()
    }

    fn set_session(&self, session: Session) {
        self.lock().session = Some(session);
    }

    fn set_permissions(&self, permissions: PermissionSet) {
        self.lock().permissions = Some(permissions);
    }

    /// Clears both session and permissions; partial state is never left
    /// behind.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.session = None;
        state.permissions = None;
    }
}

/// Minimal safe authorization set installed when the permission fetch
/// fails, so the operator is never left with an undefined permission
/// state.
#[must_use]
pub fn fallback_permission_set(account: &str) -> PermissionSet {
    PermissionSet {
        menu: vec![MenuEntry {
            name: "Appearance settings".to_string(),
            url: "/settings/appearance".to_string(),
        }],
        user: PermissionUser {
            role_id: 0,
            account: account.to_string(),
        },
    }
}

/// Persists a freshly authenticated session and resolves its permission
/// set.
pub struct SessionEstablisher {
    store: Arc<dyn SessionStore>,
    handle: SessionHandle,
}

impl SessionEstablisher {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, handle: SessionHandle) -> Self {
        Self { store, handle }
    }

    #[must_use]
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Persists the session synchronously, then fetches the permission
    /// set. The fetch is best-effort: any error installs the fallback set
    /// and never fails the login. A failed durable write is logged; the
    /// in-memory session is still published.
    pub async fn establish(&self, api: &ApiClient, session: Session) -> PermissionSet {
        if let Err(err) = self.store.save(&session) {
            warn!("failed to persist session: {err}");
        }
        self.handle.set_session(session.clone());

        let permissions = match api.permissions().await {
            Ok(permissions) => permissions,
            Err(err) => {
                warn!("permission fetch failed, installing fallback: {err}");
                fallback_permission_set(&session.profile.account)
            }
        };

        self.handle.set_permissions(permissions.clone());

        permissions
    }

    /// Logout: clears durable and in-memory state in one step.
    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.handle.clear();
        Ok(())
    }
}
