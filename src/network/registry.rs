//! Session registry
//!
//! Process-wide bookkeeping of live sessions. The registry never owns a
//! session; it keeps a snapshot per session id. Registering returns a
//! [`Registration`] guard and dropping that guard is the only way an entry
//! is removed, so a closed session can never linger in the set.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::network::handshake::Authorization;

/// Snapshot of a registered session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    pub peer: SocketAddr,
    pub channels: u16,
    pub authorization: Authorization,
    pub connected_at: DateTime<Utc>,
}

/// Set of live sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session; it stays registered until the guard drops
    pub fn register(self: &Arc<Self>, info: SessionInfo) -> Registration {
        let id = info.id;
        self.sessions.lock().insert(id, info);
        tracing::debug!("Registered session {}", id);
        Registration {
            registry: self.clone(),
            id,
        }
    }

    fn remove(&self, id: &Uuid) {
        if self.sessions.lock().remove(id).is_some() {
            tracing::debug!("Unregistered session {}", id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Snapshot of every live session, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }
}

/// Keeps a session registered while alive
pub struct Registration {
    registry: Arc<SessionRegistry>,
    id: Uuid,
}

impl Registration {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(port: u16) -> SessionInfo {
        SessionInfo {
            id: Uuid::new_v4(),
            peer: SocketAddr::from(([127, 0, 0, 1], port)),
            channels: 1,
            authorization: Authorization::NotRequired,
            connected_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_and_drop() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.register(info(1000));
        let b = registry.register(info(1001));
        assert_eq!(registry.len(), 2);

        let a_id = a.id();
        drop(a);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(&a_id));
        assert!(registry.contains(&b.id()));

        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_snapshot() {
        let registry = Arc::new(SessionRegistry::new());
        let _a = registry.register(info(2000));
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].peer.port(), 2000);
    }
}
