//! In-memory source of truth for "who is online now".
//!
//! Presence is process-local state: running more than one server instance
//! would fragment the roster, which is an accepted scope limit of this
//! design.

use std::{collections::HashMap, sync::Arc};

use shared::{
    domain::{UserId, UserProfile},
    protocol::ServerEvent,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type ClientSender = mpsc::UnboundedSender<ServerEvent>;

struct PresenceEntry {
    connection_id: ConnectionId,
    profile: UserProfile,
}

#[derive(Default)]
struct RegistryInner {
    /// Every open socket, identified or not; roster broadcasts reach all of
    /// them.
    connections: HashMap<ConnectionId, ClientSender>,
    /// One entry per logged-in user; a second login for the same user
    /// overwrites the earlier mapping (last login wins).
    entries: HashMap<UserId, PresenceEntry>,
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_connection(&self, connection_id: ConnectionId, sender: ClientSender) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(connection_id, sender);
    }

    /// Records a login and broadcasts the refreshed roster. An incomplete
    /// identity is logged and ignored; the client is expected to resend on
    /// reconnect.
    pub async fn record_login(&self, connection_id: ConnectionId, profile: UserProfile) -> bool {
        if !profile.is_complete() {
            warn!(
                user_id = profile.id.0,
                %connection_id,
                "ignoring login with missing identity fields"
            );
            return false;
        }

        let mut inner = self.inner.write().await;
        inner.entries.insert(
            profile.id,
            PresenceEntry {
                connection_id,
                profile,
            },
        );
        broadcast_roster(&inner);
        true
    }

    /// Removes whatever entry belongs to this connection. The scan is linear;
    /// the roster is small enough that a secondary index would buy nothing.
    /// A superseded session's disconnect matches no entry and removes
    /// nothing.
    pub async fn record_disconnect(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(&connection_id);

        let departed = inner
            .entries
            .iter()
            .find(|(_, entry)| entry.connection_id == connection_id)
            .map(|(user_id, _)| *user_id);

        if let Some(user_id) = departed {
            inner.entries.remove(&user_id);
            broadcast_roster(&inner);
        }
    }

    /// Absence means the user is offline; callers fall back to
    /// persistence-only delivery.
    pub async fn resolve(&self, user_id: UserId) -> Option<ClientSender> {
        let inner = self.inner.read().await;
        let entry = inner.entries.get(&user_id)?;
        inner.connections.get(&entry.connection_id).cloned()
    }

    /// Pushes an event to a user's live connection. Returns false when the
    /// user is offline or the connection already closed; a push racing a
    /// disconnect is a silent no-op.
    pub async fn send_to(&self, user_id: UserId, event: ServerEvent) -> bool {
        let Some(sender) = self.resolve(user_id).await else {
            return false;
        };
        if sender.send(event).is_err() {
            debug!(user_id = user_id.0, "push raced a closing connection");
            return false;
        }
        true
    }

    pub async fn roster(&self) -> Vec<UserProfile> {
        let inner = self.inner.read().await;
        sorted_roster(&inner)
    }
}

fn sorted_roster(inner: &RegistryInner) -> Vec<UserProfile> {
    let mut roster: Vec<UserProfile> = inner
        .entries
        .values()
        .map(|entry| entry.profile.clone())
        .collect();
    roster.sort_by_key(|profile| profile.id);
    roster
}

/// Sends the full roster (profiles only, never connection ids) to every open
/// connection. Sends to connections mid-close are dropped.
fn broadcast_roster(inner: &RegistryInner) {
    let event = ServerEvent::OnlineUsers {
        users: sorted_roster(inner),
    };
    for sender in inner.connections.values() {
        let _ = sender.send(event.clone());
    }
}
