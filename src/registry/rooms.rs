//! Room membership registry
//!
//! Maps room keys to their member clients and clients to their display name,
//! room and outbound channel. All state sits behind a single lock so a room's
//! member set is never observed half-updated.

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::server::ServerMessage;

/// Room used when a join omits the room key
pub const DEFAULT_ROOM: &str = "default";

/// Display name used when a join omits the username
pub const DEFAULT_USERNAME: &str = "User";

/// Identifier assigned to each connection by the transport layer
pub type ClientId = Uuid;

/// Outbound channel for delivering messages to one connection
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Errors that can occur during registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Room identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub String);

impl RoomId {
    /// Resolve an optional room key, falling back to [`DEFAULT_ROOM`]
    pub fn or_default(room: Option<&str>) -> Self {
        match room {
            Some(r) if !r.is_empty() => RoomId(r.to_string()),
            _ => RoomId(DEFAULT_ROOM.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        RoomId(value.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A delivery target: a member's id and its outbound channel
#[derive(Debug, Clone)]
pub struct Recipient {
    pub client_id: ClientId,
    pub outbox: Outbox,
}

/// Outcome of a join, captured in the same critical section as the mutation
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Room the client is now a member of
    pub room: RoomId,
    /// Display name recorded for the client
    pub username: String,
    /// Room the client was moved out of, if it was elsewhere
    pub previous_room: Option<RoomId>,
    /// Every member of `room`, the joining client included
    pub recipients: Vec<Recipient>,
}

#[derive(Debug)]
struct ClientRecord {
    username: String,
    room: Option<RoomId>,
    outbox: Outbox,
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<ClientId, ClientRecord>,
    rooms: HashMap<RoomId, HashSet<ClientId>>,
}

impl Inner {
    /// Remove a client from its room, pruning the room once empty
    fn detach(&mut self, client_id: ClientId) -> Option<RoomId> {
        let record = self.clients.get_mut(&client_id)?;
        let room = record.room.take()?;

        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&client_id);
            if members.is_empty() {
                self.rooms.remove(&room);
                debug!("Room {} is empty, pruned", room);
            }
        }

        Some(room)
    }

    fn recipients(&self, room: &RoomId) -> Vec<Recipient> {
        let Some(members) = self.rooms.get(room) else {
            return Vec::new();
        };

        members
            .iter()
            .filter_map(|id| {
                self.clients.get(id).map(|record| Recipient {
                    client_id: *id,
                    outbox: record.outbox.clone(),
                })
            })
            .collect()
    }
}

/// Registry of connected clients and their room memberships
///
/// A client belongs to at most one room. Rooms have no state of their own
/// beyond their member set: they appear on first join and are pruned when
/// the last member leaves.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected client with no room and the default name
    ///
    /// Registering an id that already exists replaces its outbound channel.
    pub async fn register(&self, client_id: ClientId, outbox: Outbox) {
        let mut inner = self.inner.write().await;

        match inner.clients.get_mut(&client_id) {
            Some(record) => record.outbox = outbox,
            None => {
                inner.clients.insert(
                    client_id,
                    ClientRecord {
                        username: DEFAULT_USERNAME.to_string(),
                        room: None,
                        outbox,
                    },
                );
            }
        }

        debug!("Registered client {}", client_id);
    }

    /// Move a client into a room, recording its display name
    ///
    /// Missing or empty values fall back to [`DEFAULT_ROOM`] and
    /// [`DEFAULT_USERNAME`]. The client leaves its previous room first.
    pub async fn join(
        &self,
        client_id: ClientId,
        room: Option<&str>,
        username: Option<&str>,
    ) -> RegistryResult<JoinOutcome> {
        let room = RoomId::or_default(room);
        let username = match username {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => DEFAULT_USERNAME.to_string(),
        };

        let mut inner = self.inner.write().await;

        if !inner.clients.contains_key(&client_id) {
            return Err(RegistryError::UnknownClient(client_id));
        }

        let current_room = inner
            .clients
            .get(&client_id)
            .and_then(|record| record.room.clone());
        let previous_room = match current_room {
            Some(current) if current == room => None,
            Some(_) => inner.detach(client_id),
            None => None,
        };

        inner.rooms.entry(room.clone()).or_default().insert(client_id);
        if let Some(record) = inner.clients.get_mut(&client_id) {
            record.username = username.clone();
            record.room = Some(room.clone());
        }

        let recipients = inner.recipients(&room);

        Ok(JoinOutcome {
            room,
            username,
            previous_room,
            recipients,
        })
    }

    /// Remove a client from its current room
    ///
    /// Returns the room that was left. Unknown or roomless clients are a no-op.
    pub async fn leave(&self, client_id: ClientId) -> Option<RoomId> {
        self.inner.write().await.detach(client_id)
    }

    /// Remove a client from its room and drop its record
    ///
    /// Returns `false` when the client was not registered.
    pub async fn unregister(&self, client_id: ClientId) -> bool {
        let mut inner = self.inner.write().await;
        inner.detach(client_id);
        let existed = inner.clients.remove(&client_id).is_some();
        if existed {
            debug!("Unregistered client {}", client_id);
        }
        existed
    }

    /// Current room of a client
    pub async fn room_of(&self, client_id: ClientId) -> Option<RoomId> {
        self.inner
            .read()
            .await
            .clients
            .get(&client_id)
            .and_then(|record| record.room.clone())
    }

    /// Display name of a client
    pub async fn username_of(&self, client_id: ClientId) -> Option<String> {
        self.inner
            .read()
            .await
            .clients
            .get(&client_id)
            .map(|record| record.username.clone())
    }

    /// Outbound channel of a single client
    pub async fn outbox_of(&self, client_id: ClientId) -> Option<Outbox> {
        self.inner
            .read()
            .await
            .clients
            .get(&client_id)
            .map(|record| record.outbox.clone())
    }

    /// Member ids of a room, sorted
    pub async fn members(&self, room: &RoomId) -> Vec<ClientId> {
        let inner = self.inner.read().await;
        let mut members: Vec<ClientId> = inner
            .rooms
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Delivery targets for every member of a room
    pub async fn recipients(&self, room: &RoomId) -> Vec<Recipient> {
        self.inner.read().await.recipients(room)
    }

    /// Check if a client is registered
    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.inner.read().await.clients.contains_key(&client_id)
    }

    /// Number of registered clients
    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    /// Number of rooms with at least one member
    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    async fn registered(registry: &ConnectionRegistry) -> ClientId {
        let id = Uuid::new_v4();
        let (tx, _rx) = outbox();
        registry.register(id, tx).await;
        id
    }

    #[tokio::test]
    async fn test_register_has_no_room_and_default_name() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        assert!(registry.contains(id).await);
        assert_eq!(registry.room_of(id).await, None);
        assert_eq!(registry.username_of(id).await.as_deref(), Some(DEFAULT_USERNAME));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_adds_member() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        let outcome = registry.join(id, Some("r1"), Some("alice")).await.unwrap();
        assert_eq!(outcome.room, RoomId::from("r1"));
        assert_eq!(outcome.username, "alice");
        assert_eq!(outcome.previous_room, None);
        assert_eq!(outcome.recipients.len(), 1);
        assert_eq!(outcome.recipients[0].client_id, id);

        assert_eq!(registry.members(&RoomId::from("r1")).await, vec![id]);
        assert_eq!(registry.room_of(id).await, Some(RoomId::from("r1")));
    }

    #[tokio::test]
    async fn test_join_defaults() {
        let registry = ConnectionRegistry::new();
        let a = registered(&registry).await;
        let b = registered(&registry).await;

        let outcome = registry.join(a, None, None).await.unwrap();
        assert_eq!(outcome.room.as_str(), DEFAULT_ROOM);
        assert_eq!(outcome.username, DEFAULT_USERNAME);

        let outcome = registry.join(b, Some(""), Some("")).await.unwrap();
        assert_eq!(outcome.room.as_str(), DEFAULT_ROOM);
        assert_eq!(outcome.username, DEFAULT_USERNAME);
        assert_eq!(outcome.recipients.len(), 2);
    }

    #[tokio::test]
    async fn test_join_without_username_records_user() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        registry.join(id, Some("r1"), None).await.unwrap();
        assert_eq!(registry.username_of(id).await.as_deref(), Some("User"));
    }

    #[tokio::test]
    async fn test_join_same_room_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        registry.join(id, Some("r1"), Some("alice")).await.unwrap();
        let outcome = registry.join(id, Some("r1"), Some("alice")).await.unwrap();

        assert_eq!(outcome.previous_room, None);
        assert_eq!(outcome.recipients.len(), 1);
        assert_eq!(registry.members(&RoomId::from("r1")).await, vec![id]);
    }

    #[tokio::test]
    async fn test_join_new_room_leaves_previous() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        registry.join(id, Some("r1"), None).await.unwrap();
        let outcome = registry.join(id, Some("r2"), None).await.unwrap();

        assert_eq!(outcome.previous_room, Some(RoomId::from("r1")));
        assert!(registry.members(&RoomId::from("r1")).await.is_empty());
        assert_eq!(registry.members(&RoomId::from("r2")).await, vec![id]);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_updates_username() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        registry.join(id, Some("r1"), Some("alice")).await.unwrap();
        registry.join(id, Some("r1"), Some("alicia")).await.unwrap();
        assert_eq!(registry.username_of(id).await.as_deref(), Some("alicia"));
    }

    #[tokio::test]
    async fn test_join_unknown_client() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();

        let result = registry.join(id, Some("r1"), None).await;
        assert_eq!(result.unwrap_err(), RegistryError::UnknownClient(id));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_prunes_empty_room() {
        let registry = ConnectionRegistry::new();
        let a = registered(&registry).await;
        let b = registered(&registry).await;
        registry.join(a, Some("r1"), None).await.unwrap();
        registry.join(b, Some("r1"), None).await.unwrap();

        assert_eq!(registry.leave(a).await, Some(RoomId::from("r1")));
        assert_eq!(registry.members(&RoomId::from("r1")).await, vec![b]);
        assert_eq!(registry.room_of(a).await, None);
        assert!(registry.contains(a).await);

        registry.leave(b).await;
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_without_room_is_noop() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        assert_eq!(registry.leave(id).await, None);
        assert_eq!(registry.leave(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn test_unregister_removes_membership() {
        let registry = ConnectionRegistry::new();
        let a = registered(&registry).await;
        let b = registered(&registry).await;
        registry.join(a, Some("r1"), None).await.unwrap();
        registry.join(b, Some("r1"), None).await.unwrap();

        assert!(registry.unregister(a).await);
        assert!(!registry.contains(a).await);
        assert_eq!(registry.members(&RoomId::from("r1")).await, vec![b]);

        let targets: Vec<ClientId> = registry
            .recipients(&RoomId::from("r1"))
            .await
            .into_iter()
            .map(|r| r.client_id)
            .collect();
        assert_eq!(targets, vec![b]);
    }

    #[tokio::test]
    async fn test_unregister_twice() {
        let registry = ConnectionRegistry::new();
        let id = registered(&registry).await;

        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);
        assert_eq!(registry.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_register_replaces_outbox() {
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        let (old_tx, old_rx) = outbox();
        let (new_tx, mut new_rx) = outbox();

        registry.register(id, old_tx).await;
        registry.join(id, Some("r1"), Some("alice")).await.unwrap();
        drop(old_rx);
        registry.register(id, new_tx).await;

        assert_eq!(registry.room_of(id).await, Some(RoomId::from("r1")));
        let outbox = registry.outbox_of(id).await.unwrap();
        outbox.send(ServerMessage::pong(7)).unwrap();
        assert_eq!(new_rx.recv().await, Some(ServerMessage::pong(7)));
    }

    #[tokio::test]
    async fn test_concurrent_joins() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());
        let mut ids = Vec::new();
        for _ in 0..32 {
            ids.push(registered(&registry).await);
        }

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let registry = std::sync::Arc::clone(&registry);
                let id = *id;
                tokio::spawn(async move { registry.join(id, Some("busy"), None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(registry.members(&RoomId::from("busy")).await, expected);
    }

    #[test]
    fn test_room_id_or_default() {
        assert_eq!(RoomId::or_default(None).as_str(), DEFAULT_ROOM);
        assert_eq!(RoomId::or_default(Some("")).as_str(), DEFAULT_ROOM);
        assert_eq!(RoomId::or_default(Some("lobby")).to_string(), "lobby");
    }
}
