//! Signaling router
//!
//! Binds connection lifecycle events and client messages to registry
//! operations, then fans the resulting messages out to room members.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::protocol::{
    ClientMessage, ErrorCode, JoinRequest, ProtocolError, ServerMessage, SignalKind,
    SignalPayload,
};
use crate::registry::{ClientId, ConnectionRegistry, Outbox, Recipient, RegistryError, RoomId};

/// Errors that can occur while routing a client event
#[derive(Debug, Error)]
pub enum RouterError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl RouterError {
    /// Error code reported to the sender when error replies are enabled
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::Protocol(ProtocolError::MissingRoom(_)) => ErrorCode::MissingRoom,
            RouterError::Protocol(ProtocolError::SerializationError(_)) => {
                ErrorCode::InvalidMessage
            }
            RouterError::Registry(RegistryError::UnknownClient(_)) => ErrorCode::UnknownClient,
        }
    }
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;

/// Behaviour switches for the router
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterOptions {
    /// Reply to the sender with an error message when its input is rejected
    pub reply_errors: bool,
    /// Route negotiation messages without a room to the sender's current room
    pub infer_room: bool,
}

/// Routes signaling traffic between the members of each room
pub struct SignalingRouter {
    registry: Arc<ConnectionRegistry>,
    options: RouterOptions,
}

impl SignalingRouter {
    /// Create a router over a registry
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self::with_options(registry, RouterOptions::default())
    }

    /// Create a router with explicit options
    pub fn with_options(registry: Arc<ConnectionRegistry>, options: RouterOptions) -> Self {
        Self { registry, options }
    }

    /// The registry this router mutates
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// A connection was established
    pub async fn connect(&self, client_id: ClientId, outbox: Outbox) {
        if outbox.send(ServerMessage::welcome(client_id)).is_err() {
            warn!("Client {} closed before welcome", client_id);
        }
        self.registry.register(client_id, outbox).await;
        info!("Client {} connected", client_id);
    }

    /// A connection was closed
    ///
    /// Removes the client from its room. Repeated disconnects are a no-op.
    pub async fn disconnect(&self, client_id: ClientId) {
        let room = self.registry.room_of(client_id).await;
        if self.registry.unregister(client_id).await {
            match room {
                Some(room) => info!("Client {} disconnected from room {}", client_id, room),
                None => info!("Client {} disconnected", client_id),
            }
        } else {
            debug!("Disconnect for unknown client {}, ignoring", client_id);
        }
    }

    /// Handle a raw text frame from a client
    ///
    /// Rejected input is logged and, when enabled, answered with an error
    /// message. Nothing is ever propagated to the caller.
    pub async fn handle_text(&self, client_id: ClientId, text: &str) {
        debug!("Received message from {}: {}", client_id, text);

        let result = match ClientMessage::from_json(text) {
            Ok(message) => self.dispatch(client_id, message).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            warn!("Rejected message from {}: {}", client_id, e);
            if self.options.reply_errors {
                let reply = ServerMessage::error_with_code(e.to_string(), e.code());
                self.send_to(client_id, reply).await;
            }
        }
    }

    /// Route a parsed client message
    ///
    /// Returns the number of connections the resulting message was delivered to.
    pub async fn dispatch(&self, client_id: ClientId, message: ClientMessage) -> RouterResult<usize> {
        match message {
            ClientMessage::Ping { seq } => {
                debug!("Ping from {} with seq {}", client_id, seq);
                Ok(usize::from(self.send_to(client_id, ServerMessage::pong(seq)).await))
            }
            ClientMessage::Join(request) => self.on_join(client_id, request).await,
            ClientMessage::Leave => {
                if let Some(room) = self.registry.leave(client_id).await {
                    info!("Client {} left room {}", client_id, room);
                }
                Ok(0)
            }
            ClientMessage::Offer(payload) => {
                self.on_signal(client_id, SignalKind::Offer, payload).await
            }
            ClientMessage::Answer(payload) => {
                self.on_signal(client_id, SignalKind::Answer, payload).await
            }
            ClientMessage::IceCandidate(payload) => {
                self.on_signal(client_id, SignalKind::IceCandidate, payload)
                    .await
            }
        }
    }

    async fn on_join(&self, client_id: ClientId, request: JoinRequest) -> RouterResult<usize> {
        let outcome = self
            .registry
            .join(
                client_id,
                request.room.as_deref(),
                request.username.as_deref(),
            )
            .await?;

        if let Some(previous) = &outcome.previous_room {
            debug!("Client {} moved out of room {}", client_id, previous);
        }
        info!("{} joined room {}", outcome.username, outcome.room);

        // The joiner is notified along with the existing members.
        let message = ServerMessage::user_joined(outcome.username);
        Ok(deliver(&outcome.recipients, &message, None))
    }

    async fn on_signal(
        &self,
        client_id: ClientId,
        kind: SignalKind,
        mut payload: SignalPayload,
    ) -> RouterResult<usize> {
        let addressed = payload.room().map(RoomId::from);
        let room = match addressed {
            Some(room) => room,
            None if self.options.infer_room => {
                let room = self
                    .registry
                    .room_of(client_id)
                    .await
                    .ok_or(ProtocolError::MissingRoom(kind))?;
                // Receivers see the room the message was routed to.
                payload.room = Some(room.to_string());
                room
            }
            None => return Err(ProtocolError::MissingRoom(kind).into()),
        };

        debug!("Forwarding {} from {} to room {}", kind, client_id, room);
        Ok(self
            .broadcast(&room, ServerMessage::forward(kind, payload), Some(client_id))
            .await)
    }

    /// Send a message to every member of a room, optionally skipping one
    pub async fn broadcast(
        &self,
        room: &RoomId,
        message: ServerMessage,
        exclude: Option<ClientId>,
    ) -> usize {
        let recipients = self.registry.recipients(room).await;
        deliver(&recipients, &message, exclude)
    }

    /// Send a message to a single client
    pub async fn send_to(&self, client_id: ClientId, message: ServerMessage) -> bool {
        match self.registry.outbox_of(client_id).await {
            Some(outbox) => outbox.send(message).is_ok(),
            None => false,
        }
    }
}

/// Fire-and-forget delivery; a closed channel never stops the others
fn deliver(recipients: &[Recipient], message: &ServerMessage, exclude: Option<ClientId>) -> usize {
    let mut delivered = 0;
    for recipient in recipients {
        if Some(recipient.client_id) == exclude {
            continue;
        }
        match recipient.outbox.send(message.clone()) {
            Ok(()) => delivered += 1,
            Err(_) => warn!("Failed to deliver to {}: channel closed", recipient.client_id),
        }
    }
    delivered
}
