//! Routes client events to persistence and to live connections.
//!
//! The handler order is persist, then resolve, then push. Recipient
//! resolution always happens after the persistence await so a login or
//! disconnect that interleaves with the durable write is reflected in the
//! delivery, never a stale cached target.

use server_api::ApiContext;
use shared::{
    domain::{GroupId, UserId, UserProfile},
    error::{ApiException, ErrorCode},
    protocol::{ClientEvent, GroupMessagePayload, PrivateMessagePayload, ServerEvent},
};
use tracing::{debug, error, warn};

use crate::presence::{ConnectionId, PresenceRegistry};

#[derive(Clone)]
pub struct MessageRouter {
    api: ApiContext,
    registry: PresenceRegistry,
}

/// Transport-adapter policy: which events report failures back to the
/// originating connection. Private sends are fire-and-forget; group sends
/// have no offline-reconciliation fallback, so their NotFound surfaces.
pub fn error_is_surfaced(event: &ClientEvent) -> bool {
    !matches!(
        event,
        ClientEvent::Login(_) | ClientEvent::PrivateMessage(_)
    )
}

impl MessageRouter {
    pub fn new(api: ApiContext, registry: PresenceRegistry) -> Self {
        Self { api, registry }
    }

    pub async fn dispatch(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), ApiException> {
        match event {
            ClientEvent::Login(profile) => {
                self.handle_login(connection_id, profile).await;
                Ok(())
            }
            ClientEvent::PrivateMessage(message) => {
                self.handle_private_message(message).await;
                Ok(())
            }
            ClientEvent::GroupMessage(message) => self.handle_group_message(message).await,
            ClientEvent::JoinGroup { group_id, user_id } => {
                self.handle_join(group_id, user_id).await
            }
            ClientEvent::LeaveGroup { group_id, user_id } => {
                self.handle_leave(group_id, user_id).await
            }
            ClientEvent::BlockUser {
                user_id,
                blocked_user_id,
            } => {
                server_api::block_user(&self.api, user_id, blocked_user_id).await?;
                self.notify_pair(
                    user_id,
                    blocked_user_id,
                    ServerEvent::UserBlocked {
                        user_id,
                        blocked_user_id,
                    },
                )
                .await;
                Ok(())
            }
            ClientEvent::UnblockUser {
                user_id,
                blocked_user_id,
            } => {
                server_api::unblock_user(&self.api, user_id, blocked_user_id).await?;
                self.notify_pair(
                    user_id,
                    blocked_user_id,
                    ServerEvent::UserUnblocked {
                        user_id,
                        blocked_user_id,
                    },
                )
                .await;
                Ok(())
            }
        }
    }

    async fn handle_login(&self, connection_id: ConnectionId, profile: UserProfile) {
        if !profile.is_complete() {
            warn!(
                user_id = profile.id.0,
                "dropping login with missing identity fields"
            );
            return;
        }
        // A failed snapshot write must not keep the user off the roster.
        if let Err(api_error) = server_api::record_identity(&self.api, &profile).await {
            error!(user_id = profile.id.0, ?api_error, "identity snapshot write failed");
        }
        self.registry.record_login(connection_id, profile).await;
    }

    /// Durability and delivery are separate failure domains: the message is
    /// persisted whether or not the recipient is online, and a transient
    /// persistence failure does not cancel the live push.
    async fn handle_private_message(&self, message: PrivateMessagePayload) {
        if let Err(api_error) = server_api::append_private_message(&self.api, &message).await {
            if api_error.code == ErrorCode::Validation {
                warn!(?api_error, "dropping malformed private message");
                return;
            }
            error!(
                sender = message.sender_id.0,
                recipient = message.recipient_id.0,
                ?api_error,
                "private message persist failed"
            );
        }

        let recipient_id = message.recipient_id;
        let delivered = self
            .registry
            .send_to(recipient_id, ServerEvent::PrivateMessage(message))
            .await;
        if !delivered {
            debug!(
                recipient = recipient_id.0,
                "recipient offline; durable copy awaits history fetch"
            );
        }
    }

    async fn handle_group_message(&self, message: GroupMessagePayload) -> Result<(), ApiException> {
        server_api::append_group_message(&self.api, &message).await?;

        let members = server_api::group_members(&self.api, message.group_id).await?;
        for member_id in members {
            if member_id == message.sender_id {
                continue;
            }
            self.registry
                .send_to(member_id, ServerEvent::GroupMessage(message.clone()))
                .await;
        }
        Ok(())
    }

    async fn handle_join(&self, group_id: GroupId, user_id: UserId) -> Result<(), ApiException> {
        let group = server_api::join_group(&self.api, group_id, user_id).await?;
        for member in &group.members {
            self.registry
                .send_to(
                    member.id,
                    ServerEvent::GroupUpdated {
                        group: group.clone(),
                    },
                )
                .await;
        }
        Ok(())
    }

    /// The leaver gets a targeted event so their client drops the group;
    /// remaining members get the refreshed roster.
    async fn handle_leave(&self, group_id: GroupId, user_id: UserId) -> Result<(), ApiException> {
        let group = server_api::leave_group(&self.api, group_id, user_id).await?;
        self.registry
            .send_to(user_id, ServerEvent::GroupLeft { group_id })
            .await;
        for member in &group.members {
            self.registry
                .send_to(
                    member.id,
                    ServerEvent::GroupUpdated {
                        group: group.clone(),
                    },
                )
                .await;
        }
        Ok(())
    }

    async fn notify_pair(&self, first: UserId, second: UserId, event: ServerEvent) {
        self.registry.send_to(first, event.clone()).await;
        self.registry.send_to(second, event).await;
    }
}
