use shared::{
    domain::{GroupId, MessageId, ThreadKey, UserId, UserProfile},
    error::{ApiError, ErrorCode},
    protocol::{GroupMessagePayload, GroupSummary, PrivateMessagePayload},
};
use storage::Storage;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Records the verified identity snapshot delivered with a login event.
pub async fn record_identity(ctx: &ApiContext, profile: &UserProfile) -> Result<(), ApiError> {
    if !profile.is_complete() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "login identity is missing fields",
        ));
    }
    ctx.storage.upsert_user(profile).await.map_err(internal)
}

/// Persists a private message into the thread for the unordered participant
/// pair. Runs regardless of whether the recipient is online; offline
/// recipients reconcile through a later history fetch.
pub async fn append_private_message(
    ctx: &ApiContext,
    message: &PrivateMessagePayload,
) -> Result<MessageId, ApiError> {
    if message.content.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "message content cannot be empty",
        ));
    }
    let key = ThreadKey::new(message.sender_id, message.recipient_id);
    ctx.storage
        .append_private_message(
            key,
            message.sender_id,
            message.recipient_id,
            &message.content,
            message.timestamp,
        )
        .await
        .map_err(internal)
}

pub async fn chat_history(
    ctx: &ApiContext,
    sender_id: UserId,
    recipient_id: UserId,
) -> Result<Vec<PrivateMessagePayload>, ApiError> {
    let messages = ctx
        .storage
        .thread_messages(ThreadKey::new(sender_id, recipient_id))
        .await
        .map_err(internal)?;
    Ok(messages
        .into_iter()
        .map(|m| PrivateMessagePayload {
            sender_id: m.sender_id,
            recipient_id: m.recipient_id,
            content: m.content,
            timestamp: m.sent_at,
        })
        .collect())
}

/// Creates a group and returns it with members resolved to full identity
/// snapshots for immediate client rendering.
pub async fn create_group(
    ctx: &ApiContext,
    name: &str,
    member_ids: &[UserId],
) -> Result<GroupSummary, ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "group name cannot be empty",
        ));
    }
    let group_id = ctx
        .storage
        .create_group(name, member_ids)
        .await
        .map_err(internal)?;
    group_summary(ctx, group_id).await
}

pub async fn delete_group(ctx: &ApiContext, group_id: GroupId) -> Result<(), ApiError> {
    let deleted = ctx.storage.delete_group(group_id).await.map_err(internal)?;
    if !deleted {
        return Err(not_found(group_id));
    }
    Ok(())
}

/// Idempotent join; returns the refreshed group for roster notifications.
pub async fn join_group(
    ctx: &ApiContext,
    group_id: GroupId,
    user_id: UserId,
) -> Result<GroupSummary, ApiError> {
    ensure_group_exists(ctx, group_id).await?;
    ctx.storage
        .add_group_member(group_id, user_id)
        .await
        .map_err(internal)?;
    group_summary(ctx, group_id).await
}

/// Idempotent leave; prior messages keep their original attribution.
pub async fn leave_group(
    ctx: &ApiContext,
    group_id: GroupId,
    user_id: UserId,
) -> Result<GroupSummary, ApiError> {
    ensure_group_exists(ctx, group_id).await?;
    ctx.storage
        .remove_group_member(group_id, user_id)
        .await
        .map_err(internal)?;
    group_summary(ctx, group_id).await
}

pub async fn list_groups(ctx: &ApiContext, user_id: UserId) -> Result<Vec<GroupSummary>, ApiError> {
    let groups = ctx
        .storage
        .list_groups_for_member(user_id)
        .await
        .map_err(internal)?;
    let mut summaries = Vec::with_capacity(groups.len());
    for (group_id, group_name) in groups {
        let members = ctx
            .storage
            .profiles_for_members(group_id)
            .await
            .map_err(internal)?;
        summaries.push(GroupSummary {
            group_id,
            group_name,
            members,
        });
    }
    Ok(summaries)
}

pub async fn group_members(ctx: &ApiContext, group_id: GroupId) -> Result<Vec<UserId>, ApiError> {
    ctx.storage
        .group_member_ids(group_id)
        .await
        .map_err(internal)
}

/// Appends to the group log. Unlike private sends there is no symmetric-pair
/// fallback, so a group that does not resolve is surfaced as NotFound.
pub async fn append_group_message(
    ctx: &ApiContext,
    message: &GroupMessagePayload,
) -> Result<MessageId, ApiError> {
    if message.content.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "message content cannot be empty",
        ));
    }
    ctx.storage
        .append_group_message(
            message.group_id,
            message.sender_id,
            &message.sender_username,
            &message.content,
            message.timestamp,
        )
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(message.group_id))
}

pub async fn group_history(
    ctx: &ApiContext,
    group_id: GroupId,
) -> Result<Vec<GroupMessagePayload>, ApiError> {
    ensure_group_exists(ctx, group_id).await?;
    let messages = ctx.storage.group_messages(group_id).await.map_err(internal)?;
    Ok(messages
        .into_iter()
        .map(|m| GroupMessagePayload {
            group_id: m.group_id,
            sender_id: m.sender_id,
            sender_username: m.sender_username,
            content: m.content,
            timestamp: m.sent_at,
        })
        .collect())
}

pub async fn block_user(
    ctx: &ApiContext,
    user_id: UserId,
    blocked_user_id: UserId,
) -> Result<(), ApiError> {
    ctx.storage
        .set_block(user_id, blocked_user_id)
        .await
        .map_err(internal)
}

pub async fn unblock_user(
    ctx: &ApiContext,
    user_id: UserId,
    blocked_user_id: UserId,
) -> Result<(), ApiError> {
    ctx.storage
        .clear_block(user_id, blocked_user_id)
        .await
        .map_err(internal)
}

pub async fn group_summary(ctx: &ApiContext, group_id: GroupId) -> Result<GroupSummary, ApiError> {
    let group_name = ctx
        .storage
        .group_name(group_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(group_id))?;
    let members = ctx
        .storage
        .profiles_for_members(group_id)
        .await
        .map_err(internal)?;
    Ok(GroupSummary {
        group_id,
        group_name,
        members,
    })
}

async fn ensure_group_exists(ctx: &ApiContext, group_id: GroupId) -> Result<(), ApiError> {
    ctx.storage
        .group_name(group_id)
        .await
        .map_err(internal)?
        .map(|_| ())
        .ok_or_else(|| not_found(group_id))
}

fn not_found(group_id: GroupId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("group {} not found", group_id.0))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
