use super::*;

fn profile(id: i64, username: &str) -> UserProfile {
    UserProfile {
        id: UserId(id),
        username: username.to_string(),
        photo_url: format!("https://cdn.example/{username}.png"),
        bio: format!("{username}'s bio"),
    }
}

fn at(minute: u32) -> DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&format!("2024-05-01T12:{minute:02}:00Z"))
        .expect("timestamp")
        .with_timezone(&Utc)
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("presence_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn upsert_refreshes_identity_snapshot() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.upsert_user(&profile(1, "ada")).await.expect("first");

    let mut updated = profile(1, "ada");
    updated.bio = "new bio".into();
    storage.upsert_user(&updated).await.expect("second");

    let stored = storage.get_user(UserId(1)).await.expect("get").expect("user");
    assert_eq!(stored.bio, "new bio");
}

#[tokio::test]
async fn both_send_directions_resolve_to_one_thread() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    storage
        .append_private_message(
            ThreadKey::new(UserId(1), UserId(2)),
            UserId(1),
            UserId(2),
            "hi",
            at(0),
        )
        .await
        .expect("a to b");
    storage
        .append_private_message(
            ThreadKey::new(UserId(2), UserId(1)),
            UserId(2),
            UserId(1),
            "hello back",
            at(1),
        )
        .await
        .expect("b to a");

    let messages = storage
        .thread_messages(ThreadKey::new(UserId(1), UserId(2)))
        .await
        .expect("history");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[1].content, "hello back");
}

#[tokio::test]
async fn thread_messages_keep_insertion_order() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let key = ThreadKey::new(UserId(3), UserId(4));

    for (minute, content) in [(0, "first"), (1, "second"), (2, "third")] {
        storage
            .append_private_message(key, UserId(3), UserId(4), content, at(minute))
            .await
            .expect("append");
    }

    let messages = storage.thread_messages(key).await.expect("history");
    let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn unknown_pair_has_empty_history() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let messages = storage
        .thread_messages(ThreadKey::new(UserId(8), UserId(9)))
        .await
        .expect("history");
    assert!(messages.is_empty());
}

#[tokio::test]
async fn group_roster_mutation_is_idempotent() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let group = storage
        .create_group("hiking", &[UserId(1), UserId(2)])
        .await
        .expect("group");

    storage
        .add_group_member(group, UserId(2))
        .await
        .expect("re-add");
    assert_eq!(
        storage.group_member_ids(group).await.expect("members"),
        vec![UserId(1), UserId(2)]
    );

    storage
        .remove_group_member(group, UserId(2))
        .await
        .expect("remove");
    storage
        .remove_group_member(group, UserId(2))
        .await
        .expect("remove again");
    assert_eq!(
        storage.group_member_ids(group).await.expect("members"),
        vec![UserId(1)]
    );
}

#[tokio::test]
async fn departed_member_keeps_message_attribution() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let group = storage
        .create_group("book club", &[UserId(1), UserId(2)])
        .await
        .expect("group");

    storage
        .append_group_message(group, UserId(2), "bob", "see chapter 3", at(0))
        .await
        .expect("append")
        .expect("group exists");
    storage
        .remove_group_member(group, UserId(2))
        .await
        .expect("leave");

    assert_eq!(
        storage.group_member_ids(group).await.expect("members"),
        vec![UserId(1)]
    );
    let log = storage.group_messages(group).await.expect("log");
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].sender_id, UserId(2));
    assert_eq!(log[0].sender_username, "bob");
}

#[tokio::test]
async fn append_to_deleted_group_affects_nothing() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let group = storage
        .create_group("ephemeral", &[UserId(1)])
        .await
        .expect("group");

    assert!(storage.delete_group(group).await.expect("delete"));
    assert!(!storage.delete_group(group).await.expect("second delete"));

    let appended = storage
        .append_group_message(group, UserId(1), "ada", "anyone?", at(0))
        .await
        .expect("append");
    assert!(appended.is_none());
    assert!(storage.group_messages(group).await.expect("log").is_empty());
}

#[tokio::test]
async fn lists_groups_by_member() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage
        .create_group("first", &[UserId(1), UserId(2)])
        .await
        .expect("first");
    let _second = storage
        .create_group("second", &[UserId(2)])
        .await
        .expect("second");

    let groups = storage
        .list_groups_for_member(UserId(1))
        .await
        .expect("groups");
    assert_eq!(groups, vec![(first, "first".to_string())]);
}

#[tokio::test]
async fn member_profiles_resolve_from_snapshots() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.upsert_user(&profile(1, "ada")).await.expect("ada");
    storage.upsert_user(&profile(2, "bob")).await.expect("bob");
    let group = storage
        .create_group("pair", &[UserId(1), UserId(2), UserId(99)])
        .await
        .expect("group");

    let members = storage.profiles_for_members(group).await.expect("profiles");
    // No snapshot for 99; it stays a bare roster entry.
    let usernames: Vec<_> = members.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(usernames, vec!["ada", "bob"]);
}

#[tokio::test]
async fn block_relation_reads_both_directions() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.set_block(UserId(1), UserId(2)).await.expect("block");
    storage.set_block(UserId(1), UserId(2)).await.expect("again");

    assert_eq!(
        storage.blocked_users(UserId(1)).await.expect("forward"),
        vec![UserId(2)]
    );
    assert_eq!(
        storage.blocked_by_users(UserId(2)).await.expect("reverse"),
        vec![UserId(1)]
    );

    storage
        .clear_block(UserId(1), UserId(2))
        .await
        .expect("unblock");
    assert!(storage
        .blocked_users(UserId(1))
        .await
        .expect("forward")
        .is_empty());
    assert!(storage
        .blocked_by_users(UserId(2))
        .await
        .expect("reverse")
        .is_empty());
}
