//! End-to-end ingestion scenarios against a live Postgres.

mod common;

use common::{TestDatabase, make_message};
use mailvault::codec;
use mailvault::error::ArchiveError;
use mailvault::models::{ArchivePolicy, ListProps};
use mailvault::store::{Store, queries};

const LIST: &str = "devel@lists.example.com";

fn list_props() -> ListProps {
    ListProps::public(LIST)
}

async fn ingest(store: &Store, raw: &[u8]) -> String {
    store
        .add_to_list(&list_props(), raw)
        .await
        .expect("ingest message")
        .expect("message not dropped")
}

#[tokio::test]
async fn basic_reply_thread() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let m1 = make_message(
        "m1@x",
        "a@x",
        "the subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "first",
    );
    let m2 = make_message(
        "m2@x",
        "b@x",
        "Re: the subject",
        "Fri, 02 Nov 2012 11:00:00 +0000",
        Some("m1@x"),
        "second",
    );
    let hash1 = ingest(&store, &m1).await;
    ingest(&store, &m2).await;

    let email1 = queries::get_message_by_id(&store, LIST, "m1@x")
        .await
        .unwrap()
        .unwrap();
    let email2 = queries::get_message_by_id(&store, LIST, "m2@x")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(email1.thread_id, hash1);
    assert_eq!(email2.thread_id, hash1);
    assert_eq!(email2.in_reply_to.as_deref(), Some("m1@x"));
    assert_eq!((email1.thread_order, email1.thread_depth), (0, 0));
    assert_eq!((email2.thread_order, email2.thread_depth), (1, 1));

    let threads = queries::get_threads(
        &store,
        LIST,
        email1.date - chrono::Duration::days(1),
        email2.date + chrono::Duration::days(1),
    )
    .await
    .unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].date_active, email2.date);

    let subject = queries::get_thread_subject(&store, LIST, &hash1)
        .await
        .unwrap();
    assert_eq!(subject.as_deref(), Some("the subject"));
}

#[tokio::test]
async fn classical_four_node_tree() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let messages = [
        ("m1@x", None, "10:00:00"),
        ("m2@x", Some("m1@x"), "11:00:00"),
        ("m3@x", Some("m1@x"), "12:00:00"),
        ("m4@x", Some("m2@x"), "13:00:00"),
    ];
    for (message_id, parent, time) in messages {
        let raw = make_message(
            message_id,
            "a@x",
            "subject",
            &format!("Fri, 02 Nov 2012 {} +0000", time),
            parent,
            "body",
        );
        ingest(&store, &raw).await;
    }

    let mut orders = Vec::new();
    let mut depths = Vec::new();
    for message_id in ["m1@x", "m2@x", "m3@x", "m4@x"] {
        let email = queries::get_message_by_id(&store, LIST, message_id)
            .await
            .unwrap()
            .unwrap();
        orders.push(email.thread_order);
        depths.push(email.thread_depth);
    }
    assert_eq!(orders, vec![0, 1, 3, 2]);
    assert_eq!(depths, vec![0, 1, 1, 2]);
}

#[tokio::test]
async fn self_reply_is_tolerated() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let raw = make_message(
        "m1@x",
        "a@x",
        "loop",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        Some("m1@x"),
        "body",
    );
    let hash = ingest(&store, &raw).await;

    let email = queries::get_message_by_id(&store, LIST, "m1@x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(email.thread_id, hash);
    assert!(email.in_reply_to.is_none());
    assert_eq!((email.thread_order, email.thread_depth), (0, 0));
}

#[tokio::test]
async fn duplicate_message_id_on_two_lists() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());
    let user = uuid::Uuid::from_u128(7);

    let raw = make_message(
        "shared@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    for list_name in ["lista@example.com", "listb@example.com"] {
        let hash = store
            .add_to_list(&ListProps::public(list_name), &raw)
            .await
            .unwrap()
            .unwrap();
        let email = queries::get_message_by_id(&store, list_name, "shared@x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(email.message_id_hash, hash);
        store.vote(list_name, "shared@x", user, 1).await.unwrap();
    }

    for list_name in ["lista@example.com", "listb@example.com"] {
        let email = queries::get_message_by_id(&store, list_name, "shared@x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            queries::get_thread_likes(&store, list_name, &email.thread_id)
                .await
                .unwrap(),
            1
        );
        assert!(
            queries::get_thread(&store, list_name, &email.thread_id)
                .await
                .unwrap()
                .is_some()
        );
    }

    let votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vote")
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(votes, 2);
}

#[tokio::test]
async fn reply_link_beats_date_order() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let m1 = make_message(
        "m1@x",
        "a@x",
        "parent",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    let m2 = make_message(
        "m2@x",
        "b@x",
        "Re: parent",
        "Thu, 01 Nov 2012 10:00:00 +0000",
        Some("m1@x"),
        "earlier reply",
    );
    let hash1 = ingest(&store, &m1).await;
    ingest(&store, &m2).await;

    let starting = queries::get_starting_email(&store, LIST, &hash1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(starting.message_id, "m1@x");

    let email2 = queries::get_message_by_id(&store, LIST, "m2@x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!((email2.thread_order, email2.thread_depth), (1, 1));
}

#[tokio::test]
async fn oversize_message_id_joins_resolve() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let long_id = "X".repeat(260);
    let m1 = make_message(
        &long_id,
        "a@x",
        "long id",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    let mut reply = String::new();
    reply.push_str("Message-ID: <r@x>\n");
    reply.push_str("From: b@x\n");
    reply.push_str("Subject: Re: long id\n");
    reply.push_str("Date: Fri, 02 Nov 2012 11:00:00 +0000\n");
    reply.push_str(&format!("References: <{}>\n", long_id));
    reply.push_str("\nbody");

    let hash1 = ingest(&store, &m1).await;
    ingest(&store, reply.as_bytes()).await;

    let stored_parent = queries::get_message_by_id(&store, LIST, &long_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_parent.message_id.len(), 254);
    assert_eq!(stored_parent.message_id_hash, hash1);

    let stored_reply = queries::get_message_by_id(&store, LIST, "r@x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        stored_reply.in_reply_to.as_deref(),
        Some(stored_parent.message_id.as_str())
    );
    assert_eq!(stored_reply.thread_id, hash1);
    assert_eq!(stored_reply.thread_depth, 1);
}

#[tokio::test]
async fn add_to_list_is_idempotent() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let raw = make_message(
        "m1@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    let first = ingest(&store, &raw).await;
    let second = ingest(&store, &raw).await;
    assert_eq!(first, second);

    let count = queries::get_list_size(&store, LIST).await.unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn never_archived_lists_drop_messages() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let mut props = list_props();
    props.archive_policy = ArchivePolicy::Never;
    let raw = make_message(
        "m1@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    let result = store.add_to_list(&props, &raw).await.unwrap();
    assert!(result.is_none());
    assert_eq!(queries::get_list_size(&store, LIST).await.unwrap(), 0);
    // The list row itself is mirrored regardless.
    assert!(queries::get_list(&store, LIST).await.unwrap().is_some());
}

#[tokio::test]
async fn missing_message_id_is_rejected() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let raw = b"From: a@x\nSubject: no id\n\nbody";
    let err = store.add_to_list(&list_props(), raw).await.unwrap_err();
    assert!(matches!(err, ArchiveError::InvalidMessage));
}

#[tokio::test]
async fn hash_invariant_holds_for_stored_emails() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let raw = make_message(
        "check@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    ingest(&store, &raw).await;
    let email = queries::get_message_by_id(&store, LIST, "check@x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(email.message_id_hash, codec::hash_message_id("check@x"));
    assert_eq!(email.message_id_hash.len(), 32);
    let by_hash = queries::get_message_by_hash(&store, LIST, &email.message_id_hash)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_hash.message_id, "check@x");
}

#[tokio::test]
async fn date_active_tracks_newest_email() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let m1 = make_message(
        "m1@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    let hash = ingest(&store, &m1).await;
    // An older reply must not move date_active backwards.
    let m2 = make_message(
        "m2@x",
        "b@x",
        "Re: subject",
        "Thu, 01 Nov 2012 10:00:00 +0000",
        Some("m1@x"),
        "body",
    );
    ingest(&store, &m2).await;

    let thread = queries::get_thread(&store, LIST, &hash)
        .await
        .unwrap()
        .unwrap();
    let email1 = queries::get_message_by_id(&store, LIST, "m1@x")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.date_active, email1.date);
}

#[tokio::test]
async fn delete_last_message_removes_thread() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let m1 = make_message(
        "m1@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    let hash = ingest(&store, &m1).await;

    store.delete_message_from_list(LIST, "m1@x").await.unwrap();
    assert!(
        queries::get_message_by_id(&store, LIST, "m1@x")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        queries::get_thread(&store, LIST, &hash)
            .await
            .unwrap()
            .is_none()
    );

    let err = store
        .delete_message_from_list(LIST, "m1@x")
        .await
        .unwrap_err();
    assert!(matches!(err, ArchiveError::MessageNotFound { .. }));
}

#[tokio::test]
async fn delete_reply_keeps_thread() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let m1 = make_message(
        "m1@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    let m2 = make_message(
        "m2@x",
        "b@x",
        "Re: subject",
        "Fri, 02 Nov 2012 11:00:00 +0000",
        Some("m1@x"),
        "body",
    );
    let hash = ingest(&store, &m1).await;
    ingest(&store, &m2).await;

    store.delete_message_from_list(LIST, "m2@x").await.unwrap();
    assert!(
        queries::get_thread(&store, LIST, &hash)
            .await
            .unwrap()
            .is_some()
    );
    assert_eq!(
        queries::get_thread_emails_count(&store, LIST, &hash)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn thread_neighbors_by_activity() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let mut hashes = Vec::new();
    for (message_id, day) in [("t1@x", 1), ("t2@x", 2), ("t3@x", 3)] {
        let raw = make_message(
            message_id,
            "a@x",
            "subject",
            &format!("0{} Nov 2012 10:00:00 +0000", day),
            None,
            "body",
        );
        hashes.push(ingest(&store, &raw).await);
    }

    let (prev, next) = queries::get_thread_neighbors(&store, LIST, &hashes[1])
        .await
        .unwrap();
    assert_eq!(prev.unwrap().thread_id, hashes[0]);
    assert_eq!(next.unwrap().thread_id, hashes[2]);

    let (prev, next) = queries::get_thread_neighbors(&store, LIST, &hashes[0])
        .await
        .unwrap();
    assert!(prev.is_none());
    assert_eq!(next.unwrap().thread_id, hashes[1]);
}

#[tokio::test]
async fn top_participants_ranked_by_count() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let senders = ["busy@x", "busy@x", "busy@x", "quiet@x"];
    for (n, sender) in senders.iter().enumerate() {
        let raw = make_message(
            &format!("m{}@x", n),
            sender,
            "subject",
            "Fri, 02 Nov 2012 10:00:00 +0000",
            None,
            "body",
        );
        ingest(&store, &raw).await;
    }

    let start = chrono::NaiveDate::from_ymd_opt(2012, 11, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let end = chrono::NaiveDate::from_ymd_opt(2012, 12, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let top = queries::get_top_participants(&store, LIST, start, end, 10)
        .await
        .unwrap();
    assert_eq!(top[0], ("busy@x".to_string(), 3));
    assert_eq!(top[1], ("quiet@x".to_string(), 1));
}

#[tokio::test]
async fn month_activity_counts() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    for (n, sender) in [("1", "a@x"), ("2", "b@x"), ("3", "a@x")] {
        let raw = make_message(
            &format!("m{}@x", n),
            sender,
            "subject",
            "Fri, 02 Nov 2012 10:00:00 +0000",
            None,
            "body",
        );
        ingest(&store, &raw).await;
    }

    let activity = queries::get_month_activity(&store, LIST, 2012, 11)
        .await
        .unwrap();
    assert_eq!(activity.participants_count, 2);
    assert_eq!(activity.threads_count, 3);

    // Cached: direct row deletes are not observed until invalidation.
    sqlx::query("DELETE FROM email WHERE sender_address = 'a@x'")
        .execute(&db.pool)
        .await
        .unwrap();
    let cached = queries::get_month_activity(&store, LIST, 2012, 11)
        .await
        .unwrap();
    assert_eq!(cached.participants_count, 2);
}

#[tokio::test]
async fn attachments_are_stored_in_walk_order() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let raw = concat!(
        "Message-ID: <att@x>\n",
        "From: a@x\n",
        "Subject: with attachment\n",
        "Date: Fri, 02 Nov 2012 10:00:00 +0000\n",
        "Content-Type: multipart/mixed; boundary=\"SEP\"\n",
        "\n",
        "--SEP\n",
        "Content-Type: text/plain; charset=utf-8\n",
        "\n",
        "Body text.\n",
        "--SEP\n",
        "Content-Type: application/pdf; name=\"doc.pdf\"\n",
        "\n",
        "PDFDATA\n",
        "--SEP--\n"
    );
    ingest(&store, raw.as_bytes()).await;

    let email = queries::get_message_by_id(&store, LIST, "att@x")
        .await
        .unwrap()
        .unwrap();
    assert!(email.content.starts_with("Body text."));

    let attachments = queries::get_attachments(&store, LIST, "att@x").await.unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].counter, 2);
    assert_eq!(attachments[0].name, "doc.pdf");
    assert_eq!(attachments[0].content_type, "application/pdf");
    assert!(attachments[0].size > 0);

    let by_counter = queries::get_attachment_by_counter(&store, LIST, "att@x", 2)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_counter.name, "doc.pdf");
}

#[tokio::test]
async fn raw_message_round_trips_through_email_full() {
    let db = TestDatabase::new().await;
    let store = Store::from_pool(db.pool.clone());

    let raw = make_message(
        "full@x",
        "a@x",
        "subject",
        "Fri, 02 Nov 2012 10:00:00 +0000",
        None,
        "body",
    );
    ingest(&store, &raw).await;

    let stored: Vec<u8> = sqlx::query_scalar(
        "SELECT \"full\" FROM email_full WHERE list_name = $1 AND message_id = $2",
    )
    .bind(LIST)
    .bind("full@x")
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(stored, raw);
}
