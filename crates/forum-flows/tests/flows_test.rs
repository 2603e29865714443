//! End-to-end workflow scenarios over the in-process dispatcher.

mod common;

use forum_bus::Subscriber;
use forum_core::defaults::BOT_DEFAULT_ANSWER;
use forum_core::{
    AnswerAcceptChange, CommentChange, CommentLikeChange, CommentRepository, DeleteInfo,
    DiscussionChange, DiscussionRepository, DiscussionType, KbDocumentChange,
    KbDocumentRepository, NotifyKind, StatType,
};
use forum_flows::groups;
use forum_flows::mock::MockChatModel;
use forum_flows::subscribers::{asset_prefix, DiscussionCascade};

use common::{attempt, Harness};

#[tokio::test]
async fn test_unknown_answer_is_retried_then_escalated_to_admins() {
    let h = Harness::new(MockChatModel::new(BOT_DEFAULT_ANSWER)).await;
    let author = h.user("carol").await;
    let handle = h.start().await;

    let d = h
        .store
        .add_discussion(author.id, DiscussionType::Qa, "Why does my borrow fail?", "Details")
        .await;
    h.bus
        .publish(&DiscussionChange::insert(d.id, d.uuid))
        .await
        .unwrap();
    h.settle().await;
    handle.shutdown().await.unwrap();

    // One deferred delivery, one accepted.
    assert_eq!(h.model.calls().await, 2);
    assert!(h.store.find_by_author(d.id, h.bot.id).await.unwrap().is_none());

    let stats = h.store.stat_entries().await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].stat_type, StatType::BotUnknown);
    assert_eq!(stats[0].key, d.uuid.to_string());

    let notes = h.store.all_notifications().await;
    let mut recipients: Vec<i64> = notes.iter().map(|n| n.user_id).collect();
    recipients.sort();
    assert_eq!(recipients, h.admin_ids());
    for note in &notes {
        assert_eq!(note.kind, NotifyKind::BotUnknown);
        assert_eq!(note.from_user_id, author.id);
        assert_eq!(note.from_user_name, "carol");
        assert_eq!(note.discussion_id, Some(d.id));
        assert_eq!(note.content, "Why does my borrow fail?");
    }

    let escalations = h
        .webhook
        .messages()
        .await
        .into_iter()
        .filter(|m| m.event == "notify.bot_unknown")
        .count();
    assert_eq!(escalations, 1);
}

#[tokio::test]
async fn test_bot_answer_is_posted_and_author_notified_live() {
    let h = Harness::new(MockChatModel::new("Clone the Arc before moving it.")).await;
    let author = h.user("carol").await;
    let mut inbox = h.live.connect(author.id).await;
    let handle = h.start().await;

    let d = h
        .store
        .add_discussion(author.id, DiscussionType::Qa, "Moved value", "Why?")
        .await;
    h.bus
        .publish(&DiscussionChange::insert(d.id, d.uuid))
        .await
        .unwrap();
    h.settle().await;
    handle.shutdown().await.unwrap();

    let answer = h
        .store
        .find_by_author(d.id, h.bot.id)
        .await
        .unwrap()
        .expect("bot answered");
    assert_eq!(answer.content, "Clone the Arc before moving it.");

    let stats = h.store.stat_entries().await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].stat_type, StatType::BotAnswered);

    let notes = h.store.all_notifications().await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].user_id, author.id);
    assert_eq!(notes[0].from_user_id, h.bot.id);
    assert_eq!(notes[0].kind, NotifyKind::Comment);

    let push = inbox.try_recv().expect("live push delivered");
    assert_eq!(push.notify_id, notes[0].id);
    assert_eq!(push.kind, NotifyKind::Comment);

    // Indexed once, under the discussion uuid.
    let upserts = h.rag.upserts().await;
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].doc_id, d.uuid.to_string());
    let stored = DiscussionRepository::get(&h.store, d.id).await.unwrap().unwrap();
    assert_eq!(stored.rag_id, Some(format!("forum:{}", d.uuid)));
}

#[tokio::test]
async fn test_failing_index_does_not_block_other_workflows() {
    let model = MockChatModel::new("unused").with_rule("Summarize", "A short summary.");
    let h = Harness::new(model).await;
    h.rag.set_failing(true);
    let author = h.user("dave").await;
    let handle = h.start().await;

    let d = h
        .store
        .add_discussion(author.id, DiscussionType::Blog, "Async traits", "Long article")
        .await;
    h.bus
        .publish(&DiscussionChange::insert(d.id, d.uuid))
        .await
        .unwrap();
    h.settle().await;
    handle.shutdown().await.unwrap();

    let dead = h.durable.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].group, groups::DISC_RAG);
    assert!(h.rag.upserts().await.is_empty());

    let stored = DiscussionRepository::get(&h.store, d.id).await.unwrap().unwrap();
    assert_eq!(stored.summary.as_deref(), Some("A short summary."));
    assert_eq!(h.store.trend_entries().await.len(), 1);
    assert!(h
        .webhook
        .messages()
        .await
        .iter()
        .any(|m| m.event == "discussion.blog.created"));
    // Blogs are not answered by the bot.
    assert_eq!(h.model.calls().await, 1);
}

#[tokio::test]
async fn test_delete_cascade_revokes_points_exactly_once() {
    let h = Harness::new(MockChatModel::new("unused")).await;
    let asker = h.user("asker").await;
    let answerer = h.user("answerer").await;
    let fan_a = h.user("fan-a").await;
    let fan_b = h.user("fan-b").await;

    let d = h
        .store
        .add_discussion(asker.id, DiscussionType::Qa, "Lifetimes", "Help")
        .await;
    let answer = h.store.add_comment(d.id, None, answerer.id, "Use 'static").await;
    let like_a = h.store.add_like(answer.id, fan_a.id, true).await;
    let like_b = h.store.add_like(answer.id, fan_b.id, true).await;
    h.store
        .set_accepted_comment(d.id, Some(answer.id))
        .await
        .unwrap();

    let handle = h.start().await;
    h.bus
        .publish(&CommentLikeChange::insert(like_a.id, uuid::Uuid::nil()))
        .await
        .unwrap();
    h.bus
        .publish(&CommentLikeChange::insert(like_b.id, uuid::Uuid::nil()))
        .await
        .unwrap();
    h.bus
        .publish(&AnswerAcceptChange::insert(answer.id, d.uuid))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.points(answerer.id).await, 1 + 10 + 10 + 15);
    assert_eq!(h.points(asker.id).await, 1 + 2);

    h.store.soft_delete_discussion(d.id).await.unwrap();
    let rag_id = format!("forum:{}", d.uuid);
    let delete = DiscussionChange::delete(
        d.id,
        d.uuid,
        DeleteInfo {
            rag_id: Some(rag_id.clone()),
            ..Default::default()
        },
    );
    h.bus.publish(&delete).await.unwrap();
    h.settle().await;

    // A like event arriving after the cascade must not re-award.
    h.bus
        .publish(&CommentLikeChange::insert(like_a.id, uuid::Uuid::nil()))
        .await
        .unwrap();
    h.settle().await;
    handle.shutdown().await.unwrap();

    assert_eq!(h.points(answerer.id).await, 1);
    assert_eq!(h.points(asker.id).await, 1);

    let records = h.store.all_point_records().await;
    let (revocations, originals): (Vec<_>, Vec<_>) =
        records.iter().partition(|r| r.is_revocation());
    assert_eq!(originals.len(), 4);
    assert_eq!(revocations.len(), 4);
    for original in &originals {
        let reversing = revocations
            .iter()
            .filter(|r| r.revoke_id == Some(original.id))
            .count();
        assert_eq!(reversing, 1, "record {} revoked once", original.id);
    }

    assert_eq!(
        h.rag.deletes().await,
        vec![("forum".to_string(), vec![rag_id])]
    );
    assert_eq!(h.storage.deleted_prefixes().await, vec![asset_prefix(&d.uuid)]);

    // Running the cascade again changes nothing.
    DiscussionCascade::new(h.ctx.clone())
        .handle(&attempt::<DiscussionChange>(groups::DISC_CASCADE, 2), delete)
        .await
        .unwrap();
    assert_eq!(h.store.all_point_records().await.len(), records.len());
}

#[tokio::test]
async fn test_reply_to_bot_asking_for_a_human_escalates() {
    let model = MockChatModel::new("unused").with_rule("yes or no", "Yes.");
    let h = Harness::new(model).await;
    let author = h.user("erin").await;

    let d = h
        .store
        .add_discussion(author.id, DiscussionType::Qa, "Build fails", "Linker error")
        .await;
    let bot_answer = h
        .store
        .add_comment(d.id, None, h.bot.id, "Install the toolchain.")
        .await;
    let reply = h
        .store
        .add_comment(d.id, Some(bot_answer.id), author.id, "Still broken, can a person help?")
        .await;

    let handle = h.start().await;
    h.bus
        .publish(&CommentChange::insert(reply.id, reply.uuid))
        .await
        .unwrap();
    h.settle().await;
    handle.shutdown().await.unwrap();

    let stats = h.store.stat_entries().await;
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].stat_type, StatType::HumanHelp);
    assert_eq!(stats[0].key, reply.uuid.to_string());

    // Only the admins hear about it; the bot has no inbox of its own.
    let notes = h.store.all_notifications().await;
    let mut recipients: Vec<i64> = notes.iter().map(|n| n.user_id).collect();
    recipients.sort();
    assert_eq!(recipients, h.admin_ids());
    assert!(notes
        .iter()
        .all(|n| n.kind == NotifyKind::HumanHelp && n.comment_id == Some(reply.id)));
    assert!(h
        .webhook
        .messages()
        .await
        .iter()
        .any(|m| m.event == "notify.human_help"));
}

#[tokio::test]
async fn test_comment_and_reply_notifications_are_deduplicated() {
    let h = Harness::new(MockChatModel::new("no")).await;
    let author = h.user("frank").await;
    let commenter = h.user("grace").await;

    let d = h
        .store
        .add_discussion(author.id, DiscussionType::Issue, "Crash on start", "Stack trace")
        .await;
    let comment = h.store.add_comment(d.id, None, commenter.id, "Same here").await;
    let reply = h
        .store
        .add_comment(d.id, Some(comment.id), author.id, "Which version?")
        .await;
    let own = h.store.add_comment(d.id, None, author.id, "Update: fixed").await;

    let handle = h.start().await;
    for c in [&comment, &reply, &own] {
        h.bus
            .publish(&CommentChange::insert(c.id, c.uuid))
            .await
            .unwrap();
    }
    // Redelivered copy of the first event.
    h.bus
        .publish(&CommentChange::insert(comment.id, comment.uuid))
        .await
        .unwrap();
    h.settle().await;
    handle.shutdown().await.unwrap();

    let notes = h.store.all_notifications().await;
    assert_eq!(notes.len(), 2);
    let to_author = notes.iter().find(|n| n.user_id == author.id).unwrap();
    assert_eq!(to_author.kind, NotifyKind::Comment);
    assert_eq!(to_author.from_user_id, commenter.id);
    let to_commenter = notes.iter().find(|n| n.user_id == commenter.id).unwrap();
    assert_eq!(to_commenter.kind, NotifyKind::Reply);
    assert_eq!(to_commenter.comment_id, Some(reply.id));
}

#[tokio::test]
async fn test_kb_documents_follow_their_rows() {
    let h = Harness::new(MockChatModel::new("unused")).await;
    let handle = h.start().await;

    let doc = h.store.add_kb_document("Install guide", "Run rustup").await;
    h.bus
        .publish(&KbDocumentChange::insert(doc.id, doc.uuid))
        .await
        .unwrap();
    h.settle().await;

    let indexed = KbDocumentRepository::get(&h.store, doc.id)
        .await
        .unwrap()
        .unwrap();
    let rag_id = indexed.rag_id.clone().expect("rag id stored");
    assert_eq!(rag_id, format!("kb:{}", doc.uuid));

    h.store.remove_kb_document(doc.id).await;
    h.bus
        .publish(&KbDocumentChange::delete(
            doc.id,
            doc.uuid,
            DeleteInfo {
                rag_id: Some(rag_id.clone()),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    h.settle().await;
    handle.shutdown().await.unwrap();

    let upserts = h.rag.upserts().await;
    assert_eq!(upserts.len(), 1);
    assert_eq!(upserts[0].dataset, "kb");
    assert_eq!(h.rag.deletes().await, vec![("kb".to_string(), vec![rag_id])]);
}
