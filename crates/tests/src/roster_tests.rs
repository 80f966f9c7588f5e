use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use bson::{oid::ObjectId, Document};
use huddle_db::models::Conversation;
use huddle_db::store::{
    memory::{MemoryStore, StoreOp},
    ChangeStream, DocumentStore, Page, Query, StoreResult,
};
use huddle_services::{ChatClient, ChatEvent, ChatTarget};

use crate::fixtures::{eventually, settle, test_app::TestApp};

/// Shares a [`MemoryStore`] but, once armed, holds the next conversation
/// listing for `delay` after reading it.
struct SlowListing {
    inner: Arc<MemoryStore>,
    armed: AtomicBool,
    delay: Duration,
}

#[async_trait]
impl DocumentStore for SlowListing {
    async fn create_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document> {
        self.inner.create_document(collection, id, fields).await
    }

    async fn get_document(&self, collection: &str, id: ObjectId) -> StoreResult<Document> {
        self.inner.get_document(collection, id).await
    }

    async fn update_document(
        &self,
        collection: &str,
        id: ObjectId,
        fields: Document,
    ) -> StoreResult<Document> {
        self.inner.update_document(collection, id, fields).await
    }

    async fn delete_document(&self, collection: &str, id: ObjectId) -> StoreResult<()> {
        self.inner.delete_document(collection, id).await
    }

    async fn list_documents(&self, collection: &str, query: &Query) -> StoreResult<Page> {
        let page = self.inner.list_documents(collection, query).await?;
        if collection == Conversation::COLLECTION && self.armed.swap(false, Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        Ok(page)
    }

    async fn subscribe(&self, collection: &str) -> StoreResult<ChangeStream> {
        self.inner.subscribe(collection).await
    }
}

#[tokio::test]
async fn roster_lists_partners_team_and_active_peer() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let carol = app.seed_user("Carol").await;
    let dave = app.seed_user("Dave").await;

    alice_client
        .send(ChatTarget::Direct(carol.id), "hi carol")
        .await
        .unwrap();
    app.seed_team(&alice_client, "Crew", &[&bob_client]).await;
    alice_client
        .open_chat(ChatTarget::Direct(dave.id))
        .await
        .unwrap();

    alice_client.refresh().await.unwrap();
    let ids: Vec<_> = alice_client.roster().roster().iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![carol.id, dave.id, bob.id]);
    assert!(!ids.contains(&alice.id));
}

#[tokio::test]
async fn partners_and_teammates_are_listed_once() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    app.seed_team(&alice_client, "Crew", &[&bob_client]).await;

    alice_client
        .send(ChatTarget::Direct(bob.id), "hey teammate")
        .await
        .unwrap();
    alice_client.open_chat(ChatTarget::Direct(bob.id)).await.unwrap();
    alice_client.refresh().await.unwrap();

    let roster = alice_client.roster().roster();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, bob.id);
}

#[tokio::test]
async fn new_conversation_partner_appears_for_recipient() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    assert!(bob_client.roster().roster().is_empty());

    alice_client
        .send(ChatTarget::Direct(bob.id), "hello")
        .await
        .unwrap();

    eventually("alice shows up in bob's roster", || bob_client.roster().contains(&alice.id)).await;
}

#[tokio::test]
async fn new_teammate_appears_for_existing_members() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let (carol, carol_client) = app.seed_client("Carol").await;
    app.seed_team(&alice_client, "Crew", &[&bob_client]).await;

    let invite = alice_client.teams().send_invite(carol.id).await.unwrap();
    carol_client
        .teams()
        .accept_invite(invite.invite().id)
        .await
        .unwrap();

    eventually("bob sees carol", || bob_client.roster().contains(&carol.id)).await;
    eventually("carol sees bob", || carol_client.roster().contains(&bob.id)).await;
}

#[tokio::test]
async fn missing_users_show_as_deleted() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let carol = app.seed_user("Carol").await;

    alice_client
        .send(ChatTarget::Direct(carol.id), "are you there?")
        .await
        .unwrap();
    app.users().base.hard_delete(carol.id).await.unwrap();

    alice_client.refresh().await.unwrap();
    let roster = alice_client.roster().roster();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, carol.id);
    assert_eq!(roster[0].display_name, "deleted user");
    assert!(!roster[0].is_online);
}

#[tokio::test]
async fn presence_updates_patch_in_place() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let carol = app.seed_user("Carol").await;

    alice_client.send(ChatTarget::Direct(bob.id), "b").await.unwrap();
    alice_client.send(ChatTarget::Direct(carol.id), "c").await.unwrap();
    alice_client.refresh().await.unwrap();
    settle().await;

    let before: Vec<_> = alice_client.roster().roster().iter().map(|u| u.id).collect();
    assert!(alice_client.roster().roster().iter().any(|u| u.id == bob.id && u.is_online));
    let refreshes = alice_client.roster().refreshes();

    bob_client.logout().await.unwrap();
    eventually("bob shows offline", || {
        alice_client
            .roster()
            .roster()
            .iter()
            .any(|u| u.id == bob.id && !u.is_online)
    })
    .await;
    bob_client
        .presence()
        .set_status(Some("Coding".to_string()))
        .await
        .unwrap();
    eventually("bob's status arrives", || {
        alice_client
            .roster()
            .roster()
            .iter()
            .any(|u| u.id == bob.id && u.status.as_deref() == Some("Coding"))
    })
    .await;

    let after: Vec<_> = alice_client.roster().roster().iter().map(|u| u.id).collect();
    assert_eq!(before, after);
    assert_eq!(alice_client.roster().refreshes(), refreshes);
}

#[tokio::test]
async fn loading_latches_off_after_first_refresh() {
    let app = TestApp::spawn();
    let alice = app.seed_user("Alice").await;

    app.store.fail_next(Conversation::COLLECTION, StoreOp::List);
    let alice_client = app.connect(&alice).await;
    assert!(!alice_client.roster().is_loading());
    assert!(alice_client.roster().roster().is_empty());

    alice_client.refresh().await.unwrap();
    assert!(!alice_client.roster().is_loading());
}

#[tokio::test]
async fn refresh_bursts_are_coalesced() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    settle().await;
    let before = alice_client.roster().refreshes();

    for _ in 0..20 {
        alice_client.router().request_refresh();
    }
    settle().await;

    let ran = alice_client.roster().refreshes() - before;
    assert!((1..=2).contains(&ran), "ran {ran} refreshes for one burst");
}

#[tokio::test]
async fn lagging_subscription_triggers_a_full_refresh() {
    let app = TestApp::spawn_with_settings(|s| s.store.event_buffer = 1);
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let strangers = [app.seed_user("S1").await, app.seed_user("S2").await];
    settle().await;
    let before = alice_client.roster().refreshes();

    for round in 0..5 {
        for stranger in &strangers {
            app.users()
                .set_online(stranger.id, round % 2 == 0)
                .await
                .unwrap();
        }
    }

    eventually("lag forces a refresh", || alice_client.roster().refreshes() > before).await;
}

#[tokio::test]
async fn sent_invites_are_tracked_by_receiver() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let bob = app.seed_user("Bob").await;
    alice_client.teams().create_team("Crew").await.unwrap();

    let invite = alice_client.teams().send_invite(bob.id).await.unwrap();
    alice_client.refresh().await.unwrap();
    assert_eq!(
        alice_client.roster().sent_invites().get(&bob.id),
        Some(&invite.invite().id)
    );

    alice_client.teams().cancel_invite(bob.id).await.unwrap();
    alice_client.refresh().await.unwrap();
    assert!(alice_client.roster().sent_invites().is_empty());
}

#[tokio::test]
async fn slow_refresh_cannot_overwrite_a_newer_one() {
    let app = TestApp::spawn();
    let alice = app.seed_user("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;

    let slow = Arc::new(SlowListing {
        inner: app.store.clone(),
        armed: AtomicBool::new(false),
        delay: Duration::from_millis(300),
    });
    let alice_client = ChatClient::start(slow.clone(), &app.settings.chat, alice.id)
        .await
        .unwrap();
    settle().await;
    assert!(!alice_client.roster().contains(&bob.id));

    // The manual refresh reads before bob's first message lands and finishes
    // after the realtime refresh that message triggers.
    slow.armed.store(true, Ordering::SeqCst);
    let (refreshed, sent) = tokio::join!(alice_client.refresh(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        bob_client.send(ChatTarget::Direct(alice.id), "hi alice").await
    });
    refreshed.unwrap();
    sent.unwrap();

    eventually("bob joins alice's roster", || {
        alice_client.roster().contains(&bob.id)
    })
    .await;
    settle().await;
    assert!(alice_client.roster().contains(&bob.id));
}

#[tokio::test]
async fn deleted_team_is_dropped_from_member_rosters() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (_bob, bob_client) = app.seed_client("Bob").await;
    let team = app.seed_team(&alice_client, "Crew", &[&bob_client]).await;
    eventually("bob sees the team", || {
        bob_client.roster().team().is_some_and(|t| t.id == team.id)
    })
    .await;
    let mut events = bob_client.events();

    // Only the team document goes; member references are left dangling.
    app.teams().delete(team.id).await.unwrap();

    eventually("bob's roster forgets the team", || {
        bob_client.roster().team().is_none() && bob_client.session().team_id().is_none()
    })
    .await;
    let mut noticed = false;
    while let Ok(event) = events.try_recv() {
        noticed |= matches!(event, ChatEvent::Notice(_));
    }
    assert!(noticed, "bob was not told the team is gone");
}

#[tokio::test]
async fn deleted_conversation_drops_the_partner() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let (_bob, bob_client) = app.seed_client("Bob").await;
    alice_client
        .send(ChatTarget::Direct(bob_client.user_id()), "hello")
        .await
        .unwrap();
    eventually("alice appears for bob", || bob_client.roster().contains(&alice.id)).await;

    let chat_id = Conversation::pair_id(alice.id, bob_client.user_id());
    app.store
        .delete_document(Conversation::COLLECTION, chat_id)
        .await
        .unwrap();

    eventually("alice leaves bob's roster", || {
        !bob_client.roster().contains(&alice.id)
    })
    .await;
}
