use bson::oid::ObjectId;
use huddle_db::models::{InviteStatus, Team, User};
use huddle_db::store::memory::StoreOp;
use huddle_services::{ChatError, ChatEvent, InviteOutcome};

use crate::fixtures::{eventually, test_app::TestApp};

fn assert_admin_is_member(team: &Team) {
    assert!(
        team.members.contains(&team.admin_id),
        "admin {} missing from {:?}",
        team.admin_id,
        team.members
    );
}

#[tokio::test]
async fn create_team_makes_creator_owner_and_admin() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;

    let team = alice_client.teams().create_team("  Crew  ").await.unwrap();
    assert_eq!(team.name, "Crew");
    assert_eq!(team.owner_id, alice.id);
    assert_eq!(team.admin_id, alice.id);
    assert_eq!(team.members, vec![alice.id]);
    assert_eq!(app.user(alice.id).await.team_id, Some(team.id));
    assert_eq!(alice_client.session().team_id(), Some(team.id));

    let err = alice_client.teams().create_team("Second").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert!(matches!(
        alice_client.teams().create_team(" ").await,
        Err(ChatError::Validation(_))
    ));
}

#[tokio::test]
async fn transfer_to_non_member_fails_and_keeps_admin() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let outsider = app.seed_user("Outsider").await;
    let team = alice_client.teams().create_team("Crew").await.unwrap();

    let err = alice_client.transfer_ownership(outsider.id).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    let stored = app.team(team.id).await.unwrap();
    assert_eq!(stored.admin_id, alice.id);
    assert_admin_is_member(&stored);
}

#[tokio::test]
async fn transfer_to_member_moves_leadership() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let team = app.seed_team(&alice_client, "Crew", &[&bob_client]).await;

    let updated = alice_client.transfer_ownership(bob.id).await.unwrap();
    assert_eq!(updated.admin_id, bob.id);
    assert_eq!(updated.owner_id, bob.id);
    assert_admin_is_member(&updated);

    // Alice is no longer admin and cannot hand it back.
    let err = alice_client.transfer_ownership(alice.id).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert_eq!(app.team(team.id).await.unwrap().admin_id, bob.id);
}

#[tokio::test]
async fn last_member_leaving_deletes_the_team() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let team = alice_client.teams().create_team("Solo").await.unwrap();

    alice_client.teams().leave_team().await.unwrap();

    assert!(app.team(team.id).await.is_none());
    assert_eq!(app.user(alice.id).await.team_id, None);
    assert_eq!(alice_client.session().team_id(), None);
}

#[tokio::test]
async fn member_leaving_keeps_the_team() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let team = app.seed_team(&alice_client, "Crew", &[&bob_client]).await;
    assert_eq!(team.members, vec![alice.id, bob.id]);

    bob_client.teams().leave_team().await.unwrap();

    let stored = app.team(team.id).await.unwrap();
    assert_eq!(stored.members, vec![alice.id]);
    assert_eq!(stored.admin_id, alice.id);
    assert_eq!(app.user(bob.id).await.team_id, None);
    assert_eq!(app.user(alice.id).await.team_id, Some(team.id));
}

#[tokio::test]
async fn admin_leaving_hands_adminship_on() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let (_carol, carol_client) = app.seed_client("Carol").await;
    let team = app
        .seed_team(&alice_client, "Crew", &[&bob_client, &carol_client])
        .await;

    alice_client.teams().leave_team().await.unwrap();

    let stored = app.team(team.id).await.unwrap();
    assert_eq!(stored.admin_id, bob.id);
    assert_eq!(stored.members.len(), 2);
    assert_admin_is_member(&stored);
}

#[tokio::test]
async fn leaving_without_a_team_is_rejected() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;

    let err = alice_client.teams().leave_team().await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn disband_clears_every_member() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let (carol, carol_client) = app.seed_client("Carol").await;
    let team = app
        .seed_team(&alice_client, "Crew", &[&bob_client, &carol_client])
        .await;

    let members = alice_client.disband_team().await.unwrap();
    assert_eq!(members.len(), 3);

    assert!(app.team(team.id).await.is_none());
    for id in [alice.id, bob.id, carol.id] {
        assert_eq!(app.user(id).await.team_id, None);
    }

    for client in [&bob_client, &carol_client] {
        eventually("former member sees no team", || {
            client.session().team_id().is_none() && client.roster().team().is_none()
        })
        .await;
        assert_eq!(client.teams().reconcile().await.unwrap(), None);
    }
}

#[tokio::test]
async fn only_the_admin_may_disband() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (_bob, bob_client) = app.seed_client("Bob").await;
    let team = app.seed_team(&alice_client, "Crew", &[&bob_client]).await;

    let err = bob_client.disband_team().await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert!(app.team(team.id).await.is_some());
}

#[tokio::test]
async fn accept_while_in_a_team_changes_nothing() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let alice_team = alice_client.teams().create_team("Alpha").await.unwrap();
    let bob_team = bob_client.teams().create_team("Beta").await.unwrap();

    let outcome = alice_client.teams().send_invite(bob.id).await.unwrap();
    let invite_id = outcome.invite().id;

    let err = bob_client.teams().accept_invite(invite_id).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));

    assert_eq!(app.invite(invite_id).await.status, InviteStatus::Pending);
    assert!(!app.team(alice_team.id).await.unwrap().is_member(&bob.id));
    assert_eq!(app.user(bob.id).await.team_id, Some(bob_team.id));
}

#[tokio::test]
async fn accept_joins_the_inviters_team() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let team = alice_client.teams().create_team("Crew").await.unwrap();

    let InviteOutcome::Sent(invite) = alice_client.teams().send_invite(bob.id).await.unwrap() else {
        panic!("expected a fresh invite");
    };
    assert_eq!(invite.sender_id, alice.id);

    let joined = bob_client.teams().accept_invite(invite.id).await.unwrap();
    assert_eq!(joined.id, team.id);
    assert_eq!(joined.members, vec![alice.id, bob.id]);
    assert_eq!(joined.admin_id, alice.id);
    assert_eq!(app.invite(invite.id).await.status, InviteStatus::Accepted);
    assert_eq!(app.user(bob.id).await.team_id, Some(team.id));

    let err = bob_client.teams().accept_invite(invite.id).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
}

#[tokio::test]
async fn accepting_an_invite_to_a_vanished_team_marks_it_accepted() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    alice_client.teams().create_team("Crew").await.unwrap();
    let invite = alice_client.teams().send_invite(bob.id).await.unwrap();
    alice_client.disband_team().await.unwrap();

    let mut bob_events = bob_client.events();
    let err = bob_client
        .teams()
        .accept_invite(invite.invite().id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));

    assert_eq!(app.invite(invite.invite().id).await.status, InviteStatus::Accepted);
    assert_eq!(app.user(bob.id).await.team_id, None);

    let mut noticed = false;
    while let Ok(event) = bob_events.try_recv() {
        noticed |= matches!(event, ChatEvent::Notice(_));
    }
    assert!(noticed);
}

#[tokio::test]
async fn duplicate_invite_is_a_soft_no_op() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let bob = app.seed_user("Bob").await;
    alice_client.teams().create_team("Crew").await.unwrap();

    let first = alice_client.teams().send_invite(bob.id).await.unwrap();
    let second = alice_client.teams().send_invite(bob.id).await.unwrap();

    assert!(matches!(first, InviteOutcome::Sent(_)));
    assert!(matches!(second, InviteOutcome::AlreadyPending(_)));
    assert_eq!(first.invite().id, second.invite().id);
    assert_eq!(app.store.len("invites"), 1);

    assert!(matches!(
        alice_client.teams().send_invite(alice_client.user_id()).await,
        Err(ChatError::Validation(_))
    ));
}

#[tokio::test]
async fn cancelled_invite_disappears() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    alice_client.teams().create_team("Crew").await.unwrap();
    alice_client.teams().send_invite(bob.id).await.unwrap();

    eventually("bob sees the invite", || bob_client.roster().incoming_invites().len() == 1).await;

    assert!(alice_client.teams().cancel_invite(bob.id).await.unwrap());
    assert!(!alice_client.teams().cancel_invite(bob.id).await.unwrap());
    assert!(bob_client.teams().incoming_invites().await.unwrap().is_empty());

    eventually("bob's invite list empties", || {
        bob_client.roster().incoming_invites().is_empty()
    })
    .await;
}

#[tokio::test]
async fn rejected_invite_is_terminal() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let team = alice_client.teams().create_team("Crew").await.unwrap();
    let invite = alice_client.teams().send_invite(bob.id).await.unwrap();

    let rejected = bob_client
        .teams()
        .reject_invite(invite.invite().id)
        .await
        .unwrap();
    assert_eq!(rejected.status, InviteStatus::Rejected);

    let err = bob_client
        .teams()
        .accept_invite(invite.invite().id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert!(!app.team(team.id).await.unwrap().is_member(&bob.id));
    assert!(bob_client.teams().incoming_invites().await.unwrap().is_empty());

    // A fresh invite can follow a rejected one.
    assert!(matches!(
        alice_client.teams().send_invite(bob.id).await.unwrap(),
        InviteOutcome::Sent(_)
    ));
}

#[tokio::test]
async fn someone_elses_invite_cannot_be_answered() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let bob = app.seed_user("Bob").await;
    let (_carol, carol_client) = app.seed_client("Carol").await;
    alice_client.teams().create_team("Crew").await.unwrap();
    let invite = alice_client.teams().send_invite(bob.id).await.unwrap();

    for result in [
        carol_client.teams().accept_invite(invite.invite().id).await.map(|_| ()),
        carol_client.teams().reject_invite(invite.invite().id).await.map(|_| ()),
    ] {
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }
    assert!(matches!(
        carol_client.teams().accept_invite(ObjectId::new()).await,
        Err(ChatError::NotFound(_))
    ));
}

#[tokio::test]
async fn dangling_team_reference_is_cleared() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    app.users().set_team(alice.id, Some(ObjectId::new())).await.unwrap();

    let mut events = alice_client.events();
    assert_eq!(alice_client.teams().reconcile().await.unwrap(), None);
    assert_eq!(app.user(alice.id).await.team_id, None);
    assert_eq!(alice_client.session().team_id(), None);
    assert!(matches!(events.try_recv(), Ok(ChatEvent::Notice(_))));
}

#[tokio::test]
async fn missing_team_reference_is_restored() {
    let app = TestApp::spawn();
    let (alice, alice_client) = app.seed_client("Alice").await;
    // The team write landed, the user write did not.
    let team = app.teams().create("Crew".to_string(), alice.id).await.unwrap();

    let repaired = alice_client.teams().reconcile().await.unwrap();
    assert_eq!(repaired.map(|t| t.id), Some(team.id));
    assert_eq!(app.user(alice.id).await.team_id, Some(team.id));
}

#[tokio::test]
async fn half_applied_accept_is_repaired_on_next_read() {
    let app = TestApp::spawn();
    let (_alice, alice_client) = app.seed_client("Alice").await;
    let (bob, bob_client) = app.seed_client("Bob").await;
    let team = alice_client.teams().create_team("Crew").await.unwrap();
    let invite = alice_client.teams().send_invite(bob.id).await.unwrap();

    app.store.fail_next(User::COLLECTION, StoreOp::Update);
    let err = bob_client
        .teams()
        .accept_invite(invite.invite().id)
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert!(app.team(team.id).await.unwrap().is_member(&bob.id));
    assert_eq!(app.user(bob.id).await.team_id, None);

    bob_client.refresh().await.unwrap();
    assert_eq!(app.user(bob.id).await.team_id, Some(team.id));
    assert_eq!(bob_client.roster().team().map(|t| t.id), Some(team.id));
}
