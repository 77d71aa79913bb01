//! Driver tests: commands, completions and push events on one context

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use residence_portal::client::notify::NotificationKind;
use residence_portal::client::realtime::{ConnectionManager, ConnectionState};
use residence_portal::client::store::ConversationContent;
use residence_portal::client::{ClientCommand, PortalClient};
use residence_portal::shared::messaging::{Alert, AlertStatus, AlertUpdate, ConversationKey, DeliveryState, PeerId, RemoteId};
use residence_portal::shared::RealtimeEvent;

use crate::common::{
    count_notifications, directory, drain_changes, realtime_session, rest_session, server_message, FakeApi,
    MockConnector, ServerEnd,
};

fn alert_feed() -> Vec<Alert> {
    vec![serde_json::from_value(json!({
        "id": 9, "contenu": "Réunion de copropriété", "priorite": "important", "utilisateur": "Syndic"
    }))
    .unwrap()]
}

fn rest_client(api: Arc<FakeApi>) -> PortalClient {
    let (connector, _servers) = MockConnector::new();
    PortalClient::new(rest_session(), api, ConnectionManager::new(connector))
}

async fn realtime_client(api: Arc<FakeApi>) -> (PortalClient, ServerEnd) {
    let (connector, mut servers) = MockConnector::new();
    let mut client = PortalClient::new(realtime_session(), api, ConnectionManager::new(connector));
    let mut state = client.connection().watch_state();
    client.start();
    let mut server = servers.recv().await.unwrap();
    state
        .wait_for(|s| *s == ConnectionState::Authenticated)
        .await
        .unwrap();
    assert_eq!(server.next_frame().await.unwrap()["type"], "authenticate");
    client.settle().await;
    (client, server)
}

#[tokio::test]
async fn test_start_loads_directory_and_alerts() {
    let api = Arc::new(FakeApi::new().with_users(directory()).with_alerts(alert_feed()));
    let mut client = rest_client(api.clone());

    client.start();
    client.settle().await;

    assert_eq!(client.store().view().peers().len(), 3);
    assert_eq!(client.store().alerts().len(), 1);
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);
    assert_eq!(api.count("list_users"), 1);
    assert_eq!(api.count("list_alerts"), 1);
}

#[tokio::test]
async fn test_select_peer_fetches_history_and_marks_read() {
    let api = Arc::new(
        FakeApi::new()
            .with_users(directory())
            .with_history("chat_2", vec![server_message(1, "2", "Bonjour"), server_message(2, "1", "Salut")]),
    );
    let mut client = rest_client(api.clone());
    client.start();
    client.settle().await;

    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("2")))
        .await
        .unwrap();
    {
        let view = client.store().view();
        let active = view.active().unwrap();
        assert!(active.loading);
        assert_eq!(active.content, ConversationContent::Empty);
    }
    client.settle().await;

    let view = client.store().view();
    let active = view.active().unwrap();
    assert!(!active.loading);
    assert_matches!(active.content, ConversationContent::Messages(messages) => {
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Bonjour", "Salut"]);
    });
    assert!(api.calls().contains(&"fetch_messages:chat_2".to_string()));
    assert!(api.calls().contains(&"mark_read:chat_2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_late_history_for_previous_selection_is_discarded() {
    let api = Arc::new(
        FakeApi::new()
            .with_users(directory())
            .with_history("chat_2", vec![server_message(1, "2", "Bonjour")])
            .with_history("chat_3", vec![server_message(2, "3", "Hello")])
            .with_history_delay("chat_2", Duration::from_secs(5)),
    );
    let mut client = rest_client(api);
    client.start();
    client.settle().await;

    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("2")))
        .await
        .unwrap();
    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("3")))
        .await
        .unwrap();
    client.settle().await;

    let store = client.store();
    assert_eq!(store.active_key(), Some(&ConversationKey::from("chat_3")));
    assert_eq!(store.conversation(&ConversationKey::from("chat_3")).unwrap().len(), 1);
    assert!(store.conversation(&ConversationKey::from("chat_2")).unwrap().is_empty());
}

#[tokio::test]
async fn test_late_mark_read_for_previous_selection_keeps_new_unread() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let mut client = rest_client(api.clone());
    client.start();
    client.settle().await;

    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("2")))
        .await
        .unwrap();
    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("3")))
        .await
        .unwrap();
    client.apply_event(RealtimeEvent::MessageReceived {
        conversation_key: ConversationKey::from("chat_2"),
        message: server_message(30, "2", "Vous êtes là ?"),
    });
    assert_eq!(client.store().peer(&PeerId::from("2")).unwrap().unread_count, 1);

    client.settle().await;

    let store = client.store();
    assert!(api.calls().contains(&"mark_read:chat_2".to_string()));
    assert_eq!(store.active_key(), Some(&ConversationKey::from("chat_3")));
    assert_eq!(store.peer(&PeerId::from("2")).unwrap().unread_count, 1);
    assert_eq!(store.view().total_unread(), 1);
}

#[tokio::test]
async fn test_unknown_peer_is_rejected() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let mut client = rest_client(api.clone());
    client.start();
    client.settle().await;

    let err = client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("99")))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    assert!(client.store().active_key().is_none());
    assert_eq!(api.count("fetch_messages"), 0);
}

#[tokio::test]
async fn test_send_message_command_round_trip() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let mut client = rest_client(api);
    client.start();
    client.settle().await;
    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("4")))
        .await
        .unwrap();
    client.settle().await;

    client
        .handle_command(ClientCommand::SendMessage("Le colis est arrivé".into()))
        .await
        .unwrap();
    let key = ConversationKey::from("c-4");
    assert_eq!(
        client.store().conversation(&key).unwrap().messages()[0].delivery,
        DeliveryState::Pending
    );
    client.settle().await;

    let conversation = client.store().conversation(&key).unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.messages()[0].delivery, DeliveryState::Sent);
}

#[tokio::test]
async fn test_retry_command_after_network_failure() {
    let api = Arc::new(FakeApi::new().with_users(directory()).failing("create_message"));
    let mut client = rest_client(api.clone());
    client.start();
    client.settle().await;
    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("2")))
        .await
        .unwrap();
    client
        .handle_command(ClientCommand::SendMessage("Bonjour".into()))
        .await
        .unwrap();
    client.settle().await;

    let failed = client.queue().outbound().failed()[0].correlation_id;
    api.recover("create_message");
    client.handle_command(ClientCommand::Retry(failed)).await.unwrap();
    client.settle().await;

    let conversation = client.store().conversation(&ConversationKey::from("chat_2")).unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.messages()[0].delivery, DeliveryState::Sent);
}

#[tokio::test]
async fn test_invite_validates_email_before_calling_backend() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let mut client = rest_client(api.clone());
    client.start();
    client.settle().await;

    let err = client
        .handle_command(ClientCommand::InviteUser {
            username: "paul".into(),
            email: "paul@residence".into(),
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(api.count("invite_user"), 0);

    let mut changes = client.subscribe();
    client
        .handle_command(ClientCommand::InviteUser {
            username: "paul".into(),
            email: "paul@residence.fr".into(),
        })
        .await
        .unwrap();
    client.settle().await;

    assert_eq!(client.store().view().peers().len(), 4);
    assert_eq!(
        count_notifications(&drain_changes(&mut changes), NotificationKind::Success),
        1
    );
}

#[tokio::test]
async fn test_directory_failure_keeps_current_directory() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let mut client = rest_client(api.clone());
    client.start();
    client.settle().await;
    let mut changes = client.subscribe();

    api.fail("list_users");
    client.handle_command(ClientCommand::RefreshDirectory).await.unwrap();
    client.settle().await;

    assert_eq!(client.store().view().peers().len(), 3);
    assert_eq!(
        count_notifications(&drain_changes(&mut changes), NotificationKind::Error),
        1
    );
}

#[tokio::test]
async fn test_resident_account_toggle() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let mut client = rest_client(api.clone());
    client.start();
    client.settle().await;
    let mut changes = client.subscribe();

    let err = client
        .handle_command(ClientCommand::SetResidentActive {
            peer_id: PeerId::from("99"),
            active: false,
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(api.count("toggle_user_status"), 0);

    client
        .handle_command(ClientCommand::SetResidentActive {
            peer_id: PeerId::from("3"),
            active: false,
        })
        .await
        .unwrap();
    client.settle().await;

    assert_eq!(api.calls().last(), Some(&"toggle_user_status:3".to_string()));
    let changes = drain_changes(&mut changes);
    assert_eq!(count_notifications(&changes, NotificationKind::Success), 1);

    api.fail("toggle_user_status");
    let mut changes_after_failure = client.subscribe();
    client
        .handle_command(ClientCommand::SetResidentActive {
            peer_id: PeerId::from("3"),
            active: true,
        })
        .await
        .unwrap();
    client.settle().await;
    assert_eq!(
        count_notifications(&drain_changes(&mut changes_after_failure), NotificationKind::Error),
        1
    );
}

#[tokio::test]
async fn test_alert_archive_and_delete() {
    let api = Arc::new(FakeApi::new().with_alerts(alert_feed()));
    let mut client = rest_client(api);
    client.start();
    client.settle().await;

    client
        .handle_command(ClientCommand::UpdateAlert {
            alert_id: RemoteId::from("9"),
            update: AlertUpdate::archive(),
        })
        .await
        .unwrap();
    client.settle().await;
    assert_eq!(client.store().alerts()[0].status, AlertStatus::Archived);

    client
        .handle_command(ClientCommand::DeleteAlert(RemoteId::from("9")))
        .await
        .unwrap();
    client.settle().await;
    assert!(client.store().alerts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_push_for_other_conversation_raises_unread() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let (mut client, server) = realtime_client(api).await;
    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("2")))
        .await
        .unwrap();
    client.settle().await;

    server.push(json!({
        "type": "new_message",
        "chatId": "chat_3",
        "message": {"id": 50, "content": "Hello", "sender_id": 3}
    }));
    client.process_next().await;

    let store = client.store();
    assert_eq!(store.peer(&PeerId::from("3")).unwrap().unread_count, 1);
    assert_eq!(store.peer(&PeerId::from("2")).unwrap().unread_count, 0);
    assert_eq!(store.active_key(), Some(&ConversationKey::from("chat_2")));
    assert_eq!(store.view().total_unread(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invited_push_reloads_directory() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let (mut client, server) = realtime_client(api.clone()).await;

    server.push(json!({"type": "user_invited", "user": {"id": 8, "name": "Paul"}}));
    client.process_next().await;
    client.settle().await;

    assert_eq!(api.count("list_users"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sent_message_is_relayed_with_correlation_id() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let (mut client, mut server) = realtime_client(api).await;
    client
        .handle_command(ClientCommand::SelectPeer(PeerId::from("2")))
        .await
        .unwrap();
    client.settle().await;

    client
        .handle_command(ClientCommand::SendMessage("Bonjour".into()))
        .await
        .unwrap();
    client.settle().await;

    let frame = server.next_frame().await.unwrap();
    assert_eq!(frame["type"], "send_message");
    assert_eq!(frame["chatId"], "chat_2");
    assert_eq!(frame["message"]["content"], "Bonjour");
    assert!(frame["message"]["correlation_id"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_announces_departure() {
    let api = Arc::new(FakeApi::new().with_users(directory()));
    let (mut client, mut server) = realtime_client(api).await;

    client.handle_command(ClientCommand::Shutdown).await.unwrap();

    assert_eq!(
        server.next_frame().await.unwrap(),
        json!({"type": "user_disconnect", "userId": "1"})
    );
    assert_eq!(client.connection().state(), ConnectionState::Disconnected);
}
