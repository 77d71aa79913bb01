//! Connection manager tests over a scripted transport, on paused tokio time

use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;

use residence_portal::client::realtime::{ConnectionManager, ConnectionState};
use residence_portal::shared::messaging::{ConversationKey, PeerId, Presence};
use residence_portal::shared::{AppConfig, BackoffStrategy, OutboundEvent, RealtimeEvent};

use crate::common::{realtime_session, realtime_session_with, rest_session, Handshake, MockConnector};

async fn reach(state: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
    state.wait_for(|s| *s == wanted).await.unwrap();
}

fn gaps(connector: &MockConnector) -> Vec<Duration> {
    connector
        .attempts()
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_authenticate_is_sent_right_after_open() {
    let (connector, mut servers) = MockConnector::new();
    let manager = ConnectionManager::new(connector.clone());
    let mut state = manager.watch_state();

    manager.connect(&realtime_session());
    let mut server = servers.recv().await.unwrap();

    assert_eq!(
        server.next_frame().await.unwrap(),
        json!({"type": "authenticate", "userId": "1"})
    );
    reach(&mut state, ConnectionState::Authenticated).await;
    assert!(manager.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_close_reconnects_after_fixed_delay() {
    let (connector, mut servers) = MockConnector::new();
    let manager = ConnectionManager::new(connector.clone());
    let mut state = manager.watch_state();
    manager.connect(&realtime_session());

    let server = servers.recv().await.unwrap();
    reach(&mut state, ConnectionState::Authenticated).await;

    server.close();
    reach(&mut state, ConnectionState::Disconnected).await;

    let mut second = servers.recv().await.unwrap();
    assert_eq!(second.next_frame().await.unwrap()["type"], "authenticate");
    reach(&mut state, ConnectionState::Authenticated).await;
    assert_eq!(gaps(&connector), vec![Duration::from_millis(3000)]);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_failures_never_stack_timers() {
    let (connector, mut servers) = MockConnector::new();
    connector.script([Handshake::Refuse, Handshake::Refuse, Handshake::Refuse]);
    let manager = ConnectionManager::new(connector.clone());
    let mut state = manager.watch_state();

    manager.connect(&realtime_session());
    let _server = servers.recv().await.unwrap();
    reach(&mut state, ConnectionState::Authenticated).await;

    assert_eq!(connector.attempt_count(), 4);
    assert_eq!(gaps(&connector), vec![Duration::from_millis(3000); 3]);
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_counts_as_failure() {
    let (connector, mut servers) = MockConnector::new();
    connector.script([Handshake::Hang]);
    let manager = ConnectionManager::new(connector.clone());

    manager.connect(&realtime_session_with(
        AppConfig::builder()
            .socket_url("ws://portal.test/ws")
            .handshake_timeout(Duration::from_secs(2)),
    ));
    let _server = servers.recv().await.unwrap();

    assert_eq!(gaps(&connector), vec![Duration::from_millis(2000 + 3000)]);
}

#[tokio::test(start_paused = true)]
async fn test_exponential_backoff_is_capped() {
    let (connector, mut servers) = MockConnector::new();
    connector.script([Handshake::Refuse; 4]);
    let manager = ConnectionManager::new(connector.clone());

    manager.connect(&realtime_session_with(
        AppConfig::builder()
            .socket_url("ws://portal.test/ws")
            .backoff(BackoffStrategy::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_millis(2000),
            }),
    ));
    let _server = servers.recv().await.unwrap();

    assert_eq!(
        gaps(&connector),
        vec![
            Duration::from_millis(500),
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(2000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_cap_leaves_manager_disconnected() {
    let (connector, _servers) = MockConnector::with_fallback(Handshake::Refuse);
    let manager = ConnectionManager::new(connector.clone());

    manager.connect(&realtime_session_with(
        AppConfig::builder()
            .socket_url("ws://portal.test/ws")
            .max_reconnect_attempts(2),
    ));
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempt_count(), 3);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    let err = manager
        .send(&OutboundEvent::UserDisconnect {
            user_id: PeerId::from("1"),
        })
        .unwrap_err();
    assert!(err.is_transport_unavailable());
}

#[tokio::test(start_paused = true)]
async fn test_without_socket_address_nothing_is_attempted() {
    let (connector, _servers) = MockConnector::new();
    let manager = ConnectionManager::new(connector.clone());

    manager.connect(&rest_session());
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempt_count(), 0);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_does_not_open_a_second_socket() {
    let (connector, mut servers) = MockConnector::new();
    let manager = ConnectionManager::new(connector.clone());
    let session = realtime_session();

    manager.connect(&session);
    manager.connect(&session);
    let _server = servers.recv().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_push_frames_are_typed_and_junk_is_dropped() {
    let (connector, mut servers) = MockConnector::new();
    let manager = ConnectionManager::new(connector);
    let mut events = manager.events();
    manager.connect(&realtime_session());
    let server = servers.recv().await.unwrap();

    server.push(json!({"type": "typing", "userId": 2}));
    server.push_raw("{not json");
    server.push(json!({"type": "new_message", "chatId": "chat_2"}));
    server.push(json!({"type": "user_status", "userId": 2, "status": "online"}));
    server.push(json!({
        "type": "new_message",
        "chatId": "chat_2",
        "message": {"id": 5, "content": "Bonjour", "sender_id": 2}
    }));

    assert_eq!(
        events.recv().await.unwrap(),
        RealtimeEvent::PresenceChanged {
            peer_id: PeerId::from("2"),
            presence: Presence::Online,
        }
    );
    match events.recv().await.unwrap() {
        RealtimeEvent::MessageReceived {
            conversation_key,
            message,
        } => {
            assert_eq!(conversation_key, ConversationKey::from("chat_2"));
            assert_eq!(message.content, "Bonjour");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_authentication() {
    let (connector, mut servers) = MockConnector::new();
    let manager = ConnectionManager::new(connector);
    let mut state = manager.watch_state();
    let event = OutboundEvent::UserDisconnect {
        user_id: PeerId::from("1"),
    };

    assert!(manager.send(&event).unwrap_err().is_transport_unavailable());

    manager.connect(&realtime_session());
    let mut server = servers.recv().await.unwrap();
    reach(&mut state, ConnectionState::Authenticated).await;
    server.next_frame().await.unwrap();

    manager.send(&event).unwrap();
    assert_eq!(server.next_frame().await.unwrap()["type"], "user_disconnect");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_says_goodbye_and_stops_reconnecting() {
    let (connector, mut servers) = MockConnector::new();
    let manager = ConnectionManager::new(connector.clone());
    let mut state = manager.watch_state();
    manager.connect(&realtime_session());
    let mut server = servers.recv().await.unwrap();
    reach(&mut state, ConnectionState::Authenticated).await;
    server.next_frame().await.unwrap();

    manager.shutdown().await;

    assert_eq!(
        server.next_frame().await.unwrap(),
        json!({"type": "user_disconnect", "userId": "1"})
    );
    assert!(server.next_frame().await.is_none());
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_reconnect() {
    let (connector, _servers) = MockConnector::with_fallback(Handshake::Refuse);
    let manager = ConnectionManager::new(connector.clone());
    manager.connect(&realtime_session());
    while connector.attempt_count() == 0 {
        tokio::task::yield_now().await;
    }

    manager.shutdown().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}
