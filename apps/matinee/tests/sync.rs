//! End-to-end tests driving real websocket clients against an in-process
//! server on an ephemeral port.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use matinee::{app_router, config::Config, websocket::AppState};
use matinee_proto::{ClientMessage, PlaybackSnapshot, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl TestClient {
    async fn connect(url: &str) -> Self {
        let (stream, _) = connect_async(url).await.expect("websocket connect");
        let (write, read) = stream.split();
        Self { write, read }
    }

    async fn send(&mut self, message: &ClientMessage) {
        let text = serde_json::to_string(message).unwrap();
        self.write
            .send(Message::Text(text.into()))
            .await
            .expect("websocket send");
    }

    async fn recv(&mut self) -> ServerMessage {
        timeout(Duration::from_secs(5), async {
            loop {
                let frame = self
                    .read
                    .next()
                    .await
                    .expect("stream ended")
                    .expect("websocket error");
                match frame {
                    Message::Text(text) => {
                        return serde_json::from_str(&text).expect("parse server message")
                    }
                    Message::Close(_) => panic!("connection closed while waiting for a message"),
                    _ => {}
                }
            }
        })
        .await
        .expect("timed out waiting for server message")
    }

    /// Fails the test if any event arrives within `window`.
    async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(Ok(Message::Text(text)))) = timeout(window, self.read.next()).await {
            panic!("expected silence, got {text}");
        }
    }

    async fn close(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}

async fn spawn_server() -> (String, AppState) {
    spawn_server_with(Config::default()).await
}

async fn spawn_server_with(config: Config) -> (String, AppState) {
    let state = AppState::new(config);
    let app = app_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/ws"), state)
}

async fn create_room(client: &mut TestClient) -> String {
    client.send(&ClientMessage::CreateRoom).await;
    match client.recv().await {
        ServerMessage::RoomCreated { room_id } => room_id,
        other => panic!("expected room_created, got {other:?}"),
    }
}

async fn join(client: &mut TestClient, room_id: &str, username: &str) -> (bool, usize) {
    client
        .send(&ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            username: username.to_string(),
        })
        .await;
    match client.recv().await {
        ServerMessage::JoinSuccess {
            is_host,
            member_count,
            ..
        } => (is_host, member_count),
        other => panic!("expected join_success, got {other:?}"),
    }
}

/// Consume the `user_joined` + `member_update` pair an existing member
/// sees when someone else joins.
async fn drain_join_events(client: &mut TestClient, expected_user: &str, expected_count: usize) {
    match client.recv().await {
        ServerMessage::UserJoined { username } => assert_eq!(username, expected_user),
        other => panic!("expected user_joined, got {other:?}"),
    }
    match client.recv().await {
        ServerMessage::MemberUpdate { members } => assert_eq!(members, expected_count),
        other => panic!("expected member_update, got {other:?}"),
    }
}

#[tokio::test]
async fn host_intents_reach_followers_but_never_echo() {
    let (url, _state) = spawn_server().await;

    let mut host = TestClient::connect(&url).await;
    let room = create_room(&mut host).await;
    let (is_host, _) = join(&mut host, &room, "ada").await;
    assert!(is_host);

    let mut follower = TestClient::connect(&url).await;
    let (is_host, count) = join(&mut follower, &room, "bea").await;
    assert!(!is_host);
    assert_eq!(count, 2);
    drain_join_events(&mut host, "bea", 2).await;

    host.send(&ClientMessage::ChangeVideo {
        video_id: "xyz123".to_string(),
        start_time: 10.0,
    })
    .await;

    match follower.recv().await {
        ServerMessage::ChangeVideo {
            video_id,
            start_time,
            by,
        } => {
            assert_eq!(video_id, "xyz123");
            assert_eq!(start_time, 10.0);
            assert_eq!(by, "ada");
        }
        other => panic!("expected change_video, got {other:?}"),
    }

    // no echo to the sender: the next thing the host sees is its own pong
    host.send(&ClientMessage::Ping).await;
    assert!(matches!(host.recv().await, ServerMessage::Pong));

    // the room's last-known state reflects the accepted intent
    let state = _state.rooms.playback_state(&room).await.unwrap();
    assert_eq!(state.video_id, "xyz123");
    assert_eq!(state.position_seconds, 10.0);
    assert!(!state.is_playing);
}

#[tokio::test]
async fn follower_control_intents_are_dropped() {
    let (url, state) = spawn_server().await;

    let mut host = TestClient::connect(&url).await;
    let room = create_room(&mut host).await;
    join(&mut host, &room, "ada").await;

    let mut follower = TestClient::connect(&url).await;
    join(&mut follower, &room, "bea").await;
    drain_join_events(&mut host, "bea", 2).await;

    follower
        .send(&ClientMessage::Seek { time: 99.0 })
        .await;
    follower
        .send(&ClientMessage::ChatMessage {
            text: "marker".to_string(),
        })
        .await;

    // the host sees the chat but never a seek broadcast
    match host.recv().await {
        ServerMessage::ChatMessage { user, text, .. } => {
            assert_eq!(user, "bea");
            assert_eq!(text, "marker");
        }
        other => panic!("expected chat_message, got {other:?}"),
    }

    // and the room state is untouched
    let playback = state.rooms.playback_state(&room).await.unwrap();
    assert_eq!(playback.position_seconds, 0.0);
}

#[tokio::test]
async fn late_joiner_sync_round_trip() {
    let (url, _state) = spawn_server().await;

    let mut host = TestClient::connect(&url).await;
    let room = create_room(&mut host).await;
    join(&mut host, &room, "ada").await;

    let mut follower = TestClient::connect(&url).await;
    join(&mut follower, &room, "bea").await;
    drain_join_events(&mut host, "bea", 2).await;

    follower.send(&ClientMessage::RequestSync).await;

    let to = match host.recv().await {
        ServerMessage::RequestSyncFromHost { to } => to,
        other => panic!("expected request_sync_from_host, got {other:?}"),
    };

    host.send(&ClientMessage::SyncState {
        to,
        state: PlaybackSnapshot {
            video_id: "xyz123".to_string(),
            current_time: 12.5,
            is_playing: true,
        },
    })
    .await;

    match follower.recv().await {
        ServerMessage::SyncState {
            video_id,
            current_time,
            is_playing,
        } => {
            assert_eq!(video_id, "xyz123");
            assert_eq!(current_time, 12.5);
            assert!(is_playing);
        }
        other => panic!("expected sync_state, got {other:?}"),
    }
}

#[tokio::test]
async fn host_disconnect_promotes_earliest_joined_survivor() {
    let (url, _state) = spawn_server().await;

    let mut a = TestClient::connect(&url).await;
    let room = create_room(&mut a).await;
    join(&mut a, &room, "ada").await;

    let mut b = TestClient::connect(&url).await;
    join(&mut b, &room, "bea").await;
    drain_join_events(&mut a, "bea", 2).await;

    let mut c = TestClient::connect(&url).await;
    join(&mut c, &room, "cal").await;
    drain_join_events(&mut a, "cal", 3).await;
    drain_join_events(&mut b, "cal", 3).await;

    a.close().await;

    // b joined earliest of the survivors, so authority passes to it
    assert!(matches!(b.recv().await, ServerMessage::YouAreHost));
    assert!(matches!(b.recv().await, ServerMessage::UserLeft { username } if username == "ada"));
    assert!(matches!(b.recv().await, ServerMessage::MemberUpdate { members: 2 }));

    // c only hears about the departure, never who the new host is
    assert!(matches!(c.recv().await, ServerMessage::UserLeft { username } if username == "ada"));
    assert!(matches!(c.recv().await, ServerMessage::MemberUpdate { members: 2 }));

    // and the new host can actually drive playback
    b.send(&ClientMessage::Play { time: 5.0 }).await;
    assert!(matches!(c.recv().await, ServerMessage::Play { time } if time == 5.0));
}

#[tokio::test]
async fn racing_departures_never_rewind_the_member_count() {
    let (url, _state) = spawn_server().await;

    let mut a = TestClient::connect(&url).await;
    let room = create_room(&mut a).await;
    join(&mut a, &room, "ada").await;

    let mut b = TestClient::connect(&url).await;
    join(&mut b, &room, "bea").await;
    drain_join_events(&mut a, "bea", 2).await;

    let mut c = TestClient::connect(&url).await;
    join(&mut c, &room, "cal").await;
    drain_join_events(&mut a, "cal", 3).await;
    drain_join_events(&mut b, "cal", 3).await;

    // both departures land at once; the survivor must see the count go
    // 2 then 1, never 1 then 2
    tokio::join!(a.close(), b.close());

    let mut updates = Vec::new();
    let mut departures = 0;
    while departures < 2 || updates.len() < 2 {
        match c.recv().await {
            ServerMessage::UserLeft { .. } => departures += 1,
            ServerMessage::MemberUpdate { members } => updates.push(members),
            // c may be promoted along the way, depending on which leave won
            ServerMessage::YouAreHost => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(updates, vec![2, 1]);
}

#[tokio::test]
async fn rejoining_the_same_room_does_not_renotify() {
    let (url, _state) = spawn_server().await;

    let mut host = TestClient::connect(&url).await;
    let room = create_room(&mut host).await;
    join(&mut host, &room, "ada").await;

    let mut follower = TestClient::connect(&url).await;
    join(&mut follower, &room, "bea").await;
    drain_join_events(&mut host, "bea", 2).await;

    // a client re-sending join_room for the room it is already in gets a
    // fresh join_success but nobody else hears a thing
    let (is_host, count) = join(&mut follower, &room, "bea").await;
    assert!(!is_host);
    assert_eq!(count, 2);
    host.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn emptied_room_forgets_its_id() {
    let (url, state) = spawn_server().await;

    let mut a = TestClient::connect(&url).await;
    let room = create_room(&mut a).await;
    join(&mut a, &room, "ada").await;
    a.close().await;

    // disconnect handling is asynchronous; wait for the teardown
    timeout(Duration::from_secs(5), async {
        while state.rooms.get(&room).is_some() {
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("room was never removed");

    let mut b = TestClient::connect(&url).await;
    b.send(&ClientMessage::JoinRoom {
        room_id: room.clone(),
        username: "bea".to_string(),
    })
    .await;
    match b.recv().await {
        ServerMessage::JoinError { reason } => assert_eq!(reason, "room not found"),
        other => panic!("expected join_error, got {other:?}"),
    }
}

#[tokio::test]
async fn chat_echoes_to_sender_with_server_timestamp() {
    let (url, _state) = spawn_server().await;

    let mut client = TestClient::connect(&url).await;
    let room = create_room(&mut client).await;
    join(&mut client, &room, "ada").await;

    client
        .send(&ClientMessage::ChatMessage {
            text: "  hello room  ".to_string(),
        })
        .await;

    match client.recv().await {
        ServerMessage::ChatMessage {
            user,
            text,
            timestamp,
        } => {
            assert_eq!(user, "ada");
            assert_eq!(text, "hello room");
            assert!(timestamp > 0);
        }
        other => panic!("expected chat_message, got {other:?}"),
    }
}

#[tokio::test]
async fn hostless_sync_request_drops_quietly() {
    let config = Config {
        sync_request_timeout_ms: 300,
        sync_retry_interval_ms: 50,
        ..Config::default()
    };
    let (url, state) = spawn_server_with(config).await;

    let mut client = TestClient::connect(&url).await;
    let room = create_room(&mut client).await;
    join(&mut client, &room, "ada").await;

    // force the succession-race window: a member present, no host
    {
        let handle = state.rooms.get(&room).unwrap();
        handle.lock().await.host_id = None;
    }

    client.send(&ClientMessage::RequestSync).await;
    client.expect_silence(Duration::from_millis(600)).await;

    // the connection and the room survive the dropped request
    client.send(&ClientMessage::Ping).await;
    assert!(matches!(client.recv().await, ServerMessage::Pong));
}
