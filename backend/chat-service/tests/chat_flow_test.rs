/// End-to-end chat flow over the hub, the session pumps and the log consumer.
/// Connections are replaced by channels so no socket or Redis is needed.
use async_trait::async_trait;
use bytes::Bytes;
use chat_service::config::SessionConfig;
use chat_service::models::{Message, MessageId, NewMessage, TopicKey, UserInfo};
use chat_service::repository::{
    ChatRepository, MemoryChatRepository, RepositoryError, TailBatch, TailOptions,
};
use chat_service::services::MessageService;
use chat_service::websocket::{
    ChatListener, Control, FrameSink, Hub, HubConfig, PresenceStatus, ReadPump, Registration,
    SessionGuard, TransportError, WireFrame, WritePump, WsEnvelope, CONTROL_CAPACITY,
};
use futures_util::stream::{self, Stream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, PartialEq)]
enum Sent {
    Text(String),
    Ping,
    Pong(Bytes),
    Close,
}

struct ChannelSink {
    out: mpsc::UnboundedSender<Sent>,
}

impl ChannelSink {
    fn push(&self, sent: Sent) -> Result<(), TransportError> {
        self.out.send(sent).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(Sent::Text(text))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(Sent::Ping)
    }

    async fn send_pong(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.push(Sent::Pong(payload))
    }

    async fn close(&mut self) {
        let _ = self.push(Sent::Close);
    }
}

type Inbound = mpsc::UnboundedSender<Result<WireFrame, TransportError>>;

fn inbound_stream(
    mut rx: mpsc::UnboundedReceiver<Result<WireFrame, TransportError>>,
) -> impl Stream<Item = Result<WireFrame, TransportError>> + Unpin + Send {
    stream::poll_fn(move |cx| rx.poll_recv(cx))
}

fn user(id: &str, name: &str) -> UserInfo {
    UserInfo {
        id: id.into(),
        username: name.into(),
    }
}

fn fast_repo() -> Arc<MemoryChatRepository> {
    Arc::new(MemoryChatRepository::new(TailOptions {
        block: Duration::from_millis(50),
        batch_size: 100,
    }))
}

struct Client {
    id: chat_service::websocket::SessionId,
    sent: mpsc::UnboundedReceiver<Sent>,
    inbound: Inbound,
    write: JoinHandle<()>,
    read: JoinHandle<()>,
}

impl Client {
    /// Next frame written to the fake socket
    async fn next_sent(&mut self) -> Sent {
        tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("sink dropped")
    }

    /// Next text frame split into its envelopes
    async fn next_envelopes(&mut self) -> Vec<WsEnvelope> {
        loop {
            match self.next_sent().await {
                Sent::Text(text) => {
                    return text
                        .split('\n')
                        .map(|line| serde_json::from_str(line).unwrap())
                        .collect()
                }
                Sent::Ping | Sent::Pong(_) => continue,
                Sent::Close => panic!("connection closed"),
            }
        }
    }

    fn send(&self, frame: WireFrame) {
        self.inbound.send(Ok(frame)).unwrap();
    }
}

async fn connect(
    hub: &Hub,
    messages: &Arc<MessageService>,
    who: UserInfo,
    config: SessionConfig,
) -> Client {
    let Registration {
        id,
        user,
        mailbox,
        active_users,
    } = hub.register(who).await.unwrap();

    let (out, sent) = mpsc::unbounded_channel();
    let (inbound, inbound_rx) = mpsc::unbounded_channel();
    let (control_tx, control_rx) = mpsc::channel::<Control>(CONTROL_CAPACITY);

    let write = WritePump {
        sink: ChannelSink { out },
        mailbox,
        control: control_rx,
        active_users,
        messages: messages.clone(),
        config: config.clone(),
        guard: SessionGuard::new(hub.clone(), id),
    };
    let read = ReadPump {
        frames: inbound_stream(inbound_rx),
        user,
        messages: messages.clone(),
        control: control_tx,
        config,
        guard: SessionGuard::new(hub.clone(), id),
    };

    Client {
        id,
        sent,
        inbound,
        write: tokio::spawn(write.run()),
        read: tokio::spawn(read.run()),
    }
}

fn contents(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.content.as_str()).collect()
}

#[tokio::test]
async fn test_history_then_live_delivery() {
    let repo = fast_repo();
    let messages = Arc::new(MessageService::new(repo.clone(), 1000));
    let alice = user("u-a", "alice");

    messages.send_chatroom_message(&alice, "A").await.unwrap();
    messages.send_chatroom_message(&alice, "B").await.unwrap();

    let hub = Hub::spawn(HubConfig::default());
    let mut listener = ChatListener::new(repo.clone(), hub.clone());
    listener.resolve_start().await;
    tokio::spawn(listener.follow());

    let mut client = connect(&hub, &messages, alice.clone(), SessionConfig::default()).await;

    assert_eq!(
        client.next_envelopes().await,
        vec![WsEnvelope::UserList(vec![alice.clone()])]
    );
    match client.next_envelopes().await.as_slice() {
        [WsEnvelope::History(history)] => assert_eq!(contents(history), vec!["A", "B"]),
        other => panic!("expected history, got {other:?}"),
    }

    client.send(WireFrame::Text(r#"{"content":"  C  "}"#.into()));

    match client.next_envelopes().await.as_slice() {
        [WsEnvelope::Chat(message)] => {
            assert_eq!(message.content, "C");
            assert_eq!(message.from, "u-a");
            assert_eq!(message.from_name, "alice");
        }
        other => panic!("expected one chat envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_log_sends_empty_history() {
    let messages = Arc::new(MessageService::new(fast_repo(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let mut client = connect(&hub, &messages, user("u-a", "alice"), SessionConfig::default()).await;

    client.next_envelopes().await;
    assert_eq!(
        client.next_envelopes().await,
        vec![WsEnvelope::History(Vec::new())]
    );
}

#[tokio::test]
async fn test_broadcast_reaches_every_session_in_order() {
    let repo = fast_repo();
    let messages = Arc::new(MessageService::new(repo.clone(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let mut listener = ChatListener::new(repo.clone(), hub.clone());
    listener.resolve_start().await;
    tokio::spawn(listener.follow());

    let mut alice = connect(&hub, &messages, user("u-a", "alice"), SessionConfig::default()).await;
    let mut bob = connect(&hub, &messages, user("u-b", "bob"), SessionConfig::default()).await;

    for client in [&mut alice, &mut bob] {
        // user_list, history
        client.next_envelopes().await;
        client.next_envelopes().await;
    }
    // alice also sees bob join
    assert_eq!(
        alice.next_envelopes().await,
        vec![WsEnvelope::presence(PresenceStatus::Joined, user("u-b", "bob"))]
    );

    for text in ["one", "two", "three"] {
        messages
            .send_chatroom_message(&user("u-b", "bob"), text)
            .await
            .unwrap();
    }

    for client in [&mut alice, &mut bob] {
        let mut seen = Vec::new();
        while seen.len() < 3 {
            for envelope in client.next_envelopes().await {
                match envelope {
                    WsEnvelope::Chat(message) => seen.push(message.content),
                    other => panic!("unexpected envelope {other:?}"),
                }
            }
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
    }
}

#[tokio::test]
async fn test_live_duplicates_of_history_are_dropped() {
    let repo = fast_repo();
    let messages = Arc::new(MessageService::new(repo.clone(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let alice = user("u-a", "alice");

    let registration = hub.register(alice.clone()).await.unwrap();

    // Appended and broadcast before the write pump fetched history
    let early = messages.send_chatroom_message(&alice, "early").await.unwrap();
    hub.broadcast(WsEnvelope::Chat(early)).await;
    hub.broadcast(WsEnvelope::presence(PresenceStatus::Joined, user("u-z", "zed")))
        .await;
    hub.session_count().await.unwrap();

    let (out, mut sent) = mpsc::unbounded_channel();
    let (_control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let write = WritePump {
        sink: ChannelSink { out },
        mailbox: registration.mailbox,
        control: control_rx,
        active_users: registration.active_users,
        messages: messages.clone(),
        config: SessionConfig::default(),
        guard: SessionGuard::new(hub.clone(), registration.id),
    };
    tokio::spawn(write.run());

    let mut texts = Vec::new();
    while texts.len() < 3 {
        if let Some(Sent::Text(text)) = sent.recv().await {
            texts.push(text);
        }
    }
    assert!(texts[1].contains(r#""content":"early""#));
    // Third frame is the presence notice alone; the queued chat copy was dropped
    let third: WsEnvelope = serde_json::from_str(&texts[2]).unwrap();
    assert_eq!(
        third,
        WsEnvelope::presence(PresenceStatus::Joined, user("u-z", "zed"))
    );
}

#[tokio::test]
async fn test_invalid_content_keeps_session_open() {
    let repo = fast_repo();
    let messages = Arc::new(MessageService::new(repo.clone(), 10));
    let hub = Hub::spawn(HubConfig::default());
    let client = connect(&hub, &messages, user("u-a", "alice"), SessionConfig::default()).await;

    client.send(WireFrame::Text(r#"{"content":"   "}"#.into()));
    client.send(WireFrame::Text(r#"{"content":"far too long for ten"}"#.into()));
    client.send(WireFrame::Text(r#"{"content":"ok"}"#.into()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let history = repo.history(&TopicKey::Chatroom, 10).await.unwrap();
        if !history.is_empty() {
            assert_eq!(contents(&history), vec!["ok"]);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "message never appended");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hub.session_count().await.unwrap(), 1);
    assert!(!client.read.is_finished());
}

#[tokio::test]
async fn test_bad_frames_end_the_session() {
    let repo = fast_repo();
    let messages = Arc::new(MessageService::new(repo.clone(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let config = SessionConfig {
        max_frame_bytes: 64,
        ..SessionConfig::default()
    };

    let frames = [
        WireFrame::Text("not json".into()),
        WireFrame::Text(format!(r#"{{"content":"{}"}}"#, "x".repeat(100))),
        WireFrame::Unsupported("binary"),
        WireFrame::Close,
    ];
    for frame in frames {
        let mut client = connect(&hub, &messages, user("u-a", "alice"), config.clone()).await;
        client.send(frame.clone());

        (&mut client.read).await.unwrap();
        // Read side gone: the write pump closes the connection too
        loop {
            if client.next_sent().await == Sent::Close {
                break;
            }
        }
        client.write.await.unwrap();
        assert_eq!(hub.session_count().await.unwrap(), 0, "{frame:?}");
    }
    assert!(repo.history(&TopicKey::Chatroom, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_read_error_unregisters() {
    let messages = Arc::new(MessageService::new(fast_repo(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let client = connect(&hub, &messages, user("u-a", "alice"), SessionConfig::default()).await;

    client
        .inbound
        .send(Err(TransportError::Protocol("overflow".into())))
        .unwrap();
    client.read.await.unwrap();
    client.write.await.unwrap();
    assert_eq!(hub.session_count().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pongs_extend_the_read_deadline() {
    let messages = Arc::new(MessageService::new(fast_repo(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let config = SessionConfig {
        pong_wait: Duration::from_secs(60),
        ..SessionConfig::default()
    };
    let client = connect(&hub, &messages, user("u-a", "alice"), config).await;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_secs(40)).await;
        client.send(WireFrame::Pong);
    }
    // 120s in: well past one deadline, still alive thanks to the pongs
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(hub.session_count().await.unwrap(), 1);

    // No more pongs: the deadline 60s after the last one ends the session
    client.read.await.unwrap();
    assert_eq!(hub.session_count().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_pings_and_pong_replies() {
    let messages = Arc::new(MessageService::new(fast_repo(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let mut client =
        connect(&hub, &messages, user("u-a", "alice"), SessionConfig::default()).await;
    client.next_envelopes().await;
    client.next_envelopes().await;

    client.send(WireFrame::Ping(Bytes::from_static(b"hb")));
    assert_eq!(client.next_sent().await, Sent::Pong(Bytes::from_static(b"hb")));

    // Ping period is 9/10 of the 60s read deadline
    tokio::time::sleep(Duration::from_secs(55)).await;
    assert_eq!(client.next_sent().await, Sent::Ping);
}

#[tokio::test]
async fn test_dropping_one_client_leaves_others_untouched() {
    let messages = Arc::new(MessageService::new(fast_repo(), 1000));
    let hub = Hub::spawn(HubConfig::default());
    let mut alice = connect(&hub, &messages, user("u-a", "alice"), SessionConfig::default()).await;
    let bob = connect(&hub, &messages, user("u-b", "bob"), SessionConfig::default()).await;
    alice.next_envelopes().await;
    alice.next_envelopes().await;
    alice.next_envelopes().await; // bob joined

    bob.send(WireFrame::Close);
    assert_eq!(
        alice.next_envelopes().await,
        vec![WsEnvelope::presence(PresenceStatus::Left, user("u-b", "bob"))]
    );
    assert_eq!(hub.active_users().await.unwrap(), vec![user("u-a", "alice")]);
    hub.unregister(bob.id);
    assert_eq!(hub.session_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_saturated_session_is_evicted_and_others_continue() {
    let hub = Hub::spawn(HubConfig {
        command_capacity: 16,
        mailbox_capacity: 2,
    });
    // Sessions backfill from an empty log; chats are minted on a separate one
    let messages = Arc::new(MessageService::new(fast_repo(), 1000));
    let chatter = MessageService::new(fast_repo(), 1000);
    let author = user("u-c", "carol");

    let mut fast = connect(&hub, &messages, user("u-f", "fast"), SessionConfig::default()).await;
    fast.next_envelopes().await;
    fast.next_envelopes().await;

    // Registered but never drained
    let slow = hub.register(user("u-s", "slow")).await.unwrap();
    assert_eq!(
        fast.next_envelopes().await,
        vec![WsEnvelope::presence(PresenceStatus::Joined, user("u-s", "slow"))]
    );

    let mut seen = Vec::new();
    for n in 1..=5 {
        let text = n.to_string();
        let chat = chatter.send_chatroom_message(&author, &text).await.unwrap();
        hub.broadcast(WsEnvelope::Chat(chat)).await;
        // Let the survivor's write pump drain before the next broadcast
        loop {
            let batch = fast.next_envelopes().await;
            let done = batch
                .iter()
                .any(|e| matches!(e, WsEnvelope::Chat(m) if m.content == text));
            seen.extend(batch);
            if done {
                break;
            }
        }
    }

    let labels: Vec<String> = seen
        .iter()
        .map(|envelope| match envelope {
            WsEnvelope::Chat(message) => message.content.clone(),
            WsEnvelope::Presence(presence) => {
                format!("{:?}:{}", presence.status, presence.user.username)
            }
            other => panic!("unexpected envelope {other:?}"),
        })
        .collect();
    assert_eq!(labels, vec!["1", "2", "3", "Left:slow", "4", "5"]);
    assert_eq!(hub.session_count().await.unwrap(), 1);
    assert_eq!(hub.active_users().await.unwrap(), vec![user("u-f", "fast")]);

    // The evicted pump flushes what was buffered, then closes the connection
    let (out, mut sent) = mpsc::unbounded_channel();
    let (_control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let evicted = WritePump {
        sink: ChannelSink { out },
        mailbox: slow.mailbox,
        control: control_rx,
        active_users: slow.active_users,
        messages: messages.clone(),
        config: SessionConfig::default(),
        guard: SessionGuard::new(hub.clone(), slow.id),
    };
    tokio::time::timeout(Duration::from_secs(5), evicted.run())
        .await
        .expect("evicted write pump did not exit");

    let mut frames = Vec::new();
    while let Some(frame) = sent.recv().await {
        frames.push(frame);
    }
    assert_eq!(frames.len(), 4, "{frames:?}");
    assert_eq!(frames[3], Sent::Close);
    let Sent::Text(buffered) = &frames[2] else {
        panic!("expected buffered chats, got {:?}", frames[2]);
    };
    let buffered: Vec<WsEnvelope> = buffered
        .split('\n')
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    match buffered.as_slice() {
        [WsEnvelope::Chat(a), WsEnvelope::Chat(b)] => {
            assert_eq!((a.content.as_str(), b.content.as_str()), ("1", "2"));
        }
        other => panic!("expected two chats, got {other:?}"),
    }

    // Later broadcasts still reach the survivor
    hub.broadcast(WsEnvelope::History(Vec::new())).await;
    assert_eq!(
        fast.next_envelopes().await,
        vec![WsEnvelope::History(Vec::new())]
    );
}

/// Fails a fixed number of tail calls before delegating
struct FlakyRepository {
    inner: MemoryChatRepository,
    failures_left: AtomicUsize,
}

#[async_trait]
impl ChatRepository for FlakyRepository {
    async fn append(
        &self,
        topic: &TopicKey,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        self.inner.append(topic, message).await
    }

    async fn tail_after(
        &self,
        topic: &TopicKey,
        cursor: MessageId,
    ) -> Result<TailBatch, RepositoryError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RepositoryError::Malformed {
                id: cursor.to_string(),
                reason: "connection reset".into(),
            });
        }
        self.inner.tail_after(topic, cursor).await
    }

    async fn history(
        &self,
        topic: &TopicKey,
        count: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.inner.history(topic, count).await
    }

    async fn latest_id(&self, topic: &TopicKey) -> Result<Option<MessageId>, RepositoryError> {
        self.inner.latest_id(topic).await
    }
}

#[tokio::test]
async fn test_listener_survives_store_errors() {
    let repo = Arc::new(FlakyRepository {
        inner: MemoryChatRepository::new(TailOptions {
            block: Duration::from_millis(20),
            batch_size: 100,
        }),
        failures_left: AtomicUsize::new(3),
    });
    let messages = Arc::new(MessageService::new(repo.clone(), 1000));
    let hub = Hub::spawn(HubConfig::default());

    let mut listener =
        ChatListener::new(repo.clone(), hub.clone()).with_retry_delay(Duration::from_millis(5));
    listener.resolve_start().await;
    tokio::spawn(listener.follow());

    let mut client = connect(&hub, &messages, user("u-a", "alice"), SessionConfig::default()).await;
    client.next_envelopes().await;
    client.next_envelopes().await;

    // Appended while the tail is failing; delivered once it recovers
    messages
        .send_chatroom_message(&user("u-a", "alice"), "survived")
        .await
        .unwrap();

    match client.next_envelopes().await.as_slice() {
        [WsEnvelope::Chat(message)] => assert_eq!(message.content, "survived"),
        other => panic!("expected the chat envelope, got {other:?}"),
    }
    assert_eq!(repo.failures_left.load(Ordering::SeqCst), 0);

    // Several tail periods later there is still no second copy
    let again = tokio::time::timeout(Duration::from_millis(200), client.next_envelopes()).await;
    assert!(again.is_err(), "duplicate delivery: {again:?}");
}
