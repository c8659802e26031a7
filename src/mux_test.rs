use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use protocol::{Direction, GameSnapshot};

use super::*;
use crate::config::EngineConfig;
use crate::transport::{Channel, ConnectionState, Connector, SessionTransport, TransportError};

struct ServerSide {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

/// Always-accepting connector that hands the server side back to the test.
struct Loopback {
    sessions: mpsc::UnboundedSender<ServerSide>,
}

#[async_trait]
impl Connector for Loopback {
    async fn connect(&self, _match_id: &str, _player_id: &str) -> Result<Channel, TransportError> {
        let (out_tx, out_rx) = mpsc::channel(32);
        let (in_tx, in_rx) = mpsc::channel(32);
        let _ = self.sessions.send(ServerSide { from_client: out_rx, to_client: in_tx });
        Ok(Channel { outbound: out_tx, inbound: in_rx })
    }
}

struct Rig {
    mux: Arc<Multiplexer>,
    events: mpsc::Receiver<EngineEvent>,
    server: ServerSide,
    handle: SessionHandle,
    reconciler: Arc<Reconciler>,
    chat: Arc<ChatLog>,
    _task: tokio::task::JoinHandle<()>,
}

async fn rig() -> Rig {
    let (sessions_tx, mut sessions_rx) = mpsc::unbounded_channel();
    let transport =
        SessionTransport::new(&EngineConfig::default(), Arc::new(Loopback { sessions: sessions_tx }));
    let (in_tx, in_rx) = mpsc::channel(32);
    let handle = transport.open("m1", "p1", in_tx);
    let server = sessions_rx.recv().await.expect("session");
    let mut state_rx = handle.watch_state();
    state_rx
        .wait_for(|s| *s == ConnectionState::Open)
        .await
        .expect("open");

    let reconciler = Arc::new(Reconciler::new("p1"));
    let chat = Arc::new(ChatLog::new());
    let (events_tx, events_rx) = mpsc::channel(32);
    let mux = Arc::new(Multiplexer::new(
        handle.clone(),
        "p1",
        Arc::clone(&reconciler),
        Arc::clone(&chat),
        events_tx,
    ));
    let task = {
        let mux = Arc::clone(&mux);
        tokio::spawn(async move { mux.run(in_rx).await })
    };

    Rig { mux, events: events_rx, server, handle, reconciler, chat, _task: task }
}

const GRID_STATE: &str =
    r#"{"type":"state","data":{"board":["X","","","","","","","",""],"turn":"p1"}}"#;

#[tokio::test(start_paused = true)]
async fn inbound_snapshot_routes_to_reconciler() {
    let mut rig = rig().await;

    rig.server.to_client.send(GRID_STATE.to_owned()).await.expect("send");

    let EngineEvent::Snapshot(snapshot) = rig.events.recv().await.expect("event") else {
        panic!("expected snapshot event");
    };
    assert_eq!(rig.reconciler.snapshot(), Some(snapshot.clone()));
    let GameSnapshot::Grid(grid) = snapshot else {
        panic!("expected grid");
    };
    assert_eq!(grid.board[0], "X");
}

#[tokio::test(start_paused = true)]
async fn inbound_chat_routes_to_log() {
    let mut rig = rig().await;

    let frame = r#"{"type":"chat","data":{"fromPlayerId":"p2","text":"glhf","timestamp":17}}"#;
    rig.server.to_client.send(frame.to_owned()).await.expect("send");

    let EngineEvent::Chat(entry) = rig.events.recv().await.expect("event") else {
        panic!("expected chat event");
    };
    assert_eq!(entry.from_player_id, "p2");
    assert_eq!(entry.text, "glhf");
    assert!(entry.received_at > 0);
    assert_eq!(rig.chat.entries(), vec![entry]);
}

#[tokio::test(start_paused = true)]
async fn interleaved_frames_keep_channel_order() {
    let mut rig = rig().await;

    let chat = r#"{"type":"chat","data":{"fromPlayerId":"p2","text":"nice","timestamp":1}}"#;
    let second =
        r#"{"type":"state","data":{"board":["X","O","","","","","","",""],"turn":"p1"}}"#;
    for frame in [GRID_STATE, chat, second] {
        rig.server.to_client.send(frame.to_owned()).await.expect("send");
    }

    assert!(matches!(rig.events.recv().await, Some(EngineEvent::Snapshot(_))));
    assert!(matches!(rig.events.recv().await, Some(EngineEvent::Chat(_))));
    let Some(EngineEvent::Snapshot(GameSnapshot::Grid(grid))) = rig.events.recv().await else {
        panic!("expected second snapshot");
    };
    assert_eq!(grid.board[1], "O");
    assert_eq!(
        rig.reconciler.snapshot(),
        Some(GameSnapshot::Grid(grid))
    );
}

#[tokio::test(start_paused = true)]
async fn noise_frames_are_dropped_without_effect() {
    let mut rig = rig().await;

    let noise = [
        r#"{"type":"ping","data":null}"#,
        "not json at all",
        r#"{"type":"control","data":{}}"#,
        r#"{"type":"move","data":{"playerId":"p2","index":3}}"#,
    ];
    for frame in noise {
        rig.server.to_client.send(frame.to_owned()).await.expect("send");
    }
    let chat = r#"{"type":"chat","data":{"fromPlayerId":"p2","text":"still here","timestamp":1}}"#;
    rig.server.to_client.send(chat.to_owned()).await.expect("send");

    // Only the chat frame produced anything observable.
    assert!(matches!(rig.events.recv().await, Some(EngineEvent::Chat(_))));
    assert!(rig.events.try_recv().is_err());
    assert_eq!(rig.chat.len(), 1);
    assert_eq!(rig.reconciler.snapshot(), None);
}

#[tokio::test(start_paused = true)]
async fn outbound_move_carries_player_attribution() {
    let mut rig = rig().await;

    rig.mux.send_move(MoveAction::Place { index: 4 });

    let text = rig.server.from_client.recv().await.expect("frame");
    let Envelope::Move(payload) = Envelope::decode(&text).expect("decode") else {
        panic!("expected move");
    };
    assert_eq!(payload.player_id, "p1");
    assert_eq!(payload.action, MoveAction::Place { index: 4 });
}

#[tokio::test(start_paused = true)]
async fn outbound_chat_is_trimmed_and_empty_is_dropped() {
    let mut rig = rig().await;

    rig.mux.send_chat("  gg  ");
    rig.mux.send_chat("   ");
    rig.mux.send_move(MoveAction::Steer { direction: Direction::Up });

    let Envelope::Chat(payload) =
        Envelope::decode(&rig.server.from_client.recv().await.expect("frame")).expect("decode")
    else {
        panic!("expected chat");
    };
    assert_eq!(payload.text, "gg");
    assert_eq!(payload.from_player_id, "p1");
    assert!(payload.timestamp > 0);

    // The whitespace-only chat never hit the wire: the move is next.
    let Envelope::Move(_) =
        Envelope::decode(&rig.server.from_client.recv().await.expect("frame")).expect("decode")
    else {
        panic!("expected move");
    };
}

#[tokio::test(start_paused = true)]
async fn sends_after_close_are_dropped_silently() {
    let mut rig = rig().await;

    rig.handle.close().await;
    let mut state_rx = rig.handle.watch_state();
    state_rx
        .wait_for(|s| *s == ConnectionState::Closed)
        .await
        .expect("closed");

    rig.mux.send_move(MoveAction::Place { index: 0 });
    rig.mux.send_chat("anyone there?");

    while rig.server.from_client.recv().await.is_some() {}
    assert!(rig.events.try_recv().is_err());
}
