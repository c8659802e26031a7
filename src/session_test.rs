use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use protocol::{Envelope, GameSnapshot};

use super::*;
use crate::transport::{Channel, TransportError};

struct ServerSide {
    from_client: mpsc::Receiver<String>,
    to_client: mpsc::Sender<String>,
}

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

fn player() -> Player {
    Player {
        id: "p1".to_owned(),
        display_name: "Player One".to_owned(),
        level: 1,
    }
}

fn assignment() -> MatchAssignment {
    MatchAssignment {
        match_id: "m1".to_owned(),
        game_id: "tictactoe".to_owned(),
        participant_ids: vec!["p1".to_owned(), "p2".to_owned()],
    }
}

async fn start_session() -> (
    LiveSession,
    mpsc::Receiver<EngineEvent>,
    ServerSide,
    mpsc::UnboundedReceiver<ServerSide>,
) {
    let (sessions_tx, mut sessions_rx) = mpsc::unbounded_channel();
    let (events_tx, mut events_rx) = mpsc::channel(64);
    let session = LiveSession::start(
        &EngineConfig::default(),
        Arc::new(Loopback { sessions: sessions_tx }),
        &player(),
        assignment(),
        events_tx,
    );
    let server = sessions_rx.recv().await.expect("session");
    wait_connection(&mut events_rx, ConnectionState::Open).await;
    (session, events_rx, server, sessions_rx)
}

async fn wait_connection(events: &mut mpsc::Receiver<EngineEvent>, target: ConnectionState) {
    loop {
        if let EngineEvent::ConnectionChanged(state) = events.recv().await.expect("event") {
            if state == target {
                return;
            }
        }
    }
}

async fn next_game_event(events: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
    loop {
        match events.recv().await.expect("event") {
            EngineEvent::ConnectionChanged(_) => {}
            other => return other,
        }
    }
}

fn grid_frame(board: &[&str], turn: &str) -> String {
    let cells: Vec<String> = board.iter().map(|&c| c.to_owned()).collect();
    format!(
        r#"{{"type":"state","data":{{"board":{},"turn":"{turn}"}}}}"#,
        serde_json::to_string(&cells).expect("board json")
    )
}

#[tokio::test(start_paused = true)]
async fn full_match_round_trip() {
    let (session, mut events, mut server, _sessions) = start_session().await;
    assert_eq!(session.connection_state(), ConnectionState::Open);
    assert_eq!(session.assignment().match_id, "m1");

    // Server opens play with an empty board, our turn.
    let empty = ["", "", "", "", "", "", "", "", ""];
    server.to_client.send(grid_frame(&empty, "p1")).await.expect("send");
    let EngineEvent::Snapshot(snapshot) = next_game_event(&mut events).await else {
        panic!("expected snapshot");
    };
    assert_eq!(session.snapshot(), Some(snapshot));

    // Our placement goes out attributed to us.
    session.play(MoveAction::Place { index: 4 }).expect("valid move");
    let Envelope::Move(payload) =
        Envelope::decode(&server.from_client.recv().await.expect("frame")).expect("decode")
    else {
        panic!("expected move");
    };
    assert_eq!(payload.player_id, "p1");

    // The server turns the board over; playing again is out of turn.
    let after = ["", "", "", "", "X", "", "", "", ""];
    server.to_client.send(grid_frame(&after, "p2")).await.expect("send");
    let EngineEvent::Snapshot(_) = next_game_event(&mut events).await else {
        panic!("expected snapshot");
    };
    assert_eq!(
        session.play(MoveAction::Place { index: 0 }),
        Err(MoveRejection::NotYourTurn)
    );

    // Chat shows up only when fanned back.
    session.say("gg");
    let Envelope::Chat(chat) =
        Envelope::decode(&server.from_client.recv().await.expect("frame")).expect("decode")
    else {
        panic!("expected chat");
    };
    assert_eq!(chat.text, "gg");
    assert!(session.chat_log().is_empty());

    let fanned = r#"{"type":"chat","data":{"fromPlayerId":"p1","text":"gg","timestamp":5}}"#;
    server.to_client.send(fanned.to_owned()).await.expect("send");
    let EngineEvent::Chat(entry) = next_game_event(&mut events).await else {
        panic!("expected chat event");
    };
    assert_eq!(entry.text, "gg");
    assert_eq!(session.chat_log(), vec![entry]);

    session.close().await;
    wait_connection(&mut events, ConnectionState::Closed).await;
}

#[tokio::test(start_paused = true)]
async fn play_is_rejected_before_any_snapshot() {
    let (session, _events, mut server, _sessions) = start_session().await;

    assert_eq!(
        session.play(MoveAction::Place { index: 0 }),
        Err(MoveRejection::NoSnapshot)
    );

    // Nothing reached the wire: the chat below is the first frame out.
    session.say("hello");
    let Envelope::Chat(_) =
        Envelope::decode(&server.from_client.recv().await.expect("frame")).expect("decode")
    else {
        panic!("expected chat as first frame");
    };
}

#[tokio::test(start_paused = true)]
async fn snapshot_survives_reconnect() {
    let (session, mut events, mut server, mut sessions) = start_session().await;

    let board = ["X", "", "", "", "", "", "", "", ""];
    server.to_client.send(grid_frame(&board, "p2")).await.expect("send");
    let EngineEvent::Snapshot(held) = next_game_event(&mut events).await else {
        panic!("expected snapshot");
    };

    // Connection drops; the held snapshot stays advisory while reconnecting.
    drop(server);
    wait_connection(&mut events, ConnectionState::Reconnecting).await;
    assert_eq!(session.snapshot(), Some(held));
    assert_eq!(
        session.play(MoveAction::Place { index: 1 }),
        Err(MoveRejection::NotYourTurn)
    );

    wait_connection(&mut events, ConnectionState::Open).await;
    let _server = sessions.recv().await.expect("reconnected session");
    session.close().await;
    wait_connection(&mut events, ConnectionState::Closed).await;
}

#[tokio::test(start_paused = true)]
async fn terminal_close_is_observable_and_idempotent() {
    let (session, mut events, _server, _sessions) = start_session().await;

    session.close().await;
    session.close().await;
    wait_connection(&mut events, ConnectionState::Closed).await;
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    // After teardown the surface stays safe to call.
    assert_eq!(
        session.play(MoveAction::Place { index: 0 }),
        Err(MoveRejection::NoSnapshot)
    );
    session.say("anyone?");
}
